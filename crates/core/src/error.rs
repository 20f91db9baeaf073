//! Error types for the unit repository
//!
//! This module defines the error type shared by every crate in the workspace.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Expected absence (a unit missing from a layer, a key that no layer knows,
//! a stale file index) is never an error: it is reported through `Option`,
//! `-1` or the `WRONG_PATH` sentinel.

use std::io;
use thiserror::Error;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the unit repository
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error against a layer or the codec
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted bytes are malformed
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invariant violation: indicates a bug in the caller or in layer setup
    #[error("Internal error: {0}")]
    Internal(String),

    /// Client unit id has no registered descriptor
    #[error("Unknown unit id: {0}")]
    UnknownUnit(i32),

    /// No short unit id below the converter's limit is left
    #[error("Unit id space exhausted: no short id above {0}")]
    UnitIdsExhausted(i32),

    /// Invalid storage configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand for an invariant violation
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Whether this error signals a programming error rather than bad data or I/O
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_display_internal() {
        let err = Error::internal("wrong direction");
        assert!(err.is_internal());
        assert!(err.to_string().contains("wrong direction"));
    }

    #[test]
    fn test_error_display_unit_ids_exhausted() {
        let err = Error::UnitIdsExhausted(0xFFFF);
        assert!(err.to_string().contains("65535"));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_error_display_unknown_unit() {
        let err = Error::UnknownUnit(42);
        assert!(err.to_string().contains("42"));
        assert!(!err.is_internal());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_bincode() {
        let invalid_data = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String> = bincode::deserialize(&invalid_data).map_err(|e| e.into());
        assert!(matches!(result, Err(Error::Serialization(_))));
    }
}
