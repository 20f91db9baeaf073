//! Core types for the unit repository
//!
//! This module defines the foundational identity types:
//! - FileSystem: Opaque handle naming a file system endpoint
//! - UnitDescriptor: Client-visible identity of a compilation unit
//! - LayerDescriptor: Names one storage backend participating in a session
//! - Unit id constants shared by dictionaries and translation tables

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Marker stored in a translation table for "known not to exist in this layer"
pub const NOT_IN_LAYER: i32 = -1;

/// First id handed out by the unit descriptors dictionary
pub const FIRST_UNIT_ID: i32 = 7;

/// First id handed out by the file systems dictionary
pub const FIRST_FILE_SYSTEM_ID: i32 = 0;

/// Handle naming a file system endpoint
///
/// A FileSystem is compared by value. Two handles with the same URI are the
/// same file system; matching of *equivalent* but differently named
/// endpoints is the job of the repository mapper, not of this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileSystem(Arc<str>);

impl FileSystem {
    /// Create a handle from its URI
    pub fn new(uri: impl AsRef<str>) -> Self {
        Self(Arc::from(uri.as_ref()))
    }

    /// Handle for the local file system
    pub fn local() -> Self {
        Self::new("file://")
    }

    /// URI of this file system
    pub fn uri(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a compilation unit as the client sees it
///
/// A unit is a (name, file system) pair. Descriptors are immutable and
/// compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitDescriptor {
    name: Arc<str>,
    file_system: FileSystem,
}

impl UnitDescriptor {
    /// Create a new descriptor
    pub fn new(name: impl AsRef<str>, file_system: FileSystem) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
            file_system,
        }
    }

    /// Unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File system the unit lives on
    pub fn file_system(&self) -> &FileSystem {
        &self.file_system
    }

    /// Same unit name on another file system
    pub fn with_file_system(&self, file_system: FileSystem) -> Self {
        Self {
            name: Arc::clone(&self.name),
            file_system,
        }
    }
}

impl fmt::Display for UnitDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.file_system)
    }
}

/// Describes one storage layer to be created for a session
///
/// The URI scheme selects the factory; `writable` asks the factory for a
/// layer with a write capability.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerDescriptor {
    uri: String,
    writable: bool,
}

impl LayerDescriptor {
    /// Descriptor for a layer that accepts writes
    pub fn writable(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            writable: true,
        }
    }

    /// Descriptor for a read-only layer
    pub fn read_only(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            writable: false,
        }
    }

    /// Layer URI
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Scheme part of the URI (text before the first `:`)
    pub fn scheme(&self) -> &str {
        self.uri.split(':').next().unwrap_or("")
    }

    /// Whether the layer should accept writes
    pub fn is_writable(&self) -> bool {
        self.writable
    }
}

impl fmt::Display for LayerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}
