//! Storage configuration
//!
//! Configuration for a storage session: the storage id fed to the mask,
//! the persistence version layers are started with, and the maintenance
//! threshold.

use crate::mask::MAX_STORAGE_ID;

/// Default weight at which a writable layer is worth defragmenting
pub const DEFAULT_DEFRAG_THRESHOLD: i32 = 50;

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Session id encoded into long client unit ids
    pub storage_id: u16,
    /// Version layers are started with; layers written with another version are reset
    pub persistence_version: i32,
    /// Discard existing layer content on startup
    pub force_reinit: bool,
    /// Minimum maintenance weight that makes `maintain` run a layer
    pub defrag_threshold: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            storage_id: 0,
            persistence_version: 1,
            force_reinit: false,
            defrag_threshold: DEFAULT_DEFRAG_THRESHOLD,
        }
    }
}

impl StorageConfig {
    /// Create config for testing
    ///
    /// Uses a low defragmentation threshold so maintenance is easy to trigger.
    pub fn for_testing() -> Self {
        StorageConfig {
            defrag_threshold: 1,
            ..Default::default()
        }
    }

    /// Set storage id
    pub fn with_storage_id(mut self, storage_id: u16) -> Self {
        self.storage_id = storage_id;
        self
    }

    /// Set persistence version
    pub fn with_persistence_version(mut self, version: i32) -> Self {
        self.persistence_version = version;
        self
    }

    /// Discard existing layer content on startup
    pub fn with_force_reinit(mut self, force_reinit: bool) -> Self {
        self.force_reinit = force_reinit;
        self
    }

    /// Set defragmentation threshold
    pub fn with_defrag_threshold(mut self, threshold: i32) -> Self {
        self.defrag_threshold = threshold;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_id > MAX_STORAGE_ID {
            return Err(ConfigError::StorageIdOutOfRange(self.storage_id));
        }
        if self.defrag_threshold < 0 {
            return Err(ConfigError::NegativeThreshold(self.defrag_threshold));
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Storage id does not fit the mask
    #[error("Storage id {0} exceeds maximum {max}", max = MAX_STORAGE_ID)]
    StorageIdOutOfRange(u16),

    /// Negative defragmentation threshold
    #[error("Defragmentation threshold must not be negative: {0}")]
    NegativeThreshold(i32),
}

impl From<ConfigError> for unitrepo_core::Error {
    fn from(e: ConfigError) -> Self {
        unitrepo_core::Error::Config(e.to_string())
    }
}
