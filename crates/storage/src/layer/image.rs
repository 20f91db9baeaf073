//! Memory layer image format
//!
//! An image is a complete copy of a memory layer's tables and records.
//!
//! # Format
//!
//! ```text
//! +--------------------+
//! | Magic: "URLI"      | 4 bytes
//! | Format Version     | 4 bytes (u32 LE)
//! | Body Length        | 4 bytes (u32 LE)
//! | Body               | variable (bincode LayerImage)
//! | CRC32              | 4 bytes
//! +--------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use unitrepo_core::{FileSystem, LayerKey, UnitDescriptor};

/// Image magic bytes: "URLI"
pub const IMAGE_MAGIC: [u8; 4] = *b"URLI";

/// Current image format version
pub const IMAGE_FORMAT_VERSION: u32 = 1;

const HEADER_SIZE: usize = 12;
const CRC_SIZE: usize = 4;

/// Persisted content of a memory layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerImage {
    /// Persistence version the content was written with (0 = never started)
    pub persistence_version: i32,
    /// Units table; a unit's layer id is its index
    pub units: Vec<UnitDescriptor>,
    /// File systems table; a file system's layer index is its index
    pub file_systems: Vec<FileSystem>,
    /// Stored records
    pub records: BTreeMap<LayerKey, Vec<u8>>,
    /// Tombstones
    pub removed: BTreeSet<LayerKey>,
}

impl LayerImage {
    /// Serialize image to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ImageError> {
        let body = bincode::serialize(self).map_err(|e| ImageError::Encoding(e.to_string()))?;

        let mut bytes = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
        bytes.extend_from_slice(&IMAGE_MAGIC);
        bytes.extend_from_slice(&IMAGE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        // CRC32 of all preceding bytes
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        Ok(bytes)
    }

    /// Deserialize image from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_SIZE + CRC_SIZE {
            return Err(ImageError::TooShort);
        }
        if bytes[0..4] != IMAGE_MAGIC {
            return Err(ImageError::InvalidMagic);
        }

        let (data, crc_bytes) = bytes.split_at(bytes.len() - CRC_SIZE);
        let stored_crc = u32::from_le_bytes(read4(crc_bytes));
        let computed_crc = crc32fast::hash(data);
        if stored_crc != computed_crc {
            return Err(ImageError::ChecksumMismatch {
                expected: stored_crc,
                computed: computed_crc,
            });
        }

        let version = u32::from_le_bytes(read4(&data[4..8]));
        if version != IMAGE_FORMAT_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }

        let body_len = u32::from_le_bytes(read4(&data[8..12])) as usize;
        if HEADER_SIZE + body_len != data.len() {
            return Err(ImageError::TooShort);
        }

        bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| ImageError::Encoding(e.to_string()))
    }

    /// Load an image file
    pub fn load(path: &Path) -> Result<Self, ImageError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    /// Persist the image atomically (write-fsync-rename)
    pub fn persist(&self, path: &Path) -> Result<(), ImageError> {
        let temp_path = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&self.to_bytes()?)?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&temp_path, path)?;

        if let Some(parent) = path.parent() {
            if parent.exists() {
                let dir = File::open(parent)?;
                dir.sync_all()?;
            }
        }
        Ok(())
    }
}

fn read4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&bytes[..4]);
    out
}

/// Image errors
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image shorter than its header claims
    #[error("Image too short")]
    TooShort,

    /// Wrong magic bytes
    #[error("Invalid image magic")]
    InvalidMagic,

    /// Format version this build cannot read
    #[error("Unsupported image format version: {0}")]
    UnsupportedVersion(u32),

    /// CRC mismatch
    #[error("Image checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Stored CRC
        expected: u32,
        /// Computed CRC
        computed: u32,
    },

    /// Body could not be (de)serialized
    #[error("Image encoding error: {0}")]
    Encoding(String),
}

impl From<ImageError> for unitrepo_core::Error {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::Io(io) => unitrepo_core::Error::Io(io),
            other => unitrepo_core::Error::Corruption(other.to_string()),
        }
    }
}
