//! Layered repository storage
//!
//! This crate implements the multi-layer ID translation store with:
//! - Storage: session over an ordered stack of layers
//! - UnitDescriptorsDictionary / FileSystemsDictionary: client id dictionaries
//! - FilePathsDictionary: per-unit file path table
//! - RepositoryMapper: pluggable unit matching and path mapping
//! - RepositoryDataOutput / RepositoryDataInput: converter-aware codec
//! - MemoryLayer: in-process layer with image persistence
//!
//! # Id spaces
//!
//! The client sees masked unit ids (`storage_id << 16 | short id`). Every
//! layer numbers units and file systems on its own; `Storage` keeps the
//! translation tables between the two and hands converters to the codec so
//! persisted objects stay layer-agnostic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod dictionary;
pub mod layer;
pub mod mapper;
pub mod mask;
pub mod registry;
pub mod storage;

pub use codec::{RepositoryDataInput, RepositoryDataOutput};
pub use config::{ConfigError, StorageConfig, DEFAULT_DEFRAG_THRESHOLD};
pub use diagnostics::DiagnosticLatch;
pub use dictionary::{
    is_wrong_path, wrong_path, FilePathsDictionary, FileSystemsDictionary,
    UnitDescriptorsDictionary,
};
pub use layer::{MemoryLayer, MemoryLayerFactory};
pub use mapper::{FilePathMapper, RepositoryMapper, UnitDescriptorMatcher};
pub use mask::{StorageMask, MAX_SHORT_UNIT_ID, MAX_STORAGE_ID};
pub use registry::LayerFactoryRegistry;
pub use storage::Storage;
