//! unitrepo - layered repository storage
//!
//! A repository session stacks storage layers (for example a read-only base
//! image under a writable overlay) and presents them to the client as one
//! store addressed by client unit ids. Each layer keeps its own unit and file
//! system numbering; the session translates between the two.
//!
//! # Quick Start
//!
//! ```ignore
//! use unitrepo::{LayerFactoryRegistry, MemoryLayerFactory, RepositoryMapper, Storage, StorageConfig};
//! use unitrepo::{FileSystem, LayerDescriptor, UnitDescriptor};
//!
//! let registry = LayerFactoryRegistry::new().with_factory(Arc::new(MemoryLayerFactory::new()));
//! let storage = Storage::open(
//!     StorageConfig::default(),
//!     &[LayerDescriptor::writable("memory:cache")],
//!     &registry,
//!     RepositoryMapper::new(),
//! )?;
//!
//! let unit = storage.get_unit_id(&UnitDescriptor::new("proj", FileSystem::local()))?;
//! assert_eq!(storage.get_file_id(unit, "a.c"), 0);
//! ```

pub use unitrepo_core::{
    Behavior, Error, FileSystem, Key, KeyShape, Layer, LayerDescriptor, LayerFactory, LayerKey,
    ReadLayerCapability, Result, UnitDescriptor, UnitsConverter, WriteLayerCapability,
    NOT_IN_LAYER,
};
pub use unitrepo_storage::*;
