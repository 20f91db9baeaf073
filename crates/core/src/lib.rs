//! Core types and traits for the unit repository
//!
//! This crate defines the foundational types used throughout the system:
//! - FileSystem, UnitDescriptor, LayerDescriptor: identity types
//! - Key, LayerKey: layer-independent and layer-local addressing
//! - Error: Error type hierarchy
//! - Traits: Layer, capabilities, factories, storage mask and converters

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod key;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use key::{Behavior, Key, KeyShape, LayerKey};
pub use traits::{
    FilePathConverter, FileSystemConverter, Layer, LayerConverters, LayerFactory,
    ReadLayerCapability, UnitIdConverter, UnitsConverter, WriteLayerCapability,
};
pub use types::{
    FileSystem, LayerDescriptor, UnitDescriptor, FIRST_FILE_SYSTEM_ID, FIRST_UNIT_ID,
    NOT_IN_LAYER,
};
