//! Layer backends shipped with the storage crate
//!
//! - [`MemoryLayer`]: in-process layer, optionally persisted as an image
//! - [`MemoryLayerFactory`]: creates memory layers for `memory:` URIs

mod image;
mod memory;

pub use image::{ImageError, LayerImage, IMAGE_FORMAT_VERSION, IMAGE_MAGIC};
pub use memory::{MemoryLayer, MemoryLayerFactory, MAINTENANCE_BATCH, MEMORY_SCHEME};
