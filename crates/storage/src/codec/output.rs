//! Output stream bound to a write layer

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use unitrepo_core::{FileSystem, LayerConverters, LayerKey, Result};

use super::require_converters;

/// Byte buffer being written for one key of one layer
///
/// Obtained from `Storage::get_output_stream` and handed back to
/// `Storage::write` once filled.
pub struct RepositoryDataOutput {
    buf: Vec<u8>,
    converters: Option<LayerConverters>,
    target: Option<(usize, LayerKey)>,
}

impl RepositoryDataOutput {
    /// Output not bound to any layer; converter-aware writes fail
    pub fn detached() -> Self {
        Self {
            buf: Vec::new(),
            converters: None,
            target: None,
        }
    }

    /// Output destined for `key` in layer `layer_index`
    pub fn for_layer(converters: LayerConverters, layer_index: usize, key: LayerKey) -> Self {
        Self {
            buf: Vec::new(),
            converters: Some(converters),
            target: Some((layer_index, key)),
        }
    }

    /// Destination layer index and key, if bound
    pub fn target(&self) -> Option<(usize, &LayerKey)> {
        self.target.as_ref().map(|(i, k)| (*i, k))
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Written bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the stream, returning its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn into_parts(self) -> (Vec<u8>, Option<(usize, LayerKey)>) {
        (self.buf, self.target)
    }

    /// Write a byte
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buf.write_u8(value)?;
        Ok(())
    }

    /// Write a boolean as one byte
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(value as u8)
    }

    /// Write a signed 32-bit integer
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.buf.write_i32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write an unsigned 32-bit integer
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buf.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_utf(&mut self, value: &str) -> Result<()> {
        self.write_u32(value.len() as u32)?;
        self.buf.write_all(value.as_bytes())?;
        Ok(())
    }

    /// Write an indexed list of strings
    pub fn write_str_list<S: AsRef<str>>(&mut self, items: &[S]) -> Result<()> {
        self.write_u32(items.len() as u32)?;
        for item in items {
            self.write_utf(item.as_ref())?;
        }
        Ok(())
    }

    /// Write a client unit id in the layer's numbering
    pub fn write_unit_id(&mut self, client_unit_id: i32) -> Result<()> {
        let id = require_converters(&self.converters)?
            .units
            .client_to_layer(client_unit_id)?;
        self.write_i32(id)
    }

    /// Write a file system as the layer's file system index
    pub fn write_file_system(&mut self, file_system: &FileSystem) -> Result<()> {
        let index = require_converters(&self.converters)?
            .file_systems
            .client_to_layer(file_system)?;
        self.write_i32(index)
    }

    /// Write a client file index of `client_unit_id` in the layer's numbering
    pub fn write_file_path_index(&mut self, client_unit_id: i32, file_index: i32) -> Result<()> {
        let index = require_converters(&self.converters)?
            .file_paths
            .client_to_layer(client_unit_id, file_index)?;
        self.write_i32(index)
    }
}

impl std::fmt::Debug for RepositoryDataOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryDataOutput")
            .field("len", &self.buf.len())
            .field("target", &self.target)
            .finish()
    }
}
