//! Input stream bound to the layer the bytes were read from

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use unitrepo_core::{Error, FileSystem, LayerConverters, Result};

use super::{require_converters, MAX_STRING_BYTES};

/// Bytes of one key as read from one layer
pub struct RepositoryDataInput {
    cursor: Cursor<Vec<u8>>,
    converters: Option<LayerConverters>,
    layer_index: Option<usize>,
}

impl RepositoryDataInput {
    /// Input not bound to any layer; converter-aware reads fail
    pub fn detached(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            converters: None,
            layer_index: None,
        }
    }

    /// Input over bytes read from layer `layer_index`
    pub fn for_layer(bytes: Vec<u8>, converters: LayerConverters, layer_index: usize) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            converters: Some(converters),
            layer_index: Some(layer_index),
        }
    }

    /// Index of the layer that supplied the bytes
    pub fn layer_index(&self) -> Option<usize> {
        self.layer_index
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }

    /// Read a byte
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.cursor.read_u8()?)
    }

    /// Read a boolean
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Corruption(format!("invalid boolean byte {}", other))),
        }
    }

    /// Read a signed 32-bit integer
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.cursor.read_i32::<LittleEndian>()?)
    }

    /// Read an unsigned 32-bit integer
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    /// Read a length-prefixed UTF-8 string
    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_BYTES || len > self.remaining() {
            return Err(Error::Corruption(format!(
                "string length {} exceeds {} remaining bytes",
                len,
                self.remaining()
            )));
        }
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| Error::Corruption(e.to_string()))
    }

    /// Read an indexed list of strings
    pub fn read_str_list(&mut self) -> Result<Vec<String>> {
        let count = self.read_u32()? as usize;
        // each entry takes at least its 4-byte length
        if count > self.remaining() / 4 {
            return Err(Error::Corruption(format!(
                "list of {} entries exceeds {} remaining bytes",
                count,
                self.remaining()
            )));
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.read_utf()?);
        }
        Ok(items)
    }

    /// Read a unit id, translated into the client's numbering
    pub fn read_unit_id(&mut self) -> Result<i32> {
        let id = self.read_i32()?;
        require_converters(&self.converters)?
            .units
            .layer_to_client(id)
    }

    /// Read a file system
    pub fn read_file_system(&mut self) -> Result<FileSystem> {
        let index = self.read_i32()?;
        require_converters(&self.converters)?
            .file_systems
            .layer_to_client(index)
    }

    /// Read a file index of `client_unit_id`, translated into the client's numbering
    pub fn read_file_path_index(&mut self, client_unit_id: i32) -> Result<i32> {
        let index = self.read_i32()?;
        require_converters(&self.converters)?
            .file_paths
            .layer_to_client(client_unit_id, index)
    }
}

impl std::fmt::Debug for RepositoryDataInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryDataInput")
            .field("remaining", &self.remaining())
            .field("layer_index", &self.layer_index)
            .finish()
    }
}
