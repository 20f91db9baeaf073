//! Core traits for layer and converter abstraction
//!
//! This module defines the seams the storage orchestrator is written against:
//! - Layer: one pluggable storage backend with optional read/write capabilities
//! - LayerFactory: creates layers from descriptors
//! - UnitsConverter: the storage mask between short and long client unit ids
//! - Converters used by the codec to translate embedded references
//!
//! Thread safety: every trait here requires `Send + Sync`; layers are shared
//! by all callers of a storage session.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::key::LayerKey;
use crate::types::{FileSystem, LayerDescriptor, UnitDescriptor};

/// One storage backend participating in a session
///
/// Unit ids and file system indices passed to a layer are always in the
/// layer's own numbering. A layer with no write capability is read-only.
pub trait Layer: Send + Sync {
    /// Descriptor this layer was created from
    fn descriptor(&self) -> &LayerDescriptor;

    /// Start the layer
    ///
    /// Returns `true` if the layer's content was discarded because it was
    /// written with another persistence version or `force_reinit` was set.
    fn startup(&self, persistence_version: i32, force_reinit: bool) -> Result<bool>;

    /// Stop the layer, persisting whatever it needs to
    fn shutdown(&self) -> Result<()>;

    /// Notify the layer that a unit is being opened
    fn open_unit(&self, unit_id_in_layer: i32);

    /// Notify the layer that a unit is being closed
    ///
    /// `required_units_in_layer` lists units that must stay loaded.
    fn close_unit(
        &self,
        unit_id_in_layer: i32,
        clean_repository: bool,
        required_units_in_layer: &BTreeSet<i32>,
    );

    /// Units known to the layer; a unit's layer id is its index
    fn units_table(&self) -> Vec<UnitDescriptor>;

    /// File systems known to the layer; a file system's layer index is its index
    fn file_systems_table(&self) -> Vec<FileSystem>;

    /// Unit with layer id `unit_id_in_layer`
    fn unit_at(&self, unit_id_in_layer: i32) -> Option<UnitDescriptor> {
        usize::try_from(unit_id_in_layer)
            .ok()
            .and_then(|i| self.units_table().get(i).cloned())
    }

    /// File system at layer index `file_system_index`
    fn file_system_at(&self, file_system_index: i32) -> Option<FileSystem> {
        usize::try_from(file_system_index)
            .ok()
            .and_then(|i| self.file_systems_table().get(i).cloned())
    }

    /// Layer id of a unit equal to `unit`, if any
    ///
    /// Layers with large units tables should answer from an index.
    fn find_unit_id(&self, unit: &UnitDescriptor) -> Option<i32> {
        self.units_table()
            .iter()
            .position(|u| u == unit)
            .map(|i| i as i32)
    }

    /// Index of a file system equal to `file_system` in this layer, if any
    fn find_matched_file_system_index(&self, file_system: &FileSystem) -> Option<i32>;

    /// Keys recorded as removed in this layer
    fn removed_table_key_set(&self) -> HashSet<LayerKey>;

    /// Whether `key` is recorded as removed in this layer
    fn is_removed(&self, key: &LayerKey) -> bool {
        self.removed_table_key_set().contains(key)
    }

    /// Read access, if the layer supports it
    fn read_capability(&self) -> Option<&dyn ReadLayerCapability>;

    /// Write access, absent for read-only layers
    fn write_capability(&self) -> Option<&dyn WriteLayerCapability>;
}

/// Read access to a layer
pub trait ReadLayerCapability: Send + Sync {
    /// Raw bytes stored under `key`, `None` if the layer does not have it
    fn read(&self, key: &LayerKey) -> Result<Option<Vec<u8>>>;

    /// Whether the layer has data for `key`
    fn knows_key(&self, key: &LayerKey) -> bool;
}

/// Write access to a layer
pub trait WriteLayerCapability: Send + Sync {
    /// Add a file system to the layer's table, returning its index
    fn register_client_file_system(&self, file_system: &FileSystem) -> Result<i32>;

    /// Add a unit to the layer's table, returning its layer id
    fn register_new_unit(&self, unit: &UnitDescriptor) -> Result<i32>;

    /// Drop every key belonging to a unit
    fn remove_unit(&self, unit_id_in_layer: i32) -> Result<()>;

    /// Store raw bytes under `key`, clearing any tombstone for it
    fn write(&self, key: &LayerKey, data: Vec<u8>) -> Result<()>;

    /// Delete `key`; with `keep_tombstone` the key is also recorded as removed
    fn remove(&self, key: &LayerKey, keep_tombstone: bool) -> Result<()>;

    /// How much a maintenance pass would gain
    fn maintenance_weight(&self) -> i32;

    /// Run maintenance for at most `timeout`
    ///
    /// Returns `true` if more maintenance is needed.
    fn maintenance(&self, timeout: Duration) -> Result<bool>;
}

/// Creates layers from descriptors
pub trait LayerFactory: Send + Sync {
    /// Whether this factory understands the descriptor
    fn can_handle(&self, descriptor: &LayerDescriptor) -> bool;

    /// Create (but do not start) a layer
    fn create_layer(&self, descriptor: &LayerDescriptor) -> Option<Arc<dyn Layer>>;
}

/// Storage mask between short and long client unit ids
///
/// Long ids are what external callers hold; the mask makes ids of distinct
/// storage sessions disjoint.
pub trait UnitsConverter: Send + Sync {
    /// Long client id to short client id
    fn client_to_layer(&self, client_unit_id: i32) -> i32;

    /// Short client id to long client id
    fn layer_to_client(&self, short_unit_id: i32) -> i32;

    /// Largest short id `layer_to_client` can encode without loss
    fn max_short_unit_id(&self) -> i32 {
        i32::MAX
    }
}

/// Translates unit ids embedded in persisted data
pub trait UnitIdConverter: Send + Sync {
    /// Client (long) unit id to layer unit id
    fn client_to_layer(&self, client_unit_id: i32) -> Result<i32>;

    /// Layer unit id to client (long) unit id
    fn layer_to_client(&self, unit_id_in_layer: i32) -> Result<i32>;
}

/// Translates file systems embedded in persisted data
pub trait FileSystemConverter: Send + Sync {
    /// Client file system to the layer's file system index
    fn client_to_layer(&self, file_system: &FileSystem) -> Result<i32>;

    /// Layer file system index to the client file system
    fn layer_to_client(&self, file_system_index: i32) -> Result<FileSystem>;
}

/// Translates file indices embedded in persisted data
pub trait FilePathConverter: Send + Sync {
    /// Client file index of `client_unit_id` to the layer's index
    fn client_to_layer(&self, client_unit_id: i32, file_index: i32) -> Result<i32>;

    /// Layer file index of `client_unit_id` to the client's index
    fn layer_to_client(&self, client_unit_id: i32, file_index: i32) -> Result<i32>;
}

/// The three converters a codec stream is bound to
#[derive(Clone)]
pub struct LayerConverters {
    /// Unit id converter
    pub units: Arc<dyn UnitIdConverter>,
    /// File system converter
    pub file_systems: Arc<dyn FileSystemConverter>,
    /// File path converter
    pub file_paths: Arc<dyn FilePathConverter>,
}

impl LayerConverters {
    /// Bundle three converters
    pub fn new(
        units: Arc<dyn UnitIdConverter>,
        file_systems: Arc<dyn FileSystemConverter>,
        file_paths: Arc<dyn FilePathConverter>,
    ) -> Self {
        Self {
            units,
            file_systems,
            file_paths,
        }
    }
}

impl std::fmt::Debug for LayerConverters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerConverters").finish_non_exhaustive()
    }
}
