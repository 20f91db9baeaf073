//! Layered storage session
//!
//! A [`Storage`] stacks an ordered list of layers (topmost overlay first)
//! and presents them to the client as one repository addressed by client
//! unit ids. Each unit goes through Unknown -> Registered -> Open -> Closed:
//!
//! - `get_unit_id` registers a unit and resolves it in every layer
//! - `open_unit` builds the unit's file path dictionary
//! - `close_unit` persists the dictionary and notifies the layers
//!
//! # Example
//!
//! ```ignore
//! use unitrepo_storage::{Storage, StorageConfig, LayerFactoryRegistry, MemoryLayerFactory};
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
//! let file = storage.get_file_id(unit, "/src/a.c");
//! storage.shutdown()?;
//! ```

mod converters;
mod state;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};
use unitrepo_core::{
    Error, Key, Layer, LayerDescriptor, LayerKey, Result, UnitDescriptor, UnitsConverter,
    NOT_IN_LAYER,
};

use self::state::StorageCore;
use crate::codec::{RepositoryDataInput, RepositoryDataOutput};
use crate::config::StorageConfig;
use crate::diagnostics::conditions;
use crate::dictionary::{wrong_path, FilePathsDictionary};
use crate::mapper::RepositoryMapper;
use crate::mask::StorageMask;
use crate::registry::LayerFactoryRegistry;

/// Multi-layer repository storage
pub struct Storage {
    core: Arc<StorageCore>,
}

impl Storage {
    /// Open a session over layers created from `descriptors`
    ///
    /// Each descriptor is handed to the first registered factory that
    /// handles it. Descriptors nobody handles are skipped with a warning.
    /// Client unit ids are masked with `config.storage_id`.
    pub fn open(
        config: StorageConfig,
        descriptors: &[LayerDescriptor],
        factories: &LayerFactoryRegistry,
        mapper: RepositoryMapper,
    ) -> Result<Self> {
        config.validate()?;
        let mut layers = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match factories.create_layer(descriptor) {
                Some(layer) => layers.push(layer),
                None => warn!(layer = %descriptor, "No factory for layer, skipping"),
            }
        }
        let mask = Arc::new(StorageMask::new(config.storage_id));
        Self::with_layers(config, layers, mapper, mask)
    }

    /// Open a session over already created layers
    ///
    /// Every layer is started with the configured persistence version. A
    /// layer that fails to start contributes nothing to the session.
    pub fn with_layers(
        config: StorageConfig,
        layers: Vec<Arc<dyn Layer>>,
        mapper: RepositoryMapper,
        units_converter: Arc<dyn UnitsConverter>,
    ) -> Result<Self> {
        config.validate()?;
        let mut started = Vec::with_capacity(layers.len());
        for layer in layers {
            match layer.startup(config.persistence_version, config.force_reinit) {
                Ok(reset) => {
                    debug!(layer = %layer.descriptor(), reset, "Started layer");
                    started.push(layer);
                }
                Err(e) => {
                    error!(layer = %layer.descriptor(), error = %e, "Failed to start layer, skipping")
                }
            }
        }
        if !started.iter().any(|l| l.write_capability().is_some()) {
            debug!("Storage has no writable layer");
        }
        info!(
            storage_id = config.storage_id,
            layers = started.len(),
            persistence_version = config.persistence_version,
            "Opened storage"
        );
        Ok(Self {
            core: Arc::new(StorageCore::new(config, started, mapper, units_converter)),
        })
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &StorageConfig {
        &self.core.config
    }

    /// Number of active layers
    pub fn layer_count(&self) -> usize {
        self.core.slots.len()
    }

    /// Layer at `index`, topmost first
    pub fn layer(&self, index: usize) -> Option<Arc<dyn Layer>> {
        self.core.slots.get(index).map(|s| Arc::clone(&s.layer))
    }

    /// Unit id of a client unit inside one layer, if it exists there
    pub fn unit_id_in_layer(&self, client_unit_id: i32, index: usize) -> Option<i32> {
        let short = self.core.mask.client_to_layer(client_unit_id);
        self.core.slots.get(index)?.known_unit(short)
    }

    // ========================================================================
    // Units
    // ========================================================================

    /// Register a unit and return its client id
    ///
    /// Idempotent: a second call with an equal descriptor is answered from
    /// the translation tables and makes no layer registration calls.
    pub fn get_unit_id(&self, unit: &UnitDescriptor) -> Result<i32> {
        let short = self.core.register_unit(unit)?;
        Ok(self.core.mask.layer_to_client(short))
    }

    /// Descriptor of a registered client unit id
    pub fn get_unit_descriptor(&self, client_unit_id: i32) -> Option<UnitDescriptor> {
        let short = self.core.mask.client_to_layer(client_unit_id);
        self.core.client_units.get_unit_descriptor(short)
    }

    /// Name of a registered client unit id
    pub fn get_unit_name(&self, client_unit_id: i32) -> Option<Arc<str>> {
        self.get_unit_descriptor(client_unit_id)
            .map(|u| Arc::from(u.name()))
    }

    /// Build the unit's file path dictionary if it is not cached yet
    ///
    /// Returns `false` for a unit id that was never registered.
    pub fn open_unit(&self, client_unit_id: i32) -> bool {
        self.dictionary(client_unit_id).is_some()
    }

    /// Whether the unit's file path dictionary is cached
    pub fn is_unit_open(&self, client_unit_id: i32) -> bool {
        self.core
            .is_open(self.core.mask.client_to_layer(client_unit_id))
    }

    /// Persist the unit's file paths and notify every layer that has it
    ///
    /// `required_units` are client unit ids that must stay loaded. The
    /// cached dictionary survives the close, so a later `get_file_id` keeps
    /// returning the same indices.
    pub fn close_unit(
        &self,
        client_unit_id: i32,
        clean_repository: bool,
        required_units: &BTreeSet<i32>,
    ) -> Result<()> {
        let core = &self.core;
        let short = core.mask.client_to_layer(client_unit_id);
        let was_dirty = core.dirty_dictionaries.lock().remove(&short);
        if was_dirty {
            if let Some(dictionary) = core.cached_dictionary(short) {
                if let Err(e) = self.persist_dictionary(short, &dictionary) {
                    core.dirty_dictionaries.lock().insert(short);
                    return Err(e);
                }
            }
        }

        for slot in &core.slots {
            let Some(unit_id_in_layer) = slot.known_unit(short) else {
                continue;
            };
            let required: BTreeSet<i32> = required_units
                .iter()
                .filter_map(|id| slot.known_unit(core.mask.client_to_layer(*id)))
                .collect();
            slot.layer
                .close_unit(unit_id_in_layer, clean_repository, &required);
        }
        debug!(unit_id = client_unit_id, clean_repository, "Closed unit");
        Ok(())
    }

    /// Drop a unit from every writable layer, then flush
    pub fn remove_unit(&self, client_unit_id: i32) -> Result<()> {
        let core = &self.core;
        let short = core.mask.client_to_layer(client_unit_id);
        for slot in &core.slots {
            let (Some(write), Some(unit_id_in_layer)) =
                (slot.layer.write_capability(), slot.known_unit(short))
            else {
                continue;
            };
            write.remove_unit(unit_id_in_layer)?;
            slot.path_tables.remove(&short);
        }
        core.dirty_dictionaries.lock().remove(&short);
        info!(unit_id = client_unit_id, "Removed unit");
        self.flush()
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Open a decoder over the first layer holding `key`
    ///
    /// Layers are searched topmost first. A tombstone for the key in a layer
    /// ends the search: the key is removed and lower layers are shadowed.
    /// `None` means the key is not stored anywhere.
    pub fn get_input_stream(&self, key: &Key) -> Option<RepositoryDataInput> {
        let core = &self.core;
        let short = core.mask.client_to_layer(key.unit_id());
        self.dictionary(key.unit_id())?;

        for (index, slot) in core.slots.iter().enumerate() {
            let Some(unit_id_in_layer) = slot.known_unit(short) else {
                continue;
            };
            let layer_key = key.to_layer_key(unit_id_in_layer);
            if slot.layer.is_removed(&layer_key) {
                trace!(key = %key, layer = %slot.layer.descriptor(), "Key removed in layer");
                return None;
            }
            let Some(read) = slot.layer.read_capability() else {
                continue;
            };
            match read.read(&layer_key) {
                Ok(Some(bytes)) => {
                    return Some(RepositoryDataInput::for_layer(
                        bytes,
                        core.read_converters(index),
                        index,
                    ))
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, layer = %slot.layer.descriptor(), error = %e, "Layer read failed")
                }
            }
        }
        trace!(key = %key, "Key not found in any layer");
        None
    }

    /// Open an encoder targeting the write layer
    ///
    /// Fails with `Error::Internal` when there is no writable layer or the
    /// unit cannot be resolved in it.
    pub fn get_output_stream(&self, key: &Key) -> Result<RepositoryDataOutput> {
        let core = &self.core;
        let layer_key = self.write_layer_key(key)?;
        let Some(index) = core.write_slot() else {
            return Err(fatal(format!("no writable layer for {}", key)));
        };
        Ok(RepositoryDataOutput::for_layer(
            core.write_converters(index),
            index,
            layer_key,
        ))
    }

    /// Store an encoded object under the key it was opened for
    pub fn write(&self, output: RepositoryDataOutput) -> Result<()> {
        let (bytes, target) = output.into_parts();
        let Some((index, layer_key)) = target else {
            return Err(fatal("output stream has no target layer".to_string()));
        };
        let Some(write) = self
            .core
            .slots
            .get(index)
            .and_then(|s| s.layer.write_capability())
        else {
            return Err(fatal(format!("layer {} is not writable", index)));
        };
        write.write(&layer_key, bytes).map_err(|e| {
            error!(layer = index, error = %e, "Layer write failed");
            e
        })
    }

    /// Remove a key from the writable layers
    ///
    /// When a read-only layer still holds the key, every writable layer
    /// keeps a tombstone so the stale copy stays hidden. Otherwise the key
    /// is deleted outright and no tombstone is kept.
    pub fn remove(&self, key: &Key) -> Result<()> {
        let core = &self.core;
        let short = core.mask.client_to_layer(key.unit_id());
        let shadowed = core.slots.iter().filter(|s| !s.is_writable()).any(|slot| {
            match (slot.known_unit(short), slot.layer.read_capability()) {
                (Some(unit_id_in_layer), Some(read)) => {
                    read.knows_key(&key.to_layer_key(unit_id_in_layer))
                }
                _ => false,
            }
        });

        for slot in &core.slots {
            let (Some(write), Some(unit_id_in_layer)) =
                (slot.layer.write_capability(), slot.known_unit(short))
            else {
                continue;
            };
            write.remove(&key.to_layer_key(unit_id_in_layer), shadowed)?;
        }
        debug!(key = %key, tombstone = shadowed, "Removed key");
        Ok(())
    }

    // ========================================================================
    // File paths
    // ========================================================================

    /// Path of a file index, or the wrong-path sentinel
    pub fn get_file_name(&self, client_unit_id: i32, file_index: i32) -> Arc<str> {
        match self.dictionary(client_unit_id) {
            Some(dictionary) => dictionary.get_file_path(file_index),
            None => wrong_path(),
        }
    }

    /// Index of a file path, assigning the next index to a new path
    ///
    /// Returns [`NOT_IN_LAYER`] for a unit that was never registered.
    pub fn get_file_id(&self, client_unit_id: i32, path: &str) -> i32 {
        let short = self.core.mask.client_to_layer(client_unit_id);
        match self.dictionary(client_unit_id) {
            Some(dictionary) => self.core.file_id(short, &dictionary, path),
            None => NOT_IN_LAYER,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Persist every dictionary that grew since it was last written
    pub fn flush(&self) -> Result<()> {
        let core = &self.core;
        let _guard = core.storage_lock.lock();
        let mut dirty: Vec<i32> = core.dirty_dictionaries.lock().drain().collect();
        dirty.sort_unstable();

        let mut first_error = None;
        for short in dirty {
            let Some(dictionary) = core.cached_dictionary(short) else {
                continue;
            };
            if let Err(e) = self.persist_dictionary(short, &dictionary) {
                core.dirty_dictionaries.lock().insert(short);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Flush, close every open unit and shut every layer down
    ///
    /// Holds the storage lock throughout, so no unit opens while it runs;
    /// units that are not open by then stay closed for the rest of the
    /// session. All layers are shut down even if an earlier step failed; the
    /// first error is returned.
    pub fn shutdown(&self) -> Result<()> {
        let core = &self.core;
        let _guard = core.storage_lock.lock();
        core.mark_shut_down();
        let mut first_error = self.flush().err();

        let none = BTreeSet::new();
        for short in core.client_units.unit_ids() {
            if !core.is_open(short) {
                continue;
            }
            for slot in &core.slots {
                if let Some(unit_id_in_layer) = slot.known_unit(short) {
                    slot.layer.close_unit(unit_id_in_layer, false, &none);
                }
            }
        }
        for slot in &core.slots {
            if let Err(e) = slot.layer.shutdown() {
                error!(layer = %slot.layer.descriptor(), error = %e, "Layer shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        info!(storage_id = core.config.storage_id, "Storage shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run time-boxed maintenance over the writable layers
    ///
    /// Layers whose weight reached the defragmentation threshold get a turn,
    /// heaviest first, each with the budget that is left. Returns `true` when
    /// more maintenance is needed: a layer asked for more time or a layer
    /// over the threshold did not get a turn. Layer failures are logged and
    /// do not stop the other layers.
    pub fn maintain(&self, timeout: Duration) -> bool {
        let core = &self.core;
        let start = Instant::now();
        let threshold = core.config.defrag_threshold;

        let mut candidates: Vec<(i32, usize)> = core
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let weight = slot.layer.write_capability()?.maintenance_weight();
                (weight > 0 && weight >= threshold).then_some((weight, index))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut needs_more = false;
        for (weight, index) in candidates {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                needs_more = true;
                break;
            }
            let slot = &core.slots[index];
            let Some(write) = slot.layer.write_capability() else {
                continue;
            };
            match write.maintenance(timeout - elapsed) {
                Ok(more) => {
                    debug!(layer = %slot.layer.descriptor(), weight, more, "Maintained layer");
                    needs_more |= more;
                }
                Err(e) => {
                    warn!(layer = %slot.layer.descriptor(), error = %e, "Layer maintenance failed")
                }
            }
        }
        needs_more
    }

    /// Total maintenance weight of the writable layers
    pub fn get_maintenance_weight(&self) -> i32 {
        self.core
            .slots
            .iter()
            .filter_map(|s| s.layer.write_capability())
            .map(|w| w.maintenance_weight())
            .fold(0i32, i32::saturating_add)
    }

    /// Human-readable dump of dictionaries and translation tables
    pub fn dump_storage(&self) -> String {
        self.core.dump()
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn dictionary(&self, client_unit_id: i32) -> Option<Arc<FilePathsDictionary>> {
        let short = self.core.mask.client_to_layer(client_unit_id);
        let dictionary = self.core.ensure_open(short);
        if dictionary.is_none() && !self.core.is_shut_down() {
            self.core.report_corruption(
                conditions::UNKNOWN_CLIENT_UNIT,
                &format!("Unit id {} is not registered", client_unit_id),
            );
        }
        dictionary
    }

    fn write_layer_key(&self, key: &Key) -> Result<LayerKey> {
        let core = &self.core;
        let Some(index) = core.write_slot() else {
            return Err(fatal(format!("no writable layer for {}", key)));
        };
        if key.unit_id() < 0 {
            return Err(fatal(format!("key {} has no unit", key)));
        }
        let units = core.write_converters(index).units;
        match units.client_to_layer(key.unit_id()) {
            Ok(unit_id_in_layer) if unit_id_in_layer >= 0 => {
                Ok(key.to_layer_key(unit_id_in_layer))
            }
            Ok(_) => Err(fatal(format!("no write layer key for {}", key))),
            Err(e) => Err(fatal(format!("no write layer key for {}: {}", key, e))),
        }
    }

    /// Write a unit's file path table to the write layer; a no-op without one
    fn persist_dictionary(&self, short: i32, dictionary: &FilePathsDictionary) -> Result<()> {
        let core = &self.core;
        let Some(index) = core.write_slot() else {
            return Ok(());
        };
        let key = Key::file_paths_dictionary(core.mask.layer_to_client(short));
        let layer_key = self.write_layer_key(&key)?;
        let mut output = RepositoryDataOutput::detached();
        dictionary.write(&mut output)?;
        let Some(write) = core.slots[index].layer.write_capability() else {
            return Ok(());
        };
        write.write(&layer_key, output.into_bytes())?;
        trace!(unit_id = short, files = dictionary.size(), "Persisted file paths");
        Ok(())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("storage_id", &self.core.config.storage_id)
            .field("layers", &self.core.slots.len())
            .field("units", &self.core.client_units.len())
            .finish()
    }
}

/// Write-path invariant violation
fn fatal(message: String) -> Error {
    let err = Error::internal(message);
    error!(error = %err, "Storage write path failed");
    err
}
