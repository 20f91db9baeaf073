//! Shared state of a storage session
//!
//! `StorageCore` owns the client dictionaries, the layers and, per layer,
//! four translation tables:
//!
//! - short client unit id -> unit id in layer
//! - unit id in layer -> short client unit id
//! - client file system id -> file system index in layer
//! - file system index in layer -> client file system id
//!
//! Tables are monotonic caches. A non-negative entry is authoritative;
//! [`NOT_IN_LAYER`] means "absent when last asked". A read-only layer cannot
//! gain units, so its misses stay cached; misses in a writable layer are
//! re-derived on the next lookup. Check-then-create races resolve
//! put-if-absent style: the first non-negative value recorded wins.
//!
//! No lock is held while calling into a layer, except during unit opening,
//! so registration can be entered again from inside a decode in progress.
//! Unit opening takes the storage lock before the file path dictionary
//! monitor; `shutdown` holds the storage lock throughout, so a unit is
//! either opened before shutdown closes it or not opened at all.

use dashmap::DashMap;
use parking_lot::{Mutex, ReentrantMutex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use unitrepo_core::{
    Error, FileSystem, Layer, LayerConverters, LayerKey, Result, UnitDescriptor, UnitsConverter,
    NOT_IN_LAYER,
};

use super::converters::{
    FilePathReadConverter, FilePathWriteConverter, FileSystemReadConverter,
    FileSystemWriteConverter, UnitIdReadConverter, UnitIdWriteConverter,
};
use crate::codec::RepositoryDataInput;
use crate::config::StorageConfig;
use crate::diagnostics::DiagnosticLatch;
use crate::dictionary::{FilePathsDictionary, FileSystemsDictionary, UnitDescriptorsDictionary};
use crate::mapper::RepositoryMapper;

/// One layer and its translation tables
pub(crate) struct LayerSlot {
    pub(crate) layer: Arc<dyn Layer>,
    unit_to_layer: DashMap<i32, i32>,
    layer_to_unit: DashMap<i32, i32>,
    fs_to_layer: DashMap<i32, i32>,
    layer_to_fs: DashMap<i32, i32>,
    /// This layer's own file path tables (already mapped), keyed by short unit id
    pub(crate) path_tables: DashMap<i32, Arc<Vec<String>>>,
}

impl LayerSlot {
    fn new(layer: Arc<dyn Layer>) -> Self {
        Self {
            layer,
            unit_to_layer: DashMap::new(),
            layer_to_unit: DashMap::new(),
            fs_to_layer: DashMap::new(),
            layer_to_fs: DashMap::new(),
            path_tables: DashMap::new(),
        }
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.layer.write_capability().is_some()
    }

    /// Unit id in this layer, if the unit is known to exist here
    pub(crate) fn known_unit(&self, short_unit_id: i32) -> Option<i32> {
        self.unit_to_layer
            .get(&short_unit_id)
            .map(|v| *v)
            .filter(|v| *v >= 0)
    }

    /// Short client unit id of a layer unit id
    pub(crate) fn client_unit(&self, unit_id_in_layer: i32) -> Option<i32> {
        self.layer_to_unit.get(&unit_id_in_layer).map(|v| *v)
    }

    /// File system index in this layer, if known to exist here
    pub(crate) fn known_file_system(&self, client_fs_id: i32) -> Option<i32> {
        self.fs_to_layer
            .get(&client_fs_id)
            .map(|v| *v)
            .filter(|v| *v >= 0)
    }

    /// Settled unit id in this layer: a known id, or a cached miss in a
    /// layer that cannot register units
    fn settled_unit(&self, short_unit_id: i32) -> Option<i32> {
        let bound = *self.unit_to_layer.get(&short_unit_id)?;
        (bound >= 0 || !self.is_writable()).then_some(bound)
    }

    /// Client file system id of a layer file system index
    pub(crate) fn client_file_system(&self, file_system_index: i32) -> Option<i32> {
        self.layer_to_fs.get(&file_system_index).map(|v| *v)
    }

    /// Record `short -> id`, returning the value that ends up in the table
    pub(crate) fn bind_unit(&self, short_unit_id: i32, unit_id_in_layer: i32) -> i32 {
        let bound = {
            let mut entry = self
                .unit_to_layer
                .entry(short_unit_id)
                .or_insert(unit_id_in_layer);
            if *entry < 0 && unit_id_in_layer >= 0 {
                *entry = unit_id_in_layer;
            }
            *entry
        };
        if bound >= 0 {
            self.layer_to_unit.entry(bound).or_insert(short_unit_id);
        }
        bound
    }

    /// Record `client fs -> index`, returning the value that ends up in the table
    pub(crate) fn bind_file_system(&self, client_fs_id: i32, file_system_index: i32) -> i32 {
        let bound = {
            let mut entry = self
                .fs_to_layer
                .entry(client_fs_id)
                .or_insert(file_system_index);
            if *entry < 0 && file_system_index >= 0 {
                *entry = file_system_index;
            }
            *entry
        };
        if bound >= 0 {
            self.layer_to_fs.entry(bound).or_insert(client_fs_id);
        }
        bound
    }

    fn sorted_units(&self) -> Vec<(i32, i32)> {
        let mut v: Vec<(i32, i32)> = self
            .unit_to_layer
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        v.sort_unstable();
        v
    }

    fn sorted_file_systems(&self) -> Vec<(i32, i32)> {
        let mut v: Vec<(i32, i32)> = self
            .fs_to_layer
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        v.sort_unstable();
        v
    }
}

/// State shared by a `Storage` and the streams it hands out
pub(crate) struct StorageCore {
    pub(crate) config: StorageConfig,
    pub(crate) mask: Arc<dyn UnitsConverter>,
    pub(crate) mapper: RepositoryMapper,
    pub(crate) slots: Vec<LayerSlot>,
    pub(crate) client_units: UnitDescriptorsDictionary,
    pub(crate) client_file_systems: FileSystemsDictionary,
    file_path_dictionaries: Mutex<FxHashMap<i32, Arc<FilePathsDictionary>>>,
    /// Layer whose file path table seeded a unit's dictionary
    pub(crate) path_sources: DashMap<i32, usize>,
    pub(crate) dirty_dictionaries: Mutex<FxHashSet<i32>>,
    pub(crate) storage_lock: ReentrantMutex<()>,
    /// Set by `shutdown`; no unit opens afterwards
    shut_down: AtomicBool,
    pub(crate) diagnostics: DiagnosticLatch,
}

impl StorageCore {
    pub(crate) fn new(
        config: StorageConfig,
        layers: Vec<Arc<dyn Layer>>,
        mapper: RepositoryMapper,
        mask: Arc<dyn UnitsConverter>,
    ) -> Self {
        Self {
            config,
            mask,
            mapper,
            slots: layers.into_iter().map(LayerSlot::new).collect(),
            client_units: UnitDescriptorsDictionary::new(),
            client_file_systems: FileSystemsDictionary::new(),
            file_path_dictionaries: Mutex::new(FxHashMap::default()),
            path_sources: DashMap::new(),
            dirty_dictionaries: Mutex::new(FxHashSet::default()),
            storage_lock: ReentrantMutex::new(()),
            shut_down: AtomicBool::new(false),
            diagnostics: DiagnosticLatch::new(),
        }
    }

    /// Register a client unit and resolve it in every layer; returns the short id
    pub(crate) fn register_unit(&self, unit: &UnitDescriptor) -> Result<i32> {
        let short = self.assign_short_id(unit)?;
        let client_fs_id = self
            .client_file_systems
            .get_file_system_id(unit.file_system());
        for index in 0..self.slots.len() {
            let fs_index = self.resolve_file_system(index, client_fs_id, unit.file_system())?;
            self.resolve_unit(index, short, unit, fs_index)?;
        }
        Ok(short)
    }

    /// Short client id of a unit, refusing ids the units converter cannot encode
    pub(crate) fn assign_short_id(&self, unit: &UnitDescriptor) -> Result<i32> {
        let limit = self.mask.max_short_unit_id();
        self.client_units
            .get_unit_id_within(unit, limit)
            .ok_or_else(|| {
                warn!(unit = %unit, limit, "No client unit id left");
                Error::UnitIdsExhausted(limit)
            })
    }

    /// File system index of a client file system in one layer, registering it
    /// with the layer's write capability when the layer does not have it
    pub(crate) fn resolve_file_system(
        &self,
        index: usize,
        client_fs_id: i32,
        file_system: &FileSystem,
    ) -> Result<i32> {
        let slot = &self.slots[index];
        if let Some(fs_index) = slot.known_file_system(client_fs_id) {
            return Ok(fs_index);
        }
        let fs_index = match slot.layer.find_matched_file_system_index(file_system) {
            Some(fs_index) => fs_index,
            None => match slot.layer.write_capability() {
                Some(write) => write.register_client_file_system(file_system)?,
                None => NOT_IN_LAYER,
            },
        };
        Ok(slot.bind_file_system(client_fs_id, fs_index))
    }

    /// Unit id of a client unit in one layer, registering it with the
    /// layer's write capability when the layer does not have it
    fn resolve_unit(
        &self,
        index: usize,
        short_unit_id: i32,
        unit: &UnitDescriptor,
        fs_index: i32,
    ) -> Result<i32> {
        let slot = &self.slots[index];
        if let Some(unit_id) = slot.settled_unit(short_unit_id) {
            return Ok(unit_id);
        }
        let layer_unit = match slot.layer.file_system_at(fs_index) {
            Some(fs) => self.mapper.map_to_layer(&fs, unit),
            None => unit.clone(),
        };
        let found = slot.layer.find_unit_id(&layer_unit).or_else(|| {
            if !self.mapper.has_matchers() {
                return None;
            }
            slot.layer
                .units_table()
                .iter()
                .position(|u| self.mapper.matches(u, &layer_unit))
                .map(|p| p as i32)
        });
        let unit_id = match (found, slot.layer.write_capability()) {
            (Some(unit_id), _) => unit_id,
            (None, Some(write)) => write.register_new_unit(&layer_unit)?,
            (None, None) => NOT_IN_LAYER,
        };
        trace!(
            layer = %slot.layer.descriptor(),
            unit = %unit,
            unit_id = short_unit_id,
            unit_id_in_layer = unit_id,
            "Resolved unit in layer"
        );
        Ok(slot.bind_unit(short_unit_id, unit_id))
    }

    /// Cached file path dictionary of a unit, building it on first use
    ///
    /// The first layer holding a non-empty file path table for the unit
    /// seeds the dictionary; its paths are mapped into the client's scheme.
    ///
    /// Returns `None` for an unregistered unit, and for a unit that was not
    /// open when the session shut down.
    pub(crate) fn ensure_open(&self, short_unit_id: i32) -> Option<Arc<FilePathsDictionary>> {
        if let Some(dictionary) = self.cached_dictionary(short_unit_id) {
            return Some(dictionary);
        }
        let _guard = self.storage_lock.lock();
        let mut dictionaries = self.file_path_dictionaries.lock();
        if let Some(dictionary) = dictionaries.get(&short_unit_id) {
            return Some(Arc::clone(dictionary));
        }
        if self.is_shut_down() {
            debug!(unit_id = short_unit_id, "Storage is shut down, not opening unit");
            return None;
        }
        let Some(client_unit) = self.client_units.get_unit_descriptor(short_unit_id) else {
            debug!(unit_id = short_unit_id, "Cannot open unregistered unit");
            return None;
        };

        let mut source: Option<(usize, Vec<String>)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(unit_id_in_layer) = slot.known_unit(short_unit_id) else {
                continue;
            };
            slot.layer.open_unit(unit_id_in_layer);
            if source.is_none() {
                source = self
                    .read_layer_path_table(index, unit_id_in_layer)
                    .filter(|paths| !paths.is_empty())
                    .map(|paths| (index, paths));
            }
        }

        let dictionary = match source {
            Some((index, paths)) => {
                debug!(
                    unit = %client_unit,
                    layer = %self.slots[index].layer.descriptor(),
                    files = paths.len(),
                    "Opened unit"
                );
                self.path_sources.insert(short_unit_id, index);
                Arc::new(FilePathsDictionary::from_paths(
                    paths.iter().map(|p| self.mapper.map(&client_unit, p)),
                ))
            }
            None => {
                debug!(unit = %client_unit, "Opened unit with no persisted file paths");
                Arc::new(FilePathsDictionary::new())
            }
        };
        dictionaries.insert(short_unit_id, Arc::clone(&dictionary));
        Some(dictionary)
    }

    pub(crate) fn cached_dictionary(&self, short_unit_id: i32) -> Option<Arc<FilePathsDictionary>> {
        self.file_path_dictionaries
            .lock()
            .get(&short_unit_id)
            .cloned()
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Refuse further unit opens; the caller holds the storage lock
    pub(crate) fn mark_shut_down(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    pub(crate) fn is_open(&self, short_unit_id: i32) -> bool {
        self.file_path_dictionaries
            .lock()
            .contains_key(&short_unit_id)
    }

    /// Raw file path table persisted in one layer for a layer unit id
    pub(crate) fn read_layer_path_table(
        &self,
        index: usize,
        unit_id_in_layer: i32,
    ) -> Option<Vec<String>> {
        let slot = &self.slots[index];
        let key = LayerKey::file_paths_dictionary(unit_id_in_layer);
        if slot.layer.is_removed(&key) {
            return None;
        }
        let read = slot.layer.read_capability()?;
        let bytes = match read.read(&key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(layer = %slot.layer.descriptor(), unit_id = unit_id_in_layer, error = %e, "Failed to read file path table");
                return None;
            }
        };
        match RepositoryDataInput::detached(bytes).read_str_list() {
            Ok(paths) => Some(paths),
            Err(e) => {
                warn!(layer = %slot.layer.descriptor(), unit_id = unit_id_in_layer, error = %e, "Corrupted file path table");
                None
            }
        }
    }

    /// `get_file_id` with dirty tracking by size comparison
    pub(crate) fn file_id(
        &self,
        short_unit_id: i32,
        dictionary: &FilePathsDictionary,
        path: &str,
    ) -> i32 {
        let before = dictionary.size();
        let id = dictionary.get_file_id(path, short_unit_id);
        if dictionary.size() != before {
            self.dirty_dictionaries.lock().insert(short_unit_id);
        }
        id
    }

    /// Index of the first layer with a write capability
    pub(crate) fn write_slot(&self) -> Option<usize> {
        self.slots.iter().position(LayerSlot::is_writable)
    }

    pub(crate) fn read_converters(self: &Arc<Self>, index: usize) -> LayerConverters {
        LayerConverters::new(
            Arc::new(UnitIdReadConverter::new(Arc::clone(self), index)),
            Arc::new(FileSystemReadConverter::new(Arc::clone(self), index)),
            Arc::new(FilePathReadConverter::new(Arc::clone(self), index)),
        )
    }

    pub(crate) fn write_converters(self: &Arc<Self>, index: usize) -> LayerConverters {
        LayerConverters::new(
            Arc::new(UnitIdWriteConverter::new(Arc::clone(self), index)),
            Arc::new(FileSystemWriteConverter::new(Arc::clone(self), index)),
            Arc::new(FilePathWriteConverter),
        )
    }

    /// Log corrupted state; the full dump only the first time per condition
    pub(crate) fn report_corruption(&self, condition: &'static str, message: &str) {
        if self.diagnostics.first(condition) {
            warn!(condition, dump = %self.dump(), "{}", message);
        } else {
            debug!(condition, "{}", message);
        }
    }

    /// Human-readable dump of dictionaries and translation tables
    pub(crate) fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Storage[storage_id={}, layers={}]",
            self.config.storage_id,
            self.slots.len()
        );
        let _ = writeln!(out, "  units:");
        for (id, unit) in self.client_units.entries() {
            let _ = writeln!(out, "    {} -> {}", id, unit);
        }
        let _ = writeln!(out, "  file systems:");
        for (id, fs) in self.client_file_systems.entries() {
            let _ = writeln!(out, "    {} -> {}", id, fs);
        }
        for (index, slot) in self.slots.iter().enumerate() {
            let _ = writeln!(
                out,
                "  layer {} {} ({})",
                index,
                slot.layer.descriptor(),
                if slot.is_writable() { "rw" } else { "ro" }
            );
            let _ = writeln!(out, "    units: {:?}", slot.sorted_units());
            let _ = writeln!(out, "    file systems: {:?}", slot.sorted_file_systems());
        }
        let mut open: Vec<(i32, usize)> = self
            .file_path_dictionaries
            .lock()
            .iter()
            .map(|(id, d)| (*id, d.size()))
            .collect();
        open.sort_unstable();
        let _ = writeln!(out, "  open units (unit, files): {:?}", open);
        out
    }
}
