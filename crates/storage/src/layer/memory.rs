//! In-process layer
//!
//! `MemoryLayer` keeps its units table, file systems table, records and
//! tombstones in memory and can persist them as an image file. It is the
//! reference backend for sessions that need no on-disk format and the
//! backend the storage tests run against.
//!
//! # Maintenance
//!
//! Overwritten and removed payloads are retired rather than freed: they stay
//! allocated until a maintenance pass drops them, in batches. The
//! maintenance weight is the number of retired payloads. Retired payloads
//! are never part of a saved image.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use unitrepo_core::{
    FileSystem, Layer, LayerDescriptor, LayerFactory, LayerKey, ReadLayerCapability, Result,
    UnitDescriptor, WriteLayerCapability,
};

use super::image::LayerImage;

/// Retired payloads freed per maintenance step
pub const MAINTENANCE_BATCH: i32 = 16;

/// URI scheme handled by [`MemoryLayerFactory`]
pub const MEMORY_SCHEME: &str = "memory";

#[derive(Default)]
struct LayerState {
    image: LayerImage,
    /// Layer id of each entry of `image.units`
    unit_ids: FxHashMap<UnitDescriptor, i32>,
    retired: Vec<Vec<u8>>,
    open_units: BTreeSet<i32>,
}

impl LayerState {
    fn from_image(image: LayerImage) -> Self {
        let unit_ids = image
            .units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.clone(), i as i32))
            .collect();
        Self {
            image,
            unit_ids,
            ..Default::default()
        }
    }

    fn retire(&mut self, data: Vec<u8>) {
        self.retired.push(data);
    }
}

/// Layer holding everything in memory
pub struct MemoryLayer {
    descriptor: LayerDescriptor,
    image_path: Option<PathBuf>,
    state: RwLock<LayerState>,
}

impl MemoryLayer {
    /// Create an empty layer; writable if the descriptor asks for it
    pub fn new(descriptor: LayerDescriptor) -> Self {
        Self {
            descriptor,
            image_path: None,
            state: RwLock::new(LayerState::default()),
        }
    }

    /// Create a layer backed by an image file
    ///
    /// The image is loaded if it exists and saved again on shutdown when the
    /// layer is writable.
    pub fn with_image(descriptor: LayerDescriptor, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let image = if path.exists() {
            LayerImage::load(&path)?
        } else {
            LayerImage::default()
        };
        Ok(Self {
            descriptor,
            image_path: Some(path),
            state: RwLock::new(LayerState::from_image(image)),
        })
    }

    /// Create a layer from an image
    pub fn from_image(descriptor: LayerDescriptor, image: LayerImage) -> Self {
        Self {
            descriptor,
            image_path: None,
            state: RwLock::new(LayerState::from_image(image)),
        }
    }

    /// Copy of the current content
    pub fn image(&self) -> LayerImage {
        self.state.read().image.clone()
    }

    /// Read-only layer with a copy of this layer's content
    pub fn read_only_copy(&self, uri: impl Into<String>) -> Self {
        Self::from_image(LayerDescriptor::read_only(uri), self.image())
    }

    /// Persist the current content to `path`
    pub fn save_image(&self, path: &Path) -> Result<()> {
        self.image().persist(path)?;
        Ok(())
    }

    /// Whether the layer accepts writes
    pub fn is_writable(&self) -> bool {
        self.descriptor.is_writable()
    }

    /// Number of stored records
    pub fn record_count(&self) -> usize {
        self.state.read().image.records.len()
    }

    /// Bytes held by retired payloads awaiting maintenance
    pub fn retired_bytes(&self) -> usize {
        self.state.read().retired.iter().map(Vec::len).sum()
    }

    /// Layer unit ids currently open
    pub fn open_units(&self) -> Vec<i32> {
        self.state.read().open_units.iter().copied().collect()
    }

    fn remove_unit_records(state: &mut LayerState, unit_id_in_layer: i32) -> usize {
        let keys: Vec<LayerKey> = state
            .image
            .records
            .keys()
            .filter(|k| k.unit_id() == unit_id_in_layer)
            .cloned()
            .collect();
        for key in &keys {
            if let Some(data) = state.image.records.remove(key) {
                state.retire(data);
            }
        }
        state
            .image
            .removed
            .retain(|k| k.unit_id() != unit_id_in_layer);
        keys.len()
    }
}

impl Layer for MemoryLayer {
    fn descriptor(&self) -> &LayerDescriptor {
        &self.descriptor
    }

    fn startup(&self, persistence_version: i32, force_reinit: bool) -> Result<bool> {
        let mut state = self.state.write();
        let stale = state.image.persistence_version != 0
            && state.image.persistence_version != persistence_version;
        let reset = force_reinit || stale;
        if reset {
            debug!(
                layer = %self.descriptor,
                stored_version = state.image.persistence_version,
                persistence_version,
                "Discarding layer content"
            );
            *state = LayerState::default();
        }
        state.image.persistence_version = persistence_version;
        Ok(reset)
    }

    fn shutdown(&self) -> Result<()> {
        self.state.write().open_units.clear();
        if let (true, Some(path)) = (self.is_writable(), &self.image_path) {
            self.save_image(path)?;
            debug!(layer = %self.descriptor, path = %path.display(), "Saved layer image");
        }
        Ok(())
    }

    fn open_unit(&self, unit_id_in_layer: i32) {
        self.state.write().open_units.insert(unit_id_in_layer);
    }

    fn close_unit(
        &self,
        unit_id_in_layer: i32,
        clean_repository: bool,
        required_units_in_layer: &BTreeSet<i32>,
    ) {
        let mut state = self.state.write();
        state.open_units.remove(&unit_id_in_layer);
        if clean_repository && self.is_writable() {
            Self::remove_unit_records(&mut state, unit_id_in_layer);
        }
        debug!(
            layer = %self.descriptor,
            unit_id = unit_id_in_layer,
            clean_repository,
            required = required_units_in_layer.len(),
            "Closed unit"
        );
    }

    fn units_table(&self) -> Vec<UnitDescriptor> {
        self.state.read().image.units.clone()
    }

    fn file_systems_table(&self) -> Vec<FileSystem> {
        self.state.read().image.file_systems.clone()
    }

    fn unit_at(&self, unit_id_in_layer: i32) -> Option<UnitDescriptor> {
        let state = self.state.read();
        usize::try_from(unit_id_in_layer)
            .ok()
            .and_then(|i| state.image.units.get(i).cloned())
    }

    fn file_system_at(&self, file_system_index: i32) -> Option<FileSystem> {
        let state = self.state.read();
        usize::try_from(file_system_index)
            .ok()
            .and_then(|i| state.image.file_systems.get(i).cloned())
    }

    fn find_unit_id(&self, unit: &UnitDescriptor) -> Option<i32> {
        self.state.read().unit_ids.get(unit).copied()
    }

    fn find_matched_file_system_index(&self, file_system: &FileSystem) -> Option<i32> {
        self.state
            .read()
            .image
            .file_systems
            .iter()
            .position(|fs| fs == file_system)
            .map(|i| i as i32)
    }

    fn removed_table_key_set(&self) -> HashSet<LayerKey> {
        self.state.read().image.removed.iter().cloned().collect()
    }

    fn is_removed(&self, key: &LayerKey) -> bool {
        self.state.read().image.removed.contains(key)
    }

    fn read_capability(&self) -> Option<&dyn ReadLayerCapability> {
        Some(self)
    }

    fn write_capability(&self) -> Option<&dyn WriteLayerCapability> {
        if self.is_writable() {
            Some(self)
        } else {
            None
        }
    }
}

impl ReadLayerCapability for MemoryLayer {
    fn read(&self, key: &LayerKey) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().image.records.get(key).cloned())
    }

    fn knows_key(&self, key: &LayerKey) -> bool {
        self.state.read().image.records.contains_key(key)
    }
}

impl WriteLayerCapability for MemoryLayer {
    fn register_client_file_system(&self, file_system: &FileSystem) -> Result<i32> {
        let mut state = self.state.write();
        let table = &mut state.image.file_systems;
        if let Some(i) = table.iter().position(|fs| fs == file_system) {
            return Ok(i as i32);
        }
        table.push(file_system.clone());
        Ok(table.len() as i32 - 1)
    }

    fn register_new_unit(&self, unit: &UnitDescriptor) -> Result<i32> {
        let mut state = self.state.write();
        if let Some(&id) = state.unit_ids.get(unit) {
            return Ok(id);
        }
        let id = state.image.units.len() as i32;
        state.image.units.push(unit.clone());
        state.unit_ids.insert(unit.clone(), id);
        Ok(id)
    }

    fn remove_unit(&self, unit_id_in_layer: i32) -> Result<()> {
        let mut state = self.state.write();
        let dropped = Self::remove_unit_records(&mut state, unit_id_in_layer);
        debug!(layer = %self.descriptor, unit_id = unit_id_in_layer, dropped, "Removed unit");
        Ok(())
    }

    fn write(&self, key: &LayerKey, data: Vec<u8>) -> Result<()> {
        let mut state = self.state.write();
        if let Some(old) = state.image.records.insert(key.clone(), data) {
            state.retire(old);
        }
        state.image.removed.remove(key);
        Ok(())
    }

    fn remove(&self, key: &LayerKey, keep_tombstone: bool) -> Result<()> {
        let mut state = self.state.write();
        if let Some(old) = state.image.records.remove(key) {
            state.retire(old);
        }
        if keep_tombstone {
            state.image.removed.insert(key.clone());
        } else {
            state.image.removed.remove(key);
        }
        Ok(())
    }

    fn maintenance_weight(&self) -> i32 {
        i32::try_from(self.state.read().retired.len()).unwrap_or(i32::MAX)
    }

    fn maintenance(&self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        let mut state = self.state.write();
        let mut freed = 0usize;
        while !state.retired.is_empty() {
            let keep = state.retired.len().saturating_sub(MAINTENANCE_BATCH as usize);
            freed += state.retired.drain(keep..).map(|data| data.len()).sum::<usize>();
            if start.elapsed() >= timeout {
                break;
            }
        }
        if state.retired.is_empty() {
            state.retired.shrink_to_fit();
        }
        debug!(layer = %self.descriptor, freed, left = state.retired.len(), "Reclaimed retired payloads");
        Ok(!state.retired.is_empty())
    }
}

impl std::fmt::Debug for MemoryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("MemoryLayer")
            .field("uri", &self.descriptor.uri())
            .field("writable", &self.is_writable())
            .field("units", &state.image.units.len())
            .field("records", &state.image.records.len())
            .field("removed", &state.image.removed.len())
            .field("retired", &state.retired.len())
            .finish()
    }
}

/// Creates [`MemoryLayer`]s for `memory:` URIs
///
/// With an image directory, `memory:<name>` is backed by `<dir>/<name>.img`.
#[derive(Debug, Clone, Default)]
pub struct MemoryLayerFactory {
    image_dir: Option<PathBuf>,
}

impl MemoryLayerFactory {
    /// Factory for purely in-memory layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for layers persisted under `dir`
    pub fn with_image_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: Some(dir.into()),
        }
    }
}

impl LayerFactory for MemoryLayerFactory {
    fn can_handle(&self, descriptor: &LayerDescriptor) -> bool {
        descriptor.scheme() == MEMORY_SCHEME
    }

    fn create_layer(&self, descriptor: &LayerDescriptor) -> Option<Arc<dyn Layer>> {
        let Some(dir) = &self.image_dir else {
            return Some(Arc::new(MemoryLayer::new(descriptor.clone())));
        };
        let name = descriptor
            .uri()
            .strip_prefix("memory:")
            .unwrap_or(descriptor.uri());
        let path = dir.join(format!("{}.img", name));
        match MemoryLayer::with_image(descriptor.clone(), &path) {
            Ok(layer) => Some(Arc::new(layer)),
            Err(e) => {
                warn!(layer = %descriptor, path = %path.display(), error = %e, "Unreadable layer image, starting empty");
                Some(Arc::new(MemoryLayer {
                    descriptor: descriptor.clone(),
                    image_path: Some(path),
                    state: RwLock::new(LayerState::default()),
                }))
            }
        }
    }
}
