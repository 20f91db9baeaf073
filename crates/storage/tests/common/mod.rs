//! Shared helpers for storage integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use unitrepo_core::{
    Error, FileSystem, Layer, LayerDescriptor, LayerKey, ReadLayerCapability, Result,
    UnitDescriptor, WriteLayerCapability,
};
use unitrepo_storage::{MemoryLayer, RepositoryMapper, Storage, StorageConfig, StorageMask};

pub fn unit(name: &str) -> UnitDescriptor {
    UnitDescriptor::new(name, FileSystem::local())
}

pub fn writable(uri: &str) -> Arc<MemoryLayer> {
    Arc::new(MemoryLayer::new(LayerDescriptor::writable(uri)))
}

/// Storage over `layers` (topmost first) with a testing config
pub fn storage_over(layers: Vec<Arc<dyn Layer>>, storage_id: u16) -> Storage {
    storage_with_mapper(layers, storage_id, RepositoryMapper::new())
}

pub fn storage_with_mapper(
    layers: Vec<Arc<dyn Layer>>,
    storage_id: u16,
    mapper: RepositoryMapper,
) -> Storage {
    Storage::with_layers(
        StorageConfig::for_testing().with_storage_id(storage_id),
        layers,
        mapper,
        Arc::new(StorageMask::new(storage_id)),
    )
    .unwrap()
}

/// Route tracing output through the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// How a [`ScriptedLayer`] answers maintenance requests
#[derive(Debug, Clone, Copy)]
pub enum Maintenance {
    /// Delegate to the wrapped memory layer
    Delegate,
    /// Sleep, then report whether more time is needed
    Sleep(Duration, bool),
    /// Fail with an I/O error
    Fail,
}

/// Memory layer wrapper that counts calls and scripts maintenance
pub struct ScriptedLayer {
    pub name: &'static str,
    inner: MemoryLayer,
    weight: Option<i32>,
    maintenance: Maintenance,
    log: Option<Arc<Mutex<Vec<&'static str>>>>,
    pub unit_registrations: AtomicUsize,
    pub unit_lookups: AtomicUsize,
    pub file_system_registrations: AtomicUsize,
    pub maintenance_calls: AtomicUsize,
}

impl ScriptedLayer {
    pub fn new(name: &'static str, inner: MemoryLayer) -> Self {
        Self {
            name,
            inner,
            weight: None,
            maintenance: Maintenance::Delegate,
            log: None,
            unit_registrations: AtomicUsize::new(0),
            unit_lookups: AtomicUsize::new(0),
            file_system_registrations: AtomicUsize::new(0),
            maintenance_calls: AtomicUsize::new(0),
        }
    }

    pub fn writable(name: &'static str) -> Self {
        Self::new(
            name,
            MemoryLayer::new(LayerDescriptor::writable(format!("memory:{}", name))),
        )
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_maintenance(mut self, maintenance: Maintenance) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_log(mut self, log: Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn inner(&self) -> &MemoryLayer {
        &self.inner
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl Layer for ScriptedLayer {
    fn descriptor(&self) -> &LayerDescriptor {
        self.inner.descriptor()
    }

    fn startup(&self, persistence_version: i32, force_reinit: bool) -> Result<bool> {
        self.inner.startup(persistence_version, force_reinit)
    }

    fn shutdown(&self) -> Result<()> {
        self.inner.shutdown()
    }

    fn open_unit(&self, unit_id_in_layer: i32) {
        self.inner.open_unit(unit_id_in_layer)
    }

    fn close_unit(&self, unit_id_in_layer: i32, clean: bool, required: &BTreeSet<i32>) {
        self.inner.close_unit(unit_id_in_layer, clean, required)
    }

    fn units_table(&self) -> Vec<UnitDescriptor> {
        self.inner.units_table()
    }

    fn file_systems_table(&self) -> Vec<FileSystem> {
        self.inner.file_systems_table()
    }

    fn unit_at(&self, unit_id_in_layer: i32) -> Option<UnitDescriptor> {
        self.inner.unit_at(unit_id_in_layer)
    }

    fn file_system_at(&self, file_system_index: i32) -> Option<FileSystem> {
        self.inner.file_system_at(file_system_index)
    }

    fn find_unit_id(&self, unit: &UnitDescriptor) -> Option<i32> {
        self.unit_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.find_unit_id(unit)
    }

    fn find_matched_file_system_index(&self, file_system: &FileSystem) -> Option<i32> {
        self.inner.find_matched_file_system_index(file_system)
    }

    fn removed_table_key_set(&self) -> HashSet<LayerKey> {
        self.inner.removed_table_key_set()
    }

    fn read_capability(&self) -> Option<&dyn ReadLayerCapability> {
        self.inner.read_capability()
    }

    fn write_capability(&self) -> Option<&dyn WriteLayerCapability> {
        if self.inner.is_writable() {
            Some(self)
        } else {
            None
        }
    }
}

impl WriteLayerCapability for ScriptedLayer {
    fn register_client_file_system(&self, file_system: &FileSystem) -> Result<i32> {
        self.file_system_registrations.fetch_add(1, Ordering::SeqCst);
        self.inner.register_client_file_system(file_system)
    }

    fn register_new_unit(&self, unit: &UnitDescriptor) -> Result<i32> {
        self.unit_registrations.fetch_add(1, Ordering::SeqCst);
        self.inner.register_new_unit(unit)
    }

    fn remove_unit(&self, unit_id_in_layer: i32) -> Result<()> {
        self.inner.remove_unit(unit_id_in_layer)
    }

    fn write(&self, key: &LayerKey, data: Vec<u8>) -> Result<()> {
        WriteLayerCapability::write(&self.inner, key, data)
    }

    fn remove(&self, key: &LayerKey, keep_tombstone: bool) -> Result<()> {
        self.inner.remove(key, keep_tombstone)
    }

    fn maintenance_weight(&self) -> i32 {
        self.weight
            .unwrap_or_else(|| self.inner.maintenance_weight())
    }

    fn maintenance(&self, timeout: Duration) -> Result<bool> {
        self.maintenance_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(self.name);
        }
        match self.maintenance {
            Maintenance::Delegate => self.inner.maintenance(timeout),
            Maintenance::Sleep(delay, more) => {
                thread::sleep(delay);
                Ok(more)
            }
            Maintenance::Fail => Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "maintenance failed",
            ))),
        }
    }
}
