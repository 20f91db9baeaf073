//! Maintenance scheduling tests
//!
//! These tests verify that `Storage::maintain`:
//! 1. Visits writable layers only, heaviest first
//! 2. Skips layers below the defragmentation threshold
//! 3. Stops starting new layers once the budget is spent
//! 4. Keeps going when one layer fails

mod common;

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{storage_over, unit, Maintenance, ScriptedLayer};
use unitrepo_core::{Key, Layer, LayerDescriptor};
use unitrepo_storage::{MemoryLayer, RepositoryMapper, Storage, StorageConfig, StorageMask};

fn storage_with_threshold(layers: Vec<Arc<dyn Layer>>, threshold: i32) -> Storage {
    Storage::with_layers(
        StorageConfig::for_testing().with_defrag_threshold(threshold),
        layers,
        RepositoryMapper::new(),
        Arc::new(StorageMask::new(0)),
    )
    .unwrap()
}

#[test]
fn test_heaviest_layer_goes_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let light = Arc::new(
        ScriptedLayer::writable("light")
            .with_weight(10)
            .with_maintenance(Maintenance::Sleep(Duration::ZERO, false))
            .with_log(log.clone()),
    );
    let heavy = Arc::new(
        ScriptedLayer::writable("heavy")
            .with_weight(100)
            .with_maintenance(Maintenance::Sleep(Duration::ZERO, false))
            .with_log(log.clone()),
    );
    let storage = storage_over(vec![light as Arc<dyn Layer>, heavy], 0);

    assert_eq!(storage.get_maintenance_weight(), 110);
    assert!(!storage.maintain(Duration::from_secs(5)));
    assert_eq!(*log.lock(), vec!["heavy", "light"]);
}

#[test]
fn test_layers_below_threshold_are_skipped() {
    let layer = Arc::new(
        ScriptedLayer::writable("cache")
            .with_weight(10)
            .with_maintenance(Maintenance::Sleep(Duration::ZERO, true)),
    );
    let storage = storage_with_threshold(vec![layer.clone() as Arc<dyn Layer>], 50);

    assert!(!storage.maintain(Duration::from_secs(5)));
    assert_eq!(ScriptedLayer::count(&layer.maintenance_calls), 0);
}

#[test]
fn test_read_only_layers_are_not_maintained() {
    let base = Arc::new(ScriptedLayer::new(
        "base",
        MemoryLayer::new(LayerDescriptor::read_only("memory:base")),
    ));
    let storage = storage_over(vec![base.clone() as Arc<dyn Layer>], 0);

    assert_eq!(storage.get_maintenance_weight(), 0);
    assert!(!storage.maintain(Duration::from_secs(5)));
    assert_eq!(ScriptedLayer::count(&base.maintenance_calls), 0);
}

#[test]
fn test_budget_stops_before_next_layer() {
    let delay = Duration::from_millis(40);
    let layers: Vec<Arc<ScriptedLayer>> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            Arc::new(
                ScriptedLayer::writable(name)
                    .with_weight(100)
                    .with_maintenance(Maintenance::Sleep(delay, false)),
            )
        })
        .collect();
    let storage = storage_over(
        layers.iter().map(|l| l.clone() as Arc<dyn Layer>).collect(),
        0,
    );

    let timeout = Duration::from_millis(10);
    let start = Instant::now();
    let needs_more = storage.maintain(timeout);
    let elapsed = start.elapsed();

    assert!(needs_more);
    let calls: usize = layers
        .iter()
        .map(|l| ScriptedLayer::count(&l.maintenance_calls))
        .sum();
    assert_eq!(calls, 1);
    assert!(elapsed < timeout + delay + Duration::from_millis(500));
}

#[test]
fn test_layer_asking_for_more_time_is_reported() {
    let layer = Arc::new(
        ScriptedLayer::writable("cache")
            .with_weight(100)
            .with_maintenance(Maintenance::Sleep(Duration::ZERO, true)),
    );
    let storage = storage_over(vec![layer.clone() as Arc<dyn Layer>], 0);
    assert!(storage.maintain(Duration::from_secs(5)));
    assert_eq!(ScriptedLayer::count(&layer.maintenance_calls), 1);
}

#[test]
fn test_failing_layer_does_not_block_others() {
    let broken = Arc::new(
        ScriptedLayer::writable("broken")
            .with_weight(100)
            .with_maintenance(Maintenance::Fail),
    );
    let healthy = Arc::new(
        ScriptedLayer::writable("healthy")
            .with_weight(10)
            .with_maintenance(Maintenance::Sleep(Duration::ZERO, false)),
    );
    let storage = storage_over(
        vec![broken.clone() as Arc<dyn Layer>, healthy.clone()],
        0,
    );

    assert!(!storage.maintain(Duration::from_secs(5)));
    assert_eq!(ScriptedLayer::count(&broken.maintenance_calls), 1);
    assert_eq!(ScriptedLayer::count(&healthy.maintenance_calls), 1);
}

#[test]
fn test_memory_layer_garbage_is_reclaimed() {
    let layer = Arc::new(ScriptedLayer::writable("cache"));
    let storage = storage_over(vec![layer.clone() as Arc<dyn Layer>], 0);
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    let key = Key::named(id, 1, "hot");

    for i in 0..40 {
        let mut out = storage.get_output_stream(&key).unwrap();
        out.write_i32(i).unwrap();
        storage.write(out).unwrap();
    }
    assert_eq!(storage.get_maintenance_weight(), 39);

    assert!(!storage.maintain(Duration::from_secs(5)));
    assert_eq!(storage.get_maintenance_weight(), 0);
    assert_eq!(layer.inner().record_count(), 1);
    let mut input = storage.get_input_stream(&key).unwrap();
    assert_eq!(input.read_i32().unwrap(), 39);
}
