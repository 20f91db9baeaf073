//! Session restart scenarios
//!
//! Tests covering what survives between storage sessions backed by layer
//! images: dictionaries and records after a clean shutdown, resets on a
//! persistence version change or forced reinit, and recovery from a
//! damaged image.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::unit;
use tempfile::tempdir;
use unitrepo_core::{Key, LayerDescriptor};
use unitrepo_storage::{
    is_wrong_path, LayerFactoryRegistry, MemoryLayerFactory, RepositoryMapper, Storage,
    StorageConfig,
};

fn open(dir: &Path, config: StorageConfig) -> Storage {
    let registry =
        LayerFactoryRegistry::new().with_factory(Arc::new(MemoryLayerFactory::with_image_dir(dir)));
    Storage::open(
        config,
        &[LayerDescriptor::writable("memory:cache")],
        &registry,
        RepositoryMapper::new(),
    )
    .unwrap()
}

/// Session that registers a unit, two files and one record, then shuts down
fn populate(dir: &Path) {
    let storage = open(dir, StorageConfig::for_testing());
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert_eq!(storage.get_file_id(id, "a.c"), 0);
    assert_eq!(storage.get_file_id(id, "b.c"), 1);
    let mut out = storage.get_output_stream(&Key::named(id, 1, "decl")).unwrap();
    out.write_utf("int main();").unwrap();
    out.write_file_path_index(id, 1).unwrap();
    storage.write(out).unwrap();
    storage.shutdown().unwrap();
}

// === Clean Shutdown ===

#[test]
fn test_clean_shutdown_persists_everything() {
    let dir = tempdir().unwrap();
    populate(dir.path());
    assert!(dir.path().join("cache.img").exists());

    let storage = open(dir.path(), StorageConfig::for_testing());
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert_eq!(&*storage.get_file_name(id, 1), "b.c");
    assert_eq!(storage.get_file_id(id, "a.c"), 0);
    assert_eq!(storage.get_file_id(id, "c.c"), 2);

    let mut input = storage.get_input_stream(&Key::named(id, 1, "decl")).unwrap();
    assert_eq!(input.read_utf().unwrap(), "int main();");
    assert_eq!(input.read_file_path_index(id).unwrap(), 1);
}

#[test]
fn test_unflushed_files_are_lost_without_shutdown() {
    let dir = tempdir().unwrap();
    populate(dir.path());
    {
        let storage = open(dir.path(), StorageConfig::for_testing());
        let id = storage.get_unit_id(&unit("proj")).unwrap();
        assert_eq!(storage.get_file_id(id, "lost.c"), 2);
        storage.flush().unwrap();
    }

    let storage = open(dir.path(), StorageConfig::for_testing());
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert!(is_wrong_path(&storage.get_file_name(id, 2)));
    assert_eq!(&*storage.get_file_name(id, 1), "b.c");
}

// === Resets ===

#[test]
fn test_persistence_version_change_discards_content() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let storage = open(
        dir.path(),
        StorageConfig::for_testing().with_persistence_version(2),
    );
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert!(is_wrong_path(&storage.get_file_name(id, 0)));
    assert!(storage.get_input_stream(&Key::named(id, 1, "decl")).is_none());
}

#[test]
fn test_force_reinit_discards_content() {
    let dir = tempdir().unwrap();
    populate(dir.path());

    let storage = open(dir.path(), StorageConfig::for_testing().with_force_reinit(true));
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert_eq!(storage.get_file_id(id, "z.c"), 0);
    assert!(storage.get_input_stream(&Key::named(id, 1, "decl")).is_none());
}

// === Damaged Images ===

#[test]
fn test_truncated_image_starts_empty() {
    let dir = tempdir().unwrap();
    populate(dir.path());
    let path = dir.path().join("cache.img");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let storage = open(dir.path(), StorageConfig::for_testing());
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert!(storage.get_input_stream(&Key::named(id, 1, "decl")).is_none());
    assert_eq!(storage.get_file_id(id, "fresh.c"), 0);
    storage.shutdown().unwrap();

    let storage = open(dir.path(), StorageConfig::for_testing());
    let id = storage.get_unit_id(&unit("proj")).unwrap();
    assert_eq!(&*storage.get_file_name(id, 0), "fresh.c");
}

#[test]
fn test_unknown_scheme_is_skipped() {
    let dir = tempdir().unwrap();
    let registry = LayerFactoryRegistry::new()
        .with_factory(Arc::new(MemoryLayerFactory::with_image_dir(dir.path())));
    let storage = Storage::open(
        StorageConfig::for_testing(),
        &[
            LayerDescriptor::writable("nfs://server/cache"),
            LayerDescriptor::writable("memory:cache"),
        ],
        &registry,
        RepositoryMapper::new(),
    )
    .unwrap();
    assert_eq!(storage.layer_count(), 1);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let registry = LayerFactoryRegistry::new()
        .with_factory(Arc::new(MemoryLayerFactory::with_image_dir(dir.path())));
    let result = Storage::open(
        StorageConfig::for_testing().with_defrag_threshold(-1),
        &[LayerDescriptor::writable("memory:cache")],
        &registry,
        RepositoryMapper::new(),
    );
    assert!(matches!(result, Err(unitrepo_core::Error::Config(_))));
}
