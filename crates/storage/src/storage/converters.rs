//! Layer converters
//!
//! Each converter works in one direction only. Read converters translate
//! layer numbering to client numbering for data coming out of a layer;
//! write converters translate client numbering to layer numbering for data
//! going into the write layer. Calling the other direction is a programming
//! error and fails with `Error::Internal`.

use std::sync::Arc;
use tracing::{debug, error};
use unitrepo_core::{
    Error, FilePathConverter, FileSystem, FileSystemConverter, Result, UnitIdConverter,
    NOT_IN_LAYER,
};

use super::state::StorageCore;
use crate::diagnostics::conditions;

fn wrong_direction(converter: &str, method: &str) -> Error {
    let err = Error::internal(format!("{} does not support {}", converter, method));
    error!(error = %err, "Converter used in the wrong direction");
    err
}

/// Layer unit id -> client unit id, with lazy reverse registration
pub(crate) struct UnitIdReadConverter {
    core: Arc<StorageCore>,
    layer: usize,
}

impl UnitIdReadConverter {
    pub(crate) fn new(core: Arc<StorageCore>, layer: usize) -> Self {
        Self { core, layer }
    }
}

impl UnitIdConverter for UnitIdReadConverter {
    fn client_to_layer(&self, _client_unit_id: i32) -> Result<i32> {
        Err(wrong_direction("UnitIdReadConverter", "client_to_layer"))
    }

    /// Resolve a unit id found in layer data
    ///
    /// A unit never seen by the client (data of one unit referencing a
    /// second, not yet opened unit) is registered on the spot: a client
    /// descriptor is synthesized from the layer's units table, bound to the
    /// layer id, and resolved in every other layer before its client id is
    /// returned.
    fn layer_to_client(&self, unit_id_in_layer: i32) -> Result<i32> {
        if unit_id_in_layer < 0 {
            return Ok(unit_id_in_layer);
        }
        let core = &self.core;
        let slot = &core.slots[self.layer];
        if let Some(short) = slot.client_unit(unit_id_in_layer) {
            return Ok(core.mask.layer_to_client(short));
        }

        let Some(layer_unit) = slot.layer.unit_at(unit_id_in_layer) else {
            core.report_corruption(
                conditions::UNIT_READ_LAYER_TO_CLIENT,
                &format!(
                    "Unit id {} is not in the units table of layer {}",
                    unit_id_in_layer,
                    slot.layer.descriptor()
                ),
            );
            return Ok(NOT_IN_LAYER);
        };

        let client_unit = core
            .mapper
            .map_to_client(layer_unit.file_system(), &layer_unit);
        let short = core.assign_short_id(&client_unit)?;
        slot.bind_unit(short, unit_id_in_layer);
        core.register_unit(&client_unit)?;
        debug!(
            layer = %slot.layer.descriptor(),
            unit = %client_unit,
            unit_id = short,
            unit_id_in_layer,
            "Registered unit referenced from layer data"
        );
        Ok(core.mask.layer_to_client(short))
    }
}

/// Client unit id -> unit id in the write layer
pub(crate) struct UnitIdWriteConverter {
    core: Arc<StorageCore>,
    layer: usize,
}

impl UnitIdWriteConverter {
    pub(crate) fn new(core: Arc<StorageCore>, layer: usize) -> Self {
        Self { core, layer }
    }
}

impl UnitIdConverter for UnitIdWriteConverter {
    fn client_to_layer(&self, client_unit_id: i32) -> Result<i32> {
        if client_unit_id < 0 {
            return Ok(client_unit_id);
        }
        let core = &self.core;
        let slot = &core.slots[self.layer];
        let short = core.mask.client_to_layer(client_unit_id);
        if let Some(id) = slot.known_unit(short) {
            return Ok(id);
        }
        let unit = core
            .client_units
            .get_unit_descriptor(short)
            .ok_or(Error::UnknownUnit(client_unit_id))?;
        core.register_unit(&unit)?;
        slot.known_unit(short).ok_or_else(|| {
            Error::internal(format!(
                "unit {} has no id in write layer {}",
                unit,
                slot.layer.descriptor()
            ))
        })
    }

    fn layer_to_client(&self, _unit_id_in_layer: i32) -> Result<i32> {
        Err(wrong_direction("UnitIdWriteConverter", "layer_to_client"))
    }
}

/// Layer file system index -> client file system
pub(crate) struct FileSystemReadConverter {
    core: Arc<StorageCore>,
    layer: usize,
}

impl FileSystemReadConverter {
    pub(crate) fn new(core: Arc<StorageCore>, layer: usize) -> Self {
        Self { core, layer }
    }
}

impl FileSystemConverter for FileSystemReadConverter {
    fn client_to_layer(&self, _file_system: &FileSystem) -> Result<i32> {
        Err(wrong_direction("FileSystemReadConverter", "client_to_layer"))
    }

    fn layer_to_client(&self, file_system_index: i32) -> Result<FileSystem> {
        let core = &self.core;
        let slot = &core.slots[self.layer];
        if let Some(fs) = slot
            .client_file_system(file_system_index)
            .and_then(|id| core.client_file_systems.get_file_system(id))
        {
            return Ok(fs);
        }

        match slot.layer.file_system_at(file_system_index) {
            Some(fs) => {
                let client_fs_id = core.client_file_systems.get_file_system_id(&fs);
                slot.bind_file_system(client_fs_id, file_system_index);
                Ok(fs)
            }
            None => {
                let message = format!(
                    "File system index {} is not in the table of layer {}",
                    file_system_index,
                    slot.layer.descriptor()
                );
                core.report_corruption(conditions::FS_READ_LAYER_TO_CLIENT, &message);
                Err(Error::Corruption(message))
            }
        }
    }
}

/// Client file system -> file system index in the write layer
pub(crate) struct FileSystemWriteConverter {
    core: Arc<StorageCore>,
    layer: usize,
}

impl FileSystemWriteConverter {
    pub(crate) fn new(core: Arc<StorageCore>, layer: usize) -> Self {
        Self { core, layer }
    }
}

impl FileSystemConverter for FileSystemWriteConverter {
    fn client_to_layer(&self, file_system: &FileSystem) -> Result<i32> {
        let core = &self.core;
        let client_fs_id = core.client_file_systems.get_file_system_id(file_system);
        let index = core.resolve_file_system(self.layer, client_fs_id, file_system)?;
        if index < 0 {
            return Err(Error::internal(format!(
                "file system {} has no index in write layer {}",
                file_system,
                core.slots[self.layer].layer.descriptor()
            )));
        }
        Ok(index)
    }

    fn layer_to_client(&self, _file_system_index: i32) -> Result<FileSystem> {
        Err(wrong_direction("FileSystemWriteConverter", "layer_to_client"))
    }
}

/// Layer file index -> client file index
///
/// Identity for the layer that seeded the unit's dictionary and for
/// writable layers, whose tables are rewritten from the client dictionary.
/// Any other layer is translated through its own persisted table.
pub(crate) struct FilePathReadConverter {
    core: Arc<StorageCore>,
    layer: usize,
}

impl FilePathReadConverter {
    pub(crate) fn new(core: Arc<StorageCore>, layer: usize) -> Self {
        Self { core, layer }
    }

    fn layer_table(&self, short_unit_id: i32) -> Arc<Vec<String>> {
        let core = &self.core;
        let slot = &core.slots[self.layer];
        if let Some(table) = slot.path_tables.get(&short_unit_id) {
            return Arc::clone(&table);
        }
        let paths = slot
            .known_unit(short_unit_id)
            .and_then(|id| core.read_layer_path_table(self.layer, id))
            .unwrap_or_default();
        let mapped = match core.client_units.get_unit_descriptor(short_unit_id) {
            Some(unit) => paths.iter().map(|p| core.mapper.map(&unit, p)).collect(),
            None => paths,
        };
        let table = slot
            .path_tables
            .entry(short_unit_id)
            .or_insert_with(|| Arc::new(mapped));
        Arc::clone(&table)
    }
}

impl FilePathConverter for FilePathReadConverter {
    fn client_to_layer(&self, _client_unit_id: i32, _file_index: i32) -> Result<i32> {
        Err(wrong_direction("FilePathReadConverter", "client_to_layer"))
    }

    fn layer_to_client(&self, client_unit_id: i32, file_index: i32) -> Result<i32> {
        if file_index < 0 {
            return Ok(file_index);
        }
        let core = &self.core;
        let short = core.mask.client_to_layer(client_unit_id);
        let Some(dictionary) = core.ensure_open(short) else {
            return Ok(NOT_IN_LAYER);
        };
        let is_source = core.path_sources.get(&short).map(|s| *s) == Some(self.layer);
        if is_source || core.slots[self.layer].is_writable() {
            return Ok(file_index);
        }
        let table = self.layer_table(short);
        match table.get(file_index as usize) {
            Some(path) => Ok(core.file_id(short, &dictionary, path)),
            None => {
                debug!(
                    unit_id = client_unit_id,
                    file_index,
                    layer = %core.slots[self.layer].layer.descriptor(),
                    "Stale file index"
                );
                Ok(NOT_IN_LAYER)
            }
        }
    }
}

/// Client file index -> file index in the write layer
///
/// The write layer persists the client dictionary itself, so indices pass
/// through unchanged.
pub(crate) struct FilePathWriteConverter;

impl FilePathConverter for FilePathWriteConverter {
    fn client_to_layer(&self, _client_unit_id: i32, file_index: i32) -> Result<i32> {
        Ok(file_index)
    }

    fn layer_to_client(&self, _client_unit_id: i32, _file_index: i32) -> Result<i32> {
        Err(wrong_direction("FilePathWriteConverter", "layer_to_client"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::layer::MemoryLayer;
    use crate::mapper::RepositoryMapper;
    use crate::mask::StorageMask;
    use unitrepo_core::{Layer, LayerDescriptor, UnitDescriptor, UnitsConverter};

    fn core() -> Arc<StorageCore> {
        let layer = Arc::new(MemoryLayer::new(LayerDescriptor::writable("memory:test")));
        Arc::new(StorageCore::new(
            StorageConfig::for_testing(),
            vec![layer as Arc<dyn Layer>],
            RepositoryMapper::new(),
            Arc::new(StorageMask::new(1)),
        ))
    }

    #[test]
    fn test_read_converters_reject_client_to_layer() {
        let converters = core().read_converters(0);
        assert!(converters.units.client_to_layer(7).unwrap_err().is_internal());
        assert!(converters
            .file_systems
            .client_to_layer(&FileSystem::local())
            .unwrap_err()
            .is_internal());
        assert!(converters
            .file_paths
            .client_to_layer(7, 0)
            .unwrap_err()
            .is_internal());
    }

    #[test]
    fn test_write_converters_reject_layer_to_client() {
        let converters = core().write_converters(0);
        assert!(converters.units.layer_to_client(0).unwrap_err().is_internal());
        assert!(converters
            .file_systems
            .layer_to_client(0)
            .unwrap_err()
            .is_internal());
        assert!(converters
            .file_paths
            .layer_to_client(7, 0)
            .unwrap_err()
            .is_internal());
    }

    #[test]
    fn test_write_converter_registers_known_client_unit() {
        let core = core();
        let short = core
            .client_units
            .get_unit_id(&UnitDescriptor::new("proj", FileSystem::local()));
        let client = core.mask.layer_to_client(short);
        let converters = core.write_converters(0);

        assert_eq!(converters.units.client_to_layer(client).unwrap(), 0);
        assert_eq!(converters.units.client_to_layer(-1).unwrap(), -1);
        assert!(matches!(
            converters.units.client_to_layer(core.mask.layer_to_client(99)),
            Err(Error::UnknownUnit(_))
        ));
        assert_eq!(
            converters
                .file_systems
                .client_to_layer(&FileSystem::new("remote://h"))
                .unwrap(),
            1
        );
    }

    /// Identity ids with room for a single unit
    struct SingleUnit;

    impl UnitsConverter for SingleUnit {
        fn client_to_layer(&self, client_unit_id: i32) -> i32 {
            client_unit_id
        }

        fn layer_to_client(&self, short_unit_id: i32) -> i32 {
            short_unit_id
        }

        fn max_short_unit_id(&self) -> i32 {
            unitrepo_core::FIRST_UNIT_ID
        }
    }

    #[test]
    fn test_lazy_registration_stops_when_ids_run_out() {
        let layer = Arc::new(MemoryLayer::new(LayerDescriptor::writable("memory:test")));
        let write = layer.write_capability().unwrap();
        write.register_new_unit(&UnitDescriptor::new("a", FileSystem::local())).unwrap();
        write.register_new_unit(&UnitDescriptor::new("b", FileSystem::local())).unwrap();
        let core = Arc::new(StorageCore::new(
            StorageConfig::for_testing(),
            vec![layer as Arc<dyn Layer>],
            RepositoryMapper::new(),
            Arc::new(SingleUnit),
        ));
        let converters = core.read_converters(0);

        assert_eq!(converters.units.layer_to_client(0).unwrap(), 7);
        assert!(matches!(
            converters.units.layer_to_client(1),
            Err(Error::UnitIdsExhausted(7))
        ));
        assert_eq!(core.client_units.len(), 1);
    }

    #[test]
    fn test_unknown_layer_unit_fires_diagnostic_once() {
        let core = core();
        let converters = core.read_converters(0);
        assert_eq!(converters.units.layer_to_client(5).unwrap(), NOT_IN_LAYER);
        assert!(core
            .diagnostics
            .has_fired(conditions::UNIT_READ_LAYER_TO_CLIENT));
        assert_eq!(converters.units.layer_to_client(5).unwrap(), NOT_IN_LAYER);
        assert!(converters.file_systems.layer_to_client(3).is_err());
    }
}
