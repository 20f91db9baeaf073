//! Repository mapper
//!
//! Decides how a unit or a path seen on one side of a layer boundary looks
//! on the other side. Strategies are injected in order; the first strategy
//! with an answer wins, otherwise the mapper falls back to identity ("same
//! name, other file system" for units). The mapper never fails.

use std::sync::Arc;
use unitrepo_core::{FileSystem, UnitDescriptor};

/// Strategy recognizing equivalent units
pub trait UnitDescriptorMatcher: Send + Sync {
    /// Whether two unequal descriptors denote the same unit
    fn matches(&self, first: &UnitDescriptor, second: &UnitDescriptor) -> bool;

    /// Counterpart of `source` on `target_file_system`, if this strategy knows it
    fn destination_descriptor(
        &self,
        target_file_system: &FileSystem,
        source: &UnitDescriptor,
    ) -> Option<UnitDescriptor>;
}

/// Strategy rewriting file paths into a client's addressing scheme
pub trait FilePathMapper: Send + Sync {
    /// Path as the client unit should see it, if this strategy maps it
    fn map(&self, client_unit: &UnitDescriptor, source_path: &str) -> Option<String>;
}

/// Policy facade over the injected strategies
#[derive(Clone, Default)]
pub struct RepositoryMapper {
    matchers: Vec<Arc<dyn UnitDescriptorMatcher>>,
    path_mappers: Vec<Arc<dyn FilePathMapper>>,
}

impl RepositoryMapper {
    /// Mapper with no strategies: pure identity
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit matcher
    pub fn with_matcher(mut self, matcher: Arc<dyn UnitDescriptorMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Append a path mapper
    pub fn with_path_mapper(mut self, mapper: Arc<dyn FilePathMapper>) -> Self {
        self.path_mappers.push(mapper);
        self
    }

    /// Whether any unit matcher is installed
    ///
    /// Without one, two descriptors match only when they are equal.
    pub fn has_matchers(&self) -> bool {
        !self.matchers.is_empty()
    }

    /// Whether two descriptors denote the same unit
    pub fn matches(&self, first: &UnitDescriptor, second: &UnitDescriptor) -> bool {
        first == second || self.matchers.iter().any(|m| m.matches(first, second))
    }

    /// Client-side counterpart of a unit found in a layer
    pub fn map_to_client(
        &self,
        client_file_system: &FileSystem,
        layer_unit: &UnitDescriptor,
    ) -> UnitDescriptor {
        self.destination(client_file_system, layer_unit)
    }

    /// Layer-side counterpart of a client unit
    pub fn map_to_layer(
        &self,
        layer_file_system: &FileSystem,
        client_unit: &UnitDescriptor,
    ) -> UnitDescriptor {
        self.destination(layer_file_system, client_unit)
    }

    /// Path `source_path` as seen by `client_unit`
    pub fn map(&self, client_unit: &UnitDescriptor, source_path: &str) -> String {
        self.path_mappers
            .iter()
            .find_map(|m| m.map(client_unit, source_path))
            .unwrap_or_else(|| source_path.to_string())
    }

    fn destination(&self, target: &FileSystem, source: &UnitDescriptor) -> UnitDescriptor {
        self.matchers
            .iter()
            .find_map(|m| m.destination_descriptor(target, source))
            .unwrap_or_else(|| source.with_file_system(target.clone()))
    }
}

impl std::fmt::Debug for RepositoryMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryMapper")
            .field("matchers", &self.matchers.len())
            .field("path_mappers", &self.path_mappers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Treats `rfs://host` and `rfs://host:22` as one endpoint
    struct PortInsensitive;

    impl PortInsensitive {
        fn strip(fs: &FileSystem) -> &str {
            fs.uri().trim_end_matches(":22")
        }
    }

    impl UnitDescriptorMatcher for PortInsensitive {
        fn matches(&self, a: &UnitDescriptor, b: &UnitDescriptor) -> bool {
            a.name() == b.name() && Self::strip(a.file_system()) == Self::strip(b.file_system())
        }

        fn destination_descriptor(
            &self,
            _target: &FileSystem,
            _source: &UnitDescriptor,
        ) -> Option<UnitDescriptor> {
            None
        }
    }

    struct Renaming;

    impl UnitDescriptorMatcher for Renaming {
        fn matches(&self, _a: &UnitDescriptor, _b: &UnitDescriptor) -> bool {
            false
        }

        fn destination_descriptor(
            &self,
            target: &FileSystem,
            source: &UnitDescriptor,
        ) -> Option<UnitDescriptor> {
            source
                .name()
                .strip_prefix("remote-")
                .map(|n| UnitDescriptor::new(n, target.clone()))
        }
    }

    struct PrefixMapper;

    impl FilePathMapper for PrefixMapper {
        fn map(&self, _unit: &UnitDescriptor, path: &str) -> Option<String> {
            path.strip_prefix("/export").map(|p| format!("/home{}", p))
        }
    }

    #[test]
    fn test_identity_matching() {
        let mapper = RepositoryMapper::new();
        let a = UnitDescriptor::new("p", FileSystem::local());
        assert!(mapper.matches(&a, &a.clone()));
        assert!(!mapper.matches(&a, &a.with_file_system(FileSystem::new("rfs://h"))));
    }

    #[test]
    fn test_matcher_extends_equality() {
        let mapper = RepositoryMapper::new().with_matcher(Arc::new(PortInsensitive));
        let a = UnitDescriptor::new("p", FileSystem::new("rfs://host"));
        let b = UnitDescriptor::new("p", FileSystem::new("rfs://host:22"));
        assert!(mapper.matches(&a, &b));
    }

    #[test]
    fn test_default_destination_changes_file_system_only() {
        let mapper = RepositoryMapper::new();
        let layer_unit = UnitDescriptor::new("p", FileSystem::new("rfs://h"));
        let client = mapper.map_to_client(&FileSystem::local(), &layer_unit);
        assert_eq!(client, UnitDescriptor::new("p", FileSystem::local()));
    }

    #[test]
    fn test_first_answering_matcher_wins() {
        let mapper = RepositoryMapper::new()
            .with_matcher(Arc::new(PortInsensitive))
            .with_matcher(Arc::new(Renaming));
        let layer_unit = UnitDescriptor::new("remote-p", FileSystem::new("rfs://h"));
        let client = mapper.map_to_client(&FileSystem::local(), &layer_unit);
        assert_eq!(client.name(), "p");

        let plain = UnitDescriptor::new("q", FileSystem::local());
        assert_eq!(mapper.map_to_layer(&FileSystem::new("rfs://h"), &plain).name(), "q");
    }

    #[test]
    fn test_path_mapping_falls_back_to_identity() {
        let mapper = RepositoryMapper::new().with_path_mapper(Arc::new(PrefixMapper));
        let unit = UnitDescriptor::new("p", FileSystem::local());
        assert_eq!(mapper.map(&unit, "/export/src/a.c"), "/home/src/a.c");
        assert_eq!(mapper.map(&unit, "/tmp/b.c"), "/tmp/b.c");
    }
}
