//! Layer factory registry
//!
//! The registry lets new layer kinds be plugged into a storage session
//! without modifying the orchestrator. Factories are asked in registration
//! order; the first one that handles a descriptor creates the layer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut registry = LayerFactoryRegistry::new();
//! registry.register(Arc::new(MemoryLayerFactory::new()));
//!
//! let layer = registry.create_layer(&LayerDescriptor::writable("memory:cache"));
//! ```

use std::sync::Arc;
use unitrepo_core::{Layer, LayerDescriptor, LayerFactory};

/// Ordered list of layer factories
#[derive(Clone, Default)]
pub struct LayerFactoryRegistry {
    factories: Vec<Arc<dyn LayerFactory>>,
}

impl LayerFactoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        LayerFactoryRegistry {
            factories: Vec::new(),
        }
    }

    /// Register a factory after the existing ones
    pub fn register(&mut self, factory: Arc<dyn LayerFactory>) {
        self.factories.push(factory);
    }

    /// Builder-style [`LayerFactoryRegistry::register`]
    pub fn with_factory(mut self, factory: Arc<dyn LayerFactory>) -> Self {
        self.register(factory);
        self
    }

    /// First factory that handles `descriptor`
    pub fn factory_for(&self, descriptor: &LayerDescriptor) -> Option<Arc<dyn LayerFactory>> {
        self.factories
            .iter()
            .find(|f| f.can_handle(descriptor))
            .cloned()
    }

    /// Check if some factory handles `descriptor`
    pub fn knows(&self, descriptor: &LayerDescriptor) -> bool {
        self.factories.iter().any(|f| f.can_handle(descriptor))
    }

    /// Create a layer with the first factory that handles `descriptor`
    pub fn create_layer(&self, descriptor: &LayerDescriptor) -> Option<Arc<dyn Layer>> {
        self.factory_for(descriptor)?.create_layer(descriptor)
    }

    /// Get the number of registered factories
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Clear all registered factories
    pub fn clear(&mut self) {
        self.factories.clear();
    }
}

impl std::fmt::Debug for LayerFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerFactoryRegistry")
            .field("factory_count", &self.factories.len())
            .finish()
    }
}
