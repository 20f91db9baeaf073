//! Repository addressing keys
//!
//! A [`Key`] addresses one persisted object independently of any layer: it
//! carries the client (masked) unit id. A [`LayerKey`] is the same address
//! with the unit id translated into one layer's own numbering. Layers only
//! ever see `LayerKey`s.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Persistence hint carried by every key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Behavior {
    /// Small objects, rarely rewritten
    Default,
    /// Large objects that are rewritten often
    LargeAndMutable,
}

/// What a key points at inside its unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum KeyShape {
    /// The unit's file path table
    FilePathsDictionary,
    /// Any other persisted object, discriminated by kind and name
    Named {
        /// Object kind (owned by the client code model)
        kind: u16,
        /// Object name within the unit
        name: Arc<str>,
    },
}

/// Layer-independent key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    unit_id: i32,
    behavior: Behavior,
    shape: KeyShape,
}

impl Key {
    /// Create a key for a named object in a unit
    pub fn named(unit_id: i32, kind: u16, name: impl AsRef<str>) -> Self {
        Self {
            unit_id,
            behavior: Behavior::Default,
            shape: KeyShape::Named {
                kind,
                name: Arc::from(name.as_ref()),
            },
        }
    }

    /// Key of the unit's file path table
    pub fn file_paths_dictionary(unit_id: i32) -> Self {
        Self {
            unit_id,
            behavior: Behavior::LargeAndMutable,
            shape: KeyShape::FilePathsDictionary,
        }
    }

    /// Override the persistence hint
    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Client unit id
    pub fn unit_id(&self) -> i32 {
        self.unit_id
    }

    /// Persistence hint
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// Key shape
    pub fn shape(&self) -> &KeyShape {
        &self.shape
    }

    /// Translate into a layer's unit id space
    pub fn to_layer_key(&self, unit_id_in_layer: i32) -> LayerKey {
        LayerKey {
            unit_id: unit_id_in_layer,
            behavior: self.behavior,
            shape: self.shape.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            KeyShape::FilePathsDictionary => write!(f, "FilePathsDictionary[unit={}]", self.unit_id),
            KeyShape::Named { kind, name } => {
                write!(f, "{}:{}[unit={}]", kind, name, self.unit_id)
            }
        }
    }
}

/// Key translated into one layer's unit id space
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct LayerKey {
    unit_id: i32,
    behavior: Behavior,
    shape: KeyShape,
}

impl LayerKey {
    /// Key of a unit's file path table inside a layer
    pub fn file_paths_dictionary(unit_id_in_layer: i32) -> Self {
        Self {
            unit_id: unit_id_in_layer,
            behavior: Behavior::LargeAndMutable,
            shape: KeyShape::FilePathsDictionary,
        }
    }

    /// Unit id inside the layer
    pub fn unit_id(&self) -> i32 {
        self.unit_id
    }

    /// Persistence hint
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    /// Key shape
    pub fn shape(&self) -> &KeyShape {
        &self.shape
    }

    /// Whether this key addresses a unit's file path table
    pub fn is_file_paths_dictionary(&self) -> bool {
        matches!(self.shape, KeyShape::FilePathsDictionary)
    }
}
