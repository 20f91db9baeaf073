//! One-shot diagnostics
//!
//! Corrupted repository state tends to persist for the rest of a session.
//! The latch lets the first occurrence of a condition log a full storage
//! dump and silences every later occurrence of the same condition.

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// Conditions that trigger a one-shot storage dump
pub mod conditions {
    /// A layer unit id with no descriptor in the layer's units table
    pub const UNIT_READ_LAYER_TO_CLIENT: &str = "unit_read_converter.layer_to_client";
    /// A layer file system index with no entry in the layer's table
    pub const FS_READ_LAYER_TO_CLIENT: &str = "fs_read_converter.layer_to_client";
    /// A unit id that resolves to no client descriptor
    pub const UNKNOWN_CLIENT_UNIT: &str = "storage.unknown_client_unit";
}

/// Per-storage latch keyed by condition name
#[derive(Debug, Default)]
pub struct DiagnosticLatch {
    fired: Mutex<FxHashSet<&'static str>>,
}

impl DiagnosticLatch {
    /// Create a latch with nothing fired
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` the first time `condition` is reported, `false` afterwards
    pub fn first(&self, condition: &'static str) -> bool {
        self.fired.lock().insert(condition)
    }

    /// Whether `condition` was reported already
    pub fn has_fired(&self, condition: &'static str) -> bool {
        self.fired.lock().contains(condition)
    }
}
