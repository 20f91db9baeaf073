//! Storage mask
//!
//! Long client unit ids carry the storage id in their high bits so that ids
//! handed out by different storage sessions never collide:
//!
//! ```text
//! long = (storage_id << 16) | short
//! ```
//!
//! Short ids above [`MAX_SHORT_UNIT_ID`] do not fit; the storage refuses to
//! hand them out.

use unitrepo_core::UnitsConverter;

/// Bits reserved for the short unit id
pub const UNIT_ID_BITS: u32 = 16;

/// Largest storage id that keeps long ids positive
pub const MAX_STORAGE_ID: u16 = 0x7FFF;

/// Largest short unit id a long id can carry
pub const MAX_SHORT_UNIT_ID: i32 = (1 << UNIT_ID_BITS) - 1;

const SHORT_ID_MASK: i32 = MAX_SHORT_UNIT_ID;

/// Mask encoding a storage id into long unit ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageMask {
    storage_id: u16,
}

impl StorageMask {
    /// Create a mask for a storage id (must not exceed [`MAX_STORAGE_ID`])
    pub fn new(storage_id: u16) -> Self {
        debug_assert!(storage_id <= MAX_STORAGE_ID);
        Self { storage_id }
    }

    /// Storage id encoded by this mask
    pub fn storage_id(&self) -> u16 {
        self.storage_id
    }

    /// Storage id a long unit id was issued by
    pub fn storage_id_of(client_unit_id: i32) -> u16 {
        (client_unit_id >> UNIT_ID_BITS) as u16
    }
}

impl UnitsConverter for StorageMask {
    #[inline]
    fn client_to_layer(&self, client_unit_id: i32) -> i32 {
        client_unit_id & SHORT_ID_MASK
    }

    #[inline]
    fn layer_to_client(&self, short_unit_id: i32) -> i32 {
        debug_assert!((0..=SHORT_ID_MASK).contains(&short_unit_id));
        ((self.storage_id as i32) << UNIT_ID_BITS) | (short_unit_id & SHORT_ID_MASK)
    }

    fn max_short_unit_id(&self) -> i32 {
        MAX_SHORT_UNIT_ID
    }
}
