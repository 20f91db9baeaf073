//! Repository data streams
//!
//! Every persisted object is an opaque byte buffer per key. The streams in
//! this module write and read those buffers and translate the references an
//! object embeds (unit ids, file systems, file indices) through the
//! converters of the layer the bytes belong to, so persisted data never
//! depends on client numbering.
//!
//! # Encoding
//!
//! ```text
//! i32 / u32        4 bytes LE
//! string           u32 LE byte length + UTF-8 bytes
//! string list      u32 LE count + strings in index order
//! unit id          i32, layer numbering
//! file system      i32, layer file system index
//! file index       i32, layer file index
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut out = storage.get_output_stream(&key)?;
//! out.write_utf("main")?;
//! out.write_unit_id(other_unit)?;
//! storage.write(out)?;
//!
//! if let Some(mut input) = storage.get_input_stream(&key) {
//!     let name = input.read_utf()?;
//!     let other_unit = input.read_unit_id()?;
//! }
//! ```

mod input;
mod output;

pub use input::RepositoryDataInput;
pub use output::RepositoryDataOutput;

use unitrepo_core::{LayerConverters, Result};

/// Upper bound for a single decoded string
pub const MAX_STRING_BYTES: usize = 16 * 1024 * 1024;

pub(crate) fn require_converters(converters: &Option<LayerConverters>) -> Result<&LayerConverters> {
    converters.as_ref().ok_or_else(|| {
        unitrepo_core::Error::internal("stream is not bound to layer converters")
    })
}
