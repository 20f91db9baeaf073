//! Client-side dictionaries
//!
//! - [`UnitDescriptorsDictionary`]: unit descriptor to short unit id
//! - [`FileSystemsDictionary`]: file system to client file system id
//! - [`FilePathsDictionary`]: per-unit file path to file index

mod file_paths;
mod ids;

pub use file_paths::{is_wrong_path, wrong_path, FilePathsDictionary};
pub use ids::{FileSystemsDictionary, IdDictionary, UnitDescriptorsDictionary};
