//! Per-unit file path table
//!
//! Append-only vector of paths plus a reverse index. A path keeps its index
//! for the lifetime of the table; across sessions only as long as the layer
//! that persisted the table preserves its order.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::trace;
use unitrepo_core::Result;

use crate::codec::{RepositoryDataInput, RepositoryDataOutput};

static WRONG_PATH: Lazy<Arc<str>> = Lazy::new(|| Arc::from("<WRONG PATH>"));

/// Sentinel returned for a file index the table does not have
///
/// Compare with [`is_wrong_path`]; the sentinel is identified by identity,
/// not by its text.
pub fn wrong_path() -> Arc<str> {
    Arc::clone(&WRONG_PATH)
}

/// Whether `path` is the [`wrong_path`] sentinel
pub fn is_wrong_path(path: &Arc<str>) -> bool {
    Arc::ptr_eq(path, &WRONG_PATH)
}

#[derive(Default)]
struct PathTable {
    paths: Vec<Arc<str>>,
    index: FxHashMap<Arc<str>, i32>,
}

impl PathTable {
    fn push(&mut self, path: Arc<str>) -> i32 {
        let id = self.paths.len() as i32;
        self.index.entry(Arc::clone(&path)).or_insert(id);
        self.paths.push(path);
        id
    }
}

/// File path to file index table of one unit
#[derive(Default)]
pub struct FilePathsDictionary {
    inner: Mutex<PathTable>,
}

impl FilePathsDictionary {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding `paths` at their positions
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = PathTable::default();
        for path in paths {
            table.push(Arc::from(path.as_ref()));
        }
        Self {
            inner: Mutex::new(table),
        }
    }

    /// Read a table written by [`FilePathsDictionary::write`]
    pub fn read(input: &mut RepositoryDataInput) -> Result<Self> {
        Ok(Self::from_paths(input.read_str_list()?))
    }

    /// Path at `index`, or the [`wrong_path`] sentinel
    pub fn get_file_path(&self, index: i32) -> Arc<str> {
        let table = self.inner.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| table.paths.get(i))
            .cloned()
            .unwrap_or_else(wrong_path)
    }

    /// Existing index of `path`, or the index it is appended at
    pub fn get_file_id(&self, path: &str, unit_id_for_logging: i32) -> i32 {
        let mut table = self.inner.lock();
        if let Some(&id) = table.index.get(path) {
            return id;
        }
        let id = table.push(Arc::from(path));
        trace!(unit_id = unit_id_for_logging, file_id = id, path, "Registered file path");
        id
    }

    /// Number of paths
    pub fn size(&self) -> usize {
        self.inner.lock().paths.len()
    }

    /// Point-in-time copy of the paths in index order
    pub fn to_list(&self) -> Vec<Arc<str>> {
        self.inner.lock().paths.clone()
    }

    /// Write the table as an indexed list
    pub fn write(&self, output: &mut RepositoryDataOutput) -> Result<()> {
        let paths = self.to_list();
        output.write_str_list(&paths)
    }
}

impl std::fmt::Debug for FilePathsDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePathsDictionary")
            .field("size", &self.size())
            .finish()
    }
}
