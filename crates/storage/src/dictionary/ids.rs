//! Assign-once id dictionaries
//!
//! A dictionary hands out a dense integer id the first time it sees a
//! value and returns the same id forever after. The issuing counter never
//! goes back, so an id stays unique even after `remove`: ids may already be
//! persisted by a layer.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::hash::Hash;
use unitrepo_core::{FileSystem, UnitDescriptor, FIRST_FILE_SYSTEM_ID, FIRST_UNIT_ID};

struct IdTable<T> {
    ids: FxHashMap<T, i32>,
    values: BTreeMap<i32, T>,
    next_id: i32,
}

/// Generic assign-once dictionary behind a single lock
pub struct IdDictionary<T> {
    inner: Mutex<IdTable<T>>,
}

impl<T: Clone + Eq + Hash> IdDictionary<T> {
    /// Create a dictionary whose first id is `first_id`
    pub fn new(first_id: i32) -> Self {
        Self {
            inner: Mutex::new(IdTable {
                ids: FxHashMap::default(),
                values: BTreeMap::new(),
                next_id: first_id,
            }),
        }
    }

    /// Existing id of `value`, or a freshly assigned one
    pub fn get_id(&self, value: &T) -> i32 {
        let mut table = self.inner.lock();
        if let Some(&id) = table.ids.get(value) {
            return id;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.ids.insert(value.clone(), id);
        table.values.insert(id, value.clone());
        id
    }

    /// Existing id of `value`, or a fresh one if it does not exceed `max_id`
    ///
    /// Returns `None` once the counter has passed `max_id`; the counter is
    /// left untouched.
    pub fn get_id_within(&self, value: &T, max_id: i32) -> Option<i32> {
        let mut table = self.inner.lock();
        if let Some(&id) = table.ids.get(value) {
            return Some(id);
        }
        if table.next_id > max_id {
            return None;
        }
        let id = table.next_id;
        table.next_id += 1;
        table.ids.insert(value.clone(), id);
        table.values.insert(id, value.clone());
        Some(id)
    }

    /// Id of `value` without assigning one
    pub fn find_id(&self, value: &T) -> Option<i32> {
        self.inner.lock().ids.get(value).copied()
    }

    /// Value registered under `id`
    pub fn get_value(&self, id: i32) -> Option<T> {
        self.inner.lock().values.get(&id).cloned()
    }

    /// Whether `value` has an id
    pub fn contains(&self, value: &T) -> bool {
        self.inner.lock().ids.contains_key(value)
    }

    /// Unregister `id`; the id is never issued again
    pub fn remove(&self, id: i32) -> Option<T> {
        let mut table = self.inner.lock();
        let value = table.values.remove(&id)?;
        table.ids.remove(&value);
        Some(value)
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<i32> {
        self.inner.lock().values.keys().copied().collect()
    }

    /// Registered (id, value) pairs in ascending id order
    pub fn entries(&self) -> Vec<(i32, T)> {
        self.inner
            .lock()
            .values
            .iter()
            .map(|(id, v)| (*id, v.clone()))
            .collect()
    }

    /// Number of registered values
    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unit descriptor to short client unit id
pub struct UnitDescriptorsDictionary {
    inner: IdDictionary<UnitDescriptor>,
}

impl UnitDescriptorsDictionary {
    /// Create an empty dictionary; ids start at [`FIRST_UNIT_ID`]
    pub fn new() -> Self {
        Self {
            inner: IdDictionary::new(FIRST_UNIT_ID),
        }
    }

    /// Existing or newly assigned short id of a unit
    pub fn get_unit_id(&self, descriptor: &UnitDescriptor) -> i32 {
        self.inner.get_id(descriptor)
    }

    /// Like [`get_unit_id`](Self::get_unit_id), but never assigns an id
    /// above `max_unit_id`
    pub fn get_unit_id_within(&self, descriptor: &UnitDescriptor, max_unit_id: i32) -> Option<i32> {
        self.inner.get_id_within(descriptor, max_unit_id)
    }

    /// Descriptor registered under a short id
    pub fn get_unit_descriptor(&self, unit_id: i32) -> Option<UnitDescriptor> {
        self.inner.get_value(unit_id)
    }

    /// Whether the descriptor has an id, without assigning one
    pub fn contains(&self, descriptor: &UnitDescriptor) -> bool {
        self.inner.contains(descriptor)
    }

    /// Unregister a unit; its id is not reused
    pub fn remove(&self, unit_id: i32) -> Option<UnitDescriptor> {
        self.inner.remove(unit_id)
    }

    /// Registered short ids
    pub fn unit_ids(&self) -> Vec<i32> {
        self.inner.ids()
    }

    /// Registered (short id, descriptor) pairs
    pub fn entries(&self) -> Vec<(i32, UnitDescriptor)> {
        self.inner.entries()
    }

    /// Number of registered units
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no unit is registered
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for UnitDescriptorsDictionary {
    fn default() -> Self {
        Self::new()
    }
}

/// File system to client file system id
pub struct FileSystemsDictionary {
    inner: IdDictionary<FileSystem>,
}

impl FileSystemsDictionary {
    /// Create an empty dictionary; ids start at [`FIRST_FILE_SYSTEM_ID`]
    pub fn new() -> Self {
        Self {
            inner: IdDictionary::new(FIRST_FILE_SYSTEM_ID),
        }
    }

    /// Existing or newly assigned id of a file system
    pub fn get_file_system_id(&self, file_system: &FileSystem) -> i32 {
        self.inner.get_id(file_system)
    }

    /// Id of a file system without assigning one
    pub fn find_file_system_id(&self, file_system: &FileSystem) -> Option<i32> {
        self.inner.find_id(file_system)
    }

    /// File system registered under an id
    pub fn get_file_system(&self, id: i32) -> Option<FileSystem> {
        self.inner.get_value(id)
    }

    /// Whether the file system has an id
    pub fn contains(&self, file_system: &FileSystem) -> bool {
        self.inner.contains(file_system)
    }

    /// Registered (id, file system) pairs
    pub fn entries(&self) -> Vec<(i32, FileSystem)> {
        self.inner.entries()
    }

    /// Number of registered file systems
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no file system is registered
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Default for FileSystemsDictionary {
    fn default() -> Self {
        Self::new()
    }
}
