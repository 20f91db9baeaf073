//! Property tests for the client dictionaries

use proptest::prelude::*;
use std::collections::HashMap;

use unitrepo_core::{FileSystem, UnitDescriptor, FIRST_UNIT_ID};
use unitrepo_storage::{
    is_wrong_path, FilePathsDictionary, RepositoryDataInput, RepositoryDataOutput,
    UnitDescriptorsDictionary,
};

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,6}", 1..4).prop_map(|parts| format!("/{}.c", parts.join("/")))
}

proptest! {
    #[test]
    fn file_ids_are_stable_and_dense(paths in prop::collection::vec(path_strategy(), 0..64)) {
        let dict = FilePathsDictionary::new();
        let mut expected: HashMap<String, i32> = HashMap::new();
        for path in &paths {
            let before = dict.size();
            let id = dict.get_file_id(path, 0);
            match expected.get(path) {
                Some(&known) => {
                    prop_assert_eq!(id, known);
                    prop_assert_eq!(dict.size(), before);
                }
                None => {
                    prop_assert_eq!(id as usize, before);
                    prop_assert_eq!(dict.size(), before + 1);
                    expected.insert(path.clone(), id);
                }
            }
            prop_assert_eq!(&*dict.get_file_path(id), path.as_str());
        }
        prop_assert!(is_wrong_path(&dict.get_file_path(dict.size() as i32)));
    }

    #[test]
    fn file_table_survives_encoding(paths in prop::collection::vec(path_strategy(), 0..64)) {
        let dict = FilePathsDictionary::new();
        for path in &paths {
            dict.get_file_id(path, 0);
        }
        let mut out = RepositoryDataOutput::detached();
        dict.write(&mut out).unwrap();
        let mut input = RepositoryDataInput::detached(out.into_bytes());
        let copy = FilePathsDictionary::read(&mut input).unwrap();
        prop_assert_eq!(copy.to_list(), dict.to_list());
        prop_assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn unit_ids_are_never_reused(names in prop::collection::vec("[a-z]{1,8}", 1..32)) {
        let dict = UnitDescriptorsDictionary::new();
        let mut assigned: HashMap<String, i32> = HashMap::new();
        for name in &names {
            let unit = UnitDescriptor::new(name, FileSystem::local());
            let id = dict.get_unit_id(&unit);
            prop_assert!(id >= FIRST_UNIT_ID);
            if let Some(&known) = assigned.get(name) {
                prop_assert_eq!(id, known);
            }
            assigned.insert(name.clone(), id);
        }

        let mut removed = Vec::new();
        for (name, id) in &assigned {
            dict.remove(*id);
            removed.push(*id);
            let again = dict.get_unit_id(&UnitDescriptor::new(format!("{}-new", name), FileSystem::local()));
            prop_assert!(!removed.contains(&again));
            prop_assert!(!assigned.values().any(|v| *v == again));
        }
    }
}
