/*
 * Copyright 2019 Bitwise IO, Inc.
 * Copyright 2023 Cargill Incorporated
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 * -----------------------------------------------------------------------------
 */

//! The ordered in-memory tier.
//!
//! `MemoryStorage` backs the mutable and immutable layers of the stack as
//! well as the chunk-local overlays of the parallel scheduler.  It retains
//! tombstones, so a removal here shadows entries in older tiers.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::RwLock;

use crate::storage::{
    Entry, RangeIter, StateKey, StateMerge, StateRange, StateRead, StateWrite, StorageError,
};

#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<StateKey, Entry>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// The number of entries held, tombstones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_lock(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<StateKey, Entry>>, StorageError> {
        self.entries
            .read()
            .map_err(|err| StorageError::invariant(format!("memory tier lock poisoned: {}", err)))
    }

    fn write_lock(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<StateKey, Entry>>, StorageError> {
        self.entries
            .write()
            .map_err(|err| StorageError::invariant(format!("memory tier lock poisoned: {}", err)))
    }
}

impl StateRead for MemoryStorage {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        Ok(self.read_lock()?.get(key).cloned())
    }

    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        let entries = self.read_lock()?;
        Ok(keys.iter().map(|key| entries.get(key).cloned()).collect())
    }
}

impl StateWrite for MemoryStorage {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        self.write_lock()?.insert(key, entry);
        Ok(())
    }

    fn write_some(&self, keys: Vec<StateKey>, values: Vec<Entry>) -> Result<(), StorageError> {
        if keys.len() != values.len() {
            return Err(StorageError::invariant(format!(
                "write_some called with {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let mut entries = self.write_lock()?;
        for (key, value) in keys.into_iter().zip(values) {
            entries.insert(key, value);
        }
        Ok(())
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        let mut entries = self.write_lock()?;
        for key in keys {
            entries.insert(key, Entry::tombstone());
        }
        Ok(())
    }
}

impl StateRange for MemoryStorage {
    fn range(
        &self,
        from: Option<&StateKey>,
        to: Option<&StateKey>,
    ) -> Result<RangeIter, StorageError> {
        let entries = self.read_lock()?;

        let lower = match from {
            Some(key) => Included(key.clone()),
            None => Unbounded,
        };
        let upper = match to {
            Some(key) => Excluded(key.clone()),
            None => Unbounded,
        };

        // The cursor iterates a snapshot so a concurrent writer cannot alter
        // an iteration already handed out.
        let snapshot: Vec<(StateKey, Option<Vec<u8>>)> = entries
            .range((lower, upper))
            .map(|(key, entry)| (key.clone(), entry.clone().into_value()))
            .collect();

        Ok(Box::new(snapshot.into_iter()))
    }
}

impl StateMerge for MemoryStorage {
    fn merge(&self, from: &dyn StateRange) -> Result<(), StorageError> {
        let incoming = from.range(None, None)?;
        let mut entries = self.write_lock()?;
        for (key, value) in incoming {
            match value {
                Some(value) => entries.insert(key, Entry::new(value)),
                None => entries.insert(key, Entry::tombstone()),
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> StateKey {
        StateKey::new("t_test", name.as_bytes().to_vec())
    }

    #[test]
    fn write_read_roundtrip() {
        let storage = MemoryStorage::new();
        storage
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");

        assert_eq!(
            storage.read_one(&key("a")).expect("read failed"),
            Some(Entry::new(b"1".to_vec()))
        );
        assert_eq!(storage.read_one(&key("b")).expect("read failed"), None);
        assert!(storage.exists_one(&key("a")).expect("exists failed"));
    }

    #[test]
    fn read_some_preserves_order_and_length() {
        let storage = MemoryStorage::new();
        storage
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        storage
            .write_one(key("c"), Entry::new(b"3".to_vec()))
            .expect("write failed");

        let entries = storage
            .read_some(&[key("c"), key("b"), key("a")])
            .expect("read_some failed");
        assert_eq!(
            entries,
            vec![
                Some(Entry::new(b"3".to_vec())),
                None,
                Some(Entry::new(b"1".to_vec())),
            ]
        );
    }

    #[test]
    fn removal_leaves_a_tombstone() {
        let storage = MemoryStorage::new();
        storage
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        storage.remove_one(key("a")).expect("remove failed");

        // The tier still answers for the key, which is what shadows older
        // tiers; the value is gone.
        let entry = storage
            .read_one(&key("a"))
            .expect("read failed")
            .expect("expected tombstone");
        assert!(entry.is_deleted());
        assert_eq!(storage.read_value(&key("a")).expect("read failed"), None);
    }

    #[test]
    fn range_is_ordered_and_yields_none_for_tombstones() {
        let storage = MemoryStorage::new();
        storage
            .write_one(key("b"), Entry::new(b"2".to_vec()))
            .expect("write failed");
        storage
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        storage
            .write_one(key("d"), Entry::new(b"4".to_vec()))
            .expect("write failed");
        storage.remove_one(key("c")).expect("remove failed");

        let all: Vec<_> = storage
            .range(None, None)
            .expect("range failed")
            .collect();
        assert_eq!(
            all,
            vec![
                (key("a"), Some(b"1".to_vec())),
                (key("b"), Some(b"2".to_vec())),
                (key("c"), None),
                (key("d"), Some(b"4".to_vec())),
            ]
        );

        let bounded: Vec<_> = storage
            .range(Some(&key("b")), Some(&key("d")))
            .expect("range failed")
            .map(|(key, _)| key)
            .collect();
        assert_eq!(bounded, vec![key("b"), key("c")]);
    }

    #[test]
    fn merge_applies_values_and_deletions() {
        let from = MemoryStorage::new();
        from.write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        from.remove_one(key("b")).expect("remove failed");

        let to = MemoryStorage::new();
        to.write_one(key("b"), Entry::new(b"2".to_vec()))
            .expect("write failed");
        to.merge(&from).expect("merge failed");

        assert_eq!(
            to.read_value(&key("a")).expect("read failed"),
            Some(b"1".to_vec())
        );
        assert_eq!(to.read_value(&key("b")).expect("read failed"), None);

        // Merging an empty tier is a no-op.
        to.merge(&MemoryStorage::new()).expect("merge failed");
        assert_eq!(to.len(), 2);
    }
}
