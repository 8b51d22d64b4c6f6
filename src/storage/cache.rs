/*
 * Copyright 2022 Cargill Incorporated
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

//! The concurrent cache tier.
//!
//! The table is sharded so a writer only locks the shard its key hashes to.
//! In bounded mode each shard keeps an LRU usage list and evicts from the
//! tail whenever its byte budget is exceeded.  The cache does not retain
//! tombstones: removing a key erases it, so a subsequent miss falls through
//! to the persistent tier, and an evicted key is simply "unknown".

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use lru::LruCache;

use crate::storage::{
    Entry, RangeIter, StateKey, StateMerge, StateRange, StateRead, StateWrite, StorageError,
};

const SHARD_COUNT: usize = 16;

struct Shard {
    entries: LruCache<StateKey, Entry>,
    bytes: usize,
}

impl Shard {
    fn new() -> Self {
        Shard {
            entries: LruCache::unbounded(),
            bytes: 0,
        }
    }

    fn insert(&mut self, key: StateKey, entry: Entry, capacity: Option<usize>) {
        let key_size = key.size_hint();
        let entry_size = entry.size_hint();
        if let Some(replaced) = self.entries.put(key, entry) {
            // The key's own size is unchanged when overwriting.
            self.bytes -= replaced.size_hint();
            self.bytes += entry_size;
        } else {
            self.bytes += key_size + entry_size;
        }

        if let Some(capacity) = capacity {
            while self.bytes > capacity {
                match self.entries.pop_lru() {
                    Some((evicted_key, evicted_entry)) => {
                        self.bytes -= evicted_key.size_hint() + evicted_entry.size_hint();
                    }
                    None => break,
                }
            }
        }
    }

    fn remove(&mut self, key: &StateKey) {
        if let Some(entry) = self.entries.pop(key) {
            self.bytes -= key.size_hint() + entry.size_hint();
        }
    }
}

pub struct CacheStorage {
    shards: Vec<Mutex<Shard>>,
    /// Byte budget per shard; `None` disables eviction.
    shard_capacity: Option<usize>,
}

impl CacheStorage {
    /// A concurrent tier without eviction.
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    /// An MRU tier bounded to approximately `capacity` bytes across all
    /// shards.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Some((capacity / SHARD_COUNT).max(1)))
    }

    fn build(shard_capacity: Option<usize>) -> Self {
        CacheStorage {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::new())).collect(),
            shard_capacity,
        }
    }

    /// The number of cached entries across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().map(|shard| shard.entries.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The approximate number of bytes currently held.
    pub fn byte_size(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().map(|shard| shard.bytes).unwrap_or(0))
            .sum()
    }

    fn shard_for(&self, key: &StateKey) -> Result<std::sync::MutexGuard<'_, Shard>, StorageError> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let index = (hasher.finish() as usize) % self.shards.len();
        self.shards[index]
            .lock()
            .map_err(|err| StorageError::invariant(format!("cache shard lock poisoned: {}", err)))
    }
}

impl StateRead for CacheStorage {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        // `get` refreshes the entry's position in the usage list.
        Ok(self.shard_for(key)?.entries.get(key).cloned())
    }
}

impl StateWrite for CacheStorage {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        let mut shard = self.shard_for(&key)?;
        shard.insert(key, entry, self.shard_capacity);
        Ok(())
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        for key in keys {
            self.shard_for(&key)?.remove(&key);
        }
        Ok(())
    }
}

impl StateRange for CacheStorage {
    fn range(
        &self,
        _from: Option<&StateKey>,
        _to: Option<&StateKey>,
    ) -> Result<RangeIter, StorageError> {
        Err(StorageError::RangeUnsupported("cache"))
    }
}

impl StateMerge for CacheStorage {
    fn merge(&self, from: &dyn StateRange) -> Result<(), StorageError> {
        for (key, value) in from.range(None, None)? {
            match value {
                Some(value) => self.write_one(key, Entry::new(value))?,
                None => self.remove_one(key)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::sync::Arc;
    use std::thread;

    fn key(name: &str) -> StateKey {
        StateKey::new("t_test", name.as_bytes().to_vec())
    }

    #[test]
    fn write_read_remove() {
        let cache = CacheStorage::unbounded();
        cache
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        assert_eq!(
            cache.read_value(&key("a")).expect("read failed"),
            Some(b"1".to_vec())
        );

        cache.remove_one(key("a")).expect("remove failed");
        // Erased, not tombstoned: the key is now unknown here.
        assert_eq!(cache.read_one(&key("a")).expect("read failed"), None);
        assert_eq!(cache.byte_size(), 0);
    }

    #[test]
    fn range_is_refused() {
        let cache = CacheStorage::unbounded();
        assert!(matches!(
            cache.range(None, None),
            Err(StorageError::RangeUnsupported(_))
        ));
    }

    #[test]
    fn eviction_respects_byte_bound() {
        // One shard's worth of keys: use identical table/key sizes so the
        // arithmetic is predictable, and enough capacity for a few entries.
        let cache = CacheStorage::with_capacity(SHARD_COUNT * 64);
        for i in 0..200u32 {
            let key = StateKey::new("t_test", i.to_be_bytes().to_vec());
            cache
                .write_one(key, Entry::new(vec![0u8; 16]))
                .expect("write failed");
        }

        assert!(cache.byte_size() <= SHARD_COUNT * 64);
        assert!(cache.len() < 200);
    }

    #[test]
    fn recently_used_entries_survive_eviction() {
        let cache = CacheStorage::with_capacity(SHARD_COUNT * 128);
        let hot = key("hot");
        cache
            .write_one(hot.clone(), Entry::new(b"keep".to_vec()))
            .expect("write failed");

        for i in 0..500u32 {
            // Touch the hot key so it stays at the head of its shard's list.
            cache.read_one(&hot).expect("read failed");
            let key = StateKey::new("t_test", i.to_be_bytes().to_vec());
            cache
                .write_one(key, Entry::new(vec![0u8; 8]))
                .expect("write failed");
        }

        assert_eq!(
            cache.read_value(&hot).expect("read failed"),
            Some(b"keep".to_vec())
        );
    }

    #[test]
    fn merge_applies_values_and_erases_deletions() {
        let cache = CacheStorage::unbounded();
        cache
            .write_one(key("b"), Entry::new(b"old".to_vec()))
            .expect("write failed");

        let from = MemoryStorage::new();
        from.write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        from.remove_one(key("b")).expect("remove failed");

        cache.merge(&from).expect("merge failed");
        assert_eq!(
            cache.read_value(&key("a")).expect("read failed"),
            Some(b"1".to_vec())
        );
        assert_eq!(cache.read_one(&key("b")).expect("read failed"), None);
    }

    #[test]
    fn concurrent_writers_do_not_interfere() {
        let cache = Arc::new(CacheStorage::unbounded());
        let handles: Vec<_> = (0..4)
            .map(|worker: u32| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..100u32 {
                        let key = StateKey::new(
                            "t_test",
                            [worker.to_be_bytes(), i.to_be_bytes()].concat(),
                        );
                        cache
                            .write_one(key, Entry::new(i.to_be_bytes().to_vec()))
                            .expect("write failed");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        assert_eq!(cache.len(), 400);
    }
}
