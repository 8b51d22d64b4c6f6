/*
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

//! The multi-layer storage stack and its forked views.
//!
//! A stack holds, newest to oldest: at most one mutable in-memory tier, any
//! number of frozen immutable tiers, the concurrent cache tier and the
//! persistent backend.  Block execution writes into the mutable tier; once a
//! block is done the tier is promoted to immutable and eventually folded down
//! into the cache and backend.
//!
//! Lookups resolve newest-first and stop at the first tier that answers; a
//! tombstone answer is just as definitive as a value and shadows everything
//! older.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::storage::cache::CacheStorage;
use crate::storage::memory::MemoryStorage;
use crate::storage::{Entry, StateKey, StateMerge, StateRange, StateRead, StateWrite, StorageError};

struct Layers {
    mutable: Option<Arc<MemoryStorage>>,
    /// Front is newest.
    immutables: VecDeque<Arc<MemoryStorage>>,
}

pub struct LayeredStorage<B> {
    layers: Mutex<Layers>,
    cache: Arc<CacheStorage>,
    backend: Arc<B>,
}

impl<B> LayeredStorage<B>
where
    B: StateRead + StateWrite + StateMerge,
{
    pub fn new(cache: CacheStorage, backend: B) -> Self {
        LayeredStorage {
            layers: Mutex::new(Layers {
                mutable: None,
                immutables: VecDeque::new(),
            }),
            cache: Arc::new(cache),
            backend: Arc::new(backend),
        }
    }

    fn lock_layers(&self) -> Result<std::sync::MutexGuard<'_, Layers>, StorageError> {
        self.layers
            .lock()
            .map_err(|err| StorageError::invariant(format!("layer stack lock poisoned: {}", err)))
    }

    /// Allocates a fresh mutable tier on top of the stack.
    pub fn new_mutable(&self) -> Result<(), StorageError> {
        let mut layers = self.lock_layers()?;
        if layers.mutable.is_some() {
            return Err(StorageError::invariant(
                "a mutable tier already exists; promote it before allocating another",
            ));
        }
        layers.mutable = Some(Arc::new(MemoryStorage::new()));
        Ok(())
    }

    /// The current mutable tier, if one exists.
    pub fn mutable_storage(&self) -> Result<Option<Arc<MemoryStorage>>, StorageError> {
        Ok(self.lock_layers()?.mutable.clone())
    }

    /// Freezes the current mutable tier as the newest immutable tier and
    /// clears the mutable slot.
    pub fn push_mutable_to_immutable_front(&self) -> Result<(), StorageError> {
        let mut layers = self.lock_layers()?;
        let mutable = layers.mutable.take().ok_or_else(|| {
            StorageError::invariant("no mutable tier to promote")
        })?;
        layers.immutables.push_front(mutable);
        Ok(())
    }

    /// Folds the oldest immutable tier into the cache and the backend, then
    /// removes it from the stack.
    ///
    /// The tier stays in place until the backend batch has landed, so a
    /// failure (including a retryable timeout) leaves every key still
    /// readable through the stack and the operation can simply be retried.
    pub fn merge_and_pop_immutable_back(&self) -> Result<(), StorageError> {
        let oldest = self
            .lock_layers()?
            .immutables
            .back()
            .cloned()
            .ok_or_else(|| StorageError::invariant("no immutable tier to merge"))?;

        self.cache.merge(oldest.as_ref() as &dyn StateRange)?;
        self.backend.merge(oldest.as_ref() as &dyn StateRange)?;

        debug!("merged immutable tier of {} entries into the backend", oldest.len());
        self.lock_layers()?.immutables.pop_back();
        Ok(())
    }

    /// The number of immutable tiers currently stacked.
    pub fn immutable_count(&self) -> Result<usize, StorageError> {
        Ok(self.lock_layers()?.immutables.len())
    }

    /// Produces a view pinning the current tiers.  With `with_mutable` the
    /// view also sees (and can write through to) the mutable tier, which must
    /// exist in that case.
    pub fn fork(&self, with_mutable: bool) -> Result<View<B>, StorageError> {
        let layers = self.lock_layers()?;
        let mutable = if with_mutable {
            Some(layers.mutable.clone().ok_or_else(|| {
                StorageError::invariant("cannot fork with a mutable tier: none exists")
            })?)
        } else {
            None
        };
        Ok(View {
            mutable,
            immutables: layers.immutables.iter().cloned().collect(),
            cache: Arc::clone(&self.cache),
            backend: Arc::clone(&self.backend),
        })
    }
}

/// A pinned snapshot of the layer stack.
///
/// Views are cheap to create and reference-count the tiers they observe, so
/// a tier stays alive (and readable) for as long as any view still uses it,
/// even after it has been merged out of the stack.
pub struct View<B> {
    mutable: Option<Arc<MemoryStorage>>,
    /// Newest first.
    immutables: Vec<Arc<MemoryStorage>>,
    cache: Arc<CacheStorage>,
    backend: Arc<B>,
}

impl<B> Clone for View<B> {
    fn clone(&self) -> Self {
        View {
            mutable: self.mutable.clone(),
            immutables: self.immutables.clone(),
            cache: Arc::clone(&self.cache),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: StateRead> View<B> {
    fn mutable_tier(&self) -> Result<&MemoryStorage, StorageError> {
        self.mutable
            .as_deref()
            .ok_or_else(|| StorageError::invariant("view has no mutable tier to write to"))
    }
}

impl<B: StateRead> StateRead for View<B> {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        if let Some(mutable) = &self.mutable {
            if let Some(entry) = mutable.read_one(key)? {
                return Ok(Some(entry));
            }
        }
        for immutable in &self.immutables {
            if let Some(entry) = immutable.read_one(key)? {
                return Ok(Some(entry));
            }
        }
        if let Some(entry) = self.cache.read_one(key)? {
            return Ok(Some(entry));
        }
        match self.backend.read_one(key)? {
            Some(entry) => {
                // Read-fill: keep the hot key close for the rest of the
                // block.  Merge-downs are serialized behind this value, so
                // the fill can never mask a newer write.
                self.cache.write_one(key.clone(), entry.clone())?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        let mut results: Vec<Option<Entry>> = vec![None; keys.len()];
        let mut missing: Vec<usize> = Vec::new();

        'keys: for (index, key) in keys.iter().enumerate() {
            if let Some(mutable) = &self.mutable {
                if let Some(entry) = mutable.read_one(key)? {
                    results[index] = Some(entry);
                    continue 'keys;
                }
            }
            for immutable in &self.immutables {
                if let Some(entry) = immutable.read_one(key)? {
                    results[index] = Some(entry);
                    continue 'keys;
                }
            }
            if let Some(entry) = self.cache.read_one(key)? {
                results[index] = Some(entry);
                continue 'keys;
            }
            missing.push(index);
        }

        if !missing.is_empty() {
            // One engine round trip for everything the in-memory tiers did
            // not answer.
            let backend_keys: Vec<StateKey> =
                missing.iter().map(|index| keys[*index].clone()).collect();
            let entries = self.backend.read_some(&backend_keys)?;
            for (index, entry) in missing.into_iter().zip(entries) {
                if let Some(entry) = &entry {
                    self.cache.write_one(keys[index].clone(), entry.clone())?;
                }
                results[index] = entry;
            }
        }

        Ok(results)
    }
}

impl<B: StateRead> StateWrite for View<B> {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        self.mutable_tier()?.write_one(key, entry)
    }

    fn write_some(&self, keys: Vec<StateKey>, values: Vec<Entry>) -> Result<(), StorageError> {
        self.mutable_tier()?.write_some(keys, values)
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        self.mutable_tier()?.remove_some(keys)
    }
}

/// A private mutable tier stacked on top of a shared base.
///
/// The parallel scheduler gives each speculative chunk one of these: writes
/// land in the local tier, reads see local state first (read-your-writes)
/// and fall through to the base otherwise.
pub struct OverlayStorage<S> {
    local: MemoryStorage,
    base: S,
}

impl<S: StateRead> OverlayStorage<S> {
    pub fn new(base: S) -> Self {
        OverlayStorage {
            local: MemoryStorage::new(),
            base,
        }
    }

    /// The overlay's private tier.
    pub fn local(&self) -> &MemoryStorage {
        &self.local
    }
}

impl<S: StateRead> StateRead for OverlayStorage<S> {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        if let Some(entry) = self.local.read_one(key)? {
            return Ok(Some(entry));
        }
        self.base.read_one(key)
    }
}

impl<S: StateRead> StateWrite for OverlayStorage<S> {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        self.local.write_one(key, entry)
    }

    fn write_some(&self, keys: Vec<StateKey>, values: Vec<Entry>) -> Result<(), StorageError> {
        self.local.write_some(keys, values)
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        self.local.remove_some(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::btree::BTreeDatabase;
    use crate::storage::backend::BackendStorage;

    fn key(name: &str) -> StateKey {
        StateKey::new("t_test", name.as_bytes().to_vec())
    }

    fn new_stack() -> LayeredStorage<BackendStorage> {
        LayeredStorage::new(
            CacheStorage::unbounded(),
            BackendStorage::new(Box::new(BTreeDatabase::new())),
        )
    }

    #[test]
    fn only_one_mutable_tier_at_a_time() {
        let stack = new_stack();
        stack.new_mutable().expect("first new_mutable failed");
        assert!(matches!(
            stack.new_mutable(),
            Err(StorageError::Invariant(_))
        ));

        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");
        stack.new_mutable().expect("new_mutable after promotion failed");
    }

    #[test]
    fn newest_tier_wins_the_lookup() {
        let stack = new_stack();

        // Oldest immutable says 1.
        stack.new_mutable().expect("new_mutable failed");
        stack
            .mutable_storage()
            .expect("lock failed")
            .expect("no mutable")
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");

        // Newer immutable says 2.
        stack.new_mutable().expect("new_mutable failed");
        stack
            .mutable_storage()
            .expect("lock failed")
            .expect("no mutable")
            .write_one(key("a"), Entry::new(b"2".to_vec()))
            .expect("write failed");
        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");

        let view = stack.fork(false).expect("fork failed");
        assert_eq!(
            view.read_value(&key("a")).expect("read failed"),
            Some(b"2".to_vec())
        );
    }

    #[test]
    fn tombstone_in_a_newer_tier_shadows_older_values() {
        let stack = new_stack();
        stack.new_mutable().expect("new_mutable failed");
        stack
            .mutable_storage()
            .expect("lock failed")
            .expect("no mutable")
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");

        stack.new_mutable().expect("new_mutable failed");
        let view = stack.fork(true).expect("fork failed");
        view.remove_one(key("a")).expect("remove failed");

        // The tier hit is the tombstone, which is definitive.
        assert_eq!(view.read_value(&key("a")).expect("read failed"), None);
        let entry = view
            .read_one(&key("a"))
            .expect("read failed")
            .expect("expected tombstone hit");
        assert!(entry.is_deleted());
    }

    #[test]
    fn writes_require_a_mutable_view() {
        let stack = new_stack();
        let view = stack.fork(false).expect("fork failed");
        assert!(matches!(
            view.write_one(key("a"), Entry::new(b"1".to_vec())),
            Err(StorageError::Invariant(_))
        ));
    }

    #[test]
    fn merge_down_reaches_cache_and_backend() {
        let stack = new_stack();
        stack.new_mutable().expect("new_mutable failed");
        {
            let mutable = stack
                .mutable_storage()
                .expect("lock failed")
                .expect("no mutable");
            mutable
                .write_one(key("k"), Entry::new(b"1".to_vec()))
                .expect("write failed");
            mutable.remove_one(key("j")).expect("remove failed");
        }
        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");
        assert_eq!(stack.immutable_count().expect("count failed"), 1);

        stack
            .merge_and_pop_immutable_back()
            .expect("merge-down failed");
        assert_eq!(stack.immutable_count().expect("count failed"), 0);

        // A fresh view of just [cache, backend] sees the merged state.
        let view = stack.fork(false).expect("fork failed");
        assert_eq!(
            view.read_value(&key("k")).expect("read failed"),
            Some(b"1".to_vec())
        );
        assert_eq!(view.read_value(&key("j")).expect("read failed"), None);
    }

    #[test]
    fn merge_down_without_an_immutable_tier_is_an_error() {
        let stack = new_stack();
        assert!(matches!(
            stack.merge_and_pop_immutable_back(),
            Err(StorageError::Invariant(_))
        ));
    }

    #[test]
    fn batched_view_reads_span_all_tiers() {
        let stack = new_stack();

        // Seed the backend directly.
        stack
            .backend
            .write_one(key("backend"), Entry::new(b"b".to_vec()))
            .expect("write failed");

        stack.new_mutable().expect("new_mutable failed");
        let view = stack.fork(true).expect("fork failed");
        view.write_one(key("mutable"), Entry::new(b"m".to_vec()))
            .expect("write failed");

        let values = view
            .read_some(&[key("mutable"), key("missing"), key("backend")])
            .expect("read_some failed");
        assert_eq!(
            values,
            vec![
                Some(Entry::new(b"m".to_vec())),
                None,
                Some(Entry::new(b"b".to_vec())),
            ]
        );

        // The backend hit was pulled into the cache.
        assert_eq!(
            stack
                .cache
                .read_value(&key("backend"))
                .expect("read failed"),
            Some(b"b".to_vec())
        );
    }

    #[test]
    fn views_pin_merged_tiers() {
        let stack = new_stack();
        stack.new_mutable().expect("new_mutable failed");
        stack
            .mutable_storage()
            .expect("lock failed")
            .expect("no mutable")
            .write_one(key("a"), Entry::new(b"1".to_vec()))
            .expect("write failed");
        stack
            .push_mutable_to_immutable_front()
            .expect("promotion failed");

        let view = stack.fork(false).expect("fork failed");
        stack
            .merge_and_pop_immutable_back()
            .expect("merge-down failed");

        // The old view still reads through its pinned immutable tier.
        assert_eq!(
            view.read_value(&key("a")).expect("read failed"),
            Some(b"1".to_vec())
        );
    }

    #[test]
    fn overlay_reads_its_own_writes_first() {
        let stack = new_stack();
        stack.new_mutable().expect("new_mutable failed");
        let view = stack.fork(true).expect("fork failed");
        view.write_one(key("a"), Entry::new(b"base".to_vec()))
            .expect("write failed");

        let overlay = OverlayStorage::new(&view);
        assert_eq!(
            overlay.read_value(&key("a")).expect("read failed"),
            Some(b"base".to_vec())
        );

        overlay
            .write_one(key("a"), Entry::new(b"local".to_vec()))
            .expect("write failed");
        assert_eq!(
            overlay.read_value(&key("a")).expect("read failed"),
            Some(b"local".to_vec())
        );

        // A local tombstone shadows the base value.
        overlay.remove_one(key("a")).expect("remove failed");
        assert_eq!(overlay.read_value(&key("a")).expect("read failed"), None);

        // The base view is untouched.
        assert_eq!(
            view.read_value(&key("a")).expect("read failed"),
            Some(b"base".to_vec())
        );
    }
}
