/*
 * Copyright 2018 Bitwise IO, Inc.
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

//! Layered transactional state storage.
//!
//! Every storage tier speaks the same small vocabulary, split into one trait
//! per capability so a tier only implements what it genuinely supports and
//! the schedulers stay generic over trait bounds rather than dispatching
//! through a vtable on the hot path:
//!
//! * [`StateRead`] for point and batched lookups
//! * [`StateWrite`] for writes and logical/physical removal
//! * [`StateRange`] for ascending iteration, refusable per tier
//! * [`StateMerge`] for folding another tier's contents in, atomically per
//!   backend batch
//!
//! Concrete tiers live in the submodules: the ordered in-memory tier
//! ([`memory`]), the sharded MRU cache ([`cache`]), the persistent tier over
//! an opaque ordered KV engine ([`backend`]) and the layered stack with its
//! forked views ([`layered`]).  The [`journal`] and [`tracker`] modules wrap
//! any tier with undo logging and read/write-set recording respectively.

pub mod backend;
pub mod cache;
pub mod error;
pub mod journal;
pub mod layered;
pub mod memory;
pub mod tracker;

use std::fmt;

pub use crate::storage::error::StorageError;

/// A state address: a short ASCII table namespace plus an opaque byte key.
///
/// Keys order lexicographically by `(table, key)`.  Table names must not
/// contain a NUL byte; the persistent tier uses NUL as an order-preserving
/// separator when flattening the pair into a single engine key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateKey {
    table: String,
    key: Vec<u8>,
}

impl StateKey {
    pub fn new<T: Into<String>, K: Into<Vec<u8>>>(table: T, key: K) -> Self {
        StateKey {
            table: table.into(),
            key: key.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Approximate in-memory footprint, used by the MRU cache's byte bound.
    pub fn size_hint(&self) -> usize {
        self.table.len() + self.key.len()
    }
}

impl fmt::Debug for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.table, hex::encode(&self.key))
    }
}

/// Whether an entry holds live data or marks a deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Normal,
    Deleted,
}

/// A stored value plus its status.
///
/// Tombstones (`Deleted`) are first-class entries in tiers with logical
/// deletion: a lookup that hits one reports the key as present at that tier,
/// which makes the hit definitive and shadows anything in older tiers.  The
/// view boundary translates tombstones to "absent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    status: EntryStatus,
    value: Vec<u8>,
}

impl Entry {
    pub fn new<V: Into<Vec<u8>>>(value: V) -> Self {
        Entry {
            status: EntryStatus::Normal,
            value: value.into(),
        }
    }

    pub fn tombstone() -> Self {
        Entry {
            status: EntryStatus::Deleted,
            value: Vec::new(),
        }
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn is_deleted(&self) -> bool {
        self.status == EntryStatus::Deleted
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The live value, or `None` for a tombstone.
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self.status {
            EntryStatus::Normal => Some(self.value),
            EntryStatus::Deleted => None,
        }
    }

    /// Approximate in-memory footprint, used by the MRU cache's byte bound.
    pub fn size_hint(&self) -> usize {
        self.value.len() + 1
    }
}

/// Items yielded by [`StateRange::range`]: the value is `None` for a
/// tombstone so mergers can propagate deletions downward.
pub type RangeIter = Box<dyn Iterator<Item = (StateKey, Option<Vec<u8>>)> + Send>;

/// Read access to a storage tier.
pub trait StateRead: Send + Sync {
    /// Returns the entry stored at the key: a live value, a tombstone, or
    /// `None` when this tier knows nothing about the key.
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError>;

    /// Batched lookup; the result preserves the input order and length.
    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        keys.iter().map(|key| self.read_one(key)).collect()
    }

    fn exists_one(&self, key: &StateKey) -> Result<bool, StorageError> {
        Ok(self.read_one(key)?.is_some())
    }

    /// The live value at the key, mapping tombstones to `None`.
    fn read_value(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read_one(key)?.and_then(Entry::into_value))
    }
}

/// Write access to a storage tier.
///
/// All writers take `&self`; tiers that need exclusion lock internally so
/// they can sit behind shared handles (views reference-count the tiers they
/// observe).
pub trait StateWrite: Send + Sync {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError>;

    /// Writes every pair; `keys` and `values` must have equal length.
    fn write_some(&self, keys: Vec<StateKey>, values: Vec<Entry>) -> Result<(), StorageError> {
        if keys.len() != values.len() {
            return Err(StorageError::invariant(format!(
                "write_some called with {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        for (key, value) in keys.into_iter().zip(values) {
            self.write_one(key, value)?;
        }
        Ok(())
    }

    /// Removes the keys: a logical-deletion tier writes tombstones, other
    /// tiers erase.
    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError>;

    fn remove_one(&self, key: StateKey) -> Result<(), StorageError> {
        self.remove_some(vec![key])
    }
}

/// Ascending iteration over a tier's contents.
pub trait StateRange {
    /// Iterates entries with keys in `[from, to)` in ascending order; an
    /// unbounded side is expressed with `None`.
    fn range(
        &self,
        from: Option<&StateKey>,
        to: Option<&StateKey>,
    ) -> Result<RangeIter, StorageError>;
}

/// Folding the full contents of another tier into this one.
pub trait StateMerge {
    /// Applies every entry of `from`'s range onto `self`; a tier backed by a
    /// persistent engine must apply the whole merge as one atomic batch.
    fn merge(&self, from: &dyn StateRange) -> Result<(), StorageError>;
}

impl<'a, T: StateRead + ?Sized> StateRead for &'a T {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        (**self).read_one(key)
    }

    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        (**self).read_some(keys)
    }

    fn exists_one(&self, key: &StateKey) -> Result<bool, StorageError> {
        (**self).exists_one(key)
    }

    fn read_value(&self, key: &StateKey) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).read_value(key)
    }
}

impl<'a, T: StateWrite + ?Sized> StateWrite for &'a T {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        (**self).write_one(key, entry)
    }

    fn write_some(&self, keys: Vec<StateKey>, values: Vec<Entry>) -> Result<(), StorageError> {
        (**self).write_some(keys, values)
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        (**self).remove_some(keys)
    }

    fn remove_one(&self, key: StateKey) -> Result<(), StorageError> {
        (**self).remove_one(key)
    }
}
