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

//! Read/write-set recording for conflict detection.
//!
//! `TrackingStorage` decorates any readable/writable storage and records, per
//! key, whether the transaction behind it read or wrote the key.  The
//! decorator sits outside the tiers so anything can be wrapped without
//! modification, and it costs nothing when unused.  The `*_front` read
//! variants deliberately bypass recording for speculative peeks the caller
//! does not intend to conflict on.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::storage::{Entry, StateKey, StateRead, StateWrite, StorageError};

/// Per-key access flags, OR-merged across every access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadWriteFlag {
    pub read: bool,
    pub write: bool,
}

/// The accesses one transaction performed through its tracked view.
#[derive(Debug, Clone, Default)]
pub struct ReadWriteSet {
    flags: HashMap<StateKey, ReadWriteFlag>,
}

impl ReadWriteSet {
    fn record(&mut self, key: &StateKey, write: bool) {
        match self.flags.get_mut(key) {
            Some(flag) => {
                flag.write |= write;
                flag.read |= !write;
            }
            None => {
                self.flags.insert(
                    key.clone(),
                    ReadWriteFlag {
                        read: !write,
                        write,
                    },
                );
            }
        }
    }

    pub fn read(&self, key: &StateKey) -> bool {
        self.flags.get(key).map(|flag| flag.read).unwrap_or(false)
    }

    pub fn wrote(&self, key: &StateKey) -> bool {
        self.flags.get(key).map(|flag| flag.write).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &ReadWriteFlag)> {
        self.flags.iter()
    }

    /// Read-after-write: true iff this (later) transaction read a key that
    /// `earlier` wrote.  Write-after-write and write-after-read are resolved
    /// by the serial commit order and do not conflict by themselves.
    pub fn raw_conflict(&self, earlier: &ReadWriteSet) -> bool {
        if self.flags.is_empty() || earlier.flags.is_empty() {
            return false;
        }
        self.flags
            .iter()
            .any(|(key, flag)| flag.read && earlier.wrote(key))
    }

    /// Folds `other`'s write flags into this set; reads are not carried
    /// over.
    pub fn merge_write_set(&mut self, other: &ReadWriteSet) {
        for (key, flag) in &other.flags {
            if flag.write {
                self.record(key, true);
            }
        }
    }
}

pub struct TrackingStorage<S> {
    inner: S,
    set: Mutex<ReadWriteSet>,
}

impl<S> TrackingStorage<S>
where
    S: StateRead + StateWrite,
{
    pub fn new(inner: S) -> Self {
        TrackingStorage {
            inner,
            set: Mutex::new(ReadWriteSet::default()),
        }
    }

    fn lock_set(&self) -> Result<std::sync::MutexGuard<'_, ReadWriteSet>, StorageError> {
        self.set
            .lock()
            .map_err(|err| StorageError::invariant(format!("tracker lock poisoned: {}", err)))
    }

    /// A copy of the flags recorded so far.
    pub fn read_write_set(&self) -> Result<ReadWriteSet, StorageError> {
        Ok(self.lock_set()?.clone())
    }

    /// Consumes the tracker, yielding the recorded set.
    pub fn into_read_write_set(self) -> ReadWriteSet {
        self.set.into_inner().unwrap_or_else(|err| err.into_inner())
    }

    /// Reads without recording the access.
    pub fn read_one_front(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        self.inner.read_one(key)
    }

    /// Batched read without recording the accesses.
    pub fn read_some_front(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        self.inner.read_some(keys)
    }
}

impl<S: StateRead + StateWrite> StateRead for TrackingStorage<S> {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        self.lock_set()?.record(key, false);
        self.inner.read_one(key)
    }

    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        {
            let mut set = self.lock_set()?;
            for key in keys {
                set.record(key, false);
            }
        }
        self.inner.read_some(keys)
    }
}

impl<S: StateRead + StateWrite> StateWrite for TrackingStorage<S> {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        self.lock_set()?.record(&key, true);
        self.inner.write_one(key, entry)
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        {
            let mut set = self.lock_set()?;
            for key in &keys {
                set.record(key, true);
            }
        }
        self.inner.remove_some(keys)
    }
}
