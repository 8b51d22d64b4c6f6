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

//! Undo logging for transactional storage access.
//!
//! `Rollbackable` wraps any readable/writable storage and journals the prior
//! image of every key before its first mutation since the most recent
//! savepoint.  Rolling back replays the journal in reverse, restoring each
//! prior image (a key that was absent is restored as a tombstone, which reads
//! the same through the view boundary).  Savepoints nest: any depth of the
//! executor may take its own and roll back to it without disturbing outer
//! frames.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::storage::{Entry, StateKey, StateRead, StateWrite, StorageError};

/// A journal position, as returned by [`Rollbackable::savepoint`].
pub type Savepoint = usize;

struct JournalEntry {
    key: StateKey,
    prior: Option<Entry>,
}

#[derive(Default)]
struct Journal {
    entries: Vec<JournalEntry>,
    /// Keys already journalled since the most recent savepoint.
    seen: HashSet<StateKey>,
}

pub struct Rollbackable<S> {
    inner: S,
    journal: Mutex<Journal>,
}

impl<S> Rollbackable<S>
where
    S: StateRead + StateWrite,
{
    pub fn new(inner: S) -> Self {
        Rollbackable {
            inner,
            journal: Mutex::new(Journal::default()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn lock_journal(&self) -> Result<std::sync::MutexGuard<'_, Journal>, StorageError> {
        self.journal
            .lock()
            .map_err(|err| StorageError::invariant(format!("journal lock poisoned: {}", err)))
    }

    /// Captures the current journal length.
    pub fn savepoint(&self) -> Result<Savepoint, StorageError> {
        let mut journal = self.lock_journal()?;
        journal.seen.clear();
        Ok(journal.entries.len())
    }

    /// Pops journal entries down to `savepoint`, restoring each recorded
    /// prior image.  Deterministic and proportional to the number of
    /// mutations since the savepoint.
    pub fn rollback(&self, savepoint: Savepoint) -> Result<(), StorageError> {
        let mut journal = self.lock_journal()?;
        while journal.entries.len() > savepoint {
            if let Some(JournalEntry { key, prior }) = journal.entries.pop() {
                match prior {
                    Some(entry) => self.inner.write_one(key, entry)?,
                    None => self.inner.write_one(key, Entry::tombstone())?,
                }
            }
        }
        journal.seen.clear();
        Ok(())
    }

    /// Discards the journal; recorded mutations can no longer be undone.
    pub fn commit(&self) -> Result<(), StorageError> {
        let mut journal = self.lock_journal()?;
        journal.entries.clear();
        journal.seen.clear();
        Ok(())
    }

    pub fn journal_len(&self) -> Result<usize, StorageError> {
        Ok(self.lock_journal()?.entries.len())
    }

    /// The distinct keys mutated since `savepoint`, in first-mutation order.
    pub fn changed_keys_since(&self, savepoint: Savepoint) -> Result<Vec<StateKey>, StorageError> {
        let journal = self.lock_journal()?;
        let mut keys = Vec::new();
        let mut distinct = HashSet::new();
        for entry in journal.entries.iter().skip(savepoint) {
            if distinct.insert(entry.key.clone()) {
                keys.push(entry.key.clone());
            }
        }
        Ok(keys)
    }

    /// Journals the shadowed value of `key` if this is its first mutation
    /// since the most recent savepoint.
    fn record(&self, key: &StateKey) -> Result<(), StorageError> {
        {
            let journal = self.lock_journal()?;
            if journal.seen.contains(key) {
                return Ok(());
            }
        }
        // Read outside the lock: within a transaction the journal has a
        // single writer, so the prior image cannot change underneath us.
        let prior = self.inner.read_one(key)?;
        let mut journal = self.lock_journal()?;
        if journal.seen.insert(key.clone()) {
            journal.entries.push(JournalEntry {
                key: key.clone(),
                prior,
            });
        }
        Ok(())
    }
}

impl<S: StateRead + StateWrite> StateRead for Rollbackable<S> {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        self.inner.read_one(key)
    }

    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        self.inner.read_some(keys)
    }
}

impl<S: StateRead + StateWrite> StateWrite for Rollbackable<S> {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        self.record(&key)?;
        self.inner.write_one(key, entry)
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        for key in &keys {
            self.record(key)?;
        }
        self.inner.remove_some(keys)
    }
}
