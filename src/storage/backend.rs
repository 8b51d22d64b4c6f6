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

//! The persistent tier.
//!
//! `BackendStorage` adapts an opaque ordered KV engine to the storage
//! vocabulary.  Batched reads collapse into a single `multi_get`; writes and
//! merges build one atomic batch whose encoded size is estimated up front so
//! the engine can preallocate its write buffer.  There is no logical deletion
//! at this tier: tombstones arriving from above become engine deletes.

use std::time::{Duration, Instant};

use crate::database::{BatchOp, Database};
use crate::storage::{
    Entry, RangeIter, StateKey, StateMerge, StateRange, StateRead, StateWrite, StorageError,
};

/// Fixed per-batch header overhead assumed by the size estimate.
const BATCH_HEADER_SIZE: usize = 12;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// The byte length of a varint encoding of `v`.
fn varint_len(mut v: u64) -> usize {
    let mut len = 1;
    while v >= 128 {
        v >>= 7;
        len += 1;
    }
    len
}

/// The estimated encoded size of one batch entry:
/// `1 + varint(key_len) + key_len + varint(val_len) + val_len`.
fn batch_entry_size(key_len: usize, value_len: usize) -> usize {
    1 + varint_len(key_len as u64)
        + key_len
        + varint_len(value_len as u64)
        + value_len
}

/// Flattens a `StateKey` into one engine key, preserving lexicographic
/// order.  Table names are NUL-free ASCII, so `table 0x00 key` orders
/// exactly like `(table, key)`.
fn encode_key(key: &StateKey) -> Vec<u8> {
    let table = key.table().as_bytes();
    let mut encoded = Vec::with_capacity(table.len() + 1 + key.key().len());
    encoded.extend_from_slice(table);
    encoded.push(0x00);
    encoded.extend_from_slice(key.key());
    encoded
}

fn decode_key(encoded: &[u8]) -> Result<StateKey, StorageError> {
    let split = encoded
        .iter()
        .position(|byte| *byte == 0x00)
        .ok_or_else(|| StorageError::invariant("engine key missing table separator"))?;
    let table = std::str::from_utf8(&encoded[..split])
        .map_err(|err| StorageError::invariant(format!("engine key table not ASCII: {}", err)))?;
    Ok(StateKey::new(table, encoded[split + 1..].to_vec()))
}

pub struct BackendStorage {
    db: Box<dyn Database>,
    write_timeout: Duration,
}

impl BackendStorage {
    pub fn new(db: Box<dyn Database>) -> Self {
        BackendStorage {
            db,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Builds the batch for a set of entries, turning tombstones into engine
    /// deletes, and returns it with its estimated encoded size.
    fn build_batch<I>(&self, entries: I) -> (Vec<BatchOp>, usize)
    where
        I: IntoIterator<Item = (StateKey, Option<Vec<u8>>)>,
    {
        let mut size = BATCH_HEADER_SIZE;
        let mut ops = Vec::new();
        for (key, value) in entries {
            let key = encode_key(&key);
            match value {
                Some(value) => {
                    size += batch_entry_size(key.len(), value.len());
                    ops.push(BatchOp::Put { key, value });
                }
                None => {
                    size += batch_entry_size(key.len(), 0);
                    ops.push(BatchOp::Delete { key });
                }
            }
        }
        (ops, size)
    }

    fn timed_write(
        &self,
        operation: &'static str,
        ops: Vec<BatchOp>,
        size_hint: usize,
    ) -> Result<(), StorageError> {
        let start = Instant::now();
        self.db.write_batch(ops, size_hint)?;
        let elapsed = start.elapsed();
        if elapsed > self.write_timeout {
            return Err(StorageError::Timeout {
                operation,
                elapsed,
                limit: self.write_timeout,
            });
        }
        Ok(())
    }
}

impl StateRead for BackendStorage {
    fn read_one(&self, key: &StateKey) -> Result<Option<Entry>, StorageError> {
        let value = self.db.get(&encode_key(key))?;
        Ok(value.map(Entry::new))
    }

    fn read_some(&self, keys: &[StateKey]) -> Result<Vec<Option<Entry>>, StorageError> {
        let encoded: Vec<Vec<u8>> = keys.iter().map(encode_key).collect();
        let values = self.db.multi_get(&encoded)?;
        Ok(values
            .into_iter()
            .map(|value| value.map(Entry::new))
            .collect())
    }
}

impl StateWrite for BackendStorage {
    fn write_one(&self, key: StateKey, entry: Entry) -> Result<(), StorageError> {
        let (ops, size) = self.build_batch(Some((key, entry.into_value())));
        self.timed_write("write", ops, size)
    }

    fn write_some(&self, keys: Vec<StateKey>, values: Vec<Entry>) -> Result<(), StorageError> {
        if keys.len() != values.len() {
            return Err(StorageError::invariant(format!(
                "write_some called with {} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let (ops, size) = self.build_batch(
            keys.into_iter()
                .zip(values.into_iter().map(Entry::into_value)),
        );
        self.timed_write("write", ops, size)
    }

    fn remove_some(&self, keys: Vec<StateKey>) -> Result<(), StorageError> {
        let (ops, size) = self.build_batch(keys.into_iter().map(|key| (key, None)));
        self.timed_write("remove", ops, size)
    }
}

impl StateRange for BackendStorage {
    fn range(
        &self,
        from: Option<&StateKey>,
        to: Option<&StateKey>,
    ) -> Result<RangeIter, StorageError> {
        let lower = from.map(encode_key);
        let upper = to.map(encode_key);
        let iter = self.db.iter(lower.as_deref(), upper.as_deref())?;

        let entries = iter
            .map(|item| {
                let (key, value) = item.map_err(StorageError::Backend)?;
                Ok((decode_key(&key)?, Some(value)))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;
        Ok(Box::new(entries.into_iter()))
    }
}

impl StateMerge for BackendStorage {
    fn merge(&self, from: &dyn StateRange) -> Result<(), StorageError> {
        let (ops, size) = self.build_batch(from.range(None, None)?);
        if ops.is_empty() {
            return Ok(());
        }
        debug!(
            "merging {} entries into the backend (~{} bytes)",
            ops.len(),
            size
        );
        self.timed_write("merge", ops, size)
    }
}
