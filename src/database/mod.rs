/*
 * Copyright 2018 Intel Corporation
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
 * ------------------------------------------------------------------------------
 */

//! The opaque ordered key-value engine underneath the persistent storage tier.
//!
//! The execution core only requires point gets, a batched multi-get, an atomic
//! batched write and ascending iteration over a key range; everything else
//! about the engine (compaction, files, recovery) is its own business.  Both
//! keys and values are opaque bytes and keys are ordered lexicographically.

pub mod btree;
pub mod error;
#[cfg(feature = "rocksdb-db")]
pub mod rocksdb;

pub use crate::database::error::DatabaseError;

/// A single operation within an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

pub type DatabaseIter<'a> =
    Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), DatabaseError>> + Send + 'a>;

/// An ordered byte-key KV engine.
///
/// Implementations must apply a `write_batch` atomically: either every
/// operation in the batch becomes visible or none does.  Readers may observe
/// the database either before or after a concurrent batch, never in between.
pub trait Database: Send + Sync {
    /// Returns the bytes stored at the given key, if present.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError>;

    /// Looks up every key in one engine round trip.  The result has the same
    /// length and order as `keys`; a missing key yields `None` rather than an
    /// error.
    fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, DatabaseError>;

    /// Applies the batch atomically.  `size_hint` is the caller's estimate of
    /// the encoded batch size in bytes; engines that preallocate their write
    /// buffer may use it, others are free to ignore it.
    fn write_batch(&self, ops: Vec<BatchOp>, size_hint: usize) -> Result<(), DatabaseError>;

    /// Iterates entries in ascending key order within `[from, to)`.  An
    /// unbounded side is expressed with `None`.
    fn iter<'a>(
        &'a self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<DatabaseIter<'a>, DatabaseError>;

    fn clone_box(&self) -> Box<dyn Database>;
}

impl Clone for Box<dyn Database> {
    fn clone(&self) -> Box<dyn Database> {
        self.clone_box()
    }
}
