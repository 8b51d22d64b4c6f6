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

//! A `Database` over RocksDB, available with the `rocksdb-db` feature.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{Direction, IteratorMode, Options, ReadOptions, WriteBatch, DB};

use crate::database::{BatchOp, Database, DatabaseError, DatabaseIter};

#[derive(Clone)]
pub struct RocksDatabase {
    db: Arc<DB>,
}

impl RocksDatabase {
    /// Opens (or creates) a RocksDB instance at the given path with sane
    /// defaults; tuning beyond that belongs to the operator.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, path)
            .map_err(|err| DatabaseError::InitError(format!("failed to open rocksdb: {}", err)))?;
        Ok(RocksDatabase { db: Arc::new(db) })
    }
}

impl Database for RocksDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        self.db
            .get(key)
            .map_err(|err| DatabaseError::ReaderError(err.to_string()))
    }

    fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, DatabaseError> {
        self.db
            .multi_get(keys)
            .into_iter()
            .map(|result| result.map_err(|err| DatabaseError::ReaderError(err.to_string())))
            .collect()
    }

    fn write_batch(&self, ops: Vec<BatchOp>, _size_hint: usize) -> Result<(), DatabaseError> {
        let mut batch = WriteBatch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.put(key, value),
                BatchOp::Delete { key } => batch.delete(key),
            }
        }
        self.db
            .write(batch)
            .map_err(|err| DatabaseError::WriterError(err.to_string()))
    }

    fn iter<'a>(
        &'a self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<DatabaseIter<'a>, DatabaseError> {
        let mut read_options = ReadOptions::default();
        if let Some(upper) = to {
            read_options.set_iterate_upper_bound(upper.to_vec());
        }
        let mode = match from {
            Some(lower) => IteratorMode::From(lower, Direction::Forward),
            None => IteratorMode::Start,
        };
        let iter = self.db.iterator_opt(mode, read_options);

        Ok(Box::new(iter.map(|item| {
            item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                .map_err(|err| DatabaseError::ReaderError(err.to_string()))
        })))
    }

    fn clone_box(&self) -> Box<dyn Database> {
        Box::new(self.clone())
    }
}
