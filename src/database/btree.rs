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

//! An in-memory `Database` backed by a `BTreeMap`, used in tests and for
//! nodes that do not persist state across restarts.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::{Arc, RwLock};

use crate::database::{BatchOp, Database, DatabaseError, DatabaseIter};

#[derive(Clone, Default)]
pub struct BTreeDatabase {
    btree: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl BTreeDatabase {
    pub fn new() -> BTreeDatabase {
        BTreeDatabase {
            btree: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// The number of entries currently stored.
    pub fn len(&self) -> usize {
        self.btree
            .read()
            .map(|btree| btree.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Database for BTreeDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        let btree = self
            .btree
            .read()
            .map_err(|err| DatabaseError::ReaderError(format!("lock poisoned: {}", err)))?;
        Ok(btree.get(key).cloned())
    }

    fn multi_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>, DatabaseError> {
        let btree = self
            .btree
            .read()
            .map_err(|err| DatabaseError::ReaderError(format!("lock poisoned: {}", err)))?;
        Ok(keys
            .iter()
            .map(|key| btree.get(key.as_slice()).cloned())
            .collect())
    }

    fn write_batch(&self, ops: Vec<BatchOp>, _size_hint: usize) -> Result<(), DatabaseError> {
        let mut btree = self
            .btree
            .write()
            .map_err(|err| DatabaseError::WriterError(format!("lock poisoned: {}", err)))?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    btree.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    btree.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iter<'a>(
        &'a self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
    ) -> Result<DatabaseIter<'a>, DatabaseError> {
        let btree = self
            .btree
            .read()
            .map_err(|err| DatabaseError::ReaderError(format!("lock poisoned: {}", err)))?;

        // The cursor iterates a snapshot so concurrent writes do not alter an
        // iteration already in progress.
        let lower = match from {
            Some(key) => Included(key.to_vec()),
            None => Unbounded,
        };
        let upper = match to {
            Some(key) => Excluded(key.to_vec()),
            None => Unbounded,
        };
        let snapshot: Vec<(Vec<u8>, Vec<u8>)> = btree
            .range((lower, upper))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn clone_box(&self) -> Box<dyn Database> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_and_multi_get() {
        let db = BTreeDatabase::new();
        db.write_batch(
            vec![
                BatchOp::Put {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                },
                BatchOp::Put {
                    key: b"b".to_vec(),
                    value: b"2".to_vec(),
                },
            ],
            0,
        )
        .expect("batch failed");

        assert_eq!(db.get(b"a").expect("get failed"), Some(b"1".to_vec()));
        assert_eq!(db.get(b"c").expect("get failed"), None);

        let values = db
            .multi_get(&[b"b".to_vec(), b"missing".to_vec(), b"a".to_vec()])
            .expect("multi_get failed");
        assert_eq!(
            values,
            vec![Some(b"2".to_vec()), None, Some(b"1".to_vec())]
        );
    }

    #[test]
    fn batch_delete() {
        let db = BTreeDatabase::new();
        db.write_batch(
            vec![BatchOp::Put {
                key: b"a".to_vec(),
                value: b"1".to_vec(),
            }],
            0,
        )
        .expect("batch failed");
        db.write_batch(vec![BatchOp::Delete { key: b"a".to_vec() }], 0)
            .expect("batch failed");
        assert_eq!(db.get(b"a").expect("get failed"), None);
        assert!(db.is_empty());
    }

    #[test]
    fn iter_is_ordered_and_bounded() {
        let db = BTreeDatabase::new();
        let ops = [b"c", b"a", b"d", b"b"]
            .iter()
            .map(|key| BatchOp::Put {
                key: key.to_vec(),
                value: key.to_vec(),
            })
            .collect();
        db.write_batch(ops, 0).expect("batch failed");

        let all: Vec<_> = db
            .iter(None, None)
            .expect("iter failed")
            .map(|entry| entry.expect("entry failed").0)
            .collect();
        assert_eq!(all, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        let bounded: Vec<_> = db
            .iter(Some(b"b"), Some(b"d"))
            .expect("iter failed")
            .map(|entry| entry.expect("entry failed").0)
            .collect();
        assert_eq!(bounded, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
