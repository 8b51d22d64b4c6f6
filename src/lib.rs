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

//! Strata is the transaction execution core of a permissioned ledger node: a
//! layered, transactional, conflict-aware key-value state store combined
//! with schedulers that execute a block of transactions either serially or
//! speculatively in parallel while preserving serial semantics.
//!
//! The storage side stacks a mutable in-memory tier over frozen immutable
//! tiers, a concurrent MRU cache and a persistent ordered-KV backend; blocks
//! execute against forked views of that stack, with journalled rollback for
//! reverts and read/write-set tracking for conflict detection.  The
//! scheduling side turns a block's ordered transactions into ordered
//! receipts through an external executor, re-executing speculative
//! transactions whose reads turned out stale.

pub mod database;
pub mod execution;
pub mod families;
pub mod protocol;
pub mod scheduler;
pub mod storage;

#[macro_use]
extern crate log;
