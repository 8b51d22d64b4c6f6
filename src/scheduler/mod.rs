/*
 * Copyright 2019 Bitwise IO, Inc.
 * Copyright 2019 Cargill Incorporated
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

//! Block scheduling with transaction execution APIs.
//!
//! A block's transactions execute either serially or speculatively in
//! parallel; both engines produce the same post-state and the same ordered
//! receipts for the same input, so the choice between them is purely a
//! performance knob.  Execution happens against a [`View`] forked from the
//! layered storage stack with its mutable tier attached; the scheduler owns
//! transaction-level rollback and, in the parallel case, read/write-set
//! conflict resolution.

pub mod parallel;
pub mod serial;

use std::error::Error;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::available_parallelism;
use std::time::Duration;

use crate::execution::TransactionExecutor;
use crate::protocol::receipt::Receipt;
use crate::protocol::{BlockHeader, Transaction};
use crate::storage::layered::View;
use crate::storage::{StateRead, StorageError};

const DEFAULT_CHUNK_SIZE: usize = 16;
const DEFAULT_CACHE_CAPACITY: usize = 32 * 1024 * 1024;
const DEFAULT_BACKEND_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration shared by the scheduling engines and passed through to the
/// executor.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    parallel: bool,
    chunk_size: usize,
    max_tokens: usize,
    cache_capacity: usize,
    backend_write_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            parallel: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_tokens: available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            backend_write_timeout: DEFAULT_BACKEND_WRITE_TIMEOUT,
        }
    }
}

impl LedgerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the parallel engine.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Transactions per speculative chunk; clamped to at least 1.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Upper bound on concurrent workers; clamped to at least 1.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    /// Byte bound for the MRU cache tier.
    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_backend_write_timeout(mut self, timeout: Duration) -> Self {
        self.backend_write_timeout = timeout;
        self
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn backend_write_timeout(&self) -> Duration {
        self.backend_write_timeout
    }
}

/// Cooperative cancellation for an in-flight block.
///
/// Workers observe the token at transaction boundaries: cancelling discards
/// all speculative overlays and leaves the committed prefix of the block
/// intact in the mutable tier.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum SchedulerError {
    /// A storage tier failed underneath the engine.
    Storage(StorageError),

    /// The block was cancelled; receipts for not-yet-committed transactions
    /// were not produced.
    Cancelled,

    /// An internal error the scheduler could not recover from.
    Internal(String),
}

impl Error for SchedulerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchedulerError::Storage(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SchedulerError::Storage(ref err) => write!(f, "storage failure: {}", err),
            SchedulerError::Cancelled => write!(f, "block execution cancelled"),
            SchedulerError::Internal(ref msg) => {
                write!(f, "scheduler encountered an internal error: {}", msg)
            }
        }
    }
}

impl From<StorageError> for SchedulerError {
    fn from(err: StorageError) -> Self {
        SchedulerError::Storage(err)
    }
}

/// Executes a block of transactions against the given view, returning one
/// receipt per transaction in the original order.
///
/// The view must have been forked with its mutable tier attached unless the
/// block is empty.  Both engines leave the committed state of the mutable
/// tier updated strictly in original transaction order.
pub fn execute_block<B, E>(
    view: &View<B>,
    executor: &E,
    header: &BlockHeader,
    transactions: &[Transaction],
    config: &LedgerConfig,
) -> Result<Vec<Receipt>, SchedulerError>
where
    B: StateRead,
    E: TransactionExecutor + Sync,
{
    execute_block_cancellable(view, executor, header, transactions, config, &CancelToken::new())
}

/// [`execute_block`] with a caller-owned cancellation token.
pub fn execute_block_cancellable<B, E>(
    view: &View<B>,
    executor: &E,
    header: &BlockHeader,
    transactions: &[Transaction],
    config: &LedgerConfig,
    cancel: &CancelToken,
) -> Result<Vec<Receipt>, SchedulerError>
where
    B: StateRead,
    E: TransactionExecutor + Sync,
{
    if transactions.is_empty() {
        return Ok(Vec::new());
    }

    if config.parallel() {
        parallel::execute(view, executor, header, transactions, config, cancel)
    } else {
        serial::execute(view, executor, header, transactions, config, cancel)
    }
}
