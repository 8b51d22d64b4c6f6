/*
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

//! The parallel engine: speculative chunked execution with read/write-set
//! conflict resolution.
//!
//! Each pass chunks the not-yet-committed suffix of the block and executes
//! the chunks concurrently on a bounded worker pool.  A chunk runs its
//! transactions serially against a private overlay stacked on the shared
//! view, recording a receipt, a read/write set and a state delta per
//! transaction.  A merge walk then commits deltas into the block's mutable
//! tier in original transaction order, asking of every transaction whether it
//! read a key that an earlier transaction of the same pass wrote (its own
//! chunk's writes were visible to it and do not count).  The first such
//! conflict invalidates that transaction and everything after it; the next
//! pass resumes there.  The first merged transaction of a pass can never
//! conflict, so every pass commits at least one transaction and the engine
//! terminates in at most `n` passes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::execution::{ExecutionError, TransactionExecutor};
use crate::protocol::receipt::Receipt;
use crate::protocol::{BlockHeader, Transaction};
use crate::scheduler::{CancelToken, LedgerConfig, SchedulerError};
use crate::storage::journal::Rollbackable;
use crate::storage::layered::{OverlayStorage, View};
use crate::storage::tracker::{ReadWriteSet, TrackingStorage};
use crate::storage::{Entry, StateKey, StateRead, StateWrite};

struct TxnOutcome {
    index: usize,
    receipt: Receipt,
    set: ReadWriteSet,
    /// The transaction's net writes, empty for a reverted transaction.
    delta: Vec<(StateKey, Entry)>,
}

struct ChunkOutcome {
    transactions: Vec<TxnOutcome>,
}

pub(crate) fn execute<B, E>(
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
    let total = transactions.len();
    let chunk_size = config.chunk_size().max(1);
    let mut receipts: Vec<Option<Receipt>> = vec![None; total];
    let mut next = 0;
    let mut pass = 0;

    while next < total {
        pass += 1;
        let chunk_starts: Vec<usize> = (next..total).step_by(chunk_size).collect();
        debug!(
            "pass {}: executing transactions {}..{} in {} chunks",
            pass,
            next,
            total,
            chunk_starts.len()
        );

        let outcomes = run_pass(
            view,
            executor,
            header,
            transactions,
            config,
            cancel,
            &chunk_starts,
            chunk_size,
        )?;

        // Merge walk: commit in original order until the first transaction
        // that read state written earlier in this pass.
        let mut merged = ReadWriteSet::default();
        let mut conflict: Option<usize> = None;

        'chunks: for outcome in outcomes {
            let mut chunk_writes = ReadWriteSet::default();
            for txn in outcome.transactions {
                if txn.set.raw_conflict(&merged) {
                    debug!(
                        "pass {}: transaction {} read state written earlier in the pass; \
                         re-executing from there",
                        pass, txn.index
                    );
                    conflict = Some(txn.index);
                    break 'chunks;
                }

                if !txn.delta.is_empty() {
                    let (keys, values): (Vec<StateKey>, Vec<Entry>) =
                        txn.delta.into_iter().unzip();
                    view.write_some(keys, values)?;
                }
                if txn.receipt.status_code() == 0 {
                    // Reverted writes were rolled back in the overlay and
                    // must not feed later conflict checks.
                    chunk_writes.merge_write_set(&txn.set);
                }
                receipts[txn.index] = Some(txn.receipt);
            }
            merged.merge_write_set(&chunk_writes);
        }

        next = conflict.unwrap_or(total);
    }

    debug!("block committed in {} pass(es)", pass);
    receipts
        .into_iter()
        .enumerate()
        .map(|(index, receipt)| {
            receipt.ok_or_else(|| {
                SchedulerError::Internal(format!("no receipt produced for transaction {}", index))
            })
        })
        .collect()
}

/// Executes one pass's chunks on at most `max_tokens` workers and returns
/// the chunk outcomes in chunk order.
#[allow(clippy::too_many_arguments)]
fn run_pass<B, E>(
    view: &View<B>,
    executor: &E,
    header: &BlockHeader,
    transactions: &[Transaction],
    config: &LedgerConfig,
    cancel: &CancelToken,
    chunk_starts: &[usize],
    chunk_size: usize,
) -> Result<Vec<ChunkOutcome>, SchedulerError>
where
    B: StateRead,
    E: TransactionExecutor + Sync,
{
    let workers = config.max_tokens().max(1).min(chunk_starts.len());
    let cursor = AtomicUsize::new(0);

    let mut indexed: Vec<(usize, ChunkOutcome)> = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            handles.push(scope.spawn(
                || -> Result<Vec<(usize, ChunkOutcome)>, SchedulerError> {
                    let mut completed = Vec::new();
                    loop {
                        let position = cursor.fetch_add(1, Ordering::SeqCst);
                        if position >= chunk_starts.len() {
                            break;
                        }
                        let start = chunk_starts[position];
                        let end = (start + chunk_size).min(transactions.len());
                        let outcome = execute_chunk(
                            view,
                            executor,
                            header,
                            &transactions[start..end],
                            start,
                            config,
                            cancel,
                        )?;
                        completed.push((position, outcome));
                    }
                    Ok(completed)
                },
            ));
        }

        let mut all: Vec<(usize, ChunkOutcome)> = Vec::with_capacity(chunk_starts.len());
        let mut first_error: Option<SchedulerError> = None;
        for handle in handles {
            match handle.join() {
                Ok(Ok(completed)) => all.extend(completed),
                Ok(Err(err)) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
                Err(_) => {
                    if first_error.is_none() {
                        first_error =
                            Some(SchedulerError::Internal("a chunk worker panicked".into()));
                    }
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(all),
        }
    })?;

    indexed.sort_by_key(|(position, _)| *position);
    Ok(indexed.into_iter().map(|(_, outcome)| outcome).collect())
}

/// Runs one chunk serially against a private overlay, producing a receipt,
/// a read/write set and a delta per transaction.
fn execute_chunk<B, E>(
    view: &View<B>,
    executor: &E,
    header: &BlockHeader,
    chunk: &[Transaction],
    start: usize,
    config: &LedgerConfig,
    cancel: &CancelToken,
) -> Result<ChunkOutcome, SchedulerError>
where
    B: StateRead,
    E: TransactionExecutor + Sync,
{
    let overlay = OverlayStorage::new(view);
    let journal = Rollbackable::new(overlay);
    let mut outcomes = Vec::with_capacity(chunk.len());

    for (offset, transaction) in chunk.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let index = start + offset;
        let savepoint = journal.savepoint()?;
        let tracker = TrackingStorage::new(&journal);

        match executor.execute(&tracker, header, transaction, index, config) {
            Ok(receipt) => {
                let set = tracker.into_read_write_set();
                let keys = journal.changed_keys_since(savepoint)?;
                let mut delta = Vec::with_capacity(keys.len());
                for key in keys {
                    let entry = journal.read_one(&key)?.ok_or_else(|| {
                        SchedulerError::Internal(format!(
                            "journalled key {:?} missing from its overlay",
                            key
                        ))
                    })?;
                    delta.push((key, entry));
                }
                journal.commit()?;
                outcomes.push(TxnOutcome {
                    index,
                    receipt,
                    set,
                    delta,
                });
            }
            Err(ExecutionError::Revert { message }) => {
                let set = tracker.into_read_write_set();
                journal.rollback(savepoint)?;
                outcomes.push(TxnOutcome {
                    index,
                    receipt: Receipt::reverted(index as u64, transaction.hash(), message),
                    set,
                    delta: Vec::new(),
                });
            }
            Err(ExecutionError::Storage(err)) => return Err(SchedulerError::Storage(err)),
            Err(err) => {
                return Err(SchedulerError::Internal(format!(
                    "executor failed on transaction {}: {}",
                    index, err
                )))
            }
        }
    }

    Ok(ChunkOutcome {
        transactions: outcomes,
    })
}
