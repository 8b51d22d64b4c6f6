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

//! The serial engine: one transaction at a time against one journalled view.

use crate::execution::{ExecutionError, TransactionExecutor};
use crate::protocol::receipt::Receipt;
use crate::protocol::{BlockHeader, Transaction};
use crate::scheduler::{CancelToken, LedgerConfig, SchedulerError};
use crate::storage::journal::Rollbackable;
use crate::storage::layered::View;
use crate::storage::StateRead;

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
    let journal = Rollbackable::new(view);
    let mut receipts = Vec::with_capacity(transactions.len());

    for (index, transaction) in transactions.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        let savepoint = journal.savepoint()?;
        match executor.execute(&journal, header, transaction, index, config) {
            Ok(receipt) => {
                journal.commit()?;
                receipts.push(receipt);
            }
            Err(ExecutionError::Revert { message }) => {
                // The rollback completes before the next transaction starts.
                journal.rollback(savepoint)?;
                debug!("transaction {} reverted: {}", index, message);
                receipts.push(Receipt::reverted(index as u64, transaction.hash(), message));
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

    Ok(receipts)
}
