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

//! The boundary between the scheduling core and the virtual machine.
//!
//! The core never interprets a transaction itself; it hands the transaction,
//! the block header and a state view to a [`TransactionExecutor`] and takes
//! back a receipt.  This is the one place the core uses dynamic dispatch: the
//! state view crosses the boundary as `&dyn TxnState` so executors do not
//! need to be generic over the scheduler's wrapper stack.

use std::error::Error;
use std::fmt;

use crate::protocol::receipt::Receipt;
use crate::protocol::{BlockHeader, Transaction};
use crate::scheduler::LedgerConfig;
use crate::storage::{StateRead, StateWrite, StorageError};

/// The state surface an executor sees: reads and writes, nothing else.
///
/// Every mutation a transaction performs must go through the view it was
/// handed; that is what makes rollback and conflict detection possible.
pub trait TxnState: StateRead + StateWrite {}

impl<T: StateRead + StateWrite> TxnState for T {}

#[derive(Debug)]
pub enum ExecutionError {
    /// The transaction reverted.  The scheduler rolls back the transaction's
    /// state changes and records a non-zero-status receipt; execution of the
    /// block continues.
    Revert { message: String },

    /// A storage operation failed underneath the executor.
    Storage(StorageError),

    /// The executor itself failed in a way that is not a revert; this aborts
    /// the block.
    Internal(String),
}

impl ExecutionError {
    pub fn revert<S: Into<String>>(message: S) -> Self {
        ExecutionError::Revert {
            message: message.into(),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecutionError::Storage(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecutionError::Revert { message } => write!(f, "transaction reverted: {}", message),
            ExecutionError::Storage(ref err) => write!(f, "storage failure: {}", err),
            ExecutionError::Internal(ref msg) => write!(f, "executor error: {}", msg),
        }
    }
}

impl From<StorageError> for ExecutionError {
    fn from(err: StorageError) -> Self {
        ExecutionError::Storage(err)
    }
}

/// Executes one transaction against a state view.
///
/// Implementations must be pure in the sense that every state mutation goes
/// through `state`.  An executor may re-enter itself for nested calls;
/// savepoint discipline for contract-level reverts is its own business,
/// while transaction-level reverts belong to the scheduler.
pub trait TransactionExecutor {
    fn execute(
        &self,
        state: &dyn TxnState,
        header: &BlockHeader,
        transaction: &Transaction,
        context_id: usize,
        config: &LedgerConfig,
    ) -> Result<Receipt, ExecutionError>;
}
