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

//! Receipts describing the outcome of executed transactions.
//!
//! One receipt is produced per transaction, in the transaction's original
//! position within the block regardless of how the block was scheduled.

/// The outcome of a single transaction's execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    /// The transaction executed to completion; its state changes were
    /// committed and any return data is carried in `output`.
    Success { output: Vec<u8> },

    /// The executor reported a revert; the transaction's state changes were
    /// rolled back and only this receipt remains.
    Reverted { message: String },
}

/// The per-transaction execution record returned by a scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    transaction_index: u64,
    transaction_hash: [u8; 32],
    result: TransactionResult,
}

impl Receipt {
    pub fn success(transaction_index: u64, transaction_hash: [u8; 32], output: Vec<u8>) -> Self {
        Receipt {
            transaction_index,
            transaction_hash,
            result: TransactionResult::Success { output },
        }
    }

    pub fn reverted(transaction_index: u64, transaction_hash: [u8; 32], message: String) -> Self {
        Receipt {
            transaction_index,
            transaction_hash,
            result: TransactionResult::Reverted { message },
        }
    }

    /// The position of the transaction within its block.
    pub fn transaction_index(&self) -> u64 {
        self.transaction_index
    }

    pub fn transaction_hash(&self) -> &[u8; 32] {
        &self.transaction_hash
    }

    pub fn result(&self) -> &TransactionResult {
        &self.result
    }

    /// Zero for success, non-zero for a reverted transaction.
    pub fn status_code(&self) -> u32 {
        match self.result {
            TransactionResult::Success { .. } => 0,
            TransactionResult::Reverted { .. } => 1,
        }
    }

    pub fn output(&self) -> Option<&[u8]> {
        match &self.result {
            TransactionResult::Success { output } => Some(output),
            TransactionResult::Reverted { .. } => None,
        }
    }
}
