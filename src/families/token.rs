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

//! A minimal token family.
//!
//! Payloads are ASCII commands over decimal-string balances:
//!
//! * `issue:<account>:<amount>` mints `amount` onto the account
//! * `transfer:<from>:<to>:<amount>` moves `amount` between accounts,
//!   reverting on insufficient balance
//!
//! The family exists to drive the schedulers in tests and benchmarks: its
//! reads and writes are exactly the per-account keys, which makes conflict
//! behavior easy to stage.

use crate::execution::{ExecutionError, TransactionExecutor, TxnState};
use crate::protocol::receipt::Receipt;
use crate::protocol::{BlockHeader, Transaction};
use crate::scheduler::LedgerConfig;
use crate::storage::{Entry, StateKey, StateRead, StateWrite};

pub const ACCOUNTS_TABLE: &str = "accounts";

/// The state key holding an account's balance.
pub fn balance_key(account: &str) -> StateKey {
    StateKey::new(ACCOUNTS_TABLE, account.as_bytes().to_vec())
}

fn read_balance(state: &dyn TxnState, account: &str) -> Result<u64, ExecutionError> {
    match state.read_value(&balance_key(account))? {
        Some(value) => {
            let text = String::from_utf8(value)
                .map_err(|_| ExecutionError::Internal(format!("balance of {} is not utf8", account)))?;
            text.parse().map_err(|_| {
                ExecutionError::Internal(format!("balance of {} is not a number", account))
            })
        }
        None => Ok(0),
    }
}

fn write_balance(state: &dyn TxnState, account: &str, amount: u64) -> Result<(), ExecutionError> {
    state.write_one(
        balance_key(account),
        Entry::new(amount.to_string().into_bytes()),
    )?;
    Ok(())
}

pub struct TokenExecutor;

impl TransactionExecutor for TokenExecutor {
    fn execute(
        &self,
        state: &dyn TxnState,
        _header: &BlockHeader,
        transaction: &Transaction,
        context_id: usize,
        _config: &LedgerConfig,
    ) -> Result<Receipt, ExecutionError> {
        let payload = std::str::from_utf8(transaction.payload())
            .map_err(|_| ExecutionError::revert("payload is not utf8"))?;
        let fields: Vec<&str> = payload.split(':').collect();

        match fields.as_slice() {
            ["issue", account, amount] => {
                let amount: u64 = amount
                    .parse()
                    .map_err(|_| ExecutionError::revert("amount is not a number"))?;
                let balance = read_balance(state, account)?;
                let balance = balance
                    .checked_add(amount)
                    .ok_or_else(|| ExecutionError::revert("balance overflow"))?;
                write_balance(state, account, balance)?;
            }
            ["transfer", from, to, amount] => {
                let amount: u64 = amount
                    .parse()
                    .map_err(|_| ExecutionError::revert("amount is not a number"))?;
                let from_balance = read_balance(state, from)?;
                if from_balance < amount {
                    return Err(ExecutionError::revert("insufficient balance"));
                }
                write_balance(state, from, from_balance - amount)?;
                let to_balance = read_balance(state, to)?;
                let to_balance = to_balance
                    .checked_add(amount)
                    .ok_or_else(|| ExecutionError::revert("balance overflow"))?;
                write_balance(state, to, to_balance)?;
            }
            _ => return Err(ExecutionError::revert(format!("unknown command: {}", payload))),
        }

        Ok(Receipt::success(
            context_id as u64,
            transaction.hash(),
            Vec::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::StateRead;

    fn execute(state: &MemoryStorage, payload: &str, context_id: usize) -> Result<Receipt, ExecutionError> {
        TokenExecutor.execute(
            state,
            &BlockHeader::default(),
            &Transaction::new(payload.as_bytes().to_vec()),
            context_id,
            &LedgerConfig::default(),
        )
    }

    fn balance(state: &MemoryStorage, account: &str) -> u64 {
        state
            .read_value(&balance_key(account))
            .expect("read failed")
            .map(|value| String::from_utf8(value).unwrap().parse().unwrap())
            .unwrap_or(0)
    }

    #[test]
    fn issue_mints_onto_the_account() {
        let state = MemoryStorage::new();
        let receipt = execute(&state, "issue:0x01:1000000", 0).expect("issue failed");
        assert_eq!(receipt.status_code(), 0);
        assert_eq!(balance(&state, "0x01"), 1_000_000);

        execute(&state, "issue:0x01:5", 1).expect("issue failed");
        assert_eq!(balance(&state, "0x01"), 1_000_005);
    }

    #[test]
    fn transfer_moves_funds() {
        let state = MemoryStorage::new();
        execute(&state, "issue:alice:100", 0).expect("issue failed");
        execute(&state, "transfer:alice:bob:30", 1).expect("transfer failed");
        assert_eq!(balance(&state, "alice"), 70);
        assert_eq!(balance(&state, "bob"), 30);
    }

    #[test]
    fn overdraw_reverts() {
        let state = MemoryStorage::new();
        execute(&state, "issue:alice:10", 0).expect("issue failed");
        let result = execute(&state, "transfer:alice:bob:11", 1);
        assert!(matches!(result, Err(ExecutionError::Revert { .. })));
    }

    #[test]
    fn malformed_payloads_revert() {
        let state = MemoryStorage::new();
        assert!(matches!(
            execute(&state, "mint:alice:10", 0),
            Err(ExecutionError::Revert { .. })
        ));
        assert!(matches!(
            execute(&state, "transfer:alice:bob:ten", 0),
            Err(ExecutionError::Revert { .. })
        ));
    }
}
