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

//! Block-level protocol types consumed by the schedulers.
//!
//! The execution core treats transactions as opaque payloads and block headers
//! as immutable metadata; interpreting a payload is the executor's business.

pub mod receipt;

use sha2::{Digest, Sha256};

/// Immutable metadata describing the block a set of transactions belongs to.
///
/// The core never inspects the header beyond passing it to the executor; it is
/// carried along so contract code can read the block number, version and hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    number: u64,
    version: u32,
    hash: [u8; 32],
}

impl BlockHeader {
    pub fn new(number: u64, version: u32, hash: [u8; 32]) -> Self {
        BlockHeader {
            number,
            version,
            hash,
        }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }
}

/// A transaction as seen by the execution core: an opaque payload.
///
/// Signature checking, nonces and the wire format live outside the core; by
/// the time a transaction reaches a scheduler it has already been admitted
/// into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Self {
        Transaction { payload }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The transaction hash carried into the receipt, computed over the
    /// payload.
    pub fn hash(&self) -> [u8; 32] {
        let digest = Sha256::digest(&self.payload);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        hash
    }
}
