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

use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::database::DatabaseError;

/// Errors raised by the storage tiers.
///
/// `Backend` failures are fatal for the current block commit but leave the
/// in-memory tiers consistent, so the commit may be retried.  `Timeout` is
/// retryable.  `Invariant` and `RangeUnsupported` indicate programmer errors.
#[derive(Debug)]
pub enum StorageError {
    /// The persistent engine failed.
    Backend(DatabaseError),

    /// A backend operation exceeded its configured deadline.
    Timeout {
        operation: &'static str,
        elapsed: Duration,
        limit: Duration,
    },

    /// An API contract was violated by the caller.
    Invariant(String),

    /// `range` was invoked on a tier that does not support iteration.
    RangeUnsupported(&'static str),
}

impl StorageError {
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        StorageError::Invariant(msg.into())
    }

    /// Whether the failed operation may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout { .. })
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StorageError::Backend(ref err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StorageError::Backend(ref err) => write!(f, "backend failure: {}", err),
            StorageError::Timeout {
                operation,
                elapsed,
                limit,
            } => write!(
                f,
                "backend {} took {}ms, exceeding the {}ms limit",
                operation,
                elapsed.as_millis(),
                limit.as_millis()
            ),
            StorageError::Invariant(ref msg) => write!(f, "storage invariant violated: {}", msg),
            StorageError::RangeUnsupported(tier) => {
                write!(f, "tier {} does not support ranged reads", tier)
            }
        }
    }
}

impl From<DatabaseError> for StorageError {
    fn from(err: DatabaseError) -> Self {
        StorageError::Backend(err)
    }
}
