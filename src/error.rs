// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for ledger edits, job handling and balance mirroring.

use crate::base::{JobId, TransactionId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failure reported by a [`KeyValueStore`](crate::KeyValueStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("store write failed for key `{key}`: {message}")]
pub struct StoreError {
    pub key: String,
    pub message: String,
}

impl StoreError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Ledger and job processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Referenced transaction id is outside the ledger
    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    /// Referenced job id is unknown (or was evicted)
    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// Request rejected on its own validity (non-positive price, bad input)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The job queue has been shut down
    #[error("job queue is shut down")]
    QueueUnavailable,

    /// Mirror write failed part-way through a propagation.
    ///
    /// `cursor` is the last transaction whose balance was applied; a retry of
    /// the same recalculation resumes after it.
    #[error("propagation stopped at transaction {transaction_id} (cursor {cursor}): {source}")]
    Propagation {
        transaction_id: TransactionId,
        cursor: TransactionId,
        source: StoreError,
    },

    /// Adding a balance change would overflow the balance of a transaction.
    ///
    /// The transaction and everything after it are left unchanged.
    #[error("balance of transaction {0} overflows")]
    BalanceOverflow(TransactionId),
}

impl LedgerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        LedgerError::InvalidArgument(message.into())
    }

    /// Returns true for errors that are reported synchronously to the caller
    /// of an edit and never reach the job queue.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            LedgerError::TransactionNotFound(_)
                | LedgerError::JobNotFound(_)
                | LedgerError::InvalidArgument(_)
        )
    }
}
