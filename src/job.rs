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

//! Job records.
//!
//! Jobs follow a state machine:
//! - [`Queued`] → [`Running`] (claimed by a worker)
//! - [`Running`] → [`Completed`] or [`Failed`]
//!
//! [`Queued`]: JobStatus::Queued
//! [`Running`]: JobStatus::Running
//! [`Completed`]: JobStatus::Completed
//! [`Failed`]: JobStatus::Failed

use crate::base::{JobId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobKind {
    #[serde(rename = "recalculateBalances")]
    RecalculateBalances,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// What a recalculation has to do: add `balance_change` to every
/// transaction after `transaction_id`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecalculatePayload {
    pub transaction_id: TransactionId,
    pub balance_change: Decimal,
    /// Edit number that produced the change.
    pub revision: u32,
}

impl RecalculatePayload {
    /// Identifies the recalculation across retries of the same edit.
    pub fn key(&self) -> (TransactionId, u32) {
        (self.transaction_id, self.revision)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobResult {
    /// Transactions whose balance was adjusted.
    pub updated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub payload: RecalculatePayload,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub(crate) fn new(id: JobId, kind: JobKind, payload: RecalculatePayload) -> Self {
        Self {
            id,
            kind,
            payload,
            status: JobStatus::Queued,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Transaction whose jobs must run one at a time, in enqueue order.
    pub fn target(&self) -> TransactionId {
        self.payload.transaction_id
    }
}
