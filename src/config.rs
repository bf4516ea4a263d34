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

use crate::job_queue::JobQueue;
use rust_decimal::Decimal;
use serde::Deserialize;

pub const DEFAULT_WORKERS: usize = 4;

/// Runtime settings for a [`LedgerService`](crate::LedgerService).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Recalculation worker threads.
    pub workers: usize,
    /// Settled jobs kept for status polling; unresolved failures are kept
    /// regardless.
    pub job_retention: usize,
    /// Balance before the first transaction.
    pub baseline: Decimal,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            job_retention: JobQueue::DEFAULT_RETENTION,
            baseline: Decimal::ZERO,
        }
    }
}
