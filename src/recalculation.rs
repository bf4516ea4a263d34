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

//! Handler for `recalculateBalances` jobs.

use crate::error::Result;
use crate::job::{Job, JobKind, JobResult};
use crate::ledger::LedgerStore;
use crate::worker::JobHandler;
use std::sync::Arc;
use tracing::{debug, warn};

/// Walks the ledger forward from an edited transaction.
pub struct RecalculationEngine {
    ledger: Arc<LedgerStore>,
}

impl RecalculationEngine {
    pub fn new(ledger: Arc<LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Propagates one edit and returns how many later transactions were
    /// adjusted by this run.
    ///
    /// The edited transaction's own balance is mirrored again first, so a
    /// mirror write that failed on the synchronous edit path is repaired here.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Propagation`](crate::LedgerError::Propagation)
    /// if a mirror write fails; the cursor keeps the progress made so far.
    pub fn recalculate(&self, job: &Job) -> Result<JobResult> {
        let payload = job.payload;

        if let Err(err) = self.ledger.mirror(payload.transaction_id) {
            warn!(job_id = %job.id, error = %err, "could not mirror edited transaction");
            return Err(err);
        }

        let updated = self.ledger.propagate(
            payload.transaction_id,
            payload.balance_change,
            payload.revision,
        )?;

        debug!(
            job_id = %job.id,
            transaction_id = %payload.transaction_id,
            updated,
            "balances recalculated"
        );
        Ok(JobResult { updated })
    }
}

impl JobHandler for RecalculationEngine {
    fn handle(&self, job: &Job) -> Result<JobResult> {
        match job.kind {
            JobKind::RecalculateBalances => self.recalculate(job),
        }
    }
}
