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

//! Ledger service.
//!
//! Owns the queue and the worker pool and exposes the synchronous half of an
//! edit: validate, update the transaction, enqueue the recalculation and
//! return. The caller never waits for propagation; it learns the outcome by
//! polling [`job`](LedgerService::job).

use crate::base::{JobId, TransactionId};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::job::{Job, JobKind, JobStatus, RecalculatePayload};
use crate::job_queue::JobQueue;
use crate::ledger::LedgerStore;
use crate::recalculation::RecalculationEngine;
use crate::transaction::Transaction;
use crate::worker::WorkerPool;
use rust_decimal::Decimal;
use serde::Serialize;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Response to a successful edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditOutcome {
    pub transaction: Transaction,
    pub old_balance_after: Decimal,
    pub balance_change: Decimal,
    /// Recalculation job to poll for completion.
    pub job_id: JobId,
}

pub struct LedgerService {
    config: LedgerConfig,
    ledger: Arc<LedgerStore>,
    queue: Arc<JobQueue>,
    pool: WorkerPool,
}

/// Parses a price from request input.
///
/// # Errors
///
/// Returns [`LedgerError::InvalidArgument`] for non-numeric or non-positive input.
pub fn parse_price(raw: &str) -> Result<Decimal> {
    let price = Decimal::from_str(raw.trim())
        .map_err(|_| LedgerError::invalid("price must be a positive number"))?;
    if price <= Decimal::ZERO {
        return Err(LedgerError::invalid("price must be a positive number"));
    }
    Ok(price)
}

impl LedgerService {
    /// Creates the queue and starts the recalculation workers.
    pub fn start(config: LedgerConfig, ledger: Arc<LedgerStore>) -> io::Result<Self> {
        let queue = Arc::new(JobQueue::with_retention(config.job_retention));
        let engine = Arc::new(RecalculationEngine::new(Arc::clone(&ledger)));
        let pool = WorkerPool::start(Arc::clone(&queue), engine, config.workers)?;

        info!(
            transactions = ledger.len(),
            workers = pool.size(),
            job_retention = config.job_retention,
            "ledger service started"
        );

        Ok(Self {
            config,
            ledger,
            queue,
            pool,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Changes a transaction's price and schedules the recalculation of
    /// every later balance.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidArgument`] - non-positive price, or one that
    ///   would overflow the balance; nothing changes.
    /// - [`LedgerError::TransactionNotFound`] - unknown transaction.
    /// - [`LedgerError::QueueUnavailable`] - the service is shutting down.
    pub fn edit_price(&self, id: TransactionId, price: Decimal) -> Result<EditOutcome> {
        // From here on a shutdown waits for this edit's job.
        let slot = self.queue.reserve()?;
        let receipt = self.ledger.apply_edit(id, price)?;

        // The recalculation job mirrors the edited row again.
        if let Err(err) = self.ledger.mirror(id) {
            warn!(transaction_id = %id, error = %err, "mirror write failed on edit");
        }

        let payload = RecalculatePayload {
            transaction_id: id,
            balance_change: receipt.balance_change,
            revision: receipt.revision,
        };
        let job = slot.submit(JobKind::RecalculateBalances, payload);

        info!(
            transaction_id = %id,
            job_id = %job.id,
            balance_change = %receipt.balance_change,
            "transaction updated"
        );

        Ok(EditOutcome {
            transaction: receipt.transaction,
            old_balance_after: receipt.old_balance_after,
            balance_change: receipt.balance_change,
            job_id: job.id,
        })
    }

    /// Re-enqueues the payload of a failed job under a new job id.
    ///
    /// The propagation resumes from where the failed run stopped.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::JobNotFound`] - unknown or evicted job.
    /// - [`LedgerError::InvalidArgument`] - the job has not failed.
    /// - [`LedgerError::QueueUnavailable`] - the service is shutting down.
    pub fn retry(&self, id: JobId) -> Result<Job> {
        let job = self.job(id)?;
        if job.status != JobStatus::Failed {
            return Err(LedgerError::invalid(format!(
                "job {id} is {:?}, only failed jobs can be retried",
                job.status
            )));
        }

        let retried = self.queue.add_job(job.kind, job.payload)?;
        info!(job_id = %id, retry_id = %retried.id, "job retried");
        Ok(retried)
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::JobNotFound`] for unknown or evicted jobs.
    pub fn job(&self, id: JobId) -> Result<Job> {
        self.queue.get_job(id).ok_or(LedgerError::JobNotFound(id))
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.queue.get_all_jobs()
    }

    pub fn transaction(&self, id: TransactionId) -> Result<Transaction> {
        self.ledger.get(id)
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.ledger.snapshot()
    }

    /// Blocks until job `id` is terminal or `timeout` elapses.
    pub fn wait_for(&self, id: JobId, timeout: Duration) -> Option<Job> {
        self.queue.wait_for(id, timeout)
    }

    /// Blocks until no recalculation is queued or running.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }

    /// First transaction violating the running-balance invariant, if any.
    pub fn verify(&self) -> Option<TransactionId> {
        self.ledger.verify(self.config.baseline)
    }

    /// Drains queued recalculations and stops the workers.
    pub fn shutdown(self) {
        info!("ledger service shutting down");
        self.pool.shutdown();
    }
}
