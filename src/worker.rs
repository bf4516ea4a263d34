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

//! Fixed-size worker pool.
//!
//! Each worker claims the next eligible job from the [`JobQueue`], runs the
//! handler and reports the outcome. Handler errors and panics are recorded on
//! the job as `failed`; they never take a worker down.

use crate::error::Result;
use crate::job::{Job, JobResult};
use crate::job_queue::{JobOutcome, JobQueue};
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Executes claimed jobs.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &Job) -> Result<JobResult>;
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads (at least one) serving `queue`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if a thread cannot be spawned; workers already
    /// started are shut down first.
    pub fn start(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        workers: usize,
    ) -> io::Result<Self> {
        let mut pool = Self {
            queue,
            workers: Vec::with_capacity(workers.max(1)),
        };

        for n in 0..workers.max(1) {
            let queue = Arc::clone(&pool.queue);
            let handler = Arc::clone(&handler);
            let worker = thread::Builder::new()
                .name(format!("recalc-worker-{n}"))
                .spawn(move || run(&queue, handler.as_ref()))?;
            pool.workers.push(worker);
        }

        debug!(workers = pool.workers.len(), "worker pool started");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Shuts the queue down, lets the workers drain what is already queued
    /// and joins them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.queue.shutdown();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("worker thread panicked outside a job");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(queue: &JobQueue, handler: &dyn JobHandler) {
    while let Some(job) = queue.claim_blocking() {
        debug!(job_id = %job.id, transaction_id = %job.target(), "job claimed");

        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&job))) {
            Ok(Ok(result)) => {
                info!(job_id = %job.id, updated = result.updated, "job completed");
                JobOutcome::Completed(result)
            }
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "job failed");
                JobOutcome::Failed(err.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job_id = %job.id, %message, "job handler panicked");
                JobOutcome::Failed(format!("handler panicked: {message}"))
            }
        };

        queue.finish(job.id, outcome);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TransactionId;
    use crate::error::LedgerError;
    use crate::job::{JobKind, JobStatus, RecalculatePayload};
    use rust_decimal::Decimal;
    use std::time::Duration;

    /// Fails for target 1, panics for target 2, succeeds otherwise.
    struct Flaky;

    impl JobHandler for Flaky {
        fn handle(&self, job: &Job) -> Result<JobResult> {
            match job.target().0 {
                1 => Err(LedgerError::invalid("rejected")),
                2 => panic!("handler exploded"),
                n => Ok(JobResult { updated: n as usize }),
            }
        }
    }

    fn enqueue(queue: &JobQueue, target: u32) -> Job {
        queue
            .add_job(
                JobKind::RecalculateBalances,
                RecalculatePayload {
                    transaction_id: TransactionId(target),
                    balance_change: Decimal::ONE,
                    revision: 1,
                },
            )
            .unwrap()
    }

    #[test]
    fn failures_and_panics_do_not_stop_the_pool() {
        let queue = Arc::new(JobQueue::new());
        let pool = WorkerPool::start(Arc::clone(&queue), Arc::new(Flaky), 2).unwrap();

        let failed = enqueue(&queue, 1);
        let panicked = enqueue(&queue, 2);
        let ok = enqueue(&queue, 3);

        assert!(queue.wait_idle(Duration::from_secs(5)));

        let failed = queue.get_job(failed.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("invalid argument: rejected"));

        let panicked = queue.get_job(panicked.id).unwrap();
        assert_eq!(panicked.status, JobStatus::Failed);
        assert_eq!(
            panicked.error.as_deref(),
            Some("handler panicked: handler exploded")
        );

        let ok = queue.get_job(ok.id).unwrap();
        assert_eq!(ok.status, JobStatus::Completed);
        assert_eq!(ok.result, Some(JobResult { updated: 3 }));

        pool.shutdown();
        assert!(queue.is_shutdown());
    }

    #[test]
    fn zero_workers_is_clamped_to_one() {
        let queue = Arc::new(JobQueue::new());
        let pool = WorkerPool::start(queue, Arc::new(Flaky), 0).unwrap();
        assert_eq!(pool.size(), 1);
    }
}
