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

//! Thread-safe job queue with per-transaction serialization.
//!
//! Jobs are dispatched in FIFO order, except that a job is only eligible
//! while no other job for the same target transaction is running. Jobs for
//! one transaction therefore run one at a time in enqueue order, while jobs
//! for different transactions run side by side.
//!
//! The queue keeps only bookkeeping behind its lock; the ledger is never
//! touched while it is held.

use crate::base::{JobId, TransactionId};
use crate::error::{LedgerError, Result};
use crate::job::{Job, JobKind, JobResult, JobStatus, RecalculatePayload};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Outcome reported by a worker when a job finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(JobResult),
    Failed(String),
}

#[derive(Debug)]
struct QueueState {
    /// Retained jobs; ids are increasing so map order is insertion order.
    jobs: BTreeMap<JobId, Job>,
    /// Queued job ids in enqueue order.
    pending: VecDeque<JobId>,
    /// Targets with a running job.
    active: HashSet<TransactionId>,
    /// Evictable terminal job ids in completion order, oldest first.
    finished: VecDeque<JobId>,
    /// Failed jobs whose recalculation has not completed since, by payload
    /// key. These are never evicted.
    unresolved: HashMap<(TransactionId, u32), Vec<JobId>>,
    /// Open [`JobSlot`]s.
    reserved: usize,
    next_id: u64,
    shutdown: bool,
}

impl QueueState {
    fn claim(&mut self) -> Option<Job> {
        let position = self.pending.iter().position(|id| {
            self.jobs
                .get(id)
                .is_some_and(|job| !self.active.contains(&job.target()))
        })?;
        let id = self.pending.remove(position)?;
        let job = self.jobs.get_mut(&id)?;

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        self.active.insert(job.target());

        Some(job.clone())
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }
}

/// Job lifecycle management and dispatch.
///
/// Retention is bounded: at most `retention` completed jobs are kept for
/// status polling and the oldest are evicted first. Queued and running jobs
/// are never evicted, and neither is a failed job until a later job with the
/// same payload completes, so it stays retriable.
#[derive(Debug)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    /// Signalled when a job becomes claimable or the queue shuts down.
    dispatch: Condvar,
    /// Signalled when a job reaches a terminal state.
    settled: Condvar,
    retention: usize,
}

impl JobQueue {
    pub const DEFAULT_RETENTION: usize = 1024;

    pub fn new() -> Self {
        Self::with_retention(Self::DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: BTreeMap::new(),
                pending: VecDeque::new(),
                active: HashSet::new(),
                finished: VecDeque::new(),
                unresolved: HashMap::new(),
                reserved: 0,
                next_id: 1,
                shutdown: false,
            }),
            dispatch: Condvar::new(),
            settled: Condvar::new(),
            retention,
        }
    }

    /// Enqueues a job and returns a snapshot of it in the `queued` state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::QueueUnavailable`] after [`shutdown`](Self::shutdown).
    pub fn add_job(&self, kind: JobKind, payload: RecalculatePayload) -> Result<Job> {
        Ok(self.reserve()?.submit(kind, payload))
    }

    /// Reserves room for one job before its payload is known.
    ///
    /// A job submitted through the slot is accepted even if the queue shuts
    /// down in the meantime, and workers keep running until every open slot
    /// is submitted or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::QueueUnavailable`] after [`shutdown`](Self::shutdown).
    pub fn reserve(&self) -> Result<JobSlot<'_>> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(LedgerError::QueueUnavailable);
        }
        state.reserved += 1;
        Ok(JobSlot {
            queue: self,
            open: true,
        })
    }

    fn push(&self, kind: JobKind, payload: RecalculatePayload) -> Job {
        let mut state = self.state.lock();
        state.reserved -= 1;

        let id = JobId(state.next_id);
        state.next_id += 1;

        let job = Job::new(id, kind, payload);
        state.jobs.insert(id, job.clone());
        state.pending.push_back(id);
        drop(state);

        debug!(job_id = %id, transaction_id = %payload.transaction_id, "job queued");
        self.dispatch.notify_all();
        job
    }

    fn release(&self) {
        self.state.lock().reserved -= 1;
        self.dispatch.notify_all();
    }

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.state.lock().jobs.get(&id).cloned()
    }

    /// Snapshot of all retained jobs in insertion order.
    pub fn get_all_jobs(&self) -> Vec<Job> {
        self.state.lock().jobs.values().cloned().collect()
    }

    /// Claims the first eligible queued job without waiting.
    pub fn claim_next(&self) -> Option<Job> {
        self.state.lock().claim()
    }

    /// Claims the next eligible job, waiting until one is available.
    ///
    /// Returns `None` once the queue is shut down and nothing is pending or
    /// reserved.
    pub fn claim_blocking(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if let Some(job) = state.claim() {
                return Some(job);
            }
            if state.shutdown && state.pending.is_empty() && state.reserved == 0 {
                return None;
            }
            self.dispatch.wait(&mut state);
        }
    }

    /// Records the outcome of a running job and releases its target.
    ///
    /// Returns false, leaving the job untouched, if it is not running.
    pub fn finish(&self, id: JobId, outcome: JobOutcome) -> bool {
        let mut state = self.state.lock();
        let Some(job) = state.jobs.get_mut(&id) else {
            warn!(job_id = %id, "finish for unknown job");
            return false;
        };
        if job.status != JobStatus::Running {
            warn!(job_id = %id, status = ?job.status, "finish for job that is not running");
            return false;
        }

        job.finished_at = Some(Utc::now());
        match outcome {
            JobOutcome::Completed(result) => {
                job.status = JobStatus::Completed;
                job.result = Some(result);
            }
            JobOutcome::Failed(message) => {
                job.status = JobStatus::Failed;
                job.error = Some(message);
            }
        }

        let target = job.target();
        let key = job.payload.key();
        let failed = job.status == JobStatus::Failed;
        state.active.remove(&target);
        if failed {
            state.unresolved.entry(key).or_default().push(id);
        } else {
            // Earlier failures of this recalculation are settled now.
            if let Some(settled) = state.unresolved.remove(&key) {
                for old in settled.into_iter().rev() {
                    state.finished.push_front(old);
                }
            }
            state.finished.push_back(id);
        }
        while state.finished.len() > self.retention {
            if let Some(evicted) = state.finished.pop_front() {
                state.jobs.remove(&evicted);
            }
        }
        drop(state);

        self.dispatch.notify_all();
        self.settled.notify_all();
        true
    }

    /// Stops accepting jobs. Already queued jobs are still handed out.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.dispatch.notify_all();
        self.settled.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Waits until job `id` is terminal and returns it.
    ///
    /// Returns `None` for unknown or evicted jobs. On timeout, returns the
    /// job in whatever state it has reached.
    pub fn wait_for(&self, id: JobId, timeout: Duration) -> Option<Job> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let terminal = match state.jobs.get(&id) {
                None => return None,
                Some(job) => job.status.is_terminal(),
            };
            if terminal || self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.jobs.get(&id).cloned();
            }
        }
    }

    /// Waits until nothing is queued or running. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_idle() {
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }
}

/// Admission for one job, taken with [`JobQueue::reserve`].
///
/// Dropping the slot without submitting gives the admission back.
#[derive(Debug)]
#[must_use]
pub struct JobSlot<'a> {
    queue: &'a JobQueue,
    open: bool,
}

impl JobSlot<'_> {
    /// Enqueues the job and returns a snapshot of it in the `queued` state.
    pub fn submit(mut self, kind: JobKind, payload: RecalculatePayload) -> Job {
        self.open = false;
        self.queue.push(kind, payload)
    }
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        if self.open {
            self.queue.release();
        }
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
