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

//! # Ledger Recalc
//!
//! A running-balance transaction ledger that stays consistent when a
//! historical transaction is edited after later transactions were recorded.
//!
//! ## Core Components
//!
//! - [`LedgerStore`]: ordered transactions and their running balances
//! - [`JobQueue`]: job lifecycle, per-transaction serialization, status lookup
//! - [`WorkerPool`]: fixed-size pool executing jobs through a [`JobHandler`]
//! - [`RecalculationEngine`]: propagates an edit's balance change forward
//! - [`LedgerService`]: the synchronous edit path wired to the above
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ledger_recalc::{JobStatus, LedgerConfig, LedgerService, LedgerStore, MemoryStore, TransactionId};
//! use rust_decimal_macros::dec;
//!
//! let ledger = Arc::new(LedgerStore::sample(10, Arc::new(MemoryStore::new())));
//! let service = LedgerService::start(LedgerConfig::default(), ledger).unwrap();
//!
//! // Edit transaction 4 (income) from 400 to 500
//! let outcome = service.edit_price(TransactionId(4), dec!(500)).unwrap();
//! assert_eq!(outcome.transaction.balance_after, dec!(500));
//!
//! // Later balances are adjusted in the background
//! let job = service.wait_for(outcome.job_id, Duration::from_secs(5)).unwrap();
//! assert_eq!(job.status, JobStatus::Completed);
//! assert_eq!(service.transaction(TransactionId(10)).unwrap().balance_after, dec!(1100));
//!
//! service.shutdown();
//! ```
//!
//! ## Thread Safety
//!
//! Ledger rows are locked individually. Jobs for the same transaction run one
//! at a time in enqueue order; jobs for different transactions run in parallel.

mod base;
pub mod config;
pub mod error;
mod job;
mod job_queue;
mod ledger;
mod recalculation;
mod service;
pub mod store;
mod transaction;
mod worker;

pub use base::{JobId, TransactionId};
pub use config::LedgerConfig;
pub use error::{LedgerError, StoreError};
pub use job::{Job, JobKind, JobResult, JobStatus, RecalculatePayload};
pub use job_queue::{JobOutcome, JobQueue, JobSlot};
pub use ledger::{EditReceipt, LedgerStore, PropagationCursor};
pub use recalculation::RecalculationEngine;
pub use service::{EditOutcome, LedgerService, parse_price};
pub use store::{KeyValueStore, MemoryStore, balance_key};
pub use transaction::{Transaction, TransactionKind};
pub use worker::{JobHandler, WorkerPool};
