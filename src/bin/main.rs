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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use ledger_recalc::{
    JobStatus, LedgerConfig, LedgerService, LedgerStore, MemoryStore, TransactionId, parse_price,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Ledger Recalc - Apply price edits to a sample ledger
///
/// Seeds a ledger, applies the edits from a CSV file, waits for every
/// balance recalculation to finish and prints the ledger to stdout.
#[derive(Parser, Debug)]
#[command(name = "ledger-recalc")]
#[command(about = "Applies price edits and recalculates running balances", long_about = None)]
struct Args {
    /// Path to CSV file with edits
    ///
    /// Expected format: id,price
    /// Example: cargo run -- edits.csv > ledger.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of transactions in the sample ledger
    #[arg(long, default_value_t = 10)]
    transactions: u32,

    /// Recalculation worker threads
    #[arg(long, env = "LEDGER_WORKERS", default_value_t = ledger_recalc::config::DEFAULT_WORKERS)]
    workers: usize,

    /// Finished jobs kept for status lookup
    #[arg(long, env = "LEDGER_JOB_RETENTION", default_value_t = 1024)]
    job_retention: usize,

    /// Seconds to wait for pending recalculations
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Args {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            workers: self.workers,
            job_retention: self.job_retention,
            ..LedgerConfig::default()
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let ledger = Arc::new(LedgerStore::sample(
        args.transactions,
        Arc::new(MemoryStore::new()),
    ));
    let service = match LedgerService::start(args.config(), ledger) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error starting workers: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = apply_edits(&service, BufReader::new(file)) {
        eprintln!("Error reading edits: {}", e);
        process::exit(1);
    }

    if !service.wait_idle(Duration::from_secs(args.timeout)) {
        warn!("timed out waiting for recalculations");
    }
    log_summary(&service);

    if let Err(e) = write_ledger(&service, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }

    service.shutdown();
}

/// Raw CSV record of an edit.
///
/// Fields: `id, price`. The price is kept as text so that non-numeric
/// values are rejected by the same validation as any other request.
#[derive(Debug, Deserialize)]
struct EditRecord {
    id: u32,
    price: String,
}

/// Applies edits from a CSV reader. Returns the number of accepted edits.
///
/// Malformed rows and rejected edits are logged and skipped.
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
pub fn apply_edits<R: Read>(service: &LedgerService, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let mut accepted = 0;
    for result in rdr.deserialize::<EditRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "skipping malformed row");
                continue;
            }
        };

        let id = TransactionId(record.id);
        let edit = parse_price(&record.price).and_then(|price| service.edit_price(id, price));
        match edit {
            Ok(outcome) => {
                accepted += 1;
                info!(
                    transaction_id = %id,
                    job_id = %outcome.job_id,
                    balance_after = %outcome.transaction.balance_after,
                    "edit accepted"
                );
            }
            Err(e) => warn!(transaction_id = %id, error = %e, "edit rejected"),
        }
    }

    Ok(accepted)
}

#[derive(Debug, Serialize)]
struct LedgerRow {
    id: u32,
    date: String,
    #[serde(rename = "type")]
    kind: String,
    price: String,
    balance_after: String,
}

/// Writes the ledger in id order.
///
/// Columns: `id, date, type, price, balance_after`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_ledger<W: Write>(service: &LedgerService, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for tx in service.transactions() {
        wtr.serialize(LedgerRow {
            id: tx.id.0,
            date: tx.date.to_rfc3339(),
            kind: tx.kind.to_string(),
            price: tx.price.to_string(),
            balance_after: tx.balance_after.to_string(),
        })?;
    }

    wtr.flush()?;
    Ok(())
}

fn log_summary(service: &LedgerService) {
    let jobs = service.jobs();
    let count = |status| jobs.iter().filter(|job| job.status == status).count();
    info!(
        jobs = jobs.len(),
        completed = count(JobStatus::Completed),
        failed = count(JobStatus::Failed),
        pending = count(JobStatus::Queued) + count(JobStatus::Running),
        "recalculation summary"
    );
}
