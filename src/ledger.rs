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

//! Ordered transaction ledger with running balances.
//!
//! Every row holds its own lock; no operation locks more than one row at a
//! time. Balance updates are plain additions, so propagations that start at
//! different transactions may interleave freely over the same rows and still
//! converge on the same balances.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use ledger_recalc::{LedgerStore, MemoryStore, TransactionId};
//!
//! let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
//! let receipt = ledger.apply_edit(TransactionId(4), dec!(500)).unwrap();
//! assert_eq!(receipt.balance_change, dec!(100));
//! assert_eq!(receipt.transaction.balance_after, dec!(500));
//!
//! let updated = ledger
//!     .propagate(TransactionId(4), receipt.balance_change, receipt.revision)
//!     .unwrap();
//! assert_eq!(updated, 6);
//! assert_eq!(ledger.get(TransactionId(10)).unwrap().balance_after, dec!(1100));
//! ```

use crate::base::TransactionId;
use crate::error::{LedgerError, Result, StoreError};
use crate::store::{KeyValueStore, balance_key};
use crate::transaction::{Transaction, TransactionKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct Row {
    id: TransactionId,
    date: DateTime<Utc>,
    kind: TransactionKind,
    price: Decimal,
    balance_after: Decimal,
    /// Number of edits applied to this row.
    revision: u32,
}

impl Row {
    fn from_transaction(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            date: tx.date,
            kind: tx.kind,
            price: tx.price,
            balance_after: tx.balance_after,
            revision: 0,
        }
    }

    fn snapshot(&self) -> Transaction {
        Transaction {
            id: self.id,
            date: self.date,
            kind: self.kind,
            price: self.price,
            balance_after: self.balance_after,
        }
    }
}

/// Result of the synchronous half of an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditReceipt {
    /// The edited transaction, with its new price and balance.
    pub transaction: Transaction,
    pub old_balance_after: Decimal,
    /// `signed_delta(new_price) - signed_delta(old_price)`; must be added to
    /// every later transaction.
    pub balance_change: Decimal,
    /// Edit number on the transaction; identifies the recalculation.
    pub revision: u32,
}

/// Low-water mark of one recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagationCursor {
    /// Every transaction up to and including this id has been adjusted.
    At(TransactionId),
    Complete,
}

/// Owns the ordered transactions and their balances.
pub struct LedgerStore {
    /// Rows in id order; row `i` holds transaction `i + 1`.
    rows: Vec<Mutex<Row>>,
    /// Progress of each recalculation, keyed by `(origin, revision)`.
    cursors: DashMap<(TransactionId, u32), PropagationCursor>,
    mirror: Arc<dyn KeyValueStore>,
}

impl LedgerStore {
    /// Builds a ledger from an existing snapshot, trusting its balances.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidArgument`] unless ids run `1..=n` in order
    /// and every price is positive.
    pub fn from_transactions(
        transactions: Vec<Transaction>,
        mirror: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let mut rows = Vec::with_capacity(transactions.len());
        for (index, tx) in transactions.into_iter().enumerate() {
            if tx.id.0 as usize != index + 1 {
                return Err(LedgerError::invalid(format!(
                    "transaction ids must be contiguous from 1, found {} at position {}",
                    tx.id,
                    index + 1
                )));
            }
            if tx.price <= Decimal::ZERO {
                return Err(LedgerError::invalid(format!(
                    "transaction {} has a non-positive price",
                    tx.id
                )));
            }
            rows.push(Mutex::new(Row::from_transaction(tx)));
        }

        Ok(Self {
            rows,
            cursors: DashMap::new(),
            mirror,
        })
    }

    /// Builds a ledger from `(date, kind, price)` entries, computing running
    /// balances from `baseline`. Ids are assigned from 1 in entry order.
    pub fn from_history<I>(baseline: Decimal, entries: I, mirror: Arc<dyn KeyValueStore>) -> Result<Self>
    where
        I: IntoIterator<Item = (DateTime<Utc>, TransactionKind, Decimal)>,
    {
        let mut balance = baseline;
        let mut transactions = Vec::new();
        for (index, (date, kind, price)) in entries.into_iter().enumerate() {
            let id = TransactionId(index as u32 + 1);
            balance = balance
                .checked_add(kind.signed_delta(price))
                .ok_or_else(|| {
                    LedgerError::invalid(format!("balance of transaction {id} overflows"))
                })?;
            transactions.push(Transaction {
                id,
                date,
                kind,
                price,
                balance_after: balance,
            });
        }

        Self::from_transactions(transactions, mirror)
    }

    /// The demo data set: `n` transactions, kind by id parity,
    /// `price = balance_after = id * 100`.
    ///
    /// These balances do not satisfy the running-balance invariant; they are
    /// reproduced as-is.
    pub fn sample(n: u32, mirror: Arc<dyn KeyValueStore>) -> Self {
        let now = Utc::now();
        let rows = (1..=n)
            .map(|i| {
                let id = TransactionId(i);
                let amount = Decimal::from(i) * Decimal::ONE_HUNDRED;
                Mutex::new(Row {
                    id,
                    date: now,
                    kind: TransactionKind::from_parity(id),
                    price: amount,
                    balance_after: amount,
                    revision: 0,
                })
            })
            .collect();

        Self {
            rows,
            cursors: DashMap::new(),
            mirror,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row(&self, id: TransactionId) -> Result<&Mutex<Row>> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.rows.get(index))
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    /// # Errors
    ///
    /// Returns [`LedgerError::TransactionNotFound`] if `id` is outside the ledger.
    pub fn get(&self, id: TransactionId) -> Result<Transaction> {
        Ok(self.row(id)?.lock().snapshot())
    }

    /// All transactions in id order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.rows.iter().map(|row| row.lock().snapshot()).collect()
    }

    /// Changes the price of one transaction and its own balance.
    ///
    /// The row lock is held for the whole read-modify-write, so concurrent
    /// edits of the same transaction are serialized and each sees the price
    /// left by the previous one.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidArgument`] - `new_price` is zero or negative, or
    ///   the new balance of the transaction would overflow. The row is left
    ///   unchanged.
    /// - [`LedgerError::TransactionNotFound`] - unknown transaction.
    pub fn apply_edit(&self, id: TransactionId, new_price: Decimal) -> Result<EditReceipt> {
        if new_price <= Decimal::ZERO {
            return Err(LedgerError::invalid("price must be a positive number"));
        }

        let mut row = self.row(id)?.lock();
        let old_balance_after = row.balance_after;
        let (balance_change, balance_after) = row
            .kind
            .signed_delta(new_price)
            .checked_sub(row.kind.signed_delta(row.price))
            .and_then(|change| Some((change, old_balance_after.checked_add(change)?)))
            .ok_or_else(|| {
                LedgerError::invalid(format!(
                    "price {new_price} overflows the balance of transaction {id}"
                ))
            })?;

        row.price = new_price;
        row.balance_after = balance_after;
        row.revision += 1;

        debug!(
            transaction_id = %id,
            %balance_change,
            revision = row.revision,
            "applied edit"
        );

        Ok(EditReceipt {
            transaction: row.snapshot(),
            old_balance_after,
            balance_change,
            revision: row.revision,
        })
    }

    /// Adds `balance_change` to every transaction after `from`, in ascending
    /// id order, mirroring each new balance as it goes.
    ///
    /// Progress is tracked per `(from, revision)`: a run that failed part-way
    /// resumes after the last adjusted transaction, and a run that already
    /// completed is a no-op. Returns the number of transactions adjusted by
    /// this call.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::TransactionNotFound`] - `from` is outside the ledger.
    /// - [`LedgerError::Propagation`] - a mirror write failed; the failing
    ///   transaction and everything after it are left unchanged.
    /// - [`LedgerError::BalanceOverflow`] - a new balance would overflow; that
    ///   transaction and everything after it are left unchanged.
    pub fn propagate(
        &self,
        from: TransactionId,
        balance_change: Decimal,
        revision: u32,
    ) -> Result<usize> {
        self.row(from)?;

        let key = (from, revision);
        let start = match self.cursor(from, revision) {
            Some(PropagationCursor::Complete) => {
                debug!(transaction_id = %from, revision, "propagation already complete");
                return Ok(0);
            }
            Some(PropagationCursor::At(last)) => {
                debug!(transaction_id = %from, revision, cursor = %last, "resuming propagation");
                last.next()
            }
            None => from.next(),
        };

        let mut updated = 0;
        for row in self.rows.iter().skip(start.0 as usize - 1) {
            let mut row = row.lock();
            let Some(balance) = row.balance_after.checked_add(balance_change) else {
                warn!(
                    transaction_id = %from,
                    failed_at = %row.id,
                    %balance_change,
                    "propagation overflowed"
                );
                return Err(LedgerError::BalanceOverflow(row.id));
            };

            if let Err(source) = self.mirror.set(&balance_key(row.id), &balance.to_string()) {
                let cursor = TransactionId(row.id.0 - 1);
                warn!(
                    transaction_id = %from,
                    failed_at = %row.id,
                    %cursor,
                    error = %source,
                    "propagation interrupted"
                );
                return Err(LedgerError::Propagation {
                    transaction_id: row.id,
                    cursor,
                    source,
                });
            }

            row.balance_after = balance;
            self.cursors.insert(key, PropagationCursor::At(row.id));
            updated += 1;
            trace!(transaction_id = %row.id, %balance, "balance adjusted");
        }

        self.cursors.insert(key, PropagationCursor::Complete);
        Ok(updated)
    }

    /// Progress of the recalculation started by edit `revision` of `from`.
    pub fn cursor(&self, from: TransactionId, revision: u32) -> Option<PropagationCursor> {
        self.cursors.get(&(from, revision)).map(|cursor| *cursor)
    }

    /// Writes the current balance of `id` to the mirror.
    pub fn mirror(&self, id: TransactionId) -> Result<()> {
        let row = self.row(id)?.lock();
        self.mirror
            .set(&balance_key(id), &row.balance_after.to_string())
            .map_err(|source: StoreError| LedgerError::Propagation {
                transaction_id: id,
                cursor: id,
                source,
            })
    }

    /// Returns the first transaction whose balance is not
    /// `previous balance + signed delta`, starting from `baseline`.
    ///
    /// Only meaningful while no edit or propagation is in flight.
    pub fn verify(&self, baseline: Decimal) -> Option<TransactionId> {
        let mut expected = baseline;
        for row in &self.rows {
            let row = row.lock();
            match expected.checked_add(row.kind.signed_delta(row.price)) {
                Some(next) if next == row.balance_after => expected = next,
                _ => return Some(row.id),
            }
        }
        None
    }
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("rows", &self.rows.len())
            .field("cursors", &self.cursors.len())
            .finish()
    }
}
