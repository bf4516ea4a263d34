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

//! LedgerStore public API integration tests.

use chrono::Utc;
use ledger_recalc::{
    KeyValueStore, LedgerError, LedgerStore, MemoryStore, PropagationCursor, StoreError,
    TransactionId, TransactionKind, balance_key,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::Arc;

/// Mirror that rejects writes to selected keys until healed.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    broken: Mutex<HashSet<String>>,
}

impl FlakyStore {
    fn break_key(&self, key: String) {
        self.broken.lock().insert(key);
    }

    fn heal(&self) {
        self.broken.lock().clear();
    }
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.broken.lock().contains(key) {
            return Err(StoreError::new(key, "connection refused"));
        }
        self.inner.set(key, value)
    }
}

fn balances(ledger: &LedgerStore) -> Vec<Decimal> {
    ledger.snapshot().iter().map(|tx| tx.balance_after).collect()
}

#[test]
fn sample_ledger_matches_demo_data() {
    let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    assert_eq!(ledger.len(), 10);

    let tx = ledger.get(TransactionId(4)).unwrap();
    assert_eq!(tx.kind, TransactionKind::Income);
    assert_eq!(tx.price, dec!(400));
    assert_eq!(tx.balance_after, dec!(400));

    let tx = ledger.get(TransactionId(7)).unwrap();
    assert_eq!(tx.kind, TransactionKind::Expense);
}

#[test]
fn get_outside_range_is_not_found() {
    let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    assert_eq!(
        ledger.get(TransactionId(11)),
        Err(LedgerError::TransactionNotFound(TransactionId(11)))
    );
    assert_eq!(
        ledger.apply_edit(TransactionId(0), dec!(10)).unwrap_err(),
        LedgerError::TransactionNotFound(TransactionId(0))
    );
}

#[test]
fn edit_scenario_propagates_to_later_transactions_only() {
    let store = Arc::new(MemoryStore::new());
    let ledger = LedgerStore::sample(10, store.clone());
    let original = balances(&ledger);

    let receipt = ledger.apply_edit(TransactionId(4), dec!(500)).unwrap();
    assert_eq!(receipt.balance_change, dec!(100));
    assert_eq!(receipt.old_balance_after, dec!(400));
    assert_eq!(receipt.transaction.balance_after, dec!(500));
    assert_eq!(receipt.transaction.price, dec!(500));

    let updated = ledger
        .propagate(TransactionId(4), receipt.balance_change, receipt.revision)
        .unwrap();
    assert_eq!(updated, 6);

    let after = balances(&ledger);
    assert_eq!(after[..3], original[..3]);
    assert_eq!(after[3], dec!(500));
    for i in 4..10 {
        assert_eq!(after[i], original[i] + dec!(100), "transaction {}", i + 1);
    }

    // Mirror carries the propagated balances.
    assert_eq!(
        store.get(&balance_key(TransactionId(10))).unwrap().as_deref(),
        Some("1100")
    );
    assert_eq!(store.get(&balance_key(TransactionId(3))).unwrap(), None);
}

#[test]
fn invalid_price_leaves_ledger_unchanged() {
    let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    let before = ledger.snapshot();

    let result = ledger.apply_edit(TransactionId(4), dec!(-5));
    assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
    assert_eq!(ledger.snapshot(), before);
}

#[test]
fn editing_last_transaction_propagates_nothing() {
    let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    let receipt = ledger.apply_edit(TransactionId(10), dec!(1)).unwrap();

    assert_eq!(
        ledger.propagate(TransactionId(10), receipt.balance_change, receipt.revision),
        Ok(0)
    );
    assert_eq!(
        ledger.cursor(TransactionId(10), receipt.revision),
        Some(PropagationCursor::Complete)
    );
}

#[test]
fn interrupted_propagation_resumes_from_cursor() {
    let clean = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    let receipt = clean.apply_edit(TransactionId(4), dec!(500)).unwrap();
    clean
        .propagate(TransactionId(4), receipt.balance_change, receipt.revision)
        .unwrap();

    let store = Arc::new(FlakyStore::default());
    let ledger = LedgerStore::sample(10, store.clone());
    let receipt = ledger.apply_edit(TransactionId(4), dec!(500)).unwrap();
    store.break_key(balance_key(TransactionId(7)));

    let err = ledger
        .propagate(TransactionId(4), receipt.balance_change, receipt.revision)
        .unwrap_err();
    match err {
        LedgerError::Propagation {
            transaction_id,
            cursor,
            ..
        } => {
            assert_eq!(transaction_id, TransactionId(7));
            assert_eq!(cursor, TransactionId(6));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        ledger.cursor(TransactionId(4), receipt.revision),
        Some(PropagationCursor::At(TransactionId(6)))
    );
    // 5 and 6 moved, 7 did not.
    assert_eq!(ledger.get(TransactionId(6)).unwrap().balance_after, dec!(700));
    assert_eq!(ledger.get(TransactionId(7)).unwrap().balance_after, dec!(700));

    store.heal();
    let resumed = ledger
        .propagate(TransactionId(4), receipt.balance_change, receipt.revision)
        .unwrap();
    assert_eq!(resumed, 4);
    assert_eq!(balances(&ledger), balances(&clean));

    // A replay of the same recalculation changes nothing.
    assert_eq!(
        ledger.propagate(TransactionId(4), receipt.balance_change, receipt.revision),
        Ok(0)
    );
    assert_eq!(balances(&ledger), balances(&clean));
}

#[test]
fn equal_deltas_from_separate_edits_both_apply() {
    let ledger = LedgerStore::sample(5, Arc::new(MemoryStore::new()));

    let first = ledger.apply_edit(TransactionId(2), dec!(300)).unwrap();
    let second = ledger.apply_edit(TransactionId(2), dec!(400)).unwrap();
    assert_eq!(first.balance_change, second.balance_change);
    assert_ne!(first.revision, second.revision);

    ledger
        .propagate(TransactionId(2), first.balance_change, first.revision)
        .unwrap();
    ledger
        .propagate(TransactionId(2), second.balance_change, second.revision)
        .unwrap();

    assert_eq!(ledger.get(TransactionId(2)).unwrap().balance_after, dec!(400));
    assert_eq!(ledger.get(TransactionId(5)).unwrap().balance_after, dec!(700));
}

#[test]
fn history_ledger_stays_consistent_after_edits() {
    let now = Utc::now();
    let entries = (1..=20u32).map(|i| {
        let kind = if i % 3 == 0 {
            TransactionKind::Expense
        } else {
            TransactionKind::Income
        };
        (now, kind, Decimal::from(i * 7))
    });
    let ledger = LedgerStore::from_history(dec!(1000), entries, Arc::new(MemoryStore::new())).unwrap();
    assert_eq!(ledger.verify(dec!(1000)), None);

    for (id, price) in [(3, dec!(1.25)), (17, dec!(99)), (1, dec!(40)), (3, dec!(12))] {
        let receipt = ledger.apply_edit(TransactionId(id), price).unwrap();
        // Own balance is already right; later ones are not yet.
        ledger
            .propagate(TransactionId(id), receipt.balance_change, receipt.revision)
            .unwrap();
    }

    assert_eq!(ledger.verify(dec!(1000)), None);
}

#[test]
fn unpropagated_edit_is_detected_by_verify() {
    let now = Utc::now();
    let ledger = LedgerStore::from_history(
        Decimal::ZERO,
        [
            (now, TransactionKind::Income, dec!(10)),
            (now, TransactionKind::Income, dec!(10)),
        ],
        Arc::new(MemoryStore::new()),
    )
    .unwrap();

    ledger.apply_edit(TransactionId(1), dec!(15)).unwrap();
    assert_eq!(ledger.verify(Decimal::ZERO), Some(TransactionId(2)));
}

#[test]
fn overflowing_edit_is_rejected_without_change() {
    let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    let receipt = ledger.apply_edit(TransactionId(2), dec!(300)).unwrap();
    ledger
        .propagate(TransactionId(2), receipt.balance_change, receipt.revision)
        .unwrap();
    let before = ledger.snapshot();

    let result = ledger.apply_edit(TransactionId(4), Decimal::MAX);
    assert!(matches!(result, Err(LedgerError::InvalidArgument(_))));
    assert_eq!(ledger.snapshot(), before);

    // The next edit of the same row still sees the old price.
    let receipt = ledger.apply_edit(TransactionId(4), dec!(450)).unwrap();
    assert_eq!(receipt.balance_change, dec!(50));
    assert_eq!(receipt.revision, 1);
}

#[test]
fn overflowing_propagation_stops_before_the_row() {
    let ledger = LedgerStore::sample(10, Arc::new(MemoryStore::new()));
    let top = ledger.apply_edit(TransactionId(10), Decimal::MAX).unwrap();
    assert_eq!(top.transaction.balance_after, Decimal::MAX);

    let receipt = ledger.apply_edit(TransactionId(2), dec!(300)).unwrap();
    let result = ledger.propagate(TransactionId(2), receipt.balance_change, receipt.revision);
    assert_eq!(result, Err(LedgerError::BalanceOverflow(TransactionId(10))));

    assert_eq!(ledger.get(TransactionId(9)).unwrap().balance_after, dec!(1000));
    assert_eq!(ledger.get(TransactionId(10)).unwrap().balance_after, Decimal::MAX);
    assert_eq!(
        ledger.cursor(TransactionId(2), receipt.revision),
        Some(PropagationCursor::At(TransactionId(9)))
    );
}
