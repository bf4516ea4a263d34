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

//! Ledger transactions.
//!
//! A transaction contributes a signed delta to the running balance:
//! `+price` for [`Income`], `-price` for [`Expense`].
//!
//! [`Income`]: TransactionKind::Income
//! [`Expense`]: TransactionKind::Expense

use crate::base::TransactionId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    /// Parity rule of the sample data set: even ids are income, odd ids expense.
    pub fn from_parity(id: TransactionId) -> Self {
        if id.0 % 2 == 0 {
            Self::Income
        } else {
            Self::Expense
        }
    }

    /// Contribution of `price` to the running balance.
    pub fn signed_delta(self, price: Decimal) -> Decimal {
        match self {
            Self::Income => price,
            Self::Expense => -price,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Income => f.write_str("income"),
            Self::Expense => f.write_str("expense"),
        }
    }
}

/// Point-in-time copy of a ledger row.
///
/// Rows are owned by the [`LedgerStore`](crate::LedgerStore); values of this
/// type are snapshots handed out to callers and never written back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub date: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub price: Decimal,
    pub balance_after: Decimal,
}

impl Transaction {
    pub fn signed_delta(&self) -> Decimal {
        self.kind.signed_delta(self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parity_kind() {
        assert_eq!(TransactionKind::from_parity(TransactionId(4)), TransactionKind::Income);
        assert_eq!(TransactionKind::from_parity(TransactionId(5)), TransactionKind::Expense);
    }

    #[test]
    fn signed_delta_follows_kind() {
        assert_eq!(TransactionKind::Income.signed_delta(dec!(12.50)), dec!(12.50));
        assert_eq!(TransactionKind::Expense.signed_delta(dec!(12.50)), dec!(-12.50));
    }

    #[test]
    fn serializes_with_type_tag() {
        let tx = Transaction {
            id: TransactionId(2),
            date: DateTime::<Utc>::UNIX_EPOCH,
            kind: TransactionKind::Income,
            price: dec!(200),
            balance_after: dec!(200),
        };
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["type"], "income");
        assert_eq!(value["balanceAfter"], "200");
        assert_eq!(value["id"], 2);
    }
}
