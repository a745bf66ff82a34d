//! Transaction domain model.
//!
//! Amounts are always non-negative; the direction of money movement is
//! carried by [`TransactionKind`]. Transfers between envelopes are stored
//! as a paired expense/income with a shared `transfer_id`, so every
//! envelope's balance falls out of the same income-minus-expense sum.

use crate::model::{MonthKey, Money};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a transaction. Lowercase on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Money entering an envelope
    Income,
    /// Money leaving an envelope
    Expense,
    /// Legacy wire value; accepted on import but the engine only ever
    /// writes income/expense pairs for transfers
    Transfer,
}

impl TransactionKind {
    /// The lowercase wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> crate::errors::Result<Self> {
        match s {
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            "transfer" => Ok(Self::Transfer),
            other => Err(crate::errors::Error::Validation {
                message: format!("unknown transaction kind: {other}"),
            }),
        }
    }
}

/// A single ledger entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier; temporary (`tmp-*`) until confirmed by the store
    pub id: String,
    /// The envelope this entry belongs to
    pub envelope_id: String,
    /// Non-negative amount; direction comes from `kind`
    pub amount: Money,
    /// When the transaction happened
    pub date: DateTime<Utc>,
    /// Month scope, always derivable from `date`
    pub month: MonthKey,
    /// Human-readable description
    pub description: String,
    /// Direction of the entry
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Whether the user has reconciled this entry against a statement
    #[serde(default)]
    pub reconciled: bool,
    /// Pairing id shared by exactly two sides of a transfer
    #[serde(default)]
    pub transfer_id: Option<String>,
    /// Set on entries generated by rollover funding and piggybank
    /// contributions rather than by direct user action
    #[serde(default)]
    pub is_automatic: bool,
}

impl Transaction {
    /// Re-derives `month` from `date`. Called at every normalization
    /// boundary so the two fields can never drift apart.
    pub fn normalize(&mut self) {
        self.month = MonthKey::from_datetime(&self.date);
    }

    /// The signed effect of this entry on its envelope's balance, in the
    /// derivation rule's terms: income adds, expense subtracts, legacy
    /// transfer records contribute nothing.
    #[must_use]
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            TransactionKind::Income => self.amount,
            TransactionKind::Expense => -self.amount,
            TransactionKind::Transfer => Money::ZERO,
        }
    }
}
