//! Full-dataset snapshot export and import.
//!
//! A [`Snapshot`] carries every envelope, transaction, income source, and
//! allocation in the canonical wire shapes. Import runs each record back
//! through the normalization boundary: months are re-derived from dates,
//! amounts accept numbers or numeric strings, and legacy transfer-kind
//! records are kept but warned about. Exporting and re-importing a dataset
//! reproduces identical per-envelope balances for every month.

use crate::errors::Result;
use crate::model::{Allocation, Envelope, IncomeSource, MonthKey, Transaction, TransactionKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The complete dataset in wire form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Every envelope, piggybanks included
    pub envelopes: Vec<Envelope>,
    /// Every transaction across all months
    pub transactions: Vec<Transaction>,
    /// Every income source across all months
    pub income_sources: Vec<IncomeSource>,
    /// Every allocation across all months
    pub allocations: Vec<Allocation>,
}

impl Snapshot {
    /// Serializes the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns a serialization error if JSON encoding fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a snapshot from JSON and normalizes every record.
    ///
    /// # Errors
    /// Returns a serialization error when the JSON is malformed or a record
    /// fails the normalization boundary (bad amount, bad month key).
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut snapshot: Self = serde_json::from_str(raw)?;
        snapshot.normalize();
        Ok(snapshot)
    }

    /// Re-derives derived fields on every record. Month keys that disagree
    /// with their dates are corrected, and legacy transfer-kind records are
    /// reported; they survive import but contribute nothing to balances.
    pub fn normalize(&mut self) {
        for tx in &mut self.transactions {
            let derived = MonthKey::from_datetime(&tx.date);
            if tx.month != derived {
                warn!(id = %tx.id, stored = %tx.month, %derived, "correcting month key from date");
            }
            tx.normalize();
            if tx.kind == TransactionKind::Transfer {
                warn!(id = %tx.id, "legacy transfer-kind record; it will not affect balances");
            }
        }
    }
}
