//! Envelope domain model.
//!
//! An envelope is a named budget category that holds allocated funds and
//! accumulates transactions. Piggybanks are a persistent envelope subtype
//! with a savings goal and a recurring automatic contribution; unlike
//! ordinary envelopes they are never scoped to a single month and are never
//! hard-deleted out of historical months.

use crate::model::{MonthKey, Money};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The live envelope registry, keyed by local envelope id.
pub type EnvelopeRegistry = BTreeMap<String, Envelope>;

/// A budget envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique identifier; temporary (`tmp-*`) until confirmed by the store
    pub id: String,
    /// Human-readable name, e.g. `"Groceries"`
    pub name: String,
    /// Whether the envelope participates in the current month
    pub is_active: bool,
    /// Display ordering within the envelope list
    pub order_index: i32,
    /// Optional grouping category
    #[serde(default)]
    pub category_id: Option<String>,
    /// Whether this is a persistent savings envelope
    pub is_piggybank: bool,
    /// Piggybank settings; present exactly when `is_piggybank` is true
    #[serde(default, rename = "piggybankConfig")]
    pub piggybank: Option<PiggybankConfig>,
}

/// Savings configuration for a piggybank envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PiggybankConfig {
    /// Savings goal; `None` means an open-ended piggybank
    #[serde(default)]
    pub target_amount: Option<Money>,
    /// Amount contributed automatically each month
    pub monthly_contribution: Money,
    /// Display color for the piggybank card
    pub color: String,
    /// Paused piggybanks receive no automatic contributions
    pub paused: bool,
    /// First month the piggybank can receive contributions
    pub created_month: MonthKey,
}

impl Envelope {
    /// The piggybank settings, if this envelope is a piggybank.
    #[must_use]
    pub fn piggybank_config(&self) -> Option<&PiggybankConfig> {
        if self.is_piggybank {
            self.piggybank.as_ref()
        } else {
            None
        }
    }
}
