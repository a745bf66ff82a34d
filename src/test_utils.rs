//! Shared helpers for unit tests: an engine wired to the in-memory store
//! with a fixed clock, plus draft builders for the common fixtures.

#![allow(clippy::unwrap_used)]

use crate::engine::{BudgetEngine, Clock, EnvelopeDraft, TransactionDraft};
use crate::model::{Money, MonthKey, PiggybankConfig, TransactionKind};
use crate::store::MemoryStore;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// A clock pinned to one instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Mid-February 2026, the "now" every test runs at.
pub fn test_clock() -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2026, 2, 15, 12, 0, 0).unwrap())
}

/// An engine on the in-memory store with a short confirm window, plus a
/// handle to the store for failure injection and assertions.
pub fn setup_engine() -> (
    BudgetEngine<MemoryStore, MemoryStore, FixedClock>,
    MemoryStore,
) {
    let store = MemoryStore::new();
    let engine = BudgetEngine::new(
        store.clone(),
        store.clone(),
        test_clock(),
        Duration::from_millis(250),
    );
    (engine, store)
}

pub fn month(raw: &str) -> MonthKey {
    raw.parse().unwrap()
}

/// Draft for an ordinary envelope.
pub fn envelope_draft(name: &str) -> EnvelopeDraft {
    EnvelopeDraft {
        name: name.to_string(),
        order_index: 0,
        category_id: None,
        piggybank: None,
    }
}

/// Draft for a piggybank envelope contributing `contribution_cents` per
/// month since `created_month`.
pub fn piggybank_draft(name: &str, contribution_cents: i64, created_month: &str) -> EnvelopeDraft {
    EnvelopeDraft {
        name: name.to_string(),
        order_index: 0,
        category_id: None,
        piggybank: Some(PiggybankConfig {
            target_amount: None,
            monthly_contribution: Money::from_cents(contribution_cents),
            color: "#2196f3".to_string(),
            paused: false,
            created_month: month(created_month),
        }),
    }
}

/// Draft for a transaction dated at the start of `month_key`.
pub fn tx_draft(
    envelope_id: &str,
    kind: TransactionKind,
    cents: i64,
    month_key: &str,
) -> TransactionDraft {
    let month = month(month_key);
    TransactionDraft {
        envelope_id: envelope_id.to_string(),
        amount: Money::from_cents(cents),
        date: month.start_datetime(),
        description: "test".to_string(),
        kind,
        reconciled: false,
    }
}
