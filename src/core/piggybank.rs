//! Piggybank contribution engine.
//!
//! Piggybanks receive one automatic income contribution per month. This
//! module decides which contributions are due - skipping paused piggybanks,
//! months before the piggybank existed, future months, and months that
//! already have a contribution - and derives goal progress from the
//! all-time balance. Goal state is never stored.

use crate::core::ledger::{BalanceScope, Ledger};
use crate::model::{Envelope, EnvelopeRegistry, MonthKey, Money, TransactionKind};
use std::fmt::Write as _;
use tracing::debug;

/// A contribution the engine should create.
#[derive(Clone, Debug, PartialEq)]
pub struct ContributionDraft {
    /// The piggybank envelope
    pub envelope_id: String,
    /// Envelope name, carried for reporting
    pub envelope_name: String,
    /// Contribution amount
    pub amount: Money,
}

/// Result of one contribution run, in the shape the demo binary prints.
#[derive(Clone, Debug, Default)]
pub struct ContributionReport {
    /// Contributions that were created
    pub created: Vec<ContributionDraft>,
    /// Piggybanks skipped because they were paused
    pub skipped_paused: usize,
    /// Piggybanks skipped because a contribution already existed for the
    /// month, or the month was outside the piggybank's active range
    pub skipped_not_due: usize,
}

/// Derived savings-goal state for one piggybank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GoalProgress {
    /// All-time balance of the piggybank
    pub balance: Money,
    /// The configured target, if any
    pub target: Option<Money>,
    /// Whether the target has been reached
    pub reached: bool,
    /// balance / target, when a target is configured
    pub ratio: Option<f64>,
}

/// Decides which piggybanks are due a contribution for `month`.
///
/// `current_month` is the clock's real-world month: contributions are never
/// generated retroactively before a piggybank's `created_month`, nor ahead
/// of the present.
#[must_use]
pub fn plan_contributions(
    registry: &EnvelopeRegistry,
    ledger: &Ledger,
    month: MonthKey,
    current_month: MonthKey,
) -> ContributionReport {
    let mut report = ContributionReport::default();

    for envelope in registry.values() {
        if !envelope.is_active {
            continue;
        }
        let Some(config) = envelope.piggybank_config() else {
            continue;
        };
        if config.paused {
            debug!(envelope = %envelope.name, "piggybank paused, skipping contribution");
            report.skipped_paused += 1;
            continue;
        }
        if month < config.created_month || month > current_month {
            report.skipped_not_due += 1;
            continue;
        }
        if has_contribution(ledger, &envelope.id, month) {
            debug!(envelope = %envelope.name, %month, "contribution already exists");
            report.skipped_not_due += 1;
            continue;
        }
        report.created.push(ContributionDraft {
            envelope_id: envelope.id.clone(),
            envelope_name: envelope.name.clone(),
            amount: config.monthly_contribution,
        });
    }
    report
}

/// Whether an automatic income contribution already exists for the
/// piggybank in the given month.
#[must_use]
pub fn has_contribution(ledger: &Ledger, envelope_id: &str, month: MonthKey) -> bool {
    ledger.iter().any(|tx| {
        tx.envelope_id == envelope_id
            && tx.month == month
            && tx.is_automatic
            && tx.kind == TransactionKind::Income
    })
}

/// Derives the goal state for a piggybank envelope. Returns `None` for
/// ordinary envelopes.
#[must_use]
pub fn goal_progress(envelope: &Envelope, ledger: &Ledger) -> Option<GoalProgress> {
    let config = envelope.piggybank_config()?;
    let balance = ledger.balance_of(&envelope.id, BalanceScope::AllTime);
    let target = config.target_amount;
    let reached = target.is_some_and(|target| balance >= target);
    #[allow(clippy::cast_precision_loss)]
    let ratio = target
        .filter(|target| target.cents() > 0)
        .map(|target| balance.cents() as f64 / target.cents() as f64);
    Some(GoalProgress {
        balance,
        target,
        reached,
        ratio,
    })
}

/// Formats a contribution report into a human-readable summary block.
#[must_use]
pub fn format_contribution_summary(month: MonthKey, report: &ContributionReport) -> String {
    let mut summary = format!(
        "Piggybank contributions for {month} - {} created, {} paused, {} not due\n",
        report.created.len(),
        report.skipped_paused,
        report.skipped_not_due
    );
    for contribution in &report.created {
        writeln!(
            summary,
            "  {} | +${}",
            contribution.envelope_name, contribution.amount
        )
        .unwrap();
    }
    summary
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::model::{PiggybankConfig, Transaction};
    use std::collections::BTreeMap;

    fn piggybank(id: &str, created: &str, paused: bool, target_cents: Option<i64>) -> Envelope {
        Envelope {
            id: id.to_string(),
            name: id.to_string(),
            is_active: true,
            order_index: 0,
            category_id: None,
            is_piggybank: true,
            piggybank: Some(PiggybankConfig {
                target_amount: target_cents.map(Money::from_cents),
                monthly_contribution: Money::from_cents(10_000),
                color: "#ff9800".to_string(),
                paused,
                created_month: created.parse().unwrap(),
            }),
        }
    }

    fn contribution_tx(id: &str, envelope: &str, month: &str, cents: i64) -> Transaction {
        let month: MonthKey = month.parse().unwrap();
        Transaction {
            id: id.to_string(),
            envelope_id: envelope.to_string(),
            amount: Money::from_cents(cents),
            date: month.start_datetime(),
            month,
            description: "Monthly contribution".to_string(),
            kind: TransactionKind::Income,
            reconciled: false,
            transfer_id: None,
            is_automatic: true,
        }
    }

    fn registry_of(envelopes: Vec<Envelope>) -> EnvelopeRegistry {
        envelopes
            .into_iter()
            .map(|envelope| (envelope.id.clone(), envelope))
            .collect()
    }

    #[test]
    fn test_contribution_due_for_active_piggybank() {
        // Scenario B: created 2026-01, running for 2026-03 creates exactly
        // one contribution of 100.
        let registry = registry_of(vec![piggybank("vacation", "2026-01", false, None)]);
        let ledger = Ledger::new();
        let march: MonthKey = "2026-03".parse().unwrap();

        let report = plan_contributions(&registry, &ledger, march, march);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].amount, Money::from_cents(10_000));
    }

    #[test]
    fn test_rerun_creates_nothing() {
        let registry = registry_of(vec![piggybank("vacation", "2026-01", false, None)]);
        let mut ledger = Ledger::new();
        let march: MonthKey = "2026-03".parse().unwrap();
        ledger.add(contribution_tx("c1", "vacation", "2026-03", 10_000));

        let report = plan_contributions(&registry, &ledger, march, march);
        assert!(report.created.is_empty());
        assert_eq!(report.skipped_not_due, 1);
    }

    #[test]
    fn test_paused_piggybank_is_skipped() {
        let registry = registry_of(vec![piggybank("vacation", "2026-01", true, None)]);
        let march: MonthKey = "2026-03".parse().unwrap();

        let report = plan_contributions(&registry, &Ledger::new(), march, march);
        assert!(report.created.is_empty());
        assert_eq!(report.skipped_paused, 1);
    }

    #[test]
    fn test_no_retroactive_or_future_contributions() {
        let registry = registry_of(vec![piggybank("vacation", "2026-02", false, None)]);
        let january: MonthKey = "2026-01".parse().unwrap();
        let april: MonthKey = "2026-04".parse().unwrap();
        let march: MonthKey = "2026-03".parse().unwrap();

        // before created_month
        let report = plan_contributions(&registry, &Ledger::new(), january, march);
        assert!(report.created.is_empty());

        // after the real-world month
        let report = plan_contributions(&registry, &Ledger::new(), april, march);
        assert!(report.created.is_empty());
    }

    #[test]
    fn test_manual_income_does_not_block_contribution() {
        let registry = registry_of(vec![piggybank("vacation", "2026-01", false, None)]);
        let mut ledger = Ledger::new();
        let march: MonthKey = "2026-03".parse().unwrap();
        let mut manual = contribution_tx("m1", "vacation", "2026-03", 5_000);
        manual.is_automatic = false;
        ledger.add(manual);

        let report = plan_contributions(&registry, &ledger, march, march);
        assert_eq!(report.created.len(), 1);
    }

    #[test]
    fn test_goal_progress_is_derived_from_all_time_balance() {
        let envelope = piggybank("vacation", "2026-01", false, Some(20_000));
        let mut ledger = Ledger::new();
        ledger.add(contribution_tx("c1", "vacation", "2026-01", 10_000));
        ledger.add(contribution_tx("c2", "vacation", "2026-02", 10_000));

        let progress = goal_progress(&envelope, &ledger).unwrap();
        assert!(progress.reached);
        assert_eq!(progress.balance, Money::from_cents(20_000));
        assert!((progress.ratio.unwrap() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_goal_progress_none_for_ordinary_envelope() {
        let envelope = Envelope {
            id: "groceries".to_string(),
            name: "Groceries".to_string(),
            is_active: true,
            order_index: 0,
            category_id: None,
            is_piggybank: false,
            piggybank: None,
        };
        assert!(goal_progress(&envelope, &Ledger::new()).is_none());
    }

    #[test]
    fn test_format_contribution_summary() {
        let march: MonthKey = "2026-03".parse().unwrap();
        let report = ContributionReport {
            created: vec![ContributionDraft {
                envelope_id: "vacation".to_string(),
                envelope_name: "Vacation Fund".to_string(),
                amount: Money::from_cents(10_000),
            }],
            skipped_paused: 1,
            skipped_not_due: 0,
        };
        let summary = format_contribution_summary(march, &report);
        assert!(summary.contains("2026-03"));
        assert!(summary.contains("Vacation Fund"));
        assert!(summary.contains("+$100.00"));
        assert!(summary.contains("1 paused"));
    }
}
