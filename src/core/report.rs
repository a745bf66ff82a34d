//! Report generation.
//!
//! Builds structured month summaries from the registry, plan, and ledger.
//! Everything here is derived on demand; no report field is ever cached.
//! The structured data is what an embedding UI would render, and
//! `format_month_summary` is the plain-text rendering the demo binary
//! prints.

use crate::core::ledger::{BalanceScope, Ledger};
use crate::core::piggybank::{GoalProgress, goal_progress};
use crate::core::plan::BudgetPlan;
use crate::model::{EnvelopeRegistry, MonthKey, Money};
use std::fmt::Write as _;

/// One envelope row in a month summary.
#[derive(Clone, Debug)]
pub struct EnvelopeRow {
    /// Envelope id
    pub envelope_id: String,
    /// Envelope name
    pub name: String,
    /// Budgeted amount for the month, zero when unallocated
    pub budgeted: Money,
    /// Derived balance: month-scoped for ordinary envelopes, all-time for
    /// piggybanks
    pub balance: Money,
    /// Goal progress, present for piggybanks only
    pub goal: Option<GoalProgress>,
}

/// A full month summary.
#[derive(Clone, Debug)]
pub struct MonthSummary {
    /// The month being summarized
    pub month: MonthKey,
    /// Per-envelope rows, ordered by `order_index` then name
    pub rows: Vec<EnvelopeRow>,
    /// Total income for the month
    pub total_income: Money,
    /// Total allocated, filtered to existing envelopes
    pub total_allocated: Money,
    /// Income minus allocated
    pub available_to_budget: Money,
}

/// Builds the summary for one month. Inactive envelopes are omitted unless
/// they still carry an allocation for the month, so the visible rows always
/// sum to `total_allocated`.
#[must_use]
pub fn month_summary(
    registry: &EnvelopeRegistry,
    plan: &BudgetPlan,
    ledger: &Ledger,
    month: MonthKey,
) -> MonthSummary {
    let mut rows: Vec<EnvelopeRow> = registry
        .values()
        .filter(|envelope| {
            envelope.is_active || plan.allocation_for(&envelope.id, month).is_some()
        })
        .map(|envelope| {
            let scope = if envelope.is_piggybank {
                BalanceScope::AllTime
            } else {
                BalanceScope::Month(month)
            };
            EnvelopeRow {
                envelope_id: envelope.id.clone(),
                name: envelope.name.clone(),
                budgeted: plan
                    .allocation_for(&envelope.id, month)
                    .map_or(Money::ZERO, |alloc| alloc.budgeted),
                balance: ledger.balance_of(&envelope.id, scope),
                goal: goal_progress(envelope, ledger),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        let order_a = registry.get(&a.envelope_id).map_or(0, |e| e.order_index);
        let order_b = registry.get(&b.envelope_id).map_or(0, |e| e.order_index);
        order_a.cmp(&order_b).then_with(|| a.name.cmp(&b.name))
    });

    MonthSummary {
        month,
        total_income: plan.total_income(month),
        total_allocated: plan.total_allocated(registry, month),
        available_to_budget: plan.available_to_budget(registry, month),
        rows,
    }
}

/// Formats a month summary into a human-readable block.
#[must_use]
pub fn format_month_summary(summary: &MonthSummary) -> String {
    let mut out = format!(
        "Budget for {} - income ${} | allocated ${} | available ${}\n",
        summary.month, summary.total_income, summary.total_allocated, summary.available_to_budget
    );
    for row in &summary.rows {
        write!(
            out,
            "  {} | budgeted ${} | balance ${}",
            row.name, row.budgeted, row.balance
        )
        .unwrap();
        if let Some(goal) = &row.goal {
            match goal.target {
                Some(target) => {
                    let state = if goal.reached { "reached" } else { "saving" };
                    write!(out, " | goal ${target} ({state})").unwrap();
                }
                None => out.push_str(" | open-ended piggybank"),
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::model::{
        Envelope, Frequency, IncomeSource, PiggybankConfig, Transaction, TransactionKind,
    };
    use std::collections::BTreeMap;

    fn setup() -> (EnvelopeRegistry, BudgetPlan, Ledger, MonthKey) {
        let month: MonthKey = "2026-02".parse().unwrap();
        let mut registry = BTreeMap::new();
        registry.insert(
            "groceries".to_string(),
            Envelope {
                id: "groceries".to_string(),
                name: "Groceries".to_string(),
                is_active: true,
                order_index: 0,
                category_id: None,
                is_piggybank: false,
                piggybank: None,
            },
        );
        registry.insert(
            "vacation".to_string(),
            Envelope {
                id: "vacation".to_string(),
                name: "Vacation Fund".to_string(),
                is_active: true,
                order_index: 1,
                category_id: None,
                is_piggybank: true,
                piggybank: Some(PiggybankConfig {
                    target_amount: Some(Money::from_cents(100_000)),
                    monthly_contribution: Money::from_cents(10_000),
                    color: "#ff9800".to_string(),
                    paused: false,
                    created_month: "2026-01".parse().unwrap(),
                }),
            },
        );

        let mut plan = BudgetPlan::new();
        plan.upsert_income_source(IncomeSource {
            id: "i1".to_string(),
            month,
            name: "Salary".to_string(),
            amount: Money::from_cents(300_000),
            frequency: Frequency::Monthly,
        });
        plan.set_allocation(
            &registry,
            "a1".to_string(),
            "groceries",
            month,
            Money::from_cents(50_000),
        )
        .unwrap();

        let mut ledger = Ledger::new();
        // piggybank balance accumulates across months
        for (id, tx_month) in [("c1", "2026-01"), ("c2", "2026-02")] {
            let tx_month: MonthKey = tx_month.parse().unwrap();
            ledger.add(Transaction {
                id: id.to_string(),
                envelope_id: "vacation".to_string(),
                amount: Money::from_cents(10_000),
                date: tx_month.start_datetime(),
                month: tx_month,
                description: "Monthly contribution".to_string(),
                kind: TransactionKind::Income,
                reconciled: false,
                transfer_id: None,
                is_automatic: true,
            });
        }

        (registry, plan, ledger, month)
    }

    #[test]
    fn test_month_summary_totals() {
        let (registry, plan, ledger, month) = setup();
        let summary = month_summary(&registry, &plan, &ledger, month);
        assert_eq!(summary.total_income, Money::from_cents(300_000));
        assert_eq!(summary.total_allocated, Money::from_cents(50_000));
        assert_eq!(summary.available_to_budget, Money::from_cents(250_000));
    }

    #[test]
    fn test_piggybank_row_uses_all_time_balance() {
        let (registry, plan, ledger, month) = setup();
        let summary = month_summary(&registry, &plan, &ledger, month);
        let vacation = summary
            .rows
            .iter()
            .find(|row| row.name == "Vacation Fund")
            .unwrap();
        assert_eq!(vacation.balance, Money::from_cents(20_000));
        assert!(vacation.goal.is_some());
    }

    #[test]
    fn test_rows_follow_order_index() {
        let (registry, plan, ledger, month) = setup();
        let summary = month_summary(&registry, &plan, &ledger, month);
        assert_eq!(summary.rows[0].name, "Groceries");
        assert_eq!(summary.rows[1].name, "Vacation Fund");
    }

    #[test]
    fn test_deactivated_piggybank_with_allocation_stays_visible() {
        let (mut registry, mut plan, ledger, month) = setup();
        plan.set_allocation(
            &registry,
            "a2".to_string(),
            "vacation",
            month,
            Money::from_cents(10_000),
        )
        .unwrap();
        if let Some(envelope) = registry.get_mut("vacation") {
            envelope.is_active = false;
        }

        let summary = month_summary(&registry, &plan, &ledger, month);
        assert_eq!(summary.total_allocated, Money::from_cents(60_000));
        let visible: Money = summary.rows.iter().map(|row| row.budgeted).sum();
        assert_eq!(visible, summary.total_allocated);
    }

    #[test]
    fn test_format_month_summary_contains_key_lines() {
        let (registry, plan, ledger, month) = setup();
        let summary = month_summary(&registry, &plan, &ledger, month);
        let text = format_month_summary(&summary);
        assert!(text.contains("2026-02"));
        assert!(text.contains("Groceries"));
        assert!(text.contains("available $2500.00"));
        assert!(text.contains("goal $1000.00"));
    }
}
