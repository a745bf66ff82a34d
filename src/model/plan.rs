//! Monthly budget plan records.
//!
//! Income sources and envelope allocations are each scoped to exactly one
//! month. The derived plan totals (`total_income`, `total_allocated`,
//! `available_to_budget`) live in [`crate::core::plan`].

use crate::model::{MonthKey, Money};
use serde::{Deserialize, Serialize};

/// How often an income source repeats within its month's planning view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    /// One-off income
    Once,
    /// Weekly paycheck
    Weekly,
    /// Every two weeks
    Biweekly,
    /// Monthly salary
    Monthly,
}

/// A named income entry for one month.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeSource {
    /// Unique identifier; temporary (`tmp-*`) until confirmed by the store
    pub id: String,
    /// The month this income belongs to
    pub month: MonthKey,
    /// Source name, e.g. `"Salary"`
    pub name: String,
    /// Income amount for the month
    pub amount: Money,
    /// Repeat cadence
    pub frequency: Frequency,
}

/// The budgeted amount for one envelope in one month.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Unique identifier; temporary (`tmp-*`) until confirmed by the store
    pub id: String,
    /// The envelope the budget is assigned to
    pub envelope_id: String,
    /// The month the budget applies to
    pub month: MonthKey,
    /// Budgeted amount
    #[serde(rename = "budgetedAmount")]
    pub budgeted: Money,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_allocation_wire_field_names() {
        let allocation = Allocation {
            id: "alloc-1".to_string(),
            envelope_id: "env-1".to_string(),
            month: "2026-02".parse().unwrap(),
            budgeted: Money::from_cents(50_000),
        };
        let json = serde_json::to_value(&allocation).unwrap();
        assert_eq!(json["envelopeId"], "env-1");
        assert_eq!(json["budgetedAmount"], 500.0);
        assert_eq!(json["month"], "2026-02");
    }

    #[test]
    fn test_frequency_is_lowercase_on_wire() {
        let source = IncomeSource {
            id: "inc-1".to_string(),
            month: "2026-02".parse().unwrap(),
            name: "Salary".to_string(),
            amount: Money::from_cents(300_000),
            frequency: Frequency::Monthly,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["frequency"], "monthly");
    }
}
