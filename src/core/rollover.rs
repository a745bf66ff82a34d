//! Month rollover planning.
//!
//! Seeds a target month's budget plan from a source month. This module
//! computes what the rollover should create; the engine applies the result
//! through the same mutation primitives every other command uses, so the
//! rollover cannot develop divergent semantics. Allocations whose envelope
//! no longer exists are dropped here - this is the authoritative
//! enforcement point against ghost-envelope resurrection.

use crate::core::plan::BudgetPlan;
use crate::model::{EnvelopeRegistry, Frequency, MonthKey, Money};
use tracing::{debug, info};

/// An income source the rollover wants created in the target month.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomeSourceDraft {
    /// Source name copied from the source month
    pub name: String,
    /// Income amount
    pub amount: Money,
    /// Repeat cadence
    pub frequency: Frequency,
}

/// An allocation the rollover wants created in the target month.
#[derive(Clone, Debug, PartialEq)]
pub struct AllocationDraft {
    /// Envelope the budget is assigned to; verified to exist at plan time
    pub envelope_id: String,
    /// Budgeted amount copied from the source month
    pub budgeted: Money,
    /// Whether a funding income transaction should accompany the
    /// allocation. False for piggybanks, which are funded by the
    /// contribution engine instead.
    pub fund: bool,
}

/// Everything `copy_previous_month` should create, plus what it dropped.
#[derive(Clone, Debug, Default)]
pub struct RolloverPlan {
    /// Income sources to create in the target month
    pub income_sources: Vec<IncomeSourceDraft>,
    /// Allocations to create in the target month
    pub allocations: Vec<AllocationDraft>,
    /// Envelope ids whose allocations were dropped because the envelope no
    /// longer exists
    pub dropped_envelopes: Vec<String>,
}

/// Computes the rollover from `source` into `target`.
///
/// - Income sources copy unless the target month already has one with the
///   same name.
/// - Allocations copy only when their envelope still exists in the live
///   registry and the target month has no allocation for it yet; ordinary
///   envelopes additionally get a funding income transaction so their
///   derived balance is correct immediately.
/// - Piggybank allocations copy without funding.
#[must_use]
pub fn plan_rollover(
    registry: &EnvelopeRegistry,
    plan: &BudgetPlan,
    source: MonthKey,
    target: MonthKey,
) -> RolloverPlan {
    let mut result = RolloverPlan::default();

    for income in plan.income_sources_for(source) {
        let already_present = plan
            .income_sources_for(target)
            .iter()
            .any(|existing| existing.name == income.name);
        if already_present {
            debug!(name = %income.name, %target, "skipping income source already in target month");
            continue;
        }
        result.income_sources.push(IncomeSourceDraft {
            name: income.name.clone(),
            amount: income.amount,
            frequency: income.frequency,
        });
    }

    for allocation in plan.allocations_for(source) {
        let Some(envelope) = registry.get(&allocation.envelope_id) else {
            debug!(envelope_id = %allocation.envelope_id, "dropping allocation for deleted envelope");
            result.dropped_envelopes.push(allocation.envelope_id.clone());
            continue;
        };
        if plan.allocation_for(&allocation.envelope_id, target).is_some() {
            debug!(envelope_id = %allocation.envelope_id, %target, "target month already allocated");
            continue;
        }
        result.allocations.push(AllocationDraft {
            envelope_id: allocation.envelope_id.clone(),
            budgeted: allocation.budgeted,
            fund: !envelope.is_piggybank,
        });
    }

    info!(
        %source,
        %target,
        income_sources = result.income_sources.len(),
        allocations = result.allocations.len(),
        dropped = result.dropped_envelopes.len(),
        "planned month rollover"
    );
    result
}
