//! Monthly budget plan - income sources, allocations, and the
//! available-to-budget computation.
//!
//! [`BudgetPlan::set_allocation`] is the single choke point that prevents
//! ghost allocations: every write is validated against the live envelope
//! registry at call time, and every sum filters through the same existence
//! check, so an allocation orphaned by a concurrent envelope deletion can
//! never contribute to a total even if it was not actively removed.

use crate::errors::{Error, Result};
use crate::model::{Allocation, EnvelopeRegistry, IncomeSource, MonthKey, Money};
use std::collections::BTreeMap;
use tracing::warn;

/// Outcome of an allocation write.
#[derive(Clone, Debug)]
pub struct AllocationWrite {
    /// The record now in the plan
    pub current: Allocation,
    /// The record it replaced, when the write was an update
    pub previous: Option<Allocation>,
}

/// Per-month income sources and envelope allocations.
#[derive(Clone, Debug, Default)]
pub struct BudgetPlan {
    income_sources: BTreeMap<String, IncomeSource>,
    allocations: BTreeMap<String, Allocation>,
}

impl BudgetPlan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the budgeted amount for one envelope in one month, updating the
    /// existing allocation when one exists. The validation gate: a write
    /// whose envelope does not resolve in the live registry is rejected
    /// with a warning before anything changes.
    ///
    /// # Errors
    /// Returns [`Error::UnknownEnvelope`] when the envelope is not in the
    /// registry.
    pub fn set_allocation(
        &mut self,
        registry: &EnvelopeRegistry,
        id: String,
        envelope_id: &str,
        month: MonthKey,
        budgeted: Money,
    ) -> Result<AllocationWrite> {
        if !registry.contains_key(envelope_id) {
            warn!(envelope_id, %month, "dropping allocation for unknown envelope");
            return Err(Error::UnknownEnvelope {
                envelope_id: envelope_id.to_string(),
            });
        }

        let existing_id = self
            .allocations
            .values()
            .find(|alloc| alloc.envelope_id == envelope_id && alloc.month == month)
            .map(|alloc| alloc.id.clone());

        match existing_id {
            Some(existing_id) => {
                let current = Allocation {
                    id: existing_id.clone(),
                    envelope_id: envelope_id.to_string(),
                    month,
                    budgeted,
                };
                let previous = match self.allocations.get_mut(&existing_id) {
                    Some(slot) => std::mem::replace(slot, current.clone()),
                    // existing_id came out of the map a moment ago
                    None => {
                        return Err(Error::NotFound {
                            entity: "allocation",
                            id: existing_id,
                        });
                    }
                };
                Ok(AllocationWrite {
                    current,
                    previous: Some(previous),
                })
            }
            None => {
                let current = Allocation {
                    id,
                    envelope_id: envelope_id.to_string(),
                    month,
                    budgeted,
                };
                self.allocations.insert(current.id.clone(), current.clone());
                Ok(AllocationWrite {
                    current,
                    previous: None,
                })
            }
        }
    }

    /// Replaces an allocation record wholesale, used by rollback.
    pub fn restore_allocation(&mut self, allocation: Allocation) {
        self.allocations
            .insert(allocation.id.clone(), allocation);
    }

    /// Removes an allocation by id.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when no allocation has this id.
    pub fn remove_allocation(&mut self, id: &str) -> Result<Allocation> {
        self.allocations.remove(id).ok_or_else(|| Error::NotFound {
            entity: "allocation",
            id: id.to_string(),
        })
    }

    /// The allocation for one envelope in one month, if any.
    #[must_use]
    pub fn allocation_for(&self, envelope_id: &str, month: MonthKey) -> Option<&Allocation> {
        self.allocations
            .values()
            .find(|alloc| alloc.envelope_id == envelope_id && alloc.month == month)
    }

    /// All allocations scoped to the given month, including orphaned ones;
    /// the sums filter, readers that render rows should too.
    #[must_use]
    pub fn allocations_for(&self, month: MonthKey) -> Vec<&Allocation> {
        self.allocations
            .values()
            .filter(|alloc| alloc.month == month)
            .collect()
    }

    /// Inserts or replaces an income source, returning the previous record
    /// when the write was an update.
    pub fn upsert_income_source(&mut self, source: IncomeSource) -> Option<IncomeSource> {
        self.income_sources.insert(source.id.clone(), source)
    }

    /// Removes an income source by id.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when no income source has this id.
    pub fn remove_income_source(&mut self, id: &str) -> Result<IncomeSource> {
        self.income_sources
            .remove(id)
            .ok_or_else(|| Error::NotFound {
                entity: "income source",
                id: id.to_string(),
            })
    }

    /// All income sources scoped to the given month.
    #[must_use]
    pub fn income_sources_for(&self, month: MonthKey) -> Vec<&IncomeSource> {
        self.income_sources
            .values()
            .filter(|source| source.month == month)
            .collect()
    }

    /// Total income for the month.
    #[must_use]
    pub fn total_income(&self, month: MonthKey) -> Money {
        self.income_sources
            .values()
            .filter(|source| source.month == month)
            .map(|source| source.amount)
            .sum()
    }

    /// Total allocated for the month, counting only allocations whose
    /// envelope currently exists. The same existence check as the write
    /// gate, applied on the read side.
    #[must_use]
    pub fn total_allocated(&self, registry: &EnvelopeRegistry, month: MonthKey) -> Money {
        self.allocations
            .values()
            .filter(|alloc| alloc.month == month)
            .filter(|alloc| registry.contains_key(&alloc.envelope_id))
            .map(|alloc| alloc.budgeted)
            .sum()
    }

    /// Available to budget: total income minus total allocated.
    #[must_use]
    pub fn available_to_budget(&self, registry: &EnvelopeRegistry, month: MonthKey) -> Money {
        self.total_income(month) - self.total_allocated(registry, month)
    }

    /// Removes every income source and allocation scoped to exactly the
    /// given month and returns them, used by the start-fresh clear.
    pub fn remove_month(&mut self, month: MonthKey) -> (Vec<IncomeSource>, Vec<Allocation>) {
        let source_ids: Vec<String> = self
            .income_sources
            .values()
            .filter(|source| source.month == month)
            .map(|source| source.id.clone())
            .collect();
        let allocation_ids: Vec<String> = self
            .allocations
            .values()
            .filter(|alloc| alloc.month == month)
            .map(|alloc| alloc.id.clone())
            .collect();

        let sources = source_ids
            .iter()
            .filter_map(|id| self.income_sources.remove(id))
            .collect();
        let allocations = allocation_ids
            .iter()
            .filter_map(|id| self.allocations.remove(id))
            .collect();
        (sources, allocations)
    }

    /// Removes the allocations referencing an envelope in one month,
    /// used by the envelope-deletion cascade.
    pub fn remove_allocations_for_envelope(
        &mut self,
        envelope_id: &str,
        month: MonthKey,
    ) -> Vec<Allocation> {
        let ids: Vec<String> = self
            .allocations
            .values()
            .filter(|alloc| alloc.envelope_id == envelope_id && alloc.month == month)
            .map(|alloc| alloc.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.allocations.remove(id))
            .collect()
    }

    /// Re-inserts an income source, used by rollback.
    pub fn restore_income_source(&mut self, source: IncomeSource) {
        self.income_sources.insert(source.id.clone(), source);
    }

    /// Iterates over every income source.
    pub fn iter_income_sources(&self) -> impl Iterator<Item = &IncomeSource> {
        self.income_sources.values()
    }

    /// Iterates over every allocation.
    pub fn iter_allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.values()
    }
}
