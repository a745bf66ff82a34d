//! Core business logic - framework-agnostic ledger, plan, rollover,
//! piggybank, reporting, and snapshot operations.
//!
//! Everything in here is pure with respect to the persistence layer: these
//! modules mutate and query in-memory state only. The synchronization
//! coordinator in [`crate::engine`] is the sole owner of that state and the
//! only place remote writes happen.

/// Snapshot export and import
pub mod export;
/// Transaction ledger and balance derivation
pub mod ledger;
/// Piggybank contribution planning and goal progress
pub mod piggybank;
/// Monthly budget plan: income sources, allocations, available-to-budget
pub mod plan;
/// Month summaries
pub mod report;
/// Month rollover planning
pub mod rollover;
