//! Canonical typed domain model.
//!
//! Every external record (store rows, wire JSON, snapshot imports) is
//! converted into these types at a single normalization boundary before it
//! reaches any business logic: amounts become fixed-point [`Money`], dates
//! become UTC instants, month keys are re-derived from dates. Nothing past
//! this module branches on representation.

/// Envelope and piggybank configuration types
pub mod envelope;
/// Fixed-point money representation
pub mod money;
/// `"YYYY-MM"` month keys
pub mod month;
/// Income sources and allocations
pub mod plan;
/// Ledger transactions
pub mod transaction;

pub use envelope::{Envelope, EnvelopeRegistry, PiggybankConfig};
pub use money::Money;
pub use month::MonthKey;
pub use plan::{Allocation, Frequency, IncomeSource};
pub use transaction::{Transaction, TransactionKind};
