//! Entity module - Contains all `SeaORM` entity definitions for the store
//! tables. These are the persistence-side rows; conversions to and from the
//! canonical domain model live in [`crate::store::orm`].

pub mod allocation;
pub mod envelope;
pub mod income_source;
pub mod transaction;

// Re-export specific types to avoid conflicts
pub use allocation::{Column as AllocationColumn, Entity as Allocation, Model as AllocationModel};
pub use envelope::{Column as EnvelopeColumn, Entity as Envelope, Model as EnvelopeModel};
pub use income_source::{
    Column as IncomeSourceColumn, Entity as IncomeSource, Model as IncomeSourceModel,
};
pub use transaction::{
    Column as TransactionColumn, Entity as Transaction, Model as TransactionModel,
};
