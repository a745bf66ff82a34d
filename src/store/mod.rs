//! Persistence collaborator traits.
//!
//! The engine never assumes a concrete remote schema; it talks to a
//! [`Store`] that offers create/update/delete by id plus equality queries,
//! and a [`ConnectivityProbe`] used to classify failed confirms as offline
//! versus genuine errors. Creates take the writing session's client token
//! (its temporary id) and return the canonical id; a store must dedupe on
//! the token so a retried create resolves to the existing record instead of
//! duplicating it.

use crate::errors::Result;
use crate::model::{Allocation, Envelope, IncomeSource, MonthKey, Transaction};

/// `SeaORM`/`SQLite` store implementation
pub mod orm;

/// In-memory store with failure injection, for tests and offline demos
pub mod memory;

pub use memory::MemoryStore;
pub use orm::OrmStore;

/// The persistence collaborator contract.
///
/// Records passed to writes carry resolved canonical references (an
/// envelope id is never temporary by the time it reaches the store); the
/// `id` field of a created record is ignored in favor of the returned
/// canonical id. Deletes of already-absent records succeed, which keeps
/// delete retries idempotent.
#[allow(async_fn_in_trait)]
pub trait Store {
    /// Creates an envelope, returning its canonical id.
    async fn create_envelope(&self, token: &str, envelope: &Envelope) -> Result<String>;
    /// Replaces an envelope record.
    async fn update_envelope(&self, id: &str, envelope: &Envelope) -> Result<()>;
    /// Deletes an envelope record.
    async fn delete_envelope(&self, id: &str) -> Result<()>;
    /// Reads every envelope, canonical ids in place.
    async fn list_envelopes(&self) -> Result<Vec<Envelope>>;

    /// Creates a transaction, returning its canonical id.
    async fn create_transaction(&self, token: &str, tx: &Transaction) -> Result<String>;
    /// Replaces a transaction record.
    async fn update_transaction(&self, id: &str, tx: &Transaction) -> Result<()>;
    /// Deletes a transaction record.
    async fn delete_transaction(&self, id: &str) -> Result<()>;
    /// Reads every transaction.
    async fn list_transactions(&self) -> Result<Vec<Transaction>>;
    /// Equality query: every transaction scoped to one month.
    async fn transactions_for_month(&self, month: MonthKey) -> Result<Vec<Transaction>>;

    /// Creates an income source, returning its canonical id.
    async fn create_income_source(&self, token: &str, source: &IncomeSource) -> Result<String>;
    /// Replaces an income source record.
    async fn update_income_source(&self, id: &str, source: &IncomeSource) -> Result<()>;
    /// Deletes an income source record.
    async fn delete_income_source(&self, id: &str) -> Result<()>;
    /// Reads every income source.
    async fn list_income_sources(&self) -> Result<Vec<IncomeSource>>;

    /// Creates an allocation, returning its canonical id.
    async fn create_allocation(&self, token: &str, allocation: &Allocation) -> Result<String>;
    /// Replaces an allocation record.
    async fn update_allocation(&self, id: &str, allocation: &Allocation) -> Result<()>;
    /// Deletes an allocation record.
    async fn delete_allocation(&self, id: &str) -> Result<()>;
    /// Reads every allocation.
    async fn list_allocations(&self) -> Result<Vec<Allocation>>;
}

/// Connectivity signal used to classify failed confirms.
#[allow(async_fn_in_trait)]
pub trait ConnectivityProbe {
    /// Whether the remote store currently looks reachable.
    async fn is_online(&self) -> bool;
}

/// A probe that always reports connectivity, for contexts where offline
/// classification is irrelevant.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    async fn is_online(&self) -> bool {
        true
    }
}
