//! In-memory store used by tests and by the desktop app's demo mode.
//!
//! Behaves like the real store under normal operation and exposes knobs for
//! the failure shapes the coordinator has to handle: going offline, stalling
//! so a confirm window elapses, and rejecting the next write outright.

use crate::errors::{Error, Result};
use crate::model::{Allocation, Envelope, IncomeSource, MonthKey, Transaction};
use crate::store::{ConnectivityProbe, Store};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How long a stalled store sleeps before answering. Tests run with a paused
/// tokio clock, so the coordinator's confirm timeout always fires first.
const STALL_SLEEP: Duration = Duration::from_secs(3600);

#[derive(Debug, Default)]
struct Inner {
    envelopes: BTreeMap<String, Envelope>,
    transactions: BTreeMap<String, Transaction>,
    income_sources: BTreeMap<String, IncomeSource>,
    allocations: BTreeMap<String, Allocation>,
    tokens: BTreeMap<String, String>,
    next_id: u64,
    offline: bool,
    stalled: bool,
    failures_remaining: u32,
    failure_skip: u32,
}

impl Inner {
    fn next_canonical_id(&mut self) -> String {
        self.next_id += 1;
        format!("rec-{}", self.next_id)
    }

    // tokens die with their record, like the unique column in the database
    // store, so a deleted record can be written back under the same token
    fn drop_tokens_for(&mut self, id: &str) {
        self.tokens.retain(|_, mapped| mapped != id);
    }
}

/// In-memory persistence collaborator with failure injection.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Toggles the offline flag. While offline, every call fails fast with
    /// [`Error::Offline`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Toggles the stall flag. While stalled, every call sleeps long enough
    /// for a confirm window to elapse before answering.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Makes the next `count` writes fail with a non-offline error.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_writes_after(0, count);
    }

    /// Lets the next `skip` writes succeed, then fails the following
    /// `count` with a non-offline error.
    pub fn fail_writes_after(&self, skip: u32, count: u32) {
        let mut inner = self.lock();
        inner.failure_skip = skip;
        inner.failures_remaining = count;
    }

    /// Runs the failure-injection gate shared by every store call.
    async fn gate(&self, write: bool) -> Result<()> {
        let stalled = {
            let mut inner = self.lock();
            if inner.offline {
                return Err(Error::Offline);
            }
            if write && !inner.stalled && inner.failures_remaining > 0 {
                if inner.failure_skip > 0 {
                    inner.failure_skip -= 1;
                } else {
                    inner.failures_remaining -= 1;
                    return Err(Error::RemoteWrite {
                        message: "injected write failure".to_string(),
                    });
                }
            }
            inner.stalled
        };
        if stalled {
            tokio::time::sleep(STALL_SLEEP).await;
        }
        Ok(())
    }

    /// Number of stored transactions, for test assertions.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }

    /// Number of stored envelopes, for test assertions.
    #[must_use]
    pub fn envelope_count(&self) -> usize {
        self.lock().envelopes.len()
    }

    /// Fetches a stored transaction by canonical id, for test assertions.
    #[must_use]
    pub fn get_transaction(&self, id: &str) -> Option<Transaction> {
        self.lock().transactions.get(id).cloned()
    }

    /// Fetches a stored envelope by canonical id, for test assertions.
    #[must_use]
    pub fn get_envelope(&self, id: &str) -> Option<Envelope> {
        self.lock().envelopes.get(id).cloned()
    }

    fn create_with_token<T: Clone>(
        &self,
        token: &str,
        record: &T,
        insert: impl FnOnce(&mut Inner, String, T),
    ) -> String {
        let mut inner = self.lock();
        if let Some(existing) = inner.tokens.get(token) {
            return existing.clone();
        }
        let id = inner.next_canonical_id();
        inner.tokens.insert(token.to_string(), id.clone());
        insert(&mut inner, id.clone(), record.clone());
        id
    }
}

impl Store for MemoryStore {
    async fn create_envelope(&self, token: &str, record: &Envelope) -> Result<String> {
        self.gate(true).await?;
        Ok(self.create_with_token(token, record, |inner, id, mut record| {
            record.id = id.clone();
            inner.envelopes.insert(id, record);
        }))
    }

    async fn update_envelope(&self, id: &str, record: &Envelope) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        let slot = inner.envelopes.get_mut(id).ok_or_else(|| Error::NotFound {
            entity: "envelope",
            id: id.to_string(),
        })?;
        let mut record = record.clone();
        record.id = id.to_string();
        *slot = record;
        Ok(())
    }

    async fn delete_envelope(&self, id: &str) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        inner.envelopes.remove(id);
        inner.drop_tokens_for(id);
        Ok(())
    }

    async fn list_envelopes(&self) -> Result<Vec<Envelope>> {
        self.gate(false).await?;
        Ok(self.lock().envelopes.values().cloned().collect())
    }

    async fn create_transaction(&self, token: &str, record: &Transaction) -> Result<String> {
        self.gate(true).await?;
        Ok(self.create_with_token(token, record, |inner, id, mut record| {
            record.id = id.clone();
            inner.transactions.insert(id, record);
        }))
    }

    async fn update_transaction(&self, id: &str, record: &Transaction) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        let slot = inner
            .transactions
            .get_mut(id)
            .ok_or_else(|| Error::NotFound {
                entity: "transaction",
                id: id.to_string(),
            })?;
        let mut record = record.clone();
        record.id = id.to_string();
        *slot = record;
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        inner.transactions.remove(id);
        inner.drop_tokens_for(id);
        Ok(())
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        self.gate(false).await?;
        Ok(self.lock().transactions.values().cloned().collect())
    }

    async fn transactions_for_month(&self, month: MonthKey) -> Result<Vec<Transaction>> {
        self.gate(false).await?;
        Ok(self
            .lock()
            .transactions
            .values()
            .filter(|tx| tx.month == month)
            .cloned()
            .collect())
    }

    async fn create_income_source(&self, token: &str, record: &IncomeSource) -> Result<String> {
        self.gate(true).await?;
        Ok(self.create_with_token(token, record, |inner, id, mut record| {
            record.id = id.clone();
            inner.income_sources.insert(id, record);
        }))
    }

    async fn update_income_source(&self, id: &str, record: &IncomeSource) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        let slot = inner
            .income_sources
            .get_mut(id)
            .ok_or_else(|| Error::NotFound {
                entity: "income source",
                id: id.to_string(),
            })?;
        let mut record = record.clone();
        record.id = id.to_string();
        *slot = record;
        Ok(())
    }

    async fn delete_income_source(&self, id: &str) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        inner.income_sources.remove(id);
        inner.drop_tokens_for(id);
        Ok(())
    }

    async fn list_income_sources(&self) -> Result<Vec<IncomeSource>> {
        self.gate(false).await?;
        Ok(self.lock().income_sources.values().cloned().collect())
    }

    async fn create_allocation(&self, token: &str, record: &Allocation) -> Result<String> {
        self.gate(true).await?;
        Ok(self.create_with_token(token, record, |inner, id, mut record| {
            record.id = id.clone();
            inner.allocations.insert(id, record);
        }))
    }

    async fn update_allocation(&self, id: &str, record: &Allocation) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        let slot = inner
            .allocations
            .get_mut(id)
            .ok_or_else(|| Error::NotFound {
                entity: "allocation",
                id: id.to_string(),
            })?;
        let mut record = record.clone();
        record.id = id.to_string();
        *slot = record;
        Ok(())
    }

    async fn delete_allocation(&self, id: &str) -> Result<()> {
        self.gate(true).await?;
        let mut inner = self.lock();
        inner.allocations.remove(id);
        inner.drop_tokens_for(id);
        Ok(())
    }

    async fn list_allocations(&self) -> Result<Vec<Allocation>> {
        self.gate(false).await?;
        Ok(self.lock().allocations.values().cloned().collect())
    }
}

impl ConnectivityProbe for MemoryStore {
    async fn is_online(&self) -> bool {
        let inner = self.lock();
        !inner.offline && !inner.stalled
    }
}
