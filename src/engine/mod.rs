//! Synchronization coordinator.
//!
//! Every mutating command runs the same three-phase protocol:
//!
//! 1. **Apply** - mutate the in-memory state synchronously under the state
//!    lock, assigning a `tmp-<n>` id when the record has no canonical one
//!    yet. The lock is never held across an await.
//! 2. **Confirm** - race the equivalent store write against the confirm
//!    timeout.
//! 3. **Reconcile** - on success, record the temp-to-canonical promotion
//!    (collections keep their local keys; references resolve through the
//!    [`ids::IdTable`] at store-write time). On a timeout or an
//!    offline-class failure the record joins the pending-sync set and no
//!    error surfaces. On any other store failure the local mutation is
//!    undone and the error surfaces as [`Error::RemoteWrite`].
//!
//! Writes referencing an envelope whose own create is still unconfirmed
//! are parked in the deferred queue and flushed once the envelope's
//! canonical id arrives. [`BudgetEngine::retry_pending`] replays everything
//! in the pending set; replays are idempotent because every create carries
//! its temp id as a client token and the store dedupes on it.

pub mod ids;
pub mod pending;

use crate::core::export::Snapshot;
use crate::core::ledger::{BalanceScope, Ledger};
use crate::core::piggybank::{self, ContributionReport, GoalProgress};
use crate::core::plan::BudgetPlan;
use crate::core::report::{self, MonthSummary};
use crate::core::rollover::plan_rollover;
use crate::errors::{Error, Result};
use crate::model::{
    Envelope, EnvelopeRegistry, Frequency, IncomeSource, MonthKey, Money, PiggybankConfig,
    Transaction, TransactionKind,
};
use crate::store::{ConnectivityProbe, Store};
use chrono::{DateTime, Utc};
use ids::IdTable;
use pending::{Deferred, PendingOp, PendingSet};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default confirm window.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(4);

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Source of the current time, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Which slice of state a mutation touched. Subscribers re-read through the
/// engine's accessors; events carry no payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    Envelopes,
    Ledger,
    Plan,
    /// A reconcile outcome changed the pending-sync set.
    Sync,
}

/// How a command's store write was reconciled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The store confirmed the write within the confirm window.
    Confirmed,
    /// The store was unreachable; the record stays in the pending set.
    OfflineRetained,
    /// The local mutation was undone after a genuine store failure.
    RolledBack,
    /// The write is parked behind an unconfirmed envelope create.
    Deferred,
}

/// The id a command settled on plus its reconcile outcome.
#[derive(Clone, Debug)]
pub struct Applied {
    /// Local id of the record; stays valid after promotion.
    pub id: String,
    pub sync: SyncOutcome,
}

/// Both legs of a completed transfer command.
#[derive(Clone, Debug)]
pub struct TransferApplied {
    pub expense_id: String,
    pub income_id: String,
    pub transfer_id: String,
    pub sync: SyncOutcome,
}

/// Counts from one [`BudgetEngine::retry_pending`] sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub confirmed: usize,
    pub retained: usize,
    pub failed: usize,
}

/// Counts from one [`BudgetEngine::copy_previous_month`] run.
#[derive(Clone, Debug, Default)]
pub struct RolloverReport {
    pub income_sources: usize,
    pub allocations: usize,
    pub funded: usize,
    /// Envelope ids whose allocations were dropped because the envelope no
    /// longer exists.
    pub dropped_envelopes: Vec<String>,
    pub failed: usize,
}

/// Counts from one [`BudgetEngine::start_fresh`] clear.
#[derive(Clone, Copy, Debug, Default)]
pub struct StartFreshReport {
    pub transactions: usize,
    pub income_sources: usize,
    pub allocations: usize,
    pub sync: SyncOutcome,
}

impl Default for SyncOutcome {
    fn default() -> Self {
        Self::Confirmed
    }
}

/// Fields of a new or edited envelope. `is_active` is managed by the
/// engine: envelopes are created active and piggybanks are deactivated
/// through [`BudgetEngine::delete_envelope`].
#[derive(Clone, Debug)]
pub struct EnvelopeDraft {
    pub name: String,
    pub order_index: i32,
    pub category_id: Option<String>,
    /// `Some` makes the envelope a piggybank.
    pub piggybank: Option<PiggybankConfig>,
}

/// Fields of a new or edited transaction.
#[derive(Clone, Debug)]
pub struct TransactionDraft {
    pub envelope_id: String,
    pub amount: Money,
    pub date: DateTime<Utc>,
    pub description: String,
    pub kind: TransactionKind,
    pub reconciled: bool,
}

struct EngineState {
    envelopes: EnvelopeRegistry,
    ledger: Ledger,
    plan: BudgetPlan,
    ids: IdTable,
    pending: PendingSet,
}

enum ConfirmOutcome {
    Confirmed(Vec<Deferred>),
    Retained,
    Failed(Error),
}

enum RecordSnapshot<T> {
    Ready(T),
    /// A referenced id is still temporary and unconfirmed.
    Blocked,
    /// The record no longer exists locally.
    Gone,
}

/// The offline-tolerant budgeting coordinator.
///
/// Generic over the persistence collaborator, the connectivity probe, and
/// the clock so tests can inject failure shapes and fixed time.
pub struct BudgetEngine<S, P, C = SystemClock>
where
    S: Store,
    P: ConnectivityProbe,
    C: Clock,
{
    store: S,
    probe: P,
    clock: C,
    confirm_timeout: Duration,
    state: Mutex<EngineState>,
    events: broadcast::Sender<ChangeEvent>,
}

impl<S, P> BudgetEngine<S, P, SystemClock>
where
    S: Store,
    P: ConnectivityProbe,
{
    /// Creates an engine on the wall clock with the default confirm window.
    pub fn with_defaults(store: S, probe: P) -> Self {
        Self::new(store, probe, SystemClock, DEFAULT_CONFIRM_TIMEOUT)
    }
}

impl<S, P, C> BudgetEngine<S, P, C>
where
    S: Store,
    P: ConnectivityProbe,
    C: Clock,
{
    pub fn new(store: S, probe: P, clock: C, confirm_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            probe,
            clock,
            confirm_timeout,
            state: Mutex::new(EngineState {
                envelopes: EnvelopeRegistry::new(),
                ledger: Ledger::new(),
                plan: BudgetPlan::new(),
                ids: IdTable::new(),
                pending: PendingSet::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ChangeEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Subscribes to change notifications. Every applied or rolled-back
    /// mutation emits at least one event.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    // ---- hydration and snapshots ----

    /// Replaces the in-memory state with the store's current contents.
    /// Unconfirmed local writes are discarded with a warning; call
    /// [`Self::retry_pending`] first to push them.
    ///
    /// # Errors
    /// Propagates store read failures; an offline store leaves the previous
    /// state untouched.
    pub async fn hydrate(&self) -> Result<()> {
        let envelopes = self.store.list_envelopes().await?;
        let transactions = self.store.list_transactions().await?;
        let sources = self.store.list_income_sources().await?;
        let allocations = self.store.list_allocations().await?;

        {
            let mut state = self.lock();
            if !state.pending.is_empty() {
                warn!(
                    discarded = state.pending.len(),
                    "hydrating over unconfirmed writes; their optimistic state is replaced"
                );
            }
            state.ids = IdTable::new();
            state.pending = PendingSet::new();
            state.envelopes = envelopes
                .into_iter()
                .map(|envelope| (envelope.id.clone(), envelope))
                .collect();
            state.ledger = Ledger::new();
            for tx in transactions {
                state.ledger.add(tx);
            }
            state.plan = BudgetPlan::new();
            for source in sources {
                state.plan.upsert_income_source(source);
            }
            for allocation in allocations {
                state.plan.restore_allocation(allocation);
            }
        }
        info!("hydrated state from store");
        self.emit(ChangeEvent::Envelopes);
        self.emit(ChangeEvent::Ledger);
        self.emit(ChangeEvent::Plan);
        self.emit(ChangeEvent::Sync);
        Ok(())
    }

    /// Clones the full dataset into a snapshot.
    #[must_use]
    pub fn export_snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            envelopes: state.envelopes.values().cloned().collect(),
            transactions: state.ledger.iter().cloned().collect(),
            income_sources: state.plan.iter_income_sources().cloned().collect(),
            allocations: state.plan.iter_allocations().cloned().collect(),
        }
    }

    /// Replaces the in-memory state with a snapshot and marks every record
    /// as a pending create, to be pushed by [`Self::retry_pending`].
    /// Intended for restoring into a fresh store; importing over a store
    /// that already holds these records will duplicate them.
    pub fn import_snapshot(&self, mut snapshot: Snapshot) {
        snapshot.normalize();
        {
            let mut state = self.lock();
            state.ids = IdTable::new();
            state.pending = PendingSet::new();
            state.envelopes = snapshot
                .envelopes
                .into_iter()
                .map(|envelope| (envelope.id.clone(), envelope))
                .collect();
            state.ledger = Ledger::new();
            for tx in snapshot.transactions {
                state.ledger.add(tx);
            }
            state.plan = BudgetPlan::new();
            for source in snapshot.income_sources {
                state.plan.upsert_income_source(source);
            }
            for allocation in snapshot.allocations {
                state.plan.restore_allocation(allocation);
            }

            let envelope_ids: Vec<String> = state.envelopes.keys().cloned().collect();
            for id in envelope_ids {
                state.ids.reserve(&id);
                state.pending.mark(&id, PendingOp::CreateEnvelope);
            }
            let tx_ids: Vec<String> = state.ledger.iter().map(|tx| tx.id.clone()).collect();
            for id in tx_ids {
                state.ids.reserve(&id);
                state.pending.mark(&id, PendingOp::CreateTransaction);
            }
            let source_ids: Vec<String> = state
                .plan
                .iter_income_sources()
                .map(|source| source.id.clone())
                .collect();
            for id in source_ids {
                state.ids.reserve(&id);
                state.pending.mark(&id, PendingOp::CreateIncomeSource);
            }
            let allocation_ids: Vec<String> = state
                .plan
                .iter_allocations()
                .map(|allocation| allocation.id.clone())
                .collect();
            for id in allocation_ids {
                state.ids.reserve(&id);
                state.pending.mark(&id, PendingOp::CreateAllocation);
            }
        }
        self.emit(ChangeEvent::Envelopes);
        self.emit(ChangeEvent::Ledger);
        self.emit(ChangeEvent::Plan);
        self.emit(ChangeEvent::Sync);
    }

    // ---- reads ----

    /// Derives an envelope balance; see [`Ledger::balance_of`].
    #[must_use]
    pub fn balance_of(&self, envelope_id: &str, scope: BalanceScope) -> Money {
        self.lock().ledger.balance_of(envelope_id, scope)
    }

    /// Income minus allocated for the month.
    #[must_use]
    pub fn available_to_budget(&self, month: MonthKey) -> Money {
        let state = self.lock();
        state.plan.available_to_budget(&state.envelopes, month)
    }

    /// Every envelope, ordered by `order_index` then name.
    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        let state = self.lock();
        let mut all: Vec<Envelope> = state.envelopes.values().cloned().collect();
        all.sort_by(|a, b| a.order_index.cmp(&b.order_index).then_with(|| a.name.cmp(&b.name)));
        all
    }

    /// Every transaction scoped to the given month.
    #[must_use]
    pub fn transactions_for_month(&self, month: MonthKey) -> Vec<Transaction> {
        let state = self.lock();
        state.ledger.for_month(month).into_iter().cloned().collect()
    }

    /// Per-envelope budget/balance rows plus totals for one month.
    #[must_use]
    pub fn month_summary(&self, month: MonthKey) -> MonthSummary {
        let state = self.lock();
        report::month_summary(&state.envelopes, &state.plan, &state.ledger, month)
    }

    /// Goal state of a piggybank envelope, `None` for ordinary envelopes.
    #[must_use]
    pub fn goal_progress(&self, envelope_id: &str) -> Option<GoalProgress> {
        let state = self.lock();
        let envelope = state.envelopes.get(envelope_id)?;
        piggybank::goal_progress(envelope, &state.ledger)
    }

    /// Local ids of every unconfirmed write.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.ids()
    }

    /// The canonical id the store assigned for a local id, once promoted.
    #[must_use]
    pub fn remote_id_of(&self, id: &str) -> Option<String> {
        self.lock().ids.canonical_of(id).map(str::to_string)
    }

    // ---- envelope commands ----

    /// Creates an envelope (a piggybank when the draft carries a config).
    ///
    /// # Errors
    /// [`Error::Validation`] on an empty name; [`Error::RemoteWrite`] when
    /// the store genuinely rejected the create and the envelope was rolled
    /// back.
    pub async fn create_envelope(&self, draft: EnvelopeDraft) -> Result<Applied> {
        if draft.name.trim().is_empty() {
            return Err(Error::Validation {
                message: "envelope name must not be empty".to_string(),
            });
        }
        let temp_id = {
            let mut state = self.lock();
            let temp_id = state.ids.next_temp();
            let record = Envelope {
                id: temp_id.clone(),
                name: draft.name,
                is_active: true,
                order_index: draft.order_index,
                category_id: draft.category_id,
                is_piggybank: draft.piggybank.is_some(),
                piggybank: draft.piggybank,
            };
            state.envelopes.insert(temp_id.clone(), record);
            state.pending.mark(&temp_id, PendingOp::CreateEnvelope);
            temp_id
        };
        self.emit(ChangeEvent::Envelopes);

        let undo_id = temp_id.clone();
        self.finish(&temp_id, PendingOp::CreateEnvelope, ChangeEvent::Envelopes, move |state| {
            state.envelopes.remove(&undo_id);
        })
        .await
    }

    /// Replaces an envelope's editable fields, keeping its active flag.
    ///
    /// # Errors
    /// [`Error::UnknownEnvelope`] when the id does not resolve;
    /// [`Error::RemoteWrite`] on a rolled-back store failure.
    pub async fn update_envelope(&self, id: &str, draft: EnvelopeDraft) -> Result<Applied> {
        if draft.name.trim().is_empty() {
            return Err(Error::Validation {
                message: "envelope name must not be empty".to_string(),
            });
        }
        let (op, previous) = {
            let mut state = self.lock();
            let previous = state
                .envelopes
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnknownEnvelope {
                    envelope_id: id.to_string(),
                })?;
            let record = Envelope {
                id: id.to_string(),
                name: draft.name,
                is_active: previous.is_active,
                order_index: draft.order_index,
                category_id: draft.category_id,
                is_piggybank: draft.piggybank.is_some(),
                piggybank: draft.piggybank,
            };
            state.envelopes.insert(id.to_string(), record);
            // an unconfirmed create just flushes its latest state
            let op = match state.pending.get(id) {
                Some(PendingOp::CreateEnvelope) if state.ids.canonical_of(id).is_none() => {
                    PendingOp::CreateEnvelope
                }
                _ => PendingOp::UpdateEnvelope,
            };
            state.pending.mark(id, op.clone());
            (op, previous)
        };
        self.emit(ChangeEvent::Envelopes);

        if self.lock().pending.is_deferred(id) {
            return Ok(Applied {
                id: id.to_string(),
                sync: SyncOutcome::Deferred,
            });
        }
        let undo_op = op.clone();
        let undo_id = id.to_string();
        self.finish(id, op, ChangeEvent::Envelopes, move |state| {
            if matches!(undo_op, PendingOp::CreateEnvelope) {
                state.envelopes.remove(&undo_id);
            } else {
                state.envelopes.insert(undo_id.clone(), previous);
            }
        })
        .await
    }

    /// Deletes an envelope. Ordinary envelopes are removed together with
    /// their current-month allocations and transactions; piggybanks are
    /// only deactivated so their all-time history survives.
    ///
    /// # Errors
    /// [`Error::UnknownEnvelope`] when the id does not resolve;
    /// [`Error::RemoteWrite`] on a rolled-back store failure.
    pub async fn delete_envelope(&self, id: &str) -> Result<Applied> {
        let month = MonthKey::from_datetime(&self.clock.now());
        enum Plan {
            Deactivate {
                op: PendingOp,
                previous: Envelope,
            },
            Remove {
                op: PendingOp,
                envelope: Envelope,
                allocations: Vec<crate::model::Allocation>,
                transactions: Vec<Transaction>,
            },
            LocalOnly,
        }

        let plan = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let envelope = state
                .envelopes
                .get(id)
                .cloned()
                .ok_or_else(|| Error::UnknownEnvelope {
                    envelope_id: id.to_string(),
                })?;

            if envelope.is_piggybank {
                let mut updated = envelope.clone();
                updated.is_active = false;
                state.envelopes.insert(id.to_string(), updated);
                let op = match state.pending.get(id) {
                    Some(PendingOp::CreateEnvelope) if state.ids.canonical_of(id).is_none() => {
                        PendingOp::CreateEnvelope
                    }
                    _ => PendingOp::UpdateEnvelope,
                };
                state.pending.mark(id, op.clone());
                Plan::Deactivate {
                    op,
                    previous: envelope,
                }
            } else {
                state.envelopes.remove(id);
                let allocations = state.plan.remove_allocations_for_envelope(id, month);
                let transactions = state
                    .ledger
                    .remove_where(|tx| tx.envelope_id == id && tx.month == month);

                // records whose id still resolves to a temporary never
                // reached the store; skip their remote delete
                let mut cascade_alloc = Vec::new();
                for allocation in &allocations {
                    let remote = state.ids.resolve(&allocation.id).to_string();
                    state.pending.confirm(&allocation.id);
                    state.pending.cancel_deferred(&allocation.id);
                    if !IdTable::is_temp(&remote) {
                        cascade_alloc.push(remote);
                    }
                }
                let mut cascade_tx = Vec::new();
                for tx in &transactions {
                    let remote = state.ids.resolve(&tx.id).to_string();
                    state.pending.confirm(&tx.id);
                    state.pending.cancel_deferred(&tx.id);
                    if !IdTable::is_temp(&remote) {
                        cascade_tx.push(remote);
                    }
                }

                if Self::unconfirmed_create(state, id) {
                    // the envelope never reached the store
                    state.pending.confirm(id);
                    state.pending.cancel_deferred(id);
                    for orphan in state.pending.take_ready(id) {
                        Self::rollback_create_locally(state, &orphan.pending_id, &orphan.op);
                        state.pending.confirm(&orphan.pending_id);
                    }
                    Plan::LocalOnly
                } else {
                    let op = PendingOp::DeleteEnvelope {
                        remote_id: state.ids.resolve(id).to_string(),
                        cascade_tx,
                        cascade_alloc,
                    };
                    state.pending.mark(id, op.clone());
                    Plan::Remove {
                        op,
                        envelope,
                        allocations,
                        transactions,
                    }
                }
            }
        };
        self.emit(ChangeEvent::Envelopes);
        self.emit(ChangeEvent::Plan);
        self.emit(ChangeEvent::Ledger);

        match plan {
            Plan::LocalOnly => Ok(Applied {
                id: id.to_string(),
                sync: SyncOutcome::Confirmed,
            }),
            Plan::Deactivate { op, previous } => {
                let undo_id = id.to_string();
                self.finish(id, op, ChangeEvent::Envelopes, move |state| {
                    state.envelopes.insert(undo_id, previous);
                })
                .await
            }
            Plan::Remove {
                op,
                envelope,
                allocations,
                transactions,
            } => {
                let undo_id = id.to_string();
                self.finish(id, op, ChangeEvent::Envelopes, move |state| {
                    state.envelopes.insert(undo_id, envelope);
                    for allocation in allocations {
                        state.plan.restore_allocation(allocation);
                    }
                    for tx in transactions {
                        state.ledger.restore(tx);
                    }
                })
                .await
            }
        }
    }

    // ---- transaction commands ----

    /// Records an income or expense transaction.
    ///
    /// # Errors
    /// [`Error::Validation`] for a transfer kind or negative amount;
    /// [`Error::UnknownEnvelope`] when the envelope does not resolve;
    /// [`Error::RemoteWrite`] on a rolled-back store failure.
    pub async fn add_transaction(&self, draft: TransactionDraft) -> Result<Applied> {
        self.add_transaction_inner(draft, false).await
    }

    async fn add_transaction_inner(
        &self,
        draft: TransactionDraft,
        is_automatic: bool,
    ) -> Result<Applied> {
        if draft.kind == TransactionKind::Transfer {
            return Err(Error::Validation {
                message: "transfers are recorded through transfer_funds".to_string(),
            });
        }
        if draft.amount.is_negative() {
            return Err(Error::InvalidAmount {
                value: draft.amount.to_string(),
            });
        }

        let (temp_id, deferred) = {
            let mut state = self.lock();
            if !state.envelopes.contains_key(&draft.envelope_id) {
                return Err(Error::UnknownEnvelope {
                    envelope_id: draft.envelope_id,
                });
            }
            let temp_id = state.ids.next_temp();
            let tx = Transaction {
                id: temp_id.clone(),
                envelope_id: draft.envelope_id.clone(),
                amount: draft.amount,
                date: draft.date,
                month: MonthKey::from_datetime(&draft.date),
                description: draft.description,
                kind: draft.kind,
                reconciled: draft.reconciled,
                transfer_id: None,
                is_automatic,
            };
            state.ledger.add(tx);
            state.pending.mark(&temp_id, PendingOp::CreateTransaction);
            let deferred = IdTable::is_temp(&draft.envelope_id)
                && state.pending.is_pending(&draft.envelope_id);
            if deferred {
                state
                    .pending
                    .push_deferred(&draft.envelope_id, &temp_id, PendingOp::CreateTransaction);
            }
            (temp_id, deferred)
        };
        self.emit(ChangeEvent::Ledger);

        if deferred {
            return Ok(Applied {
                id: temp_id,
                sync: SyncOutcome::Deferred,
            });
        }
        let undo_id = temp_id.clone();
        self.finish(&temp_id, PendingOp::CreateTransaction, ChangeEvent::Ledger, move |state| {
            let _ = state.ledger.remove_where(|tx| tx.id == undo_id);
        })
        .await
    }

    /// Replaces a transaction's editable fields. Transfer legs cannot be
    /// edited; delete the transfer and record a new one.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id, [`Error::Validation`] for a
    /// transfer leg, [`Error::RemoteWrite`] on a rolled-back store failure.
    pub async fn update_transaction(&self, id: &str, draft: TransactionDraft) -> Result<Applied> {
        if draft.kind == TransactionKind::Transfer {
            return Err(Error::Validation {
                message: "transfers are recorded through transfer_funds".to_string(),
            });
        }
        if draft.amount.is_negative() {
            return Err(Error::InvalidAmount {
                value: draft.amount.to_string(),
            });
        }

        let (op, previous, deferred) = {
            let mut state = self.lock();
            let existing = state
                .ledger
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound {
                    entity: "transaction",
                    id: id.to_string(),
                })?;
            if existing.transfer_id.is_some() {
                return Err(Error::Validation {
                    message: "transfer legs cannot be edited".to_string(),
                });
            }
            if !state.envelopes.contains_key(&draft.envelope_id) {
                return Err(Error::UnknownEnvelope {
                    envelope_id: draft.envelope_id,
                });
            }
            let record = Transaction {
                id: id.to_string(),
                envelope_id: draft.envelope_id,
                amount: draft.amount,
                date: draft.date,
                month: MonthKey::from_datetime(&draft.date),
                description: draft.description,
                kind: draft.kind,
                reconciled: draft.reconciled,
                transfer_id: None,
                is_automatic: existing.is_automatic,
            };
            let previous = state.ledger.update(record)?;
            let op = match state.pending.get(id) {
                Some(PendingOp::CreateTransaction) if state.ids.canonical_of(id).is_none() => {
                    PendingOp::CreateTransaction
                }
                _ => PendingOp::UpdateTransaction,
            };
            state.pending.mark(id, op.clone());
            (op, previous, state.pending.is_deferred(id))
        };
        self.emit(ChangeEvent::Ledger);

        if deferred {
            return Ok(Applied {
                id: id.to_string(),
                sync: SyncOutcome::Deferred,
            });
        }
        let undo_op = op.clone();
        let undo_id = id.to_string();
        self.finish(id, op, ChangeEvent::Ledger, move |state| {
            if matches!(undo_op, PendingOp::CreateTransaction) {
                let _ = state.ledger.remove_where(|tx| tx.id == undo_id);
            } else {
                let _ = state.ledger.update(previous);
            }
        })
        .await
    }

    /// Deletes a transaction. When the record is one leg of a transfer, the
    /// sibling leg is removed in the same logical operation and the remote
    /// legs are deleted as a unit.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id; [`Error::RemoteWrite`] when a
    /// store delete genuinely failed and the records were restored.
    pub async fn delete_transaction(&self, id: &str) -> Result<Applied> {
        let (removed, ops, pair_record) = {
            let mut state = self.lock();
            let removed = state.ledger.delete(id)?;
            let mut ops = Vec::new();
            for tx in &removed {
                let remote_id = state.ids.resolve(&tx.id).to_string();
                if IdTable::is_temp(&remote_id) {
                    // never reached the store under any id, nothing to
                    // delete remotely
                    state.pending.confirm(&tx.id);
                    state.pending.cancel_deferred(&tx.id);
                    continue;
                }
                let op = PendingOp::DeleteTransaction { remote_id };
                state.pending.mark(&tx.id, op.clone());
                ops.push((tx.id.clone(), op));
            }
            // for a confirmed pair, keep the first leg's store form so it
            // can be written back if the second remote delete fails
            let pair_record = if ops.len() == 2 {
                removed.iter().find(|tx| tx.id == ops[0].0).map(|tx| {
                    let mut record = tx.clone();
                    record.envelope_id = state.ids.resolve(&record.envelope_id).to_string();
                    record
                })
            } else {
                None
            };
            (removed, ops, pair_record)
        };
        self.emit(ChangeEvent::Ledger);

        let mut sync = SyncOutcome::Confirmed;
        let failure = if let (
            Some(first_record),
            [
                (first_id, PendingOp::DeleteTransaction { remote_id: first_remote }),
                (second_id, PendingOp::DeleteTransaction { remote_id: second_remote }),
            ],
        ) = (&pair_record, ops.as_slice())
        {
            match self
                .delete_pair_remotely(first_id, first_remote, second_remote, first_record)
                .await
            {
                Ok(Some(())) => {
                    let mut state = self.lock();
                    state.pending.confirm(first_id);
                    state.pending.confirm(second_id);
                    None
                }
                Ok(None) => {
                    sync = SyncOutcome::OfflineRetained;
                    None
                }
                Err(err) => Some(err),
            }
        } else {
            let mut failure = None;
            for (tx_id, op) in &ops {
                match self.confirm_op(tx_id, op.clone()).await {
                    ConfirmOutcome::Confirmed(_) => {}
                    ConfirmOutcome::Retained => sync = SyncOutcome::OfflineRetained,
                    ConfirmOutcome::Failed(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
            failure
        };

        if let Some(err) = failure {
            {
                let mut state = self.lock();
                for tx in &removed {
                    state.pending.confirm(&tx.id);
                    state.ledger.restore(tx.clone());
                }
            }
            self.emit(ChangeEvent::Ledger);
            self.emit(ChangeEvent::Sync);
            return Err(Error::RemoteWrite {
                message: err.to_string(),
            });
        }
        self.emit(ChangeEvent::Sync);
        Ok(Applied {
            id: id.to_string(),
            sync,
        })
    }

    /// Removes both legs of a confirmed transfer pair from the store. When
    /// the second delete genuinely fails after the first committed, the
    /// first leg is written back under its original client token, so the
    /// store never holds half a pair.
    async fn delete_pair_remotely(
        &self,
        first_local: &str,
        first_remote: &str,
        second_remote: &str,
        first_record: &Transaction,
    ) -> Result<Option<()>> {
        let write = async {
            self.store.delete_transaction(first_remote).await?;
            match self.store.delete_transaction(second_remote).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_offline_class() => Err(err),
                Err(err) => {
                    match self.store.create_transaction(first_local, first_record).await {
                        Ok(restored) => {
                            self.lock().ids.promote(first_local, restored);
                        }
                        Err(undo) => {
                            warn!(error = %undo, "failed to write back a transfer leg after a partial delete");
                        }
                    }
                    Err(err)
                }
            }
        };
        self.classify(write).await
    }

    /// Moves money between two envelopes as a paired expense/income, one
    /// logical command sharing a fresh `transfer_id`.
    ///
    /// # Errors
    /// [`Error::InvalidAmount`] for a non-positive amount,
    /// [`Error::Validation`] when source and destination match,
    /// [`Error::UnknownEnvelope`] when either end does not resolve,
    /// [`Error::RemoteWrite`] when the pair was rolled back.
    pub async fn transfer_funds(&self, from: &str, to: &str, amount: Money) -> Result<TransferApplied> {
        if amount <= Money::ZERO {
            return Err(Error::InvalidAmount {
                value: amount.to_string(),
            });
        }
        if from == to {
            return Err(Error::Validation {
                message: "cannot transfer an envelope into itself".to_string(),
            });
        }
        let now = self.clock.now();
        let month = MonthKey::from_datetime(&now);

        let (expense_id, income_id, transfer_id, op, deferred) = {
            let mut state = self.lock();
            let from_name = state
                .envelopes
                .get(from)
                .map(|e| e.name.clone())
                .ok_or_else(|| Error::UnknownEnvelope {
                    envelope_id: from.to_string(),
                })?;
            let to_name = state
                .envelopes
                .get(to)
                .map(|e| e.name.clone())
                .ok_or_else(|| Error::UnknownEnvelope {
                    envelope_id: to.to_string(),
                })?;

            let transfer_id = Uuid::new_v4().to_string();
            let expense_id = state.ids.next_temp();
            let income_id = state.ids.next_temp();
            state.ledger.add(Transaction {
                id: expense_id.clone(),
                envelope_id: from.to_string(),
                amount,
                date: now,
                month,
                description: format!("Transfer to {to_name}"),
                kind: TransactionKind::Expense,
                reconciled: false,
                transfer_id: Some(transfer_id.clone()),
                is_automatic: false,
            });
            state.ledger.add(Transaction {
                id: income_id.clone(),
                envelope_id: to.to_string(),
                amount,
                date: now,
                month,
                description: format!("Transfer from {from_name}"),
                kind: TransactionKind::Income,
                reconciled: false,
                transfer_id: Some(transfer_id.clone()),
                is_automatic: false,
            });
            let op = PendingOp::CreateTransferPair {
                sibling_id: income_id.clone(),
            };
            state.pending.mark(&expense_id, op.clone());
            let dep = [from, to]
                .into_iter()
                .find(|end| IdTable::is_temp(end) && state.pending.is_pending(end))
                .map(ToString::to_string);
            if let Some(dep) = &dep {
                state.pending.push_deferred(dep, &expense_id, op.clone());
            }
            (expense_id, income_id, transfer_id, op, dep.is_some())
        };
        self.emit(ChangeEvent::Ledger);

        if deferred {
            return Ok(TransferApplied {
                expense_id,
                income_id,
                transfer_id,
                sync: SyncOutcome::Deferred,
            });
        }
        let undo_transfer = transfer_id.clone();
        let applied = self
            .finish(&expense_id, op, ChangeEvent::Ledger, move |state| {
                let _ = state
                    .ledger
                    .remove_where(|tx| tx.transfer_id.as_deref() == Some(undo_transfer.as_str()));
            })
            .await?;
        Ok(TransferApplied {
            expense_id,
            income_id,
            transfer_id,
            sync: applied.sync,
        })
    }

    // ---- plan commands ----

    /// Sets the budgeted amount for one envelope in one month; an existing
    /// allocation for the pair is updated in place.
    ///
    /// # Errors
    /// [`Error::InvalidAmount`] for a negative amount,
    /// [`Error::UnknownEnvelope`] via the ghost-allocation gate,
    /// [`Error::RemoteWrite`] on a rolled-back store failure.
    pub async fn set_allocation(
        &self,
        envelope_id: &str,
        month: MonthKey,
        budgeted: Money,
    ) -> Result<Applied> {
        if budgeted.is_negative() {
            return Err(Error::InvalidAmount {
                value: budgeted.to_string(),
            });
        }
        let (local_id, op, previous, deferred) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let temp_id = state.ids.next_temp();
            let write = state
                .plan
                .set_allocation(&state.envelopes, temp_id, envelope_id, month, budgeted)?;
            let local_id = write.current.id.clone();
            let op = match (&write.previous, state.pending.get(&local_id)) {
                (None, _) => PendingOp::CreateAllocation,
                (Some(_), Some(PendingOp::CreateAllocation))
                    if state.ids.canonical_of(&local_id).is_none() =>
                {
                    PendingOp::CreateAllocation
                }
                _ => PendingOp::UpdateAllocation,
            };
            state.pending.mark(&local_id, op.clone());
            let dep_blocked = IdTable::is_temp(envelope_id) && state.pending.is_pending(envelope_id);
            if dep_blocked && !state.pending.is_deferred(&local_id) {
                state.pending.push_deferred(envelope_id, &local_id, op.clone());
            }
            (local_id, op, write.previous, dep_blocked)
        };
        self.emit(ChangeEvent::Plan);

        if deferred {
            return Ok(Applied {
                id: local_id,
                sync: SyncOutcome::Deferred,
            });
        }
        let undo_id = local_id.clone();
        self.finish(&local_id, op, ChangeEvent::Plan, move |state| match previous {
            Some(prev) => state.plan.restore_allocation(prev),
            None => {
                let _ = state.plan.remove_allocation(&undo_id);
            }
        })
        .await
    }

    /// Creates or replaces the income source named `name` in `month`.
    ///
    /// # Errors
    /// [`Error::Validation`] on an empty name, [`Error::InvalidAmount`] on
    /// a negative amount, [`Error::RemoteWrite`] on a rolled-back store
    /// failure.
    pub async fn upsert_income_source(
        &self,
        month: MonthKey,
        name: &str,
        amount: Money,
        frequency: Frequency,
    ) -> Result<Applied> {
        if name.trim().is_empty() {
            return Err(Error::Validation {
                message: "income source name must not be empty".to_string(),
            });
        }
        if amount.is_negative() {
            return Err(Error::InvalidAmount {
                value: amount.to_string(),
            });
        }
        let (local_id, op, previous) = {
            let mut state = self.lock();
            let existing = state
                .plan
                .income_sources_for(month)
                .into_iter()
                .find(|source| source.name == name)
                .cloned();
            let local_id = existing
                .as_ref()
                .map_or_else(|| state.ids.next_temp(), |source| source.id.clone());
            let record = IncomeSource {
                id: local_id.clone(),
                month,
                name: name.to_string(),
                amount,
                frequency,
            };
            let previous = state.plan.upsert_income_source(record);
            let op = match (&previous, state.pending.get(&local_id)) {
                (None, _) => PendingOp::CreateIncomeSource,
                (Some(_), Some(PendingOp::CreateIncomeSource))
                    if state.ids.canonical_of(&local_id).is_none() =>
                {
                    PendingOp::CreateIncomeSource
                }
                _ => PendingOp::UpdateIncomeSource,
            };
            state.pending.mark(&local_id, op.clone());
            (local_id, op, previous)
        };
        self.emit(ChangeEvent::Plan);

        let undo_id = local_id.clone();
        self.finish(&local_id, op, ChangeEvent::Plan, move |state| match previous {
            Some(prev) => state.plan.restore_income_source(prev),
            None => {
                let _ = state.plan.remove_income_source(&undo_id);
            }
        })
        .await
    }

    /// Removes an income source by id.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id; [`Error::RemoteWrite`] when
    /// the store delete genuinely failed and the record was restored.
    pub async fn remove_income_source(&self, id: &str) -> Result<Applied> {
        let (removed, op) = {
            let mut state = self.lock();
            let removed = state.plan.remove_income_source(id)?;
            if Self::unconfirmed_create(&state, id) {
                state.pending.confirm(id);
                state.pending.cancel_deferred(id);
                (removed, None)
            } else {
                let op = PendingOp::DeleteIncomeSource {
                    remote_id: state.ids.resolve(id).to_string(),
                };
                state.pending.mark(id, op.clone());
                (removed, Some(op))
            }
        };
        self.emit(ChangeEvent::Plan);

        let Some(op) = op else {
            return Ok(Applied {
                id: id.to_string(),
                sync: SyncOutcome::Confirmed,
            });
        };
        self.finish(id, op, ChangeEvent::Plan, move |state| {
            state.plan.restore_income_source(removed);
        })
        .await
    }

    // ---- month-level commands ----

    /// Seeds `target` from `source`: income sources copy, allocations copy
    /// when their envelope still exists, and ordinary envelopes get an
    /// automatic funding income transaction so their derived balance is
    /// right immediately. Individual store failures are counted, not
    /// propagated.
    pub async fn copy_previous_month(&self, source: MonthKey, target: MonthKey) -> RolloverReport {
        let rollover = {
            let state = self.lock();
            plan_rollover(&state.envelopes, &state.plan, source, target)
        };
        let mut report = RolloverReport {
            dropped_envelopes: rollover.dropped_envelopes,
            ..RolloverReport::default()
        };

        for income in rollover.income_sources {
            match self
                .upsert_income_source(target, &income.name, income.amount, income.frequency)
                .await
            {
                Ok(_) => report.income_sources += 1,
                Err(err) => {
                    warn!(name = %income.name, error = %err, "rollover income source failed");
                    report.failed += 1;
                }
            }
        }
        for allocation in rollover.allocations {
            match self
                .set_allocation(&allocation.envelope_id, target, allocation.budgeted)
                .await
            {
                Ok(_) => report.allocations += 1,
                Err(err) => {
                    warn!(envelope_id = %allocation.envelope_id, error = %err, "rollover allocation failed");
                    report.failed += 1;
                    continue;
                }
            }
            if allocation.fund {
                let draft = TransactionDraft {
                    envelope_id: allocation.envelope_id.clone(),
                    amount: allocation.budgeted,
                    date: target.start_datetime(),
                    description: "Monthly funding".to_string(),
                    kind: TransactionKind::Income,
                    reconciled: false,
                };
                match self.add_transaction_inner(draft, true).await {
                    Ok(_) => report.funded += 1,
                    Err(err) => {
                        warn!(envelope_id = %allocation.envelope_id, error = %err, "rollover funding failed");
                        report.failed += 1;
                    }
                }
            }
        }
        info!(
            %source,
            %target,
            income_sources = report.income_sources,
            allocations = report.allocations,
            funded = report.funded,
            failed = report.failed,
            "copied previous month"
        );
        report
    }

    /// Removes every transaction, income source, and allocation scoped to
    /// exactly `month`. The local clear is atomic; store deletes that fail
    /// genuinely are logged and abandoned rather than undoing the clear,
    /// since deletes are idempotent and re-runnable.
    pub async fn start_fresh(&self, month: MonthKey) -> StartFreshReport {
        let (ops, mut report) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let transactions = state.ledger.remove_where(|tx| tx.month == month);
            let (sources, allocations) = state.plan.remove_month(month);
            let report = StartFreshReport {
                transactions: transactions.len(),
                income_sources: sources.len(),
                allocations: allocations.len(),
                sync: SyncOutcome::Confirmed,
            };

            let mut ops: Vec<(String, PendingOp)> = Vec::new();
            for tx in &transactions {
                let remote_id = state.ids.resolve(&tx.id).to_string();
                if IdTable::is_temp(&remote_id) {
                    state.pending.confirm(&tx.id);
                    state.pending.cancel_deferred(&tx.id);
                } else {
                    let op = PendingOp::DeleteTransaction { remote_id };
                    state.pending.mark(&tx.id, op.clone());
                    ops.push((tx.id.clone(), op));
                }
            }
            for source in &sources {
                if Self::unconfirmed_create(state, &source.id) {
                    state.pending.confirm(&source.id);
                    state.pending.cancel_deferred(&source.id);
                } else {
                    let op = PendingOp::DeleteIncomeSource {
                        remote_id: state.ids.resolve(&source.id).to_string(),
                    };
                    state.pending.mark(&source.id, op.clone());
                    ops.push((source.id.clone(), op));
                }
            }
            for allocation in &allocations {
                if Self::unconfirmed_create(state, &allocation.id) {
                    state.pending.confirm(&allocation.id);
                    state.pending.cancel_deferred(&allocation.id);
                } else {
                    let op = PendingOp::DeleteAllocation {
                        remote_id: state.ids.resolve(&allocation.id).to_string(),
                    };
                    state.pending.mark(&allocation.id, op.clone());
                    ops.push((allocation.id.clone(), op));
                }
            }
            (ops, report)
        };
        self.emit(ChangeEvent::Ledger);
        self.emit(ChangeEvent::Plan);

        for (id, op) in ops {
            match self.confirm_op(&id, op).await {
                ConfirmOutcome::Confirmed(_) => {}
                ConfirmOutcome::Retained => report.sync = SyncOutcome::OfflineRetained,
                ConfirmOutcome::Failed(err) => {
                    warn!(id = %id, error = %err, "start-fresh delete failed, abandoning");
                    self.lock().pending.confirm(&id);
                }
            }
        }
        self.emit(ChangeEvent::Sync);
        info!(%month, transactions = report.transactions, "cleared month");
        report
    }

    /// Creates this month's due piggybank contributions: one automatic
    /// income of `monthly_contribution` per active, unpaused piggybank that
    /// does not already have one for `(envelope, month)`. Contributions are
    /// never created before a piggybank's `created_month` or after the
    /// clock's current month.
    pub async fn run_contributions(&self, month: MonthKey) -> ContributionReport {
        let current = MonthKey::from_datetime(&self.clock.now());
        let report = {
            let state = self.lock();
            piggybank::plan_contributions(&state.envelopes, &state.ledger, month, current)
        };
        for draft in &report.created {
            let tx = TransactionDraft {
                envelope_id: draft.envelope_id.clone(),
                amount: draft.amount,
                date: month.start_datetime(),
                description: format!("Piggybank contribution: {}", draft.envelope_name),
                kind: TransactionKind::Income,
                reconciled: false,
            };
            if let Err(err) = self.add_transaction_inner(tx, true).await {
                warn!(envelope = %draft.envelope_name, error = %err, "contribution failed");
            }
        }
        report
    }

    // ---- sync ----

    /// Replays every unconfirmed write against the store. Safe to call on
    /// every reconnect: creates dedupe on their client token, deletes are
    /// idempotent.
    pub async fn retry_pending(&self) -> SyncReport {
        let entries: Vec<(String, PendingOp)> = {
            let state = self.lock();
            state
                .pending
                .ids()
                .into_iter()
                .filter(|id| !state.pending.is_deferred(id))
                .filter_map(|id| state.pending.get(&id).cloned().map(|op| (id, op)))
                .collect()
        };
        let mut report = SyncReport::default();
        let mut queue: VecDeque<(String, PendingOp)> = entries.into();
        while let Some((id, op)) = queue.pop_front() {
            if !self.lock().pending.is_pending(&id) {
                continue;
            }
            match self.confirm_op(&id, op.clone()).await {
                ConfirmOutcome::Confirmed(ready) => {
                    report.confirmed += 1;
                    for entry in ready {
                        queue.push_back((entry.pending_id, entry.op));
                    }
                }
                ConfirmOutcome::Retained => report.retained += 1,
                ConfirmOutcome::Failed(err) => {
                    report.failed += 1;
                    warn!(id = %id, error = %err, "pending write rejected on retry");
                    let mut state = self.lock();
                    state.pending.confirm(&id);
                    state.pending.cancel_deferred(&id);
                    Self::rollback_create_locally(&mut state, &id, &op);
                }
            }
        }
        self.emit(ChangeEvent::Sync);
        info!(
            confirmed = report.confirmed,
            retained = report.retained,
            failed = report.failed,
            "retried pending writes"
        );
        report
    }

    // ---- reconcile plumbing ----

    fn unconfirmed_create(state: &EngineState, id: &str) -> bool {
        state.ids.canonical_of(id).is_none()
            && matches!(
                state.pending.get(id),
                Some(
                    PendingOp::CreateEnvelope
                        | PendingOp::CreateTransaction
                        | PendingOp::CreateTransferPair { .. }
                        | PendingOp::CreateIncomeSource
                        | PendingOp::CreateAllocation
                )
            )
    }

    /// Undoes a create that never reached the store. Deletes and updates
    /// keep their local state; only the sync mark is dropped for those.
    fn rollback_create_locally(state: &mut EngineState, id: &str, op: &PendingOp) {
        match op {
            PendingOp::CreateEnvelope => {
                state.envelopes.remove(id);
            }
            PendingOp::CreateTransaction => {
                let _ = state.ledger.remove_where(|tx| tx.id == id);
            }
            PendingOp::CreateTransferPair { sibling_id } => {
                let _ = state
                    .ledger
                    .remove_where(|tx| tx.id == id || tx.id == *sibling_id);
            }
            PendingOp::CreateIncomeSource => {
                let _ = state.plan.remove_income_source(id);
            }
            PendingOp::CreateAllocation => {
                let _ = state.plan.remove_allocation(id);
            }
            _ => {}
        }
    }

    /// Races a store write against the confirm window and classifies the
    /// result: `Some` on success, `None` when the write should be retained
    /// for retry, `Err` on a genuine store failure.
    async fn classify<T>(&self, write: impl Future<Output = Result<T>>) -> Result<Option<T>> {
        match tokio::time::timeout(self.confirm_timeout, write).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(err)) if err.is_offline_class() => {
                debug!(error = %err, "store unreachable, retaining write");
                Ok(None)
            }
            Ok(Err(err)) => {
                if self.probe.is_online().await {
                    Err(err)
                } else {
                    debug!(error = %err, "probe reports offline, retaining write");
                    Ok(None)
                }
            }
            Err(_) => {
                debug!("confirm window elapsed, retaining write");
                Ok(None)
            }
        }
    }

    /// Clears the mark for a confirmed write, recording the promotion when
    /// the store assigned a canonical id, and releases deferred dependents.
    fn settle_confirmed(&self, local_id: &str, canonical: Option<String>) -> Vec<Deferred> {
        let mut state = self.lock();
        if let Some(canonical) = canonical {
            state.ids.promote(local_id, canonical);
        }
        state.pending.confirm(local_id);
        state.pending.take_ready(local_id)
    }

    fn transaction_snapshot(&self, id: &str) -> RecordSnapshot<Transaction> {
        let state = self.lock();
        match state.ledger.get(id) {
            None => RecordSnapshot::Gone,
            Some(tx) => {
                let resolved = state.ids.resolve(&tx.envelope_id);
                if IdTable::is_temp(resolved) {
                    return RecordSnapshot::Blocked;
                }
                let mut record = tx.clone();
                record.envelope_id = resolved.to_string();
                RecordSnapshot::Ready(record)
            }
        }
    }

    fn allocation_snapshot(&self, id: &str) -> RecordSnapshot<crate::model::Allocation> {
        let state = self.lock();
        match state.plan.iter_allocations().find(|alloc| alloc.id == id) {
            None => RecordSnapshot::Gone,
            Some(allocation) => {
                let resolved = state.ids.resolve(&allocation.envelope_id);
                if IdTable::is_temp(resolved) {
                    return RecordSnapshot::Blocked;
                }
                let mut record = allocation.clone();
                record.envelope_id = resolved.to_string();
                RecordSnapshot::Ready(record)
            }
        }
    }

    /// Runs one pending write's confirm phase. The caller owns rollback on
    /// failure; this only mutates state on success (promotion + mark).
    async fn confirm_op(&self, local_id: &str, op: PendingOp) -> ConfirmOutcome {
        match op {
            PendingOp::CreateEnvelope => {
                let Some(record) = self.lock().envelopes.get(local_id).cloned() else {
                    return self.resolve_gone(local_id);
                };
                match self.classify(self.store.create_envelope(local_id, &record)).await {
                    Ok(Some(canonical)) => {
                        ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, Some(canonical)))
                    }
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::UpdateEnvelope => {
                let Some(record) = self.lock().envelopes.get(local_id).cloned() else {
                    return self.resolve_gone(local_id);
                };
                let remote_id = self.lock().ids.resolve(local_id).to_string();
                match self.classify(self.store.update_envelope(&remote_id, &record)).await {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::DeleteEnvelope {
                remote_id,
                cascade_tx,
                cascade_alloc,
            } => {
                let write = async {
                    for id in &cascade_alloc {
                        self.store.delete_allocation(id).await?;
                    }
                    for id in &cascade_tx {
                        self.store.delete_transaction(id).await?;
                    }
                    self.store.delete_envelope(&remote_id).await
                };
                match self.classify(write).await {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::CreateTransaction => {
                let record = match self.transaction_snapshot(local_id) {
                    RecordSnapshot::Ready(record) => record,
                    RecordSnapshot::Blocked => return ConfirmOutcome::Retained,
                    RecordSnapshot::Gone => return self.resolve_gone(local_id),
                };
                match self.classify(self.store.create_transaction(local_id, &record)).await {
                    Ok(Some(canonical)) => {
                        ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, Some(canonical)))
                    }
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::CreateTransferPair { sibling_id } => {
                let expense = match self.transaction_snapshot(local_id) {
                    RecordSnapshot::Ready(record) => record,
                    RecordSnapshot::Blocked => return ConfirmOutcome::Retained,
                    RecordSnapshot::Gone => return self.resolve_gone(local_id),
                };
                let income = match self.transaction_snapshot(&sibling_id) {
                    RecordSnapshot::Ready(record) => record,
                    RecordSnapshot::Blocked => return ConfirmOutcome::Retained,
                    RecordSnapshot::Gone => return self.resolve_gone(local_id),
                };
                let write = async {
                    let first = self.store.create_transaction(local_id, &expense).await?;
                    match self.store.create_transaction(&sibling_id, &income).await {
                        Ok(second) => Ok((first, second)),
                        Err(err) if err.is_offline_class() => Err(err),
                        Err(err) => {
                            // leave no half-written pair behind
                            if let Err(cleanup) = self.store.delete_transaction(&first).await {
                                warn!(error = %cleanup, "failed to remove orphaned transfer leg");
                            }
                            Err(err)
                        }
                    }
                };
                match self.classify(write).await {
                    Ok(Some((first, second))) => {
                        let ready = {
                            let mut state = self.lock();
                            state.ids.promote(local_id, first);
                            state.ids.promote(&sibling_id, second);
                            state.pending.confirm(local_id);
                            state.pending.take_ready(local_id)
                        };
                        ConfirmOutcome::Confirmed(ready)
                    }
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::UpdateTransaction => {
                let record = match self.transaction_snapshot(local_id) {
                    RecordSnapshot::Ready(record) => record,
                    RecordSnapshot::Blocked => return ConfirmOutcome::Retained,
                    RecordSnapshot::Gone => return self.resolve_gone(local_id),
                };
                let remote_id = self.lock().ids.resolve(local_id).to_string();
                match self
                    .classify(self.store.update_transaction(&remote_id, &record))
                    .await
                {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::DeleteTransaction { remote_id } => {
                match self.classify(self.store.delete_transaction(&remote_id)).await {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::CreateIncomeSource => {
                let record = {
                    let state = self.lock();
                    state
                        .plan
                        .iter_income_sources()
                        .find(|source| source.id == local_id)
                        .cloned()
                };
                let Some(record) = record else {
                    return self.resolve_gone(local_id);
                };
                match self
                    .classify(self.store.create_income_source(local_id, &record))
                    .await
                {
                    Ok(Some(canonical)) => {
                        ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, Some(canonical)))
                    }
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::UpdateIncomeSource => {
                let record = {
                    let state = self.lock();
                    state
                        .plan
                        .iter_income_sources()
                        .find(|source| source.id == local_id)
                        .cloned()
                };
                let Some(record) = record else {
                    return self.resolve_gone(local_id);
                };
                let remote_id = self.lock().ids.resolve(local_id).to_string();
                match self
                    .classify(self.store.update_income_source(&remote_id, &record))
                    .await
                {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::DeleteIncomeSource { remote_id } => {
                match self.classify(self.store.delete_income_source(&remote_id)).await {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::CreateAllocation => {
                let record = match self.allocation_snapshot(local_id) {
                    RecordSnapshot::Ready(record) => record,
                    RecordSnapshot::Blocked => return ConfirmOutcome::Retained,
                    RecordSnapshot::Gone => return self.resolve_gone(local_id),
                };
                match self.classify(self.store.create_allocation(local_id, &record)).await {
                    Ok(Some(canonical)) => {
                        ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, Some(canonical)))
                    }
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::UpdateAllocation => {
                let record = match self.allocation_snapshot(local_id) {
                    RecordSnapshot::Ready(record) => record,
                    RecordSnapshot::Blocked => return ConfirmOutcome::Retained,
                    RecordSnapshot::Gone => return self.resolve_gone(local_id),
                };
                let remote_id = self.lock().ids.resolve(local_id).to_string();
                match self
                    .classify(self.store.update_allocation(&remote_id, &record))
                    .await
                {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
            PendingOp::DeleteAllocation { remote_id } => {
                match self.classify(self.store.delete_allocation(&remote_id)).await {
                    Ok(Some(())) => ConfirmOutcome::Confirmed(self.settle_confirmed(local_id, None)),
                    Ok(None) => ConfirmOutcome::Retained,
                    Err(err) => ConfirmOutcome::Failed(err),
                }
            }
        }
    }

    /// The record vanished locally while its write was pending; drop the
    /// mark and treat the write as settled.
    fn resolve_gone(&self, local_id: &str) -> ConfirmOutcome {
        debug!(id = local_id, "pending record no longer exists locally");
        let mut state = self.lock();
        state.pending.confirm(local_id);
        state.pending.cancel_deferred(local_id);
        ConfirmOutcome::Confirmed(Vec::new())
    }

    /// Shared reconcile tail for single-record commands: confirm, then on
    /// success flush deferred dependents; on an offline-class failure keep
    /// the pending mark; on a genuine failure undo the local mutation and
    /// surface [`Error::RemoteWrite`].
    async fn finish(
        &self,
        id: &str,
        op: PendingOp,
        changed: ChangeEvent,
        undo: impl FnOnce(&mut EngineState),
    ) -> Result<Applied> {
        match self.confirm_op(id, op).await {
            ConfirmOutcome::Confirmed(ready) => {
                self.emit(ChangeEvent::Sync);
                self.flush_deferred(ready).await;
                Ok(Applied {
                    id: id.to_string(),
                    sync: SyncOutcome::Confirmed,
                })
            }
            ConfirmOutcome::Retained => {
                self.emit(ChangeEvent::Sync);
                Ok(Applied {
                    id: id.to_string(),
                    sync: SyncOutcome::OfflineRetained,
                })
            }
            ConfirmOutcome::Failed(err) => {
                {
                    let mut state = self.lock();
                    state.pending.confirm(id);
                    state.pending.cancel_deferred(id);
                    // creates parked behind this record are orphaned
                    for orphan in state.pending.take_ready(id) {
                        Self::rollback_create_locally(&mut state, &orphan.pending_id, &orphan.op);
                        state.pending.confirm(&orphan.pending_id);
                    }
                    undo(&mut state);
                }
                self.emit(changed);
                self.emit(ChangeEvent::Sync);
                Err(Error::RemoteWrite {
                    message: err.to_string(),
                })
            }
        }
    }

    /// Drains released deferred writes breadth-first; a confirmed envelope
    /// create can release further dependents.
    async fn flush_deferred(&self, ready: Vec<Deferred>) {
        let mut queue: VecDeque<Deferred> = ready.into();
        while let Some(entry) = queue.pop_front() {
            match self.confirm_op(&entry.pending_id, entry.op.clone()).await {
                ConfirmOutcome::Confirmed(more) => {
                    self.emit(ChangeEvent::Sync);
                    queue.extend(more);
                }
                ConfirmOutcome::Retained => {
                    self.emit(ChangeEvent::Sync);
                }
                ConfirmOutcome::Failed(err) => {
                    warn!(id = %entry.pending_id, error = %err, "deferred write failed, rolling back");
                    {
                        let mut state = self.lock();
                        state.pending.confirm(&entry.pending_id);
                        Self::rollback_create_locally(&mut state, &entry.pending_id, &entry.op);
                    }
                    self.emit(ChangeEvent::Ledger);
                    self.emit(ChangeEvent::Plan);
                    self.emit(ChangeEvent::Sync);
                }
            }
        }
    }
}
