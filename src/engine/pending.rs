//! Bookkeeping for writes the store has not confirmed yet.
//!
//! Every optimistic mutation gets a pending mark keyed by the record's local
//! id. Confirmation removes the mark; an offline-class failure leaves it in
//! place so a later retry can replay the write. Commands that reference an
//! envelope whose own create is still unconfirmed are parked in the deferred
//! queue and released once that envelope's canonical id arrives.

use std::collections::BTreeMap;

/// The store write a pending record is waiting on.
///
/// Deletes carry the id the store knows the record by, since the local copy
/// is gone by the time the write is retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingOp {
    CreateEnvelope,
    UpdateEnvelope,
    DeleteEnvelope {
        remote_id: String,
        /// Local ids of current-month transactions removed with the envelope.
        cascade_tx: Vec<String>,
        /// Local ids of allocations removed with the envelope.
        cascade_alloc: Vec<String>,
    },
    CreateTransaction,
    CreateTransferPair { sibling_id: String },
    UpdateTransaction,
    DeleteTransaction { remote_id: String },
    CreateIncomeSource,
    UpdateIncomeSource,
    DeleteIncomeSource { remote_id: String },
    CreateAllocation,
    UpdateAllocation,
    DeleteAllocation { remote_id: String },
}

/// A write parked until the envelope create it depends on is confirmed.
#[derive(Clone, Debug)]
pub struct Deferred {
    /// Temporary id of the envelope whose confirmation unblocks this write.
    pub dep: String,
    /// Local id of the record waiting to be written.
    pub pending_id: String,
    pub op: PendingOp,
}

/// The set of unconfirmed writes plus the deferred queue.
#[derive(Debug, Default)]
pub struct PendingSet {
    entries: BTreeMap<String, PendingOp>,
    deferred: Vec<Deferred>,
}

impl PendingSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as waiting on `op`. A newer mark replaces an older one,
    /// so a record edited twice while offline retries only its latest state.
    pub fn mark(&mut self, id: &str, op: PendingOp) {
        self.entries.insert(id.to_string(), op);
    }

    /// Clears the mark for `id`, returning the op it was waiting on.
    pub fn confirm(&mut self, id: &str) -> Option<PendingOp> {
        self.entries.remove(id)
    }

    #[must_use]
    pub fn is_pending(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&PendingOp> {
        self.entries.get(id)
    }

    /// Local ids of every unconfirmed write, in id order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parks a write until the envelope create `dep` is confirmed.
    pub fn push_deferred(&mut self, dep: &str, pending_id: &str, op: PendingOp) {
        self.deferred.push(Deferred {
            dep: dep.to_string(),
            pending_id: pending_id.to_string(),
            op,
        });
    }

    /// Releases every deferred write that was waiting on `dep`, preserving
    /// submission order.
    pub fn take_ready(&mut self, dep: &str) -> Vec<Deferred> {
        let mut ready = Vec::new();
        let mut remaining = Vec::with_capacity(self.deferred.len());
        for entry in self.deferred.drain(..) {
            if entry.dep == dep {
                ready.push(entry);
            } else {
                remaining.push(entry);
            }
        }
        self.deferred = remaining;
        ready
    }

    /// Whether any write is parked behind the envelope create `dep`.
    #[must_use]
    pub fn has_deferred_on(&self, dep: &str) -> bool {
        self.deferred.iter().any(|entry| entry.dep == dep)
    }

    /// Whether the write for `pending_id` is currently parked.
    #[must_use]
    pub fn is_deferred(&self, pending_id: &str) -> bool {
        self.deferred.iter().any(|entry| entry.pending_id == pending_id)
    }

    /// Drops deferred writes whose pending record was rolled back.
    pub fn cancel_deferred(&mut self, pending_id: &str) {
        self.deferred.retain(|entry| entry.pending_id != pending_id);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_mark_confirm_cycle() {
        let mut pending = PendingSet::new();
        pending.mark("tmp-1", PendingOp::CreateTransaction);
        assert!(pending.is_pending("tmp-1"));
        assert_eq!(pending.ids(), vec!["tmp-1".to_string()]);

        let op = pending.confirm("tmp-1");
        assert_eq!(op, Some(PendingOp::CreateTransaction));
        assert!(pending.is_empty());
        assert_eq!(pending.confirm("tmp-1"), None);
    }

    #[test]
    fn test_newer_mark_replaces_older() {
        let mut pending = PendingSet::new();
        pending.mark("tmp-1", PendingOp::CreateTransaction);
        pending.mark("tmp-1", PendingOp::UpdateTransaction);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get("tmp-1"), Some(&PendingOp::UpdateTransaction));
    }

    #[test]
    fn test_take_ready_is_dep_scoped_and_ordered() {
        let mut pending = PendingSet::new();
        pending.push_deferred("tmp-1", "tmp-2", PendingOp::CreateTransaction);
        pending.push_deferred("tmp-9", "tmp-3", PendingOp::CreateAllocation);
        pending.push_deferred("tmp-1", "tmp-4", PendingOp::CreateAllocation);

        let ready = pending.take_ready("tmp-1");
        assert_eq!(ready.len(), 2);
        assert_eq!(ready[0].pending_id, "tmp-2");
        assert_eq!(ready[1].pending_id, "tmp-4");
        assert!(pending.has_deferred_on("tmp-9"));
        assert!(!pending.has_deferred_on("tmp-1"));
    }

    #[test]
    fn test_cancel_deferred_drops_by_pending_id() {
        let mut pending = PendingSet::new();
        pending.push_deferred("tmp-1", "tmp-2", PendingOp::CreateTransaction);
        pending.cancel_deferred("tmp-2");
        assert!(pending.take_ready("tmp-1").is_empty());
    }
}
