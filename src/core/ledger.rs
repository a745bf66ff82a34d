//! Transaction ledger - the in-memory collection of transactions and the
//! pure balance-derivation rule.
//!
//! Balances are never stored as running counters. Every balance query
//! recomputes the sum of incomes minus expenses over the matching
//! transaction set, which removes the whole class of drift bugs that
//! cached, manually-adjusted balances accumulate. Updates are therefore
//! just record replacement, and deletes of one transfer side atomically
//! remove the sibling so both envelope balances change through the same
//! state change.

use crate::errors::{Error, Result};
use crate::model::{MonthKey, Money, Transaction};
use std::collections::BTreeMap;
use tracing::warn;

/// Which months a balance query covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceScope {
    /// Ordinary envelopes: only the given month counts.
    Month(MonthKey),
    /// Piggybanks: every month counts, the envelope persists.
    AllTime,
}

/// In-memory transaction ledger.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    transactions: BTreeMap<String, Transaction>,
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Whether the ledger holds no transactions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Looks up a transaction by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// Iterates over every transaction in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    /// All transactions scoped to the given month.
    #[must_use]
    pub fn for_month(&self, month: MonthKey) -> Vec<&Transaction> {
        self.transactions
            .values()
            .filter(|tx| tx.month == month)
            .collect()
    }

    /// Inserts a transaction, re-deriving its month from its date first.
    pub fn add(&mut self, mut tx: Transaction) {
        tx.normalize();
        self.transactions.insert(tx.id.clone(), tx);
    }

    /// Replaces an existing transaction and returns the previous record.
    /// Since balances are derived, no adjustment bookkeeping is needed; the
    /// next balance query simply reflects the new record.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when no transaction has this id.
    pub fn update(&mut self, mut tx: Transaction) -> Result<Transaction> {
        tx.normalize();
        match self.transactions.get_mut(&tx.id) {
            Some(slot) => Ok(std::mem::replace(slot, tx)),
            None => Err(Error::NotFound {
                entity: "transaction",
                id: tx.id,
            }),
        }
    }

    /// Removes a transaction. When the record carries a `transfer_id`, its
    /// sibling is located and removed in the same logical operation; the
    /// returned vector holds everything that was removed so a rollback can
    /// restore the pair intact.
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] when no transaction has this id.
    pub fn delete(&mut self, id: &str) -> Result<Vec<Transaction>> {
        let Some(tx) = self.transactions.remove(id) else {
            return Err(Error::NotFound {
                entity: "transaction",
                id: id.to_string(),
            });
        };

        let mut removed = vec![tx];
        if let Some(transfer_id) = removed[0].transfer_id.clone() {
            let sibling_id = self
                .transactions
                .values()
                .find(|other| other.transfer_id.as_deref() == Some(transfer_id.as_str()))
                .map(|other| other.id.clone());
            match sibling_id {
                Some(sibling_id) => {
                    if let Some(sibling) = self.transactions.remove(&sibling_id) {
                        removed.push(sibling);
                    }
                }
                None => warn!(transfer_id, "transfer is missing its sibling"),
            }
        }
        Ok(removed)
    }

    /// Re-inserts a previously removed transaction, used by rollback.
    pub fn restore(&mut self, tx: Transaction) {
        self.transactions.insert(tx.id.clone(), tx);
    }

    /// Removes every transaction matching the predicate and returns them,
    /// used by month clears and envelope-deletion cascades.
    pub fn remove_where<F>(&mut self, mut keep_out: F) -> Vec<Transaction>
    where
        F: FnMut(&Transaction) -> bool,
    {
        let ids: Vec<String> = self
            .transactions
            .values()
            .filter(|tx| keep_out(tx))
            .map(|tx| tx.id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.transactions.remove(id))
            .collect()
    }

    /// The other side of a transfer pair, if present.
    #[must_use]
    pub fn sibling_of(&self, tx: &Transaction) -> Option<&Transaction> {
        let transfer_id = tx.transfer_id.as_deref()?;
        self.transactions
            .values()
            .find(|other| other.id != tx.id && other.transfer_id.as_deref() == Some(transfer_id))
    }

    /// Derives the balance of an envelope: the sum of income amounts minus
    /// the sum of expense amounts over the transactions in scope. Pure and
    /// always recomputed from the transaction set.
    #[must_use]
    pub fn balance_of(&self, envelope_id: &str, scope: BalanceScope) -> Money {
        self.transactions
            .values()
            .filter(|tx| tx.envelope_id == envelope_id)
            .filter(|tx| match scope {
                BalanceScope::Month(month) => tx.month == month,
                BalanceScope::AllTime => true,
            })
            .map(Transaction::signed_amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::model::TransactionKind;
    use chrono::{TimeZone, Utc};

    fn tx(id: &str, envelope: &str, kind: TransactionKind, cents: i64, month: &str) -> Transaction {
        let month: MonthKey = month.parse().unwrap();
        let date = month.start_datetime();
        Transaction {
            id: id.to_string(),
            envelope_id: envelope.to_string(),
            amount: Money::from_cents(cents),
            date,
            month,
            description: "test".to_string(),
            kind,
            reconciled: false,
            transfer_id: None,
            is_automatic: false,
        }
    }

    #[test]
    fn test_balance_is_income_minus_expense_for_month() {
        // Scenario A: $500 funding, $120 and $45 expenses -> 335.00
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "groceries", TransactionKind::Income, 50_000, "2026-02"));
        ledger.add(tx("t2", "groceries", TransactionKind::Expense, 12_000, "2026-02"));
        ledger.add(tx("t3", "groceries", TransactionKind::Expense, 4_500, "2026-02"));

        let month: MonthKey = "2026-02".parse().unwrap();
        let balance = ledger.balance_of("groceries", BalanceScope::Month(month));
        assert_eq!(balance, Money::from_cents(33_500));
        assert_eq!(balance.to_string(), "335.00");
    }

    #[test]
    fn test_balance_scope_month_vs_all_time() {
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "vacation", TransactionKind::Income, 10_000, "2026-01"));
        ledger.add(tx("t2", "vacation", TransactionKind::Income, 10_000, "2026-02"));

        let february: MonthKey = "2026-02".parse().unwrap();
        assert_eq!(
            ledger.balance_of("vacation", BalanceScope::Month(february)),
            Money::from_cents(10_000)
        );
        assert_eq!(
            ledger.balance_of("vacation", BalanceScope::AllTime),
            Money::from_cents(20_000)
        );
    }

    #[test]
    fn test_balance_ignores_other_envelopes() {
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "groceries", TransactionKind::Income, 5_000, "2026-02"));
        ledger.add(tx("t2", "rent", TransactionKind::Income, 90_000, "2026-02"));

        assert_eq!(
            ledger.balance_of("groceries", BalanceScope::AllTime),
            Money::from_cents(5_000)
        );
    }

    #[test]
    fn test_legacy_transfer_kind_contributes_zero() {
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "groceries", TransactionKind::Income, 5_000, "2026-02"));
        ledger.add(tx("t2", "groceries", TransactionKind::Transfer, 99_999, "2026-02"));

        assert_eq!(
            ledger.balance_of("groceries", BalanceScope::AllTime),
            Money::from_cents(5_000)
        );
    }

    #[test]
    fn test_add_rederives_month_from_date() {
        let mut ledger = Ledger::new();
        let mut record = tx("t1", "groceries", TransactionKind::Expense, 1_000, "2026-02");
        record.date = Utc.with_ymd_and_hms(2026, 3, 5, 10, 0, 0).unwrap();
        ledger.add(record);

        assert_eq!(ledger.get("t1").unwrap().month.to_string(), "2026-03");
    }

    #[test]
    fn test_update_replaces_record_and_balance_follows() {
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "groceries", TransactionKind::Expense, 1_000, "2026-02"));

        let mut updated = tx("t1", "groceries", TransactionKind::Expense, 2_500, "2026-02");
        updated.description = "corrected".to_string();
        let previous = ledger.update(updated).unwrap();
        assert_eq!(previous.amount, Money::from_cents(1_000));

        let month: MonthKey = "2026-02".parse().unwrap();
        assert_eq!(
            ledger.balance_of("groceries", BalanceScope::Month(month)),
            Money::from_cents(-2_500)
        );
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let mut ledger = Ledger::new();
        let result = ledger.update(tx("ghost", "groceries", TransactionKind::Expense, 1, "2026-02"));
        assert!(matches!(result, Err(Error::NotFound { entity: "transaction", .. })));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let mut ledger = Ledger::new();
        assert!(matches!(
            ledger.delete("ghost"),
            Err(Error::NotFound { entity: "transaction", .. })
        ));
    }

    #[test]
    fn test_delete_transfer_removes_both_siblings() {
        // Scenario C core: deleting either side removes the pair and both
        // balances return to their pre-transfer values.
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "groceries", TransactionKind::Income, 50_000, "2026-02"));
        let mut out = tx("t2", "groceries", TransactionKind::Expense, 5_000, "2026-02");
        out.transfer_id = Some("pair-1".to_string());
        let mut into = tx("t3", "emergency", TransactionKind::Income, 5_000, "2026-02");
        into.transfer_id = Some("pair-1".to_string());
        ledger.add(out);
        ledger.add(into);

        let removed = ledger.delete("t3").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(ledger.get("t2").is_none());
        assert!(ledger.get("t3").is_none());

        assert_eq!(
            ledger.balance_of("groceries", BalanceScope::AllTime),
            Money::from_cents(50_000)
        );
        assert_eq!(
            ledger.balance_of("emergency", BalanceScope::AllTime),
            Money::ZERO
        );
    }

    #[test]
    fn test_restore_reinserts_removed_pair() {
        let mut ledger = Ledger::new();
        let mut out = tx("t1", "groceries", TransactionKind::Expense, 5_000, "2026-02");
        out.transfer_id = Some("pair-1".to_string());
        let mut into = tx("t2", "emergency", TransactionKind::Income, 5_000, "2026-02");
        into.transfer_id = Some("pair-1".to_string());
        ledger.add(out.clone());
        ledger.add(into);

        let removed = ledger.delete("t1").unwrap();
        for tx in removed {
            ledger.restore(tx);
        }
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.sibling_of(&out).unwrap().id, "t2");
    }

    #[test]
    fn test_remove_where_scopes_to_month() {
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "groceries", TransactionKind::Income, 1_000, "2026-01"));
        ledger.add(tx("t2", "groceries", TransactionKind::Income, 2_000, "2026-02"));
        ledger.add(tx("t3", "rent", TransactionKind::Expense, 3_000, "2026-02"));

        let february: MonthKey = "2026-02".parse().unwrap();
        let removed = ledger.remove_where(|tx| tx.month == february);
        assert_eq!(removed.len(), 2);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get("t1").is_some());
    }

    #[test]
    fn test_balance_rederivation_matches_closed_form() {
        // After an arbitrary sequence of add/update/delete the derived
        // balance equals the straight sum over the surviving records.
        let mut ledger = Ledger::new();
        ledger.add(tx("t1", "e", TransactionKind::Income, 10_000, "2026-02"));
        ledger.add(tx("t2", "e", TransactionKind::Expense, 2_500, "2026-02"));
        ledger.add(tx("t3", "e", TransactionKind::Expense, 1_500, "2026-02"));
        ledger.update(tx("t2", "e", TransactionKind::Expense, 3_000, "2026-02")).unwrap();
        ledger.delete("t3").unwrap();

        let closed_form: Money = ledger.iter().map(Transaction::signed_amount).sum();
        assert_eq!(
            ledger.balance_of("e", BalanceScope::AllTime),
            closed_form
        );
        assert_eq!(closed_form, Money::from_cents(7_000));
    }
}
