//! In-memory durable store
//!
//! `MemoryStore` keeps transactions and balances in `DashMap`s. It is the
//! store used by tests and by embedders that bring their own persistence,
//! and it is the state behind [`CsvJournalStore`](super::CsvJournalStore).
//!
//! # Atomicity
//!
//! Balance mutations run inside a single `DashMap` entry lock, so the
//! increment and the compare-and-decrement are atomic per owner exactly
//! like a single-row `UPDATE` would be. Different owners live in different
//! entries and do not block each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::core::traits::DurableStore;
use crate::types::{
    Amount, BalanceRecord, DebitOutcome, LedgerError, OwnerId, Transaction, TransactionId,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    transactions: DashMap<TransactionId, Transaction>,
    balances: DashMap<OwnerId, BalanceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a transaction row, never letting a `pending` row replace a terminal one
    ///
    /// Transactions only ever move from `pending` to a terminal status, so a
    /// pending copy arriving after a terminal one is stale.
    ///
    /// # Returns
    ///
    /// `true` if the row was stored, `false` if it was stale and dropped.
    pub(crate) fn put_transaction(&self, tx: Transaction) -> bool {
        let mut entry = self
            .transactions
            .entry(tx.id.clone())
            .or_insert_with(|| tx.clone());
        if entry.status.is_terminal() && !tx.status.is_terminal() {
            return false;
        }
        *entry = tx;
        true
    }

    /// Whether `tx` is a pending copy of a transaction already stored as terminal
    pub(crate) fn is_stale(&self, tx: &Transaction) -> bool {
        !tx.status.is_terminal()
            && self
                .transactions
                .get(&tx.id)
                .is_some_and(|stored| stored.status.is_terminal())
    }

    pub(crate) fn balance_of(&self, owner: OwnerId) -> Option<BalanceRecord> {
        self.balances.get(&owner).map(|entry| entry.value().clone())
    }

    pub(crate) fn put_balance(&self, record: BalanceRecord) {
        self.balances.insert(record.owner, record);
    }

    pub(crate) fn apply_increment(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError> {
        let mut entry = self
            .balances
            .entry(owner)
            .or_insert_with(|| BalanceRecord::new(owner, now));
        entry.balance = entry.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::storage(format!("balance overflow for owner {}", owner))
        })?;
        entry.updated_at = now;
        Ok(entry.clone())
    }

    pub(crate) fn apply_decrement(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> DebitOutcome {
        match self.balances.get_mut(&owner) {
            Some(mut entry) if entry.balance >= amount => {
                entry.balance -= amount;
                entry.updated_at = now;
                DebitOutcome::Applied(entry.clone())
            }
            Some(entry) => DebitOutcome::Insufficient {
                balance: entry.balance,
            },
            None => DebitOutcome::Insufficient { balance: 0 },
        }
    }

    pub(crate) fn snapshot_transactions(&self) -> Vec<Transaction> {
        self.transactions
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub(crate) fn snapshot_balances(&self) -> Vec<BalanceRecord> {
        self.balances
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        self.put_transaction(tx.clone());
        Ok(())
    }

    async fn load_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.snapshot_transactions())
    }

    async fn find_balance(&self, owner: OwnerId) -> Result<Option<BalanceRecord>, LedgerError> {
        Ok(self.balance_of(owner))
    }

    async fn get_or_create_balance(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError> {
        Ok(self
            .balances
            .entry(owner)
            .or_insert_with(|| BalanceRecord::new(owner, now))
            .clone())
    }

    async fn increment_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError> {
        self.apply_increment(owner, amount, now)
    }

    async fn decrement_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<DebitOutcome, LedgerError> {
        Ok(self.apply_decrement(owner, amount, now))
    }

    async fn load_balances(&self) -> Result<Vec<BalanceRecord>, LedgerError> {
        Ok(self.snapshot_balances())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionStatus;
    use std::sync::Arc;

    fn transaction(id: &str, status: TransactionStatus) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: id.to_string(),
            owner: 1,
            display_name: "sari".to_string(),
            amount: 10_000,
            status,
            payment_code: "code".to_string(),
            created_at: now,
            expires_at: now,
            approved_by: None,
            approved_at: None,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_balance_starts_at_zero() {
        let store = MemoryStore::new();
        assert!(store.find_balance(1).await.unwrap().is_none());

        let record = store.get_or_create_balance(1, Utc::now()).await.unwrap();

        assert_eq!(record.balance, 0);
        assert!(store.find_balance(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_increment_upserts() {
        let store = MemoryStore::new();

        store.increment_balance(1, 500, Utc::now()).await.unwrap();
        let record = store.increment_balance(1, 250, Utc::now()).await.unwrap();

        assert_eq!(record.balance, 750);
    }

    #[tokio::test]
    async fn test_increment_overflow_is_storage_error() {
        let store = MemoryStore::new();
        store.increment_balance(1, Amount::MAX, Utc::now()).await.unwrap();

        let result = store.increment_balance(1, 1, Utc::now()).await;

        assert!(matches!(result, Err(LedgerError::Storage { .. })));
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().balance, Amount::MAX);
    }

    #[tokio::test]
    async fn test_decrement_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.increment_balance(1, 100, Utc::now()).await.unwrap();

        let refused = store.decrement_balance(1, 101, Utc::now()).await.unwrap();
        assert_eq!(refused, DebitOutcome::Insufficient { balance: 100 });

        let applied = store.decrement_balance(1, 100, Utc::now()).await.unwrap();
        assert!(matches!(applied, DebitOutcome::Applied(ref r) if r.balance == 0));
    }

    #[tokio::test]
    async fn test_decrement_missing_owner_is_insufficient() {
        let store = MemoryStore::new();
        let outcome = store.decrement_balance(9, 1, Utc::now()).await.unwrap();
        assert_eq!(outcome, DebitOutcome::Insufficient { balance: 0 });
    }

    #[test]
    fn test_terminal_row_is_not_replaced_by_pending() {
        let store = MemoryStore::new();

        assert!(store.put_transaction(transaction("TXN_1_1", TransactionStatus::Confirmed)));
        assert!(!store.put_transaction(transaction("TXN_1_1", TransactionStatus::Pending)));

        let rows = store.snapshot_transactions();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, TransactionStatus::Confirmed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_never_overdraw() {
        let store = Arc::new(MemoryStore::new());
        store.increment_balance(1, 1_000, Utc::now()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.decrement_balance(1, 30, Utc::now()).await.unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if let DebitOutcome::Applied(_) = handle.await.unwrap() {
                applied += 1;
            }
        }

        assert_eq!(applied, 33);
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().balance, 10);
    }
}
