//! Per-owner balances on top of the durable store
//!
//! This module provides the `BalanceLedger`, the only write path for
//! balances. It does not cache anything: every read and write goes to the
//! [`DurableStore`], whose increment and conditional decrement are atomic per
//! owner. That is what keeps concurrent debits from overdrawing and
//! concurrent credits from losing updates, without any lock held here.
//!
//! # Balance Rules
//!
//! - Balances are integers in the smallest currency unit and never negative
//! - A credit always applies (upsert; the record is created if missing)
//! - A debit applies in full or not at all

use std::sync::Arc;

use super::traits::{Clock, DurableStore};
use crate::types::{Amount, BalanceRecord, DebitOutcome, LedgerError, OwnerId};

#[derive(Debug, Clone)]
pub struct BalanceLedger {
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Get the owner's balance, creating a zero balance on first access
    pub async fn get_balance(&self, owner: OwnerId) -> Result<BalanceRecord, LedgerError> {
        self.store.get_or_create_balance(owner, self.clock.now()).await
    }

    /// Add `amount` to the owner's balance
    ///
    /// # Returns
    ///
    /// * `Ok(BalanceRecord)` - The record after the credit
    /// * `Err(LedgerError::Validation)` - If `amount` is not positive
    /// * `Err(LedgerError::Storage)` - If the durable store failed
    pub async fn credit(&self, owner: OwnerId, amount: Amount) -> Result<BalanceRecord, LedgerError> {
        validate_amount(amount)?;
        let record = self
            .store
            .increment_balance(owner, amount, self.clock.now())
            .await?;
        tracing::debug!(owner, amount, balance = record.balance, "balance credited");
        Ok(record)
    }

    /// Subtract `amount` from the owner's balance if it covers the amount
    ///
    /// # Returns
    ///
    /// * `Ok(BalanceRecord)` - The record after the debit
    /// * `Err(LedgerError::InsufficientFunds)` - Nothing was debited
    /// * `Err(LedgerError::Validation)` - If `amount` is not positive
    /// * `Err(LedgerError::Storage)` - If the durable store failed
    pub async fn debit(&self, owner: OwnerId, amount: Amount) -> Result<BalanceRecord, LedgerError> {
        validate_amount(amount)?;
        match self
            .store
            .decrement_balance(owner, amount, self.clock.now())
            .await?
        {
            DebitOutcome::Applied(record) => {
                tracing::debug!(owner, amount, balance = record.balance, "balance debited");
                Ok(record)
            }
            DebitOutcome::Insufficient { balance } => {
                Err(LedgerError::insufficient_funds(owner, balance, amount))
            }
        }
    }

    /// Every stored balance, sorted by owner
    pub async fn all_balances(&self) -> Result<Vec<BalanceRecord>, LedgerError> {
        let mut balances = self.store.load_balances().await?;
        balances.sort_by_key(|record| record.owner);
        Ok(balances)
    }
}

fn validate_amount(amount: Amount) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::validation(format!(
            "Amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::storage::MemoryStore;
    use rstest::rstest;

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        )
    }

    #[tokio::test]
    async fn test_get_balance_creates_zero_record() {
        let ledger = ledger();

        let record = ledger.get_balance(5).await.unwrap();

        assert_eq!(record.owner, 5);
        assert_eq!(record.balance, 0);
        assert_eq!(ledger.all_balances().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_credit_then_debit() {
        let ledger = ledger();

        ledger.credit(1, 50_000).await.unwrap();
        let record = ledger.debit(1, 20_000).await.unwrap();

        assert_eq!(record.balance, 30_000);
    }

    #[tokio::test]
    async fn test_debit_refused_in_full() {
        let ledger = ledger();
        ledger.credit(1, 5_000).await.unwrap();

        let result = ledger.debit(1, 10_000).await;

        assert_eq!(
            result,
            Err(LedgerError::insufficient_funds(1, 5_000, 10_000))
        );
        assert_eq!(ledger.get_balance(1).await.unwrap().balance, 5_000);
    }

    #[tokio::test]
    async fn test_debit_exact_balance_reaches_zero() {
        let ledger = ledger();
        ledger.credit(1, 5_000).await.unwrap();

        assert_eq!(ledger.debit(1, 5_000).await.unwrap().balance, 0);
    }

    #[rstest]
    #[case::zero(0)]
    #[case::negative(-1)]
    #[tokio::test]
    async fn test_non_positive_amounts_rejected(#[case] amount: Amount) {
        let ledger = ledger();

        assert!(matches!(
            ledger.credit(1, amount).await,
            Err(LedgerError::Validation { .. })
        ));
        assert!(matches!(
            ledger.debit(1, amount).await,
            Err(LedgerError::Validation { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_credits_sum() {
        let ledger = ledger();

        let mut handles = Vec::new();
        for i in 1..=40 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.credit(3, i * 100).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 100 * (1 + 2 + ... + 40)
        assert_eq!(ledger.get_balance(3).await.unwrap().balance, 82_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_never_overdraw() {
        let ledger = ledger();
        ledger.credit(2, 10_000).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.debit(2, 3_000).await }));
        }

        let mut applied = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(LedgerError::InsufficientFunds { .. }) => refused += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(applied, 3);
        assert_eq!(refused, 22);
        assert_eq!(ledger.get_balance(2).await.unwrap().balance, 1_000);
    }
}
