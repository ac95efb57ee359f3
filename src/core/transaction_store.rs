//! Authoritative in-memory table of top-up transactions
//!
//! This module provides the `TransactionStore`, which owns the canonical copy
//! of every top-up for the lifetime of the process and mirrors each change to
//! the durable store.
//!
//! # Locking contract
//!
//! Every mutating method takes the caller's [`OwnerLock`] for the owner of
//! the transaction being changed. The store never acquires guard locks
//! itself. Each transition out of `pending` runs inside a single `DashMap`
//! entry lock, so a concurrent expiry scan and a confirmation cannot both
//! win: whichever transition runs second sees a terminal status.
//!
//! # Mirroring
//!
//! After every mutation the new row is upserted to the durable store. A
//! failed upsert is logged and the id is remembered; it is retried after the
//! next successful mirror. The in-memory change is never rolled back. A
//! retried row may arrive after a newer one for the same id, which is safe
//! because durable stores never let a `pending` row replace a terminal one.
//!
//! # Expiry
//!
//! Expiry is lazy: overdue `pending` transactions are flipped to `expired`
//! only by [`TransactionStore::list_pending`] and by a confirmation attempt.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::balance_ledger::BalanceLedger;
use super::guard::OwnerLock;
use super::qris::QrisGenerator;
use super::traits::{Clock, DurableStore};
use crate::types::{
    Amount, BalanceRecord, LedgerError, LedgerStats, OwnerId, Transaction, TransactionFilter,
    TransactionId, TransactionPage, TransactionStatus,
};

const ID_PREFIX: &str = "TXN";

/// Outcome of a guarded transition attempt on one entry
enum Transition {
    Applied(Transaction),
    Expired(Transaction),
}

#[derive(Debug)]
pub struct TransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
    durable: Arc<dyn DurableStore>,
    ledger: Arc<BalanceLedger>,
    generator: QrisGenerator,
    clock: Arc<dyn Clock>,
    expiry_window: chrono::Duration,
    /// Highest millisecond stamp handed out in an id
    last_stamp: AtomicI64,
    /// Ids whose last mirror attempt failed
    unsynced: DashSet<TransactionId>,
}

impl TransactionStore {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        ledger: Arc<BalanceLedger>,
        generator: QrisGenerator,
        clock: Arc<dyn Clock>,
        expiry_window: Duration,
    ) -> Self {
        Self {
            transactions: DashMap::new(),
            durable,
            ledger,
            generator,
            clock,
            expiry_window: chrono::Duration::from_std(expiry_window)
                .unwrap_or(chrono::Duration::MAX),
            last_stamp: AtomicI64::new(0),
            unsynced: DashSet::new(),
        }
    }

    /// Build a new id `TXN_<owner>_<millis>`
    ///
    /// The millisecond stamp is strictly increasing across the whole store,
    /// so two ids created in the same millisecond (or after the wall clock
    /// stepped back) never collide.
    fn next_id(&self, owner: OwnerId, now: DateTime<Utc>) -> TransactionId {
        let now_ms = now.timestamp_millis();
        let previous = match self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last.saturating_add(1)))
            }) {
            Ok(previous) | Err(previous) => previous,
        };
        let stamp = now_ms.max(previous.saturating_add(1));
        format!("{}_{}_{}", ID_PREFIX, owner, stamp)
    }

    /// Create a `pending` top-up for the lock's owner
    ///
    /// # Returns
    ///
    /// * `Ok(Transaction)` - The stored transaction
    /// * `Err(LedgerError::Validation)` - If `amount` is not positive
    /// * `Err(LedgerError::Generation)` - If no payment code could be built
    pub async fn create(
        &self,
        lock: &OwnerLock,
        display_name: &str,
        amount: Amount,
    ) -> Result<Transaction, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::validation(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }
        let payment_code = self
            .generator
            .generate(amount)
            .map_err(|e| LedgerError::generation(e.to_string()))?;

        let now = self.clock.now();
        let owner = lock.owner();
        let tx = Transaction {
            id: self.next_id(owner, now),
            owner,
            display_name: display_name.to_string(),
            amount,
            status: TransactionStatus::Pending,
            payment_code,
            created_at: now,
            expires_at: now
                .checked_add_signed(self.expiry_window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            approved_by: None,
            approved_at: None,
        };

        self.transactions.insert(tx.id.clone(), tx.clone());
        tracing::info!(transaction_id = %tx.id, owner, amount, "top-up created");
        self.mirror(&tx).await;
        Ok(tx)
    }

    /// Expire overdue `pending` transactions and return the remaining ones
    ///
    /// Oldest first. Every flipped transaction is mirrored.
    pub async fn list_pending(&self) -> Vec<Transaction> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        let mut pending = Vec::new();

        for mut entry in self.transactions.iter_mut() {
            if !entry.is_pending() {
                continue;
            }
            if entry.is_overdue(now) {
                entry.status = TransactionStatus::Expired;
                expired.push(entry.clone());
            } else {
                pending.push(entry.clone());
            }
        }

        for tx in &expired {
            tracing::info!(transaction_id = %tx.id, owner = tx.owner, "top-up expired");
            self.mirror(tx).await;
        }

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pending
    }

    /// Confirm a pending top-up and credit its amount to the owner
    ///
    /// # Returns
    ///
    /// * `Ok((Transaction, BalanceRecord))` - The confirmed transaction and the
    ///   balance after the credit
    /// * `Err(LedgerError::NotFound)` - Unknown id
    /// * `Err(LedgerError::AlreadyProcessed)` - Already `confirmed` or `rejected`
    /// * `Err(LedgerError::Expired)` - Overdue, or expired earlier by a listing
    /// * `Err(LedgerError::CreditFailed)` - Confirmed, but the credit failed
    /// * `Err(LedgerError::Validation)` - The lock belongs to another owner
    pub async fn confirm(
        &self,
        lock: &OwnerLock,
        id: &str,
        approver: OwnerId,
    ) -> Result<(Transaction, BalanceRecord), LedgerError> {
        let now = self.clock.now();
        let transition = {
            let mut entry = self
                .transactions
                .get_mut(id)
                .ok_or_else(|| LedgerError::not_found(id))?;
            check_transition(lock, &entry).map_err(|e| match e {
                LedgerError::AlreadyProcessed {
                    status: TransactionStatus::Expired,
                    ..
                } => LedgerError::expired(id),
                other => other,
            })?;

            if entry.is_overdue(now) {
                entry.status = TransactionStatus::Expired;
                Transition::Expired(entry.clone())
            } else {
                entry.status = TransactionStatus::Confirmed;
                entry.approved_by = Some(approver);
                entry.approved_at = Some(now);
                Transition::Applied(entry.clone())
            }
        };

        let tx = match transition {
            Transition::Expired(tx) => {
                tracing::info!(transaction_id = %tx.id, owner = tx.owner, "confirmation refused, top-up expired");
                self.mirror(&tx).await;
                return Err(LedgerError::expired(id));
            }
            Transition::Applied(tx) => tx,
        };

        tracing::info!(transaction_id = %tx.id, owner = tx.owner, approver, amount = tx.amount, "top-up confirmed");
        self.mirror(&tx).await;

        match self.ledger.credit(tx.owner, tx.amount).await {
            Ok(record) => Ok((tx, record)),
            Err(e) => {
                tracing::error!(
                    transaction_id = %tx.id,
                    owner = tx.owner,
                    amount = tx.amount,
                    error = %e,
                    "top-up confirmed but balance credit failed, needs reconciliation"
                );
                Err(LedgerError::credit_failed(
                    &tx.id,
                    tx.owner,
                    tx.amount,
                    e.to_string(),
                ))
            }
        }
    }

    /// Reject a pending top-up; no balance change
    ///
    /// Expiry is not checked: an overdue top-up that was never listed can
    /// still be rejected.
    ///
    /// # Returns
    ///
    /// * `Ok(Transaction)` - The rejected transaction
    /// * `Err(LedgerError::NotFound)` - Unknown id
    /// * `Err(LedgerError::AlreadyProcessed)` - Not `pending` any more
    /// * `Err(LedgerError::Validation)` - The lock belongs to another owner
    pub async fn reject(
        &self,
        lock: &OwnerLock,
        id: &str,
        approver: OwnerId,
    ) -> Result<Transaction, LedgerError> {
        let now = self.clock.now();
        let tx = {
            let mut entry = self
                .transactions
                .get_mut(id)
                .ok_or_else(|| LedgerError::not_found(id))?;
            check_transition(lock, &entry)?;

            entry.status = TransactionStatus::Rejected;
            entry.approved_by = Some(approver);
            entry.approved_at = Some(now);
            entry.clone()
        };

        tracing::info!(transaction_id = %tx.id, owner = tx.owner, approver, "top-up rejected");
        self.mirror(&tx).await;
        Ok(tx)
    }

    /// Replace the in-memory table with the durable store's contents
    ///
    /// No expiry is evaluated here.
    ///
    /// # Returns
    ///
    /// The number of loaded transactions.
    pub async fn reload(&self) -> Result<usize, LedgerError> {
        let loaded = self.durable.load_transactions().await?;
        let count = loaded.len();

        self.transactions.clear();
        self.unsynced.clear();
        for tx in loaded {
            if let Some(stamp) = id_stamp(&tx.id) {
                self.last_stamp.fetch_max(stamp, Ordering::SeqCst);
            }
            self.transactions.insert(tx.id.clone(), tx);
        }

        tracing::info!(transactions = count, "transactions loaded from durable store");
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<Transaction> {
        self.transactions.get(id).map(|entry| entry.value().clone())
    }

    pub fn owner_of(&self, id: &str) -> Option<OwnerId> {
        self.transactions.get(id).map(|entry| entry.owner)
    }

    /// Most recently created `pending` transaction of `owner`
    pub fn latest_pending_for(&self, owner: OwnerId) -> Option<Transaction> {
        self.transactions
            .iter()
            .filter(|entry| entry.owner == owner && entry.is_pending())
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .map(|entry| entry.value().clone())
    }

    /// Transactions matching `filter`, newest first, paginated
    ///
    /// `total` counts every match, not just the returned page.
    pub fn query(&self, filter: &TransactionFilter) -> TransactionPage {
        let mut matching: Vec<Transaction> = self
            .transactions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matching.len();
        let transactions = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect();
        TransactionPage {
            transactions,
            total,
        }
    }

    pub fn stats(&self) -> LedgerStats {
        let mut stats = LedgerStats::default();
        let mut owners = HashSet::new();

        for entry in self.transactions.iter() {
            stats.total += 1;
            owners.insert(entry.owner);
            match entry.status {
                TransactionStatus::Pending => stats.pending += 1,
                TransactionStatus::Confirmed => {
                    stats.confirmed += 1;
                    stats.confirmed_amount = stats.confirmed_amount.saturating_add(entry.amount);
                }
                TransactionStatus::Rejected => stats.rejected += 1,
                TransactionStatus::Expired => stats.expired += 1,
            }
        }

        stats.owners = owners.len();
        if stats.confirmed > 0 {
            stats.average_confirmed = stats.confirmed_amount / stats.confirmed as Amount;
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Number of transactions whose latest change is not yet mirrored
    pub fn unsynced(&self) -> usize {
        self.unsynced.len()
    }

    async fn mirror(&self, tx: &Transaction) {
        match self.durable.upsert_transaction(tx).await {
            Ok(()) => {
                self.unsynced.remove(&tx.id);
                self.resync().await;
            }
            Err(e) => {
                tracing::warn!(transaction_id = %tx.id, error = %e, "failed to mirror transaction");
                self.unsynced.insert(tx.id.clone());
            }
        }
    }

    /// Retry mirroring every remembered id, stopping at the first failure
    async fn resync(&self) {
        if self.unsynced.is_empty() {
            return;
        }
        let ids: Vec<TransactionId> = self.unsynced.iter().map(|id| id.key().clone()).collect();
        for id in ids {
            let Some(tx) = self.get(&id) else {
                self.unsynced.remove(&id);
                continue;
            };
            if let Err(e) = self.durable.upsert_transaction(&tx).await {
                tracing::warn!(transaction_id = %id, error = %e, "resync still failing");
                return;
            }
            self.unsynced.remove(&id);
            tracing::info!(transaction_id = %id, "transaction resynced");
        }
    }
}

fn check_transition(lock: &OwnerLock, tx: &Transaction) -> Result<(), LedgerError> {
    if tx.owner != lock.owner() {
        return Err(LedgerError::validation(format!(
            "Transaction {} belongs to owner {}, lock is held for owner {}",
            tx.id,
            tx.owner,
            lock.owner()
        )));
    }
    if tx.status.is_terminal() {
        return Err(LedgerError::already_processed(&tx.id, tx.status));
    }
    Ok(())
}

fn id_stamp(id: &str) -> Option<i64> {
    id.rsplit('_').next().and_then(|stamp| stamp.parse().ok())
}
