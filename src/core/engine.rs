//! Top-up lifecycle orchestration
//!
//! This module provides the `TopUpEngine`, the facade the rest of the bot
//! talks to. It combines the concurrency guard, the payment code generator,
//! the transaction store and the balance ledger into the top-up state
//! machine:
//!
//! ```text
//! pending --confirm--> confirmed   (not overdue; credits the balance)
//! pending --reject---> rejected
//! pending --expiry observed--> expired
//! ```
//!
//! # Architecture
//!
//! ```text
//! TopUpEngine
//!     ├── Arc<ConcurrencyGuard>   (per-owner locks and cooldowns)
//!     ├── Arc<TransactionStore>   (in-memory top-ups, mirrored)
//!     ├── Arc<BalanceLedger>      (durable balances)
//!     └── Arc<dyn Notifier>       (owner and admin messages)
//! ```
//!
//! # Thread Safety
//!
//! The engine is cheap to clone and every clone shares the same state.
//! Operations for one owner are serialized by the guard; operations for
//! different owners run in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::balance_ledger::BalanceLedger;
use super::clock::SystemClock;
use super::guard::{ConcurrencyGuard, OwnerLock};
use super::qris::QrisGenerator;
use super::traits::{Clock, DurableStore, Notifier};
use super::transaction_store::TransactionStore;
use crate::config::LedgerConfig;
use crate::notify::{self, format_rupiah, Notification};
use crate::types::{
    Amount, BalanceRecord, LedgerError, LedgerStats, OwnerId, TopUpReceipt, Transaction,
    TransactionFilter, TransactionId, TransactionPage,
};

/// Outcome of approving one id inside [`TopUpEngine::approve_many`]
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalResult {
    pub transaction_id: TransactionId,
    pub result: Result<Transaction, LedgerError>,
}

/// Per-id results of a bulk approval, in request order
#[derive(Debug, Clone, PartialEq)]
pub struct BulkApprovalReport {
    pub results: Vec<ApprovalResult>,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct TopUpEngine {
    config: LedgerConfig,
    guard: Arc<ConcurrencyGuard>,
    store: Arc<TransactionStore>,
    ledger: Arc<BalanceLedger>,
    notifier: Arc<dyn Notifier>,
}

impl TopUpEngine {
    /// Create an engine on the wall clock with the merchant's payment template
    pub fn new(
        config: LedgerConfig,
        durable: Arc<dyn DurableStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_clock(config, durable, notifier, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: LedgerConfig,
        durable: Arc<dyn DurableStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(BalanceLedger::new(Arc::clone(&durable), Arc::clone(&clock)));
        let store = Arc::new(TransactionStore::new(
            durable,
            Arc::clone(&ledger),
            QrisGenerator::default(),
            Arc::clone(&clock),
            config.expiry_window,
        ));
        Self {
            guard: Arc::new(ConcurrencyGuard::new(clock)),
            config,
            store,
            ledger,
            notifier,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    /// Rebuild the in-memory transaction table from the durable store
    ///
    /// Call once at startup, before serving requests.
    pub async fn reload(&self) -> Result<usize, LedgerError> {
        self.store.reload().await
    }

    /// Request a top-up of `amount` for `owner`
    ///
    /// The cooldown is checked before waiting for the owner's lock and again
    /// once it is held, so of two concurrent requests inside the cooldown
    /// exactly one succeeds.
    ///
    /// # Returns
    ///
    /// * `Ok(TopUpReceipt)` - The new pending top-up and its payment code
    /// * `Err(LedgerError::Validation)` - Amount outside the configured limits
    /// * `Err(LedgerError::RateLimited)` - The owner requested one too recently
    /// * `Err(LedgerError::Generation)` - The payment code could not be built
    /// * `Err(LedgerError::LockTimeout)` - The owner's lock was not free in time
    pub async fn create_topup(
        &self,
        owner: OwnerId,
        display_name: &str,
        amount: Amount,
    ) -> Result<TopUpReceipt, LedgerError> {
        self.check_amount(amount)?;
        self.guard.check_cooldown(owner, self.config.topup_cooldown)?;

        let lock = self.lock(owner).await?;
        self.guard.check_cooldown(owner, self.config.topup_cooldown)?;
        self.guard.record_action(&lock);

        let tx = match self.store.create(&lock, display_name, amount).await {
            Ok(tx) => tx,
            Err(e) => {
                if let LedgerError::Generation { message } = &e {
                    self.notify(Notification::admin(notify::system_error(
                        owner,
                        "Topup QRIS",
                        &format!("Failed to generate QRIS: {}", message),
                    )));
                }
                return Err(e);
            }
        };
        drop(lock);

        self.notify(Notification::admin(notify::topup_requested(&tx)));
        Ok(TopUpReceipt::from(&tx))
    }

    /// Pending top-ups, oldest first; overdue ones are expired on the way
    pub async fn list_pending_topups(&self) -> Vec<Transaction> {
        self.store.list_pending().await
    }

    /// Confirm a pending top-up and credit the owner
    ///
    /// An admin `note` is appended to the owner's confirmation message.
    ///
    /// # Returns
    ///
    /// * `Ok(Transaction)` - The confirmed transaction
    /// * `Err(LedgerError::NotFound)` - Unknown id
    /// * `Err(LedgerError::AlreadyProcessed)` - Already confirmed or rejected
    /// * `Err(LedgerError::Expired)` - Overdue or already expired
    /// * `Err(LedgerError::CreditFailed)` - Confirmed but not credited; the
    ///   admin is alerted and nothing is retried
    /// * `Err(LedgerError::LockTimeout)` - The owner's lock was not free in time
    pub async fn approve_topup(
        &self,
        id: &str,
        approver: OwnerId,
        note: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let owner = self
            .store
            .owner_of(id)
            .ok_or_else(|| LedgerError::not_found(id))?;
        let lock = self.lock(owner).await?;

        match self.store.confirm(&lock, id, approver).await {
            Ok((tx, _balance)) => {
                drop(lock);
                self.notify(Notification::owner(owner, notify::topup_confirmed(&tx, note)));
                Ok(tx)
            }
            Err(e) => {
                drop(lock);
                if let LedgerError::CreditFailed {
                    transaction_id,
                    amount,
                    message,
                    ..
                } = &e
                {
                    self.notify(Notification::admin(notify::system_error(
                        owner,
                        "Balance Update",
                        &format!(
                            "Failed to add {} for topup {}: {}",
                            format_rupiah(*amount),
                            transaction_id,
                            message
                        ),
                    )));
                }
                Err(e)
            }
        }
    }

    /// Reject a pending top-up; the balance is untouched
    ///
    /// A `reason` is included in the owner's rejection message.
    ///
    /// # Returns
    ///
    /// * `Ok(Transaction)` - The rejected transaction
    /// * `Err(LedgerError::NotFound)` - Unknown id
    /// * `Err(LedgerError::AlreadyProcessed)` - Not pending any more
    /// * `Err(LedgerError::LockTimeout)` - The owner's lock was not free in time
    pub async fn reject_topup(
        &self,
        id: &str,
        approver: OwnerId,
        reason: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        let owner = self
            .store
            .owner_of(id)
            .ok_or_else(|| LedgerError::not_found(id))?;
        let lock = self.lock(owner).await?;
        let tx = self.store.reject(&lock, id, approver).await?;
        drop(lock);

        self.notify(Notification::owner(owner, notify::topup_rejected(&tx, reason)));
        Ok(tx)
    }

    pub async fn get_balance(&self, owner: OwnerId) -> Result<BalanceRecord, LedgerError> {
        self.ledger.get_balance(owner).await
    }

    /// Debit a purchase from the owner's balance under the owner's lock
    ///
    /// # Returns
    ///
    /// * `Ok(BalanceRecord)` - The balance after the debit
    /// * `Err(LedgerError::InsufficientFunds)` - Nothing was debited
    /// * `Err(LedgerError::LockTimeout)` - Nothing was debited; retry later
    pub async fn debit_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
    ) -> Result<BalanceRecord, LedgerError> {
        let _lock = self.lock(owner).await?;
        let record = self.ledger.debit(owner, amount).await?;
        tracing::info!(owner, amount, balance = record.balance, "purchase debited");
        Ok(record)
    }

    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.store.get(id)
    }

    pub fn latest_pending_for(&self, owner: OwnerId) -> Option<Transaction> {
        self.store.latest_pending_for(owner)
    }

    pub fn transactions(&self, filter: &TransactionFilter) -> TransactionPage {
        self.store.query(filter)
    }

    pub fn stats(&self) -> LedgerStats {
        self.store.stats()
    }

    /// Number of transactions whose last change is not yet in the durable store
    pub fn unsynced(&self) -> usize {
        self.store.unsynced()
    }

    /// Number of owners the concurrency guard currently tracks
    pub fn tracked_owners(&self) -> usize {
        self.guard.len()
    }

    /// Approve many top-ups at once
    ///
    /// Ids are grouped by owner. Each owner's ids are approved one after
    /// another in request order while different owners run concurrently.
    /// Every id gets a result and one failure never stops the others. The
    /// `note` goes to every owner whose top-up is confirmed.
    pub async fn approve_many(
        &self,
        ids: Vec<TransactionId>,
        approver: OwnerId,
        note: Option<&str>,
    ) -> BulkApprovalReport {
        let mut slots: Vec<Option<Result<Transaction, LedgerError>>> = vec![None; ids.len()];
        let mut by_owner: HashMap<OwnerId, Vec<(usize, TransactionId)>> = HashMap::new();

        for (index, id) in ids.iter().enumerate() {
            match self.store.owner_of(id) {
                Some(owner) => by_owner.entry(owner).or_default().push((index, id.clone())),
                None => slots[index] = Some(Err(LedgerError::not_found(id))),
            }
        }

        let mut tasks = Vec::with_capacity(by_owner.len());
        for (_owner, batch) in by_owner {
            let engine = self.clone();
            let note = note.map(str::to_owned);
            tasks.push(tokio::spawn(async move {
                let mut results = Vec::with_capacity(batch.len());
                for (index, id) in batch {
                    let result = engine.approve_topup(&id, approver, note.as_deref()).await;
                    results.push((index, result));
                }
                results
            }));
        }

        for task in tasks {
            match task.await {
                Ok(results) => {
                    for (index, result) in results {
                        slots[index] = Some(result);
                    }
                }
                Err(e) => tracing::error!(error = %e, "approval task panicked"),
            }
        }

        let results: Vec<ApprovalResult> = ids
            .into_iter()
            .zip(slots)
            .map(|(transaction_id, slot)| ApprovalResult {
                result: slot
                    .unwrap_or_else(|| Err(LedgerError::storage("approval task aborted"))),
                transaction_id,
            })
            .collect();
        let succeeded = results.iter().filter(|r| r.result.is_ok()).count();

        tracing::info!(succeeded, failed = results.len() - succeeded, approver, "bulk approval finished");
        BulkApprovalReport {
            failed: results.len() - succeeded,
            succeeded,
            results,
        }
    }

    /// Start the periodic guard sweep on the current tokio runtime
    ///
    /// Runs every `sweep_interval` and removes guard entries idle for longer
    /// than `guard_retention`. Abort the handle to stop it.
    pub fn spawn_guard_sweeper(&self) -> JoinHandle<()> {
        let guard = Arc::clone(&self.guard);
        let period = self
            .config
            .sweep_interval
            .max(std::time::Duration::from_millis(1));
        let retention = self.config.guard_retention;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = guard.sweep(retention);
                if removed > 0 {
                    tracing::debug!(removed, remaining = guard.len(), "guard entries swept");
                }
            }
        })
    }

    /// Take the owner's lock, bounded by `lock_timeout` when one is set
    async fn lock(&self, owner: OwnerId) -> Result<OwnerLock, LedgerError> {
        match self.config.lock_timeout {
            Some(timeout) => {
                let lock = self.guard.acquire_timeout(owner, timeout).await;
                if lock.is_err() {
                    tracing::warn!(owner, ?timeout, "timed out waiting for owner lock");
                }
                lock
            }
            None => Ok(self.guard.acquire(owner).await),
        }
    }

    fn check_amount(&self, amount: Amount) -> Result<(), LedgerError> {
        if amount < self.config.min_topup {
            return Err(LedgerError::validation(format!(
                "Minimum top-up is {}",
                format_rupiah(self.config.min_topup)
            )));
        }
        if amount > self.config.max_topup {
            return Err(LedgerError::validation(format!(
                "Maximum top-up is {}",
                format_rupiah(self.config.max_topup)
            )));
        }
        Ok(())
    }

    fn notify(&self, notification: Notification) {
        let recipient = notification.recipient;
        if let Err(e) = self.notifier.dispatch(notification) {
            tracing::warn!(?recipient, error = %e, "notification dispatch failed");
        }
    }
}
