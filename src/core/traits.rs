//! Core traits for durable storage, notification dispatch and time
//!
//! These are the seams between the ledger and its collaborators. The
//! engine only ever talks to `dyn DurableStore`, `dyn Notifier` and
//! `dyn Clock`, so backends can be swapped without touching the
//! lifecycle logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

use crate::notify::Notification;
use crate::types::{Amount, BalanceRecord, DebitOutcome, LedgerError, OwnerId, Transaction};

/// Durable backing store for transactions and balances
///
/// Transactions are mirrored here by the in-memory `TransactionStore` and
/// read back on startup. Balances live only here; the two balance mutations
/// must be atomic per owner without any help from the caller.
#[async_trait]
pub trait DurableStore: Send + Sync + Debug {
    /// Insert or replace the mirrored copy of a transaction
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError>;

    /// Every mirrored transaction, in no particular order
    async fn load_transactions(&self) -> Result<Vec<Transaction>, LedgerError>;

    /// Look up a balance without creating it
    async fn find_balance(&self, owner: OwnerId) -> Result<Option<BalanceRecord>, LedgerError>;

    /// Return the owner's balance, creating a zero record if missing
    async fn get_or_create_balance(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError>;

    /// Atomically add `amount` to the owner's balance (upsert)
    async fn increment_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError>;

    /// Atomically subtract `amount` only if the balance covers it
    ///
    /// Equivalent to `UPDATE ... SET balance = balance - amount WHERE
    /// balance >= amount`; zero rows affected yields
    /// [`DebitOutcome::Insufficient`].
    async fn decrement_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<DebitOutcome, LedgerError>;

    /// Every stored balance, in no particular order
    async fn load_balances(&self) -> Result<Vec<BalanceRecord>, LedgerError>;
}

/// Outbound notification dispatch
///
/// Dispatch is fire-and-forget: implementations must not block the caller,
/// and the engine only logs a returned error.
pub trait Notifier: Send + Sync + Debug {
    fn dispatch(&self, notification: Notification) -> Result<(), String>;
}

/// Source of the current time
///
/// Expiry and cooldown checks read the time through this trait so tests can
/// move time deterministically.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}
