//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! This module organizes types into logical submodules:
//! - `transaction`: Top-up transactions, statuses and identifiers
//! - `balance`: Per-owner balance records
//! - `error`: Error types for the ledger engine

pub mod balance;
pub mod error;
pub mod transaction;

pub use balance::{BalanceRecord, DebitOutcome};
pub use error::LedgerError;
pub use transaction::{
    Amount, LedgerStats, OwnerId, TopUpReceipt, Transaction, TransactionFilter, TransactionId,
    TransactionPage, TransactionStatus,
};
