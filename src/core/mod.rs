//! Core business logic module
//!
//! This module contains the ledger components, leaves first:
//! - `traits` - Seams for storage, notification and time
//! - `clock` - Wall clock and a manual clock for tests
//! - `qris` - Dynamic payment code generation
//! - `guard` - Per-owner locks and cooldowns
//! - `balance_ledger` - Atomic balance credit and debit
//! - `transaction_store` - In-memory top-up table mirrored to durable storage
//! - `engine` - Top-up lifecycle orchestration

pub mod balance_ledger;
pub mod clock;
pub mod engine;
pub mod guard;
pub mod qris;
pub mod traits;
pub mod transaction_store;

pub use balance_ledger::BalanceLedger;
pub use clock::{ManualClock, SystemClock};
pub use engine::{ApprovalResult, BulkApprovalReport, TopUpEngine};
pub use guard::{ConcurrencyGuard, OwnerLock};
pub use qris::{crc16_ccitt_false, QrisGenerator, STATIC_QRIS};
pub use traits::{Clock, DurableStore, Notifier};
pub use transaction_store::TransactionStore;
