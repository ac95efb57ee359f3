//! Top-up Ledger Library
//! # Overview
//!
//! This library implements the transaction and balance ledger behind a chat
//! storefront: owners top up a balance by paying a dynamic QRIS code, an
//! admin confirms or rejects each top-up, and purchases are debited from the
//! balance.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (Transaction, BalanceRecord, LedgerError)
//! - [`core`] - Business logic components:
//!   - [`core::qris`] - Dynamic payment code generation
//!   - [`core::guard`] - Per-owner locks and cooldowns
//!   - [`core::transaction_store`] - In-memory top-ups mirrored to durable storage
//!   - [`core::balance_ledger`] - Atomic balance credit and debit
//!   - [`core::engine`] - Top-up lifecycle orchestration
//! - [`storage`] - Durable store backends (in-memory, CSV journals)
//! - [`notify`] - Owner and admin notifications
//! - [`config`] - Time windows and amount limits
//! - [`cli`] - CLI arguments parsing and subcommands
//!
//! # Top-up Lifecycle
//!
//! - **pending**: created with a payment code, waiting for the admin
//! - **confirmed**: approved before expiry; the amount is credited
//! - **rejected**: refused by the admin; no balance change
//! - **expired**: the expiry window passed before anyone acted
//!
//! Expiry is lazy: it is applied when pending top-ups are listed or when a
//! confirmation arrives too late.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod notify;
pub mod storage;
pub mod types;

pub use crate::config::LedgerConfig;
pub use crate::core::{
    BalanceLedger, Clock, ConcurrencyGuard, DurableStore, ManualClock, Notifier, QrisGenerator,
    SystemClock, TopUpEngine, TransactionStore,
};
pub use notify::{ChannelNotifier, Notification, Recipient, TracingNotifier};
pub use storage::{CsvJournalStore, MemoryStore};
pub use types::{
    Amount, BalanceRecord, LedgerError, LedgerStats, OwnerId, TopUpReceipt, Transaction,
    TransactionFilter, TransactionId, TransactionPage, TransactionStatus,
};
