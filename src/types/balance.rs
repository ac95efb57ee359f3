//! Balance-related types for the top-up ledger
//!
//! This module defines the per-owner balance record and the outcome of a
//! conditional debit against it.

use super::transaction::{Amount, OwnerId};
use chrono::{DateTime, Utc};

/// Spendable balance of one owner
///
/// The durable store holds the authoritative copy. The balance only moves
/// through atomic credit and debit operations and never goes negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecord {
    /// The owner this balance belongs to
    pub owner: OwnerId,

    /// Spendable amount in the smallest currency unit
    pub balance: Amount,

    /// Time of the last credit or debit (or creation)
    pub updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    /// Create a new record with zero balance
    ///
    /// # Arguments
    ///
    /// * `owner` - The owner id for this record
    /// * `now` - Creation time, stored as `updated_at`
    pub fn new(owner: OwnerId, now: DateTime<Utc>) -> Self {
        BalanceRecord {
            owner,
            balance: 0,
            updated_at: now,
        }
    }
}

/// Result of a compare-and-decrement against a balance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebitOutcome {
    /// The debit was applied; carries the record after the decrement
    Applied(BalanceRecord),

    /// The balance was lower than the requested amount; nothing changed
    Insufficient {
        /// Balance observed at the time of the refused debit
        balance: Amount,
    },
}
