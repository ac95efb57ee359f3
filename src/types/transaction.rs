//! Transaction-related types for the top-up ledger
//!
//! This module defines top-up transactions, their lifecycle status, and the
//! receipt handed back to callers when a top-up is created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Owner identifier
///
/// The chat id of the user owning a balance and its top-ups.
pub type OwnerId = i64;

/// Transaction identifier
///
/// Formatted as `TXN_<owner>_<millis>`; see `TransactionStore::next_id`.
pub type TransactionId = String;

/// Money amount in the smallest currency unit
pub type Amount = i64;

/// Lifecycle status of a top-up transaction
///
/// `Pending` is the only initial state. The other three are terminal: once
/// a transaction leaves `Pending` it never changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Awaiting admin confirmation or rejection
    Pending,

    /// Confirmed by an admin; the owner's balance was credited
    Confirmed,

    /// Rejected by an admin; no balance change
    Rejected,

    /// Expiry window elapsed before anyone acted on it
    Expired,
}

impl TransactionStatus {
    /// Whether no further transition may leave this status
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Confirmed => "confirmed",
            TransactionStatus::Rejected => "rejected",
            TransactionStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "confirmed" => Ok(TransactionStatus::Confirmed),
            "rejected" => Ok(TransactionStatus::Rejected),
            "expired" => Ok(TransactionStatus::Expired),
            other => Err(format!("Invalid transaction status: '{}'", other)),
        }
    }
}

/// One top-up attempt
///
/// The amount and payment code are fixed at creation. Only `status`,
/// `approved_by` and `approved_at` are ever written afterwards, and only
/// during the single transition out of `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Unique identifier, embeds the owner id
    pub id: TransactionId,

    /// Owner whose balance is credited on confirmation
    pub owner: OwnerId,

    /// Display name captured at creation (for operators)
    pub display_name: String,

    /// Requested amount in the smallest currency unit
    pub amount: Amount,

    /// Current lifecycle status
    pub status: TransactionStatus,

    /// Dynamic QRIS payload the owner pays against
    pub payment_code: String,

    pub created_at: DateTime<Utc>,

    /// `created_at` plus the configured expiry window
    pub expires_at: DateTime<Utc>,

    /// Admin who confirmed or rejected the transaction
    pub approved_by: Option<OwnerId>,

    /// When the transaction was confirmed or rejected
    pub approved_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Whether the expiry window has elapsed at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }
}

/// What the caller receives after a successful top-up request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUpReceipt {
    pub transaction_id: TransactionId,
    pub payment_code: String,
    pub amount: Amount,
    pub expires_at: DateTime<Utc>,
}

impl From<&Transaction> for TopUpReceipt {
    fn from(tx: &Transaction) -> Self {
        TopUpReceipt {
            transaction_id: tx.id.clone(),
            payment_code: tx.payment_code.clone(),
            amount: tx.amount,
            expires_at: tx.expires_at,
        }
    }
}

/// Filter for admin history listings
///
/// Results are ordered newest first, then paginated with `offset`/`limit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub owner: Option<OwnerId>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            status: None,
            owner: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.status.map_or(true, |status| tx.status == status)
            && self.owner.map_or(true, |owner| tx.owner == owner)
    }
}

/// One page of a history listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    /// Number of transactions matching the filter across all pages
    pub total: usize,
}

/// Aggregate counters over every known transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub rejected: usize,
    pub expired: usize,
    /// Distinct owners that ever requested a top-up
    pub owners: usize,
    /// Sum of confirmed amounts
    pub confirmed_amount: Amount,
    /// Mean confirmed amount, zero when nothing was confirmed
    pub average_confirmed: Amount,
}
