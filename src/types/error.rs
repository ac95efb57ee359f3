//! Error types for the top-up ledger
//!
//! This module defines every error a ledger operation can return. Operators
//! see the `Display` text (the raw taxonomy); end users get the friendlier
//! [`LedgerError::user_message`].
//!
//! # Error Categories
//!
//! - **Caller errors**: invalid amounts or ids, not retryable
//! - **Throttling**: cooldown still active, retry after the indicated delay
//! - **State-machine violations**: unknown, already processed or expired top-ups
//! - **Funds**: a debit refused because the balance is too low
//! - **Storage**: the durable store failed
//! - **Reconciliation**: a confirmed top-up whose balance credit failed

use super::transaction::{Amount, OwnerId, TransactionStatus};
use thiserror::Error;

/// Main error type for the ledger engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Malformed input from the caller (bad amount, lock held for the wrong owner)
    #[error("Validation error: {message}")]
    Validation {
        /// Description of what was rejected
        message: String,
    },

    /// The owner acted too recently; retry after `remaining_secs`
    #[error("Owner {owner} is rate limited, retry in {remaining_secs}s")]
    RateLimited {
        owner: OwnerId,
        /// Whole seconds until the cooldown ends (rounded up)
        remaining_secs: u64,
    },

    /// Waiting for an owner's guard lock exceeded the caller's deadline
    ///
    /// The operation did not run; the caller may retry.
    #[error("Timed out waiting for the lock of owner {owner}")]
    LockTimeout { owner: OwnerId },

    /// The static merchant template cannot be turned into a dynamic payload
    ///
    /// Indicates a corrupted template constant.
    #[error("Malformed payment template: {reason}")]
    MalformedTemplate { reason: String },

    /// Payment code generation failed while creating a top-up
    #[error("Failed to generate payment code: {message}")]
    Generation { message: String },

    /// No transaction with this id
    #[error("Transaction {transaction_id} not found")]
    NotFound { transaction_id: String },

    /// The transaction already left `pending`
    #[error("Transaction {transaction_id} was already processed ({status})")]
    AlreadyProcessed {
        transaction_id: String,
        /// The terminal status the transaction is in
        status: TransactionStatus,
    },

    /// The expiry window elapsed before the confirmation
    #[error("Transaction {transaction_id} has expired")]
    Expired { transaction_id: String },

    /// A debit was refused in full because the balance is lower than requested
    #[error("Insufficient funds for owner {owner}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        owner: OwnerId,
        balance: Amount,
        requested: Amount,
    },

    /// The durable store failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// The transaction is confirmed but the balance credit failed
    ///
    /// Needs manual reconciliation; retrying the credit blindly risks
    /// crediting twice.
    #[error("Transaction {transaction_id} confirmed but crediting {amount} to owner {owner} failed: {message}")]
    CreditFailed {
        transaction_id: String,
        owner: OwnerId,
        amount: Amount,
        message: String,
    },
}

impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::storage(error.to_string())
    }
}

impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        LedgerError::storage(error.to_string())
    }
}

impl From<csv_async::Error> for LedgerError {
    fn from(error: csv_async::Error) -> Self {
        LedgerError::storage(error.to_string())
    }
}

// Helper functions for creating common errors

impl LedgerError {
    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation {
            message: message.into(),
        }
    }

    pub fn rate_limited(owner: OwnerId, remaining_secs: u64) -> Self {
        LedgerError::RateLimited {
            owner,
            remaining_secs,
        }
    }

    pub fn malformed_template(reason: impl Into<String>) -> Self {
        LedgerError::MalformedTemplate {
            reason: reason.into(),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        LedgerError::Generation {
            message: message.into(),
        }
    }

    pub fn not_found(transaction_id: &str) -> Self {
        LedgerError::NotFound {
            transaction_id: transaction_id.to_string(),
        }
    }

    pub fn already_processed(transaction_id: &str, status: TransactionStatus) -> Self {
        LedgerError::AlreadyProcessed {
            transaction_id: transaction_id.to_string(),
            status,
        }
    }

    pub fn expired(transaction_id: &str) -> Self {
        LedgerError::Expired {
            transaction_id: transaction_id.to_string(),
        }
    }

    pub fn insufficient_funds(owner: OwnerId, balance: Amount, requested: Amount) -> Self {
        LedgerError::InsufficientFunds {
            owner,
            balance,
            requested,
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
        }
    }

    pub fn credit_failed(
        transaction_id: &str,
        owner: OwnerId,
        amount: Amount,
        message: impl Into<String>,
    ) -> Self {
        LedgerError::CreditFailed {
            transaction_id: transaction_id.to_string(),
            owner,
            amount,
            message: message.into(),
        }
    }

    /// Whether the same call may succeed if repeated later
    ///
    /// `CreditFailed` is deliberately not retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::RateLimited { .. }
                | LedgerError::LockTimeout { .. }
                | LedgerError::Storage { .. }
        )
    }

    /// Message suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::Validation { message } => message.clone(),
            LedgerError::RateLimited { remaining_secs, .. } => format!(
                "Please wait {} seconds before making another transaction.",
                remaining_secs
            ),
            LedgerError::InsufficientFunds { .. } => {
                "Your balance is not sufficient for this purchase.".to_string()
            }
            LedgerError::NotFound { .. } => "Transaction not found.".to_string(),
            LedgerError::AlreadyProcessed { .. } => {
                "This transaction was already processed.".to_string()
            }
            LedgerError::Expired { .. } => "This transaction has expired.".to_string(),
            LedgerError::LockTimeout { .. }
            | LedgerError::MalformedTemplate { .. }
            | LedgerError::Generation { .. }
            | LedgerError::Storage { .. }
            | LedgerError::CreditFailed { .. } => {
                "A system error occurred, please try again later.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::validation(
        LedgerError::Validation { message: "Minimum top-up is Rp 10.000".to_string() },
        "Validation error: Minimum top-up is Rp 10.000"
    )]
    #[case::rate_limited(
        LedgerError::RateLimited { owner: 42, remaining_secs: 12 },
        "Owner 42 is rate limited, retry in 12s"
    )]
    #[case::lock_timeout(
        LedgerError::LockTimeout { owner: 42 },
        "Timed out waiting for the lock of owner 42"
    )]
    #[case::not_found(
        LedgerError::NotFound { transaction_id: "TXN_1_2".to_string() },
        "Transaction TXN_1_2 not found"
    )]
    #[case::already_processed(
        LedgerError::AlreadyProcessed { transaction_id: "TXN_1_2".to_string(), status: TransactionStatus::Rejected },
        "Transaction TXN_1_2 was already processed (rejected)"
    )]
    #[case::expired(
        LedgerError::Expired { transaction_id: "TXN_1_2".to_string() },
        "Transaction TXN_1_2 has expired"
    )]
    #[case::insufficient_funds(
        LedgerError::InsufficientFunds { owner: 1, balance: 5000, requested: 10000 },
        "Insufficient funds for owner 1: balance 5000, requested 10000"
    )]
    #[case::credit_failed(
        LedgerError::CreditFailed { transaction_id: "TXN_1_2".to_string(), owner: 1, amount: 50000, message: "disk full".to_string() },
        "Transaction TXN_1_2 confirmed but crediting 50000 to owner 1 failed: disk full"
    )]
    fn test_error_display(#[case] error: LedgerError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::rate_limited(
        LedgerError::rate_limited(42, 3),
        LedgerError::RateLimited { owner: 42, remaining_secs: 3 }
    )]
    #[case::not_found(
        LedgerError::not_found("TXN_9_9"),
        LedgerError::NotFound { transaction_id: "TXN_9_9".to_string() }
    )]
    #[case::already_processed(
        LedgerError::already_processed("TXN_9_9", TransactionStatus::Confirmed),
        LedgerError::AlreadyProcessed { transaction_id: "TXN_9_9".to_string(), status: TransactionStatus::Confirmed }
    )]
    #[case::insufficient_funds(
        LedgerError::insufficient_funds(1, 0, 100),
        LedgerError::InsufficientFunds { owner: 1, balance: 0, requested: 100 }
    )]
    fn test_helper_functions(#[case] result: LedgerError, #[case] expected: LedgerError) {
        assert_eq!(result, expected);
    }

    #[rstest]
    #[case(LedgerError::rate_limited(1, 5), true)]
    #[case(LedgerError::LockTimeout { owner: 1 }, true)]
    #[case(LedgerError::storage("connection reset"), true)]
    #[case(LedgerError::expired("TXN_1_1"), false)]
    #[case(LedgerError::credit_failed("TXN_1_1", 1, 10, "boom"), false)]
    #[case(LedgerError::validation("bad amount"), false)]
    fn test_retryable_classification(#[case] error: LedgerError, #[case] retryable: bool) {
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_user_message_hides_internal_details() {
        let error = LedgerError::credit_failed("TXN_1_1", 1, 10, "disk full");
        assert!(!error.user_message().contains("disk full"));

        let error = LedgerError::rate_limited(1, 7);
        assert_eq!(
            error.user_message(),
            "Please wait 7 seconds before making another transaction."
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied");
        let error: LedgerError = io_error.into();
        assert!(matches!(error, LedgerError::Storage { .. }));
        assert_eq!(error.to_string(), "Storage error: Permission denied");
    }
}
