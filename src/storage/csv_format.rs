//! CSV format handling for ledger rows and reports
//!
//! This module centralizes all CSV format concerns, providing:
//! - Row structures shared by the journals and the CLI reports
//! - Conversion between rows and domain types
//! - Report writers for transactions, balances and statistics
//!
//! All functions are pure (no file I/O) for easy testing.

use crate::types::{
    Amount, BalanceRecord, LedgerError, LedgerStats, OwnerId, TopUpReceipt, Transaction,
    TransactionStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

pub const TRANSACTION_HEADERS: [&str; 10] = [
    "id",
    "owner",
    "display_name",
    "amount",
    "status",
    "payment_code",
    "created_at",
    "expires_at",
    "approved_by",
    "approved_at",
];

pub const BALANCE_HEADERS: [&str; 3] = ["owner", "balance", "updated_at"];

/// One transaction row (journal line or report line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: String,
    pub owner: OwnerId,
    pub display_name: String,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub payment_code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub approved_by: Option<OwnerId>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl From<&Transaction> for TransactionRow {
    fn from(tx: &Transaction) -> Self {
        TransactionRow {
            id: tx.id.clone(),
            owner: tx.owner,
            display_name: tx.display_name.clone(),
            amount: tx.amount,
            status: tx.status,
            payment_code: tx.payment_code.clone(),
            created_at: tx.created_at,
            expires_at: tx.expires_at,
            approved_by: tx.approved_by,
            approved_at: tx.approved_at,
        }
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = String;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        if row.id.trim().is_empty() {
            return Err("transaction row without id".to_string());
        }
        if row.amount <= 0 {
            return Err(format!(
                "Invalid amount {} for transaction {}",
                row.amount, row.id
            ));
        }
        Ok(Transaction {
            id: row.id,
            owner: row.owner,
            display_name: row.display_name,
            amount: row.amount,
            status: row.status,
            payment_code: row.payment_code,
            created_at: row.created_at,
            expires_at: row.expires_at,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
        })
    }
}

/// One balance row (journal line or report line)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub owner: OwnerId,
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
}

impl From<&BalanceRecord> for BalanceRow {
    fn from(record: &BalanceRecord) -> Self {
        BalanceRow {
            owner: record.owner,
            balance: record.balance,
            updated_at: record.updated_at,
        }
    }
}

impl TryFrom<BalanceRow> for BalanceRecord {
    type Error = String;

    fn try_from(row: BalanceRow) -> Result<Self, Self::Error> {
        if row.balance < 0 {
            return Err(format!(
                "Negative balance {} for owner {}",
                row.balance, row.owner
            ));
        }
        Ok(BalanceRecord {
            owner: row.owner,
            balance: row.balance,
            updated_at: row.updated_at,
        })
    }
}

/// Serialize a single row as one CSV line without a header
pub fn encode_row<T: Serialize>(row: &T) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(row)?;
    writer
        .into_inner()
        .map_err(|e| LedgerError::storage(format!("Failed to encode row: {}", e)))
}

/// Encode a header line
pub fn encode_header(headers: &[&str]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(headers)?;
    writer
        .into_inner()
        .map_err(|e| LedgerError::storage(format!("Failed to encode header: {}", e)))
}

/// Write transactions as CSV, in the order given
pub fn write_transactions_csv(
    transactions: &[Transaction],
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    for tx in transactions {
        writer
            .serialize(TransactionRow::from(tx))
            .map_err(|e| format!("Failed to write transaction record: {}", e))?;
    }
    if transactions.is_empty() {
        writer
            .write_record(TRANSACTION_HEADERS)
            .map_err(|e| format!("Failed to write CSV header: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write balances as CSV, sorted by owner for deterministic output
pub fn write_balances_csv(balances: &[BalanceRecord], output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(BALANCE_HEADERS)
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted = balances.to_vec();
    sorted.sort_by_key(|record| record.owner);

    for record in sorted {
        writer
            .write_record(&[
                record.owner.to_string(),
                record.balance.to_string(),
                record.updated_at.to_rfc3339(),
            ])
            .map_err(|e| format!("Failed to write balance record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write a top-up receipt as a single CSV record with header
pub fn write_receipt_csv(receipt: &TopUpReceipt, output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);
    writer
        .serialize(receipt)
        .map_err(|e| format!("Failed to write receipt: {}", e))?;
    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write ledger statistics as a single CSV record with header
pub fn write_stats_csv(stats: &LedgerStats, output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);
    writer
        .serialize(stats)
        .map_err(|e| format!("Failed to write stats: {}", e))?;
    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}
