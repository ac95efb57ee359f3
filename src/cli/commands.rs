//! Subcommand handlers
//!
//! Each [`Command`] variant maps to one engine operation. Results are
//! written as CSV to the given output; errors come back as text for the
//! binary to print.

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use super::args::{CliArgs, Command};
use crate::core::{BulkApprovalReport, TopUpEngine};
use crate::notify::TracingNotifier;
use crate::storage::csv_format::{
    write_balances_csv, write_receipt_csv, write_stats_csv, write_transactions_csv,
};
use crate::storage::CsvJournalStore;
use crate::types::{LedgerError, TransactionFilter};

#[derive(Debug, Serialize)]
struct ApprovalRow<'a> {
    transaction_id: &'a str,
    outcome: &'static str,
    error: String,
}

/// Open the data directory, reload the ledger and run the parsed command
pub async fn run(args: CliArgs, output: &mut dyn Write) -> Result<(), String> {
    let store = Arc::new(open_store(&args.data_dir).await?);
    let engine = TopUpEngine::new(args.to_config(), store.clone(), Arc::new(TracingNotifier));
    engine.reload().await.map_err(|e| e.to_string())?;

    execute(&engine, &store, args.command, output).await
}

async fn open_store(dir: &Path) -> Result<CsvJournalStore, String> {
    CsvJournalStore::open(dir)
        .await
        .map_err(|e| format!("Failed to open data directory '{}': {}", dir.display(), e))
}

/// Run one command against an already loaded engine
pub async fn execute(
    engine: &TopUpEngine,
    store: &CsvJournalStore,
    command: Command,
    output: &mut dyn Write,
) -> Result<(), String> {
    match command {
        Command::Topup {
            owner,
            name,
            amount,
        } => {
            let receipt = engine
                .create_topup(owner, &name, amount)
                .await
                .map_err(describe)?;
            write_receipt_csv(&receipt, output)
        }
        Command::Pending => write_transactions_csv(&engine.list_pending_topups().await, output),
        Command::Approve { id, admin, note } => {
            let tx = engine
                .approve_topup(&id, admin, note.as_deref())
                .await
                .map_err(describe)?;
            write_transactions_csv(&[tx], output)
        }
        Command::ApproveMany { ids, admin, note } => {
            let report = engine.approve_many(ids, admin, note.as_deref()).await;
            write_approvals_csv(&report, output)
        }
        Command::Reject { id, admin, note } => {
            let tx = engine
                .reject_topup(&id, admin, note.as_deref())
                .await
                .map_err(describe)?;
            write_transactions_csv(&[tx], output)
        }
        Command::Balance { owner } => {
            let record = engine.get_balance(owner).await.map_err(describe)?;
            write_balances_csv(&[record], output)
        }
        Command::Debit { owner, amount } => {
            let record = engine
                .debit_balance(owner, amount)
                .await
                .map_err(describe)?;
            write_balances_csv(&[record], output)
        }
        Command::History {
            status,
            owner,
            limit,
            offset,
        } => {
            let filter = TransactionFilter {
                status: status.map(Into::into),
                owner,
                limit,
                offset,
            };
            let page = engine.transactions(&filter);
            tracing::info!(
                total = page.total,
                shown = page.transactions.len(),
                offset = filter.offset,
                "history page"
            );
            write_transactions_csv(&page.transactions, output)
        }
        Command::Stats => write_stats_csv(&engine.stats(), output),
        Command::Compact => {
            let rows = store.compact().await.map_err(describe)?;
            writeln!(output, "rows\n{}", rows).map_err(|e| format!("Failed to write output: {}", e))
        }
    }
}

fn describe(error: LedgerError) -> String {
    error.to_string()
}

/// Write one row per requested id: `transaction_id,outcome,error`
fn write_approvals_csv(report: &BulkApprovalReport, output: &mut dyn Write) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    for approval in &report.results {
        let (outcome, error) = match &approval.result {
            Ok(_) => ("confirmed", String::new()),
            Err(e) => ("failed", e.to_string()),
        };
        writer
            .serialize(ApprovalRow {
                transaction_id: &approval.transaction_id,
                outcome,
                error,
            })
            .map_err(|e| format!("Failed to write approval record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}
