//! Top-up ledger CLI
//!
//! Command-line interface over a ledger data directory.
//!
//! # Usage
//!
//! ```bash
//! topup-ledger topup --owner 42 --name rina --amount 50000
//! topup-ledger pending
//! topup-ledger approve TXN_42_1740823200000 --admin 7
//! topup-ledger --data-dir /var/lib/ledger history --status confirmed --limit 20
//! ```
//!
//! Settings can also come from the environment or a `.env` file
//! (`LEDGER_DATA_DIR`, `LEDGER_WORKERS`, ...). Results are written to stdout
//! as CSV; logs go to stderr and are filtered with `RUST_LOG`.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (invalid operation, unreadable data directory, etc.)

use std::process;
use topup_ledger::cli;
use tracing_subscriber::prelude::*;

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::parse_args();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    let mut output = std::io::stdout();
    if let Err(e) = runtime.block_on(cli::run(args, &mut output)) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
