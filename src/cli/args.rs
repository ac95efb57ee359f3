use crate::config::LedgerConfig;
use crate::types::{Amount, OwnerId, TransactionStatus};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Manage QRIS top-ups and balances in a ledger data directory
#[derive(Parser, Debug)]
#[command(name = "topup-ledger")]
#[command(about = "Manage QRIS top-ups and balances in a ledger data directory", long_about = None)]
pub struct CliArgs {
    /// Directory holding the transaction and balance journals
    #[arg(
        long = "data-dir",
        env = "LEDGER_DATA_DIR",
        value_name = "DIR",
        default_value = "ledger-data"
    )]
    pub data_dir: PathBuf,

    /// Number of tokio worker threads
    #[arg(
        long = "workers",
        env = "LEDGER_WORKERS",
        value_name = "COUNT",
        help = "Number of runtime worker threads (default: CPU cores)"
    )]
    pub workers: Option<usize>,

    /// Seconds an owner must wait between two top-up requests
    #[arg(long = "cooldown-secs", env = "LEDGER_TOPUP_COOLDOWN_SECS", value_name = "SECS")]
    pub cooldown_secs: Option<u64>,

    /// Minutes a pending top-up stays confirmable
    #[arg(long = "expiry-mins", env = "LEDGER_EXPIRY_MINUTES", value_name = "MINUTES")]
    pub expiry_mins: Option<u64>,

    /// Smallest accepted top-up amount
    #[arg(long = "min-topup", env = "LEDGER_MIN_TOPUP", value_name = "AMOUNT")]
    pub min_topup: Option<Amount>,

    /// Largest accepted top-up amount
    #[arg(long = "max-topup", env = "LEDGER_MAX_TOPUP", value_name = "AMOUNT")]
    pub max_topup: Option<Amount>,

    /// Milliseconds to wait for a busy owner before giving up
    #[arg(long = "lock-timeout-ms", env = "LEDGER_LOCK_TIMEOUT_MS", value_name = "MILLIS")]
    pub lock_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

/// Ledger operations, one per subcommand
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request a top-up and print its receipt
    Topup {
        #[arg(long, allow_negative_numbers = true)]
        owner: OwnerId,
        /// Display name shown to the admin
        #[arg(long)]
        name: String,
        #[arg(long)]
        amount: Amount,
    },

    /// List pending top-ups (expires overdue ones)
    Pending,

    /// Confirm a pending top-up and credit the owner
    Approve {
        id: String,
        #[arg(long, allow_negative_numbers = true)]
        admin: OwnerId,
        /// Note appended to the owner's confirmation message
        #[arg(long)]
        note: Option<String>,
    },

    /// Confirm several top-ups at once
    ApproveMany {
        #[arg(required = true)]
        ids: Vec<String>,
        #[arg(long, allow_negative_numbers = true)]
        admin: OwnerId,
        #[arg(long)]
        note: Option<String>,
    },

    /// Reject a pending top-up
    Reject {
        id: String,
        #[arg(long, allow_negative_numbers = true)]
        admin: OwnerId,
        /// Reason shown to the owner
        #[arg(long)]
        note: Option<String>,
    },

    /// Print an owner's balance
    Balance {
        #[arg(allow_negative_numbers = true)]
        owner: OwnerId,
    },

    /// Debit a purchase from an owner's balance
    Debit {
        #[arg(long, allow_negative_numbers = true)]
        owner: OwnerId,
        #[arg(long)]
        amount: Amount,
    },

    /// List transactions, newest first
    History {
        #[arg(long)]
        status: Option<StatusArg>,
        #[arg(long, allow_negative_numbers = true)]
        owner: Option<OwnerId>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print transaction statistics
    Stats,

    /// Rewrite the journals to one row per key
    Compact,
}

/// Transaction status filter for `history`
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Confirmed,
    Rejected,
    Expired,
}

impl From<StatusArg> for TransactionStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => TransactionStatus::Pending,
            StatusArg::Confirmed => TransactionStatus::Confirmed,
            StatusArg::Rejected => TransactionStatus::Rejected,
            StatusArg::Expired => TransactionStatus::Expired,
        }
    }
}

impl CliArgs {
    /// Create a LedgerConfig from CLI arguments
    ///
    /// Missing values fall back to the defaults; invalid ones are replaced
    /// with a warning by [`LedgerConfig::new`].
    pub fn to_config(&self) -> LedgerConfig {
        let config = self.limits_config();
        match self.lock_timeout_ms {
            Some(millis) => config.with_lock_timeout(Duration::from_millis(millis)),
            None => config,
        }
    }

    fn limits_config(&self) -> LedgerConfig {
        let default = LedgerConfig::default();
        if self.cooldown_secs.is_none()
            && self.expiry_mins.is_none()
            && self.min_topup.is_none()
            && self.max_topup.is_none()
        {
            return default;
        }

        LedgerConfig::new(
            self.cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(default.topup_cooldown),
            self.expiry_mins
                .map(|mins| Duration::from_secs(mins.saturating_mul(60)))
                .unwrap_or(default.expiry_window),
            self.min_topup.unwrap_or(default.min_topup),
            self.max_topup.unwrap_or(default.max_topup),
        )
    }

    /// Worker thread count, falling back to the CPU count for missing or zero values
    pub fn worker_threads(&self) -> usize {
        match self.workers {
            Some(0) => {
                tracing::warn!(default = num_cpus::get(), "invalid workers (0), using default");
                num_cpus::get()
            }
            Some(workers) => workers,
            None => num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::topup(
        &["program", "topup", "--owner", "42", "--name", "rina", "--amount", "50000"],
        Command::Topup { owner: 42, name: "rina".to_string(), amount: 50_000 }
    )]
    #[case::group_owner(
        &["program", "balance", "-1001234"],
        Command::Balance { owner: -1_001_234 }
    )]
    #[case::approve(
        &["program", "approve", "TXN_42_1", "--admin", "7"],
        Command::Approve { id: "TXN_42_1".to_string(), admin: 7, note: None }
    )]
    #[case::approve_with_note(
        &["program", "approve", "TXN_42_1", "--admin", "7", "--note", "paid via BCA"],
        Command::Approve { id: "TXN_42_1".to_string(), admin: 7, note: Some("paid via BCA".to_string()) }
    )]
    #[case::reject_with_reason(
        &["program", "reject", "TXN_42_1", "--admin", "7", "--note", "no transfer"],
        Command::Reject { id: "TXN_42_1".to_string(), admin: 7, note: Some("no transfer".to_string()) }
    )]
    #[case::approve_many(
        &["program", "approve-many", "TXN_1_1", "TXN_2_1", "--admin", "7"],
        Command::ApproveMany {
            ids: vec!["TXN_1_1".to_string(), "TXN_2_1".to_string()],
            admin: 7,
            note: None,
        }
    )]
    #[case::approve_many_with_note(
        &["program", "approve-many", "TXN_1_1", "--note", "batch", "--admin", "7"],
        Command::ApproveMany { ids: vec!["TXN_1_1".to_string()], admin: 7, note: Some("batch".to_string()) }
    )]
    #[case::history_defaults(
        &["program", "history"],
        Command::History { status: None, owner: None, limit: 50, offset: 0 }
    )]
    #[case::history_filtered(
        &["program", "history", "--status", "confirmed", "--owner", "3", "--limit", "5", "--offset", "10"],
        Command::History { status: Some(StatusArg::Confirmed), owner: Some(3), limit: 5, offset: 10 }
    )]
    #[case::pending(&["program", "pending"], Command::Pending)]
    #[case::compact(&["program", "compact"], Command::Compact)]
    fn test_subcommand_parsing(#[case] args: &[&str], #[case] expected: Command) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.command, expected);
    }

    #[rstest]
    #[case::all_defaults(&["program", "stats"], LedgerConfig::default())]
    #[case::custom_cooldown(
        &["program", "--cooldown-secs", "5", "stats"],
        LedgerConfig { topup_cooldown: Duration::from_secs(5), ..LedgerConfig::default() }
    )]
    #[case::custom_limits(
        &["program", "--expiry-mins", "10", "--min-topup", "5000", "--max-topup", "200000", "stats"],
        LedgerConfig {
            expiry_window: Duration::from_secs(600),
            min_topup: 5_000,
            max_topup: 200_000,
            ..LedgerConfig::default()
        }
    )]
    #[case::zero_expiry_falls_back(&["program", "--expiry-mins", "0", "stats"], LedgerConfig::default())]
    #[case::lock_timeout(
        &["program", "--lock-timeout-ms", "1500", "stats"],
        LedgerConfig { lock_timeout: Some(Duration::from_millis(1500)), ..LedgerConfig::default() }
    )]
    #[case::lock_timeout_with_limits(
        &["program", "--lock-timeout-ms", "200", "--min-topup", "5000", "stats"],
        LedgerConfig {
            min_topup: 5_000,
            lock_timeout: Some(Duration::from_millis(200)),
            ..LedgerConfig::default()
        }
    )]
    #[case::zero_lock_timeout_ignored(&["program", "--lock-timeout-ms", "0", "stats"], LedgerConfig::default())]
    fn test_config_conversion(#[case] args: &[&str], #[case] expected: LedgerConfig) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.to_config(), expected);
    }

    #[rstest]
    #[case::explicit(&["program", "--workers", "3", "stats"], 3)]
    #[case::zero_falls_back(&["program", "--workers", "0", "stats"], num_cpus::get())]
    fn test_worker_threads(#[case] args: &[&str], #[case] expected: usize) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.worker_threads(), expected);
    }

    #[rstest]
    #[case::missing_subcommand(&["program"])]
    #[case::approve_many_without_ids(&["program", "approve-many", "--admin", "7"])]
    #[case::invalid_status(&["program", "history", "--status", "completed"])]
    #[case::non_numeric_amount(&["program", "debit", "--owner", "1", "--amount", "lots"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
