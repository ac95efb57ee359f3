//! Append-only CSV journal store
//!
//! `CsvJournalStore` keeps its working state in a [`MemoryStore`] and makes
//! every change durable by appending one CSV row to a journal file in the
//! data directory:
//!
//! ```text
//! <data_dir>/transactions.csv   one row per transaction change
//! <data_dir>/balances.csv       one row per balance change
//! ```
//!
//! On open, both journals are streamed back with csv-async and replayed in
//! order. For balances the last row per owner wins; for transactions the
//! last row wins too, except that a `pending` row never replaces a terminal
//! one. Rows that fail to parse (for example a line torn by a crash) are
//! logged and skipped.
//!
//! # Write ordering
//!
//! Each journal sits behind an async mutex that is held across the append
//! and the in-memory update, so journal order always equals the order in
//! which changes became visible. A balance change is appended before it is
//! applied in memory; if the append fails the balance is unchanged.
//!
//! [`CsvJournalStore::compact`] rewrites both journals down to one row per
//! key.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv_async::AsyncReaderBuilder;
use futures::stream::StreamExt;
use serde::de::DeserializeOwned;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::compat::TokioAsyncReadCompatExt;

use super::csv_format::{
    encode_header, encode_row, BalanceRow, TransactionRow, BALANCE_HEADERS, TRANSACTION_HEADERS,
};
use super::memory::MemoryStore;
use crate::core::traits::DurableStore;
use crate::types::{
    Amount, BalanceRecord, DebitOutcome, LedgerError, OwnerId, Transaction,
};

pub const TRANSACTIONS_FILE: &str = "transactions.csv";
pub const BALANCES_FILE: &str = "balances.csv";

/// One append-only journal file
#[derive(Debug)]
struct Journal {
    path: PathBuf,
    headers: &'static [&'static str],
    file: File,
}

impl Journal {
    async fn open(path: PathBuf, headers: &'static [&'static str]) -> Result<Self, LedgerError> {
        let needs_newline = ends_without_newline(&path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if file.metadata().await?.len() == 0 {
            file.write_all(&encode_header(headers)?).await?;
            file.flush().await?;
        } else if needs_newline {
            // Terminate a torn last line so the next row starts cleanly
            file.write_all(b"\n").await?;
            file.flush().await?;
        }

        Ok(Self {
            path,
            headers,
            file,
        })
    }

    async fn append(&mut self, line: &[u8]) -> Result<(), LedgerError> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Replace the journal with `rows`, atomically via a temp file and rename
    async fn rewrite(&mut self, rows: Vec<Vec<u8>>) -> Result<(), LedgerError> {
        let tmp_path = self.path.with_extension("csv.tmp");
        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(&encode_header(self.headers)?).await?;
        for row in rows {
            tmp.write_all(&row).await?;
        }
        tmp.flush().await?;
        tmp.sync_all().await?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path).await?;
        self.file = OpenOptions::new().append(true).open(&self.path).await?;
        Ok(())
    }
}

async fn ends_without_newline(path: &Path) -> Result<bool, LedgerError> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

/// Stream every parseable row of a journal, skipping bad ones
async fn read_rows<T>(path: &Path) -> Result<Vec<T>, LedgerError>
where
    T: DeserializeOwned + 'static,
{
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut reader = AsyncReaderBuilder::new()
        .flexible(true)
        .create_deserializer(file.compat());
    let mut records = reader.deserialize::<T>();

    let mut rows = Vec::new();
    while let Some(record) = records.next().await {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!(journal = %path.display(), error = %e, "skipping unreadable journal row"),
        }
    }
    Ok(rows)
}

/// File-backed [`DurableStore`] built from two append-only CSV journals
#[derive(Debug)]
pub struct CsvJournalStore {
    dir: PathBuf,
    state: MemoryStore,
    transactions: Mutex<Journal>,
    balances: Mutex<Journal>,
}

impl CsvJournalStore {
    /// Open (or create) the journals under `dir` and replay them
    ///
    /// # Returns
    ///
    /// * `Ok(CsvJournalStore)` - Store holding the replayed state
    /// * `Err(LedgerError::Storage)` - If the directory or a journal cannot be
    ///   created or read
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let state = MemoryStore::new();
        let transactions_path = dir.join(TRANSACTIONS_FILE);
        let balances_path = dir.join(BALANCES_FILE);

        let mut replayed = 0usize;
        for row in read_rows::<TransactionRow>(&transactions_path).await? {
            match Transaction::try_from(row) {
                Ok(tx) => {
                    state.put_transaction(tx);
                    replayed += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping invalid transaction row"),
            }
        }
        for row in read_rows::<BalanceRow>(&balances_path).await? {
            match BalanceRecord::try_from(row) {
                Ok(record) => {
                    state.put_balance(record);
                    replayed += 1;
                }
                Err(e) => tracing::warn!(error = %e, "skipping invalid balance row"),
            }
        }
        tracing::info!(dir = %dir.display(), rows = replayed, "journals replayed");

        let transactions = Journal::open(transactions_path, &TRANSACTION_HEADERS).await?;
        let balances = Journal::open(balances_path, &BALANCE_HEADERS).await?;

        Ok(Self {
            dir,
            state,
            transactions: Mutex::new(transactions),
            balances: Mutex::new(balances),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite both journals to exactly one row per transaction and per owner
    ///
    /// # Returns
    ///
    /// The number of rows written (transactions plus balances).
    pub async fn compact(&self) -> Result<usize, LedgerError> {
        let mut tx_journal = self.transactions.lock().await;
        let mut balance_journal = self.balances.lock().await;

        let mut transactions = self.state.snapshot_transactions();
        transactions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let tx_rows = transactions
            .iter()
            .map(|tx| encode_row(&TransactionRow::from(tx)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut balances = self.state.snapshot_balances();
        balances.sort_by_key(|record| record.owner);
        let balance_rows = balances
            .iter()
            .map(|record| encode_row(&BalanceRow::from(record)))
            .collect::<Result<Vec<_>, _>>()?;

        let written = tx_rows.len() + balance_rows.len();
        tx_journal.rewrite(tx_rows).await?;
        balance_journal.rewrite(balance_rows).await?;

        tracing::info!(dir = %self.dir.display(), rows = written, "journals compacted");
        Ok(written)
    }

    // Caller holds the balance journal lock.
    async fn write_balance(
        &self,
        journal: &mut Journal,
        record: BalanceRecord,
    ) -> Result<BalanceRecord, LedgerError> {
        journal.append(&encode_row(&BalanceRow::from(&record))?).await?;
        self.state.put_balance(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl DurableStore for CsvJournalStore {
    async fn upsert_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let line = encode_row(&TransactionRow::from(tx))?;
        let mut journal = self.transactions.lock().await;
        if self.state.is_stale(tx) {
            return Ok(());
        }
        journal.append(&line).await?;
        self.state.put_transaction(tx.clone());
        Ok(())
    }

    async fn load_transactions(&self) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.state.snapshot_transactions())
    }

    async fn find_balance(&self, owner: OwnerId) -> Result<Option<BalanceRecord>, LedgerError> {
        Ok(self.state.balance_of(owner))
    }

    async fn get_or_create_balance(
        &self,
        owner: OwnerId,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError> {
        if let Some(record) = self.state.balance_of(owner) {
            return Ok(record);
        }
        let mut journal = self.balances.lock().await;
        match self.state.balance_of(owner) {
            Some(record) => Ok(record),
            None => {
                self.write_balance(&mut journal, BalanceRecord::new(owner, now))
                    .await
            }
        }
    }

    async fn increment_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<BalanceRecord, LedgerError> {
        let mut journal = self.balances.lock().await;
        let current = self
            .state
            .balance_of(owner)
            .unwrap_or_else(|| BalanceRecord::new(owner, now));
        let balance = current.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::storage(format!("balance overflow for owner {}", owner))
        })?;
        self.write_balance(
            &mut journal,
            BalanceRecord {
                owner,
                balance,
                updated_at: now,
            },
        )
        .await
    }

    async fn decrement_balance(
        &self,
        owner: OwnerId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<DebitOutcome, LedgerError> {
        let mut journal = self.balances.lock().await;
        let balance = self
            .state
            .balance_of(owner)
            .map_or(0, |record| record.balance);
        if balance < amount {
            return Ok(DebitOutcome::Insufficient { balance });
        }
        let record = self
            .write_balance(
                &mut journal,
                BalanceRecord {
                    owner,
                    balance: balance - amount,
                    updated_at: now,
                },
            )
            .await?;
        Ok(DebitOutcome::Applied(record))
    }

    async fn load_balances(&self) -> Result<Vec<BalanceRecord>, LedgerError> {
        Ok(self.state.snapshot_balances())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionStatus;
    use tempfile::TempDir;

    fn pending(id: &str, owner: OwnerId) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: id.to_string(),
            owner,
            display_name: format!("owner {}", owner),
            amount: 50_000,
            status: TransactionStatus::Pending,
            payment_code: "0002010102125405500005802ID".to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(30),
            approved_by: None,
            approved_at: None,
        }
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path).unwrap().lines().count()
    }

    #[tokio::test]
    async fn test_open_creates_journals_with_headers() {
        let dir = TempDir::new().unwrap();
        let store = CsvJournalStore::open(dir.path()).await.unwrap();

        assert_eq!(store.dir(), dir.path());
        let header = std::fs::read_to_string(dir.path().join(TRANSACTIONS_FILE)).unwrap();
        assert_eq!(header.trim_end(), TRANSACTION_HEADERS.join(","));
        let header = std::fs::read_to_string(dir.path().join(BALANCES_FILE)).unwrap();
        assert_eq!(header.trim_end(), BALANCE_HEADERS.join(","));
    }

    #[tokio::test]
    async fn test_reopen_replays_transactions_and_balances() {
        let dir = TempDir::new().unwrap();
        {
            let store = CsvJournalStore::open(dir.path()).await.unwrap();
            let mut tx = pending("TXN_1_1", 1);
            store.upsert_transaction(&tx).await.unwrap();
            tx.status = TransactionStatus::Confirmed;
            tx.approved_by = Some(99);
            tx.approved_at = Some(Utc::now());
            store.upsert_transaction(&tx).await.unwrap();
            store.upsert_transaction(&pending("TXN_2_1", 2)).await.unwrap();

            store.increment_balance(1, 50_000, Utc::now()).await.unwrap();
            store.decrement_balance(1, 20_000, Utc::now()).await.unwrap();
        }

        let store = CsvJournalStore::open(dir.path()).await.unwrap();
        let mut transactions = store.load_transactions().await.unwrap();
        transactions.sort_by(|a, b| a.id.cmp(&b.id));

        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].status, TransactionStatus::Confirmed);
        assert_eq!(transactions[0].approved_by, Some(99));
        assert_eq!(transactions[1].status, TransactionStatus::Pending);
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().balance, 30_000);
    }

    #[tokio::test]
    async fn test_stale_pending_row_is_not_appended() {
        let dir = TempDir::new().unwrap();
        let store = CsvJournalStore::open(dir.path()).await.unwrap();

        let mut tx = pending("TXN_1_1", 1);
        tx.status = TransactionStatus::Rejected;
        store.upsert_transaction(&tx).await.unwrap();
        store.upsert_transaction(&pending("TXN_1_1", 1)).await.unwrap();

        let journal = dir.path().join(TRANSACTIONS_FILE);
        assert_eq!(line_count(&journal), 2);
        assert_eq!(
            store.load_transactions().await.unwrap()[0].status,
            TransactionStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_refused_debit_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = CsvJournalStore::open(dir.path()).await.unwrap();
        store.increment_balance(1, 100, Utc::now()).await.unwrap();

        let outcome = store.decrement_balance(1, 500, Utc::now()).await.unwrap();

        assert_eq!(outcome, DebitOutcome::Insufficient { balance: 100 });
        assert_eq!(line_count(&dir.path().join(BALANCES_FILE)), 2);
    }

    #[tokio::test]
    async fn test_torn_and_garbage_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        {
            let store = CsvJournalStore::open(dir.path()).await.unwrap();
            store.increment_balance(1, 700, Utc::now()).await.unwrap();
        }
        let path = dir.path().join(BALANCES_FILE);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("not-a-number,5,yesterday\n2,40");
        std::fs::write(&path, content).unwrap();

        let store = CsvJournalStore::open(dir.path()).await.unwrap();
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().balance, 700);
        assert!(store.find_balance(2).await.unwrap().is_none());

        // The torn line was terminated, so new rows parse after a reopen
        store.increment_balance(3, 10, Utc::now()).await.unwrap();
        drop(store);
        let store = CsvJournalStore::open(dir.path()).await.unwrap();
        assert_eq!(store.find_balance(3).await.unwrap().unwrap().balance, 10);
    }

    #[tokio::test]
    async fn test_compact_keeps_one_row_per_key() {
        let dir = TempDir::new().unwrap();
        let store = CsvJournalStore::open(dir.path()).await.unwrap();
        for _ in 0..5 {
            store.increment_balance(1, 10, Utc::now()).await.unwrap();
        }
        store.increment_balance(2, 10, Utc::now()).await.unwrap();
        let mut tx = pending("TXN_1_1", 1);
        store.upsert_transaction(&tx).await.unwrap();
        tx.status = TransactionStatus::Expired;
        store.upsert_transaction(&tx).await.unwrap();

        let written = store.compact().await.unwrap();

        assert_eq!(written, 3);
        assert_eq!(line_count(&dir.path().join(BALANCES_FILE)), 3);
        assert_eq!(line_count(&dir.path().join(TRANSACTIONS_FILE)), 2);

        // Appends keep working on the rewritten files
        store.increment_balance(2, 5, Utc::now()).await.unwrap();
        drop(store);
        let store = CsvJournalStore::open(dir.path()).await.unwrap();
        assert_eq!(store.find_balance(1).await.unwrap().unwrap().balance, 50);
        assert_eq!(store.find_balance(2).await.unwrap().unwrap().balance, 15);
        assert_eq!(
            store.load_transactions().await.unwrap()[0].status,
            TransactionStatus::Expired
        );
    }
}
