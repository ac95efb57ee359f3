//! Durable store backends
//!
//! - `memory`: `DashMap`-backed store, no persistence
//! - `csv_journal`: append-only CSV journals in a data directory
//! - `csv_format`: row types and CSV report writers shared by both

pub mod csv_format;
pub mod csv_journal;
pub mod memory;

pub use csv_journal::CsvJournalStore;
pub use memory::MemoryStore;
