//! # Storage Layer
//!
//! The two files backing an engine:
//!
//! - [`PageStore`]: the main file, a headerless sparse array of
//!   `PAGE_SIZE`-byte pages addressed by page number. Holds only
//!   checkpointed state; never written by the commit path.
//! - [`Wal`]: the write-ahead log at `<path>-wal`, an append-only stream
//!   of page and commit records. Holds everything committed since the
//!   last checkpoint, plus any orphan tail a crash left behind.
//!
//! ```text
//! commit:      write buffer ──► WAL (page records, commit record, fsync)
//! read:        WAL prefix [0, snapshot) ──► fallback to PageStore
//! checkpoint:  WAL prefix [0, safe) ──► PageStore, then log rebase
//! recovery:    whole WAL ──► PageStore, then log truncation
//! ```

mod store;
mod wal;

pub use store::PageStore;
pub use wal::{
    committed_transactions, CommitRecord, PageRecordHeader, ScanTail, Wal, WalRecord,
    WalScanner, COMMIT_MAGIC, COMMIT_RECORD_SIZE, PAGE_RECORD_SIZE, RECORD_HEADER_SIZE,
    WAL_RECORD_COMMIT, WAL_RECORD_PAGE,
};

pub const PAGE_SIZE: usize = 4096;
