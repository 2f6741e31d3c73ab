//! # Startup Recovery
//!
//! Runs once at open, before any transaction exists. Reconciles the page
//! store with whatever the previous process left in the log:
//!
//! 1. Forward-scan the whole WAL and collect every transaction that owns
//!    a commit record with a valid magic.
//! 2. Forward-scan again, applying each committed page record to the
//!    store. Later records overwrite earlier ones, so the last write of
//!    a transaction wins.
//! 3. Fsync the store, then truncate the WAL to zero length.
//!
//! A short final record (crash mid-append) silently ends the scan; an
//! unrecognizable type tag ends it with a logged warning. Either way the
//! offending suffix carries no replayable commit and disappears with the
//! truncation. Running recovery twice over the same state is idempotent:
//! the second pass finds an empty log and applies nothing.

use eyre::Result;
use hashbrown::HashSet;
use tracing::warn;

use crate::storage::{PageStore, ScanTail, Wal, WalRecord, WalScanner, COMMIT_MAGIC};
use crate::txn::TxId;

/// Summary of what recovery found and replayed.
#[derive(Debug, Clone, Default)]
pub struct RecoveryInfo {
    pub committed_transactions: usize,
    pub pages_applied: u32,
    pub wal_bytes_truncated: u64,
}

pub(crate) fn recover(store: &mut PageStore, wal: &mut Wal) -> Result<RecoveryInfo> {
    if wal.is_empty() {
        return Ok(RecoveryInfo::default());
    }
    let wal_len = wal.len();

    let (committed_transactions, pages_applied) = wal.with_prefix(wal_len, |bytes| {
        let mut committed: HashSet<TxId> = HashSet::new();
        let mut scanner = WalScanner::new(bytes);
        for (_, record) in &mut scanner {
            if let WalRecord::Commit { tx_id, magic } = record {
                if magic == COMMIT_MAGIC {
                    committed.insert(tx_id);
                }
            }
        }
        if let Some(ScanTail::Corrupt { offset }) = scanner.tail() {
            warn!(offset, "unrecognized record tag in log, discarding from there");
        }

        let mut applied = 0u32;
        for (_, record) in WalScanner::new(bytes) {
            if let WalRecord::Page { tx_id, page_id, image } = record {
                if committed.contains(&tx_id) {
                    store.write_page(page_id, image)?;
                    applied += 1;
                }
            }
        }

        Ok((committed.len(), applied))
    })?;

    if pages_applied > 0 {
        store.sync()?;
    }
    wal.truncate()?;

    Ok(RecoveryInfo {
        committed_transactions,
        pages_applied,
        wal_bytes_truncated: wal_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::PAGE_SIZE;
    use tempfile::tempdir;

    #[test]
    fn committed_pages_are_replayed_and_log_emptied() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("db")).unwrap();
        let mut wal = Wal::open(dir.path().join("db-wal")).unwrap();

        wal.append_page_record(1, 0, &[0x41; PAGE_SIZE]).unwrap();
        wal.append_commit_record(1).unwrap();
        wal.append_page_record(2, 1, &[0x42; PAGE_SIZE]).unwrap();

        let info = recover(&mut store, &mut wal).unwrap();

        assert_eq!(info.committed_transactions, 1);
        assert_eq!(info.pages_applied, 1);
        assert_eq!(wal.len(), 0);
        assert!(store.read_page(0).unwrap().iter().all(|&b| b == 0x41));
        assert!(store.read_page(1).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn later_records_overwrite_earlier_ones() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("db")).unwrap();
        let mut wal = Wal::open(dir.path().join("db-wal")).unwrap();

        wal.append_page_record(1, 5, &[0xAA; PAGE_SIZE]).unwrap();
        wal.append_page_record(1, 5, &[0xBB; PAGE_SIZE]).unwrap();
        wal.append_commit_record(1).unwrap();

        let info = recover(&mut store, &mut wal).unwrap();

        assert_eq!(info.pages_applied, 2);
        assert!(store.read_page(5).unwrap().iter().all(|&b| b == 0xBB));
    }

    #[test]
    fn recovery_of_empty_log_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut store = PageStore::open(dir.path().join("db")).unwrap();
        let mut wal = Wal::open(dir.path().join("db-wal")).unwrap();

        let info = recover(&mut store, &mut wal).unwrap();

        assert_eq!(info.committed_transactions, 0);
        assert_eq!(info.pages_applied, 0);
        assert_eq!(info.wal_bytes_truncated, 0);
    }

    #[test]
    fn short_corrupt_tail_is_discarded() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("db-wal");

        let mut wal = Wal::open(&wal_path).unwrap();
        wal.append_page_record(1, 2, &[0x33; PAGE_SIZE]).unwrap();
        wal.append_commit_record(1).unwrap();
        drop(wal);

        // An unknown tag with only one byte behind it.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&wal_path)
            .unwrap();
        file.write_all(&[7, 0, 0, 0, 0xAB]).unwrap();
        drop(file);

        let mut store = PageStore::open(dir.path().join("db")).unwrap();
        let mut wal = Wal::open(&wal_path).unwrap();
        let info = recover(&mut store, &mut wal).unwrap();

        assert_eq!(info.committed_transactions, 1);
        assert_eq!(info.pages_applied, 1);
        assert_eq!(wal.len(), 0);
        assert!(store.read_page(2).unwrap().iter().all(|&b| b == 0x33));
    }

    #[test]
    fn commit_after_corruption_is_not_replayed() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let wal_path = dir.path().join("db-wal");

        let mut wal = Wal::open(&wal_path).unwrap();
        wal.append_page_record(1, 0, &[0x11; PAGE_SIZE]).unwrap();
        wal.append_commit_record(1).unwrap();
        drop(wal);

        // Garbage boundary followed by a complete, committed transaction.
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&wal_path)
            .unwrap();
        file.write_all(&[0xFF; 16]).unwrap();
        let mut tail = Vec::new();
        tail.extend_from_slice(&1u32.to_le_bytes());
        tail.extend_from_slice(&2u32.to_le_bytes());
        tail.extend_from_slice(&0u32.to_le_bytes());
        tail.extend_from_slice(&[0x22; PAGE_SIZE]);
        tail.extend_from_slice(&2u32.to_le_bytes());
        tail.extend_from_slice(&2u32.to_le_bytes());
        tail.extend_from_slice(&0xC0DE_CAFEu32.to_le_bytes());
        file.write_all(&tail).unwrap();
        drop(file);

        let mut store = PageStore::open(dir.path().join("db")).unwrap();
        let mut wal = Wal::open(&wal_path).unwrap();
        let info = recover(&mut store, &mut wal).unwrap();

        assert_eq!(info.committed_transactions, 1);
        assert_eq!(info.pages_applied, 1);
        assert_eq!(wal.len(), 0);
        assert!(store.read_page(0).unwrap().iter().all(|&b| b == 0x11));
    }
}
