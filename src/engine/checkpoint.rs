//! # Checkpoint
//!
//! Migrates committed page images out of the WAL into the page store and
//! reclaims the log prefix no live reader still needs.
//!
//! ```text
//! safe = min(reader snapshots), or the whole log when none are live
//!
//!   WAL:  [0 ................. safe ................. len)
//!          \__ applied to store _/ \__ becomes new [0, len-safe) __/
//! ```
//!
//! Only page records whose commit record also lies inside `[0, safe)`
//! are applied; a transaction committed beyond `safe` stays entirely in
//! the surviving suffix. The store is fsynced before the log shrinks, so
//! a crash between the two never loses a committed image. After the
//! rewrite, every registered reader snapshot is rebased by `safe`;
//! readers at rebased snapshots observe the identical page content they
//! did before, now assembled from the store plus the shorter suffix.
//!
//! Commits take the same checkpoint mutex, so a checkpoint never runs
//! against a mid-flight commit. The scan and apply phases hold only the
//! WAL read lock and the store lock; readers keep reading. Only the
//! final rewrite takes the WAL write lock, briefly.

use eyre::Result;
use tracing::debug;

use crate::storage::{committed_transactions, WalRecord, WalScanner};

use super::Engine;

/// Summary of one checkpoint run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckpointInfo {
    pub pages_applied: u32,
    pub bytes_reclaimed: u64,
}

impl Engine {
    /// Drains the reclaimable WAL prefix into the page store.
    ///
    /// Neutral for every live reader: the set of pages each reader
    /// observes, and their content, is the same before and after.
    pub fn checkpoint(&self) -> Result<CheckpointInfo> {
        let _guard = self.checkpoint_lock.lock();
        self.commits_since_checkpoint
            .store(0, std::sync::atomic::Ordering::Relaxed);

        let safe = {
            let wal = self.wal.read();
            self.txns.oldest_snapshot(wal.len())
        };
        if safe == 0 {
            return Ok(CheckpointInfo::default());
        }

        let pages_applied = {
            let wal = self.wal.read();
            let mut store = self.store.lock();

            let applied = wal.with_prefix(safe, |bytes| {
                let committed = committed_transactions(bytes);
                let mut applied = 0u32;
                for (_, record) in WalScanner::new(bytes) {
                    if let WalRecord::Page { tx_id, page_id, image } = record {
                        if committed.contains(&tx_id) {
                            store.write_page(page_id, image)?;
                            applied += 1;
                        }
                    }
                }
                Ok(applied)
            })?;

            if applied > 0 {
                store.sync()?;
            }
            applied
        };

        {
            let mut wal = self.wal.write();
            wal.truncate_prefix(safe)?;
            self.txns.rebase(safe);
        }

        debug!(pages = pages_applied, bytes = safe, "checkpoint complete");
        Ok(CheckpointInfo {
            pages_applied,
            bytes_reclaimed: safe,
        })
    }
}
