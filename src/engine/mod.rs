//! # Engine
//!
//! The composition root: one [`Engine`] owns the page store, the WAL, the
//! transaction manager and the checkpoint policy. Transactions are
//! handles borrowing the engine:
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                     Engine                      │
//! │                                                 │
//! │   Mutex<PageStore>      RwLock<Wal>             │
//! │        ▲                  ▲      ▲              │
//! │        │ fallback         │ scan │ append+fsync │
//! │        │                  │      │              │
//! │   ReadTxn ────────────────┘   WriteTxn          │
//! │   (snapshot view)             (write buffer)    │
//! │                                                 │
//! │   TransactionManager (ids, readers, rebase)     │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Locking
//!
//! Lock order, outermost first: checkpoint mutex, WAL read-write lock,
//! then the transaction-manager mutex or the page-store mutex. Commits
//! take the checkpoint mutex and the WAL write lock through their fsync,
//! so a checkpoint never overlaps a mid-flight commit. `begin_read`
//! captures the WAL length and registers it while holding the WAL read
//! lock, which serializes snapshot capture against commit publication:
//! a snapshot lands either entirely before or entirely after a commit.
//!
//! ## Visibility
//!
//! A reader observes exactly the commits whose commit record ended
//! before its snapshot offset; everything later, and everything never
//! committed, is invisible for the reader's whole lifetime. Checkpoints
//! move committed images into the page store without changing what any
//! live reader observes.

mod builder;
mod checkpoint;
mod recovery;
mod transaction;

pub use builder::{EngineBuilder, DEFAULT_CHECKPOINT_EVERY};
pub use checkpoint::CheckpointInfo;
pub use recovery::RecoveryInfo;
pub use transaction::{ReadTxn, WriteTxn};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use eyre::{Result, WrapErr};
use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::storage::{PageStore, Wal};
use crate::txn::{StagedPage, TransactionManager, TxId};

pub struct Engine {
    store: Mutex<PageStore>,
    wal: RwLock<Wal>,
    txns: TransactionManager,
    checkpoint_lock: Mutex<()>,
    checkpoint_every: u32,
    commits_since_checkpoint: AtomicU32,
    recovery: RecoveryInfo,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Opens (or creates) the engine at `path` with default settings.
    ///
    /// The WAL lives beside the main file at `<path>-wal`. Any committed
    /// content left in the log by a previous run is replayed into the
    /// store before the engine is handed out.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::builder().path(path).open()
    }

    pub(crate) fn open_with_config(path: &Path, checkpoint_every: u32) -> Result<Self> {
        let mut store = PageStore::open(path)
            .wrap_err_with(|| format!("failed to open page store at '{}'", path.display()))?;
        let mut wal = Wal::open(wal_path(path))?;

        let recovery = recovery::recover(&mut store, &mut wal)?;
        info!(
            committed = recovery.committed_transactions,
            pages = recovery.pages_applied,
            "engine opened"
        );

        Ok(Self {
            store: Mutex::new(store),
            wal: RwLock::new(wal),
            txns: TransactionManager::new(),
            checkpoint_lock: Mutex::new(()),
            checkpoint_every,
            commits_since_checkpoint: AtomicU32::new(0),
            recovery,
        })
    }

    /// Best-effort shutdown. Nothing is flushed implicitly; everything
    /// committed is already durable in the WAL.
    pub fn close(self) {}

    pub fn begin_write(&self) -> Result<WriteTxn<'_>> {
        let tx_id = self.txns.begin_write()?;
        Ok(WriteTxn::new(self, tx_id))
    }

    pub fn begin_read(&self) -> ReadTxn<'_> {
        let reader_id = {
            let wal = self.wal.read();
            self.txns.register_reader(wal.len())
        };
        ReadTxn::new(self, reader_id)
    }

    pub fn wal_len(&self) -> u64 {
        self.wal.read().len()
    }

    /// What the startup recovery found and replayed.
    pub fn recovery_info(&self) -> &RecoveryInfo {
        &self.recovery
    }

    pub(crate) fn commit_staged(&self, tx_id: TxId, staged: &[StagedPage]) -> Result<()> {
        let _checkpoint_guard = self.checkpoint_lock.lock();
        let mut wal = self.wal.write();

        for page in staged {
            wal.append_page_record(tx_id, page.page_id, &page.data)
                .wrap_err_with(|| {
                    format!("failed to log page {} for transaction {}", page.page_id, tx_id)
                })?;
        }
        wal.append_commit_record(tx_id)
            .wrap_err_with(|| format!("failed to log commit for transaction {}", tx_id))?;
        wal.sync()
    }

    /// Commit cadence policy. A failed automatic checkpoint is only a
    /// warning: the commit that triggered it is already durable.
    pub(crate) fn maybe_auto_checkpoint(&self) {
        if self.checkpoint_every == 0 {
            return;
        }
        let committed = self.commits_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1;
        if committed < self.checkpoint_every {
            return;
        }
        if let Err(err) = self.checkpoint() {
            warn!(error = %err, "automatic checkpoint failed");
        }
    }
}

fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push("-wal");
    PathBuf::from(name)
}
