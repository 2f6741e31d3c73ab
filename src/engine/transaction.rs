//! # Transaction Handles
//!
//! [`WriteTxn`] is the single writer: it stages page images in its
//! private buffer and publishes them all at once at commit. Dropping it
//! without committing aborts silently; nothing reaches the log.
//!
//! [`ReadTxn`] is a snapshot reader: it resolves each page against the
//! log prefix `[0, snapshot)` and falls back to the page store. The
//! resolution is cached as a *snapshot view*, built on first use by two
//! forward scans over the prefix:
//!
//! 1. collect the set of transactions owning a commit record in range,
//! 2. map each page to the offset of its newest committed page record
//!    (forward overwrite, so the last write of a transaction wins).
//!
//! The prefix is immutable while the reader lives, so the view stays
//! valid until a checkpoint rebases the log; the rebase generation
//! detects that and forces a rebuild against the shifted offsets. The
//! view never extends the snapshot.

use eyre::{eyre, Result};
use hashbrown::HashMap;

use crate::error::EngineError;
use crate::storage::{committed_transactions, WalRecord, WalScanner, PAGE_SIZE};
use crate::txn::{ReaderId, TxId, WriteBuffer};

use super::Engine;

pub struct WriteTxn<'a> {
    engine: &'a Engine,
    tx_id: TxId,
    buffer: WriteBuffer,
    finished: bool,
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("tx_id", &self.tx_id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(engine: &'a Engine, tx_id: TxId) -> Self {
        Self {
            engine,
            tx_id,
            buffer: WriteBuffer::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> TxId {
        self.tx_id
    }

    pub fn staged_pages(&self) -> usize {
        self.buffer.len()
    }

    /// Stages one page image. Re-staging a page replaces the previous
    /// image; nothing is visible to anyone until [`WriteTxn::commit`].
    pub fn stage_write(&mut self, page_id: u32, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(EngineError::BadPageSize {
                expected: PAGE_SIZE,
                actual: data.len(),
            }
            .into());
        }
        self.buffer.stage(page_id, data);
        Ok(())
    }

    /// Publishes every staged page atomically and durably.
    ///
    /// On failure the transaction is aborted: the writer slot is
    /// released, and whatever partial tail reached the log carries no
    /// commit record, so recovery will discard it.
    pub fn commit(mut self) -> Result<()> {
        let staged = self.buffer.drain();
        let result = self.engine.commit_staged(self.tx_id, &staged);

        self.finished = true;
        self.engine.txns.release_writer();

        result?;
        self.engine.maybe_auto_checkpoint();
        Ok(())
    }

    /// Explicit form of drop-without-commit.
    pub fn abort(mut self) {
        self.finished = true;
        self.engine.txns.release_writer();
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.engine.txns.release_writer();
        }
    }
}

struct SnapshotView {
    generation: u64,
    newest_committed: HashMap<u32, u64>,
}

impl SnapshotView {
    fn build(bytes: &[u8], generation: u64) -> Self {
        let committed = committed_transactions(bytes);
        let mut newest_committed = HashMap::new();
        for (offset, record) in WalScanner::new(bytes) {
            if let WalRecord::Page { tx_id, page_id, .. } = record {
                if committed.contains(&tx_id) {
                    newest_committed.insert(page_id, offset);
                }
            }
        }
        Self {
            generation,
            newest_committed,
        }
    }
}

pub struct ReadTxn<'a> {
    engine: &'a Engine,
    reader_id: ReaderId,
    view: Option<SnapshotView>,
    finished: bool,
}

impl<'a> ReadTxn<'a> {
    pub(crate) fn new(engine: &'a Engine, reader_id: ReaderId) -> Self {
        Self {
            engine,
            reader_id,
            view: None,
            finished: false,
        }
    }

    /// The reader's snapshot offset in the current log coordinates.
    pub fn snapshot(&self) -> u64 {
        self.engine
            .txns
            .reader_view(self.reader_id)
            .map(|(snapshot, _)| snapshot)
            .unwrap_or(0)
    }

    /// Returns the newest page image committed before this reader's
    /// snapshot, or the page store image (zero-filled past the extent)
    /// if no transaction in range touched the page.
    pub fn read(&mut self, page_id: u32) -> Result<Vec<u8>> {
        let engine = self.engine;
        let wal = engine.wal.read();

        let (snapshot, generation) = engine
            .txns
            .reader_view(self.reader_id)
            .ok_or_else(|| eyre!("read transaction {} is no longer registered", self.reader_id))?;

        let stale = self
            .view
            .as_ref()
            .map_or(true, |view| view.generation != generation);
        if stale {
            let view =
                wal.with_prefix(snapshot, |bytes| Ok(SnapshotView::build(bytes, generation)))?;
            self.view = Some(view);
        }

        let view = self.view.as_ref().unwrap();
        if let Some(&offset) = view.newest_committed.get(&page_id) {
            return wal.page_image_at(offset);
        }
        drop(wal);

        let mut store = engine.store.lock();
        store.read_page(page_id)
    }

    /// Ends the read transaction, releasing its snapshot so checkpoints
    /// may reclaim the log prefix it was holding.
    pub fn finish(mut self) {
        self.finished = true;
        self.engine.txns.end_reader(self.reader_id);
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.engine.txns.end_reader(self.reader_id);
        }
    }
}
