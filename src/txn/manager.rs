//! # Transaction Manager
//!
//! Allocates writer IDs, enforces the single-writer rule, and tracks the
//! snapshot offset of every live reader.
//!
//! ## Identifiers
//!
//! Writer IDs are 32-bit, start at 1 and increase monotonically for the
//! lifetime of the process; 0 is reserved as "none". They are not
//! persisted: recovery only compares IDs within a single log, never
//! across process restarts.
//!
//! ## Reader Registry
//!
//! Each reader registers the WAL length observed at `begin_read` as its
//! snapshot. The registry is a growable map keyed by an opaque reader ID,
//! so any number of readers may coexist. The minimum registered snapshot
//! is the reclamation bound: a checkpoint may only drop the log prefix
//! below it.
//!
//! When a checkpoint rewrites the log, every registered snapshot is
//! rebased by the dropped prefix length and a generation counter is
//! bumped; readers use the generation to discard snapshot views built
//! against pre-rebase offsets.
//!
//! ## Concurrency
//!
//! All state lives behind a single `parking_lot::Mutex`. Operations are
//! O(readers) at worst and brief; the lock is never held across I/O.

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::error::EngineError;

pub type TxId = u32;
pub type ReaderId = u64;

#[derive(Debug)]
struct ManagerState {
    next_tx_id: TxId,
    writer_active: bool,
    next_reader_id: ReaderId,
    readers: HashMap<ReaderId, u64>,
    generation: u64,
}

pub struct TransactionManager {
    state: Mutex<ManagerState>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManagerState {
                next_tx_id: 1,
                writer_active: false,
                next_reader_id: 0,
                readers: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn begin_write(&self) -> Result<TxId> {
        let mut state = self.state.lock();
        if state.writer_active {
            return Err(EngineError::WriterBusy.into());
        }
        let Some(next) = state.next_tx_id.checked_add(1) else {
            bail!("writer id space exhausted");
        };
        let tx_id = state.next_tx_id;
        state.next_tx_id = next;
        state.writer_active = true;
        Ok(tx_id)
    }

    pub fn release_writer(&self) {
        self.state.lock().writer_active = false;
    }

    pub fn register_reader(&self, snapshot: u64) -> ReaderId {
        let mut state = self.state.lock();
        let reader_id = state.next_reader_id;
        state.next_reader_id += 1;
        state.readers.insert(reader_id, snapshot);
        reader_id
    }

    pub fn end_reader(&self, reader_id: ReaderId) {
        self.state.lock().readers.remove(&reader_id);
    }

    /// Snapshot offset and rebase generation for a registered reader.
    pub fn reader_view(&self, reader_id: ReaderId) -> Option<(u64, u64)> {
        let state = self.state.lock();
        let snapshot = *state.readers.get(&reader_id)?;
        Some((snapshot, state.generation))
    }

    /// The reclamation bound: the minimum registered snapshot, or
    /// `fallback` (the current WAL length) when no reader is live.
    pub fn oldest_snapshot(&self, fallback: u64) -> u64 {
        let state = self.state.lock();
        state.readers.values().copied().min().unwrap_or(fallback)
    }

    /// Shifts every registered snapshot down by `safe` after the log
    /// prefix `[0, safe)` has been reclaimed.
    pub fn rebase(&self, safe: u64) {
        let mut state = self.state.lock();
        for snapshot in state.readers.values_mut() {
            debug_assert!(*snapshot >= safe);
            *snapshot -= safe;
        }
        state.generation += 1;
    }

    pub fn active_readers(&self) -> usize {
        self.state.lock().readers.len()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
