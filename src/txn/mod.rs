//! # Transaction Bookkeeping
//!
//! State shared by every transaction: the writer-ID counter, the
//! single-writer slot, and the registry of reader snapshots that bounds
//! how much of the WAL a checkpoint may reclaim.
//!
//! - [`TransactionManager`]: all mutable state behind one mutex.
//! - [`WriteBuffer`]: per-writer staging of dirty pages, drained into the
//!   WAL at commit.

mod manager;
mod write_buffer;

pub use manager::{ReaderId, TransactionManager, TxId};
pub use write_buffer::{StagedPage, WriteBuffer};
