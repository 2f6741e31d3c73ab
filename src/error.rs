//! Typed error kinds for callers that need to branch on failure.
//!
//! All fallible operations return [`eyre::Result`]; when the failure is
//! one of the programmatic kinds below, the report carries an
//! [`EngineError`] recoverable with `downcast_ref`. Plain I/O failures
//! stay as `std::io::Error` in the report chain.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Another write transaction is already active.
    #[error("another write transaction is already active")]
    WriterBusy,

    /// A staged page image had the wrong length.
    #[error("page image must be {expected} bytes, got {actual}")]
    BadPageSize { expected: usize, actual: usize },

    /// A record boundary whose type tag is neither a page nor a commit
    /// record. Recovery treats this as end-of-log; it only surfaces as an
    /// error when a cached record offset no longer points at a page record.
    #[error("corrupt WAL record at offset {offset}")]
    Corruption { offset: u64 },
}
