//! Crate-wide error composition.
//!
//! Each component defines its own `thiserror` enum (`RecordError`,
//! `IoEngineError`, `VerifyError`, [`crate::recovery::RecoveryError`]);
//! [`WalError`] composes them via `#[from]`, the same way the teacher's
//! `EngineError` wraps `ManifestError`/`MemtableError`/`SSTableError` plus a
//! handful of variants that belong to the orchestrator itself.

use thiserror::Error;

use crate::io_engine::IoEngineError;
use crate::record::RecordError;
use crate::recovery::RecoveryError;

/// Errors surfaced by [`crate::wal::Wal`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WalError {
    /// A record failed to frame or parse.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// The I/O engine (ring) failed outside of a per-operation completion.
    #[error("io engine error: {0}")]
    IoEngine(#[from] IoEngineError),

    /// Recovery failed to reconcile the two files.
    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    /// Opening the primary or secondary file failed.
    #[error("failed to open WAL file {path}: {source}")]
    OpenFailed { path: std::path::PathBuf, #[source] source: std::io::Error },

    /// A pending operation's write or fsync completed with an error on at
    /// least one file; surfaced by `flush`. The WAL is poisoned after this:
    /// per spec §5, the caller's remedy is to close and reopen.
    #[error("operation for sequence {sequence} failed durability: {detail}")]
    OperationFailed { sequence: u64, detail: String },

    /// A completion arrived for a sequence not present in the pending list.
    /// A protocol bug; never expected in correct operation.
    #[error("completion for unknown sequence {0}")]
    UnknownSequence(u64),

    /// Allocating a direct-I/O buffer for an in-flight append failed.
    #[error("allocator failure while preparing append: {0}")]
    AllocationFailed(#[source] RecordError),

    /// `replay`'s callback returned an error; propagated verbatim.
    #[error("replay callback failed: {0}")]
    ReplayCallback(#[source] Box<dyn std::error::Error + Send + Sync>),
}
