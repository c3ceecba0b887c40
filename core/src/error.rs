//! Error taxonomy (§7). Fatal-at-construction variants propagate to the
//! orchestrator, which exits nonzero; per-file variants are recorded and
//! never halt the pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Remote byte fetch, KV read/write, or event stream read failed.
    /// Retried with backoff at the transport boundary; never raised past it
    /// except to be recorded as a failure count.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// A [`crate::rename::RenameRule`] precondition was violated.
    #[error("malformed metadata for {path}: {reason}")]
    MalformedMeta { path: PathBuf, reason: String },

    /// [`crate::hashkit`] was asked for an algorithm it does not know.
    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A [`crate::hashindex::HashIndex`] CSV file's header didn't match the
    /// expected `path,size,mtime,<algo>` shape.
    #[error("invalid hash index file {path}: {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// Configuration failed to validate at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An event with an unknown kind or unparseable payload.
    #[error("corrupt event: {0}")]
    CorruptEvent(String),

    /// No leader info became available before the startup timeout.
    #[error("no leader available after startup timeout")]
    NoLeader,
}

pub type Result<T> = std::result::Result<T, CatalogError>;
