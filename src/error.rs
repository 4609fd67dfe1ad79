//! Error taxonomy for the knowledge engine.
//!
//! Typed at the throw site (`thiserror`), widened to `anyhow::Error` at call
//! sites the way the rest of the crate propagates errors with `?`. Matching
//! spec §7: internal invariant violations fail loud, external conditions
//! (network, filesystem, a busy database file) are recoverable and carry
//! enough context for the caller to decide whether to retry.

use thiserror::Error;

/// The error kinds named in spec §7. Each variant documents its propagation
/// policy so callers don't have to re-derive it from the taxonomy table.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// Surfaced to the caller with a one-line reason. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Returned as an absent value by default; only raised when the caller
    /// explicitly asked for a single required result (`get_required`, etc.).
    #[error("not found: {0}")]
    NotFound(String),

    /// The store file is locked by another writer past the busy timeout.
    /// Callers retry with backoff before surfacing this.
    #[error("store busy: {0}")]
    Busy(String),

    /// The on-disk file is not a valid database. Fatal, not recoverable
    /// in-process.
    #[error("store corrupt: {0}")]
    StoreCorrupt(String),

    /// The on-disk schema version is newer than this binary understands.
    /// Fatal; implies a downgrade was attempted.
    #[error("schema too new: on-disk version {on_disk}, supported up to {supported}")]
    SchemaTooNew { on_disk: i64, supported: i64 },

    /// A single file failed to parse. Counted and logged; never aborts a
    /// parse run.
    #[error("failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    /// No embedding backend is configured or reachable. Callers fall back
    /// to structured-only retrieval.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// A collaborator outside this crate's boundary (git, transcript
    /// discovery, an extraction client) failed. Logged; the session or hook
    /// run still completes and records metrics.
    #[error("external dependency failed: {0}")]
    ExternalDependencyFailure(String),
}

impl KnowledgeError {
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// True for the kinds spec §7 marks as transient / worth a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
