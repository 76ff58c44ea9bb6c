//! Crate-wide error type.
//!
//! Mirrors the recoverability rules in spec §7: corruption, transient I/O,
//! dimension mismatches and ANN unavailability are all handled by the
//! caller (empty store, skipped candidate, linear-scan fallback) rather
//! than propagated. Only validation errors and explicit
//! `save(throw_on_error: true)` calls are expected to reach a caller as
//! `Err`.

use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the indexing and retrieval engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A SQLite operation on the embedding store failed.
    #[error("sqlite error at {path}: {cause}")]
    Sqlite { path: PathBuf, cause: String },

    /// Generic I/O failure (persistence writes, advisory lock, temp files).
    #[error("io error: {cause}")]
    Io { cause: String },

    /// A stored or query vector's length did not match the store's `dim`.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// On-disk state failed a structural or version check; caller should
    /// treat the store/index as empty and request reindex/rebuild.
    #[error("corrupt on-disk state: {detail}")]
    Corrupt { detail: String },

    /// The ANN index could not be built or loaded; caller falls back to
    /// linear scan.
    #[error("ann index unavailable: {cause}")]
    AnnUnavailable { cause: String },

    /// A query parameter failed validation (empty query, invalid range).
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Failed to acquire or hold the advisory per-workspace file lock.
    #[error("workspace lock error: {cause}")]
    WorkspaceLock { cause: String },

    /// The reader-drain wait exceeded its bound during a compacting write.
    #[error("timed out waiting for readers to drain after {waited_ms}ms")]
    ReaderDrainTimeout { waited_ms: u64 },

    /// The external embedding model call failed.
    #[error("embedding provider error: {cause}")]
    Embedding { cause: String },

    /// A configuration value failed validation.
    #[error("invalid config field {field}: {cause}")]
    ConfigError { field: String, cause: String },
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io {
            cause: e.to_string(),
        }
    }
}
