//! Error types for the embeddings system.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Failures of a remote embedding or generation call.
///
/// Every variant maps to one retry behaviour, see
/// [`RetryPolicy::decide`](crate::remote::RetryPolicy::decide).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Credential invalid or expired.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Connection failure or server-side error worth retrying.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// The call did not finish within its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Response arrived but could not be used.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Definitive error response from the API.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Provider is missing required configuration.
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Remote call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Records and documents do not line up.
    #[error("misaligned index: {0}")]
    MisalignedIndex(String),

    /// Checkpoint file could not be used.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(String),

    /// Persisted index files are unreadable or inconsistent.
    #[error("corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    /// No index was ever committed for the source.
    #[error("no index available for source {source_tag}")]
    IndexMissing { source_tag: String },

    /// Another run holds the source lock.
    #[error("embedding run already in progress (lock held: {path})")]
    Locked { path: PathBuf },

    /// Source could not be read or parsed.
    #[error("corpus error: {0}")]
    Corpus(#[from] sct_corpus::CorpusError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
