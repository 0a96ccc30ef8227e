//! Error types for the fusion engine.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur in the retrieval engine.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The question was empty or whitespace.
    #[error("question is empty")]
    EmptyQuestion,

    /// Remote embedding or generation call failed.
    #[error(transparent)]
    Remote(#[from] sct_embeddings::RemoteError),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] sct_embeddings::EmbeddingError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Query processing error.
    #[error("query error: {0}")]
    Query(String),
}
