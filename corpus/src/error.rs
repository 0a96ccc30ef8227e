//! Error types for corpus loading and chunking.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for corpus operations.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Errors that can occur while reading or building a corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// Source file could not be read.
    #[error("failed to read source {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output file could not be written.
    #[error("failed to write {path}: {source}")]
    WriteOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON-lines record was malformed.
    #[error("invalid record at {path}:{line}: {reason}")]
    InvalidLine {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Two records share one id.
    #[error("duplicate unit id {id} at {path}:{line}")]
    DuplicateId {
        path: PathBuf,
        line: usize,
        id: String,
    },

    /// Chunker configuration is unusable.
    #[error("invalid chunker configuration: overlap {overlap} must be smaller than max_chars {max_chars}")]
    InvalidChunker { max_chars: usize, overlap: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
