//! # Corpus
//!
//! Knowledge units consumed by the embedding pipeline.
//!
//! - **Knowledge units**: `{id, text, source_tag, metadata}` records parsed
//!   from JSON-lines sources
//! - **Source snapshots**: one read of a source file yielding both the units
//!   and the SHA-256 fingerprint of the exact bytes they came from
//! - **Chunking**: overlapping character windows for long paper text

pub mod chunker;
pub mod error;
pub mod unit;

pub use chunker::{ChunkerConfig, TextChunker};
pub use error::{CorpusError, Result};
pub use unit::{KnowledgeUnit, SourceSnapshot, fingerprint_bytes, fingerprint_file, write_units};
