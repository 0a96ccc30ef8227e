//! Overlapping window chunker for research-paper text.
//!
//! Extracted paper text is whitespace-normalized and cut into fixed-size
//! character windows. Consecutive windows share `overlap` characters so a
//! sentence straddling a boundary is still retrievable from one chunk.

use serde_json::Value;

use crate::error::{CorpusError, Result};
use crate::unit::KnowledgeUnit;

/// Default window size in characters.
pub const DEFAULT_MAX_CHARS: usize = 1200;

/// Default overlap between consecutive windows.
pub const DEFAULT_OVERLAP: usize = 200;

/// Configuration for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk.
    pub max_chars: usize,

    /// Characters shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Splits document text into overlapping chunks.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    /// Create a chunker, rejecting an overlap that would never advance.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.max_chars == 0 || config.overlap >= config.max_chars {
            return Err(CorpusError::InvalidChunker {
                max_chars: config.max_chars,
                overlap: config.overlap,
            });
        }
        Ok(Self { config })
    }

    /// Chunker with the default 1200/200 window.
    pub fn with_defaults() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }

    /// Split text into overlapping windows.
    ///
    /// Whitespace runs collapse to a single space first. Empty input yields
    /// no chunks; input no longer than `max_chars` yields exactly one.
    pub fn split(&self, text: &str) -> Vec<String> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() <= self.config.max_chars {
            return vec![normalized];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.config.max_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start = end - self.config.overlap;
        }

        chunks
    }

    /// Chunk one document into knowledge units.
    ///
    /// Unit ids follow `"{document}::chunk_{i}"`; each unit records its
    /// source document and chunk position as metadata.
    pub fn chunk_document(
        &self,
        document: &str,
        text: &str,
        source_tag: &str,
    ) -> Vec<KnowledgeUnit> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                KnowledgeUnit::new(format!("{document}::chunk_{index}"), chunk, source_tag)
                    .with_metadata("source", document)
                    .with_metadata("chunk_index", Value::from(index))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(max_chars: usize, overlap: usize) -> TextChunker {
        TextChunker::new(ChunkerConfig { max_chars, overlap }).unwrap()
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let chunks = chunker(20, 5).split("  bin   yield\n\tper lot ");
        assert_eq!(chunks, vec!["bin yield per lot".to_string()]);
    }

    #[test]
    fn test_windows_overlap() {
        let text: String = ('a'..='z').collect();
        let chunks = chunker(10, 3).split(&text);

        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert_eq!(chunks[2], "opqrstuvwx");
        assert_eq!(chunks[3], "vwxyz");
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_multibyte_text_splits_on_chars() {
        let text = "é".repeat(15);
        let chunks = chunker(10, 2).split(&text);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(chunks[1].chars().count(), 7);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(TextChunker::with_defaults().split(" \n ").is_empty());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_window() {
        assert!(TextChunker::new(ChunkerConfig {
            max_chars: 10,
            overlap: 10
        })
        .is_err());
    }

    #[test]
    fn test_chunk_document_ids_and_metadata() {
        let units = chunker(10, 2).chunk_document("paper.pdf", &"x".repeat(15), "papers");

        assert_eq!(units.len(), 2);
        assert_eq!(units[1].id, "paper.pdf::chunk_1");
        assert_eq!(units[1].source_tag, "papers");
        assert_eq!(units[1].metadata.get("source"), Some(&Value::from("paper.pdf")));
        assert_eq!(units[1].metadata.get("chunk_index"), Some(&Value::from(1)));
    }
}
