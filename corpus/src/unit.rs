//! Knowledge units and source snapshots.
//!
//! A source is a JSON-lines file produced by upstream extraction (ontology
//! flattening or paper chunking). A [`SourceSnapshot`] reads the file once and
//! derives both the fingerprint and the parsed units from the same bytes, so
//! the fingerprint always describes exactly the units that get embedded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{CorpusError, Result};

/// An immutable unit of text to embed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    /// Unique id within its source.
    pub id: String,

    /// Text content that gets embedded and retrieved.
    pub text: String,

    /// Tag of the source this unit belongs to.
    #[serde(default)]
    pub source_tag: String,

    /// Any extra fields carried by the upstream record.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl KnowledgeUnit {
    /// Create a unit without metadata.
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        source_tag: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_tag: source_tag.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// The content of one knowledge source at a point in time.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    /// Tag naming the source (e.g. `ontology`, `papers`).
    pub source_tag: String,

    /// Where the snapshot was read from.
    pub path: PathBuf,

    /// SHA-256 hex digest of the raw source bytes.
    pub fingerprint: String,

    /// Units in file order.
    pub units: Vec<KnowledgeUnit>,
}

impl SourceSnapshot {
    /// Read and parse a JSON-lines source file.
    pub fn load(source_tag: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let source_tag = source_tag.into();
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path).map_err(|source| CorpusError::ReadSource {
            path: path.clone(),
            source,
        })?;

        let snapshot = Self::from_bytes(source_tag, path, &bytes)?;
        info!(
            source_tag = %snapshot.source_tag,
            units = snapshot.units.len(),
            fingerprint = %snapshot.fingerprint,
            "loaded source snapshot"
        );
        Ok(snapshot)
    }

    /// Parse a snapshot from bytes already in memory.
    pub fn from_bytes(source_tag: String, path: PathBuf, bytes: &[u8]) -> Result<Self> {
        let fingerprint = fingerprint_bytes(bytes);

        let mut units = Vec::new();
        let mut seen = HashSet::new();
        for (index, raw) in bytes.split(|&b| b == b'\n').enumerate() {
            let line_no = index + 1;
            let line = std::str::from_utf8(raw).map_err(|e| CorpusError::InvalidLine {
                path: path.clone(),
                line: line_no,
                reason: format!("not valid UTF-8: {e}"),
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let mut unit: KnowledgeUnit =
                serde_json::from_str(line).map_err(|e| CorpusError::InvalidLine {
                    path: path.clone(),
                    line: line_no,
                    reason: e.to_string(),
                })?;

            if unit.id.trim().is_empty() {
                return Err(CorpusError::InvalidLine {
                    path,
                    line: line_no,
                    reason: "empty id".to_string(),
                });
            }
            if !seen.insert(unit.id.clone()) {
                return Err(CorpusError::DuplicateId {
                    path,
                    line: line_no,
                    id: unit.id,
                });
            }

            unit.source_tag = source_tag.clone();
            units.push(unit);
        }

        debug!("Parsed {} units from {}", units.len(), path.display());

        Ok(Self {
            source_tag,
            path,
            fingerprint,
            units,
        })
    }

    /// Number of units in the snapshot.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the snapshot holds no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// SHA-256 hex digest of raw source bytes.
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint a source file on disk.
pub fn fingerprint_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| CorpusError::ReadSource {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(fingerprint_bytes(&bytes))
}

/// Write units as JSON lines.
pub fn write_units(path: impl AsRef<Path>, units: &[KnowledgeUnit]) -> Result<()> {
    let path = path.as_ref();
    let mut out = String::new();
    for unit in units {
        out.push_str(&serde_json::to_string(unit)?);
        out.push('\n');
    }
    std::fs::write(path, out).map_err(|source| CorpusError::WriteOutput {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const PAPERS: &str = r#"{"id":"a.pdf::chunk_0","source":"a.pdf","chunk_index":0,"text":"Bin yield depends on test limits."}

{"id":"a.pdf::chunk_1","source":"a.pdf","chunk_index":1,"text":"Speed bins are assigned at final test."}
"#;

    #[test]
    fn test_parse_units_with_metadata() {
        let snapshot =
            SourceSnapshot::from_bytes("papers".into(), "papers.jsonl".into(), PAPERS.as_bytes())
                .unwrap();

        assert_eq!(snapshot.len(), 2);
        let first = &snapshot.units[0];
        assert_eq!(first.id, "a.pdf::chunk_0");
        assert_eq!(first.source_tag, "papers");
        assert_eq!(first.metadata.get("source"), Some(&Value::from("a.pdf")));
        assert_eq!(first.metadata.get("chunk_index"), Some(&Value::from(0)));
        assert!(!first.metadata.contains_key("text"));
    }

    #[test]
    fn test_fingerprint_tracks_bytes() {
        let a = fingerprint_bytes(b"one");
        let b = fingerprint_bytes(b"one");
        let c = fingerprint_bytes(b"two");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_invalid_line_reports_line_number() {
        let input = "{\"id\":\"x\",\"text\":\"ok\"}\n{\"id\":\"y\"}\n";
        let err = SourceSnapshot::from_bytes("t".into(), "t.jsonl".into(), input.as_bytes())
            .unwrap_err();
        match err {
            CorpusError::InvalidLine { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_utf8_reports_line_number() {
        let mut input = b"{\"id\":\"x\",\"text\":\"ok\"}\r\n".to_vec();
        input.extend_from_slice(b"{\"id\":\"y\",\"text\":\"bin \xff yield\"}\n");
        let err = SourceSnapshot::from_bytes("t".into(), "t.jsonl".into(), &input).unwrap_err();
        match err {
            CorpusError::InvalidLine { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let input = "{\"id\":\"x\",\"text\":\"a\"}\n{\"id\":\"x\",\"text\":\"b\"}\n";
        let err = SourceSnapshot::from_bytes("t".into(), "t.jsonl".into(), input.as_bytes())
            .unwrap_err();
        assert!(matches!(err, CorpusError::DuplicateId { line: 2, .. }));
    }

    #[test]
    fn test_load_from_disk_matches_file_fingerprint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("papers.jsonl");
        std::fs::write(&path, PAPERS).unwrap();

        let snapshot = SourceSnapshot::load("papers", &path).unwrap();
        assert_eq!(snapshot.fingerprint, fingerprint_file(&path).unwrap());
    }

    #[test]
    fn test_write_units_round_trips_through_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("units.jsonl");
        let units = vec![
            KnowledgeUnit::new("u1", "first", "ontology").with_metadata("type", "class"),
            KnowledgeUnit::new("u2", "second", "ontology"),
        ];
        write_units(&path, &units).unwrap();

        let snapshot = SourceSnapshot::load("ontology", &path).unwrap();
        assert_eq!(snapshot.units, units);
    }
}
