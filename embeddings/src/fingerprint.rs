//! Change detection for knowledge sources.
//!
//! A source needs re-embedding when its bytes no longer hash to the value
//! recorded at the last commit, or when that commit's files are gone.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sct_corpus::fingerprint_file;

use crate::error::Result;
use crate::store::IndexStore;

/// Persisted record of the last successful commit for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub source_tag: String,

    /// SHA-256 hex digest of the source bytes that were embedded.
    pub hash: String,

    pub updated_at: DateTime<Utc>,

    /// Generation directory holding the committed index.
    pub generation: String,

    pub dimension: usize,
    pub unit_count: usize,
}

/// Freshness of a source's committed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Nothing usable was ever committed.
    Missing,

    /// An index exists but the source changed since.
    Stale,

    /// The index matches the current source bytes.
    Fresh,
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            IndexStatus::Missing => "missing",
            IndexStatus::Stale => "stale",
            IndexStatus::Fresh => "fresh",
        };
        f.write_str(label)
    }
}

/// Compares sources against their committed fingerprints.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    store: IndexStore,
}

impl ChangeDetector {
    pub fn new(store: IndexStore) -> Self {
        Self { store }
    }

    /// Status of the index for `source_tag` against the file at `path`.
    ///
    /// An unreadable fingerprint record counts as missing.
    pub async fn status(&self, source_tag: &str, path: &Path) -> Result<IndexStatus> {
        let hash = fingerprint_file(path)?;

        let record = match self.store.read_fingerprint(source_tag).await {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(IndexStatus::Missing),
            Err(e) => {
                warn!("ignoring unreadable fingerprint for {source_tag}: {e}");
                return Ok(IndexStatus::Missing);
            }
        };

        if !self.store.generation_intact(&record).await {
            debug!("generation {} of {source_tag} is incomplete", record.generation);
            return Ok(IndexStatus::Missing);
        }

        if record.hash == hash {
            Ok(IndexStatus::Fresh)
        } else {
            Ok(IndexStatus::Stale)
        }
    }

    /// Whether the source must be (re-)embedded.
    pub async fn needs_update(&self, source_tag: &str, path: &Path) -> Result<bool> {
        Ok(self.status(source_tag, path).await? != IndexStatus::Fresh)
    }
}
