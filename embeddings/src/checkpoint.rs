//! Resumable progress for long embedding runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sct_corpus::SourceSnapshot;

use crate::error::{EmbeddingError, Result};
use crate::index::EmbeddingRecord;
use crate::store::write_atomic;

/// Records embedded so far for one source snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub source_tag: String,

    /// Fingerprint of the snapshot these records were computed from.
    pub source_fingerprint: String,

    /// Index of the last unit in `partial_records`.
    pub last_completed_index: usize,

    pub partial_records: Vec<EmbeddingRecord>,

    pub saved_at: DateTime<Utc>,
}

/// Where an embedding run should start.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// Start from the first unit.
    Fresh,

    /// Continue at `next_index` with the records already computed.
    Resume {
        next_index: usize,
        records: Vec<EmbeddingRecord>,
    },
}

/// Checkpoint file for one source.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint, if one exists.
    pub async fn load(&self) -> Result<Option<Checkpoint>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| EmbeddingError::CorruptCheckpoint(e.to_string()))
    }

    /// Atomically replace the checkpoint.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(&self.path, &serde_json::to_vec(checkpoint)?).await
    }

    /// Delete the checkpoint if present.
    pub async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Decide where a run over `snapshot` starts.
    ///
    /// A checkpoint is only honoured when it was taken from the same snapshot
    /// bytes and its records line up with the snapshot's units. Anything else
    /// (unreadable, stale, inconsistent) is discarded with a warning.
    pub async fn resume_point(
        &self,
        snapshot: &SourceSnapshot,
        expected_dimension: usize,
    ) -> ResumePoint {
        let checkpoint = match self.load().await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return ResumePoint::Fresh,
            Err(e) => {
                warn!("discarding checkpoint for {}: {e}", snapshot.source_tag);
                self.discard().await;
                return ResumePoint::Fresh;
            }
        };

        if let Err(reason) = validate(&checkpoint, snapshot, expected_dimension) {
            warn!(
                "discarding checkpoint for {}: {reason}",
                snapshot.source_tag
            );
            self.discard().await;
            return ResumePoint::Fresh;
        }

        let next_index = checkpoint.last_completed_index + 1;
        info!(
            source_tag = %snapshot.source_tag,
            next_index,
            total = snapshot.len(),
            "resuming from checkpoint"
        );
        ResumePoint::Resume {
            next_index,
            records: checkpoint.partial_records,
        }
    }

    async fn discard(&self) {
        if let Err(e) = self.clear().await {
            warn!("failed to remove checkpoint {}: {e}", self.path.display());
        }
    }
}

fn validate(
    checkpoint: &Checkpoint,
    snapshot: &SourceSnapshot,
    expected_dimension: usize,
) -> std::result::Result<(), String> {
    if checkpoint.source_tag != snapshot.source_tag {
        return Err(format!("belongs to source {}", checkpoint.source_tag));
    }
    if checkpoint.source_fingerprint != snapshot.fingerprint {
        return Err("source changed since checkpoint".to_string());
    }

    let records = &checkpoint.partial_records;
    if records.is_empty() || checkpoint.last_completed_index + 1 != records.len() {
        return Err(format!(
            "{} records for last index {}",
            records.len(),
            checkpoint.last_completed_index
        ));
    }
    if records.len() > snapshot.len() {
        return Err(format!(
            "{} records for {} units",
            records.len(),
            snapshot.len()
        ));
    }
    for (record, unit) in records.iter().zip(snapshot.units.iter()) {
        if record.unit_id != unit.id {
            return Err(format!(
                "record {} does not match unit {}",
                record.unit_id, unit.id
            ));
        }
        if record.vector.len() != expected_dimension {
            return Err(format!(
                "record {} has {} dimensions, provider returns {expected_dimension}",
                record.unit_id,
                record.vector.len()
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SOURCE: &str = "{\"id\":\"a\",\"text\":\"one\"}\n{\"id\":\"b\",\"text\":\"two\"}\n{\"id\":\"c\",\"text\":\"three\"}\n";

    fn snapshot(bytes: &str) -> SourceSnapshot {
        SourceSnapshot::from_bytes("papers".into(), "papers.jsonl".into(), bytes.as_bytes())
            .unwrap()
    }

    fn checkpoint_for(snapshot: &SourceSnapshot, ids: &[&str]) -> Checkpoint {
        Checkpoint {
            source_tag: snapshot.source_tag.clone(),
            source_fingerprint: snapshot.fingerprint.clone(),
            last_completed_index: ids.len() - 1,
            partial_records: ids
                .iter()
                .map(|id| EmbeddingRecord::new(*id, vec![1.0, 0.0]))
                .collect(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_resume_from_valid_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let snapshot = snapshot(SOURCE);
        store
            .save(&checkpoint_for(&snapshot, &["a", "b"]))
            .await
            .unwrap();

        match store.resume_point(&snapshot, 2).await {
            ResumePoint::Resume {
                next_index,
                records,
            } => {
                assert_eq!(next_index, 2);
                assert_eq!(records.len(), 2);
            }
            ResumePoint::Fresh => panic!("expected resume"),
        }
    }

    #[tokio::test]
    async fn test_changed_source_discards_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let old = snapshot(SOURCE);
        store.save(&checkpoint_for(&old, &["a"])).await.unwrap();

        let changed = snapshot("{\"id\":\"a\",\"text\":\"edited\"}\n");
        assert_eq!(store.resume_point(&changed, 2).await, ResumePoint::Fresh);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "{\"source_tag\": ").unwrap();
        let store = CheckpointStore::new(&path);

        assert!(matches!(
            store.load().await,
            Err(EmbeddingError::CorruptCheckpoint(_))
        ));
        assert_eq!(store.resume_point(&snapshot(SOURCE), 2).await, ResumePoint::Fresh);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_inconsistent_records_discarded() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let snapshot = snapshot(SOURCE);

        let mut wrong_order = checkpoint_for(&snapshot, &["b", "a"]);
        store.save(&wrong_order).await.unwrap();
        assert_eq!(store.resume_point(&snapshot, 2).await, ResumePoint::Fresh);

        wrong_order = checkpoint_for(&snapshot, &["a"]);
        wrong_order.last_completed_index = 5;
        store.save(&wrong_order).await.unwrap();
        assert_eq!(store.resume_point(&snapshot, 2).await, ResumePoint::Fresh);
    }

    #[tokio::test]
    async fn test_dimension_change_discards_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let snapshot = snapshot(SOURCE);
        store.save(&checkpoint_for(&snapshot, &["a"])).await.unwrap();

        assert_eq!(store.resume_point(&snapshot, 3).await, ResumePoint::Fresh);
    }

    #[tokio::test]
    async fn test_clear_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store.clear().await.unwrap();
    }
}
