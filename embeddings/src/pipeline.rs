//! Rebuild a source's index only when its content changed.

use std::path::Path;

use tracing::info;

use sct_corpus::SourceSnapshot;

use crate::embedder::{CheckpointedEmbedder, EmbeddingRun};
use crate::error::{EmbeddingError, Result};
use crate::fingerprint::{ChangeDetector, FingerprintRecord, IndexStatus};

/// Result of [`IndexPipeline::refresh`].
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The committed index already matches the source.
    UpToDate(FingerprintRecord),

    /// The source was embedded and a new generation committed.
    Rebuilt(EmbeddingRun),
}

/// Change detection in front of a [`CheckpointedEmbedder`].
pub struct IndexPipeline {
    detector: ChangeDetector,
    embedder: CheckpointedEmbedder,
}

impl IndexPipeline {
    pub fn new(embedder: CheckpointedEmbedder) -> Self {
        Self {
            detector: ChangeDetector::new(embedder.store().clone()),
            embedder,
        }
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    /// Re-embed `path` under `source_tag` if it changed, or unconditionally
    /// when `force` is set.
    pub async fn refresh(
        &self,
        source_tag: &str,
        path: &Path,
        force: bool,
    ) -> Result<RefreshOutcome> {
        if !force && self.detector.status(source_tag, path).await? == IndexStatus::Fresh {
            let record = self
                .embedder
                .store()
                .read_fingerprint(source_tag)
                .await?
                .ok_or_else(|| EmbeddingError::IndexMissing {
                    source_tag: source_tag.to_string(),
                })?;
            info!(source_tag, generation = %record.generation, "index up to date");
            return Ok(RefreshOutcome::UpToDate(record));
        }

        let snapshot = SourceSnapshot::load(source_tag, path)?;
        let run = self.embedder.embed_all(&snapshot).await?;
        Ok(RefreshOutcome::Rebuilt(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbedderConfig;
    use crate::store::IndexStore;
    use crate::testing::VocabularyEmbedder;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir, provider: Arc<VocabularyEmbedder>) -> IndexPipeline {
        let config = EmbedderConfig {
            calls_per_minute: 0,
            ..EmbedderConfig::default()
        };
        IndexPipeline::new(CheckpointedEmbedder::new(
            provider,
            IndexStore::new(dir.path().join("store")),
            config,
        ))
    }

    #[tokio::test]
    async fn test_unchanged_source_is_not_re_embedded() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("ontology.jsonl");
        std::fs::write(
            &source,
            "{\"id\":\"c1\",\"text\":\"bin map\"}\n{\"id\":\"c2\",\"text\":\"wafer sort\"}\n",
        )
        .unwrap();

        let provider = Arc::new(VocabularyEmbedder::new(["bin", "map", "wafer", "sort"]));
        let pipeline = pipeline(&dir, provider.clone());

        let first = pipeline.refresh("ontology", &source, false).await.unwrap();
        assert!(matches!(first, RefreshOutcome::Rebuilt(_)));
        assert_eq!(provider.calls(), 2);

        let second = pipeline.refresh("ontology", &source, false).await.unwrap();
        assert!(matches!(second, RefreshOutcome::UpToDate(_)));
        assert_eq!(provider.calls(), 2);

        let forced = pipeline.refresh("ontology", &source, true).await.unwrap();
        assert!(matches!(forced, RefreshOutcome::Rebuilt(_)));
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_changed_source_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("papers.jsonl");
        std::fs::write(&source, "{\"id\":\"p1\",\"text\":\"bin yield\"}\n").unwrap();

        let provider = Arc::new(VocabularyEmbedder::new(["bin", "yield"]));
        let pipeline = pipeline(&dir, provider);
        pipeline.refresh("papers", &source, false).await.unwrap();

        std::fs::write(
            &source,
            "{\"id\":\"p1\",\"text\":\"bin yield\"}\n{\"id\":\"p2\",\"text\":\"yield\"}\n",
        )
        .unwrap();
        assert!(pipeline.detector().needs_update("papers", &source).await.unwrap());

        match pipeline.refresh("papers", &source, false).await.unwrap() {
            RefreshOutcome::Rebuilt(run) => assert_eq!(run.fingerprint.unit_count, 2),
            RefreshOutcome::UpToDate(_) => panic!("expected rebuild"),
        }
        assert!(!pipeline.detector().needs_update("papers", &source).await.unwrap());
    }
}
