//! Checkpointed, throttled embedding of a whole source.
//!
//! Units are embedded one at a time in source order. Progress is saved every
//! `checkpoint_every` units so an interrupted run resumes where it stopped;
//! the finished index is committed to the [`IndexStore`] and the checkpoint
//! removed.

use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use sct_corpus::{KnowledgeUnit, SourceSnapshot};

use crate::checkpoint::{Checkpoint, CheckpointStore, ResumePoint};
use crate::error::{EmbeddingError, RemoteError, Result};
use crate::fingerprint::FingerprintRecord;
use crate::index::{EmbeddingRecord, KnowledgeIndex};
use crate::provider::EmbeddingProvider;
use crate::remote::{RetryPolicy, Throttle, call_with_retry};
use crate::similarity::is_finite;
use crate::store::IndexStore;

/// Configuration for embedding runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Ceiling on embedding calls per minute. Zero disables throttling.
    pub calls_per_minute: u32,

    /// Save progress after this many units.
    pub checkpoint_every: usize,

    /// Refresh credentials before every this-many-th unit. Zero disables.
    pub credential_refresh_every: usize,

    /// Deadline for a single embedding call.
    pub call_timeout_secs: u64,

    pub retry: RetryPolicy,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: 15,
            checkpoint_every: 10,
            credential_refresh_every: 500,
            call_timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct EmbeddingRun {
    /// One record per unit, in source order.
    pub records: Vec<EmbeddingRecord>,

    /// Units that received a zero-vector placeholder.
    pub degraded_ids: Vec<String>,

    /// Index of the first unit embedded by this run.
    pub resumed_from: usize,

    /// Units embedded by this run, excluding resumed ones.
    pub embedded: usize,

    /// The committed fingerprint.
    pub fingerprint: FingerprintRecord,
}

/// Embeds sources and commits the resulting indexes.
pub struct CheckpointedEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    store: IndexStore,
    config: EmbedderConfig,
}

impl CheckpointedEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: IndexStore,
        config: EmbedderConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Embed every unit of `snapshot` and commit the index.
    ///
    /// Holds an exclusive lock on the source for the whole run; a second run
    /// for the same source fails with [`EmbeddingError::Locked`]. A missing
    /// credential, or an authentication failure that survives a refresh,
    /// aborts the run and keeps the last checkpoint; other per-unit failures
    /// degrade that unit to a zero vector.
    pub async fn embed_all(&self, snapshot: &SourceSnapshot) -> Result<EmbeddingRun> {
        let source_tag = snapshot.source_tag.as_str();
        tokio::fs::create_dir_all(self.store.source_dir(source_tag)).await?;

        let lock_path = self.store.lock_path(source_tag);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        let mut lock = fd_lock::RwLock::new(lock_file);
        let _guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(EmbeddingError::Locked { path: lock_path });
            }
            Err(e) => return Err(e.into()),
        };

        let dimension = self.provider.dimension();
        let checkpoints = CheckpointStore::new(self.store.checkpoint_path(source_tag));
        let resume = checkpoints.resume_point(snapshot, dimension).await;
        let (resumed_from, mut records) = match resume {
            ResumePoint::Fresh => (0, Vec::with_capacity(snapshot.len())),
            ResumePoint::Resume {
                next_index,
                records,
            } => (next_index, records),
        };
        let mut degraded_ids: Vec<String> = records
            .iter()
            .filter(|r| r.degraded)
            .map(|r| r.unit_id.clone())
            .collect();

        info!(
            source_tag,
            units = snapshot.len(),
            resumed_from,
            provider = self.provider.name(),
            "starting embedding run"
        );

        let throttle = Throttle::from_calls_per_minute(self.config.calls_per_minute);
        let checkpoint_every = self.config.checkpoint_every.max(1);

        for (index, unit) in snapshot.units.iter().enumerate().skip(resumed_from) {
            if self.refresh_due(index) {
                self.refresh_credentials(index).await?;
            }

            let record = self.embed_unit(unit, &throttle).await?;
            if record.degraded {
                degraded_ids.push(record.unit_id.clone());
            }
            records.push(record);

            if (index + 1) % checkpoint_every == 0 {
                checkpoints
                    .save(&Checkpoint {
                        source_tag: source_tag.to_string(),
                        source_fingerprint: snapshot.fingerprint.clone(),
                        last_completed_index: index,
                        partial_records: records.clone(),
                        saved_at: Utc::now(),
                    })
                    .await?;
                info!("embedded {}/{} units of {source_tag}", index + 1, snapshot.len());
            }
        }

        let index = match KnowledgeIndex::build(source_tag, &snapshot.units, records.clone()) {
            Ok(index) => index,
            Err(e) => {
                error!("discarding progress for {source_tag}: {e}");
                checkpoints.clear().await?;
                return Err(e);
            }
        };
        let fingerprint = self.store.commit(&index, &snapshot.fingerprint).await?;
        checkpoints.clear().await?;

        if !degraded_ids.is_empty() {
            warn!(
                source_tag,
                degraded = degraded_ids.len(),
                "index committed with zero-vector placeholders"
            );
        }

        Ok(EmbeddingRun {
            records,
            degraded_ids,
            resumed_from,
            embedded: snapshot.len().saturating_sub(resumed_from),
            fingerprint,
        })
    }

    fn refresh_due(&self, index: usize) -> bool {
        let every = self.config.credential_refresh_every;
        every > 0 && index > 0 && index % every == 0
    }

    async fn refresh_credentials(&self, index: usize) -> Result<()> {
        info!("refreshing credentials before unit {index}");
        match self.provider.refresh_credentials().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_credential_failure() => Err(e.into()),
            Err(e) => {
                warn!("credential refresh failed, continuing with current credential: {e}");
                Ok(())
            }
        }
    }

    /// Embed one unit, substituting a zero vector when retries run out.
    async fn embed_unit(
        &self,
        unit: &KnowledgeUnit,
        throttle: &Throttle,
    ) -> Result<EmbeddingRecord> {
        let provider = self.provider.as_ref();
        let dimension = provider.dimension();
        let text = unit.text.as_str();

        let outcome = call_with_retry(
            &self.config.retry,
            throttle,
            Duration::from_secs(self.config.call_timeout_secs),
            move || async move {
                let vector = provider.embed(text).await?;
                if vector.len() != dimension {
                    return Err(RemoteError::InvalidResponse(format!(
                        "expected {dimension} dimensions, got {}",
                        vector.len()
                    )));
                }
                if !is_finite(&vector) {
                    return Err(RemoteError::InvalidResponse(
                        "vector contains non-finite values".to_string(),
                    ));
                }
                Ok(vector)
            },
            move || provider.refresh_credentials(),
        )
        .await;

        match outcome {
            Ok(vector) => Ok(EmbeddingRecord::new(unit.id.clone(), vector)),
            Err(e) if e.is_credential_failure() => {
                error!(unit_id = %unit.id, "no usable credential, aborting run: {e}");
                Err(e.into())
            }
            Err(e) => {
                warn!(unit_id = %unit.id, error = %e, "embedding failed, using zero vector");
                Ok(EmbeddingRecord::degraded(unit.id.clone(), dimension))
            }
        }
    }
}
