//! # Embeddings
//!
//! Offline half of SCT fusion: turn knowledge sources into searchable vector
//! indexes, and keep them current.
//!
//! ## Features
//!
//! - **Remote calls**: one error taxonomy, bounded retry with backoff, and a
//!   calls-per-minute throttle shared by embedding and generation providers
//! - **Checkpointed embedding**: resumable runs with credential refresh and
//!   zero-vector degradation for units that cannot be embedded
//! - **Change detection**: SHA-256 fingerprints decide when to rebuild
//! - **Exact search**: flat inner-product index over normalized vectors
//! - **Atomic commits**: generation directories behind a fingerprint file
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Embeddings System                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  SourceSnapshot ──► CheckpointedEmbedder ──► IndexStore::commit  │
//! │        │                   │                        │            │
//! │        ▼                   ▼                        ▼            │
//! │  ChangeDetector     EmbeddingProvider         KnowledgeIndex     │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod checkpoint;
pub mod credentials;
pub mod embedder;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod pipeline;
pub mod provider;
pub mod remote;
pub mod similarity;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use checkpoint::{Checkpoint, CheckpointStore, ResumePoint};
pub use credentials::{CachedCredential, CredentialSource, EnvCredential, StaticCredential};
pub use embedder::{CheckpointedEmbedder, EmbedderConfig, EmbeddingRun};
pub use error::{EmbeddingError, RemoteError, Result};
pub use fingerprint::{ChangeDetector, FingerprintRecord, IndexStatus};
pub use index::{EmbeddingRecord, Hit, IndexedDocument, KnowledgeIndex, RetrievalResult, VectorIndex};
pub use pipeline::{IndexPipeline, RefreshOutcome};
pub use provider::{EmbeddingProvider, HttpEmbeddingConfig, HttpEmbeddingProvider};
pub use remote::{RetryDecision, RetryPolicy, Throttle, call_with_retry};
pub use store::IndexStore;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
