//! # Retrieval
//!
//! Online half of SCT fusion: answer a question from the primary knowledge
//! index, and fold in binning research only when the question is about
//! binning.
//!
//! - **Intent**: boundary-aware binning classifier gating the secondary source
//! - **Fusion**: concurrent primary/secondary search, prompt assembly, and a
//!   low-temperature generation call
//! - **Follow-ups**: three suggested next questions
//! - **Config**: TOML file plus `SCT_*` environment overrides
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Fusion Engine                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  question ──► IntentClassifier ──► embed question            │
//! │                      │                    │                  │
//! │                      ▼                    ▼                  │
//! │           secondary (if binning)   primary top-k             │
//! │                      └─────────┬──────────┘                  │
//! │                                ▼                             │
//! │                  prompt ──► GenerationProvider               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sct_retrieval::{FusionEngine, SctConfig};
//!
//! let config = SctConfig::from_file("sct.toml")?;
//! let engine = FusionEngine::open(&config, embedder, generator).await?;
//! let response = engine.query("What is bin yield?", true).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod followups;
pub mod generation;
pub mod intent;
pub mod prompt;

pub use config::{
    EmbeddingConfig, GenerationConfig, QueryConfig, SctConfig, SourceConfig, SourcesConfig,
};
pub use engine::{
    FusionAnswer, FusionContext, FusionEngine, FusionEngineBuilder, QueryResponse, SecondaryStatus,
};
pub use error::{Result, RetrievalError};
pub use followups::parse_followups;
pub use generation::{ChatCompletionsProvider, CompletionRequest, GenerationProvider};
pub use intent::{IntentClassifier, IntentDecision, classify};
