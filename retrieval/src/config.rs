//! Configuration for SCT fusion.
//!
//! Values come from defaults, then an optional TOML file, then `SCT_*`
//! environment variables. Components receive the sections they need in their
//! constructors.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use sct_embeddings::{EmbedderConfig, HttpEmbeddingConfig, RetryPolicy};

use crate::error::{Result, RetrievalError};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SctConfig {
    /// Knowledge sources to index.
    pub sources: SourcesConfig,

    /// Directory holding committed indexes.
    pub store_dir: PathBuf,

    /// Embedding endpoint and run settings.
    pub embedding: EmbeddingConfig,

    /// Generation endpoint settings.
    pub generation: GenerationConfig,

    /// Query processing configuration.
    pub query: QueryConfig,
}

impl Default for SctConfig {
    fn default() -> Self {
        Self {
            sources: SourcesConfig::default(),
            store_dir: PathBuf::from("data/index"),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

/// One JSON-lines knowledge source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Tag naming the source in the index store.
    pub tag: String,

    /// Path of the JSON-lines file.
    pub path: PathBuf,
}

/// The always-on primary source and the conditionally activated secondary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub primary: SourceConfig,
    pub secondary: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            primary: SourceConfig {
                tag: "ontology".to_string(),
                path: PathBuf::from("data/ontology_units.jsonl"),
            },
            secondary: SourceConfig {
                tag: "papers".to_string(),
                path: PathBuf::from("data/paper_chunks.jsonl"),
            },
        }
    }
}

/// Embedding endpoint plus batch run settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: HttpEmbeddingConfig,
    pub run: EmbedderConfig,
}

/// Chat-completions endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// API base URL, without the `/chat/completions` suffix.
    pub base_url: String,

    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Sampling temperature for answers.
    pub temperature: f32,

    /// Sampling temperature for follow-up suggestions.
    pub followup_temperature: f32,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.15,
            followup_temperature: 0.3,
            request_timeout_secs: 60,
            retry: RetryPolicy::default(),
        }
    }
}

/// Configuration for query processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Results taken from the primary source.
    pub top_k_primary: usize,

    /// Results taken from the secondary source when activated.
    pub top_k_secondary: usize,

    /// Hard cap on each retrieved text, in characters.
    pub max_context_chars: usize,

    /// Cap on answer length in words. `0` in a file or the environment
    /// means no cap.
    pub max_answer_words: Option<usize>,

    /// Times an over-long answer is sent back for a shorter one before it is
    /// cut.
    pub length_retries: u32,

    /// Deadline for embedding the question.
    pub embed_timeout_secs: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k_primary: 3,
            top_k_secondary: 5,
            max_context_chars: 1200,
            max_answer_words: Some(200),
            length_retries: 1,
            embed_timeout_secs: 30,
        }
    }
}

impl SctConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(input).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.query.max_answer_words = config.query.max_answer_words.filter(|&w| w > 0);
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&input)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SCT_*` overrides obtained through `lookup`, then validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SCT_TOP_K_PRIMARY") {
            self.query.top_k_primary = parse("SCT_TOP_K_PRIMARY", &v)?;
        }
        if let Some(v) = get("SCT_TOP_K_SECONDARY") {
            self.query.top_k_secondary = parse("SCT_TOP_K_SECONDARY", &v)?;
        }
        if let Some(v) = get("SCT_MAX_CONTEXT_CHARS") {
            self.query.max_context_chars = parse("SCT_MAX_CONTEXT_CHARS", &v)?;
        }
        if let Some(v) = get("SCT_MAX_ANSWER_WORDS") {
            let words: usize = parse("SCT_MAX_ANSWER_WORDS", &v)?;
            self.query.max_answer_words = (words > 0).then_some(words);
        }
        if let Some(v) = get("SCT_LENGTH_RETRIES") {
            self.query.length_retries = parse("SCT_LENGTH_RETRIES", &v)?;
        }
        if let Some(v) = get("SCT_TEMPERATURE") {
            self.generation.temperature = parse("SCT_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("SCT_FOLLOWUP_TEMPERATURE") {
            self.generation.followup_temperature = parse("SCT_FOLLOWUP_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("SCT_CHECKPOINT_EVERY") {
            self.embedding.run.checkpoint_every = parse("SCT_CHECKPOINT_EVERY", &v)?;
        }
        if let Some(v) = get("SCT_CREDENTIAL_REFRESH_EVERY") {
            self.embedding.run.credential_refresh_every =
                parse("SCT_CREDENTIAL_REFRESH_EVERY", &v)?;
        }
        if let Some(v) = get("SCT_CALLS_PER_MINUTE") {
            self.embedding.run.calls_per_minute = parse("SCT_CALLS_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("SCT_API_BASE_URL") {
            self.embedding.endpoint.base_url = v.clone();
            self.generation.base_url = v;
        }
        if let Some(v) = get("SCT_API_KEY_ENV") {
            self.embedding.endpoint.api_key_env = v.clone();
            self.generation.api_key_env = v;
        }
        if let Some(v) = get("SCT_EMBEDDING_MODEL") {
            self.embedding.endpoint.model = v;
        }
        if let Some(v) = get("SCT_EMBEDDING_DIMENSION") {
            self.embedding.endpoint.dimension = parse("SCT_EMBEDDING_DIMENSION", &v)?;
        }
        if let Some(v) = get("SCT_GENERATION_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = get("SCT_STORE_DIR") {
            self.store_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SCT_PRIMARY_SOURCE") {
            self.sources.primary.path = PathBuf::from(v);
        }
        if let Some(v) = get("SCT_SECONDARY_SOURCE") {
            self.sources.secondary.path = PathBuf::from(v);
        }

        self.validate()
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.query.top_k_primary == 0 {
            return Err(RetrievalError::Config(
                "top_k_primary must be at least 1".to_string(),
            ));
        }
        if self.query.max_context_chars == 0 {
            return Err(RetrievalError::Config(
                "max_context_chars must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("temperature", self.generation.temperature),
            ("followup_temperature", self.generation.followup_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                return Err(RetrievalError::Config(format!(
                    "{name} must be between 0 and 2, got {value}"
                )));
            }
        }
        if self.embedding.endpoint.dimension == 0 {
            return Err(RetrievalError::Config(
                "embedding dimension must be at least 1".to_string(),
            ));
        }
        if self.sources.primary.tag == self.sources.secondary.tag {
            return Err(RetrievalError::Config(format!(
                "primary and secondary sources share the tag {}",
                self.sources.primary.tag
            )));
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RetrievalError::Config(format!("{key}={value}: {e}")))
}
