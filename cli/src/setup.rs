//! Configuration loading and provider wiring shared by the commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use sct_embeddings::{
    CheckpointedEmbedder, EmbeddingProvider, EnvCredential, HttpEmbeddingProvider, IndexPipeline,
    IndexStore,
};
use sct_retrieval::{ChatCompletionsProvider, GenerationProvider, SctConfig};

const DEFAULT_CONFIG: &str = "sct.toml";

/// Load the TOML file, then apply `SCT_*` environment overrides.
///
/// An explicitly named file must exist; the default `sct.toml` is optional.
pub fn load_config(path: Option<&Path>) -> Result<SctConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

fn load_config_with<F>(path: Option<&Path>, lookup: F) -> Result<SctConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => SctConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG).exists() => SctConfig::from_file(DEFAULT_CONFIG)
            .with_context(|| format!("failed to load config {DEFAULT_CONFIG}"))?,
        None => {
            info!("No {DEFAULT_CONFIG} found; using built-in defaults");
            SctConfig::default()
        }
    };
    config
        .apply_overrides(lookup)
        .context("invalid SCT_* environment override")?;
    Ok(config)
}

pub fn embedding_provider(config: &SctConfig) -> Arc<dyn EmbeddingProvider> {
    let endpoint = config.embedding.endpoint.clone();
    let credential = Arc::new(EnvCredential::new(endpoint.api_key_env.clone()));
    Arc::new(HttpEmbeddingProvider::new(endpoint, credential))
}

pub fn generation_provider(config: &SctConfig) -> Arc<dyn GenerationProvider> {
    let credential = Arc::new(EnvCredential::new(config.generation.api_key_env.clone()));
    Arc::new(ChatCompletionsProvider::new(&config.generation, credential))
}

pub fn pipeline(config: &SctConfig) -> IndexPipeline {
    IndexPipeline::new(CheckpointedEmbedder::new(
        embedding_provider(config),
        IndexStore::new(&config.store_dir),
        config.embedding.run.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_file_with_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sct.toml");
        std::fs::write(&path, "store_dir = \"idx\"\n[query]\ntop_k_primary = 7\n").unwrap();

        let config = load_config_with(Some(&path), |key| {
            (key == "SCT_TOP_K_SECONDARY").then(|| "2".to_string())
        })
        .unwrap();

        assert_eq!(config.store_dir, Path::new("idx"));
        assert_eq!(config.query.top_k_primary, 7);
        assert_eq!(config.query.top_k_secondary, 2);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(load_config_with(Some(&missing), |_| None).is_err());
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sct.toml");
        std::fs::write(&path, "").unwrap();

        let err = load_config_with(Some(&path), |key| {
            (key == "SCT_TOP_K_PRIMARY").then(|| "many".to_string())
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("SCT_TOP_K_PRIMARY"));
    }
}
