//! Embedding providers.
//!
//! [`HttpEmbeddingProvider`] speaks the OpenAI-compatible `/embeddings`
//! protocol. Providers classify failures into [`RemoteError`] and leave
//! retrying to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::credentials::{CachedCredential, CredentialSource};
use crate::error::RemoteError;
use crate::remote::retry_after_secs;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Embedding, RemoteError>;

    /// Obtain a fresh credential.
    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// Settings for an OpenAI-compatible embedding endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpEmbeddingConfig {
    /// API base URL, without the `/embeddings` suffix.
    pub base_url: String,

    /// Model name sent with every request.
    pub model: String,

    /// Expected vector length.
    pub dimension: usize,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for HttpEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// OpenAI-compatible embedding provider.
pub struct HttpEmbeddingProvider {
    config: HttpEmbeddingConfig,
    credential: CachedCredential,
    client: reqwest::Client,
}

impl HttpEmbeddingProvider {
    /// Create a provider drawing its token from `source`.
    pub fn new(config: HttpEmbeddingConfig, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            config,
            credential: CachedCredential::new(source),
            client: reqwest::Client::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding, RemoteError> {
        let api_key = self.credential.token().await?;

        debug!("Generating embedding with model: {}", self.config.model);

        let body = serde_json::json!({
            "input": text,
            "model": self.config.model,
            "encoding_format": "float"
        });

        let response = self
            .client
            .post(format!(
                "{}/embeddings",
                self.config.base_url.trim_end_matches('/')
            ))
            .bearer_auth(api_key)
            .timeout(self.timeout())
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::from_transport(&e, self.timeout()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            return Err(RemoteError::from_status(
                status.as_u16(),
                retry_after,
                &error_text,
            ));
        }

        let result: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::InvalidResponse("no embedding in response".to_string()))?
            .embedding;

        if embedding.len() != self.config.dimension {
            return Err(RemoteError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                self.config.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        self.credential.refresh().await
    }
}

/// `/embeddings` response format.
#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredential;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, dimension: usize) -> HttpEmbeddingProvider {
        HttpEmbeddingProvider::new(
            HttpEmbeddingConfig {
                base_url: server.uri(),
                model: "test-model".to_string(),
                dimension,
                api_key_env: String::new(),
                request_timeout_secs: 5,
            },
            Arc::new(StaticCredential::new("secret")),
        )
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}],
                "model": "test-model"
            })))
            .mount(&server)
            .await;

        let embedding = provider(&server, 3).embed("bin yield").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
            .mount(&server)
            .await;

        let err = provider(&server, 3).embed("x").await.unwrap_err();
        assert_eq!(
            err,
            RemoteError::RateLimited {
                retry_after_secs: Some(12)
            }
        );
    }

    #[tokio::test]
    async fn test_unauthorized_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("expired token"))
            .mount(&server)
            .await;

        let err = provider(&server, 3).embed("x").await.unwrap_err();
        assert!(matches!(err, RemoteError::Auth(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = provider(&server, 3).embed("x").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2]}]
            })))
            .mount(&server)
            .await;

        let err = provider(&server, 3).embed("x").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = provider(&server, 3).embed("x").await.unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }
}
