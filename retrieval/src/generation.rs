//! Text generation providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sct_embeddings::remote::retry_after_secs;
use sct_embeddings::{CachedCredential, CredentialSource, RemoteError};

use crate::config::GenerationConfig;

/// One chat completion: system instructions, user message, temperature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// Trait for generation providers.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Generate a completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError>;

    /// Obtain a fresh credential.
    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// OpenAI-compatible `/chat/completions` provider.
pub struct ChatCompletionsProvider {
    base_url: String,
    model: String,
    timeout: Duration,
    credential: CachedCredential,
    client: reqwest::Client,
}

impl ChatCompletionsProvider {
    pub fn new(config: &GenerationConfig, source: Arc<dyn CredentialSource>) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.request_timeout_secs),
            credential: CachedCredential::new(source),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl GenerationProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, RemoteError> {
        let api_key = self.credential.token().await?;

        debug!(
            "Requesting completion with model {} at temperature {}",
            self.model, request.temperature
        );

        let body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user}
            ]
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::from_transport(&e, self.timeout))?;

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

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(RemoteError::InvalidResponse(
                "completion has no content".to_string(),
            ));
        }

        Ok(content)
    }

    async fn refresh_credentials(&self) -> Result<(), RemoteError> {
        self.credential.refresh().await
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
