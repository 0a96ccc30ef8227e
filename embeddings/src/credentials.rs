//! API credentials for remote providers.
//!
//! Credentials are short-lived: a [`CachedCredential`] holds the current token
//! and re-fetches it from its [`CredentialSource`] on demand.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::RemoteError;

/// Somewhere a bearer token can be obtained from.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Obtain a current token.
    async fn fetch(&self) -> Result<String, RemoteError>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticCredential(String);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialSource for StaticCredential {
    async fn fetch(&self) -> Result<String, RemoteError> {
        Ok(self.0.clone())
    }
}

/// A token read from an environment variable on every fetch.
///
/// Rotating the variable between refreshes picks up the new value.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvCredential {
    async fn fetch(&self) -> Result<String, RemoteError> {
        match std::env::var(&self.var) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            _ => Err(RemoteError::NotConfigured(format!(
                "environment variable {} is not set",
                self.var
            ))),
        }
    }
}

/// Caches the token from a source until refreshed.
pub struct CachedCredential {
    source: Arc<dyn CredentialSource>,
    token: RwLock<Option<String>>,
}

impl CachedCredential {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            token: RwLock::new(None),
        }
    }

    /// Current token, fetching one if none is cached.
    pub async fn token(&self) -> Result<String, RemoteError> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.refresh().await?;
        self.token
            .read()
            .await
            .clone()
            .ok_or_else(|| RemoteError::NotConfigured("credential unavailable".to_string()))
    }

    /// Replace the cached token with a freshly fetched one.
    pub async fn refresh(&self) -> Result<(), RemoteError> {
        let token = self.source.fetch().await?;
        *self.token.write().await = Some(token);
        debug!("credential refreshed");
        Ok(())
    }
}
