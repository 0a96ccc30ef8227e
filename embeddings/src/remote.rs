//! Retry, throttling and status classification for remote calls.
//!
//! Every call to an embedding or generation API goes through
//! [`call_with_retry`]: it waits on the [`Throttle`], applies a per-call
//! deadline and lets the [`RetryPolicy`] decide what happens after a failure.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RemoteError;

impl RemoteError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> Self {
        match status {
            401 | 403 => RemoteError::Auth(format!("HTTP {status}: {body}")),
            429 => RemoteError::RateLimited { retry_after_secs },
            408 => RemoteError::TransientNetwork(format!("HTTP {status}: request timeout")),
            500..=599 => RemoteError::TransientNetwork(format!("HTTP {status}: {body}")),
            _ => RemoteError::Api {
                status,
                message: body.to_string(),
            },
        }
    }

    /// Classify a transport-level failure.
    pub fn from_transport(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(timeout)
        } else if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::TransientNetwork(err.to_string())
        }
    }

    /// Whether another attempt might succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::RateLimited { .. }
                | RemoteError::TransientNetwork(_)
                | RemoteError::Timeout(_)
                | RemoteError::InvalidResponse(_)
        )
    }

    /// Whether no usable credential could be presented.
    pub fn is_credential_failure(&self) -> bool {
        matches!(self, RemoteError::Auth(_) | RemoteError::NotConfigured(_))
    }
}

/// Parse a `Retry-After` header given in seconds.
pub fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait, then try again.
    RetryAfter(Duration),

    /// Refresh credentials once, then try again.
    RefreshCredentials,

    /// Stop and surface the error.
    GiveUp,
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,

    /// Backoff after the first failure.
    pub base_backoff_ms: u64,

    /// Upper bound on any single backoff.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Decide what follows a failure.
    ///
    /// `attempt` counts attempts made so far. Authentication failures get one
    /// credential refresh and do not consume the attempt budget. Rate limits
    /// wait at least `min_interval` and at least what the server asked for.
    pub fn decide(
        &self,
        error: &RemoteError,
        attempt: u32,
        credentials_refreshed: bool,
        min_interval: Duration,
    ) -> RetryDecision {
        match error {
            RemoteError::Auth(_) if !credentials_refreshed => RetryDecision::RefreshCredentials,
            RemoteError::Auth(_) | RemoteError::Api { .. } | RemoteError::NotConfigured(_) => {
                RetryDecision::GiveUp
            }
            _ if attempt >= self.max_attempts => RetryDecision::GiveUp,
            RemoteError::RateLimited { retry_after_secs } => {
                let requested = Duration::from_secs(retry_after_secs.unwrap_or(0));
                RetryDecision::RetryAfter(requested.max(min_interval).max(self.backoff(attempt)))
            }
            _ => RetryDecision::RetryAfter(self.backoff(attempt)),
        }
    }
}

/// Spaces remote calls to stay under a calls-per-minute ceiling.
///
/// The wait happens before every call, retries included, so the ceiling holds
/// across the whole process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    interval: Duration,
}

impl Throttle {
    /// Throttle for the given rate. Zero disables throttling.
    pub fn from_calls_per_minute(calls_per_minute: u32) -> Self {
        let interval = if calls_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / calls_per_minute
        };
        Self { interval }
    }

    /// A throttle that never waits.
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
        }
    }

    /// Interval between calls.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait out one interval.
    pub async fn wait(&self) {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Run a remote call under throttling, a deadline and the retry policy.
///
/// `refresh` runs at most once per call, after the first authentication
/// failure. A failing refresh ends the call with an authentication error.
pub async fn call_with_retry<T, Call, CallFut, Refresh, RefreshFut>(
    policy: &RetryPolicy,
    throttle: &Throttle,
    timeout: Duration,
    mut call: Call,
    mut refresh: Refresh,
) -> Result<T, RemoteError>
where
    Call: FnMut() -> CallFut,
    CallFut: Future<Output = Result<T, RemoteError>>,
    Refresh: FnMut() -> RefreshFut,
    RefreshFut: Future<Output = Result<(), RemoteError>>,
{
    let mut attempt = 0u32;
    let mut refreshed = false;

    loop {
        throttle.wait().await;
        attempt += 1;

        let result = match tokio::time::timeout(timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match policy.decide(&error, attempt, refreshed, throttle.interval()) {
            RetryDecision::RetryAfter(delay) => {
                warn!(attempt, ?delay, error = %error, "remote call failed, retrying");
                tokio::time::sleep(delay).await;
            }
            RetryDecision::RefreshCredentials => {
                debug!("authentication rejected, refreshing credentials");
                refreshed = true;
                refresh().await.map_err(|e| match e {
                    RemoteError::Auth(_) | RemoteError::NotConfigured(_) => e,
                    other => RemoteError::Auth(format!("credential refresh failed: {other}")),
                })?;
            }
            RetryDecision::GiveUp => return Err(error),
        }
    }
}
