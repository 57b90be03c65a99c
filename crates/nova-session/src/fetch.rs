//! Retrying fetch client for the model endpoint.
//!
//! [`RetryingClient::send`] posts a JSON payload and retries network
//! failures and non-success statuses with exponential backoff plus
//! bounded jitter. A 2xx reply whose body is not JSON is a content
//! problem and is returned immediately. The client never touches session
//! state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{NovaError, Result, TransportErrorKind};

/// Longest slice of an error body kept in messages.
const MAX_ERROR_BODY: usize = 300;

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// No status was received (connection, DNS, TLS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },

    /// A success status whose body is not JSON.
    #[error("response body is not JSON: {0}")]
    InvalidBody(String),
}

impl AttemptError {
    /// Classifies the failure for the terminal error.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Network(_) | Self::InvalidBody(_) => TransportErrorKind::Network,
            Self::Status { status, .. } => TransportErrorKind::from_status(*status),
        }
    }

    /// Returns `true` if another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidBody(_))
    }
}

/// One JSON-in, JSON-out POST.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Posts `payload` to `url` and returns the decoded JSON body.
    async fn post_json(&self, url: &str, payload: &Value) -> std::result::Result<Value, AttemptError>;
}

/// [`Transport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose attempts time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                NovaError::config_validation(
                    format!("cannot build HTTP client: {e}"),
                    "Check the system TLS configuration",
                )
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(&self, url: &str, payload: &Value) -> std::result::Result<Value, AttemptError> {
        // URLs may carry the API key; keep them out of error text.
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| AttemptError::Network(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError::Status {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Network(e.without_url().to_string()))?;
        serde_json::from_str(&text).map_err(|e| AttemptError::InvalidBody(e.to_string()))
    }
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Backoff schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled for each later one.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`:
    /// `base * 2^attempt + jitter`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let backoff = self.base_delay.saturating_mul(factor);
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        backoff.saturating_add(jitter)
    }
}

/// Posts to the model endpoint, retrying transient failures.
#[derive(Clone)]
pub struct RetryingClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingClient")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingClient {
    /// Creates a client over any transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Returns the backoff policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends with the policy's attempt limit.
    pub async fn post(&self, url: &str, payload: &Value) -> Result<Value> {
        self.send(url, payload, self.policy.max_attempts).await
    }

    /// Posts `payload` to `url`, making at most `max_attempts` attempts.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::TransportError` carrying the last cause once
    /// every attempt has failed, or `NovaError::ContentValidationError`
    /// as soon as a success status carries a non-JSON body.
    pub async fn send(&self, url: &str, payload: &Value, max_attempts: u32) -> Result<Value> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.transport.post_json(url, payload).await {
                Ok(body) => {
                    debug!(attempt, "Model endpoint request succeeded");
                    return Ok(body);
                }
                Err(err) if !err.is_transient() => {
                    return Err(NovaError::content(err.to_string()));
                }
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, max_attempts, error = %err, "Model endpoint request failed; giving up");
                    return Err(NovaError::transport(attempt, err.kind(), err.to_string()));
                }
                Err(err) => {
                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Model endpoint request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
