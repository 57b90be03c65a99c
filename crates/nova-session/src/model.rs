//! Model wire envelope and the backend seam.
//!
//! Requests go out as `{contents, systemInstruction, generationConfig}`;
//! the reply text is read from `candidates[0].content.parts[0].text`,
//! stripped of code fences and decoded against the expected type.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::{Config, EndpointConfig};
use crate::error::{NovaError, Result};
use crate::fetch::{HttpTransport, RetryPolicy, RetryingClient};

/// JSON pointer to the reply text inside the response envelope.
const REPLY_TEXT_POINTER: &str = "/candidates/0/content/parts/0/text";

/// A prompt plus the schema its reply must follow.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    /// User prompt.
    pub prompt: String,
    /// System instruction.
    pub system_instruction: String,
    /// Response schema descriptor sent as `responseSchema`.
    pub expected_schema: Value,
}

impl ModelRequest {
    /// Builds the endpoint request body.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "contents": [{ "parts": [{ "text": self.prompt }] }],
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": self.expected_schema,
            },
        })
    }
}

/// Extracts the reply text from a response envelope.
///
/// # Errors
///
/// Returns `NovaError::ContentValidationError` when the path is missing
/// or not a string.
pub fn extract_text(envelope: &Value) -> Result<&str> {
    envelope
        .pointer(REPLY_TEXT_POINTER)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            let reason = envelope
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .map_or_else(String::new, |r| format!(" (finish reason: {r})"));
            NovaError::content(format!(
                "response has no candidates[0].content.parts[0].text{reason}"
            ))
        })
}

/// Removes a surrounding Markdown code fence, if any.
///
/// Handles a bare fence or one tagged with a language (e.g. `json`).
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an info string such as `json`, whether or not a newline follows.
    let body = inner.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    if body.trim_start().starts_with(['{', '[']) {
        body.trim()
    } else {
        inner.trim()
    }
}

/// Decodes reply text into `T` after stripping code fences.
///
/// # Errors
///
/// Returns `NovaError::ContentValidationError` on any shape mismatch.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T> {
    let body = strip_code_fences(text);
    serde_json::from_str(body)
        .map_err(|e| NovaError::content(format!("reply does not match the expected shape: {e}")))
}

/// Something that answers a [`ModelRequest`] with reply text.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Sends the request and returns the raw reply text.
    async fn generate(&self, request: &ModelRequest) -> Result<String>;
}

/// [`ModelBackend`] for a `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: RetryingClient,
    endpoint: EndpointConfig,
    api_key: Option<String>,
}

impl GeminiBackend {
    /// Creates a backend over an existing client.
    #[must_use]
    pub const fn new(client: RetryingClient, endpoint: EndpointConfig, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint,
            api_key,
        }
    }

    /// Creates an HTTP backend from configuration, reading the API key
    /// from the configured environment variable.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(config.request_timeout())?;
        let client = RetryingClient::new(Arc::new(transport), RetryPolicy::from(&config.retry));
        Ok(Self::new(
            client,
            config.endpoint.clone(),
            config.endpoint.api_key(),
        ))
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    async fn generate(&self, request: &ModelRequest) -> Result<String> {
        let payload = request.to_payload();
        debug!(
            model = %self.endpoint.model,
            prompt_chars = request.prompt.len(),
            "Sending model request"
        );
        let url = self.endpoint.generate_url(self.api_key.as_deref());
        let envelope = self.client.post(&url, &payload).await?;
        extract_text(&envelope).map(str::to_owned)
    }
}
