//! Configuration types for NovaScholar.
//!
//! This module provides the structures that control where exams are
//! generated and graded, how transient endpoint failures are retried,
//! and where local state is kept.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NovaError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "novascholar.json";

/// Default model endpoint base URL.
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

/// Default model name.
fn default_model() -> String {
    "gemini-2.5-flash-preview-09-2025".to_string()
}

/// Default environment variable holding the API key.
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

/// Default maximum attempts per request.
const fn default_max_attempts() -> u32 {
    3
}

/// Default base backoff delay in milliseconds.
const fn default_base_delay_ms() -> u64 {
    1000
}

/// Default upper bound of backoff jitter in milliseconds.
const fn default_max_jitter_ms() -> u64 {
    1000
}

/// Default per-request timeout in seconds.
const fn default_request_timeout_secs() -> u64 {
    120
}

/// Default directory for persisted local state.
fn default_data_dir() -> String {
    ".novascholar".to_string()
}

/// Default multiplier applied to the time budget under extended time.
const fn default_extended_time_factor() -> f64 {
    1.5
}

/// Main configuration for NovaScholar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Model endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Retry policy for endpoint calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Timeout for a single HTTP attempt in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Directory holding settings, the session snapshot and history.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Time budget multiplier when the extended-time accommodation is on.
    #[serde(default = "default_extended_time_factor")]
    pub extended_time_factor: f64,

    /// Whether starting an exam requires a topic focus.
    #[serde(default)]
    pub require_topic: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            retry: RetryConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            data_dir: default_data_dir(),
            extended_time_factor: default_extended_time_factor(),
            require_topic: false,
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `novascholar.json` in the current directory. If not found,
    /// returns the default configuration.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            NovaError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `novascholar.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `NovaError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `NovaError::ConfigValidationError` if the configuration values
    /// are invalid (e.g., zero attempts, empty model name).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(NovaError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| NovaError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(NovaError::config_validation(
                "retry.maxAttempts must be greater than 0",
                "Set retry.maxAttempts to at least 1 in your novascholar.json",
            ));
        }

        if self.request_timeout_secs == 0 {
            return Err(NovaError::config_validation(
                "requestTimeoutSecs must be greater than 0",
                "Set requestTimeoutSecs to at least 1 second in your novascholar.json",
            ));
        }

        if !self.extended_time_factor.is_finite() || self.extended_time_factor < 1.0 {
            return Err(NovaError::config_validation(
                format!(
                    "extendedTimeFactor must be at least 1.0 (got {})",
                    self.extended_time_factor
                ),
                "Set extendedTimeFactor to 1.5 for the standard time-and-a-half accommodation",
            ));
        }

        if self.endpoint.base_url.trim().is_empty() {
            return Err(NovaError::config_validation(
                "endpoint.baseUrl must not be empty",
                "Provide the model endpoint base URL in your novascholar.json",
            ));
        }

        if self.endpoint.model.trim().is_empty() {
            return Err(NovaError::config_validation(
                "endpoint.model must not be empty",
                "Provide a model name, e.g. \"gemini-2.5-flash-preview-09-2025\"",
            ));
        }

        if self.data_dir.trim().is_empty() {
            return Err(NovaError::config_validation(
                "dataDir must not be empty",
                "Provide a data directory path in your novascholar.json (use '.novascholar' for the default)",
            ));
        }

        Ok(())
    }

    /// Returns the data directory as a path.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Returns the per-attempt HTTP timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Model endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Base URL; the model path is appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable the API key is read from.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EndpointConfig {
    /// Returns the full `generateContent` URL for the configured model.
    ///
    /// The key, when present, is passed as a query parameter.
    #[must_use]
    pub fn generate_url(&self, api_key: Option<&str>) -> String {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{base}/models/{}:generateContent", self.model);
        match api_key {
            Some(key) if !key.is_empty() => format!("{url}?key={key}"),
            _ => url,
        }
    }

    /// Reads the API key from the configured environment variable.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

/// Retry policy for endpoint calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; attempt `n` (0-based) waits `base * 2^n` plus jitter.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}
