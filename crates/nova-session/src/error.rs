//! Error types for the NovaScholar session crate.
//!
//! This module defines the error hierarchy for every session operation,
//! from configuration loading through model calls, response validation,
//! state transitions and history persistence.

use std::path::PathBuf;

/// A specialized `Result` type for NovaScholar session operations.
pub type Result<T> = std::result::Result<T, NovaError>;

/// Errors that can occur while running an exam session.
///
/// Variants are organized by subsystem and include actionable suggestions
/// where possible.
#[derive(Debug, thiserror::Error)]
pub enum NovaError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// `novascholar.json` could not be read or is not valid JSON.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your novascholar.json with a JSON linter")]
    ConfigParseError {
        /// File that failed to load.
        path: PathBuf,
        /// What the parser reported.
        message: String,
    },

    /// A configuration value is out of range or missing.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Which value is wrong.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Model Endpoint Errors
    // ========================================================================
    /// Network failure or non-success HTTP status after exhausting retries.
    #[error("Request to the model endpoint failed after {attempts} attempt(s) ({kind}): {message}\n\nSuggestion: {suggestion}")]
    TransportError {
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Classification of the last failure.
        kind: TransportErrorKind,
        /// The last underlying cause.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    /// The model replied, but not with content matching the expected schema.
    #[error("The model returned unusable content: {message}\n\nSuggestion: Try the request again; malformed replies are not retried automatically")]
    ContentValidationError {
        /// What was malformed or missing.
        message: String,
    },

    // ========================================================================
    // Local Precondition Errors
    // ========================================================================
    /// A local precondition failed before any network call was made.
    #[error("{message}\n\nSuggestion: {suggestion}")]
    ValidationError {
        /// Description of the failed precondition.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// The session cannot make the requested move from its current status.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// Status or operation that was requested.
        to: String,
    },

    /// A response arrived for a request the session no longer waits on.
    #[error("Discarded stale {operation} response: the session has moved on")]
    StaleResponse {
        /// Which request the response belonged to ("generation" or "grading").
        operation: String,
    },

    // ========================================================================
    // History Errors
    // ========================================================================
    /// No history entry exists with the requested id.
    #[error("History entry not found: '{id}'\n\nSuggestion: Run 'nova history list' to see available entries")]
    HistoryEntryNotFound {
        /// The requested entry id.
        id: String,
    },

    /// An entry with the same id is already in the history.
    #[error("History entry '{id}' already exists; entries are append-only")]
    DuplicateHistoryEntry {
        /// The conflicting entry id.
        id: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Persisted state could not be decoded.
    #[error("Corrupted store entry '{path}': {message}\n\nSuggestion: Remove the file to fall back to defaults")]
    StoreCorrupted {
        /// Path to the corrupted file.
        path: PathBuf,
        /// What could not be decoded.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// Reading or writing local state failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding local state failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection, DNS, TLS or timeout failure before a status was received.
    Network,
    /// HTTP 429.
    RateLimit,
    /// HTTP 5xx.
    Server,
    /// Any other non-success status (4xx other than 429).
    Client,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

impl TransportErrorKind {
    /// Classifies a non-success HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Client,
        }
    }

    /// Returns a suggestion message for this failure kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Network => "Check your network connection and the endpoint URL",
            Self::RateLimit => "Wait a moment, then retry",
            Self::Server => "Retry later; the model service may be experiencing issues",
            Self::Client => "Check your API key and the configured model name",
        }
    }
}

impl NovaError {
    /// Creates a `ConfigParseError` for `path`.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a `ConfigValidationError`.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `TransportError` with a suggestion derived from the kind.
    #[must_use]
    pub fn transport(attempts: u32, kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::TransportError {
            attempts,
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `ContentValidationError`.
    #[must_use]
    pub fn content(message: impl Into<String>) -> Self {
        Self::ContentValidationError {
            message: message.into(),
        }
    }

    /// Creates a new `ValidationError` with the given message and suggestion.
    #[must_use]
    pub fn validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates an `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `StaleResponse` error.
    #[must_use]
    pub fn stale(operation: impl Into<String>) -> Self {
        Self::StaleResponse {
            operation: operation.into(),
        }
    }

    /// Creates a new `HistoryEntryNotFound` error.
    #[must_use]
    pub fn history_not_found(id: impl Into<String>) -> Self {
        Self::HistoryEntryNotFound { id: id.into() }
    }

    /// Creates a new `StoreCorrupted` error.
    #[must_use]
    pub fn store_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if re-triggering the same action may succeed.
    ///
    /// Both transport exhaustion and malformed model output qualify: the
    /// user is offered a retry, and the session keeps its answers.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportError { .. } | Self::ContentValidationError { .. }
        )
    }

    /// Returns `true` if this error should end the program.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. }
        )
    }
}
