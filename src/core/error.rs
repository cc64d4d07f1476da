//! Custom error types for Sightline
//!
//! Provides a unified error handling system across all modules.

use thiserror::Error;

use crate::som::command::CommandAttempt;

/// Main error type for Sightline operations
#[derive(Error, Debug)]
pub enum SightlineError {
    /// Oracle provider errors without a typed status (transport, decoding)
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Oracle provider answered with a non-success HTTP status
    #[error("Oracle API error ({status}): {body}")]
    OracleStatus { status: u16, body: String },

    /// The oracle replied with something that violates the response contract
    #[error("Oracle protocol error: {0}")]
    Protocol(String),

    /// Browser driver errors that are not tied to a single command
    #[error("Browser error: {0}")]
    Browser(String),

    /// The page navigated, crashed or closed while a round was in flight
    #[error("Navigation interrupted: {0}")]
    NavigationInterrupted(String),

    /// A marker now resolves to several live nodes and none matches the original descriptor
    #[error("Marker {marker} is stale: {duplicates} live nodes carry it and none matches")]
    StaleTarget { marker: String, duplicates: usize },

    /// A main command failed after every selector, heuristic and fallback
    #[error("Objective \"{objective}\" failed: {message} ({} failed attempts)", attempts.len())]
    CommandFailed {
        objective: String,
        message: String,
        attempts: Vec<CommandAttempt>,
    },

    /// A pre-command failed, which is fatal for the objective
    #[error("Objective \"{objective}\" failed during pre-commands: {message}")]
    PreCommandFailed {
        objective: String,
        message: String,
        attempts: Vec<CommandAttempt>,
    },

    /// A bounded retry counter went over its configured limit
    #[error("Objective \"{objective}\" exceeded the retry limit of {limit} ({counter}); last reason: {reason}")]
    RetryLimit {
        objective: String,
        counter: &'static str,
        limit: u32,
        reason: String,
    },

    /// Extracted content could not be coerced into the requested shape
    #[error("Coercion error: {0}")]
    Coercion(String),

    /// Caller did not supply something the operation needs
    #[error("Missing context: {0}")]
    MissingContext(String),

    /// Operation exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Agent-browser not installed
    #[error("agent-browser not found. Install with: npm install -g agent-browser && agent-browser install")]
    AgentBrowserNotFound,

    /// Model not available
    #[error("Model '{0}' not available in Ollama. Run: ollama pull {0}")]
    ModelNotFound(String),
}

/// Convenience Result type for Sightline operations
pub type Result<T> = std::result::Result<T, SightlineError>;

impl SightlineError {
    /// Create an oracle error
    pub fn oracle(msg: impl Into<String>) -> Self {
        Self::Oracle(msg.into())
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a browser error
    pub fn browser(msg: impl Into<String>) -> Self {
        Self::Browser(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the oracle retry envelope may try again after this error.
    ///
    /// Only server-side failures and untyped transport errors qualify; protocol
    /// violations and 4xx answers propagate immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OracleStatus { status, .. } => *status >= 500,
            Self::Oracle(_) | Self::Timeout(_) => true,
            Self::Http(e) => e.status().map(|s| s.is_server_error()).unwrap_or(true),
            _ => false,
        }
    }

    /// Whether the orchestrator may recover by discarding the round and asking again
    pub fn is_round_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NavigationInterrupted(_) | Self::StaleTarget { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SightlineError::OracleStatus {
            status: 503,
            body: "busy".into()
        }
        .is_retryable());
        assert!(!SightlineError::OracleStatus {
            status: 401,
            body: "nope".into()
        }
        .is_retryable());
        assert!(SightlineError::oracle("connection reset").is_retryable());
        assert!(!SightlineError::protocol("bad json").is_retryable());
    }

    #[test]
    fn test_retry_limit_message_names_limit() {
        let err = SightlineError::RetryLimit {
            objective: "open settings".into(),
            counter: "wait",
            limit: 3,
            reason: "spinner".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("retry limit of 3"));
        assert!(msg.contains("open settings"));
    }
}
