//! Error types for the DDNS relay
//!
//! This module defines all error types used throughout the crate, and the
//! retryable/terminal classification the coordinator applies to provider
//! failures.

use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS relay
#[derive(Error, Debug)]
pub enum Error {
    /// DNS provider-related errors that are not tied to an HTTP status
    /// (malformed responses, unusable records)
    #[error("DNS provider error: {0}")]
    DnsProvider(String),

    /// The provider API answered with a non-success status
    #[error("Provider error ({provider}): HTTP {status}: {message}")]
    Upstream {
        /// Provider name
        provider: String,
        /// HTTP status code returned by the provider
        status: u16,
        /// Error message
        message: String,
    },

    /// The request never got an answer (connect failure, timeout, reset)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Durable store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Optimistic concurrency retries exhausted
    #[error("Commit conflict: {0}")]
    Conflict(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Notifier errors
    #[error("Notifier error: {0}")]
    Notifier(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a DNS provider error
    pub fn dns_provider(msg: impl Into<String>) -> Self {
        Self::DnsProvider(msg.into())
    }

    /// Create an upstream (HTTP status) error
    pub fn upstream(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a notifier error
    pub fn notifier(msg: impl Into<String>) -> Self {
        Self::Notifier(msg.into())
    }

    /// Whether a provider failure is the provider's fault and worth another drain.
    ///
    /// Server-side statuses (5xx) and transport failures are retryable. Every
    /// other failure (auth, rate limiting, malformed input, missing records) is
    /// treated as the client's fault and is terminal for the entry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { status, .. } => (500..=599).contains(status),
            Error::Transport(_) => true,
            _ => false,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
