//! Error types for the integration relay

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for the integration relay
pub type Result<T> = std::result::Result<T, Error>;

/// Integration relay errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No such service configured
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Circuit breaker rejected the call before any network attempt
    #[error("Service '{service}' circuit is open, retry in {}s", retry_in.as_secs())]
    CircuitOpen {
        /// Service whose circuit is open
        service: String,
        /// Time remaining until the next half-open probe is admitted
        retry_in: Duration,
    },

    /// Rate limit window exhausted for this subject
    #[error("Rate limit exceeded for service '{service}', resets in {}s", retry_after.as_secs())]
    RateLimitExceeded {
        /// Service whose quota was exhausted
        service: String,
        /// Time remaining until the window resets
        retry_after: Duration,
    },

    /// A single network attempt exceeded its timeout
    #[error("Request to '{0}' timed out")]
    Timeout(String),

    /// Connection-level transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream responded with a non-success status
    #[error("Service '{service}' returned status {status}")]
    UpstreamStatus {
        /// Service that produced the response
        service: String,
        /// HTTP status code
        status: u16,
    },

    /// All retry attempts were consumed by transient failures
    #[error("Retries exhausted for '{service}' after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Service the call targeted
        service: String,
        /// Total attempts made
        attempts: u32,
        /// The last transient error observed
        #[source]
        source: Box<Error>,
    },

    /// Webhook signature rejected
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Webhook received for a source that is not configured
    #[error("Unknown webhook source: {0}")]
    UnknownWebhookSource(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is worth retrying.
    ///
    /// Timeouts, connection-level failures, and 5xx-equivalent upstream
    /// responses are transient. Everything else - 4xx rejections, validation
    /// failures, open circuits, exhausted quotas - aborts immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::UpstreamStatus { status, .. } => *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
