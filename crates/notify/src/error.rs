//! Error types for notification delivery.

use thiserror::Error;

/// Errors that can occur when sending a notification.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// No provider is configured for the requested channel
    #[error("No provider configured for channel: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Rate limited by the service
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The provider accepted the request but reported a failure
    #[error("{0}")]
    Rejected(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}
