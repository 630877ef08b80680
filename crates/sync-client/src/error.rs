//! Error types for the sync client.

use replyte_core::sync::DeliveryError;
use thiserror::Error;

/// Result type alias for sync client operations.
pub type Result<T> = std::result::Result<T, SyncClientError>;

#[derive(Debug, Error)]
pub enum SyncClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-2xx response from the sync server
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Missing or malformed API key
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl SyncClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }
}

impl From<SyncClientError> for DeliveryError {
    fn from(err: SyncClientError) -> Self {
        match err {
            SyncClientError::Api { status, message } => DeliveryError::status(status, message),
            SyncClientError::Http(e) => DeliveryError::Network(e.to_string()),
            other => DeliveryError::Other(other.to_string()),
        }
    }
}
