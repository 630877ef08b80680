//! Network-facing contracts used by the dispatcher and edit sites.
//!
//! Implementations perform exactly one attempt per call; retry policy lives
//! in the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::sync_model::SyncPayload;

/// Remote endpoint plus the credential sent as `X-API-Key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub endpoint: String,
    pub credential: String,
}

impl SyncTarget {
    pub fn new(endpoint: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            credential: credential.into(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Non-2xx response.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection, timeout or body transfer failure.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Delivery error: {0}")]
    Other(String),
}

impl DeliveryError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Single delivery attempt of one queued batch.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, target: &SyncTarget, payload: &SyncPayload) -> Result<(), DeliveryError>;
}

/// One template insertion, reported best-effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub template_id: String,
    #[serde(default)]
    pub x_user_handle: Option<String>,
}

#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn report_usage(&self, target: &SyncTarget, event: &UsageEvent) -> Result<(), DeliveryError>;
}
