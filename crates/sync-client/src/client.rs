//! Sync API client for the `/sync` endpoints of the Replyte server.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use replyte_core::sync::{
    DeliveryError, DeliveryTransport, RemoteSnapshot, SyncPayload, SyncTarget, UsageEvent,
    UsageReporter,
};

use crate::error::{Result, SyncClientError};

/// Default timeout for API requests.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const API_KEY_HEADER: &str = "x-api-key";

const MAX_LOG_BODY_CHARS: usize = 512;

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: String,
}

/// Body of a successful `GET /test`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTest {
    pub message: String,
    /// Email of the account the key belongs to.
    pub user: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct SyncApiClient {
    client: reqwest::Client,
}

impl SyncApiClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn headers(&self, target: &SyncTarget) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(&target.credential)
            .map_err(|_| SyncClientError::auth("API key contains invalid characters"))?;
        headers.insert(API_KEY_HEADER, key);
        Ok(headers)
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[SyncClient] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[SyncClient] Response error ({}): {}", status, preview);
    }

    /// Reads the body and turns non-2xx statuses into [`SyncClientError::Api`].
    ///
    /// The message is the server's `error` field, else the raw body, else the
    /// status reason.
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if status.is_success() {
            return Ok(body);
        }

        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(error) => error.error,
            Err(_) if !body.trim().is_empty() => body.trim().to_string(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        };
        Err(SyncClientError::api(status.as_u16(), message))
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let body = Self::read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// POST /data
    pub async fn push_data(&self, target: &SyncTarget, payload: &SyncPayload) -> Result<()> {
        let url = target.url("data");
        debug!(
            "[SyncClient] Pushing {} handle(s) and {} template(s)",
            payload.handles.len(),
            payload.templates.len()
        );

        let response = self
            .client
            .post(&url)
            .headers(self.headers(target)?)
            .json(payload)
            .send()
            .await?;
        Self::read_body(response).await?;
        Ok(())
    }

    /// GET /data
    pub async fn fetch_remote(&self, target: &SyncTarget) -> Result<RemoteSnapshot> {
        let response = self
            .client
            .get(target.url("data"))
            .headers(self.headers(target)?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// GET /test
    pub async fn test_connection(&self, target: &SyncTarget) -> Result<ConnectionTest> {
        let response = self
            .client
            .get(target.url("test"))
            .headers(self.headers(target)?)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// POST /usage
    pub async fn log_usage(&self, target: &SyncTarget, event: &UsageEvent) -> Result<()> {
        let response = self
            .client
            .post(target.url("usage"))
            .headers(self.headers(target)?)
            .json(event)
            .send()
            .await?;
        Self::read_body(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryTransport for SyncApiClient {
    async fn deliver(&self, target: &SyncTarget, payload: &SyncPayload) -> std::result::Result<(), DeliveryError> {
        self.push_data(target, payload).await.map_err(DeliveryError::from)
    }
}

#[async_trait]
impl UsageReporter for SyncApiClient {
    async fn report_usage(&self, target: &SyncTarget, event: &UsageEvent) -> std::result::Result<(), DeliveryError> {
        self.log_usage(target, event).await.map_err(DeliveryError::from)
    }
}
