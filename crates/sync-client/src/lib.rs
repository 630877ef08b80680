//! HTTP client for the Replyte sync server.
//!
//! [`SyncApiClient`] is the production [`DeliveryTransport`] and
//! [`UsageReporter`]: one request per call, no internal retries.
//!
//! [`DeliveryTransport`]: replyte_core::sync::DeliveryTransport
//! [`UsageReporter`]: replyte_core::sync::UsageReporter

mod client;
mod error;

pub use client::{ConnectionTest, SyncApiClient, API_KEY_HEADER, DEFAULT_TIMEOUT_SECS};
pub use error::{Result, SyncClientError};
