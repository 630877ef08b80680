//! `/sync` endpoints used by the browser extension.
//!
//! Every route authenticates with the `X-API-Key` header.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequestParts, Query, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use replyte_core::sync::{
    deserialize_null_default, BatchApplyReport, RemoteSnapshot, SyncPayload, SyncUser,
    UsageEvent, UsageGrouping, UsageReportRow,
};

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";

const DEFAULT_REPORT_DAYS: i64 = 7;

/// The account resolved from the request's API key.
pub struct ApiKeyUser(pub SyncUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ApiKeyUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("API key required".to_string()))?;

        let repository = Arc::clone(&state.sync_repository);
        let api_key = api_key.to_string();
        let user = run_blocking(move || repository.find_user_by_api_key(&api_key))
            .await?
            .ok_or_else(|| ApiError::Unauthorized("Invalid API key".to_string()))?;
        Ok(Self(user))
    }
}

/// Runs a synchronous repository read on the blocking pool.
async fn run_blocking<T, F>(job: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> replyte_core::Result<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ApiError::Internal(format!("Blocking task failed: {}", e)))?;
    Ok(result?)
}

/// `POST /data` body. Records are parsed one at a time so a malformed record
/// is skipped instead of failing the batch.
#[derive(Debug, Default, Deserialize)]
struct PushRequest {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    handles: Vec<Value>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    templates: Vec<Value>,
}

impl PushRequest {
    /// Returns the readable records and the number of unreadable ones.
    fn into_payload(self) -> (SyncPayload, usize) {
        let mut unreadable = 0;
        let handles = parse_records(self.handles, "handle", &mut unreadable);
        let templates = parse_records(self.templates, "template", &mut unreadable);
        (SyncPayload { handles, templates }, unreadable)
    }
}

fn parse_records<T: DeserializeOwned>(raw: Vec<Value>, kind: &str, unreadable: &mut usize) -> Vec<T> {
    raw.into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping unreadable {} record: {}", kind, e);
                *unreadable += 1;
                None
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionTestResponse {
    message: &'static str,
    user: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushResponse {
    success: bool,
    #[serde(flatten)]
    report: BatchApplyReport,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageReportQuery {
    days: Option<String>,
    group_by: Option<String>,
}

impl UsageReportQuery {
    fn days(&self) -> i64 {
        self.days
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(DEFAULT_REPORT_DAYS)
    }

    fn grouping(&self) -> UsageGrouping {
        match self.group_by.as_deref() {
            Some("nickname") => UsageGrouping::Nickname,
            Some("template") => UsageGrouping::Template,
            _ => UsageGrouping::Both,
        }
    }
}

async fn test_connection(ApiKeyUser(user): ApiKeyUser) -> Json<ConnectionTestResponse> {
    Json(ConnectionTestResponse {
        message: "Authentication successful",
        user: user.email,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn get_data(
    State(state): State<Arc<AppState>>,
    ApiKeyUser(user): ApiKeyUser,
) -> ApiResult<Json<RemoteSnapshot>> {
    let repository = Arc::clone(&state.sync_repository);
    let owner = user.id.clone();
    let snapshot = run_blocking(move || repository.load_snapshot(&owner)).await?;
    debug!(
        "Serving {} handles and {} templates to {}",
        snapshot.handles.len(),
        snapshot.templates.len(),
        user.email
    );
    Ok(Json(snapshot))
}

async fn push_data(
    State(state): State<Arc<AppState>>,
    ApiKeyUser(user): ApiKeyUser,
    body: Result<Json<PushRequest>, JsonRejection>,
) -> ApiResult<Json<PushResponse>> {
    let Json(request) = body?;
    let (payload, unreadable) = request.into_payload();
    let mut report = state.sync_repository.apply_batch(&user.id, payload).await?;
    report.skipped += unreadable;
    info!(
        "Applied sync batch for {}: {} handles, {} templates, {} skipped",
        user.email, report.handles_applied, report.templates_applied, report.skipped
    );
    Ok(Json(PushResponse {
        success: true,
        report,
    }))
}

async fn log_usage(
    State(state): State<Arc<AppState>>,
    ApiKeyUser(user): ApiKeyUser,
    body: Result<Json<UsageEvent>, JsonRejection>,
) -> ApiResult<Json<SuccessResponse>> {
    let Json(event) = body?;
    if event.template_id.trim().is_empty() {
        return Err(ApiError::BadRequest("templateId is required".to_string()));
    }
    state.sync_repository.record_usage(&user.id, event).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn usage_report(
    State(state): State<Arc<AppState>>,
    ApiKeyUser(user): ApiKeyUser,
    Query(query): Query<UsageReportQuery>,
) -> ApiResult<Json<Vec<UsageReportRow>>> {
    let repository = Arc::clone(&state.sync_repository);
    let (days, grouping) = (query.days(), query.grouping());
    let rows = run_blocking(move || repository.usage_report(&user.id, days, grouping)).await?;
    Ok(Json(rows))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/test", get(test_connection))
        .route("/data", get(get_data).post(push_data))
        .route("/usage", post(log_usage))
        .route("/usage/report", get(usage_report))
}
