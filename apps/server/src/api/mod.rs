//! HTTP routes.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};

use crate::main_lib::AppState;

mod sync;

pub use sync::API_KEY_HEADER;

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/sync", sync::router())
        .with_state(state)
}
