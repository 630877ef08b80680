//! Application state and router assembly.

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use replyte_core::sync::SyncDataRepositoryTrait;
use replyte_storage_sqlite::{open, SyncDataRepository};

use crate::api;
use crate::config::Config;

pub struct AppState {
    pub sync_repository: Arc<dyn SyncDataRepositoryTrait>,
}

/// Opens the database and wires the repositories.
///
/// Returns the concrete repository too so the admin commands can reach
/// user management, which is not part of the sync trait.
pub fn build_state(config: &Config) -> anyhow::Result<(Arc<AppState>, Arc<SyncDataRepository>)> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let (pool, writer) = open(&config.db_path)?;
    let repository = Arc::new(SyncDataRepository::new(pool, writer));

    let state = Arc::new(AppState {
        sync_repository: repository.clone(),
    });
    Ok((state, repository))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(api::API_KEY_HEADER),
        ])
}

pub fn app_router(state: Arc<AppState>, config: &Config) -> Router {
    api::router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}
