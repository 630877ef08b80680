//! Replyte background sync worker.
//!
//! Holds the local library and sync queue, pulls the server's data once at
//! startup and then delivers queued batches on a timer until interrupted.
//! `replyte-background clear-log` empties the sync log and exits.

mod commands;
mod context;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replyte_core::settings::SyncSettings;

use context::{initialize_context, ServiceContext};

const DEFAULT_DATA_DIR: &str = "./data";

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Applies `REPLYTE_SERVER_URL` / `REPLYTE_API_KEY` over the stored settings.
async fn apply_env_settings(context: &ServiceContext) -> anyhow::Result<SyncSettings> {
    let mut settings = context.settings_service().get()?;
    let mut changed = false;
    if let Some(server_url) = env_value("REPLYTE_SERVER_URL") {
        changed |= settings.server_url != server_url;
        settings.server_url = server_url;
    }
    if let Some(api_key) = env_value("REPLYTE_API_KEY") {
        changed |= settings.api_key != api_key;
        settings.api_key = api_key;
    }
    if changed {
        return Ok(commands::update_settings(context, settings).await?);
    }
    context.sync_scheduler().apply_settings(&settings).await;
    Ok(settings)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let data_dir = env_value("REPLYTE_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
    let context = initialize_context(&data_dir)?;

    if std::env::args().nth(1).as_deref() == Some("clear-log") {
        commands::clear_sync_log(&context)?;
        info!("Sync log cleared");
        return Ok(());
    }

    let settings = apply_env_settings(&context).await?;

    if settings.is_sync_configured() {
        match commands::test_connection(&context).await {
            Ok(result) => info!("Connected to sync server as {}", result.user),
            Err(e) => warn!("Sync server check failed: {}", e),
        }
        if let Err(e) = commands::pull_and_merge(&context).await {
            warn!("Initial pull failed: {}", e);
        }
        let report = commands::sync_now(&context).await;
        info!("Initial sync tick: {:?}", report);
    } else {
        info!("Sync is not configured; set REPLYTE_SERVER_URL and REPLYTE_API_KEY to enable it");
    }

    let status = commands::get_sync_status(&context)?;
    info!(
        "{} batch(es) pending{}",
        status.pending,
        if status.has_errors { " (recent errors in sync log)" } else { "" }
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down, waiting for in-flight sync to finish");
    context.sync_scheduler().stop_and_wait().await;
    Ok(())
}
