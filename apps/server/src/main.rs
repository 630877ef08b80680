//! Replyte sync server.
//!
//! `replyte-server` serves the `/sync` API. `replyte-server create-user <email> [tier]`
//! creates an account and prints a fresh API key for it.

mod api;
mod config;
mod error;
mod main_lib;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use main_lib::{app_router, build_state};
use replyte_storage_sqlite::SyncDataRepository;

const DEFAULT_TIER: &str = "free";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn create_user(repository: Arc<SyncDataRepository>, args: &[String]) -> anyhow::Result<()> {
    let email = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("usage: replyte-server create-user <email> [tier]"))?;
    let tier = args.get(1).map(String::as_str).unwrap_or(DEFAULT_TIER);

    let user = match repository.find_user_by_email(&email.trim().to_lowercase())? {
        Some(existing) => existing,
        None => repository.create_user(email, tier).await?,
    };
    let api_key = repository.generate_api_key(&user.id).await?;
    info!("API key issued for {}", user.email);
    println!("{}", api_key);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env()?;
    let (state, repository) = build_state(&config)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("create-user") {
        return create_user(repository, &args[1..]).await;
    }

    let app = app_router(state, &config);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Replyte server listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
