//! Server configuration from environment variables.

use std::net::SocketAddr;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DB_PATH: &str = "./data/replyte.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = match (env_value("REPLYTE_LISTEN_ADDR"), env_value("PORT")) {
            (Some(addr), _) => addr,
            (None, Some(port)) => format!("0.0.0.0:{}", port),
            (None, None) => DEFAULT_LISTEN_ADDR.to_string(),
        };
        let listen_addr = listen_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address '{}': {}", listen_addr, e))?;

        let db_path = env_value("REPLYTE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let cors_origins = env_value("REPLYTE_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|origin| origin.trim().trim_end_matches('/').to_string())
                    .filter(|origin| !origin.is_empty() && origin != "*")
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            listen_addr,
            db_path,
            cors_origins,
        })
    }
}
