use serde::{Deserialize, Serialize};

use crate::sync::SyncTarget;

pub const DEFAULT_FAVORITES_COUNT: u32 = 5;

/// Path appended to the configured server URL to reach the sync endpoints.
pub const SYNC_ENDPOINT_PATH: &str = "/sync";

/// What to show in place of `{{nickname}}` when no nickname is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FallbackBehavior {
    #[default]
    DisplayName,
    Handle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    pub server_url: String,
    pub api_key: String,
    pub account_email: String,
    pub favorites_count: u32,
    pub fallback_behavior: FallbackBehavior,
    pub default_hashtag: String,
    /// Keys written by newer clients are kept on save.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            api_key: String::new(),
            account_email: String::new(),
            favorites_count: DEFAULT_FAVORITES_COUNT,
            fallback_behavior: FallbackBehavior::default(),
            default_hashtag: String::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl SyncSettings {
    /// Target derived from the server URL and API key; `None` unless both are
    /// non-blank.
    pub fn sync_target(&self) -> Option<SyncTarget> {
        let server_url = self.server_url.trim().trim_end_matches('/');
        let api_key = self.api_key.trim();
        if server_url.is_empty() || api_key.is_empty() {
            return None;
        }

        let endpoint = if server_url.ends_with(SYNC_ENDPOINT_PATH) {
            server_url.to_string()
        } else {
            format!("{}{}", server_url, SYNC_ENDPOINT_PATH)
        };
        Some(SyncTarget::new(endpoint, api_key))
    }

    pub fn is_sync_configured(&self) -> bool {
        self.sync_target().is_some()
    }
}
