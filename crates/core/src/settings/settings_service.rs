use log::{debug, warn};
use std::sync::{Arc, RwLock};

use crate::errors::{Error, Result};
use crate::state_store::{load_value, store_value, LocalStateStore, SETTINGS_KEY};
use crate::sync::SyncTarget;

use super::settings_model::SyncSettings;

/// Cached view of the persisted `settings` key.
pub struct SettingsService {
    storage: Arc<dyn LocalStateStore>,
    current: RwLock<SyncSettings>,
}

impl SettingsService {
    /// Loads persisted settings. Unreadable settings fall back to defaults.
    pub fn load(storage: Arc<dyn LocalStateStore>) -> Result<Self> {
        let current = match load_value::<SyncSettings>(storage.as_ref(), SETTINGS_KEY) {
            Ok(Some(settings)) => settings,
            Ok(None) => SyncSettings::default(),
            Err(Error::Serialization(err)) => {
                warn!("[Settings] Stored settings are unreadable, using defaults: {}", err);
                SyncSettings::default()
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            storage,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self) -> Result<SyncSettings> {
        let current = self.current.read().map_err(|_| Error::poisoned("settings"))?;
        Ok(current.clone())
    }

    /// Persists new settings and returns them.
    pub fn update(&self, settings: SyncSettings) -> Result<SyncSettings> {
        if settings.favorites_count == 0 {
            return Err(Error::validation("favoritesCount must be at least 1"));
        }

        let mut current = self.current.write().map_err(|_| Error::poisoned("settings"))?;
        store_value(self.storage.as_ref(), SETTINGS_KEY, &settings)?;
        *current = settings.clone();
        debug!(
            "[Settings] Settings updated (sync {})",
            if settings.is_sync_configured() { "enabled" } else { "disabled" }
        );
        Ok(settings)
    }

    /// Current sync target, or `None` when sync is not configured.
    pub fn sync_target(&self) -> Option<SyncTarget> {
        match self.current.read() {
            Ok(current) => current.sync_target(),
            Err(_) => {
                warn!("[Settings] Settings lock is poisoned; treating sync as disabled");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::InMemoryStateStore;

    #[test]
    fn update_persists_and_changes_target() {
        let storage = Arc::new(InMemoryStateStore::new());
        let service = SettingsService::load(storage.clone()).expect("load");
        assert!(service.sync_target().is_none());

        let mut settings = service.get().expect("get");
        settings.server_url = "https://replyte.test".to_string();
        settings.api_key = "key".to_string();
        service.update(settings).expect("update");

        assert!(service.sync_target().is_some());
        let reloaded = SettingsService::load(storage).expect("reload");
        assert_eq!(reloaded.get().expect("get").server_url, "https://replyte.test");
    }

    #[test]
    fn corrupt_settings_load_as_defaults() {
        let storage = Arc::new(InMemoryStateStore::new());
        storage
            .set(SETTINGS_KEY, serde_json::json!({ "favoritesCount": "many" }))
            .expect("seed");
        let service = SettingsService::load(storage).expect("load");
        assert_eq!(service.get().expect("get"), SyncSettings::default());
    }

    #[test]
    fn zero_favorites_is_rejected() {
        let service = SettingsService::load(Arc::new(InMemoryStateStore::new())).expect("load");
        let settings = SyncSettings {
            favorites_count: 0,
            ..Default::default()
        };
        assert!(matches!(service.update(settings), Err(Error::Validation(_))));
    }
}
