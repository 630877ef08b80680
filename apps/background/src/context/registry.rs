use std::sync::Arc;

use replyte_core::library::LocalLibrary;
use replyte_core::settings::SettingsService;
use replyte_core::sync::{SyncQueueStore, SyncScheduler};
use replyte_sync_client::SyncApiClient;

/// Services shared by the background worker's commands.
pub struct ServiceContext {
    pub settings_service: Arc<SettingsService>,
    pub library: Arc<LocalLibrary>,
    pub sync_queue: Arc<SyncQueueStore>,
    pub sync_scheduler: Arc<SyncScheduler>,
    pub sync_client: Arc<SyncApiClient>,
}

impl ServiceContext {
    pub fn settings_service(&self) -> Arc<SettingsService> {
        Arc::clone(&self.settings_service)
    }

    pub fn library(&self) -> Arc<LocalLibrary> {
        Arc::clone(&self.library)
    }

    pub fn sync_queue(&self) -> Arc<SyncQueueStore> {
        Arc::clone(&self.sync_queue)
    }

    pub fn sync_scheduler(&self) -> Arc<SyncScheduler> {
        Arc::clone(&self.sync_scheduler)
    }

    pub fn sync_client(&self) -> Arc<SyncApiClient> {
        Arc::clone(&self.sync_client)
    }
}
