use std::sync::Arc;

use log::info;

use replyte_core::library::LocalLibrary;
use replyte_core::settings::SettingsService;
use replyte_core::state_store::LocalStateStore;
use replyte_core::sync::{SyncDispatcher, SyncQueueStore, SyncScheduler};
use replyte_storage_sqlite::{create_pool, init, run_migrations, SqliteLocalStateStore};
use replyte_sync_client::SyncApiClient;

use super::registry::ServiceContext;

/// Opens the local database under `data_dir` and wires every service.
pub fn initialize_context(data_dir: &str) -> anyhow::Result<ServiceContext> {
    let db_path = init(data_dir)?;
    run_migrations(&db_path)?;
    let pool = create_pool(&db_path)?;
    info!("[Context] Local state at {}", db_path);

    let storage: Arc<dyn LocalStateStore> = Arc::new(SqliteLocalStateStore::new(pool));

    let settings_service = Arc::new(SettingsService::load(storage.clone())?);
    let sync_queue = Arc::new(SyncQueueStore::new(storage.clone())?);
    let sync_client = Arc::new(SyncApiClient::new()?);

    let sync_dispatcher = Arc::new(SyncDispatcher::new(
        sync_queue.clone(),
        sync_client.clone(),
        settings_service.clone(),
    ));
    let sync_scheduler = Arc::new(SyncScheduler::new(sync_dispatcher));

    let library = Arc::new(
        LocalLibrary::new(storage, sync_queue.clone(), settings_service.clone())
            .with_usage_reporter(sync_client.clone()),
    );
    library.initialize_defaults()?;

    Ok(ServiceContext {
        settings_service,
        library,
        sync_queue,
        sync_scheduler,
        sync_client,
    })
}
