//! Sync operations exposed by the background worker.

use log::debug;

use replyte_core::errors::{Error, Result};
use replyte_core::library::MergeReport;
use replyte_core::settings::SyncSettings;
use replyte_core::sync::{SyncStatus, SyncTarget, TickReport};
use replyte_sync_client::{ConnectionTest, SyncClientError};

use crate::context::ServiceContext;

fn require_target(context: &ServiceContext) -> Result<SyncTarget> {
    context
        .settings_service()
        .sync_target()
        .ok_or_else(|| Error::sync("Sync is not configured"))
}

fn client_error(err: SyncClientError) -> Error {
    Error::sync(err.to_string())
}

/// Saves settings and starts or stops the background loop to match.
pub async fn update_settings(context: &ServiceContext, settings: SyncSettings) -> Result<SyncSettings> {
    let saved = context.settings_service().update(settings)?;
    context.sync_scheduler().apply_settings(&saved).await;
    Ok(saved)
}

pub fn get_sync_status(context: &ServiceContext) -> Result<SyncStatus> {
    context.sync_queue().status()
}

pub fn clear_sync_log(context: &ServiceContext) -> Result<()> {
    context.sync_queue().clear_log()
}

/// Runs a tick now instead of waiting for the timer.
pub async fn sync_now(context: &ServiceContext) -> TickReport {
    context.sync_scheduler().run_now().await
}

/// Fetches the server's data and merges it into the local library.
pub async fn pull_and_merge(context: &ServiceContext) -> Result<MergeReport> {
    let target = require_target(context)?;
    let snapshot = context
        .sync_client()
        .fetch_remote(&target)
        .await
        .map_err(client_error)?;
    debug!(
        "[Background] Pulled {} handles and {} templates",
        snapshot.handles.len(),
        snapshot.templates.len()
    );
    context.library().merge_remote(snapshot)
}

/// Checks the configured credentials and remembers the account email.
pub async fn test_connection(context: &ServiceContext) -> Result<ConnectionTest> {
    let target = require_target(context)?;
    let result = context
        .sync_client()
        .test_connection(&target)
        .await
        .map_err(client_error)?;

    let settings_service = context.settings_service();
    let mut settings = settings_service.get()?;
    if settings.account_email != result.user {
        settings.account_email = result.user.clone();
        settings_service.update(settings)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::initialize_context;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves canned `/sync/test` and `/sync/data` responses.
    async fn spawn_sync_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).to_string();
                    let (status, body) = if !request.contains("x-api-key: rk_test") {
                        ("401 Unauthorized", json!({ "error": "Invalid API key" }))
                    } else if request.starts_with("GET /sync/test") {
                        (
                            "200 OK",
                            json!({
                                "message": "Authentication successful",
                                "user": "alice@example.com",
                                "timestamp": "2025-06-01T00:00:00.000Z"
                            }),
                        )
                    } else if request.starts_with("GET /sync/data") {
                        (
                            "200 OK",
                            json!({
                                "handles": [{ "id": 4, "handle": "rjchicago", "nickname": "RJ", "emojis": "🔥" }],
                                "templates": [{ "id": 9, "title": "Hype", "body": "Let's go {{nickname}}", "favorite": true }]
                            }),
                        )
                    } else {
                        ("404 Not Found", json!({ "error": "Not found" }))
                    };
                    let body = body.to_string();
                    let response = format!(
                        "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        format!("http://{}", addr)
    }

    fn context() -> (TempDir, ServiceContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = initialize_context(dir.path().to_str().expect("utf8 path")).expect("context");
        (dir, context)
    }

    fn configured(server_url: &str, api_key: &str) -> SyncSettings {
        SyncSettings {
            server_url: server_url.to_string(),
            api_key: api_key.to_string(),
            ..SyncSettings::default()
        }
    }

    #[tokio::test]
    async fn settings_toggle_the_background_loop() {
        let (_dir, context) = context();
        assert!(!context.sync_scheduler().is_running().await);

        update_settings(&context, configured("http://127.0.0.1:9", "rk_test"))
            .await
            .expect("configure");
        assert!(context.sync_scheduler().is_running().await);

        update_settings(&context, configured("", "rk_test"))
            .await
            .expect("unconfigure");
        assert!(!context.sync_scheduler().is_running().await);
    }

    #[tokio::test]
    async fn unconfigured_sync_is_a_no_op() {
        let (_dir, context) = context();

        assert_eq!(sync_now(&context).await, TickReport::Disabled);
        assert!(matches!(pull_and_merge(&context).await, Err(Error::Sync(_))));
        assert!(matches!(test_connection(&context).await, Err(Error::Sync(_))));

        let status = get_sync_status(&context).expect("status");
        assert_eq!(status.pending, 0);
        assert!(status.log.is_empty());
    }

    #[tokio::test]
    async fn clearing_the_log_keeps_pending_batches() {
        let (_dir, context) = context();
        context
            .library()
            .save_user("alice", "Al", Vec::new())
            .expect("save");
        assert_eq!(get_sync_status(&context).expect("status").log.len(), 1);

        clear_sync_log(&context).expect("clear");
        let status = get_sync_status(&context).expect("status");
        assert!(status.log.is_empty());
        assert_eq!(status.pending, 1);
    }

    #[tokio::test]
    async fn test_connection_records_account_email() {
        let (_dir, context) = context();
        let server = spawn_sync_server().await;
        context
            .settings_service()
            .update(configured(&server, "rk_test"))
            .expect("settings");

        let result = test_connection(&context).await.expect("connection");
        assert_eq!(result.message, "Authentication successful");
        assert_eq!(
            context.settings_service().get().expect("settings").account_email,
            "alice@example.com"
        );

        context
            .settings_service()
            .update(configured(&server, "rk_wrong"))
            .expect("settings");
        assert!(matches!(test_connection(&context).await, Err(Error::Sync(_))));
    }

    #[tokio::test]
    async fn pull_merges_remote_records() {
        let (_dir, context) = context();
        let server = spawn_sync_server().await;
        context
            .settings_service()
            .update(configured(&server, "rk_test"))
            .expect("settings");

        let report = pull_and_merge(&context).await.expect("pull");
        assert_eq!(report.handles_added, 1);
        assert_eq!(report.templates_added, 1);

        let users = context.library().users().expect("users");
        assert_eq!(users["rjchicago"].nickname, "RJ");
        assert_eq!(users["rjchicago"].emojis, vec!["🔥".to_string()]);
        assert!(context
            .library()
            .templates()
            .expect("templates")
            .iter()
            .any(|t| t.title == "Hype" && t.favorite));

        // A second pull finds nothing new.
        let report = pull_and_merge(&context).await.expect("pull again");
        assert_eq!(report.handles_added, 0);
        assert_eq!(report.templates_added, 0);
        assert_eq!(get_sync_status(&context).expect("status").pending, 0);
    }
}
