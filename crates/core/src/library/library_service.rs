use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::settings::{FallbackBehavior, SettingsService};
use crate::state_store::{
    load_value, LocalStateStore, LEGACY_NICKNAMES_KEY, RESPONSES_KEY, USERS_KEY,
};
use crate::sync::{
    normalize_emojis, RemoteSnapshot, SyncPayload, SyncQueueStore, UsageEvent, UsageReporter,
};
use crate::templating::{render_template, TemplateContext};

use super::defaults::default_templates;
use super::library_model::{
    handle_record, MergeReport, ReplyTemplate, TemplateUpdate, UserDirectory, UserProfile,
};

/// Portable dump of the library, as produced by the export action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryExport {
    #[serde(default)]
    pub responses: Option<Vec<ReplyTemplate>>,
    #[serde(default)]
    pub users: Option<UserDirectory>,
    /// Pre-`users` exports carry a flat handle to nickname map instead.
    #[serde(default, skip_serializing)]
    pub nicknames: Option<BTreeMap<String, String>>,
}

/// Local users and templates. Every user-visible edit is written locally and
/// then queued for sync; deletes stay local.
pub struct LocalLibrary {
    storage: Arc<dyn LocalStateStore>,
    queue: Arc<SyncQueueStore>,
    settings: Arc<SettingsService>,
    usage_reporter: Option<Arc<dyn UsageReporter>>,
    write_lock: Mutex<()>,
}

impl LocalLibrary {
    pub fn new(
        storage: Arc<dyn LocalStateStore>,
        queue: Arc<SyncQueueStore>,
        settings: Arc<SettingsService>,
    ) -> Self {
        Self {
            storage,
            queue,
            settings,
            usage_reporter: None,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_usage_reporter(mut self, reporter: Arc<dyn UsageReporter>) -> Self {
        self.usage_reporter = Some(reporter);
        self
    }

    /// First-run setup: seeds default templates and moves a legacy nickname
    /// map into `users`.
    pub fn initialize_defaults(&self) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;

        if self.storage.get(RESPONSES_KEY)?.is_none() {
            let defaults = default_templates(Utc::now().timestamp_millis());
            self.store_templates(&defaults)?;
            info!("[Library] Seeded {} default templates", defaults.len());
        }

        if self.storage.get(USERS_KEY)?.is_none() {
            let migrated = self.legacy_users()?.unwrap_or_default();
            if !migrated.is_empty() {
                info!("[Library] Migrated {} legacy nicknames", migrated.len());
            }
            self.store_users(&migrated)?;
        }
        Ok(())
    }

    /// Stored users, falling back to the legacy nickname map.
    pub fn users(&self) -> Result<UserDirectory> {
        match load_value::<UserDirectory>(self.storage.as_ref(), USERS_KEY)? {
            Some(users) => Ok(users),
            None => Ok(self.legacy_users()?.unwrap_or_default()),
        }
    }

    /// Sets a handle's nickname and emojis and queues the change. An empty
    /// nickname removes the handle locally without queueing anything.
    ///
    /// Returns the id of the queued mutation, if one was queued.
    pub fn save_user(&self, handle: &str, nickname: &str, emojis: Vec<String>) -> Result<Option<String>> {
        let handle = normalize_handle(handle);
        if handle.is_empty() {
            return Err(Error::validation("Handle is required"));
        }

        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;
        let mut users = self.users()?;
        let nickname = nickname.trim();

        if nickname.is_empty() {
            if users.remove(&handle).is_some() {
                self.store_users(&users)?;
                debug!("[Library] Removed nickname for {}", handle);
            }
            return Ok(None);
        }

        let profile = UserProfile {
            nickname: nickname.to_string(),
            emojis: normalize_emojis(emojis),
        };
        let record = handle_record(&handle, &profile);
        users.insert(handle, profile);
        self.store_users(&users)?;

        let id = self.queue.enqueue(SyncPayload::handles(vec![record]))?;
        Ok(Some(id))
    }

    pub fn delete_user(&self, handle: &str) -> Result<bool> {
        let handle = normalize_handle(handle);
        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;
        let mut users = self.users()?;
        if users.remove(&handle).is_none() {
            return Ok(false);
        }
        self.store_users(&users)?;
        Ok(true)
    }

    pub fn templates(&self) -> Result<Vec<ReplyTemplate>> {
        Ok(load_value::<Vec<ReplyTemplate>>(self.storage.as_ref(), RESPONSES_KEY)?.unwrap_or_default())
    }

    /// Favorite templates, limited to the configured count.
    pub fn favorites(&self) -> Result<Vec<ReplyTemplate>> {
        let limit = self.settings.get()?.favorites_count as usize;
        Ok(self
            .templates()?
            .into_iter()
            .filter(|template| template.favorite)
            .take(limit)
            .collect())
    }

    /// Creates or edits a template and queues it.
    pub fn save_template(&self, update: TemplateUpdate) -> Result<ReplyTemplate> {
        if update.body.trim().is_empty() {
            return Err(Error::validation("Template body is required"));
        }

        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;
        let mut templates = self.templates()?;
        let now = Utc::now().timestamp_millis();

        let existing = update
            .id
            .as_deref()
            .and_then(|id| templates.iter_mut().find(|t| t.id == id));
        let saved = match existing {
            Some(template) => {
                template.title = update.title;
                template.body = update.body;
                template.tags = update.tags;
                template.favorite = update.favorite;
                template.updated_at = now;
                template.clone()
            }
            None => {
                let template = ReplyTemplate {
                    id: update.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
                    title: update.title,
                    body: update.body,
                    tags: update.tags,
                    favorite: update.favorite,
                    created_at: now,
                    updated_at: now,
                };
                templates.push(template.clone());
                template
            }
        };

        self.store_templates(&templates)?;
        self.queue
            .enqueue(SyncPayload::templates(vec![saved.to_record()]))?;
        Ok(saved)
    }

    /// Removes a template locally. Deletes are never propagated.
    pub fn delete_template(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;
        let mut templates = self.templates()?;
        let before = templates.len();
        templates.retain(|template| template.id != id);
        if templates.len() == before {
            return Ok(false);
        }
        self.store_templates(&templates)?;
        Ok(true)
    }

    /// Folds pulled remote data into the library without overwriting local
    /// edits.
    ///
    /// A remote handle is only taken when it is absent locally and not part of
    /// a queued mutation. A remote template is added when no local template
    /// has the same title and body.
    pub fn merge_remote(&self, snapshot: RemoteSnapshot) -> Result<MergeReport> {
        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;
        let pending: HashSet<String> = self
            .queue
            .pending_items()?
            .into_iter()
            .flat_map(|item| item.payload.handles.into_iter().map(|h| h.handle))
            .collect();

        let mut report = MergeReport::default();
        let mut users = self.users()?;
        for remote in snapshot.handles {
            let handle = normalize_handle(&remote.handle);
            if handle.is_empty() {
                continue;
            }
            if users.contains_key(&handle) || pending.contains(&handle) {
                report.handles_kept_local += 1;
                continue;
            }
            users.insert(
                handle,
                UserProfile {
                    nickname: remote.nickname,
                    emojis: normalize_emojis(remote.emojis),
                },
            );
            report.handles_added += 1;
        }

        let mut templates = self.templates()?;
        let now = Utc::now().timestamp_millis();
        for remote in snapshot.templates {
            if remote.body.trim().is_empty()
                || templates
                    .iter()
                    .any(|local| local.same_identity(&remote.title, &remote.body))
            {
                continue;
            }
            let id = match remote.id {
                Some(id) if !templates.iter().any(|local| local.id == id) => id,
                _ => Uuid::now_v7().to_string(),
            };
            templates.push(ReplyTemplate {
                id,
                title: remote.title,
                body: remote.body,
                tags: remote.tags,
                favorite: remote.favorite,
                created_at: remote.created_at.unwrap_or(now),
                updated_at: remote.updated_at.unwrap_or(now),
            });
            report.templates_added += 1;
        }

        if report.handles_added > 0 {
            self.store_users(&users)?;
        }
        if report.templates_added > 0 {
            self.store_templates(&templates)?;
        }
        info!(
            "[Library] Merged remote data: {} handle(s) and {} template(s) added, {} handle(s) kept local",
            report.handles_added, report.templates_added, report.handles_kept_local
        );
        Ok(report)
    }

    pub fn export_data(&self) -> Result<LibraryExport> {
        Ok(LibraryExport {
            responses: Some(self.templates()?),
            users: Some(self.users()?),
            nicknames: None,
        })
    }

    /// Replaces local data with an export and queues everything imported.
    pub fn import_data(&self, export: LibraryExport) -> Result<Option<String>> {
        let _guard = self.write_lock.lock().map_err(|_| Error::poisoned("library"))?;
        let users = match (export.users, export.nicknames) {
            (Some(users), _) => Some(users),
            (None, Some(nicknames)) => Some(users_from_nicknames(nicknames)),
            (None, None) => None,
        };

        let mut payload = SyncPayload::default();
        if let Some(templates) = export.responses {
            self.store_templates(&templates)?;
            payload.templates = templates
                .iter()
                .filter(|t| !t.body.trim().is_empty())
                .map(ReplyTemplate::to_record)
                .collect();
        }
        if let Some(users) = users {
            self.store_users(&users)?;
            payload.handles = users
                .iter()
                .map(|(handle, profile)| handle_record(handle, profile))
                .collect();
        }

        if payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.queue.enqueue(payload)?))
    }

    /// Renders a template for a reply to `handle`.
    pub fn render_for(
        &self,
        template_id: &str,
        handle: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<String> {
        let template = self
            .templates()?
            .into_iter()
            .find(|t| t.id == template_id)
            .ok_or_else(|| Error::NotFound(format!("Template {}", template_id)))?;

        let handle = handle.map(normalize_handle).filter(|h| !h.is_empty());
        let profile = match &handle {
            Some(handle) => self.users()?.remove(handle),
            None => None,
        };
        let display_name = display_name.map(str::to_string);

        let nickname = match profile.as_ref().map(|p| p.nickname.clone()) {
            Some(nickname) if !nickname.is_empty() => Some(nickname),
            _ => match self.settings.get()?.fallback_behavior {
                FallbackBehavior::DisplayName => display_name.clone(),
                FallbackBehavior::Handle => None,
            },
        };

        let context = TemplateContext {
            handle,
            nickname,
            display_name,
            emojis: profile.map(|p| p.emojis).unwrap_or_default(),
        };
        Ok(render_template(&template.body, &context))
    }

    /// Reports a template insertion in the background. Failures are logged
    /// and otherwise ignored.
    pub fn record_usage(&self, template_id: &str, handle: Option<&str>) {
        let Some(reporter) = self.usage_reporter.clone() else {
            return;
        };
        let Some(target) = self.settings.sync_target() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("[Library] No async runtime; usage event dropped");
            return;
        };

        let event = UsageEvent {
            template_id: template_id.to_string(),
            x_user_handle: handle.map(normalize_handle).filter(|h| !h.is_empty()),
        };
        runtime.spawn(async move {
            if let Err(err) = reporter.report_usage(&target, &event).await {
                debug!("[Library] Usage logging failed: {}", err);
            }
        });
    }

    fn legacy_users(&self) -> Result<Option<UserDirectory>> {
        let nicknames =
            load_value::<BTreeMap<String, String>>(self.storage.as_ref(), LEGACY_NICKNAMES_KEY)?;
        Ok(nicknames.map(users_from_nicknames))
    }

    fn store_users(&self, users: &UserDirectory) -> Result<()> {
        self.storage
            .set(USERS_KEY, serde_json::to_value(users)?)
    }

    fn store_templates(&self, templates: &[ReplyTemplate]) -> Result<()> {
        self.storage
            .set(RESPONSES_KEY, serde_json::to_value(templates)?)
    }
}

fn normalize_handle(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_string()
}

fn users_from_nicknames(nicknames: BTreeMap<String, String>) -> UserDirectory {
    nicknames
        .into_iter()
        .map(|(handle, nickname)| {
            (
                handle,
                UserProfile {
                    nickname,
                    emojis: Vec::new(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SyncSettings;
    use crate::state_store::InMemoryStateStore;
    use crate::sync::{DeliveryError, HandleRecord, SyncTarget, TemplateRecord};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct Fixture {
        storage: Arc<InMemoryStateStore>,
        queue: Arc<SyncQueueStore>,
        settings: Arc<SettingsService>,
        library: LocalLibrary,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStateStore::new());
        let queue = Arc::new(SyncQueueStore::new(storage.clone()).expect("queue"));
        let settings = Arc::new(SettingsService::load(storage.clone()).expect("settings"));
        let library = LocalLibrary::new(storage.clone(), queue.clone(), settings.clone());
        Fixture {
            storage,
            queue,
            settings,
            library,
        }
    }

    #[test]
    fn first_run_seeds_templates_and_migrates_nicknames() {
        let f = fixture();
        f.storage
            .set(LEGACY_NICKNAMES_KEY, serde_json::json!({ "rjchicago": "RJ" }))
            .expect("seed");

        f.library.initialize_defaults().expect("init");

        let templates = f.library.templates().expect("templates");
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].title, "Supportive");
        let users = f.library.users().expect("users");
        assert_eq!(users["rjchicago"].nickname, "RJ");
        assert!(users["rjchicago"].emojis.is_empty());

        // Running again leaves existing data alone.
        f.library.delete_template("1").expect("delete");
        f.library.initialize_defaults().expect("init again");
        assert_eq!(f.library.templates().expect("templates").len(), 1);
    }

    #[test]
    fn users_fall_back_to_legacy_map_before_migration() {
        let f = fixture();
        f.storage
            .set(LEGACY_NICKNAMES_KEY, serde_json::json!({ "bob": "Bobby" }))
            .expect("seed");
        assert_eq!(f.library.users().expect("users")["bob"].nickname, "Bobby");
    }

    #[test]
    fn save_user_writes_locally_and_queues() {
        let f = fixture();
        let id = f
            .library
            .save_user("@alice", "Al", vec!["🔥 💯".to_string()])
            .expect("save")
            .expect("queued");

        let users = f.library.users().expect("users");
        assert_eq!(users["alice"].emojis, vec!["🔥", "💯"]);

        let items = f.queue.pending_items().expect("pending");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(
            items[0].payload.handles,
            vec![HandleRecord::new("alice", "Al", vec!["🔥".to_string(), "💯".to_string()])]
        );
    }

    #[test]
    fn clearing_a_nickname_deletes_without_queueing() {
        let f = fixture();
        f.library.save_user("alice", "Al", Vec::new()).expect("save");
        let queued = f.library.save_user("alice", "  ", Vec::new()).expect("clear");

        assert!(queued.is_none());
        assert!(!f.library.users().expect("users").contains_key("alice"));
        assert_eq!(f.queue.pending_items().expect("pending").len(), 1);
    }

    #[test]
    fn save_template_rejects_empty_body_and_queues_edits() {
        let f = fixture();
        let err = f
            .library
            .save_template(TemplateUpdate {
                title: "Empty".to_string(),
                body: "  ".to_string(),
                ..Default::default()
            })
            .expect_err("empty body");
        assert!(matches!(err, Error::Validation(_)));

        let created = f
            .library
            .save_template(TemplateUpdate {
                title: "Thanks".to_string(),
                body: "Thanks {{nickname}}".to_string(),
                favorite: true,
                ..Default::default()
            })
            .expect("create");
        let edited = f
            .library
            .save_template(TemplateUpdate {
                id: Some(created.id.clone()),
                title: "Thanks".to_string(),
                body: "Thank you {{nickname}}".to_string(),
                ..Default::default()
            })
            .expect("edit");

        assert_eq!(edited.id, created.id);
        assert_eq!(edited.created_at, created.created_at);
        assert_eq!(f.library.templates().expect("templates").len(), 1);
        let items = f.queue.pending_items().expect("pending");
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].payload.templates[0].body, "Thank you {{nickname}}");

        assert!(f.library.delete_template(&created.id).expect("delete"));
        assert_eq!(f.queue.pending_items().expect("pending").len(), 2);
    }

    #[test]
    fn merge_remote_does_not_clobber_local_or_pending_edits() {
        let f = fixture();
        f.library.save_user("alice", "Local Al", Vec::new()).expect("save");
        f.storage.set(USERS_KEY, serde_json::json!({})).expect("reset users");
        f.library
            .save_template(TemplateUpdate {
                title: "Hi".to_string(),
                body: "Hello".to_string(),
                ..Default::default()
            })
            .expect("template");

        let snapshot = RemoteSnapshot {
            handles: vec![
                HandleRecord::new("alice", "Remote Al", Vec::new()),
                HandleRecord::new("bob", "Bobby", vec!["🎨".to_string()]),
            ],
            templates: vec![
                TemplateRecord {
                    id: Some("7".to_string()),
                    title: "Hi".to_string(),
                    body: "Hello".to_string(),
                    tags: Vec::new(),
                    favorite: true,
                    created_at: None,
                    updated_at: None,
                },
                TemplateRecord {
                    id: Some("8".to_string()),
                    title: "Hi".to_string(),
                    body: "Hello there".to_string(),
                    tags: vec!["new".to_string()],
                    favorite: false,
                    created_at: Some(1),
                    updated_at: Some(2),
                },
            ],
        };

        let report = f.library.merge_remote(snapshot).expect("merge");
        assert_eq!(report.handles_added, 1);
        assert_eq!(report.handles_kept_local, 1);
        assert_eq!(report.templates_added, 1);

        let users = f.library.users().expect("users");
        assert!(!users.contains_key("alice"));
        assert_eq!(users["bob"].nickname, "Bobby");
        let templates = f.library.templates().expect("templates");
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[1].id, "8");
    }

    #[test]
    fn pulled_untitled_template_matches_its_local_original() {
        let f = fixture();
        f.library
            .save_template(TemplateUpdate {
                title: String::new(),
                body: "Untitled reply body".to_string(),
                ..Default::default()
            })
            .expect("template");

        // The server returns the body prefix as the title.
        let snapshot = RemoteSnapshot {
            handles: Vec::new(),
            templates: vec![TemplateRecord {
                id: Some("3".to_string()),
                title: "Untitled reply body".to_string(),
                body: "Untitled reply body".to_string(),
                tags: Vec::new(),
                favorite: false,
                created_at: None,
                updated_at: None,
            }],
        };

        let report = f.library.merge_remote(snapshot).expect("merge");
        assert_eq!(report.templates_added, 0);
        assert_eq!(f.library.templates().expect("templates").len(), 1);
    }

    #[test]
    fn export_round_trips_through_import() {
        let source = fixture();
        source.library.initialize_defaults().expect("init");
        source
            .library
            .save_user("alice", "Al", vec!["🔥".to_string()])
            .expect("save");
        let export = source.library.export_data().expect("export");
        assert!(export.nicknames.is_none());

        let json = serde_json::to_value(&export).expect("serialize");
        assert!(json.get("nicknames").is_none());
        let parsed: LibraryExport = serde_json::from_value(json).expect("parse");

        let target = fixture();
        target.library.import_data(parsed).expect("import").expect("queued");
        assert_eq!(
            target.library.templates().expect("templates"),
            source.library.templates().expect("templates")
        );
        assert_eq!(
            target.library.users().expect("users"),
            source.library.users().expect("users")
        );

        let items = target.queue.pending_items().expect("pending");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload.handles.len(), 1);
        assert_eq!(items[0].payload.templates.len(), 2);
    }

    #[test]
    fn import_accepts_legacy_nicknames_and_queues_one_batch() {
        let f = fixture();
        let export: LibraryExport = serde_json::from_value(serde_json::json!({
            "nicknames": { "carol": "C" },
            "responses": [{ "id": "a", "title": "T", "body": "B" }]
        }))
        .expect("parse");

        f.library.import_data(export).expect("import").expect("queued");
        assert_eq!(f.library.users().expect("users")["carol"].nickname, "C");
        let items = f.queue.pending_items().expect("pending");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].payload.handles.len(), 1);
        assert_eq!(items[0].payload.templates.len(), 1);
    }

    #[test]
    fn render_uses_nickname_then_fallback_behavior() {
        let f = fixture();
        f.library.initialize_defaults().expect("init");
        f.library.save_user("rjchicago", "RJ", Vec::new()).expect("save");

        let text = f
            .library
            .render_for("1", Some("rjchicago"), Some("Robert"))
            .expect("render");
        assert_eq!(text, "This is amazing, RJ! 🙌");

        let text = f
            .library
            .render_for("1", Some("stranger"), Some("Stranger Things"))
            .expect("render");
        assert_eq!(text, "This is amazing, Stranger Things! 🙌");

        f.settings
            .update(SyncSettings {
                fallback_behavior: FallbackBehavior::Handle,
                ..Default::default()
            })
            .expect("settings");
        let text = f
            .library
            .render_for("1", Some("stranger"), Some("Stranger Things"))
            .expect("render");
        assert_eq!(text, "This is amazing, stranger! 🙌");

        assert!(matches!(
            f.library.render_for("missing", None, None),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn favorites_respect_configured_count() {
        let f = fixture();
        for n in 0..4 {
            f.library
                .save_template(TemplateUpdate {
                    title: format!("T{n}"),
                    body: format!("B{n}"),
                    favorite: true,
                    ..Default::default()
                })
                .expect("save");
        }
        f.settings
            .update(SyncSettings {
                favorites_count: 3,
                ..Default::default()
            })
            .expect("settings");
        assert_eq!(f.library.favorites().expect("favorites").len(), 3);
    }

    struct ChannelReporter {
        sent: mpsc::UnboundedSender<UsageEvent>,
        fail: bool,
    }

    #[async_trait]
    impl UsageReporter for ChannelReporter {
        async fn report_usage(&self, _target: &SyncTarget, event: &UsageEvent) -> std::result::Result<(), DeliveryError> {
            let _ = self.sent.send(event.clone());
            if self.fail {
                return Err(DeliveryError::Network("offline".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn record_usage_is_fire_and_forget() {
        let f = fixture();
        f.settings
            .update(SyncSettings {
                server_url: "https://replyte.test".to_string(),
                api_key: "secret".to_string(),
                ..Default::default()
            })
            .expect("settings");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let library = LocalLibrary::new(f.storage.clone(), f.queue.clone(), f.settings.clone())
            .with_usage_reporter(Arc::new(ChannelReporter { sent: tx, fail: true }));

        library.record_usage("1", Some("@alice"));
        let event = rx.recv().await.expect("event");
        assert_eq!(event.template_id, "1");
        assert_eq!(event.x_user_handle.as_deref(), Some("alice"));
        assert_eq!(f.queue.pending_items().expect("pending").len(), 0);
    }
}
