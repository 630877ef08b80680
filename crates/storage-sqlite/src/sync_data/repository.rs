//! Repository behind the `/sync` endpoints.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::{debug, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use replyte_core::errors::{Error, Result};
use replyte_core::sync::{
    prepare_handle_upsert, prepare_template_upsert, BatchApplyReport, HandleRecord, HandleUpsert,
    RemoteSnapshot, SyncDataRepositoryTrait, SyncPayload, SyncUser, TemplateRecord,
    TemplateUpsert, UsageEvent, UsageGrouping, UsageReportRow,
};

use super::model::{
    db_timestamp, HandleDB, NewHandleDB, NewTemplateDB, NewUsageLogDB, TemplateDB, UsageLogDB,
    UserDB,
};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{handles, templates, usage_log, users};

const API_KEY_PREFIX: &str = "rk_";
const API_KEY_LENGTH: usize = 40;

fn generate_api_key() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect();
    format!("{}{}", API_KEY_PREFIX, random)
}

fn upsert_handle(
    conn: &mut SqliteConnection,
    owner: &str,
    upsert: &HandleUpsert,
    stamp: &str,
) -> QueryResult<usize> {
    let emojis = serde_json::to_string(&upsert.emojis).unwrap_or_else(|_| "[]".to_string());
    let row = NewHandleDB {
        user_id: owner.to_string(),
        handle: upsert.handle.clone(),
        nickname: upsert.nickname.clone(),
        emojis: emojis.clone(),
        created_at: stamp.to_string(),
        updated_at: stamp.to_string(),
    };

    diesel::insert_into(handles::table)
        .values(&row)
        .on_conflict((handles::user_id, handles::handle))
        .do_update()
        .set((
            handles::nickname.eq(&upsert.nickname),
            handles::emojis.eq(emojis),
            handles::updated_at.eq(stamp),
        ))
        .execute(conn)
}

fn upsert_template(
    conn: &mut SqliteConnection,
    owner: &str,
    upsert: &TemplateUpsert,
) -> QueryResult<usize> {
    let tags = serde_json::to_string(&upsert.tags).unwrap_or_else(|_| "[]".to_string());
    let updated_at = db_timestamp(upsert.updated_at);
    let row = NewTemplateDB {
        user_id: owner.to_string(),
        name: upsert.name.clone(),
        content: upsert.content.clone(),
        tags: tags.clone(),
        favorite: upsert.favorite,
        created_at: db_timestamp(upsert.created_at),
        updated_at: updated_at.clone(),
    };

    diesel::insert_into(templates::table)
        .values(&row)
        .on_conflict((templates::user_id, templates::name, templates::content))
        .do_update()
        .set((
            templates::tags.eq(tags),
            templates::favorite.eq(upsert.favorite),
            templates::updated_at.eq(updated_at),
        ))
        .execute(conn)
}

pub struct SyncDataRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SyncDataRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<SyncUser>> {
        let mut conn = get_connection(&self.pool)?;
        let user = users::table
            .filter(users::email.eq(email))
            .select(UserDB::as_select())
            .first::<UserDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(user.map(SyncUser::from))
    }

    pub async fn create_user(&self, email: &str, tier: &str) -> Result<SyncUser> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(Error::validation("Email is required"));
        }
        let row = UserDB {
            id: Uuid::now_v7().to_string(),
            email,
            tier: tier.to_string(),
            api_key: None,
            created_at: db_timestamp(Utc::now()),
        };

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<SyncUser> {
                let created = diesel::insert_into(users::table)
                    .values(&row)
                    .returning(UserDB::as_returning())
                    .get_result(conn)
                    .map_err(StorageError::from)?;
                Ok(SyncUser::from(created))
            })
            .await
    }

    /// Replaces the user's API key with a fresh one and returns it.
    pub async fn generate_api_key(&self, user_id: &str) -> Result<String> {
        let user_id = user_id.to_string();
        let api_key = generate_api_key();
        let stored = api_key.clone();

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                let updated = diesel::update(users::table.find(&user_id))
                    .set(users::api_key.eq(Some(stored)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(Error::NotFound(format!("User {}", user_id)));
                }
                Ok(())
            })
            .await?;
        Ok(api_key)
    }

    fn load_usage_rows(&self, conn: &mut SqliteConnection, owner: &str, since: &str) -> Result<Vec<UsageLogDB>> {
        let rows = usage_log::table
            .filter(usage_log::user_id.eq(owner))
            .filter(usage_log::created_at.ge(since))
            .select(UsageLogDB::as_select())
            .load::<UsageLogDB>(conn)
            .map_err(StorageError::from)?;
        Ok(rows)
    }
}

#[async_trait]
impl SyncDataRepositoryTrait for SyncDataRepository {
    fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<SyncUser>> {
        let mut conn = get_connection(&self.pool)?;
        let user = users::table
            .filter(users::api_key.eq(api_key))
            .select(UserDB::as_select())
            .first::<UserDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        Ok(user.map(SyncUser::from))
    }

    fn load_snapshot(&self, user_id: &str) -> Result<RemoteSnapshot> {
        let mut conn = get_connection(&self.pool)?;
        let handle_rows = handles::table
            .filter(handles::user_id.eq(user_id))
            .order(handles::handle.asc())
            .select(HandleDB::as_select())
            .load::<HandleDB>(&mut conn)
            .map_err(StorageError::from)?;
        let template_rows = templates::table
            .filter(templates::user_id.eq(user_id))
            .order(templates::id.asc())
            .select(TemplateDB::as_select())
            .load::<TemplateDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(SyncPayload {
            handles: handle_rows.into_iter().map(HandleRecord::from).collect(),
            templates: template_rows.into_iter().map(TemplateRecord::from).collect(),
        })
    }

    async fn apply_batch(&self, user_id: &str, payload: SyncPayload) -> Result<BatchApplyReport> {
        let owner = user_id.to_string();
        let now = Utc::now();
        let mut report = BatchApplyReport::default();

        let handle_upserts: Vec<HandleUpsert> = payload
            .handles
            .iter()
            .filter_map(|record| {
                let upsert = prepare_handle_upsert(record);
                if upsert.is_none() {
                    debug!("[SyncData] Skipping handle record without a handle");
                    report.skipped += 1;
                }
                upsert
            })
            .collect();
        let template_upserts: Vec<TemplateUpsert> = payload
            .templates
            .iter()
            .filter_map(|record| {
                let upsert = prepare_template_upsert(record, now);
                if upsert.is_none() {
                    debug!("[SyncData] Skipping template '{}' without a body", record.title);
                    report.skipped += 1;
                }
                upsert
            })
            .collect();

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<BatchApplyReport> {
                let stamp = db_timestamp(now);
                // Each record gets its own savepoint so one bad row cannot
                // undo the others.
                for upsert in &handle_upserts {
                    match conn.transaction(|tx| upsert_handle(tx, &owner, upsert, &stamp)) {
                        Ok(_) => report.handles_applied += 1,
                        Err(err) => {
                            warn!("[SyncData] Failed to upsert handle '{}': {}", upsert.handle, err);
                            report.skipped += 1;
                        }
                    }
                }
                for upsert in &template_upserts {
                    match conn.transaction(|tx| upsert_template(tx, &owner, upsert)) {
                        Ok(_) => report.templates_applied += 1,
                        Err(err) => {
                            warn!("[SyncData] Failed to upsert template '{}': {}", upsert.name, err);
                            report.skipped += 1;
                        }
                    }
                }
                Ok(report)
            })
            .await
    }

    async fn record_usage(&self, user_id: &str, event: UsageEvent) -> Result<()> {
        if event.template_id.trim().is_empty() {
            return Err(Error::validation("templateId is required"));
        }
        let row = NewUsageLogDB {
            user_id: user_id.to_string(),
            template_id: event.template_id,
            x_user_handle: event
                .x_user_handle
                .map(|h| h.trim().trim_start_matches('@').to_string())
                .filter(|h| !h.is_empty()),
            created_at: db_timestamp(Utc::now()),
        };

        self.writer
            .exec(move |conn: &mut SqliteConnection| -> Result<()> {
                diesel::insert_into(usage_log::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn usage_report(
        &self,
        user_id: &str,
        days: i64,
        grouping: UsageGrouping,
    ) -> Result<Vec<UsageReportRow>> {
        if days < 0 {
            return Err(Error::validation("days must not be negative"));
        }
        let since = db_timestamp(Utc::now() - Duration::days(days));
        let mut conn = get_connection(&self.pool)?;

        let rows = self.load_usage_rows(&mut conn, user_id, &since)?;
        let nicknames: HashMap<String, String> = handles::table
            .filter(handles::user_id.eq(user_id))
            .select((handles::handle, handles::nickname))
            .load::<(String, String)>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .filter(|(_, nickname)| !nickname.is_empty())
            .collect();
        let template_names: HashMap<String, String> = templates::table
            .filter(templates::user_id.eq(user_id))
            .select((templates::id, templates::name))
            .load::<(i32, String)>(&mut conn)
            .map_err(StorageError::from)?
            .into_iter()
            .map(|(id, name)| (id.to_string(), name))
            .collect();

        let mut counts: BTreeMap<(String, Option<String>, Option<String>), i64> = BTreeMap::new();
        for row in rows {
            let template = template_names.get(&row.template_id).cloned();
            let person = row
                .x_user_handle
                .as_ref()
                .and_then(|h| nicknames.get(h).cloned())
                .or_else(|| row.x_user_handle.clone())
                .unwrap_or_default();

            let key = match grouping {
                UsageGrouping::Nickname => (person, row.x_user_handle, None),
                UsageGrouping::Template => match template {
                    Some(name) => (name, None, None),
                    None => continue,
                },
                UsageGrouping::Both => match template {
                    Some(name) => (person, row.x_user_handle, Some(name)),
                    None => continue,
                },
            };
            *counts.entry(key).or_insert(0) += 1;
        }

        let mut report: Vec<UsageReportRow> = counts
            .into_iter()
            .map(|((name, handle, template), count)| UsageReportRow {
                name,
                handle,
                template,
                count,
            })
            .collect();
        report.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, init, run_migrations, spawn_writer};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Arc<DbPool>, SyncDataRepository) {
        let dir = tempdir().expect("tempdir");
        let db_path = init(&dir.path().to_string_lossy()).expect("init");
        run_migrations(&db_path).expect("migrate");
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer(pool.as_ref().clone());
        let repo = SyncDataRepository::new(pool.clone(), writer);
        (dir, pool, repo)
    }

    fn template(title: &str, body: &str, favorite: bool) -> TemplateRecord {
        TemplateRecord {
            id: None,
            title: title.to_string(),
            body: body.to_string(),
            tags: vec!["uplift".to_string()],
            favorite,
            created_at: None,
            updated_at: None,
        }
    }

    fn count_rows(pool: &DbPool) -> (i64, i64) {
        let mut conn = get_connection(pool).expect("conn");
        let h = handles::table.count().get_result(&mut conn).expect("count handles");
        let t = templates::table.count().get_result(&mut conn).expect("count templates");
        (h, t)
    }

    #[tokio::test]
    async fn api_key_lookup_finds_owner() {
        let (_dir, _pool, repo) = setup();
        let user = repo.create_user("Owner@Replyte.test", "free").await.expect("user");
        assert_eq!(user.email, "owner@replyte.test");
        assert!(repo.find_user_by_api_key("rk_nope").expect("lookup").is_none());

        let key = repo.generate_api_key(&user.id).await.expect("key");
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + API_KEY_LENGTH);
        assert_eq!(repo.find_user_by_api_key(&key).expect("lookup"), Some(user.clone()));

        let rotated = repo.generate_api_key(&user.id).await.expect("rotate");
        assert!(repo.find_user_by_api_key(&key).expect("lookup").is_none());
        assert!(repo.find_user_by_api_key(&rotated).expect("lookup").is_some());
        assert!(matches!(
            repo.generate_api_key("missing").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn handle_upsert_is_idempotent_and_last_write_wins() {
        let (_dir, pool, repo) = setup();
        let user = repo.create_user("a@replyte.test", "free").await.expect("user");
        let batch = SyncPayload::handles(vec![HandleRecord::new(
            "alice",
            "Al",
            vec!["🔥".to_string()],
        )]);

        repo.apply_batch(&user.id, batch.clone()).await.expect("first");
        repo.apply_batch(&user.id, batch).await.expect("second");
        assert_eq!(count_rows(&pool).0, 1);

        let report = repo
            .apply_batch(
                &user.id,
                SyncPayload::handles(vec![HandleRecord::new("alice", "Alice", Vec::new())]),
            )
            .await
            .expect("update");
        assert_eq!(report.handles_applied, 1);

        let snapshot = repo.load_snapshot(&user.id).expect("snapshot");
        assert_eq!(snapshot.handles, vec![HandleRecord::new("alice", "Alice", Vec::new())]);
    }

    #[tokio::test]
    async fn handles_are_scoped_per_owner() {
        let (_dir, pool, repo) = setup();
        let first = repo.create_user("one@replyte.test", "free").await.expect("user");
        let second = repo.create_user("two@replyte.test", "free").await.expect("user");
        let batch = SyncPayload::handles(vec![HandleRecord::new("alice", "Al", Vec::new())]);

        repo.apply_batch(&first.id, batch.clone()).await.expect("first");
        repo.apply_batch(&second.id, batch).await.expect("second");
        assert_eq!(count_rows(&pool).0, 2);
        assert_eq!(repo.load_snapshot(&first.id).expect("snapshot").handles.len(), 1);
    }

    #[tokio::test]
    async fn template_identity_is_title_and_body() {
        let (_dir, pool, repo) = setup();
        let user = repo.create_user("t@replyte.test", "free").await.expect("user");

        repo.apply_batch(
            &user.id,
            SyncPayload::templates(vec![
                template("Hi", "Hello there", false),
                template("Hi", "Hello again", false),
            ]),
        )
        .await
        .expect("insert");
        assert_eq!(count_rows(&pool).1, 2);

        repo.apply_batch(&user.id, SyncPayload::templates(vec![template("Hi", "Hello there", true)]))
            .await
            .expect("update");
        assert_eq!(count_rows(&pool).1, 2);

        let snapshot = repo.load_snapshot(&user.id).expect("snapshot");
        let updated = snapshot
            .templates
            .iter()
            .find(|t| t.body == "Hello there")
            .expect("template");
        assert!(updated.favorite);
        assert_eq!(updated.title, "Hi");
        assert_eq!(updated.tags, vec!["uplift"]);
    }

    #[tokio::test]
    async fn empty_body_is_skipped_without_failing_batch() {
        let (_dir, pool, repo) = setup();
        let user = repo.create_user("e@replyte.test", "free").await.expect("user");

        let report = repo
            .apply_batch(
                &user.id,
                SyncPayload {
                    handles: vec![HandleRecord::new("", "Nobody", Vec::new())],
                    templates: vec![
                        template("One", "First", false),
                        template("Blank", "", false),
                        template("", "Untitled body", false),
                    ],
                },
            )
            .await
            .expect("batch");

        assert_eq!(report.templates_applied, 2);
        assert_eq!(report.handles_applied, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(count_rows(&pool), (0, 2));

        let names: Vec<_> = repo
            .load_snapshot(&user.id)
            .expect("snapshot")
            .templates
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(names, vec!["One", "Untitled body"]);
    }

    #[tokio::test]
    async fn legacy_emoji_strings_are_read_as_lists() {
        let (_dir, pool, repo) = setup();
        let user = repo.create_user("l@replyte.test", "free").await.expect("user");
        {
            let mut conn = get_connection(&pool).expect("conn");
            diesel::insert_into(handles::table)
                .values(NewHandleDB {
                    user_id: user.id.clone(),
                    handle: "bob".to_string(),
                    nickname: "B".to_string(),
                    emojis: "🔥 💯".to_string(),
                    created_at: db_timestamp(Utc::now()),
                    updated_at: db_timestamp(Utc::now()),
                })
                .execute(&mut conn)
                .expect("insert legacy row");
        }

        let snapshot = repo.load_snapshot(&user.id).expect("snapshot");
        assert_eq!(snapshot.handles[0].emojis, vec!["🔥", "💯"]);
    }

    #[tokio::test]
    async fn usage_report_groups_by_requested_dimension() {
        let (_dir, _pool, repo) = setup();
        let user = repo.create_user("u@replyte.test", "free").await.expect("user");
        repo.apply_batch(
            &user.id,
            SyncPayload {
                handles: vec![HandleRecord::new("alice", "Al", Vec::new())],
                templates: vec![template("Thanks", "Thanks!", false)],
            },
        )
        .await
        .expect("seed");
        let template_id = repo.load_snapshot(&user.id).expect("snapshot").templates[0]
            .id
            .clone()
            .expect("id");

        for handle in ["alice", "alice", "bob"] {
            repo.record_usage(
                &user.id,
                UsageEvent {
                    template_id: template_id.clone(),
                    x_user_handle: Some(handle.to_string()),
                },
            )
            .await
            .expect("usage");
        }
        repo.record_usage(
            &user.id,
            UsageEvent {
                template_id: "local-only".to_string(),
                x_user_handle: None,
            },
        )
        .await
        .expect("usage");

        let by_nickname = repo
            .usage_report(&user.id, 7, UsageGrouping::Nickname)
            .expect("report");
        assert_eq!(by_nickname.len(), 3);
        assert_eq!(by_nickname[0].name, "Al");
        assert_eq!(by_nickname[0].handle.as_deref(), Some("alice"));
        assert_eq!(by_nickname[0].count, 2);

        let by_template = repo
            .usage_report(&user.id, 7, UsageGrouping::Template)
            .expect("report");
        assert_eq!(by_template.len(), 1);
        assert_eq!(by_template[0].name, "Thanks");
        assert_eq!(by_template[0].count, 3);

        let both = repo.usage_report(&user.id, 7, UsageGrouping::Both).expect("report");
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].template.as_deref(), Some("Thanks"));

        assert!(repo.usage_report(&user.id, -1, UsageGrouping::Both).is_err());
    }
}
