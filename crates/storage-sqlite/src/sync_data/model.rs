//! Database models for the sync tables.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use replyte_core::sync::{parse_stored_emojis, HandleRecord, SyncUser, TemplateRecord};

/// Timestamps are stored as fixed-width RFC 3339 text so they sort and
/// compare lexically.
pub(crate) fn db_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn timestamp_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.timestamp_millis())
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserDB {
    pub id: String,
    pub email: String,
    pub tier: String,
    pub api_key: Option<String>,
    pub created_at: String,
}

impl From<UserDB> for SyncUser {
    fn from(db: UserDB) -> Self {
        Self {
            id: db.id,
            email: db.email,
            tier: db.tier,
        }
    }
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::handles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct HandleDB {
    pub id: i32,
    pub user_id: String,
    pub handle: String,
    pub nickname: String,
    /// JSON list text; older rows may hold a space-separated string.
    pub emojis: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<HandleDB> for HandleRecord {
    fn from(db: HandleDB) -> Self {
        let emojis = parse_stored_emojis(Some(&db.emojis));
        HandleRecord::new(db.handle, db.nickname, emojis)
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::handles)]
pub struct NewHandleDB {
    pub user_id: String,
    pub handle: String,
    pub nickname: String,
    pub emojis: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::templates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TemplateDB {
    pub id: i32,
    pub user_id: String,
    pub name: String,
    pub content: String,
    pub tags: String,
    pub favorite: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TemplateDB> for TemplateRecord {
    fn from(db: TemplateDB) -> Self {
        Self {
            id: Some(db.id.to_string()),
            tags: serde_json::from_str(&db.tags).unwrap_or_default(),
            favorite: db.favorite,
            created_at: timestamp_millis(&db.created_at),
            updated_at: timestamp_millis(&db.updated_at),
            title: db.name,
            body: db.content,
        }
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::templates)]
pub struct NewTemplateDB {
    pub user_id: String,
    pub name: String,
    pub content: String,
    pub tags: String,
    pub favorite: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Queryable, Identifiable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::usage_log)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UsageLogDB {
    pub id: i32,
    pub user_id: String,
    pub template_id: String,
    pub x_user_handle: Option<String>,
    pub created_at: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::usage_log)]
pub struct NewUsageLogDB {
    pub user_id: String,
    pub template_id: String,
    pub x_user_handle: Option<String>,
    pub created_at: String,
}
