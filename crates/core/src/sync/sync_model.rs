//! Sync queue domain models and wire records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::emojis::deserialize_emojis;

/// Nickname/emoji annotation for one correspondent handle.
///
/// Natural key on the server: (owner, `handle`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleRecord {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub handle: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub nickname: String,
    #[serde(default, deserialize_with = "deserialize_emojis")]
    pub emojis: Vec<String>,
}

impl HandleRecord {
    pub fn new(handle: impl Into<String>, nickname: impl Into<String>, emojis: Vec<String>) -> Self {
        Self {
            handle: handle.into(),
            nickname: nickname.into(),
            emojis,
        }
    }
}

/// Reply template as exchanged with the sync server.
///
/// Natural key on the server: (owner, name, content), where name is the title
/// (or a body prefix when the title is empty) and content is the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateRecord {
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub title: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub body: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub favorite: bool,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Treats an explicit `null` like a missing field.
pub fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Template ids are strings locally but integers when they come from the server.
fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(v)) => Some(v),
        Some(serde_json::Value::Number(v)) => Some(v.to_string()),
        _ => None,
    })
}

/// One logical batch of upserts. This is both the queued payload and the
/// `POST /data` request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub handles: Vec<HandleRecord>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub templates: Vec<TemplateRecord>,
}

/// Data returned by `GET /data`; same shape as an upsert batch.
pub type RemoteSnapshot = SyncPayload;

impl SyncPayload {
    pub fn handles(handles: Vec<HandleRecord>) -> Self {
        Self {
            handles,
            templates: Vec::new(),
        }
    }

    pub fn templates(templates: Vec<TemplateRecord>) -> Self {
        Self {
            handles: Vec::new(),
            templates,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty() && self.templates.is_empty()
    }
}

/// A queued batch awaiting delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationItem {
    pub id: String,
    pub payload: SyncPayload,
    pub created_at: DateTime<Utc>,
    pub next_eligible_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl MutationItem {
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.next_eligible_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncLogKind {
    Queued,
    Success,
    Error,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: SyncLogKind,
    pub message: String,
}

/// Result of one delivery attempt, as recorded against the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    Failure(String),
}

/// Status surface polled by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending: usize,
    /// Queued items at or past the retry limit. Exhausted items are removed in
    /// the same operation, so this normally reads 0.
    pub failed: usize,
    pub has_errors: bool,
    pub log: Vec<SyncLogEntry>,
}
