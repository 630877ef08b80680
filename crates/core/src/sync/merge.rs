//! Server-side upsert contract for handle and template batches.
//!
//! Records are matched on natural keys, never on client ids, so delivering
//! the same batch twice leaves the store unchanged.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Result;

use super::emojis::normalize_emojis;
use super::sync_model::{HandleRecord, RemoteSnapshot, SyncPayload, TemplateRecord};
use super::transport::UsageEvent;

/// Length, in UTF-16 code units, of the body prefix used as a template name
/// when the title is empty.
pub const TEMPLATE_NAME_FALLBACK_CHARS: usize = 50;

/// Name a template is stored under on the server: the title, or the body
/// prefix when the title is empty. A character that would straddle the
/// limit is left out.
pub fn template_sync_name(title: &str, body: &str) -> String {
    if !title.is_empty() {
        return title.to_string();
    }
    let mut units = 0;
    body.chars()
        .take_while(|c| {
            units += c.len_utf16();
            units <= TEMPLATE_NAME_FALLBACK_CHARS
        })
        .collect()
}

/// Validated handle upsert. Key: (owner, `handle`); merged: nickname, emojis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleUpsert {
    pub handle: String,
    pub nickname: String,
    pub emojis: Vec<String>,
}

/// Validated template upsert. Key: (owner, `name`, `content`); merged: tags,
/// favorite, updated_at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateUpsert {
    pub name: String,
    pub content: String,
    pub tags: Vec<String>,
    pub favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Returns `None` for records without a handle.
pub fn prepare_handle_upsert(record: &HandleRecord) -> Option<HandleUpsert> {
    let handle = record.handle.trim().trim_start_matches('@');
    if handle.is_empty() {
        return None;
    }
    Some(HandleUpsert {
        handle: handle.to_string(),
        nickname: record.nickname.trim().to_string(),
        emojis: normalize_emojis(&record.emojis),
    })
}

/// Returns `None` for templates with an empty body; those are dropped
/// without failing the batch.
pub fn prepare_template_upsert(record: &TemplateRecord, now: DateTime<Utc>) -> Option<TemplateUpsert> {
    if record.body.trim().is_empty() {
        return None;
    }

    Some(TemplateUpsert {
        name: template_sync_name(&record.title, &record.body),
        content: record.body.clone(),
        tags: record.tags.clone(),
        favorite: record.favorite,
        created_at: record.created_at.and_then(millis_to_datetime).unwrap_or(now),
        updated_at: record.updated_at.and_then(millis_to_datetime).unwrap_or(now),
    })
}

pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Counts from applying one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchApplyReport {
    pub handles_applied: usize,
    pub templates_applied: usize,
    /// Invalid records plus records whose write failed.
    pub skipped: usize,
}

/// Account that owns handles and templates on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUser {
    pub id: String,
    pub email: String,
    pub tier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UsageGrouping {
    Nickname,
    Template,
    #[default]
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReportRow {
    /// Nickname (falling back to the handle) or template name, by grouping.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    pub count: i64,
}

/// Storage operations behind the `/sync` endpoints.
#[async_trait]
pub trait SyncDataRepositoryTrait: Send + Sync {
    fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<SyncUser>>;

    fn load_snapshot(&self, user_id: &str) -> Result<RemoteSnapshot>;

    /// Applies every record independently. Invalid or failing records are
    /// skipped; the call succeeds once all valid records are stored.
    async fn apply_batch(&self, user_id: &str, payload: SyncPayload) -> Result<BatchApplyReport>;

    async fn record_usage(&self, user_id: &str, event: UsageEvent) -> Result<()>;

    fn usage_report(
        &self,
        user_id: &str,
        days: i64,
        grouping: UsageGrouping,
    ) -> Result<Vec<UsageReportRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(title: &str, body: &str) -> TemplateRecord {
        TemplateRecord {
            id: None,
            title: title.to_string(),
            body: body.to_string(),
            tags: vec!["uplift".to_string()],
            favorite: true,
            created_at: Some(1_700_000_000_000),
            updated_at: None,
        }
    }

    #[test]
    fn empty_body_is_rejected() {
        let now = Utc::now();
        assert!(prepare_template_upsert(&template("Title", ""), now).is_none());
        assert!(prepare_template_upsert(&template("Title", "   "), now).is_none());
    }

    #[test]
    fn missing_title_falls_back_to_body_prefix() {
        let body = "x".repeat(80);
        let upsert = prepare_template_upsert(&template("", &body), Utc::now()).expect("upsert");
        assert_eq!(upsert.name.chars().count(), TEMPLATE_NAME_FALLBACK_CHARS);
        assert_eq!(upsert.content, body);
    }

    #[test]
    fn body_prefix_counts_utf16_units() {
        let body = "🙌".repeat(60);
        let upsert = prepare_template_upsert(&template("", &body), Utc::now()).expect("upsert");
        assert_eq!(upsert.name, "🙌".repeat(25));

        // An emoji that would cross the limit is dropped rather than split.
        let body = format!("a{}", "🙌".repeat(30));
        assert_eq!(template_sync_name("", &body), format!("a{}", "🙌".repeat(24)));
        assert_eq!(template_sync_name("Title", &body), "Title");
    }

    #[test]
    fn timestamps_come_from_millis_or_now() {
        let now = Utc::now();
        let upsert = prepare_template_upsert(&template("T", "B"), now).expect("upsert");
        assert_eq!(upsert.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(upsert.updated_at, now);
    }

    #[test]
    fn handle_upsert_strips_at_sign_and_rejects_blank() {
        let record = HandleRecord::new(" @alice ", " Al ", vec![" 🔥 ".to_string()]);
        let upsert = prepare_handle_upsert(&record).expect("upsert");
        assert_eq!(upsert.handle, "alice");
        assert_eq!(upsert.nickname, "Al");
        assert_eq!(upsert.emojis, vec!["🔥"]);
        assert!(prepare_handle_upsert(&HandleRecord::new("  ", "x", Vec::new())).is_none());
    }
}
