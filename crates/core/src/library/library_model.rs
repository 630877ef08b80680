use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::sync::{deserialize_emojis, template_sync_name, HandleRecord, TemplateRecord};

/// Per-handle personalization stored under `users`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub nickname: String,
    #[serde(default, deserialize_with = "deserialize_emojis")]
    pub emojis: Vec<String>,
}

pub type UserDirectory = BTreeMap<String, UserProfile>;

/// Template as stored under `responses`. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTemplate {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl ReplyTemplate {
    /// Whether a (title, body) pair names this template on the server, where
    /// an empty title stands for the body prefix.
    pub fn same_identity(&self, title: &str, body: &str) -> bool {
        self.body == body && template_sync_name(&self.title, &self.body) == template_sync_name(title, body)
    }

    pub fn to_record(&self) -> TemplateRecord {
        TemplateRecord {
            id: Some(self.id.clone()),
            title: self.title.clone(),
            body: self.body.clone(),
            tags: self.tags.clone(),
            favorite: self.favorite,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        }
    }
}

/// Input for creating or editing a template. A missing id creates a new one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateUpdate {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub favorite: bool,
}

pub fn handle_record(handle: &str, profile: &UserProfile) -> HandleRecord {
    HandleRecord::new(handle, profile.nickname.clone(), profile.emojis.clone())
}

/// Counts from merging a pulled snapshot into the local library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub handles_added: usize,
    pub templates_added: usize,
    pub handles_kept_local: usize,
}
