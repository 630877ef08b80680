//! Local key/value state used by the background service.
//!
//! Keys mirror the layout the extension keeps in its local storage area, so a
//! store can be seeded from (or exported to) that format unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{Error, Result};

pub const SYNC_QUEUE_KEY: &str = "syncQueue";
pub const SYNC_LOG_KEY: &str = "syncLog";
pub const SETTINGS_KEY: &str = "settings";
pub const USERS_KEY: &str = "users";
pub const RESPONSES_KEY: &str = "responses";
/// Pre-`users` format: a flat `handle -> nickname` map.
pub const LEGACY_NICKNAMES_KEY: &str = "nicknames";

/// Durable key/value storage for local state.
///
/// Implementations must make `set_many` atomic: either every entry is written
/// or none is.
pub trait LocalStateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    fn set_many(&self, entries: Vec<(String, serde_json::Value)>) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.set_many(vec![(key.to_string(), value)])
    }
}

/// Reads and deserializes a key, returning `None` when it is absent or null.
pub fn load_value<T: DeserializeOwned>(store: &dyn LocalStateStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

pub fn store_value<T: Serialize>(store: &dyn LocalStateStore, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?)
}

/// Process-local store. Used in tests and when no data directory is configured.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    values: Mutex<HashMap<String, serde_json::Value>>,
    writes: AtomicUsize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write calls that reached the store.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl LocalStateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let values = self.values.lock().map_err(|_| Error::poisoned("state store"))?;
        Ok(values.get(key).cloned())
    }

    fn set_many(&self, entries: Vec<(String, serde_json::Value)>) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| Error::poisoned("state store"))?;
        for (key, value) in entries {
            values.insert(key, value);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| Error::poisoned("state store"))?;
        values.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
