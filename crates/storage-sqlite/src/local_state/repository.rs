use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::warn;
use std::sync::Arc;

use replyte_core::errors::Result;
use replyte_core::state_store::LocalStateStore;

use super::model::LocalStateDB;
use crate::db::{get_connection, DbPool};
use crate::errors::StorageError;
use crate::schema::local_state;

/// Key/value rows in the `local_state` table.
///
/// Writes are synchronous and run in an immediate transaction on a pooled
/// connection; this database belongs to a single background process.
pub struct SqliteLocalStateStore {
    pool: Arc<DbPool>,
}

impl SqliteLocalStateStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

fn upsert_row(conn: &mut SqliteConnection, row: &LocalStateDB) -> QueryResult<usize> {
    diesel::insert_into(local_state::table)
        .values(row)
        .on_conflict(local_state::key)
        .do_update()
        .set((
            local_state::value.eq(&row.value),
            local_state::updated_at.eq(&row.updated_at),
        ))
        .execute(conn)
}

impl LocalStateStore for SqliteLocalStateStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = get_connection(&self.pool)?;
        let raw = local_state::table
            .find(key)
            .select(local_state::value)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        match raw {
            None => Ok(None),
            Some(text) => match serde_json::from_str(&text) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    warn!("[LocalState] Value for '{}' is not valid JSON: {}", key, err);
                    Ok(None)
                }
            },
        }
    }

    fn set_many(&self, entries: Vec<(String, serde_json::Value)>) -> Result<()> {
        let updated_at = Utc::now().to_rfc3339();
        let rows = entries
            .into_iter()
            .map(|(key, value)| {
                Ok(LocalStateDB {
                    key,
                    value: serde_json::to_string(&value)?,
                    updated_at: updated_at.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = get_connection(&self.pool)?;
        conn.immediate_transaction::<_, diesel::result::Error, _>(|tx| {
            for row in &rows {
                upsert_row(tx, row)?;
            }
            Ok(())
        })
        .map_err(StorageError::from)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        diesel::delete(local_state::table.find(key))
            .execute(&mut conn)
            .map_err(StorageError::from)?;
        Ok(())
    }
}
