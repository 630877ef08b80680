//! Diesel/SQLite persistence for Replyte.
//!
//! The server uses [`sync_data::SyncDataRepository`]; the background process
//! keeps its local state in [`local_state::SqliteLocalStateStore`].

pub mod db;
pub mod errors;
pub mod local_state;
pub mod schema;
pub mod sync_data;

pub use db::{create_pool, get_connection, init, open, run_migrations, DbPool, WriteHandle};
pub use errors::StorageError;
pub use local_state::SqliteLocalStateStore;
pub use sync_data::SyncDataRepository;
