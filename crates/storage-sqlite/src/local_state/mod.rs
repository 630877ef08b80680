//! SQLite-backed `LocalStateStore` for the background process.

mod model;
mod repository;

pub use model::LocalStateDB;
pub use repository::SqliteLocalStateStore;
