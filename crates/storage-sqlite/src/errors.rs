//! Storage error type and its mapping into the core error.

use diesel::r2d2;
use replyte_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::PoolError),

    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::Pool(e) => Error::Database(DatabaseError::ConnectionFailed(e.to_string())),
            StorageError::Query(diesel::result::Error::NotFound) => {
                Error::NotFound("Record not found".to_string())
            }
            StorageError::Query(e) => Error::Database(DatabaseError::QueryFailed(e.to_string())),
            StorageError::Migration(e) => Error::Database(DatabaseError::MigrationFailed(e)),
            StorageError::Io(e) => Error::Database(DatabaseError::Internal(e.to_string())),
        }
    }
}
