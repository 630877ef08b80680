//! Single writer thread. SQLite allows one writer at a time, so every write
//! goes through this queue and runs inside its own transaction.

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use log::error;
use tokio::sync::{mpsc, oneshot};

use replyte_core::errors::{DatabaseError, Error, Result};

use super::DbPool;
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Error type for the job transaction: core errors from the job itself, plus
/// the diesel errors `transaction` needs to report begin/commit failures.
enum TxError {
    Core(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

#[derive(Clone)]
pub struct WriteHandle {
    sender: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    /// Runs `job` on the writer thread inside a transaction. Any error rolls
    /// the whole job back.
    pub async fn exec<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let wrapped: Job = Box::new(move |conn| {
            let outcome = conn
                .transaction::<T, TxError, _>(|tx| job(tx).map_err(TxError::Core))
                .map_err(|err| match err {
                    TxError::Core(err) => err,
                    TxError::Diesel(err) => Error::from(StorageError::from(err)),
                });
            let _ = reply.send(outcome);
        });

        self.sender
            .send(wrapped)
            .map_err(|_| writer_stopped())?;
        response.await.map_err(|_| writer_stopped())?
    }
}

fn writer_stopped() -> Error {
    Error::Database(DatabaseError::Internal("Write actor is not running".to_string()))
}

/// Starts the writer thread. It exits once every handle has been dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

    let spawned = std::thread::Builder::new()
        .name("replyte-db-writer".to_string())
        .spawn(move || {
            while let Some(job) = receiver.blocking_recv() {
                match pool.get() {
                    Ok(mut conn) => job(&mut *conn),
                    // Dropping the job drops its reply sender; the caller sees
                    // a stopped-writer error.
                    Err(err) => error!("[Storage] Writer could not get a connection: {}", err),
                }
            }
        });
    if let Err(err) = spawned {
        error!("[Storage] Failed to spawn writer thread: {}", err);
    }

    WriteHandle { sender }
}
