//! Database connection management with pragma configuration.
//!
//! This module handles opening the SQLite database, applying required pragmas
//! for performance and concurrency (WAL mode), and running migrations.

use super::migrations;
use crate::Error;
use std::path::Path;
use tokio_rusqlite::{Connection, rusqlite};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Local database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations on a
/// background thread. `None` means the engine was unavailable at open time.
#[derive(Clone, Debug)]
pub struct LocalStore {
    conn: Option<Connection>,
}

impl LocalStore {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    /// Open the database, or fall back to an unavailable store.
    ///
    /// Failures are logged; the returned store turns every operation into
    /// a no-op.
    pub async fn open_or_unavailable(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::open(path).await {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "local storage unavailable; running without persistence");
                Self::unavailable()
            }
        }
    }

    /// A store with no backing engine.
    pub fn unavailable() -> Self {
        Self { conn: None }
    }

    /// Whether a storage engine backs this store.
    pub fn is_available(&self) -> bool {
        self.conn.is_some()
    }

    /// Run a closure against the underlying connection.
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, Error> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.as_ref().ok_or(Error::StorageUnavailable)?;
        conn.call(f).await.map_err(Error::from)
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn: Some(conn) })
    }
}
