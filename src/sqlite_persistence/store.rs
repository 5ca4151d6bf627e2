//! The one persistent connection shared by the donors and the log index.

use super::table::{ensure_all, Table};
use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Explicitly owned handle to the SQLite database.
///
/// Cloning the handle shares the same connection; every component that needs
/// the database receives one at construction time.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file at `db_path`.
    ///
    /// `busy_timeout` bounds how long an exclusive transaction waits for
    /// another connection to release the database.
    pub fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> rusqlite::Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        conn.busy_timeout(busy_timeout)?;
        debug!("Opened SQLite database at {:?}", db_path.as_ref());
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates or upgrades the given tables in place.
    pub fn ensure_tables(&self, tables: &[Table]) -> Result<()> {
        ensure_all(&self.lock(), tables)
    }

    /// Runs `f` against the connection outside of any explicit transaction.
    pub fn with_conn<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
    {
        f(&self.lock())
    }

    /// Runs `f` inside a `BEGIN EXCLUSIVE` transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and rolls back otherwise,
    /// so a failing read-modify-write sequence leaves no partial state behind.
    pub fn exclusive<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Closes the connection once no other handle shares it.
    pub fn close(self) -> rusqlite::Result<()> {
        match Arc::try_unwrap(self.conn) {
            Ok(mutex) => mutex
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .close()
                .map_err(|(_, err)| err),
            // Other components still hold the connection; it closes with the last of them.
            Err(_) => Ok(()),
        }
    }
}
