//! rkndex library
//!
//! Mirrors the registry dumps published by two upstream donors and keeps a
//! SQLite index over the git archive those dumps end up in.

pub mod config;
pub mod donor;
pub mod gitar;
pub mod hashing;
pub mod http;
pub mod sqlite_persistence;

pub use donor::{Donor, DonorChe, DonorError, DonorHandle, DonorZavod};
pub use gitar::{GitCli, GitarError, GitarLog, SyncReport};
pub use sqlite_persistence::SqliteStore;

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Creates or upgrades every table the donors and the index share.
///
/// Donors read `log` for their dedup queries, so each component ensures the
/// whole schema rather than only its own tables.
pub fn ensure_schema(store: &SqliteStore) -> Result<()> {
    store.ensure_tables(donor::schema::DONOR_TABLES)?;
    store.ensure_tables(gitar::schema::GITAR_TABLES)
}

/// Opens the database at `db_path` with its schema up to date.
pub fn open_store(db_path: &Path, busy_timeout: Duration) -> Result<SqliteStore> {
    let store = SqliteStore::open(db_path, busy_timeout)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    ensure_schema(&store)?;
    Ok(store)
}
