//! SQLite-backed QAQC store.
//!
//! Every connection runs in WAL mode so the QAQC jobs and the mirror sync
//! can read while a batch is written, and waits up to
//! [`DEFAULT_BUSY_TIMEOUT`] for a competing writer.

pub mod migrations;
pub mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use std::{path::Path, time::Duration};
use tracing::debug;

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the store at `path`, creating the file and its directory if needed,
/// and migrate it to the latest schema.
///
/// # Errors
///
/// Returns an error if the directory or database cannot be created, or if
/// configuration or migration fails.
pub fn open_store(path: &Path) -> Result<SqliteStore> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("create store directory {}", dir.display()))?,
        _ => {}
    }

    let mut conn = Connection::open(path)
        .with_context(|| format!("open store database {}", path.display()))?;
    tune(&conn).with_context(|| format!("configure store {}", path.display()))?;
    let version = migrations::migrate(&mut conn).context("apply store migrations")?;
    debug!(path = %path.display(), version, "store open");

    Ok(SqliteStore::from_connection(conn))
}

/// Like [`open_store`], but refuses to create a missing database. Commands
/// other than `init` use this so a typo in `store.path` is not silently
/// turned into an empty store.
///
/// # Errors
///
/// Returns an error if `path` does not exist or cannot be opened.
pub fn open_existing_store(path: &Path) -> Result<SqliteStore> {
    if !path.is_file() {
        bail!(
            "store database {} not found; run `qaqc-auto init` first",
            path.display()
        );
    }
    open_store(path)
}

fn tune(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(journal_mode = %mode, "store journal mode");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)
}
