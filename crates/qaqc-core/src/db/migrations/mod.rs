//! Forward-only schema upgrades for the QAQC store.
//!
//! The applied version lives in `PRAGMA user_version` and is mirrored into
//! `store_meta.schema_version` so operators can read it with plain SQL.

use super::schema;
use anyhow::{Context, Result, bail};
use rusqlite::Connection;
use tracing::info;

/// Latest schema version understood by this binary.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: [Step; 2] = [
    Step {
        version: 1,
        name: "mirrors and audit log",
        sql: schema::MIGRATION_V1_SQL,
    },
    Step {
        version: 2,
        name: "site leases and read indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Schema version recorded in the database (0 for a fresh file).
///
/// # Errors
///
/// Returns an error if the pragma cannot be read or holds a negative value.
pub fn current_schema_version(conn: &Connection) -> Result<u32> {
    let raw: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(raw).with_context(|| format!("store reports schema version {raw}"))
}

/// Bring the schema up to [`LATEST_SCHEMA_VERSION`]. Each step commits on
/// its own, so an interrupted upgrade resumes from the last finished step.
///
/// # Errors
///
/// Returns an error if a step fails, or if the store was written by a newer
/// binary.
pub fn migrate(conn: &mut Connection) -> Result<u32> {
    let start = current_schema_version(conn)?;
    if start > LATEST_SCHEMA_VERSION {
        bail!(
            "store schema v{start} is newer than this binary supports (v{LATEST_SCHEMA_VERSION}); upgrade qaqc-auto"
        );
    }

    for step in STEPS.iter().filter(|step| step.version > start) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)
            .with_context(|| format!("schema v{} ({})", step.version, step.name))?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.execute(
            "UPDATE store_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(step.version)],
        )?;
        tx.commit()?;
        info!(version = step.version, step = step.name, "store schema upgraded");
    }

    current_schema_version(conn)
}
