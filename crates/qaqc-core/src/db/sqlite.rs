use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, params, types::Type};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use super::migrations;
use crate::model::audit::{AuditBatch, AuditState, LoggedEntry};
use crate::model::issue::RawIssue;
use crate::store::{LeaseStore, QaqcStore, SiteLease};
use crate::timestamp::{format_tracker_ts, parse_tracker_ts};

/// [`QaqcStore`] and [`LeaseStore`] over one SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub(crate) const fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// A migrated in-memory store, for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot open or migrate the database.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("open in-memory store")?;
        migrations::migrate(&mut conn).context("apply store migrations")?;
        Ok(Self { conn })
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Mirror writes (populated by the tracker/upload sync, not the engine)
    // -----------------------------------------------------------------------

    /// Insert or replace one mirrored tracker issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn upsert_issue(&self, site_id: &str, issue: &RawIssue) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO qaqc_issues (issue_num, site_id, qaqc_status, label, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(issue_num) DO UPDATE SET
                    site_id = excluded.site_id,
                    qaqc_status = excluded.qaqc_status,
                    label = excluded.label,
                    created_at = excluded.created_at",
                params![
                    issue.issue_num,
                    site_id,
                    issue.qaqc_status,
                    issue.label,
                    issue.created_at
                ],
            )
            .with_context(|| format!("upsert issue {} for {site_id}", issue.issue_num))?;
        Ok(())
    }

    /// Record a BASE generation for a site.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn record_base_generation(&self, site_id: &str, generated_at: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO base_generations (site_id, generated_at) VALUES (?1, ?2)",
                params![site_id, generated_at],
            )
            .with_context(|| format!("record base generation for {site_id}"))?;
        Ok(())
    }

    /// Mark a site as having an automated run in process since `started_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn mark_in_process(&self, site_id: &str, started_at: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO in_process_sites (site_id, started_at) VALUES (?1, ?2)
                 ON CONFLICT(site_id) DO UPDATE SET started_at = excluded.started_at",
                params![site_id, started_at],
            )
            .with_context(|| format!("mark {site_id} in process"))?;
        Ok(())
    }

    /// Record the files of one upload.
    ///
    /// # Errors
    ///
    /// Returns an error if any row cannot be written.
    pub fn record_upload(&self, upload_id: i64, site_id: &str, filenames: &[&str]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin upload transaction")?;
        for filename in filenames {
            tx.execute(
                "INSERT OR IGNORE INTO uploads (upload_id, site_id, filename) VALUES (?1, ?2, ?3)",
                params![upload_id, site_id, filename],
            )
            .with_context(|| format!("record upload {upload_id} file {filename}"))?;
        }
        tx.commit().context("commit upload")?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Audit reads
    // -----------------------------------------------------------------------

    /// Most recent audit rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored row is malformed.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<LoggedEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(
            "SELECT log_id, batch_ts, issue_num, state, decided_at, comment
             FROM auto_qaqc_log
             ORDER BY log_id DESC
             LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit], |row| {
                let state: String = row.get(3)?;
                Ok(LoggedEntry {
                    log_id: row.get(0)?,
                    batch_ts: row.get(1)?,
                    issue_number: issue_number_at(row, 2)?,
                    state: state.parse::<AuditState>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
                    })?,
                    decided_at: row.get(4)?,
                    comment: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read audit log")?;
        Ok(rows)
    }

    /// Current lease for a site, if any (expired or not).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn site_lease(&self, site_id: &str) -> Result<Option<(u64, String, String)>> {
        self.conn
            .query_row(
                "SELECT issue_num, holder, expires_at FROM site_leases WHERE site_id = ?1",
                [site_id],
                |row| Ok((issue_number_at(row, 0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .with_context(|| format!("read lease for {site_id}"))
    }

    fn logged_issue_numbers(&self, state: AuditState) -> Result<BTreeSet<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT issue_num FROM auto_qaqc_log WHERE state = ?1")?;
        let numbers = stmt
            .query_map([state.as_str()], |row| issue_number_at(row, 0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()
            .with_context(|| format!("read {state} issue numbers"))?;
        Ok(numbers)
    }

    fn site_text_map(&self, sql: &str, what: &str) -> Result<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let map = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .with_context(|| format!("read {what}"))?;
        Ok(map)
    }
}

fn issue_number_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

impl QaqcStore for SqliteStore {
    /// The latest generation is picked by parsed time, since the stored
    /// text is not guaranteed to be zero-padded. Unreadable rows are skipped
    /// while the site has a readable one; a site with only unreadable rows
    /// keeps one of them so the engine reports it.
    fn last_base_gen_times(&self) -> Result<BTreeMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT site_id, generated_at FROM base_generations ORDER BY site_id")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read base generation times")?;

        let mut latest: BTreeMap<String, (Option<NaiveDateTime>, String)> = BTreeMap::new();
        for (site_id, raw) in rows {
            let parsed = parse_tracker_ts("last BASE generation", &raw)
                .inspect_err(|err| warn!(site = %site_id, error = %err, "unreadable BASE generation row"))
                .ok();
            match latest.entry(site_id) {
                Entry::Vacant(slot) => {
                    slot.insert((parsed, raw));
                }
                Entry::Occupied(mut slot) => {
                    if let Some(ts) = parsed
                        && slot.get().0.is_none_or(|best| ts > best)
                    {
                        slot.insert((parsed, raw));
                    }
                }
            }
        }

        Ok(latest
            .into_iter()
            .map(|(site_id, (_, raw))| (site_id, raw))
            .collect())
    }

    fn qaqc_issue_history(&self) -> Result<BTreeMap<String, Vec<RawIssue>>> {
        let mut stmt = self.conn.prepare(
            "SELECT site_id, issue_num, qaqc_status, created_at, label
             FROM qaqc_issues
             ORDER BY site_id, issue_num",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    RawIssue {
                        issue_num: row.get(1)?,
                        qaqc_status: row.get(2)?,
                        created_at: row.get(3)?,
                        label: row.get(4)?,
                    },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read qaqc issue history")?;

        let mut history: BTreeMap<String, Vec<RawIssue>> = BTreeMap::new();
        for (site_id, issue) in rows {
            history.entry(site_id).or_default().push(issue);
        }
        Ok(history)
    }

    fn in_process_sites(&self) -> Result<BTreeMap<String, String>> {
        self.site_text_map(
            "SELECT site_id, started_at FROM in_process_sites",
            "in-process sites",
        )
    }

    fn completed_auto_run_issues(&self) -> Result<BTreeSet<u64>> {
        self.logged_issue_numbers(AuditState::Success)
    }

    fn reviewed_issues(&self) -> Result<BTreeSet<u64>> {
        self.logged_issue_numbers(AuditState::Review)
    }

    fn recent_upload_filenames(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.site_id, u.filename
             FROM uploads u
             JOIN (
                SELECT site_id, MAX(upload_id) AS upload_id
                FROM uploads
                GROUP BY site_id
             ) latest ON latest.site_id = u.site_id AND latest.upload_id = u.upload_id
             ORDER BY u.site_id, u.filename",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read recent upload filenames")?;

        let mut uploads: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (site_id, filename) in rows {
            uploads.entry(site_id).or_default().push(filename);
        }
        Ok(uploads)
    }

    fn append_audit_batch(&self, batch: &AuditBatch) -> Result<()> {
        let batch_ts = format_tracker_ts(batch.logged_at);
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin audit transaction")?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO auto_qaqc_log (batch_ts, issue_num, state, decided_at, comment)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in &batch.entries {
                let issue_num = i64::try_from(entry.issue_number)
                    .with_context(|| format!("issue number {} out of range", entry.issue_number))?;
                insert
                    .execute(params![
                        batch_ts,
                        issue_num,
                        entry.state.as_str(),
                        format_tracker_ts(entry.decided_at),
                        entry.comment
                    ])
                    .with_context(|| format!("insert audit entry for issue {}", entry.issue_number))?;
            }
        }
        tx.commit().context("commit audit batch")?;
        Ok(())
    }
}

impl LeaseStore for SqliteStore {
    fn acquire_site_lease(&self, lease: &SiteLease) -> Result<bool> {
        let issue_num = i64::try_from(lease.issue_number)
            .with_context(|| format!("issue number {} out of range", lease.issue_number))?;
        let changed = self
            .conn
            .execute(
                "INSERT INTO site_leases (site_id, issue_num, holder, acquired_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(site_id) DO UPDATE SET
                    issue_num = excluded.issue_num,
                    holder = excluded.holder,
                    acquired_at = excluded.acquired_at,
                    expires_at = excluded.expires_at
                 WHERE site_leases.expires_at <= excluded.acquired_at",
                params![
                    lease.site_id,
                    issue_num,
                    lease.holder,
                    format_tracker_ts(lease.acquired_at),
                    format_tracker_ts(lease.expires_at)
                ],
            )
            .with_context(|| format!("acquire lease for {}", lease.site_id))?;
        Ok(changed == 1)
    }

    fn release_site_lease(&self, site_id: &str, holder: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM site_leases WHERE site_id = ?1 AND holder = ?2",
                params![site_id, holder],
            )
            .with_context(|| format!("release lease for {site_id}"))?;
        Ok(())
    }

    fn prune_expired_leases(&self, now: NaiveDateTime) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM site_leases WHERE expires_at <= ?1",
                [format_tracker_ts(now)],
            )
            .context("prune expired leases")
    }
}
