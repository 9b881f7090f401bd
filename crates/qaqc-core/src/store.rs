//! Read/write contracts the engine needs from its persistent stores.
//!
//! The engine never talks to SQLite directly; it sees these traits. The
//! production implementation is [`crate::db::SqliteStore`].

use anyhow::Result;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, BTreeSet};

use crate::model::audit::AuditBatch;
use crate::model::issue::RawIssue;

/// Snapshot reads and the audit write.
pub trait QaqcStore {
    /// Site → most recent BASE generation time (tracker format text).
    fn last_base_gen_times(&self) -> Result<BTreeMap<String, String>>;

    /// Site → every QAQC issue on record for it.
    fn qaqc_issue_history(&self) -> Result<BTreeMap<String, Vec<RawIssue>>>;

    /// Site → time its last automated run started (tracker format text).
    fn in_process_sites(&self) -> Result<BTreeMap<String, String>>;

    /// Issue numbers already logged with a successful dispatch.
    fn completed_auto_run_issues(&self) -> Result<BTreeSet<u64>>;

    /// Issue numbers already logged as sent to review.
    fn reviewed_issues(&self) -> Result<BTreeSet<u64>>;

    /// Site → filenames of its most recent upload.
    fn recent_upload_filenames(&self) -> Result<BTreeMap<String, Vec<String>>>;

    /// Persist a whole batch atomically: all entries or none.
    fn append_audit_batch(&self, batch: &AuditBatch) -> Result<()>;
}

/// A claim that one automated run for a site is live until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLease {
    pub site_id: String,
    pub issue_number: u64,
    pub holder: String,
    pub acquired_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

/// Per-site mutual exclusion with expiry.
pub trait LeaseStore {
    /// Take the lease for `lease.site_id` unless an unexpired lease exists.
    /// Returns `false` when another run holds it.
    fn acquire_site_lease(&self, lease: &SiteLease) -> Result<bool>;

    /// Drop the lease if (and only if) `holder` owns it.
    fn release_site_lease(&self, site_id: &str, holder: &str) -> Result<()>;

    /// Remove leases that expired at or before `now`; returns how many.
    fn prune_expired_leases(&self, now: NaiveDateTime) -> Result<usize>;
}
