use chrono::NaiveDateTime;
use tracing::{debug, error, info};

use crate::error::QaqcError;
use crate::model::audit::{AuditBatch, AuditEntry};
use crate::store::QaqcStore;

/// Persists the decisions of one invocation as a single batch.
pub struct AuditLogger<'a> {
    store: &'a dyn QaqcStore,
}

impl<'a> AuditLogger<'a> {
    #[must_use]
    pub fn new(store: &'a dyn QaqcStore) -> Self {
        Self { store }
    }

    /// Write dispatcher entries followed by notifier entries under one batch
    /// timestamp. An empty batch is not written.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::AuditWrite`] if the store rejects the batch; in
    /// that case nothing from the batch is stored.
    pub fn record(
        &self,
        logged_at: NaiveDateTime,
        dispatched: Vec<AuditEntry>,
        reviewed: Vec<AuditEntry>,
    ) -> Result<AuditBatch, QaqcError> {
        let batch = compose_batch(logged_at, dispatched, reviewed);

        if batch.entries.is_empty() {
            debug!("no decisions to log");
            return Ok(batch);
        }

        self.store.append_audit_batch(&batch).map_err(|source| {
            error!(error = %source, "audit batch write failed");
            QaqcError::AuditWrite(source)
        })?;
        info!(entries = batch.entries.len(), "audit batch written");
        Ok(batch)
    }
}

#[must_use]
pub fn compose_batch(
    logged_at: NaiveDateTime,
    mut dispatched: Vec<AuditEntry>,
    reviewed: Vec<AuditEntry>,
) -> AuditBatch {
    dispatched.extend(reviewed);
    AuditBatch {
        logged_at,
        entries: dispatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use crate::model::audit::AuditState;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 10)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .expect("valid date")
    }

    #[test]
    fn dispatch_entries_precede_review_entries() {
        let batch = compose_batch(
            now(),
            vec![AuditEntry::new(2, AuditState::Success, now(), "")],
            vec![AuditEntry::new(1, AuditState::Review, now(), "r")],
        );
        let order: Vec<u64> = batch.entries.iter().map(|e| e.issue_number).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn batch_shares_one_timestamp_in_store() {
        let store = SqliteStore::open_in_memory().expect("store");
        AuditLogger::new(&store)
            .record(
                now(),
                vec![
                    AuditEntry::new(2, AuditState::Success, now(), ""),
                    AuditEntry::new(3, AuditState::Warning, now(), "Run in progress"),
                ],
                vec![AuditEntry::new(1, AuditState::Review, now(), "r")],
            )
            .expect("record");

        let rows = store.recent_audit(10).expect("read back");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.batch_ts == rows[0].batch_ts));
        // Newest first: the review entry was inserted last.
        assert_eq!(rows[0].state, AuditState::Review);
    }

    #[test]
    fn empty_batch_is_not_written() {
        let store = SqliteStore::open_in_memory().expect("store");
        let batch = AuditLogger::new(&store)
            .record(now(), Vec::new(), Vec::new())
            .expect("record");
        assert!(batch.entries.is_empty());
        assert!(store.recent_audit(10).expect("read back").is_empty());
    }
}
