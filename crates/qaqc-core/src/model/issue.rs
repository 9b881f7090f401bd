use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::QaqcError;
use crate::timestamp::parse_tracker_ts;

/// Status a site's latest issue sits in while it waits for automation.
pub const WAIT_STATUS: &str = "Attempt Data QAQC";

/// Historical statuses that still allow an automated run.
pub const AUTO_RUN_OK_STATUSES: [&str; 3] = [WAIT_STATUS, "Canceled", "Replace with Upload"];

/// Labels reserved for manually driven generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManualLabel {
    /// Manual BASE generation.
    #[serde(rename = "BASE")]
    Base,
    /// Manual alternate-network (FLUXNET-CA) generation.
    #[serde(rename = "FLX-CA")]
    FluxnetCa,
}

impl ManualLabel {
    pub const ALL: [Self; 2] = [Self::Base, Self::FluxnetCa];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::FluxnetCa => "FLX-CA",
        }
    }

    /// Match a free-text label against the reserved values (exact match).
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == label)
    }
}

impl fmt::Display for ManualLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issue row exactly as the tracker mirror hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIssue {
    pub issue_num: i64,
    pub qaqc_status: String,
    pub created_at: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// One historical QAQC ticket for a site, normalized for classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub issue_number: u64,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub label: Option<String>,
}

impl IssueRecord {
    /// The reserved manual label on this issue, if any.
    #[must_use]
    pub fn manual_label(&self) -> Option<ManualLabel> {
        self.label.as_deref().and_then(ManualLabel::from_label)
    }

    /// Whether this status still permits an automated run when it appears
    /// in a site's history.
    #[must_use]
    pub fn has_auto_run_ok_status(&self) -> bool {
        AUTO_RUN_OK_STATUSES.contains(&self.status.as_str())
    }

    /// Normalize one raw tracker row.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::Timestamp`] for a malformed creation time and
    /// [`QaqcError::IssueKey`] for a negative issue number.
    pub fn from_raw(raw: &RawIssue) -> Result<Self, QaqcError> {
        let issue_number = u64::try_from(raw.issue_num)
            .map_err(|_| QaqcError::IssueKey(raw.issue_num.to_string()))?;
        Ok(Self {
            issue_number,
            status: raw.qaqc_status.clone(),
            created_at: parse_tracker_ts("issue created_at", &raw.created_at)?,
            label: raw.label.clone().filter(|l| !l.trim().is_empty()),
        })
    }
}

/// A site's issues, newest first.
///
/// Ordering is by creation time only; issues created at the same instant
/// keep the order they were read in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SiteHistory {
    issues: Vec<IssueRecord>,
}

impl SiteHistory {
    #[must_use]
    pub fn new(mut issues: Vec<IssueRecord>) -> Self {
        // `sort_by` is stable, which is what keeps equal timestamps in read order.
        issues.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self { issues }
    }

    /// The most recently created issue.
    #[must_use]
    pub fn latest(&self) -> Option<&IssueRecord> {
        self.issues.first()
    }

    /// Every issue except the latest, newest first.
    #[must_use]
    pub fn history(&self) -> &[IssueRecord] {
        self.issues.get(1..).unwrap_or(&[])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

/// A site that was dropped from this invocation because a record failed to
/// normalize.
#[derive(Debug)]
pub struct SiteFailure {
    pub site_id: String,
    pub error: QaqcError,
}

/// Normalize the tracker mirror into per-site histories.
///
/// A site with any malformed record is left out entirely and reported in the
/// second element; other sites are unaffected.
#[must_use]
pub fn build_histories(
    raw: BTreeMap<String, Vec<RawIssue>>,
) -> (BTreeMap<String, SiteHistory>, Vec<SiteFailure>) {
    let mut histories = BTreeMap::new();
    let mut failures = Vec::new();

    for (site_id, rows) in raw {
        match rows.iter().map(IssueRecord::from_raw).collect::<Result<Vec<_>, _>>() {
            Ok(issues) => {
                histories.insert(site_id, SiteHistory::new(issues));
            }
            Err(error) => failures.push(SiteFailure { site_id, error }),
        }
    }

    (histories, failures)
}

/// Parse a site → timestamp-string map, splitting out unparseable entries.
#[must_use]
pub fn parse_site_timestamps(
    field: &'static str,
    raw: BTreeMap<String, String>,
) -> (BTreeMap<String, NaiveDateTime>, Vec<SiteFailure>) {
    let mut parsed = BTreeMap::new();
    let mut failures = Vec::new();

    for (site_id, value) in raw {
        match parse_tracker_ts(field, &value) {
            Ok(ts) => {
                parsed.insert(site_id, ts);
            }
            Err(error) => failures.push(SiteFailure { site_id, error }),
        }
    }

    (parsed, failures)
}
