use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;

/// Outcome state recorded for one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditState {
    /// A QAQC job was dispatched.
    Success,
    /// Dispatch was withheld because a run looks live for the site.
    Warning,
    /// A review ticket was opened.
    Review,
}

impl AuditState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Warning => "WARNING",
            Self::Review => "REVIEW",
        }
    }
}

impl fmt::Display for AuditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "WARNING" => Ok(Self::Warning),
            "REVIEW" => Ok(Self::Review),
            other => Err(ParseEnumError {
                expected: "audit state",
                got: other.to_string(),
            }),
        }
    }
}

/// One write-once audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub issue_number: u64,
    pub state: AuditState,
    pub decided_at: NaiveDateTime,
    pub comment: String,
}

impl AuditEntry {
    #[must_use]
    pub fn new(
        issue_number: u64,
        state: AuditState,
        decided_at: NaiveDateTime,
        comment: impl Into<String>,
    ) -> Self {
        Self {
            issue_number,
            state,
            decided_at,
            comment: comment.into(),
        }
    }
}

/// Every decision of one invocation, stamped with a single batch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditBatch {
    pub logged_at: NaiveDateTime,
    pub entries: Vec<AuditEntry>,
}

/// An audit row read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggedEntry {
    pub log_id: i64,
    pub batch_ts: String,
    pub issue_number: u64,
    pub state: AuditState,
    pub decided_at: String,
    pub comment: String,
}
