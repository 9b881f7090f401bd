use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Stable failure categories. Cron wrappers and dashboards key on
/// [`ErrorCode::code`], not on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissing,
    ConfigParseError,
    TimestampFormat,
    MalformedIssueKey,
    StoreReadFailed,
    AuditWriteFailed,
    TicketCreateFailed,
    DispatchFailed,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// `E####` identifier; the leading digit names the subsystem.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigMissing => "E1001",
            Self::ConfigParseError => "E1002",
            Self::TimestampFormat => "E2001",
            Self::MalformedIssueKey => "E2002",
            Self::StoreReadFailed => "E3001",
            Self::AuditWriteFailed => "E3002",
            Self::TicketCreateFailed => "E4001",
            Self::DispatchFailed => "E4002",
            Self::LockContention => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigMissing => "Required configuration missing",
            Self::ConfigParseError => "Config file parse error",
            Self::TimestampFormat => "Timestamp does not match the tracker format",
            Self::MalformedIssueKey => "Malformed issue identifier",
            Self::StoreReadFailed => "Store read failed",
            Self::AuditWriteFailed => "Audit batch write failed",
            Self::TicketCreateFailed => "Tracking ticket creation failed",
            Self::DispatchFailed => "QAQC job dispatch failed",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// What the operator should do next.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigMissing => Some("Add the missing key to qaqc.toml and retry."),
            Self::ConfigParseError => Some("Fix syntax in qaqc.toml and retry."),
            Self::TimestampFormat => {
                Some("Expected `YYYY-MM-DD HH:MM:SS[.ffffff]`; fix the source record.")
            }
            Self::MalformedIssueKey => Some("Use `<number>` or `<PROJECT>-<number>`."),
            Self::StoreReadFailed => Some("Check the store path and run `qaqc-auto init`."),
            Self::AuditWriteFailed => {
                Some("No entries were logged; re-run once the store is writable.")
            }
            Self::TicketCreateFailed => Some("Check tracker host, reporter and token."),
            Self::DispatchFailed => Some("Check that the screen binary and job program exist."),
            Self::LockContention => {
                Some("Another qaqc-auto invocation is running; retry after it exits.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Every failure the engine can surface to its caller.
#[derive(Debug, thiserror::Error)]
pub enum QaqcError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot parse {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot parse {field} `{value}`: expected tracker timestamp format")]
    Timestamp { field: &'static str, value: String },

    #[error("malformed issue identifier `{0}`")]
    IssueKey(String),

    #[error("store read failed: {0:#}")]
    Store(#[source] anyhow::Error),

    #[error("audit batch write failed: {0:#}")]
    AuditWrite(#[source] anyhow::Error),

    #[error("tracking ticket for {site} failed: {source:#}")]
    Tracker {
        site: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("dispatch of issue {issue_number} for {site} failed: {source}")]
    Dispatch {
        site: String,
        issue_number: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("lock at {} not acquired after {waited:?}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("lock I/O error: {0}")]
    LockIo(#[from] std::io::Error),
}

impl QaqcError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) => ErrorCode::ConfigMissing,
            Self::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Self::Timestamp { .. } => ErrorCode::TimestampFormat,
            Self::IssueKey(_) => ErrorCode::MalformedIssueKey,
            Self::Store(_) => ErrorCode::StoreReadFailed,
            Self::AuditWrite(_) => ErrorCode::AuditWriteFailed,
            Self::Tracker { .. } => ErrorCode::TicketCreateFailed,
            Self::Dispatch { .. } => ErrorCode::DispatchFailed,
            Self::LockTimeout { .. } => ErrorCode::LockContention,
            Self::LockIo(_) => ErrorCode::InternalUnexpected,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
