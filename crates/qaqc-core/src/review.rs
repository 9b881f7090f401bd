//! Review notifier: opens a tracking ticket for each new review candidate.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, error, info};

use crate::classify::ReviewCandidate;
use crate::config::TrackerConfig;
use crate::error::QaqcError;
use crate::model::audit::{AuditEntry, AuditState};

/// Project code for bare issue numbers.
pub const DEFAULT_PROJECT: &str = "QAQC";

/// A project-qualified tracker issue identifier, e.g. `QAQC-123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct IssueKey {
    pub project: String,
    pub number: u64,
}

impl IssueKey {
    #[must_use]
    pub fn new(project: impl Into<String>, number: u64) -> Self {
        Self {
            project: project.into(),
            number,
        }
    }

    /// Parse `123` (default project) or `PROJECT-123`.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::IssueKey`] for an absent or empty identifier,
    /// more than one `-`, an empty project, or a non-numeric number.
    pub fn parse(raw: Option<&str>, default_project: &str) -> Result<Self, QaqcError> {
        let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
            return Err(QaqcError::IssueKey(
                raw.map_or_else(|| "<absent>".to_string(), str::to_string),
            ));
        };
        let malformed = || QaqcError::IssueKey(raw.to_string());

        let (project, number) = match raw.split_once('-') {
            None => (default_project, raw),
            Some((project, number)) => {
                if project.is_empty() || number.contains('-') {
                    return Err(malformed());
                }
                (project, number)
            }
        };

        if !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let number = number.parse::<u64>().map_err(|_| malformed())?;
        Ok(Self::new(project, number))
    }

    /// Browser link for this issue: `{host}{issue_path}{PROJECT}-{number}`.
    #[must_use]
    pub fn link(&self, host: &str, issue_path: &str) -> String {
        format!("{host}{issue_path}{self}")
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project, self.number)
    }
}

/// What a new tracking ticket should say.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest<'a> {
    pub site_id: &'a str,
    pub reporter: &'a str,
    pub summary: String,
    pub body: String,
}

/// Creates tracking tickets in the issue tracker.
pub trait TicketTracker {
    /// Create a ticket and return its identifier as the tracker reports it.
    /// `None` means the tracker answered without an identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the ticket could not be created.
    fn create_tracking_ticket(&self, request: &TicketRequest<'_>) -> anyhow::Result<Option<String>>;
}

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub reporter: String,
    pub host: String,
    pub issue_path: String,
    pub project: String,
}

impl NotifierSettings {
    #[must_use]
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            reporter: config.reporter.clone(),
            host: config.host.clone(),
            issue_path: config.issue_path.clone(),
            project: config.project.clone(),
        }
    }

    #[must_use]
    pub fn link(&self, key: &IssueKey) -> String {
        key.link(&self.host, &self.issue_path)
    }
}

#[must_use]
pub fn review_summary(site_id: &str) -> String {
    format!("Auto Data QAQC needs review for {site_id}")
}

/// `Issue <n> (<link>) <reason>` with the reason's first letter lower-cased.
#[must_use]
pub fn review_message(issue_number: u64, link: &str, reason: &str) -> String {
    format!("Issue {issue_number} ({link}) {}", lower_first(reason))
}

fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_lowercase().chain(chars).collect()
    })
}

pub struct Notifier<'a> {
    tracker: &'a dyn TicketTracker,
    settings: &'a NotifierSettings,
}

impl<'a> Notifier<'a> {
    #[must_use]
    pub fn new(tracker: &'a dyn TicketTracker, settings: &'a NotifierSettings) -> Self {
        Self { tracker, settings }
    }

    /// Open a ticket for each review candidate not yet reviewed.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::Tracker`] when ticket creation fails and
    /// [`QaqcError::IssueKey`] when the tracker hands back an unusable
    /// identifier. Both abort the pass.
    pub fn notify(
        &self,
        review: &BTreeMap<String, ReviewCandidate>,
        reviewed: &BTreeSet<u64>,
        now: NaiveDateTime,
    ) -> Result<Vec<AuditEntry>, QaqcError> {
        let mut entries = Vec::new();

        for (site_id, candidate) in review {
            if reviewed.contains(&candidate.issue_number) {
                debug!(site = %site_id, issue = candidate.issue_number, "already reviewed");
                continue;
            }

            let reason = candidate.reason.to_string();
            let issue_link = self.settings.link(&IssueKey::new(
                self.settings.project.clone(),
                candidate.issue_number,
            ));
            let request = TicketRequest {
                site_id,
                reporter: &self.settings.reporter,
                summary: review_summary(site_id),
                body: review_message(candidate.issue_number, &issue_link, &reason),
            };

            let created = self
                .tracker
                .create_tracking_ticket(&request)
                .map_err(|source| {
                    error!(site = %site_id, error = %source, "tracking ticket creation failed");
                    QaqcError::Tracker {
                        site: site_id.clone(),
                        source,
                    }
                })?;
            let ticket = IssueKey::parse(created.as_deref(), &self.settings.project)?;
            let ticket_link = self.settings.link(&ticket);

            info!(
                site = %site_id,
                issue = candidate.issue_number,
                ticket = %ticket,
                "opened review ticket"
            );
            entries.push(AuditEntry::new(
                candidate.issue_number,
                AuditState::Review,
                now,
                format!("{reason}. See issue {ticket_link}"),
            ));
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ReviewReason;
    use crate::error::ErrorCode;
    use chrono::NaiveDate;
    use std::cell::RefCell;

    struct FakeTracker {
        requests: RefCell<Vec<(String, String, String, String)>>,
        reply: Option<&'static str>,
        fail: bool,
    }

    impl FakeTracker {
        fn replying(reply: Option<&'static str>) -> Self {
            Self {
                requests: RefCell::new(Vec::new()),
                reply,
                fail: false,
            }
        }
    }

    impl TicketTracker for FakeTracker {
        fn create_tracking_ticket(
            &self,
            request: &TicketRequest<'_>,
        ) -> anyhow::Result<Option<String>> {
            if self.fail {
                anyhow::bail!("tracker unavailable");
            }
            self.requests.borrow_mut().push((
                request.site_id.to_string(),
                request.reporter.to_string(),
                request.summary.clone(),
                request.body.clone(),
            ));
            Ok(self.reply.map(str::to_string))
        }
    }

    fn settings() -> NotifierSettings {
        NotifierSettings {
            reporter: "amf-data-team".to_string(),
            host: "https://tracker.example.org".to_string(),
            issue_path: "/browse/".to_string(),
            project: DEFAULT_PROJECT.to_string(),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 10)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .expect("valid date")
    }

    fn review(site: &str, issue: u64, reason: ReviewReason) -> BTreeMap<String, ReviewCandidate> {
        BTreeMap::from([(
            site.to_string(),
            ReviewCandidate {
                issue_number: issue,
                reason,
            },
        )])
    }

    #[test]
    fn bare_numbers_use_default_project() {
        let key = IssueKey::parse(Some("123"), DEFAULT_PROJECT).expect("valid");
        assert_eq!(key, IssueKey::new("QAQC", 123));
        let big = IssueKey::parse(Some("1000000"), DEFAULT_PROJECT).expect("valid");
        assert_eq!(big.to_string(), "QAQC-1000000");
    }

    #[test]
    fn qualified_keys_keep_their_project() {
        for (raw, project, number) in [
            ("QAQC-123", "QAQC", 123),
            ("FOO-987", "FOO", 987),
            ("TESTQAQC-123", "TESTQAQC", 123),
        ] {
            let key = IssueKey::parse(Some(raw), DEFAULT_PROJECT).expect(raw);
            assert_eq!(key, IssueKey::new(project, number));
        }
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for raw in [Some("TESTQAQC-123-123"), Some(""), None, Some("1e6"), Some("None-None")] {
            let err = IssueKey::parse(raw, DEFAULT_PROJECT).expect_err("malformed");
            assert_eq!(err.code(), ErrorCode::MalformedIssueKey, "{raw:?}");
        }
    }

    #[test]
    fn link_joins_host_path_and_key() {
        let link = IssueKey::new("QAQC", 123).link("https://tracker.example.org", "/browse/");
        assert_eq!(link, "https://tracker.example.org/browse/QAQC-123");
    }

    #[test]
    fn message_lowercases_reason_head() {
        let msg = review_message(5, "https://t/browse/QAQC-5", "Has all historical states");
        assert_eq!(msg, "Issue 5 (https://t/browse/QAQC-5) has all historical states");
    }

    #[test]
    fn new_candidate_opens_ticket_and_logs_review() {
        let tracker = FakeTracker::replying(Some("QAQC-900"));
        let settings = settings();
        let entries = Notifier::new(&tracker, &settings)
            .notify(
                &review("US-Ton", 77, ReviewReason::DisallowedHistoricalStatus),
                &BTreeSet::new(),
                now(),
            )
            .expect("notify");

        let requests = tracker.requests.borrow();
        assert_eq!(requests.len(), 1);
        let (site, reporter, summary, body) = &requests[0];
        assert_eq!(site, "US-Ton");
        assert_eq!(reporter, "amf-data-team");
        assert_eq!(summary, "Auto Data QAQC needs review for US-Ton");
        assert_eq!(
            body,
            "Issue 77 (https://tracker.example.org/browse/QAQC-77) has at least one historical \
             QAQC status not in (Attempt Data QAQC, Canceled, Replace with Upload)"
        );

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, AuditState::Review);
        assert_eq!(entries[0].issue_number, 77);
        assert_eq!(
            entries[0].comment,
            "Has at least one historical QAQC status not in (Attempt Data QAQC, Canceled, \
             Replace with Upload). See issue https://tracker.example.org/browse/QAQC-900"
        );
    }

    #[test]
    fn already_reviewed_issue_is_not_renotified() {
        let tracker = FakeTracker::replying(Some("QAQC-900"));
        let settings = settings();
        let entries = Notifier::new(&tracker, &settings)
            .notify(
                &review("US-Ton", 77, ReviewReason::ManualHistoricalLabels),
                &BTreeSet::from([77]),
                now(),
            )
            .expect("notify");

        assert!(entries.is_empty());
        assert!(tracker.requests.borrow().is_empty());
    }

    #[test]
    fn missing_ticket_identifier_aborts() {
        let tracker = FakeTracker::replying(None);
        let settings = settings();
        let err = Notifier::new(&tracker, &settings)
            .notify(
                &review("US-Ton", 77, ReviewReason::ManualHistoricalLabels),
                &BTreeSet::new(),
                now(),
            )
            .expect_err("absent key");
        assert!(matches!(err, QaqcError::IssueKey(_)));
    }

    #[test]
    fn tracker_failure_keeps_site_in_error() {
        let tracker = FakeTracker {
            fail: true,
            ..FakeTracker::replying(None)
        };
        let settings = settings();
        let err = Notifier::new(&tracker, &settings)
            .notify(
                &review("BR-Sa1", 3, ReviewReason::ManualHistoricalLabels),
                &BTreeSet::new(),
                now(),
            )
            .expect_err("tracker down");
        assert!(matches!(err, QaqcError::Tracker { ref site, .. } if site == "BR-Sa1"));
    }
}
