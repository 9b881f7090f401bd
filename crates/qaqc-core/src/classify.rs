//! Candidate classification.
//!
//! Each site with issue history is run through [`RULES`] in order; the first
//! rule whose predicate holds decides the site. A site no rule catches is an
//! auto-run candidate for its latest issue.
//!
//! | # | rule                        | verdict                    |
//! |---|-----------------------------|----------------------------|
//! | 1 | `latest-not-awaiting-qaqc`  | skip                       |
//! | 2 | `latest-predates-base-gen`  | skip                       |
//! | 3 | `latest-manual-label`       | skip                       |
//! | 4 | `history-disallowed-status` | review                     |
//! | 5 | `history-all-manual-label`  | review                     |
//!
//! Rule 4 is checked before rule 5, so a site matching both is reported
//! with the status reason.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::model::issue::{AUTO_RUN_OK_STATUSES, IssueRecord, ManualLabel, SiteHistory, WAIT_STATUS};

/// Everything a rule may look at for one site.
#[derive(Debug, Clone, Copy)]
pub struct SiteView<'a> {
    pub latest: &'a IssueRecord,
    pub history: &'a [IssueRecord],
    pub last_generation: Option<NaiveDateTime>,
}

/// Why a site produced no outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotAwaitingQaqc,
    PredatesBaseGeneration,
    ManualLatestLabel,
}

impl SkipReason {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::NotAwaitingQaqc => "latest issue is not waiting for automated QAQC",
            Self::PredatesBaseGeneration => "latest issue predates the last BASE generation",
            Self::ManualLatestLabel => "latest issue carries a manual generation label",
        }
    }
}

/// Why a site needs a human to look at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    DisallowedHistoricalStatus,
    ManualHistoricalLabels,
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisallowedHistoricalStatus => write!(
                f,
                "Has at least one historical QAQC status not in ({})",
                AUTO_RUN_OK_STATUSES.join(", ")
            ),
            Self::ManualHistoricalLabels => write!(
                f,
                "Has all historical QAQC states as one of the following labels ({})",
                ManualLabel::ALL.map(ManualLabel::as_str).join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Skip(SkipReason),
    Review(ReviewReason),
    AutoRun,
}

/// A named guard predicate and the verdict it produces when it holds.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&SiteView<'_>) -> bool,
    pub verdict: Verdict,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("verdict", &self.verdict)
            .finish_non_exhaustive()
    }
}

pub const RULES: [Rule; 5] = [
    Rule {
        name: "latest-not-awaiting-qaqc",
        applies: latest_not_awaiting,
        verdict: Verdict::Skip(SkipReason::NotAwaitingQaqc),
    },
    Rule {
        name: "latest-predates-base-gen",
        applies: latest_predates_generation,
        verdict: Verdict::Skip(SkipReason::PredatesBaseGeneration),
    },
    Rule {
        name: "latest-manual-label",
        applies: latest_has_manual_label,
        verdict: Verdict::Skip(SkipReason::ManualLatestLabel),
    },
    Rule {
        name: "history-disallowed-status",
        applies: history_has_disallowed_status,
        verdict: Verdict::Review(ReviewReason::DisallowedHistoricalStatus),
    },
    Rule {
        name: "history-all-manual-label",
        applies: history_uniformly_manual,
        verdict: Verdict::Review(ReviewReason::ManualHistoricalLabels),
    },
];

fn latest_not_awaiting(view: &SiteView<'_>) -> bool {
    view.latest.status != WAIT_STATUS
}

fn latest_predates_generation(view: &SiteView<'_>) -> bool {
    view.last_generation
        .is_some_and(|generated| view.latest.created_at < generated)
}

fn latest_has_manual_label(view: &SiteView<'_>) -> bool {
    view.latest.manual_label().is_some()
}

fn history_has_disallowed_status(view: &SiteView<'_>) -> bool {
    view.history.iter().any(|issue| !issue.has_auto_run_ok_status())
}

fn history_uniformly_manual(view: &SiteView<'_>) -> bool {
    !view.history.is_empty()
        && ManualLabel::ALL.into_iter().any(|label| {
            view.history
                .iter()
                .all(|issue| issue.manual_label() == Some(label))
        })
}

/// Run the rule table for one site. Returns the deciding rule's name, or
/// `None` when the site fell through to auto-run.
#[must_use]
pub fn evaluate(view: &SiteView<'_>) -> (Option<&'static str>, Verdict) {
    RULES
        .iter()
        .find(|rule| (rule.applies)(view))
        .map_or((None, Verdict::AutoRun), |rule| (Some(rule.name), rule.verdict))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReviewCandidate {
    pub issue_number: u64,
    pub reason: ReviewReason,
}

/// Classifier output. `skipped` is diagnostic only; a skipped site has no
/// outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Candidates {
    pub auto_run: BTreeMap<String, u64>,
    pub review: BTreeMap<String, ReviewCandidate>,
    pub skipped: BTreeMap<String, SkipReason>,
}

/// Partition sites into auto-run and review candidates.
///
/// Sites with empty history are ignored. A site missing from
/// `last_generation` has never had a BASE generation.
#[must_use]
pub fn classify(
    histories: &BTreeMap<String, SiteHistory>,
    last_generation: &BTreeMap<String, NaiveDateTime>,
) -> Candidates {
    let mut candidates = Candidates::default();

    for (site_id, site) in histories {
        let Some(latest) = site.latest() else {
            continue;
        };
        let view = SiteView {
            latest,
            history: site.history(),
            last_generation: last_generation.get(site_id).copied(),
        };

        let (rule, verdict) = evaluate(&view);
        debug!(
            site = %site_id,
            issue = latest.issue_number,
            rule = rule.unwrap_or("auto-run"),
            "classified site"
        );

        match verdict {
            Verdict::Skip(reason) => {
                candidates.skipped.insert(site_id.clone(), reason);
            }
            Verdict::Review(reason) => {
                candidates.review.insert(
                    site_id.clone(),
                    ReviewCandidate {
                        issue_number: latest.issue_number,
                        reason,
                    },
                );
            }
            Verdict::AutoRun => {
                candidates
                    .auto_run
                    .insert(site_id.clone(), latest.issue_number);
            }
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, day)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid date")
    }

    fn issue(num: u64, status: &str, day: u32, label: Option<&str>) -> IssueRecord {
        IssueRecord {
            issue_number: num,
            status: status.to_string(),
            created_at: ts(day),
            label: label.map(str::to_string),
        }
    }

    fn one_site(issues: Vec<IssueRecord>) -> BTreeMap<String, SiteHistory> {
        BTreeMap::from([("US-Ton".to_string(), SiteHistory::new(issues))])
    }

    #[test]
    fn lone_waiting_issue_is_auto_run() {
        let out = classify(&one_site(vec![issue(100, WAIT_STATUS, 10, None)]), &BTreeMap::new());
        assert_eq!(out.auto_run.get("US-Ton"), Some(&100));
        assert!(out.review.is_empty());
    }

    #[test]
    fn latest_not_waiting_is_skipped() {
        let out = classify(
            &one_site(vec![
                issue(100, WAIT_STATUS, 1, None),
                issue(101, "Data QAQC Complete", 2, None),
            ]),
            &BTreeMap::new(),
        );
        assert!(out.auto_run.is_empty());
        assert!(out.review.is_empty());
        assert_eq!(out.skipped.get("US-Ton"), Some(&SkipReason::NotAwaitingQaqc));
    }

    #[test]
    fn issue_older_than_generation_is_skipped() {
        let generated = BTreeMap::from([("US-Ton".to_string(), ts(15))]);
        let out = classify(&one_site(vec![issue(100, WAIT_STATUS, 10, None)]), &generated);
        assert_eq!(
            out.skipped.get("US-Ton"),
            Some(&SkipReason::PredatesBaseGeneration)
        );
    }

    #[test]
    fn issue_at_generation_time_is_not_stale() {
        let generated = BTreeMap::from([("US-Ton".to_string(), ts(10))]);
        let out = classify(&one_site(vec![issue(100, WAIT_STATUS, 10, None)]), &generated);
        assert_eq!(out.auto_run.get("US-Ton"), Some(&100));
    }

    #[test]
    fn manual_latest_label_skips_regardless_of_history() {
        for label in ["BASE", "FLX-CA"] {
            let out = classify(
                &one_site(vec![
                    issue(100, WAIT_STATUS, 10, Some(label)),
                    issue(90, "Needs Review", 5, None),
                ]),
                &BTreeMap::new(),
            );
            assert_eq!(out.skipped.get("US-Ton"), Some(&SkipReason::ManualLatestLabel));
            assert!(out.review.is_empty());
        }
    }

    #[test]
    fn disallowed_history_status_goes_to_review() {
        let out = classify(
            &one_site(vec![
                issue(100, WAIT_STATUS, 10, None),
                issue(90, "Canceled", 8, None),
                issue(80, "Results Sent", 5, None),
            ]),
            &BTreeMap::new(),
        );
        let review = out.review.get("US-Ton").expect("review candidate");
        assert_eq!(review.issue_number, 100);
        assert_eq!(review.reason, ReviewReason::DisallowedHistoricalStatus);
        assert!(out.auto_run.is_empty());
    }

    #[test]
    fn uniform_manual_history_goes_to_review() {
        for label in ["BASE", "FLX-CA"] {
            let out = classify(
                &one_site(vec![
                    issue(100, WAIT_STATUS, 10, None),
                    issue(90, "Canceled", 8, Some(label)),
                    issue(80, WAIT_STATUS, 5, Some(label)),
                ]),
                &BTreeMap::new(),
            );
            assert_eq!(
                out.review.get("US-Ton").map(|r| r.reason),
                Some(ReviewReason::ManualHistoricalLabels)
            );
        }
    }

    #[test]
    fn mixed_manual_history_is_auto_run() {
        let out = classify(
            &one_site(vec![
                issue(100, WAIT_STATUS, 10, None),
                issue(90, "Canceled", 8, Some("BASE")),
                issue(80, WAIT_STATUS, 5, Some("FLX-CA")),
            ]),
            &BTreeMap::new(),
        );
        assert_eq!(out.auto_run.get("US-Ton"), Some(&100));
    }

    #[test]
    fn status_rule_wins_over_label_rule() {
        let out = classify(
            &one_site(vec![
                issue(100, WAIT_STATUS, 10, None),
                issue(90, "Results Sent", 8, Some("BASE")),
                issue(80, WAIT_STATUS, 5, Some("BASE")),
            ]),
            &BTreeMap::new(),
        );
        assert_eq!(
            out.review.get("US-Ton").map(|r| r.reason),
            Some(ReviewReason::DisallowedHistoricalStatus)
        );
    }

    #[test]
    fn empty_history_produces_nothing() {
        let histories = BTreeMap::from([("US-Ton".to_string(), SiteHistory::default())]);
        let out = classify(&histories, &BTreeMap::new());
        assert_eq!(out, Candidates::default());
    }

    #[test]
    fn latest_is_chosen_by_creation_time_not_input_order() {
        let out = classify(
            &one_site(vec![
                issue(80, "Canceled", 5, None),
                issue(100, WAIT_STATUS, 10, None),
            ]),
            &BTreeMap::new(),
        );
        assert_eq!(out.auto_run.get("US-Ton"), Some(&100));
    }

    #[test]
    fn rule_table_order_is_stable() {
        let names: Vec<&str> = RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "latest-not-awaiting-qaqc",
                "latest-predates-base-gen",
                "latest-manual-label",
                "history-disallowed-status",
                "history-all-manual-label",
            ]
        );
    }

    #[test]
    fn review_reason_text_names_the_allowed_sets() {
        let status = ReviewReason::DisallowedHistoricalStatus.to_string();
        assert!(status.starts_with("Has at least one historical QAQC status"));
        assert!(status.contains("Replace with Upload"));

        let label = ReviewReason::ManualHistoricalLabels.to_string();
        assert!(label.contains("BASE, FLX-CA"));
    }
}
