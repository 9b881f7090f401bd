//! One invocation of the decision engine.
//!
//! [`Engine::run`] reads every input up front, then works on those snapshots:
//! classify → resolve → dispatch → notify → log. [`Engine::plan`] performs
//! the same reads and classification but no writes, launches or tickets.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

use crate::audit_log::AuditLogger;
use crate::classify::{Candidates, classify};
use crate::config::QaqcConfig;
use crate::dispatch::{DispatchInput, DispatchSettings, Dispatcher, JobLauncher, Precheck, precheck};
use crate::error::QaqcError;
use crate::model::audit::AuditBatch;
use crate::model::issue::{SiteFailure, SiteHistory, build_histories, parse_site_timestamps};
use crate::resolution::{Resolution, resolve_resolutions};
use crate::review::{Notifier, NotifierSettings, TicketTracker};
use crate::store::{LeaseStore, QaqcStore};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub dispatch: DispatchSettings,
    pub notifier: NotifierSettings,
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(config: &QaqcConfig, holder: impl Into<String>) -> Self {
        Self {
            dispatch: DispatchSettings::from_config(&config.dispatch, holder),
            notifier: NotifierSettings::from_config(&config.tracker),
        }
    }
}

/// Lease holder identity for the current process.
#[must_use]
pub fn invocation_holder(now: NaiveDateTime) -> String {
    format!(
        "qaqc-auto-{}-{}",
        std::process::id(),
        now.and_utc().timestamp_millis()
    )
}

/// Which input a site could not be read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedInput {
    IssueHistory,
    BaseGeneration,
    InProcess,
}

/// A site left out of (part of) this invocation because its record was
/// malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableSite {
    pub site_id: String,
    pub input: FailedInput,
    pub error: String,
}

/// Everything read from the store for one invocation.
#[derive(Debug, Default)]
struct Snapshot {
    histories: BTreeMap<String, SiteHistory>,
    last_generation: BTreeMap<String, NaiveDateTime>,
    in_process: BTreeMap<String, NaiveDateTime>,
    completed: BTreeSet<u64>,
    reviewed: BTreeSet<u64>,
    resolutions: BTreeMap<String, Resolution>,
    unreadable: Vec<UnreadableSite>,
}

impl Snapshot {
    fn read(store: &dyn QaqcStore) -> Result<Self, QaqcError> {
        let raw_history = store.qaqc_issue_history().map_err(QaqcError::Store)?;
        let raw_generation = store.last_base_gen_times().map_err(QaqcError::Store)?;
        let raw_in_process = store.in_process_sites().map_err(QaqcError::Store)?;
        let completed = store
            .completed_auto_run_issues()
            .map_err(QaqcError::Store)?;
        let reviewed = store.reviewed_issues().map_err(QaqcError::Store)?;
        let uploads = store
            .recent_upload_filenames()
            .map_err(QaqcError::Store)?;

        let mut snapshot = Self {
            completed,
            reviewed,
            resolutions: resolve_resolutions(&uploads),
            ..Self::default()
        };

        let (histories, failures) = build_histories(raw_history);
        snapshot.histories = histories;
        snapshot.note_failures(FailedInput::IssueHistory, failures);

        let (last_generation, failures) =
            parse_site_timestamps("last BASE generation", raw_generation);
        // Without a readable generation time the staleness rule cannot be
        // applied, so the site sits out entirely.
        for failure in &failures {
            snapshot.histories.remove(&failure.site_id);
        }
        snapshot.last_generation = last_generation;
        snapshot.note_failures(FailedInput::BaseGeneration, failures);

        let (in_process, failures) = parse_site_timestamps("in-process start", raw_in_process);
        snapshot.in_process = in_process;
        snapshot.note_failures(FailedInput::InProcess, failures);

        Ok(snapshot)
    }

    fn note_failures(&mut self, input: FailedInput, failures: Vec<SiteFailure>) {
        for failure in failures {
            warn!(
                site = %failure.site_id,
                code = %failure.error.code(),
                error = %failure.error,
                "skipping site with unreadable record"
            );
            self.unreadable.push(UnreadableSite {
                site_id: failure.site_id,
                input,
                error: failure.error.to_string(),
            });
        }
    }

    fn unreadable_for(&self, input: FailedInput) -> impl Iterator<Item = &str> {
        self.unreadable
            .iter()
            .filter(move |u| u.input == input)
            .map(|u| u.site_id.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub logged_at: NaiveDateTime,
    pub batch: AuditBatch,
    pub candidates: Candidates,
    pub unreadable: Vec<UnreadableSite>,
    pub pruned_leases: usize,
}

/// What `run` would do for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    Dispatch { resolution: String },
    InProgress,
    AlreadyDispatched,
    Review { reason: String },
    AlreadyReviewed,
    Skip { reason: String },
    Unreadable { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedSite {
    pub site_id: String,
    pub issue_number: Option<u64>,
    #[serde(flatten)]
    pub action: PlannedAction,
}

#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub evaluated_at: NaiveDateTime,
    pub sites: Vec<PlannedSite>,
}

/// The engine context: collaborators plus settings, built once per
/// invocation.
pub struct Engine<'a> {
    store: &'a dyn QaqcStore,
    leases: &'a dyn LeaseStore,
    tracker: &'a dyn TicketTracker,
    launcher: &'a dyn JobLauncher,
    settings: &'a EngineSettings,
}

impl<'a> Engine<'a> {
    #[must_use]
    pub fn new(
        store: &'a dyn QaqcStore,
        leases: &'a dyn LeaseStore,
        tracker: &'a dyn TicketTracker,
        launcher: &'a dyn JobLauncher,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            store,
            leases,
            tracker,
            launcher,
            settings,
        }
    }

    /// Run one full invocation at `now`.
    ///
    /// # Errors
    ///
    /// Any store, tracker, dispatch or audit failure aborts the invocation.
    /// Nothing is logged for an aborted invocation, so undecided work is
    /// picked up again by the next one.
    pub fn run(&self, now: NaiveDateTime) -> Result<RunReport, QaqcError> {
        let result = self.run_inner(now);
        if let Err(err) = &result {
            error!(code = %err.code(), kind = err.code().message(), error = %err, "invocation aborted");
        }
        result
    }

    fn run_inner(&self, now: NaiveDateTime) -> Result<RunReport, QaqcError> {
        let pruned_leases = self
            .leases
            .prune_expired_leases(now)
            .map_err(QaqcError::Store)?;

        let snapshot = Snapshot::read(self.store)?;
        let mut candidates = classify(&snapshot.histories, &snapshot.last_generation);

        // A site whose in-process record is unreadable cannot be checked
        // against the window; leave it for a later invocation.
        for site_id in snapshot.unreadable_for(FailedInput::InProcess) {
            candidates.auto_run.remove(site_id);
        }

        info!(
            sites = snapshot.histories.len(),
            auto_run = candidates.auto_run.len(),
            review = candidates.review.len(),
            "classified sites"
        );

        let dispatched = Dispatcher::new(self.leases, self.launcher, &self.settings.dispatch)
            .dispatch(
                &DispatchInput {
                    auto_run: &candidates.auto_run,
                    in_process: &snapshot.in_process,
                    completed: &snapshot.completed,
                    resolutions: &snapshot.resolutions,
                },
                now,
            )?;

        let reviewed = Notifier::new(self.tracker, &self.settings.notifier).notify(
            &candidates.review,
            &snapshot.reviewed,
            now,
        )?;

        let batch = AuditLogger::new(self.store).record(now, dispatched, reviewed)?;

        Ok(RunReport {
            logged_at: now,
            batch,
            candidates,
            unreadable: snapshot.unreadable,
            pruned_leases,
        })
    }

    /// Describe what [`Engine::run`] would decide at `now`; see [`plan`].
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::Store`] if a read fails.
    pub fn plan(&self, now: NaiveDateTime) -> Result<Plan, QaqcError> {
        plan(self.store, self.settings.dispatch.in_process_window, now)
    }
}

/// Describe what [`Engine::run`] would decide at `now` without acting.
/// Needs only the store, so callers need not build a tracker or launcher.
///
/// Site leases are not consulted, so a site shown as `dispatch` may still
/// be withheld by a concurrent run.
///
/// # Errors
///
/// Returns [`QaqcError::Store`] if a read fails.
pub fn plan(
    store: &dyn QaqcStore,
    in_process_window: chrono::Duration,
    now: NaiveDateTime,
) -> Result<Plan, QaqcError> {
    let snapshot = Snapshot::read(store)?;
    let candidates = classify(&snapshot.histories, &snapshot.last_generation);
    let in_process_unreadable: BTreeSet<&str> =
        snapshot.unreadable_for(FailedInput::InProcess).collect();

    let input = DispatchInput {
        auto_run: &candidates.auto_run,
        in_process: &snapshot.in_process,
        completed: &snapshot.completed,
        resolutions: &snapshot.resolutions,
    };

    let mut sites = Vec::new();
    for (site_id, &issue_number) in &candidates.auto_run {
        if in_process_unreadable.contains(site_id.as_str()) {
            continue;
        }
        let action = match precheck(site_id, issue_number, &input, in_process_window, now) {
            Precheck::InProgress => PlannedAction::InProgress,
            Precheck::AlreadyDispatched => PlannedAction::AlreadyDispatched,
            Precheck::Ready => PlannedAction::Dispatch {
                resolution: Resolution::token(snapshot.resolutions.get(site_id).copied())
                    .to_string(),
            },
        };
        sites.push(PlannedSite {
            site_id: site_id.clone(),
            issue_number: Some(issue_number),
            action,
        });
    }

    for (site_id, candidate) in &candidates.review {
        let action = if snapshot.reviewed.contains(&candidate.issue_number) {
            PlannedAction::AlreadyReviewed
        } else {
            PlannedAction::Review {
                reason: candidate.reason.to_string(),
            }
        };
        sites.push(PlannedSite {
            site_id: site_id.clone(),
            issue_number: Some(candidate.issue_number),
            action,
        });
    }

    for (site_id, reason) in &candidates.skipped {
        sites.push(PlannedSite {
            site_id: site_id.clone(),
            issue_number: snapshot
                .histories
                .get(site_id)
                .and_then(SiteHistory::latest)
                .map(|issue| issue.issue_number),
            action: PlannedAction::Skip {
                reason: reason.describe().to_string(),
            },
        });
    }

    for unreadable in &snapshot.unreadable {
        sites.push(PlannedSite {
            site_id: unreadable.site_id.clone(),
            issue_number: None,
            action: PlannedAction::Unreadable {
                error: unreadable.error.clone(),
            },
        });
    }

    sites.sort_by(|a, b| a.site_id.cmp(&b.site_id));
    Ok(Plan {
        evaluated_at: now,
        sites,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatchConfig, TrackerConfig};
    use crate::db::SqliteStore;
    use crate::dispatch::JobSpec;
    use crate::model::issue::{RawIssue, WAIT_STATUS};
    use crate::review::TicketRequest;
    use chrono::NaiveDate;
    use std::cell::Cell;

    struct CountingLauncher(Cell<usize>);

    impl JobLauncher for CountingLauncher {
        fn launch(&self, _job: &JobSpec<'_>) -> std::io::Result<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    struct NumberedTracker(Cell<u64>);

    impl TicketTracker for NumberedTracker {
        fn create_tracking_ticket(
            &self,
            _request: &TicketRequest<'_>,
        ) -> anyhow::Result<Option<String>> {
            self.0.set(self.0.get() + 1);
            Ok(Some(format!("QAQC-{}", 5000 + self.0.get())))
        }
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            dispatch: DispatchSettings::from_config(&DispatchConfig::default(), "test-run"),
            notifier: NotifierSettings::from_config(&TrackerConfig {
                reporter: "amf-data-team".to_string(),
                host: "https://tracker.example.org".to_string(),
                issue_path: "/browse/".to_string(),
                project: "QAQC".to_string(),
                issue_type: "Task".to_string(),
                token_env: "QAQC_TRACKER_TOKEN".to_string(),
            }),
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 10)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .expect("valid date")
    }

    fn issue(store: &SqliteStore, site: &str, num: i64, status: &str, created: &str) {
        store
            .upsert_issue(
                site,
                &RawIssue {
                    issue_num: num,
                    qaqc_status: status.to_string(),
                    created_at: created.to_string(),
                    label: None,
                },
            )
            .expect("seed issue");
    }

    #[test]
    fn malformed_in_process_time_holds_back_dispatch_only() {
        let store = SqliteStore::open_in_memory().expect("store");
        issue(&store, "US-Ton", 1, WAIT_STATUS, "2024-03-01 00:00:00");
        store
            .mark_in_process("US-Ton", "yesterday")
            .expect("seed in-process");

        let launcher = CountingLauncher(Cell::new(0));
        let tracker = NumberedTracker(Cell::new(0));
        let settings = settings();
        let report = Engine::new(&store, &store, &tracker, &launcher, &settings)
            .run(now())
            .expect("run");

        assert_eq!(launcher.0.get(), 0);
        assert!(report.batch.entries.is_empty());
        assert_eq!(report.unreadable.len(), 1);
        assert_eq!(report.unreadable[0].input, FailedInput::InProcess);
    }

    #[test]
    fn malformed_generation_time_drops_site() {
        let store = SqliteStore::open_in_memory().expect("store");
        issue(&store, "US-Ton", 1, WAIT_STATUS, "2024-03-01 00:00:00");
        store
            .record_base_generation("US-Ton", "March 2024")
            .expect("seed generation");

        let launcher = CountingLauncher(Cell::new(0));
        let tracker = NumberedTracker(Cell::new(0));
        let settings = settings();
        let engine = Engine::new(&store, &store, &tracker, &launcher, &settings);

        let plan = engine.plan(now()).expect("plan");
        assert_eq!(plan.sites.len(), 1);
        assert!(matches!(plan.sites[0].action, PlannedAction::Unreadable { .. }));

        let report = engine.run(now()).expect("run");
        assert_eq!(launcher.0.get(), 0);
        assert!(report.candidates.auto_run.is_empty());
    }

    #[test]
    fn plan_needs_only_the_store() {
        let store = SqliteStore::open_in_memory().expect("store");
        issue(&store, "US-Var", 4, WAIT_STATUS, "2024-03-01 00:00:00");
        store
            .mark_in_process("US-Var", "2024-04-09 18:00:00")
            .expect("seed in-process");

        let within = plan(&store, chrono::Duration::hours(48), now()).expect("plan");
        assert_eq!(within.sites[0].action, PlannedAction::InProgress);

        let lapsed = plan(&store, chrono::Duration::hours(6), now()).expect("plan");
        assert_eq!(
            lapsed.sites[0].action,
            PlannedAction::Dispatch {
                resolution: "None".to_string()
            }
        );
    }

    #[test]
    fn plan_has_no_side_effects() {
        let store = SqliteStore::open_in_memory().expect("store");
        issue(&store, "US-Ton", 1, WAIT_STATUS, "2024-03-01 00:00:00");
        issue(&store, "BR-Sa1", 2, "Complete", "2024-01-01 00:00:00");
        issue(&store, "BR-Sa1", 3, WAIT_STATUS, "2024-03-01 00:00:00");

        let launcher = CountingLauncher(Cell::new(0));
        let tracker = NumberedTracker(Cell::new(0));
        let settings = settings();
        let plan = Engine::new(&store, &store, &tracker, &launcher, &settings)
            .plan(now())
            .expect("plan");

        assert_eq!(launcher.0.get(), 0);
        assert_eq!(tracker.0.get(), 0);
        assert!(store.recent_audit(10).expect("audit").is_empty());
        assert!(store.site_lease("US-Ton").expect("lease").is_none());

        let actions: Vec<(&str, &PlannedAction)> = plan
            .sites
            .iter()
            .map(|s| (s.site_id.as_str(), &s.action))
            .collect();
        assert!(matches!(actions[0], ("BR-Sa1", PlannedAction::Review { .. })));
        assert_eq!(
            actions[1],
            (
                "US-Ton",
                &PlannedAction::Dispatch {
                    resolution: "None".to_string()
                }
            )
        );
    }

    #[test]
    fn holder_is_unique_per_process_and_time() {
        let a = invocation_holder(now());
        let b = invocation_holder(now() + chrono::Duration::milliseconds(1));
        assert!(a.starts_with("qaqc-auto-"));
        assert_ne!(a, b);
    }
}
