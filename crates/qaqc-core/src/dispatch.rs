//! Run dispatcher: duplicate/concurrency guards, then a detached job launch.
//!
//! Guards, in order, for each auto-run candidate:
//!
//! 1. a recent in-process timestamp (younger than the window) → `WARNING`
//! 2. issue already dispatched in an earlier invocation → nothing
//! 3. a live lease held by another run → `WARNING`
//!
//! Anything that passes is launched and logged `SUCCESS`.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::process::{Command, Stdio};
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::QaqcError;
use crate::model::audit::{AuditEntry, AuditState};
use crate::resolution::Resolution;
use crate::store::{LeaseStore, SiteLease};

/// Comment logged with a withheld dispatch.
pub const RUN_IN_PROGRESS: &str = "Run in progress";

/// Detached session name for an issue's QAQC job.
#[must_use]
pub fn session_name(prefix: &str, issue_number: u64) -> String {
    format!("{prefix}{issue_number}")
}

/// One job to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec<'a> {
    pub session: &'a str,
    pub site_id: &'a str,
    pub resolution: Option<Resolution>,
}

/// Starts a QAQC job in the background. Returns once the job is detached;
/// the job's own outcome is not observed.
pub trait JobLauncher {
    /// # Errors
    ///
    /// Returns an error when the job could not be started.
    fn launch(&self, job: &JobSpec<'_>) -> io::Result<()>;
}

/// Launches jobs as `screen -dmS <session> <program> <script> <site> <res>`.
#[derive(Debug, Clone)]
pub struct ScreenLauncher {
    screen: String,
    program: String,
    script: String,
}

impl ScreenLauncher {
    #[must_use]
    pub fn new(
        screen: impl Into<String>,
        program: impl Into<String>,
        script: impl Into<String>,
    ) -> Self {
        Self {
            screen: screen.into(),
            program: program.into(),
            script: script.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(&config.screen, &config.program, &config.script)
    }

    fn command(&self, job: &JobSpec<'_>) -> Command {
        let mut cmd = Command::new(&self.screen);
        cmd.args(["-dmS", job.session])
            .arg(&self.program)
            .arg(&self.script)
            .arg(job.site_id)
            .arg(Resolution::token(job.resolution))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

impl JobLauncher for ScreenLauncher {
    fn launch(&self, job: &JobSpec<'_>) -> io::Result<()> {
        let status = self.command(job).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{} exited with code {}",
                self.screen,
                status.code().unwrap_or(-1)
            )))
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub session_prefix: String,
    pub in_process_window: chrono::Duration,
    /// Lease holder identity for this invocation.
    pub holder: String,
}

impl DispatchSettings {
    #[must_use]
    pub fn from_config(config: &DispatchConfig, holder: impl Into<String>) -> Self {
        Self {
            session_prefix: config.session_prefix.clone(),
            in_process_window: config.in_process_window(),
            holder: holder.into(),
        }
    }
}

/// Snapshot inputs for one dispatch pass.
#[derive(Debug, Clone, Copy)]
pub struct DispatchInput<'a> {
    pub auto_run: &'a BTreeMap<String, u64>,
    pub in_process: &'a BTreeMap<String, NaiveDateTime>,
    pub completed: &'a BTreeSet<u64>,
    pub resolutions: &'a BTreeMap<String, Resolution>,
}

/// Outcome of the side-effect-free guards for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precheck {
    InProgress,
    AlreadyDispatched,
    Ready,
}

/// Evaluate the in-process window and completed-issue guards.
#[must_use]
pub fn precheck(
    site_id: &str,
    issue_number: u64,
    input: &DispatchInput<'_>,
    window: chrono::Duration,
    now: NaiveDateTime,
) -> Precheck {
    if input
        .in_process
        .get(site_id)
        .is_some_and(|started| now.signed_duration_since(*started) < window)
    {
        Precheck::InProgress
    } else if input.completed.contains(&issue_number) {
        Precheck::AlreadyDispatched
    } else {
        Precheck::Ready
    }
}

pub struct Dispatcher<'a> {
    leases: &'a dyn LeaseStore,
    launcher: &'a dyn JobLauncher,
    settings: &'a DispatchSettings,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub fn new(
        leases: &'a dyn LeaseStore,
        launcher: &'a dyn JobLauncher,
        settings: &'a DispatchSettings,
    ) -> Self {
        Self {
            leases,
            launcher,
            settings,
        }
    }

    /// Dispatch every candidate that clears the guards, in site order.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::Store`] if a lease cannot be read or written and
    /// [`QaqcError::Dispatch`] if a job fails to start. Either aborts the
    /// pass; entries decided before the failure are discarded with it.
    pub fn dispatch(
        &self,
        input: &DispatchInput<'_>,
        now: NaiveDateTime,
    ) -> Result<Vec<AuditEntry>, QaqcError> {
        let mut entries = Vec::new();

        for (site_id, &issue_number) in input.auto_run {
            match precheck(
                site_id,
                issue_number,
                input,
                self.settings.in_process_window,
                now,
            ) {
                Precheck::InProgress => {
                    info!(site = %site_id, issue = issue_number, "run in progress; not dispatching");
                    entries.push(AuditEntry::new(
                        issue_number,
                        AuditState::Warning,
                        now,
                        RUN_IN_PROGRESS,
                    ));
                }
                Precheck::AlreadyDispatched => {
                    debug!(site = %site_id, issue = issue_number, "already dispatched");
                }
                Precheck::Ready => {
                    let resolution = input.resolutions.get(site_id).copied();
                    entries.push(self.dispatch_one(site_id, issue_number, resolution, now)?);
                }
            }
        }

        Ok(entries)
    }

    fn dispatch_one(
        &self,
        site_id: &str,
        issue_number: u64,
        resolution: Option<Resolution>,
        now: NaiveDateTime,
    ) -> Result<AuditEntry, QaqcError> {
        let lease = SiteLease {
            site_id: site_id.to_string(),
            issue_number,
            holder: self.settings.holder.clone(),
            acquired_at: now,
            expires_at: now + self.settings.in_process_window,
        };

        if !self
            .leases
            .acquire_site_lease(&lease)
            .map_err(QaqcError::Store)?
        {
            warn!(site = %site_id, issue = issue_number, "site lease held by another run");
            return Ok(AuditEntry::new(
                issue_number,
                AuditState::Warning,
                now,
                RUN_IN_PROGRESS,
            ));
        }

        let session = session_name(&self.settings.session_prefix, issue_number);
        let job = JobSpec {
            session: &session,
            site_id,
            resolution,
        };

        if let Err(source) = self.launcher.launch(&job) {
            error!(site = %site_id, issue = issue_number, error = %source, "job launch failed");
            if let Err(release_err) = self.leases.release_site_lease(site_id, &self.settings.holder)
            {
                error!(site = %site_id, error = %release_err, "lease release failed");
            }
            return Err(QaqcError::Dispatch {
                site: site_id.to_string(),
                issue_number,
                source,
            });
        }

        info!(
            site = %site_id,
            issue = issue_number,
            session = %session,
            resolution = Resolution::token(resolution),
            "dispatched QAQC job"
        );
        Ok(AuditEntry::new(issue_number, AuditState::Success, now, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteStore;
    use chrono::{Duration, NaiveDate};
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: RefCell<Vec<(String, String, &'static str)>>,
        fail_for: Option<&'static str>,
    }

    impl JobLauncher for RecordingLauncher {
        fn launch(&self, job: &JobSpec<'_>) -> io::Result<()> {
            if self.fail_for == Some(job.site_id) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no screen"));
            }
            self.launched.borrow_mut().push((
                job.session.to_string(),
                job.site_id.to_string(),
                Resolution::token(job.resolution),
            ));
            Ok(())
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 10)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .expect("valid date")
    }

    fn settings(holder: &str) -> DispatchSettings {
        DispatchSettings::from_config(&DispatchConfig::default(), holder)
    }

    struct Fixture {
        auto_run: BTreeMap<String, u64>,
        in_process: BTreeMap<String, NaiveDateTime>,
        completed: BTreeSet<u64>,
        resolutions: BTreeMap<String, Resolution>,
    }

    impl Fixture {
        fn new(auto_run: &[(&str, u64)]) -> Self {
            Self {
                auto_run: auto_run.iter().map(|(s, n)| ((*s).to_string(), *n)).collect(),
                in_process: BTreeMap::new(),
                completed: BTreeSet::new(),
                resolutions: BTreeMap::new(),
            }
        }

        fn input(&self) -> DispatchInput<'_> {
            DispatchInput {
                auto_run: &self.auto_run,
                in_process: &self.in_process,
                completed: &self.completed,
                resolutions: &self.resolutions,
            }
        }
    }

    #[test]
    fn ready_candidate_is_launched_with_session_and_resolution() {
        let store = SqliteStore::open_in_memory().expect("store");
        let launcher = RecordingLauncher::default();
        let settings = settings("run-a");
        let mut fx = Fixture::new(&[("US-Ton", 4242), ("BR-Sa1", 17)]);
        fx.resolutions.insert("US-Ton".to_string(), Resolution::HalfHourly);

        let entries = Dispatcher::new(&store, &launcher, &settings)
            .dispatch(&fx.input(), now())
            .expect("dispatch");

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.state == AuditState::Success && e.comment.is_empty()));
        assert_eq!(
            *launcher.launched.borrow(),
            vec![
                ("data_qaqc_run_17".to_string(), "BR-Sa1".to_string(), "None"),
                ("data_qaqc_run_4242".to_string(), "US-Ton".to_string(), "HH"),
            ]
        );
    }

    #[test]
    fn recent_in_process_site_warns_without_dispatch() {
        let store = SqliteStore::open_in_memory().expect("store");
        let launcher = RecordingLauncher::default();
        let settings = settings("run-a");
        let mut fx = Fixture::new(&[("US-Ton", 9)]);
        fx.in_process
            .insert("US-Ton".to_string(), now() - Duration::hours(47));

        let entries = Dispatcher::new(&store, &launcher, &settings)
            .dispatch(&fx.input(), now())
            .expect("dispatch");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, AuditState::Warning);
        assert_eq!(entries[0].comment, RUN_IN_PROGRESS);
        assert!(launcher.launched.borrow().is_empty());
    }

    #[test]
    fn stale_in_process_site_is_dispatched() {
        let store = SqliteStore::open_in_memory().expect("store");
        let launcher = RecordingLauncher::default();
        let settings = settings("run-a");
        let mut fx = Fixture::new(&[("US-Ton", 9)]);
        fx.in_process
            .insert("US-Ton".to_string(), now() - Duration::hours(48));

        let entries = Dispatcher::new(&store, &launcher, &settings)
            .dispatch(&fx.input(), now())
            .expect("dispatch");

        assert_eq!(entries[0].state, AuditState::Success);
        assert_eq!(launcher.launched.borrow().len(), 1);
    }

    #[test]
    fn completed_issue_is_skipped_silently() {
        let store = SqliteStore::open_in_memory().expect("store");
        let launcher = RecordingLauncher::default();
        let settings = settings("run-a");
        let mut fx = Fixture::new(&[("US-Ton", 9)]);
        fx.completed.insert(9);

        let entries = Dispatcher::new(&store, &launcher, &settings)
            .dispatch(&fx.input(), now())
            .expect("dispatch");

        assert!(entries.is_empty());
        assert!(launcher.launched.borrow().is_empty());
    }

    #[test]
    fn live_lease_from_other_run_warns() {
        let store = SqliteStore::open_in_memory().expect("store");
        let launcher = RecordingLauncher::default();
        let fx = Fixture::new(&[("US-Ton", 9)]);

        let first = settings("run-a");
        Dispatcher::new(&store, &launcher, &first)
            .dispatch(&fx.input(), now())
            .expect("first dispatch");

        // A second run an hour later that has not yet seen the first run's log.
        let second = settings("run-b");
        let entries = Dispatcher::new(&store, &launcher, &second)
            .dispatch(&fx.input(), now() + Duration::hours(1))
            .expect("second dispatch");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].state, AuditState::Warning);
        assert_eq!(launcher.launched.borrow().len(), 1);
    }

    #[test]
    fn launch_failure_releases_lease_and_aborts() {
        let store = SqliteStore::open_in_memory().expect("store");
        let launcher = RecordingLauncher {
            fail_for: Some("US-Ton"),
            ..RecordingLauncher::default()
        };
        let settings = settings("run-a");
        let fx = Fixture::new(&[("US-Ton", 9)]);

        let err = Dispatcher::new(&store, &launcher, &settings)
            .dispatch(&fx.input(), now())
            .expect_err("launch fails");

        assert!(matches!(err, QaqcError::Dispatch { issue_number: 9, .. }));
        assert!(store.site_lease("US-Ton").expect("lease read").is_none());
    }

    #[test]
    fn screen_command_line_shape() {
        let launcher = ScreenLauncher::new("screen", "python3", "main.py");
        let cmd = launcher.command(&JobSpec {
            session: "data_qaqc_run_5",
            site_id: "CA-Gro",
            resolution: None,
        });
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(cmd.get_program(), "screen");
        assert_eq!(
            args,
            vec!["-dmS", "data_qaqc_run_5", "python3", "main.py", "CA-Gro", "None"]
        );
    }

    #[test]
    fn screen_launcher_reports_missing_binary() {
        let launcher = ScreenLauncher::new("/nonexistent/screen-binary", "python3", "main.py");
        let result = launcher.launch(&JobSpec {
            session: "data_qaqc_run_5",
            site_id: "CA-Gro",
            resolution: None,
        });
        assert!(result.is_err());
    }
}
