use super::{GlobalArgs, evaluation_time};
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};
use crate::tracker::JiraTracker;
use anyhow::Result;
use clap::Args;
use qaqc_core::db::open_existing_store;
use qaqc_core::dispatch::ScreenLauncher;
use qaqc_core::engine::{Engine, EngineSettings, RunReport, invocation_holder};
use qaqc_core::lock::InvocationLock;
use qaqc_core::model::audit::AuditState;
use qaqc_core::timestamp::format_tracker_ts;
use std::io::Write;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Evaluate as of this time (`YYYY-MM-DD HH:MM:SS`) instead of now.
    #[arg(long, value_name = "TIMESTAMP")]
    pub now: Option<String>,
}

fn count(report: &RunReport, state: AuditState) -> usize {
    report
        .batch
        .entries
        .iter()
        .filter(|entry| entry.state == state)
        .count()
}

/// Execute `qaqc-auto run`: one full invocation under the invocation lock.
///
/// # Errors
///
/// Returns an error if the lock is held by another invocation, or if any
/// read, dispatch, ticket or audit write fails.
pub fn run_run(args: &RunArgs, global: &GlobalArgs<'_>) -> Result<()> {
    let config = global.load_config()?;
    let mode = global.output_mode(&config);
    let now = evaluation_time(args.now.as_deref())?;

    let lock_path = InvocationLock::path_for_store(&config.store.path);
    let lock = InvocationLock::acquire(&lock_path, config.lock.timeout())?;

    let store = open_existing_store(&config.store.path)?;
    let tracker = JiraTracker::from_config(&config.tracker);
    let launcher = ScreenLauncher::from_config(&config.dispatch);
    let holder = invocation_holder(now);
    let settings = EngineSettings::from_config(&config, holder.clone());

    info!(holder = %holder, at = %format_tracker_ts(now), "starting invocation");
    let report = Engine::new(&store, &store, &tracker, &launcher, &settings).run(now)?;
    lock.release();

    render_mode(
        mode,
        &report,
        |report, w| {
            for entry in &report.batch.entries {
                writeln!(w, "{}\t{}\t{}", entry.issue_number, entry.state, entry.comment)?;
            }
            Ok(())
        },
        |report, w| {
            pretty_section(
                w,
                &format!("Invocation at {}", format_tracker_ts(report.logged_at)),
            )?;
            pretty_kv(w, "Dispatched", count(report, AuditState::Success).to_string())?;
            pretty_kv(w, "In progress", count(report, AuditState::Warning).to_string())?;
            pretty_kv(w, "Reviews", count(report, AuditState::Review).to_string())?;
            pretty_kv(w, "Unreadable", report.unreadable.len().to_string())?;
            if report.batch.entries.is_empty() {
                return Ok(());
            }
            writeln!(w)?;
            writeln!(w, "{:>8}  {:<8} COMMENT", "ISSUE", "STATE")?;
            pretty_rule(w)?;
            for entry in &report.batch.entries {
                writeln!(
                    w,
                    "{:>8}  {:<8} {}",
                    entry.issue_number,
                    entry.state.as_str(),
                    entry.comment
                )?;
            }
            Ok(())
        },
    )
}
