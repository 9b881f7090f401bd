use super::{GlobalArgs, evaluation_time};
use crate::output::{pretty_rule, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use qaqc_core::db::open_existing_store;
use qaqc_core::engine::{self, PlannedAction, PlannedSite};
use qaqc_core::timestamp::format_tracker_ts;
use std::io::Write;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Evaluate as of this time (`YYYY-MM-DD HH:MM:SS`) instead of now.
    #[arg(long, value_name = "TIMESTAMP")]
    pub now: Option<String>,
}

fn action_label(action: &PlannedAction) -> &'static str {
    match action {
        PlannedAction::Dispatch { .. } => "dispatch",
        PlannedAction::InProgress => "in_progress",
        PlannedAction::AlreadyDispatched => "already_dispatched",
        PlannedAction::Review { .. } => "review",
        PlannedAction::AlreadyReviewed => "already_reviewed",
        PlannedAction::Skip { .. } => "skip",
        PlannedAction::Unreadable { .. } => "unreadable",
    }
}

fn action_detail(action: &PlannedAction) -> &str {
    match action {
        PlannedAction::Dispatch { resolution } => resolution,
        PlannedAction::Review { reason } | PlannedAction::Skip { reason } => reason,
        PlannedAction::Unreadable { error } => error,
        PlannedAction::InProgress | PlannedAction::AlreadyDispatched | PlannedAction::AlreadyReviewed => "",
    }
}

fn issue_cell(site: &PlannedSite) -> String {
    site.issue_number.map_or_else(|| "-".to_string(), |n| n.to_string())
}

/// Execute `qaqc-auto plan`.
///
/// # Errors
///
/// Returns an error if the configuration or store cannot be read.
pub fn run_plan(args: &PlanArgs, global: &GlobalArgs<'_>) -> Result<()> {
    let config = global.load_config()?;
    let mode = global.output_mode(&config);
    let now = evaluation_time(args.now.as_deref())?;

    let store = open_existing_store(&config.store.path)?;
    let plan = engine::plan(&store, config.dispatch.in_process_window(), now)?;

    render_mode(
        mode,
        &plan,
        |plan, w| {
            for site in &plan.sites {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}",
                    site.site_id,
                    issue_cell(site),
                    action_label(&site.action),
                    action_detail(&site.action)
                )?;
            }
            Ok(())
        },
        |plan, w| {
            pretty_section(
                w,
                &format!("Plan at {}", format_tracker_ts(plan.evaluated_at)),
            )?;
            if plan.sites.is_empty() {
                return writeln!(w, "No sites with QAQC issues.");
            }
            writeln!(w, "{:<10} {:>8}  {:<18} DETAIL", "SITE", "ISSUE", "ACTION")?;
            pretty_rule(w)?;
            for site in &plan.sites {
                writeln!(
                    w,
                    "{:<10} {:>8}  {:<18} {}",
                    site.site_id,
                    issue_cell(site),
                    action_label(&site.action),
                    action_detail(&site.action)
                )?;
            }
            Ok(())
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable_identifiers() {
        assert_eq!(
            action_label(&PlannedAction::Dispatch {
                resolution: "HH".to_string()
            }),
            "dispatch"
        );
        assert_eq!(action_label(&PlannedAction::AlreadyReviewed), "already_reviewed");
    }

    #[test]
    fn detail_shows_resolution_or_reason() {
        assert_eq!(
            action_detail(&PlannedAction::Dispatch {
                resolution: "None".to_string()
            }),
            "None"
        );
        assert_eq!(action_detail(&PlannedAction::InProgress), "");
    }

    #[test]
    fn missing_issue_renders_dash() {
        let site = PlannedSite {
            site_id: "US-Bad".to_string(),
            issue_number: None,
            action: PlannedAction::Unreadable {
                error: "bad timestamp".to_string(),
            },
        };
        assert_eq!(issue_cell(&site), "-");
    }
}
