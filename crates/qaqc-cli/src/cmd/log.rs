//! `qaqc-auto log`: audit trail inspection.

use super::GlobalArgs;
use crate::output::{pretty_rule, pretty_section, render_mode};
use anyhow::Result;
use clap::Args;
use qaqc_core::db::open_existing_store;
use std::io::Write;

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Maximum number of rows to show.
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

/// Execute `qaqc-auto log`: most recent audit entries, newest first.
///
/// # Errors
///
/// Returns an error if the configuration or store cannot be read.
pub fn run_log(args: &LogArgs, global: &GlobalArgs<'_>) -> Result<()> {
    let config = global.load_config()?;
    let mode = global.output_mode(&config);
    let store = open_existing_store(&config.store.path)?;
    let rows = store.recent_audit(args.limit)?;

    render_mode(
        mode,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}\t{}",
                    row.batch_ts, row.issue_number, row.state, row.decided_at, row.comment
                )?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, "Audit log")?;
            if rows.is_empty() {
                return writeln!(w, "No entries.");
            }
            writeln!(w, "{:<26}  {:>8}  {:<8} COMMENT", "BATCH", "ISSUE", "STATE")?;
            pretty_rule(w)?;
            for row in rows {
                writeln!(
                    w,
                    "{:<26}  {:>8}  {:<8} {}",
                    row.batch_ts,
                    row.issue_number,
                    row.state.as_str(),
                    row.comment
                )?;
            }
            Ok(())
        },
    )
}
