pub mod init;
pub mod log;
pub mod plan;
pub mod run;

use crate::output::OutputMode;
use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use qaqc_core::config::QaqcConfig;
use qaqc_core::timestamp::parse_tracker_ts;
use std::path::Path;

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Copy)]
pub struct GlobalArgs<'a> {
    pub config: Option<&'a Path>,
    pub json: bool,
    pub cwd: &'a Path,
}

impl GlobalArgs<'_> {
    pub fn load_config(&self) -> Result<QaqcConfig> {
        Ok(QaqcConfig::discover(self.config, self.cwd)?)
    }

    pub fn output_mode(&self, config: &QaqcConfig) -> OutputMode {
        OutputMode::from_name(&config.resolve_output(self.json))
    }
}

/// Evaluation time: `--now` if given (tracker timestamp format), else the
/// local wall clock.
pub fn evaluation_time(now: Option<&str>) -> Result<NaiveDateTime> {
    match now {
        Some(raw) => Ok(parse_tracker_ts("--now", raw)?),
        None => Ok(Local::now().naive_local()),
    }
}
