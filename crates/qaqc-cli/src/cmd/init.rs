use super::GlobalArgs;
use crate::output::{pretty_kv, pretty_section, render_mode};
use anyhow::{Context as _, Result};
use clap::Args;
use qaqc_core::config::CONFIG_FILE_NAME;
use qaqc_core::db::{migrations, open_store};
use serde::Serialize;
use std::io::Write as _;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing qaqc.toml with the template.
    #[arg(long)]
    pub force: bool,
}

const CONFIG_TEMPLATE: &str = "# qaqc-auto configuration\n\
    \n\
    [store]\n\
    path = \"qaqc.sqlite3\"\n\
    \n\
    [tracker]\n\
    # Required: fill these in, then run `qaqc-auto init` again.\n\
    # reporter = \"amf-data-team\"\n\
    # host = \"https://tracker.example.org\"\n\
    # issue_path = \"/browse/\"\n\
    project = \"QAQC\"\n\
    issue_type = \"Task\"\n\
    token_env = \"QAQC_TRACKER_TOKEN\"\n\
    \n\
    [dispatch]\n\
    program = \"python3\"\n\
    script = \"main.py\"\n\
    screen = \"screen\"\n\
    session_prefix = \"data_qaqc_run_\"\n\
    in_process_window_hours = 48\n\
    \n\
    [lock]\n\
    timeout_ms = 2000\n";

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum InitOutcome {
    /// A template was written; the operator must complete it.
    TemplateWritten { config: PathBuf },
    /// The store exists and is at the latest schema.
    StoreReady {
        config: PathBuf,
        store: PathBuf,
        schema_version: u32,
    },
}

/// Execute `qaqc-auto init`.
///
/// Without a config file, writes a `qaqc.toml` template and stops. With one,
/// creates the store database (if needed) and applies pending migrations.
///
/// # Errors
///
/// Returns an error if the template cannot be written, the configuration is
/// invalid, or the store cannot be opened or migrated.
pub fn run_init(args: &InitArgs, global: &GlobalArgs<'_>) -> Result<()> {
    let config_path = global
        .config
        .map_or_else(|| global.cwd.join(CONFIG_FILE_NAME), PathBuf::from);

    let outcome = if !config_path.exists() || args.force {
        std::fs::write(&config_path, CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        InitOutcome::TemplateWritten {
            config: config_path,
        }
    } else {
        let config = qaqc_core::config::QaqcConfig::load(&config_path)?;
        let store = open_store(&config.store.path)?;
        let schema_version = migrations::current_schema_version(store.connection())
            .context("read store schema version")?;
        InitOutcome::StoreReady {
            config: config_path,
            store: config.store.path,
            schema_version,
        }
    };

    render_mode(
        crate::output::OutputMode::early(global.json),
        &outcome,
        |outcome, w| match outcome {
            InitOutcome::TemplateWritten { config } => {
                writeln!(w, "template\t{}", config.display())
            }
            InitOutcome::StoreReady {
                store,
                schema_version,
                ..
            } => writeln!(w, "ready\t{}\t{schema_version}", store.display()),
        },
        |outcome, w| match outcome {
            InitOutcome::TemplateWritten { config } => {
                pretty_section(w, "Wrote configuration template")?;
                pretty_kv(w, "Config", config.display().to_string())?;
                writeln!(w)?;
                writeln!(w, "Next steps:")?;
                writeln!(w, "  Fill in [tracker] reporter, host and issue_path,")?;
                writeln!(w, "  then run `qaqc-auto init` again to create the store.")
            }
            InitOutcome::StoreReady {
                config,
                store,
                schema_version,
            } => {
                pretty_section(w, "Store ready")?;
                pretty_kv(w, "Config", config.display().to_string())?;
                pretty_kv(w, "Store", store.display().to_string())?;
                pretty_kv(w, "Schema", schema_version.to_string())
            }
        },
    )
}
