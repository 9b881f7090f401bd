#![forbid(unsafe_code)]

mod cmd;
mod output;
mod tracker;

use clap::{Parser, Subcommand};
use output::{OutputMode, cli_error_from, render_error};
use std::env;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "qaqc-auto: automated data QAQC dispatch for flux sites",
    long_about = None
)]
struct Cli {
    /// Log at debug level (ignored when `QAQC_LOG` is set).
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to qaqc.toml (default: ./qaqc.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Setup",
        about = "Create or migrate the QAQC store",
        long_about = "Create the store database named in qaqc.toml and bring its schema up to date. \
                      Writes a qaqc.toml template first if none exists.",
        after_help = "EXAMPLES:\n    # Create qaqc.toml template, then the store\n    qaqc-auto init\n\n    # Use an explicit config file\n    qaqc-auto --config /etc/qaqc/qaqc.toml init"
    )]
    Init(cmd::init::InitArgs),

    #[command(
        next_help_heading = "Decisions",
        about = "Show what a run would decide, without acting",
        long_about = "Read the store, classify every site and report the decision per site. \
                      Launches nothing, opens no tickets and writes nothing.",
        after_help = "EXAMPLES:\n    # Decision table for now\n    qaqc-auto plan\n\n    # As JSON, evaluated at a fixed time\n    qaqc-auto plan --json --now \"2024-05-20 03:30:00\""
    )]
    Plan(cmd::plan::PlanArgs),

    #[command(
        next_help_heading = "Decisions",
        about = "Dispatch eligible QAQC runs and open review tickets",
        long_about = "Run one invocation: classify sites, dispatch auto-run candidates, \
                      open review tickets and append the audit batch.",
        after_help = "EXAMPLES:\n    # One invocation (typically from cron)\n    qaqc-auto run\n\n    # Emit the audit batch as JSON\n    qaqc-auto run --json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        next_help_heading = "Audit",
        about = "Show recent audit log entries",
        after_help = "EXAMPLES:\n    # Last 20 decisions\n    qaqc-auto log\n\n    # Last 100 as JSON\n    qaqc-auto log -n 100 --json"
    )]
    Log(cmd::log::LogArgs),
}

/// Filter used when `QAQC_LOG` is unset.
const fn default_filter(verbose: bool, debug_env: bool) -> &'static str {
    if verbose || debug_env {
        "qaqc=debug,info"
    } else {
        "qaqc=info,warn"
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("QAQC_LOG").unwrap_or_else(|_| {
        EnvFilter::new(default_filter(verbose, env::var("DEBUG").is_ok()))
    });

    let format = env::var("QAQC_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = env::current_dir()?;
    let global = cmd::GlobalArgs {
        config: cli.config.as_deref(),
        json: cli.json,
        cwd: &cwd,
    };

    let command_result = match cli.command {
        Commands::Init(ref args) => cmd::init::run_init(args, &global),
        Commands::Plan(ref args) => cmd::plan::run_plan(args, &global),
        Commands::Run(ref args) => cmd::run::run_run(args, &global),
        Commands::Log(ref args) => cmd::log::run_log(args, &global),
    };

    if let Err(err) = command_result {
        error!(error = %format!("{err:#}"), "command failed");
        render_error(OutputMode::early(cli.json), &cli_error_from(&err))?;
        std::process::exit(1);
    }

    Ok(())
}
