//! Stdout/stderr rendering for every `qaqc-auto` subcommand.
//!
//! A command builds one serializable value and hands it to [`render_mode`]
//! with a text and a pretty formatter; JSON needs no formatter.
//!
//! The mode comes from, first match wins: `--json`, `QAQC_FORMAT`, `output`
//! in `qaqc.toml`, then pretty on a terminal and text when piped (cron).

use qaqc_core::error::QaqcError;
use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const RULE: &str = "------------------------------------------------------------------------";

pub fn pretty_rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{RULE}")
}

/// Heading line underlined with [`pretty_rule`].
pub fn pretty_section(w: &mut dyn Write, title: &str) -> io::Result<()> {
    writeln!(w, "{title}")?;
    pretty_rule(w)
}

/// `Label:` padded to a fixed column, then the value.
pub fn pretty_kv(w: &mut dyn Write, label: &str, value: impl AsRef<str>) -> io::Result<()> {
    let label = format!("{label}:");
    writeln!(w, "{label:<12} {}", value.as_ref())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Headings and aligned tables for a person at a terminal.
    Pretty,
    /// One tab-separated record per line.
    Text,
    Json,
}

impl OutputMode {
    /// Mode for a name already resolved by the config layer. Anything
    /// unrecognised falls back to terminal detection.
    pub fn from_name(name: &str) -> Self {
        match name {
            "pretty" => Self::Pretty,
            "text" => Self::Text,
            "json" => Self::Json,
            _ => Self::detect(),
        }
    }

    /// Mode for output produced before the config is loaded, such as a
    /// config error.
    pub fn early(json: bool) -> Self {
        if json { Self::Json } else { Self::detect() }
    }

    fn detect() -> Self {
        if io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Text
        }
    }
}

/// Write `value` to stdout in `mode`.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    text: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    write_mode(mode, value, &mut io::stdout().lock(), text, pretty)
}

fn write_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    out: &mut dyn Write,
    text: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
    pretty: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    match mode {
        OutputMode::Text => text(value, out)?,
        OutputMode::Pretty => pretty(value, out)?,
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

/// What a failed command reports on stderr. Serialized under `"error"` in
/// JSON mode.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// `E####` code when the failure came from [`QaqcError`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            error_code: None,
        }
    }
}

impl From<&QaqcError> for CliError {
    fn from(error: &QaqcError) -> Self {
        Self {
            message: error.to_string(),
            suggestion: error.hint().map(str::to_string),
            error_code: Some(error.code().code().to_string()),
        }
    }
}

/// Use the first [`QaqcError`] in the chain if there is one, so context
/// layers added by the commands do not hide the code.
pub fn cli_error_from(error: &anyhow::Error) -> CliError {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<QaqcError>())
        .map_or_else(|| CliError::new(format!("{error:#}")), CliError::from)
}

pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    write_error(mode, error, &mut io::stderr().lock())
}

fn write_error(mode: OutputMode, error: &CliError, out: &mut dyn Write) -> anyhow::Result<()> {
    if mode == OutputMode::Json {
        serde_json::to_writer_pretty(&mut *out, &serde_json::json!({ "error": error }))?;
        writeln!(out)?;
        return Ok(());
    }

    let code = error
        .error_code
        .as_deref()
        .map_or_else(String::new, |code| format!("[{code}]"));
    writeln!(out, "error{code}: {}", error.message)?;
    if let Some(hint) = &error.suggestion {
        writeln!(out, "  suggestion: {hint}")?;
    }
    Ok(())
}
