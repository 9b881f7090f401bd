use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::QaqcError;

/// File name looked up in the working directory when `--config` is absent.
pub const CONFIG_FILE_NAME: &str = "qaqc.toml";

/// Fully validated runtime configuration.
#[derive(Debug, Clone, Serialize)]
pub struct QaqcConfig {
    pub store: StoreConfig,
    pub tracker: TrackerConfig,
    pub dispatch: DispatchConfig,
    pub lock: LockConfig,
    pub output: Option<String>,
    /// File this configuration was read from.
    pub source: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    /// Store database path; relative paths are resolved against the config
    /// file's directory.
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackerConfig {
    pub reporter: String,
    pub host: String,
    pub issue_path: String,
    pub project: String,
    pub issue_type: String,
    pub token_env: String,
}

impl TrackerConfig {
    /// API token from the environment variable named by `token_env`.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        env::var(&self.token_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_script")]
    pub script: String,
    #[serde(default = "default_screen")]
    pub screen: String,
    #[serde(default = "default_session_prefix")]
    pub session_prefix: String,
    #[serde(default = "default_window_hours")]
    pub in_process_window_hours: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            script: default_script(),
            screen: default_screen(),
            session_prefix: default_session_prefix(),
            in_process_window_hours: default_window_hours(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn in_process_window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.in_process_window_hours))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl LockConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// On-disk shape. Required keys are optional here so a missing one becomes a
// `Config` error naming the key rather than a serde message.
#[derive(Debug, Deserialize)]
struct RawConfig {
    store: Option<RawStore>,
    tracker: Option<RawTracker>,
    #[serde(default)]
    dispatch: DispatchConfig,
    #[serde(default)]
    lock: LockConfig,
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStore {
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawTracker {
    reporter: Option<String>,
    host: Option<String>,
    issue_path: Option<String>,
    #[serde(default = "default_project")]
    project: String,
    #[serde(default = "default_issue_type")]
    issue_type: String,
    #[serde(default = "default_token_env")]
    token_env: String,
}

fn required(value: Option<String>, key: &str) -> Result<String, QaqcError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| QaqcError::Config(format!("missing required key `{key}`")))
}

impl QaqcConfig {
    /// Parse and validate configuration text. `source` is used for error
    /// messages and to anchor a relative store path.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::ConfigParse`] for invalid TOML and
    /// [`QaqcError::Config`] for a missing required key or an out-of-range
    /// value.
    pub fn from_toml(text: &str, source: &Path) -> Result<Self, QaqcError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source_err| QaqcError::ConfigParse {
            path: source.to_path_buf(),
            source: source_err,
        })?;

        let store_path = raw
            .store
            .and_then(|s| s.path)
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| QaqcError::Config("missing required key `store.path`".to_string()))?;
        let store_path = if store_path.is_relative() {
            source
                .parent()
                .map_or_else(|| store_path.clone(), |dir| dir.join(&store_path))
        } else {
            store_path
        };

        let tracker = raw
            .tracker
            .ok_or_else(|| QaqcError::Config("missing required table `[tracker]`".to_string()))?;
        let tracker = TrackerConfig {
            reporter: required(tracker.reporter, "tracker.reporter")?,
            host: required(tracker.host, "tracker.host")?,
            issue_path: required(tracker.issue_path, "tracker.issue_path")?,
            project: tracker.project,
            issue_type: tracker.issue_type,
            token_env: tracker.token_env,
        };

        if raw.dispatch.in_process_window_hours == 0 {
            return Err(QaqcError::Config(
                "`dispatch.in_process_window_hours` must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store: StoreConfig { path: store_path },
            tracker,
            dispatch: raw.dispatch,
            lock: raw.lock,
            output: raw.output,
            source: source.to_path_buf(),
        })
    }

    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::Config`] if the file cannot be read, plus the
    /// errors of [`QaqcConfig::from_toml`].
    pub fn load(path: &Path) -> Result<Self, QaqcError> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            QaqcError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml(&text, path)
    }

    /// Locate and load the configuration: `explicit` if given, else
    /// `qaqc.toml` in `cwd`, else `qaqc-auto/qaqc.toml` under the user config
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`QaqcError::Config`] when no file is found, plus the errors
    /// of [`QaqcConfig::load`].
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Self, QaqcError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let local = cwd.join(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(user) = dirs::config_dir().map(|d| d.join("qaqc-auto").join(CONFIG_FILE_NAME))
            && user.exists()
        {
            return Self::load(&user);
        }

        Err(QaqcError::Config(format!(
            "no {CONFIG_FILE_NAME} in {} and no --config given",
            cwd.display()
        )))
    }

    /// Output mode: `--json` wins, then `QAQC_FORMAT`, then the config file,
    /// then pretty for a terminal and text otherwise.
    #[must_use]
    pub fn resolve_output(&self, cli_json: bool) -> String {
        resolve_output(cli_json, self.output.clone(), env::var("QAQC_FORMAT").ok())
    }
}

fn resolve_output(
    cli_json: bool,
    config_output: Option<String>,
    env_format: Option<String>,
) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" => Some("pretty"),
            "text" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = config_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

fn default_project() -> String {
    "QAQC".to_string()
}

fn default_issue_type() -> String {
    "Task".to_string()
}

fn default_token_env() -> String {
    "QAQC_TRACKER_TOKEN".to_string()
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_script() -> String {
    "main.py".to_string()
}

fn default_screen() -> String {
    "screen".to_string()
}

fn default_session_prefix() -> String {
    "data_qaqc_run_".to_string()
}

const fn default_window_hours() -> u32 {
    48
}

const fn default_lock_timeout_ms() -> u64 {
    2_000
}
