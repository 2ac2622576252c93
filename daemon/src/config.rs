//! Daemon configuration (`config.toml` beside the executable).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;

/// Default config file name, looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Layout of the timestamp embedded in trace lines (chrono strftime syntax).
pub const DEFAULT_TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[cfg(windows)]
const DEFAULT_LOGIN_TRACE: &str = r"C:\Users\Public\AppData\Roaming\AnyDesk\ad.trace";
#[cfg(windows)]
const DEFAULT_LOGOUT_TRACE: &str = r"C:\ProgramData\AnyDesk\ad_svc.trace";
#[cfg(not(windows))]
const DEFAULT_LOGIN_TRACE: &str = "/var/log/anydesk/ad.trace";
#[cfg(not(windows))]
const DEFAULT_LOGOUT_TRACE: &str = "/var/log/anydesk/ad_svc.trace";

/// Runtime configuration. Every key is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Webhook endpoint alerts are POSTed to.
    pub webhook_url: String,
    /// Label identifying this host in alerts. Empty means the host name.
    pub vm_name: String,
    /// Trace file carrying session login requests.
    pub login_trace_file: PathBuf,
    /// Trace file carrying session close events.
    pub logout_trace_file: PathBuf,
    /// Application log file. Empty disables file logging.
    pub app_log_file: PathBuf,
    /// Configuration document watched for edits. Empty disables watching.
    pub watched_file: PathBuf,
    pub recency_threshold_secs: u64,
    pub timestamp_layout: String,
    pub dedup_window_secs: u64,
    pub debounce_ms: u64,
    pub tail_poll_interval_ms: u64,
    /// Where the last-seen session user is persisted.
    pub state_file: PathBuf,
    pub webhook_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            vm_name: String::new(),
            login_trace_file: PathBuf::from(DEFAULT_LOGIN_TRACE),
            logout_trace_file: PathBuf::from(DEFAULT_LOGOUT_TRACE),
            app_log_file: PathBuf::from("tracewatch.log"),
            watched_file: PathBuf::new(),
            recency_threshold_secs: 5,
            timestamp_layout: DEFAULT_TIMESTAMP_LAYOUT.to_string(),
            dedup_window_secs: 30,
            debounce_ms: 500,
            tail_poll_interval_ms: 250,
            state_file: PathBuf::from(".tracewatch_user_state.json"),
            webhook_timeout_secs: 10,
        }
    }
}

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    Invalid { path: PathBuf, error: String },
}

impl ConfigSource {
    /// Report the outcome once logging is up.
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!(path = %path.display(), "Configuration loaded"),
            ConfigSource::Missing(path) => {
                info!(path = %path.display(), "Config file not found, using defaults")
            }
            ConfigSource::Invalid { path, error } => {
                warn!(path = %path.display(), error = %error, "Failed to load config, using defaults")
            }
        }
    }
}

impl Config {
    /// Load config from `path`, or from `config.toml` beside the executable.
    ///
    /// Never fails: a missing file yields defaults, an unreadable or
    /// malformed one yields defaults and an `Invalid` source.
    pub fn load(path: Option<&Path>) -> (Self, ConfigSource) {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => base_dir().join(CONFIG_FILE_NAME),
        };

        if !path.exists() {
            return (Self::default().resolved(), ConfigSource::Missing(path));
        }

        match Self::read(&path) {
            Ok(config) => (config.resolved(), ConfigSource::File(path)),
            Err(e) => (
                Self::default().resolved(),
                ConfigSource::Invalid {
                    path,
                    error: e.to_string(),
                },
            ),
        }
    }

    fn read(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Fill in derived defaults: host name label and exe-relative paths.
    fn resolved(mut self) -> Self {
        if self.vm_name.trim().is_empty() {
            self.vm_name = whoami::fallible::hostname().unwrap_or_else(|_| whoami::devicename());
        }
        let base = base_dir();
        if !self.app_log_file.as_os_str().is_empty() && self.app_log_file.is_relative() {
            self.app_log_file = base.join(&self.app_log_file);
        }
        if self.state_file.is_relative() {
            self.state_file = base.join(&self.state_file);
        }
        self
    }

    pub fn recency_threshold(&self) -> Duration {
        Duration::from_secs(self.recency_threshold_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn tail_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tail_poll_interval_ms.max(10))
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn file_watch_enabled(&self) -> bool {
        !self.watched_file.as_os_str().is_empty()
    }
}

/// Directory of the running executable, falling back to the local data dir.
pub fn base_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| dirs::data_local_dir().map(|d| d.join("tracewatch")))
        .unwrap_or_else(|| PathBuf::from("."))
}
