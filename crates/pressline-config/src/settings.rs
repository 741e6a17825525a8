//! Server paths and toggles, with an environment overlay.

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Well-known path of the shared inbound channel.
pub const DEFAULT_INBOUND_PATH: &str = "/tmp/pressline.fifo";
/// Directory where clients create their reply channels.
pub const DEFAULT_REPLY_DIR: &str = "/tmp";

const ENV_INBOUND_PATH: &str = "PRESSLINE_INBOUND_PATH";
const ENV_REPLY_DIR: &str = "PRESSLINE_REPLY_DIR";
const ENV_SIGNAL_CLIENTS: &str = "PRESSLINE_SIGNAL_CLIENTS";
const ENV_LOG_FORMAT: &str = "PRESSLINE_LOG_FORMAT";

/// Everything the server needs to know before it goes online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Capacity file consumed at startup.
    pub config_path: PathBuf,
    /// Directory holding one executable per transformation.
    pub bin_dir: PathBuf,
    /// Path of the shared inbound FIFO.
    pub inbound_path: PathBuf,
    /// Directory holding per-client reply FIFOs.
    pub reply_dir: PathBuf,
    /// Whether to send a wake-up signal to clients after writing their notice.
    pub signal_clients: bool,
    /// Requested log format (`json` or `pretty`), if any.
    pub log_format: Option<String>,
}

impl ServerSettings {
    /// Settings with default channel locations.
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            bin_dir: bin_dir.into(),
            inbound_path: PathBuf::from(DEFAULT_INBOUND_PATH),
            reply_dir: PathBuf::from(DEFAULT_REPLY_DIR),
            signal_clients: false,
            log_format: None,
        }
    }

    /// Overlay settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] for empty path overrides.
    pub fn with_env(self) -> ConfigResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Overlay settings from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSetting`] for empty path overrides or an
    /// unknown log format.
    pub fn with_overrides<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_INBOUND_PATH) {
            self.inbound_path = non_empty_path("inbound_path", &value)?;
        }
        if let Some(value) = lookup(ENV_REPLY_DIR) {
            self.reply_dir = non_empty_path("reply_dir", &value)?;
        }
        if let Some(value) = lookup(ENV_SIGNAL_CLIENTS) {
            self.signal_clients = env_flag_value(Some(&value));
        }
        if let Some(value) = lookup(ENV_LOG_FORMAT) {
            let normalized = value.trim().to_ascii_lowercase();
            if !matches!(normalized.as_str(), "json" | "pretty") {
                return Err(ConfigError::InvalidSetting {
                    field: "log_format",
                    reason: "unknown_format",
                    value: Some(value),
                });
            }
            self.log_format = Some(normalized);
        }
        Ok(self)
    }

    /// Override the inbound channel path.
    #[must_use]
    pub fn inbound_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inbound_path = path.into();
        self
    }

    /// Override the reply channel directory.
    #[must_use]
    pub fn reply_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.reply_dir = path.into();
        self
    }

    /// Toggle wake-up signals to clients.
    #[must_use]
    pub const fn signal_clients(mut self, enabled: bool) -> Self {
        self.signal_clients = enabled;
        self
    }

    /// Capacity file path.
    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Interpret a truthy environment value (`1`, `true`, `yes`, `on`).
#[must_use]
pub fn env_flag_value(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn non_empty_path(field: &'static str, value: &str) -> ConfigResult<PathBuf> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidSetting {
            field,
            reason: "empty",
            value: None,
        });
    }
    Ok(PathBuf::from(value))
}
