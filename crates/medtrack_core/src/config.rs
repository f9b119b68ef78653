//! Configuration file support for the tracker.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medtrack/config.toml`; every
//! section and key is optional. `MEDTRACK_DB` overrides `storage.db_path`.

use crate::model::schedule::{parse_clock, ScheduleError, TimeWindowTable, WindowBounds};
use crate::service::error::TrackerError;
use crate::service::transaction::RetryPolicy;
use crate::service::tracker::TrackerOptions;
use log::info;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the database path.
pub const DB_PATH_ENV: &str = "MEDTRACK_DB";

/// Tracker configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub windows: WindowsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[storage]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// `[retry]` section: lock-contention backoff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// One window as `HH:MM` clock strings; `end` may be `24:00`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub start: String,
    pub end: String,
}

impl WindowConfig {
    fn new(start: &str, end: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    fn bounds(&self) -> Result<WindowBounds, ScheduleError> {
        Ok(WindowBounds::new(parse_clock(&self.start)?, parse_clock(&self.end)?))
    }
}

/// `[windows]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsConfig {
    #[serde(default = "default_morning")]
    pub morning: WindowConfig,

    #[serde(default = "default_afternoon")]
    pub afternoon: WindowConfig,

    #[serde(default = "default_evening")]
    pub evening: WindowConfig,

    #[serde(default = "default_night")]
    pub night: WindowConfig,
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            morning: default_morning(),
            afternoon: default_afternoon(),
            evening: default_evening(),
            night: default_night(),
        }
    }
}

/// `[logging]` section.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,

    /// Absolute directory for rolling log files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Failure to load or interpret configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    InvalidWindows(ScheduleError),
    InvalidRetry(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse config `{}`: {source}", path.display())
            }
            Self::InvalidWindows(err) => write!(f, "invalid [windows]: {err}"),
            Self::InvalidRetry(message) => write!(f, "invalid [retry]: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidWindows(err) => Some(err),
            Self::InvalidRetry(_) => None,
        }
    }
}

impl From<ScheduleError> for ConfigError {
    fn from(value: ScheduleError) -> Self {
        Self::InvalidWindows(value)
    }
}

impl From<ConfigError> for TrackerError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

fn default_db_path() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("medtrack").join("medicine.db")
}

fn default_busy_timeout_ms() -> u64 {
    250
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    20
}

fn default_morning() -> WindowConfig {
    WindowConfig::new("06:00", "12:00")
}

fn default_afternoon() -> WindowConfig {
    WindowConfig::new("12:00", "17:00")
}

fn default_evening() -> WindowConfig {
    WindowConfig::new("17:00", "21:00")
}

fn default_night() -> WindowConfig {
    WindowConfig::new("21:00", "24:00")
}

impl TrackerConfig {
    /// Loads configuration from the standard path, then applies environment
    /// overrides. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path();
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            info!(
                "event=config_load module=config status=default path={}",
                config_path.display()
            );
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrackerConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            "event=config_load module=config status=ok path={}",
            path.display()
        );
        Ok(config)
    }

    /// `<config_dir>/medtrack/config.toml`.
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("medtrack").join("config.toml")
    }

    /// Applies overrides read through `lookup` (normally the process
    /// environment).
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(DB_PATH_ENV).filter(|value| !value.trim().is_empty()) {
            self.storage.db_path = PathBuf::from(path.trim());
        }
    }

    /// Parses and validates the configured windows.
    pub fn time_windows(&self) -> Result<TimeWindowTable, ConfigError> {
        let table = TimeWindowTable::try_new([
            self.windows.morning.bounds()?,
            self.windows.afternoon.bounds()?,
            self.windows.evening.bounds()?,
            self.windows.night.bounds()?,
        ])?;
        Ok(table)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry("max_attempts must be at least 1"));
        }
        Ok(RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        })
    }

    /// Builds validated tracker options from every section.
    pub fn tracker_options(&self) -> Result<TrackerOptions, ConfigError> {
        Ok(TrackerOptions {
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
            retry: self.retry_policy()?,
            windows: self.time_windows()?,
        })
    }
}
