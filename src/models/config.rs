//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Monitoring behavior
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Persistence layout
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log verbosity
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upper bound for the request interval, in seconds.
pub const MAX_REQUEST_TIME_LIMIT_SECS: f64 = 3600.0;

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        self.monitor.selection()?;

        let limit = self.monitor.request_time_limit_secs;
        if !(0.0..=MAX_REQUEST_TIME_LIMIT_SECS).contains(&limit) {
            return Err(AppError::validation(format!(
                "monitor.request_time_limit_secs must be between 0 and {MAX_REQUEST_TIME_LIMIT_SECS}"
            )));
        }
        if self.api.user_agent.trim().is_empty() {
            return Err(AppError::validation("api.user_agent is empty"));
        }
        if self.api.timeout_secs == 0 {
            return Err(AppError::validation("api.timeout_secs must be > 0"));
        }
        url::Url::parse(&self.api.base_url)?;
        if self.storage.root_dir.trim().is_empty() {
            return Err(AppError::validation("storage.root_dir is empty"));
        }
        Ok(())
    }
}

/// Which boards to monitor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BoardSelection {
    /// Every board in the index
    #[default]
    All,
    /// Exactly these boards, no discovery
    Include(Vec<String>),
    /// Every board in the index except these
    Exclude(Vec<String>),
}

impl BoardSelection {
    /// Build a selection from optional include/exclude lists.
    ///
    /// The two lists are mutually exclusive.
    pub fn from_lists(include: Option<Vec<String>>, exclude: Option<Vec<String>>) -> Result<Self> {
        match (include, exclude) {
            (Some(_), Some(_)) => Err(AppError::config(
                "include_boards and exclude_boards are mutually exclusive",
            )),
            (Some(include), None) => Ok(Self::Include(include)),
            (None, Some(exclude)) => Ok(Self::Exclude(exclude)),
            (None, None) => Ok(Self::All),
        }
    }

    /// Whether resolving this selection requires the board index.
    pub fn needs_index(&self) -> bool {
        !matches!(self, Self::Include(_))
    }

    /// Resolve the monitored boards against the full index.
    pub fn resolve(&self, index: &[String]) -> Vec<String> {
        match self {
            Self::All => index.to_vec(),
            Self::Include(include) => include.clone(),
            Self::Exclude(exclude) => index
                .iter()
                .filter(|code| !exclude.contains(code))
                .cloned()
                .collect(),
        }
    }
}

/// Monitoring behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Start monitoring as soon as the requester is built
    #[serde(default)]
    pub enabled: bool,

    /// Only monitor these boards
    #[serde(default)]
    pub include_boards: Option<Vec<String>>,

    /// Monitor every board except these
    #[serde(default)]
    pub exclude_boards: Option<Vec<String>>,

    /// Minimum interval between requests, in seconds
    #[serde(default = "defaults::request_time_limit")]
    pub request_time_limit_secs: f64,
}

impl MonitorConfig {
    /// Minimum interval between requests.
    pub fn request_time_limit(&self) -> Duration {
        Duration::try_from_secs_f64(self.request_time_limit_secs).unwrap_or_default()
    }

    /// Board selection derived from the include/exclude lists.
    pub fn selection(&self) -> Result<BoardSelection> {
        BoardSelection::from_lists(self.include_boards.clone(), self.exclude_boards.clone())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            include_boards: None,
            exclude_boards: None,
            request_time_limit_secs: defaults::request_time_limit(),
        }
    }
}

/// Remote API and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL all endpoints are resolved against
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Granularity of the time buckets that partition saved data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    #[default]
    Day,
    Hour,
}

impl BucketGranularity {
    /// Bucket name for a point in time. Names sort chronologically.
    pub fn bucket_for<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        match self {
            Self::Day => time.format("%Y_%m_%d").to_string(),
            Self::Hour => time.format("%Y_%m_%d_%H").to_string(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory under which `saves/` is created
    #[serde(default = "defaults::root_dir")]
    pub root_dir: String,

    #[serde(default)]
    pub bucket: BucketGranularity,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: defaults::root_dir(),
            bucket: BucketGranularity::default(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    pub fn request_time_limit() -> f64 {
        1.0
    }
    pub fn base_url() -> String {
        "https://a.4cdn.org/".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; chanwatch/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn root_dir() -> String {
        ".".into()
    }
    pub fn log_level() -> String {
        "info".into()
    }
}
