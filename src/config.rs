//! Configuration module for StatusWatch.
//!
//! Process settings come from environment variables; the monitoring
//! configuration is a YAML document reloaded by the scheduler.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the query API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statusdb.sqlite")
    pub db_path: String,
    /// Path to the monitoring YAML file (default: "config.yml")
    pub config_path: String,
    /// Period of the config-watch loop (default: 15s)
    pub watch_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "statusdb.sqlite".to_string(),
            config_path: "config.yml".to_string(),
            watch_interval: Duration::from_secs(15),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STATUSWATCH_DB_PATH`: Database file path (default: "statusdb.sqlite")
    /// - `STATUSWATCH_CONFIG_PATH`: Monitoring config path (default: "config.yml")
    /// - `STATUSWATCH_WATCH_SECONDS`: Config reload period (default: 15)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("STATUSWATCH_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("STATUSWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(config_path) = env::var("STATUSWATCH_CONFIG_PATH") {
            cfg.config_path = config_path;
        }

        if let Ok(secs) = env::var("STATUSWATCH_WATCH_SECONDS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    cfg.watch_interval = Duration::from_secs(secs);
                }
            }
        }

        cfg
    }
}

// ============================================================================
// Monitoring configuration
// ============================================================================

const DEFAULT_CHECK_INTERVAL_MINUTES: f64 = 15.0;
const DEFAULT_RETENTION_HOURS: f64 = 24.0;
const DEFAULT_PROBE_TIMEOUT_SECONDS: f64 = 7.0;
const DEFAULT_MAX_CONCURRENT_PROBES: usize = 16;

const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(50);
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);
const MIN_RETENTION: Duration = Duration::from_secs(1);
const MAX_RETENTION: Duration = Duration::from_secs(366 * 24 * 3600);
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(600);

/// Allowed range and unit of one duration field.
struct DurationField {
    name: &'static str,
    default: f64,
    secs_per_unit: f64,
    min: Duration,
    max: Duration,
}

const CHECK_INTERVAL: DurationField = DurationField {
    name: "check_interval_minutes",
    default: DEFAULT_CHECK_INTERVAL_MINUTES,
    secs_per_unit: 60.0,
    min: MIN_CHECK_INTERVAL,
    max: MAX_CHECK_INTERVAL,
};

const RETENTION: DurationField = DurationField {
    name: "data_retention_hours",
    default: DEFAULT_RETENTION_HOURS,
    secs_per_unit: 3600.0,
    min: MIN_RETENTION,
    max: MAX_RETENTION,
};

const PROBE_TIMEOUT: DurationField = DurationField {
    name: "probe_timeout_seconds",
    default: DEFAULT_PROBE_TIMEOUT_SECONDS,
    secs_per_unit: 1.0,
    min: MIN_PROBE_TIMEOUT,
    max: MAX_PROBE_TIMEOUT,
};

impl DurationField {
    /// Reject values a snapshot must never carry. Non-positive values are
    /// accepted and mean "use the default".
    fn check(&self, value: f64) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            field: self.name,
            reason,
        };
        if !value.is_finite() {
            return Err(invalid(format!("{} is not a finite number", value)));
        }
        if value <= 0.0 {
            return Ok(());
        }
        let duration = Duration::try_from_secs_f64(value * self.secs_per_unit)
            .map_err(|_| invalid(format!("{} is out of range", value)))?;
        if duration < self.min || duration > self.max {
            return Err(invalid(format!(
                "{} is outside {:?}..={:?}",
                value, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Convert to a duration, never panicking and always within range.
    fn to_duration(&self, value: f64) -> Duration {
        let value = if value.is_finite() && value > 0.0 { value } else { self.default };
        Duration::try_from_secs_f64(value * self.secs_per_unit)
            .unwrap_or(self.max)
            .clamp(self.min, self.max)
    }
}

/// One immutable version of the monitoring configuration.
///
/// Reloads always produce a fresh value; two snapshots are compared with
/// `==` to decide whether anything changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Site name used in alert subjects.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default = "default_retention_hours")]
    pub data_retention_hours: f64,
    #[serde(default = "default_check_interval_minutes")]
    pub check_interval_minutes: f64,
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: f64,
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
    #[serde(default)]
    pub mail: MailSettings,
    #[serde(default)]
    pub alert: AlertSettings,
    /// Opaque to the monitor; kept so equality covers the whole document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            name: String::new(),
            categories: Vec::new(),
            data_retention_hours: DEFAULT_RETENTION_HOURS,
            check_interval_minutes: DEFAULT_CHECK_INTERVAL_MINUTES,
            probe_timeout_seconds: DEFAULT_PROBE_TIMEOUT_SECONDS,
            max_concurrent_probes: DEFAULT_MAX_CONCURRENT_PROBES,
            mail: MailSettings::default(),
            alert: AlertSettings::default(),
            secret: None,
        }
    }
}

fn default_retention_hours() -> f64 {
    DEFAULT_RETENTION_HOURS
}

fn default_check_interval_minutes() -> f64 {
    DEFAULT_CHECK_INTERVAL_MINUTES
}

fn default_probe_timeout_seconds() -> f64 {
    DEFAULT_PROBE_TIMEOUT_SECONDS
}

fn default_max_concurrent_probes() -> usize {
    DEFAULT_MAX_CONCURRENT_PROBES
}

impl ConfigSnapshot {
    /// Parse a snapshot from a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let snapshot: Self = serde_yaml::from_str(text)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check that every duration field is finite and within its range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        CHECK_INTERVAL.check(self.check_interval_minutes)?;
        RETENTION.check(self.data_retention_hours)?;
        PROBE_TIMEOUT.check(self.probe_timeout_seconds)?;
        Ok(())
    }

    /// Period of the probe loop. Non-positive values fall back to the
    /// default; out-of-range values are clamped.
    pub fn check_interval(&self) -> Duration {
        CHECK_INTERVAL.to_duration(self.check_interval_minutes)
    }

    /// How far back samples are kept and summarized.
    pub fn retention(&self) -> Duration {
        RETENTION.to_duration(self.data_retention_hours)
    }

    /// Per-probe timeout budget.
    pub fn probe_timeout(&self) -> Duration {
        PROBE_TIMEOUT.to_duration(self.probe_timeout_seconds)
    }

    /// Upper bound on probes in flight during one cycle.
    pub fn probe_concurrency(&self) -> usize {
        self.max_concurrent_probes.max(1)
    }
}

/// A named group of services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// A monitored service as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub hide_url: bool,
    #[serde(default = "default_expected_code")]
    pub expected_response_code: u16,
}

fn default_expected_code() -> u16 {
    200
}

/// Mail settings. Only `enabled` is interpreted here; everything else
/// (smtp host, credentials, sender) is carried through for the notifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(flatten)]
    pub transport: BTreeMap<String, serde_yaml::Value>,
}

/// Tuning for the degradation alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Consecutive degraded samples needed, preceded by an online one.
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            consecutive_failures: default_consecutive_failures(),
        }
    }
}

fn default_consecutive_failures() -> usize {
    2
}

// ============================================================================
// Loaders
// ============================================================================

/// Source of configuration snapshots.
pub trait ConfigLoader: Send + Sync {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError>;
}

/// Reads the YAML file from disk on every call.
#[derive(Debug, Clone)]
pub struct FileConfigLoader {
    path: PathBuf,
}

impl FileConfigLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ConfigLoader for FileConfigLoader {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        ConfigSnapshot::from_yaml(&text)
    }
}

/// Loader returning a value held in memory. Used when embedding the
/// monitor in another process that owns the configuration.
#[derive(Debug, Default)]
pub struct StaticConfigLoader {
    snapshot: std::sync::RwLock<ConfigSnapshot>,
}

impl StaticConfigLoader {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: std::sync::RwLock::new(snapshot),
        }
    }

    /// Replace the snapshot returned by subsequent loads.
    pub fn set(&self, snapshot: ConfigSnapshot) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<ConfigSnapshot, ConfigError> {
        let guard = match self.snapshot.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.validate()?;
        Ok(guard.clone())
    }
}
