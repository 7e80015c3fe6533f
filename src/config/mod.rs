//! Configuration model for the archiver.
//!
//! The file is YAML. Every section is optional and falls back to defaults, so
//! a minimal config only needs `source.path` and `destination.root`. The loaded
//! [`Config`] is split into immutable per-consumer snapshots that the watcher
//! and worker swap in wholesale on reload.

mod duration;
mod errors;
mod load;

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub use errors::ConfigError;
pub use load::{expand_env_vars, load, parse_config, resolve_config_path};

use crate::retention::schedule::Schedule;

/// Default file name looked up in the application directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";
/// Environment variable that names the config file explicitly.
pub const CONFIG_PATH_ENV: &str = "RDB_ARCHIVER_CONFIG";
/// Overrides `logging.level`.
pub const LOG_LEVEL_ENV: &str = "RDB_ARCHIVER_LOG_LEVEL";
/// Overrides `retention.last_count`.
pub const RETENTION_LAST_ENV: &str = "RDB_ARCHIVER_RETENTION_LAST";

/// Complete configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
    pub reload: ReloadConfig,
}

/// Where snapshots are produced and how the watcher observes them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    pub primary: String,
    pub auxiliary: Vec<String>,
    pub watch: WatchConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/data"),
            primary: "dump.rdb".to_string(),
            auxiliary: vec!["nodes.conf".to_string()],
            watch: WatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    Poll,
    Notify,
    Auto,
}

impl std::fmt::Display for WatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WatchMode::Poll => "poll",
            WatchMode::Notify => "notify",
            WatchMode::Auto => "auto",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub mode: WatchMode,
    #[serde(deserialize_with = "duration::deserialize")]
    pub poll_interval: Duration,
    #[serde(deserialize_with = "duration::deserialize")]
    pub debounce_window: Duration,
    /// Zero disables the size-stability check.
    #[serde(deserialize_with = "duration::deserialize")]
    pub stability_window: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_interval: Duration::from_secs(5),
            debounce_window: Duration::from_millis(500),
            stability_window: Duration::ZERO,
        }
    }
}

/// Archive tree layout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub root: PathBuf,
    pub latest_subdir: String,
    pub instance: InstanceConfig,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/dest"),
            latest_subdir: "last".to_string(),
            instance: InstanceConfig::default(),
        }
    }
}

/// Per-instance subdirectory: an environment override, else a fallback.
///
/// A fallback of `auto` resolves to the host name; an empty fallback means no
/// instance subdirectory at all.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub override_env: String,
    pub fallback: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            override_env: "HOSTNAME_OVERRIDE".to_string(),
            fallback: "auto".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Capacity of the latest collection.
    pub last_count: usize,
    pub rules: Vec<RetentionRule>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            last_count: 5,
            rules: Vec::new(),
        }
    }
}

/// One named tier; an empty `cron` makes it a plain capacity tier.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RetentionRule {
    pub name: String,
    #[serde(default)]
    pub cron: String,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Optional directory for per-launch log files.
    pub dir: Option<PathBuf>,
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            dir: None,
            max_files: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMethod {
    /// Poll the config file for changes, in addition to SIGHUP.
    Watch,
    /// Reload on SIGHUP only.
    Signal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub enabled: bool,
    pub method: ReloadMethod,
    #[serde(deserialize_with = "duration::deserialize")]
    pub check_interval: Duration,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            method: ReloadMethod::Watch,
            check_interval: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = &self.source;
        if source.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("source.path must not be empty"));
        }
        check_plain_name("source.primary", &source.primary)?;
        for aux in &source.auxiliary {
            check_plain_name("source.auxiliary", aux)?;
            if aux == &source.primary {
                return Err(ConfigError::invalid(format!(
                    "auxiliary file {aux} duplicates the primary file"
                )));
            }
        }
        if source.watch.poll_interval.is_zero() {
            return Err(ConfigError::invalid("source.watch.poll_interval must be positive"));
        }

        let destination = &self.destination;
        if destination.root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("destination.root must not be empty"));
        }
        check_plain_name("destination.latest_subdir", &destination.latest_subdir)?;

        let mut seen = Vec::with_capacity(self.retention.rules.len());
        for rule in &self.retention.rules {
            check_plain_name("retention.rules[].name", &rule.name)?;
            if rule.name == destination.latest_subdir {
                return Err(ConfigError::invalid(format!(
                    "retention rule {} collides with destination.latest_subdir",
                    rule.name
                )));
            }
            if seen.contains(&rule.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "retention rule {} is defined twice",
                    rule.name
                )));
            }
            seen.push(rule.name.as_str());
            if !rule.cron.trim().is_empty() {
                Schedule::parse(&rule.cron).map_err(|source| ConfigError::Schedule {
                    rule: rule.name.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

fn check_plain_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(format!("{field} must not be empty")));
    }
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(ConfigError::invalid(format!(
            "{field} must be a plain name, got {value}"
        )));
    }
    if value.starts_with(crate::fsops::STAGING_PREFIX) {
        return Err(ConfigError::invalid(format!(
            "{field} must not start with {}",
            crate::fsops::STAGING_PREFIX
        )));
    }
    Ok(())
}
