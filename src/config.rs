use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::store::EvictionBoundary;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub store: StoreConfig,
    pub request: RequestConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// How far back the buffer reaches from the newest sample.
    #[serde(deserialize_with = "duration")]
    pub retention: Duration,
    /// Expected provider cadence. Consumers use it for chart granularity; the
    /// store never enforces it.
    #[serde(deserialize_with = "duration")]
    pub interval: Duration,
    pub eviction: EvictionBoundary,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(5 * 60),
            interval: Duration::from_secs(5),
            eviction: EvictionBoundary::default(),
        }
    }
}

impl StoreConfig {
    pub fn retention_chrono(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::from_std(self.retention)
            .map_err(|e| ConfigError::Invalid(format!("retention: {}", e)))
    }

    /// Samples expected in a full window at the configured cadence.
    pub fn capacity_hint(&self) -> usize {
        if self.interval.is_zero() {
            return 0;
        }
        (self.retention.as_nanos() / self.interval.as_nanos()).min(4096) as usize + 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    HighAccuracy,
    BalancedPowerAccuracy,
    LowPower,
    Passive,
}

/// Parameters handed to the location provider when updates are requested.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestConfig {
    /// Falls back to `StoreConfig::interval` when unset.
    #[serde(deserialize_with = "optional_duration")]
    pub fastest_interval: Option<Duration>,
    #[serde(deserialize_with = "duration")]
    pub max_wait: Duration,
    pub priority: Priority,
    pub wait_for_accurate: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            fastest_interval: None,
            max_wait: Duration::from_secs(1),
            priority: Priority::default(),
            wait_for_accurate: false,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document is all defaults.
        let config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str::<Option<Config>>(yaml)?.unwrap_or_default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.retention.is_zero() {
            return Err(ConfigError::Invalid("retention must be positive".into()));
        }
        if self.store.interval.is_zero() {
            return Err(ConfigError::Invalid("interval must be positive".into()));
        }
        self.store.retention_chrono()?;
        if self.fastest_interval() > self.store.interval {
            return Err(ConfigError::Invalid(format!(
                "fastest_interval ({}) exceeds interval ({})",
                humantime::format_duration(self.fastest_interval()),
                humantime::format_duration(self.store.interval)
            )));
        }
        Ok(())
    }

    pub fn fastest_interval(&self) -> Duration {
        self.request.fastest_interval.unwrap_or(self.store.interval)
    }
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
}

fn optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom))
        .transpose()
}
