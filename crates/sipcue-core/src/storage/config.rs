//! TOML-based application configuration.
//!
//! Stores tuning for:
//! - The scheduler loop (tick, global gap, callback timeout, flush cadence)
//! - Each standard reminder (base/limit intervals, decay step, jitter)
//! - The hydration window used to derive the urgency level
//! - Event log retention
//!
//! Configuration is stored at `<data dir>/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::data_dir;
use crate::error::ConfigError;

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_min_gap_minutes")]
    pub min_gap_minutes: u32,
    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Fixed seed for jitter; random when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_seed: Option<u64>,
}

/// Drink reminder: interval follows the dehydration level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrinkReminderConfig {
    #[serde(default = "default_drink_base")]
    pub base: u32,
    #[serde(default = "default_drink_limit")]
    pub limit: u32,
    #[serde(default = "default_drink_jitter")]
    pub jitter: u32,
}

/// Reminders whose interval shrinks with every ignored firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoredReminderConfig {
    #[serde(default = "default_ignored_base")]
    pub base: u32,
    #[serde(default = "default_ignored_limit")]
    pub limit: u32,
    #[serde(default = "default_ignored_step")]
    pub step: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecalibrateReminderConfig {
    #[serde(default = "default_recalibrate_days")]
    pub days: u32,
}

/// Hydration window and targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HydrationConfig {
    pub daily_goal_ml: u32,
    pub start_hour: u32,
    pub end_hour: u32,
    pub reasonable_ml_per_hour: u32,
}

/// Event log retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Records kept on disk and in memory.
    pub max_records: usize,
    /// In-memory working set window.
    pub window_hours: i64,
    /// Disk records older than this are pruned at startup.
    pub log_retention_days: i64,
}

/// Application configuration.
///
/// Serialized to/from TOML at `<data dir>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub drink_reminder: DrinkReminderConfig,
    #[serde(default)]
    pub bad_orientation: IgnoredReminderConfig,
    #[serde(default)]
    pub empty_reminder: IgnoredReminderConfig,
    #[serde(default)]
    pub recalibrate_reminder: RecalibrateReminderConfig,
    #[serde(default)]
    pub hydration: HydrationConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

// Default functions
fn default_tick_secs() -> u64 {
    60
}
fn default_min_gap_minutes() -> u32 {
    1
}
fn default_callback_timeout_secs() -> u64 {
    30
}
fn default_flush_interval_secs() -> u64 {
    600
}
fn default_stop_timeout_secs() -> u64 {
    2
}
fn default_drink_base() -> u32 {
    45
}
fn default_drink_limit() -> u32 {
    10
}
fn default_drink_jitter() -> u32 {
    5
}
fn default_ignored_base() -> u32 {
    10
}
fn default_ignored_limit() -> u32 {
    2
}
fn default_ignored_step() -> u32 {
    2
}
fn default_recalibrate_days() -> u32 {
    2
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            min_gap_minutes: default_min_gap_minutes(),
            callback_timeout_secs: default_callback_timeout_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
            jitter_seed: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for DrinkReminderConfig {
    fn default() -> Self {
        Self {
            base: default_drink_base(),
            limit: default_drink_limit(),
            jitter: default_drink_jitter(),
        }
    }
}

impl Default for IgnoredReminderConfig {
    fn default() -> Self {
        Self {
            base: default_ignored_base(),
            limit: default_ignored_limit(),
            step: default_ignored_step(),
        }
    }
}

impl Default for RecalibrateReminderConfig {
    fn default() -> Self {
        Self {
            days: default_recalibrate_days(),
        }
    }
}

impl Default for HydrationConfig {
    fn default() -> Self {
        Self {
            daily_goal_ml: 2000,
            start_hour: 7,
            end_hour: 22,
            reasonable_ml_per_hour: 130,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_records: 1000,
            window_hours: 24,
            log_retention_days: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            drink_reminder: DrinkReminderConfig::default(),
            bad_orientation: IgnoredReminderConfig::default(),
            empty_reminder: IgnoredReminderConfig::default(),
            recalibrate_reminder: RecalibrateReminderConfig::default(),
            hydration: HydrationConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().map_or(true, |p| p.is_empty()) {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<f64>() {
                            serde_json::Number::from_f64(n)
                                .map(serde_json::Value::Number)
                                .ok_or_else(|| invalid(format!("cannot parse '{value}' as number")))?
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default config path inside the data directory.
    pub fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("config.toml"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk or return (and write) the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from an explicit path, writing the default if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
        }
    }

    /// Persist to the default path.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |message: String| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message,
        };
        let content = toml::to_string_pretty(self).map_err(|e| save_failed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| save_failed(e.to_string()))
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dotted key without saving.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is unknown or the value does not fit the field.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };
        let mut json = serde_json::to_value(&*self).map_err(|e| invalid(e.to_string()))?;
        Self::set_json_value_by_path(&mut json, key, value)?;
        *self = serde_json::from_value(json).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            log::warn!("using default configuration: {}", e);
            Self::default()
        })
    }
}
