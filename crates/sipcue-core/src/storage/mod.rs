//! Persistence contract for timers, severity counts and the event log.
//!
//! The scheduler and the severity counter only talk to a [`StateStore`].
//! Every operation may fail; callers log the error and keep going with their
//! in-memory state. Reads are best-effort: missing or corrupt data loads as
//! empty rather than failing.

mod config;
mod json_store;
mod memory;

pub use config::{
    Config, DrinkReminderConfig, EventsConfig, HydrationConfig, IgnoredReminderConfig,
    RecalibrateReminderConfig, SchedulerConfig,
};
pub use json_store::JsonFileStore;
pub use memory::MemoryStore;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::events::EventRecord;

/// App-state sub-key owned by the severity counter.
pub const EVENT_COUNTS_KEY: &str = "event_counts";
/// App-state sub-key holding lifetime statistics.
pub const LIFETIME_STATS_KEY: &str = "lifetime_stats";

/// Persisted snapshot of one timer.
///
/// Timestamps are kept as text so that a single unparsable field can be
/// discarded on restore without losing the rest of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub name: String,
    #[serde(default)]
    pub last_triggered: Option<String>,
    pub interval_minutes: u32,
    #[serde(default, alias = "random_variance_minutes")]
    pub jitter_minutes: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub next_trigger_time: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Durable key-value persistence consumed by the scheduler and the counter.
pub trait StateStore: Send + Sync {
    /// Load all persisted timers keyed by name. Invalid entries are skipped.
    fn load_timers(&self) -> Result<HashMap<String, TimerRecord>, StoreError>;

    /// Replace the persisted timer set.
    fn save_timers(&self, timers: &BTreeMap<String, TimerRecord>) -> Result<(), StoreError>;

    /// Load severity counts keyed by `scope:condition` (or `condition`).
    fn load_counts(&self) -> Result<HashMap<String, u32>, StoreError>;

    /// Persist severity counts without touching sibling app-state fields.
    fn save_counts(&self, counts: &HashMap<String, u32>) -> Result<(), StoreError>;

    /// Whole application-state blob.
    fn load_app_state(&self) -> Result<Map<String, Value>, StoreError>;

    /// Read-merge-write: overwrite only the given top-level fields.
    fn merge_app_state(&self, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Append one record to the event log, keeping the most recent records only.
    fn append_event(&self, record: &EventRecord) -> Result<(), StoreError>;

    /// Records at or after `since`, oldest first.
    fn recent_events(&self, since: DateTime<Utc>) -> Result<Vec<EventRecord>, StoreError>;

    /// Drop records older than `older_than`. Returns how many were removed.
    fn prune_events(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Clear timers, the event log, counts and daily consumption.
    ///
    /// Lifetime statistics survive unless `preserve_lifetime_stats` is false.
    /// App-state fields owned by others are left alone.
    fn reset_session_data(&self, preserve_lifetime_stats: bool) -> Result<(), StoreError>;
}

/// Shared helper: counts map -> JSON object.
pub(crate) fn counts_to_value(counts: &HashMap<String, u32>) -> Value {
    let ordered: BTreeMap<&String, &u32> = counts.iter().collect();
    serde_json::to_value(ordered).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// Shared helper: zero the session fields of an app-state blob in place.
pub(crate) fn clear_session_fields(state: &mut Map<String, Value>, preserve_lifetime_stats: bool) {
    state.insert(EVENT_COUNTS_KEY.to_string(), Value::Object(Map::new()));
    state.insert("daily_consumed_ml".to_string(), Value::from(0.0));
    if !preserve_lifetime_stats {
        state.remove(LIFETIME_STATS_KEY);
    }
}

/// Shared helper: JSON object -> counts map, skipping non-numeric entries.
pub(crate) fn counts_from_value(value: Option<&Value>) -> HashMap<String, u32> {
    let Some(Value::Object(map)) = value else {
        return HashMap::new();
    };
    map.iter()
        .filter_map(|(key, v)| match v.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) => Some((key.clone(), n)),
            None => {
                log::warn!("discarding invalid event count for '{}': {}", key, v);
                None
            }
        })
        .collect()
}

/// Returns the data directory.
///
/// `SIPCUE_DATA_DIR` wins when set. Otherwise `~/.config/sipcue[-dev]/`,
/// where `SIPCUE_ENV=dev` selects the development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, StoreError> {
    let dir = match std::env::var_os("SIPCUE_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");

            let env = std::env::var("SIPCUE_ENV").unwrap_or_else(|_| "production".to_string());

            if env == "dev" {
                base_dir.join("sipcue-dev")
            } else {
                base_dir.join("sipcue")
            }
        }
    };

    std::fs::create_dir_all(&dir).map_err(|e| StoreError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
