//! JSON file store.
//!
//! Three files live in the data directory:
//!
//! - `timer_states.json`: `{ name: TimerRecord }`
//! - `event_log.json`: `{ "events": [EventRecord] }`
//! - `app_state.json`: shared application-state blob; this crate owns only
//!   `event_counts`, `daily_consumed_ml`, `last_daily_reset`,
//!   `lifetime_stats` and the start/shutdown timestamps
//!
//! Writes go to a temporary file which is then renamed over the target, so a
//! reader never sees a half-written snapshot. All writes from this process
//! are serialized through one lock.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use super::{
    clear_session_fields, counts_from_value, counts_to_value, data_dir, StateStore, TimerRecord,
    EVENT_COUNTS_KEY,
};
use crate::error::StoreError;
use crate::events::EventRecord;

const TIMER_STATES_FILE: &str = "timer_states.json";
const EVENT_LOG_FILE: &str = "event_log.json";
const APP_STATE_FILE: &str = "app_state.json";

/// Default cap on the number of records kept in the event log.
pub const DEFAULT_MAX_EVENT_RECORDS: usize = 1000;

/// Directory-of-JSON-files implementation of [`StateStore`].
pub struct JsonFileStore {
    dir: PathBuf,
    max_records: usize,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the store in the default data directory.
    pub fn open() -> Result<Self, StoreError> {
        Self::new(data_dir()?)
    }

    /// Open the store in `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::WriteFailed {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            max_records: DEFAULT_MAX_EVENT_RECORDS,
            write_lock: Mutex::new(()),
        })
    }

    /// Override the event log cap.
    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read a JSON file. Missing and corrupt files read as `None`.
    fn read_json(&self, file: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path(file);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::ReadFailed { path, source }),
        };
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("ignoring corrupt state file {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn write_json(&self, file: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path(file);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(value)?;

        let write = || -> std::io::Result<()> {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(&content)?;
            f.sync_all()?;
            std::fs::rename(&tmp, &path)
        };
        write().map_err(|source| StoreError::WriteFailed { path, source })
    }

    fn read_object(&self, file: &str) -> Result<Map<String, Value>, StoreError> {
        match self.read_json(file)? {
            Some(Value::Object(map)) => Ok(map),
            Some(other) => {
                log::warn!("state file {} is not an object (found {}), starting fresh", file, kind(&other));
                Ok(Map::new())
            }
            None => Ok(Map::new()),
        }
    }

    fn read_event_values(&self) -> Result<Vec<Value>, StoreError> {
        let mut log = self.read_object(EVENT_LOG_FILE)?;
        match log.remove("events") {
            Some(Value::Array(events)) => Ok(events),
            _ => Ok(Vec::new()),
        }
    }

    fn write_event_values(&self, events: Vec<Value>) -> Result<(), StoreError> {
        self.write_json(EVENT_LOG_FILE, &json!({ "events": events }))
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn event_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.get("timestamp")?.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl StateStore for JsonFileStore {
    fn load_timers(&self) -> Result<HashMap<String, TimerRecord>, StoreError> {
        let raw = self.read_object(TIMER_STATES_FILE)?;
        let mut timers = HashMap::with_capacity(raw.len());
        for (name, value) in raw {
            match serde_json::from_value::<TimerRecord>(value) {
                Ok(record) => {
                    timers.insert(name, record);
                }
                Err(e) => log::warn!("discarding invalid timer state '{}': {}", name, e),
            }
        }
        Ok(timers)
    }

    fn save_timers(&self, timers: &BTreeMap<String, TimerRecord>) -> Result<(), StoreError> {
        let value = serde_json::to_value(timers)?;
        let _guard = self.lock();
        self.write_json(TIMER_STATES_FILE, &value)
    }

    fn load_counts(&self) -> Result<HashMap<String, u32>, StoreError> {
        let state = self.read_object(APP_STATE_FILE)?;
        Ok(counts_from_value(state.get(EVENT_COUNTS_KEY)))
    }

    fn save_counts(&self, counts: &HashMap<String, u32>) -> Result<(), StoreError> {
        let mut fields = Map::new();
        fields.insert(EVENT_COUNTS_KEY.to_string(), counts_to_value(counts));
        self.merge_app_state(fields)
    }

    fn load_app_state(&self) -> Result<Map<String, Value>, StoreError> {
        self.read_object(APP_STATE_FILE)
    }

    fn merge_app_state(&self, fields: Map<String, Value>) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut state = self.read_object(APP_STATE_FILE)?;
        for (key, value) in fields {
            state.insert(key, value);
        }
        self.write_json(APP_STATE_FILE, &Value::Object(state))
    }

    fn append_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        let value = serde_json::to_value(record)?;
        let _guard = self.lock();
        let mut events = self.read_event_values()?;
        events.push(value);
        if events.len() > self.max_records {
            let excess = events.len() - self.max_records;
            events.drain(..excess);
        }
        self.write_event_values(events)
    }

    fn recent_events(&self, since: DateTime<Utc>) -> Result<Vec<EventRecord>, StoreError> {
        let events = self.read_event_values()?;
        Ok(events
            .into_iter()
            .filter_map(|value| serde_json::from_value::<EventRecord>(value).ok())
            .filter(|record| record.timestamp >= since)
            .collect())
    }

    fn prune_events(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let _guard = self.lock();
        let events = self.read_event_values()?;
        let before = events.len();
        let kept: Vec<Value> = events
            .into_iter()
            .filter(|value| matches!(event_timestamp(value), Some(ts) if ts >= older_than))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.write_event_values(kept)?;
        }
        Ok(removed)
    }

    fn reset_session_data(&self, preserve_lifetime_stats: bool) -> Result<(), StoreError> {
        let _guard = self.lock();
        let mut state = self.read_object(APP_STATE_FILE)?;
        clear_session_fields(&mut state, preserve_lifetime_stats);

        self.write_json(TIMER_STATES_FILE, &json!({}))?;
        self.write_event_values(Vec::new())?;
        self.write_json(APP_STATE_FILE, &Value::Object(state))
    }
}
