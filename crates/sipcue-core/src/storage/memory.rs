//! In-memory store for tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{
    clear_session_fields, counts_from_value, counts_to_value,
    json_store::DEFAULT_MAX_EVENT_RECORDS, StateStore, TimerRecord, EVENT_COUNTS_KEY,
};
use crate::error::StoreError;
use crate::events::EventRecord;

#[derive(Default)]
struct MemoryState {
    timers: BTreeMap<String, TimerRecord>,
    app_state: Map<String, Value>,
    events: Vec<EventRecord>,
}

/// [`StateStore`] held entirely in memory.
///
/// Writes can be switched off with [`MemoryStore::set_fail_writes`] to
/// exercise the best-effort paths of the callers.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
    timer_saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save_timers` calls so far.
    pub fn timer_saves(&self) -> usize {
        self.timer_saves.load(Ordering::SeqCst)
    }

    /// Seed a raw timer record, e.g. to simulate state left by a previous run.
    pub fn insert_timer(&self, record: TimerRecord) {
        self.lock().timers.insert(record.name.clone(), record);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn load_timers(&self) -> Result<HashMap<String, TimerRecord>, StoreError> {
        Ok(self
            .lock()
            .timers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn save_timers(&self, timers: &BTreeMap<String, TimerRecord>) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().timers = timers.clone();
        self.timer_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load_counts(&self) -> Result<HashMap<String, u32>, StoreError> {
        Ok(counts_from_value(self.lock().app_state.get(EVENT_COUNTS_KEY)))
    }

    fn save_counts(&self, counts: &HashMap<String, u32>) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock()
            .app_state
            .insert(EVENT_COUNTS_KEY.to_string(), counts_to_value(counts));
        Ok(())
    }

    fn load_app_state(&self) -> Result<Map<String, Value>, StoreError> {
        Ok(self.lock().app_state.clone())
    }

    fn merge_app_state(&self, fields: Map<String, Value>) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.lock();
        for (key, value) in fields {
            state.app_state.insert(key, value);
        }
        Ok(())
    }

    fn append_event(&self, record: &EventRecord) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.lock();
        state.events.push(record.clone());
        if state.events.len() > DEFAULT_MAX_EVENT_RECORDS {
            let excess = state.events.len() - DEFAULT_MAX_EVENT_RECORDS;
            state.events.drain(..excess);
        }
        Ok(())
    }

    fn recent_events(&self, since: DateTime<Utc>) -> Result<Vec<EventRecord>, StoreError> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect())
    }

    fn prune_events(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        self.check_writable()?;
        let mut state = self.lock();
        let before = state.events.len();
        state.events.retain(|e| e.timestamp >= older_than);
        Ok(before - state.events.len())
    }

    fn reset_session_data(&self, preserve_lifetime_stats: bool) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.lock();
        state.timers.clear();
        state.events.clear();
        clear_session_fields(&mut state.app_state, preserve_lifetime_stats);
        Ok(())
    }
}
