//! Escalating severity counter.
//!
//! Every occurrence of a condition bumps a count keyed by `(scope, condition)`
//! and the severity reported for the occurrence is the new count: the Nth
//! reminder since the condition was last resolved has severity N. Counts only
//! go down through an explicit [`SeverityCounter::reset`] or
//! [`SeverityCounter::clear`].
//!
//! The counter also keeps a bounded, time-ordered working set of recent
//! [`EventRecord`]s so callers can ask "did X happen recently".
//!
//! Each increment is written to the store before it returns. Store failures
//! are logged and the in-memory count stays authoritative.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::events::{EventRecord, Payload};
use crate::storage::{EventsConfig, StateStore};

/// Persisted key for a `(scope, condition)` pair.
///
/// Timer-scoped conditions use `scope:condition`; global ones use the bare
/// condition name.
pub fn count_key(condition: &str, scope: Option<&str>) -> String {
    match scope {
        Some(scope) => format!("{scope}:{condition}"),
        None => condition.to_string(),
    }
}

/// Bounds on the in-memory working set.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub max_records: usize,
    pub window: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_records: 1000,
            window: Duration::hours(24),
        }
    }
}

impl From<&EventsConfig> for Retention {
    fn from(config: &EventsConfig) -> Self {
        Self {
            max_records: config.max_records.max(1),
            window: Duration::hours(config.window_hours.max(1)),
        }
    }
}

#[derive(Default)]
struct CounterState {
    counts: HashMap<String, u32>,
    /// Oldest first.
    events: VecDeque<EventRecord>,
}

pub struct SeverityCounter {
    state: Mutex<CounterState>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    retention: Retention,
}

impl SeverityCounter {
    /// Build a counter from whatever the store holds.
    ///
    /// Unreadable counts or events start empty.
    pub fn load(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, retention: Retention) -> Self {
        let counts = store.load_counts().unwrap_or_else(|e| {
            log::warn!("could not load event counts, starting fresh: {}", e);
            HashMap::new()
        });

        let since = clock.now() - retention.window;
        let mut recent = store.recent_events(since).unwrap_or_else(|e| {
            log::warn!("could not load recent events: {}", e);
            Vec::new()
        });
        recent.sort_by_key(|e| e.timestamp);
        if recent.len() > retention.max_records {
            let excess = recent.len() - retention.max_records;
            recent.drain(..excess);
        }

        log::debug!(
            "severity counter loaded {} counts and {} recent events",
            counts.len(),
            recent.len()
        );

        Self {
            state: Mutex::new(CounterState {
                counts,
                events: recent.into(),
            }),
            store,
            clock,
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one occurrence and return its severity.
    pub fn increment(&self, condition: &str, scope: Option<&str>, payload: Payload) -> u32 {
        let now = self.clock.now();
        let key = count_key(condition, scope);

        let mut state = self.lock();
        let count = state.counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        let severity = *count;

        let record = EventRecord::new(now, condition, severity, scope.map(str::to_string), payload);
        state.events.push_back(record.clone());
        while state.events.len() > self.retention.max_records {
            state.events.pop_front();
        }

        // Persist under the lock so saved counts never go backwards.
        if let Err(e) = self.store.save_counts(&state.counts) {
            log::error!("failed to persist event counts: {}", e);
        }
        if let Err(e) = self.store.append_event(&record) {
            log::error!("failed to append event '{}': {}", condition, e);
        }

        severity
    }

    /// Zero the count for a key, e.g. when the condition is resolved.
    ///
    /// Returns the count before the reset.
    pub fn reset(&self, condition: &str, scope: Option<&str>) -> u32 {
        let key = count_key(condition, scope);
        let mut state = self.lock();
        let previous = state.counts.insert(key.clone(), 0).unwrap_or(0);
        if previous > 0 {
            log::info!("severity for '{}' reset (was {})", key, previous);
        }
        if let Err(e) = self.store.save_counts(&state.counts) {
            log::error!("failed to persist event counts: {}", e);
        }
        previous
    }

    /// Zero every count and drop the working set.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.counts.clear();
        state.events.clear();
        if let Err(e) = self.store.save_counts(&state.counts) {
            log::error!("failed to persist event counts: {}", e);
        }
    }

    pub fn count(&self, condition: &str, scope: Option<&str>) -> u32 {
        self.lock()
            .counts
            .get(&count_key(condition, scope))
            .copied()
            .unwrap_or(0)
    }

    /// Snapshot of every count.
    pub fn counts(&self) -> HashMap<String, u32> {
        self.lock().counts.clone()
    }

    /// Records of `condition` at or after `since`, most recent first.
    ///
    /// The scan walks backwards and stops at the first record older than
    /// `since`.
    pub fn count_in_window(&self, condition: &str, since: DateTime<Utc>) -> Vec<EventRecord> {
        let state = self.lock();
        let mut matches = Vec::new();
        for record in state.events.iter().rev() {
            if record.timestamp < since {
                break;
            }
            if record.condition == condition {
                matches.push(record.clone());
            }
        }
        matches
    }

    /// Most recent record of `condition` in the working set.
    pub fn latest(&self, condition: &str) -> Option<EventRecord> {
        self.lock()
            .events
            .iter()
            .rev()
            .find(|e| e.condition == condition)
            .cloned()
    }

    pub fn events_by_condition(&self, condition: &str) -> Vec<EventRecord> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.condition == condition)
            .cloned()
            .collect()
    }

    /// Whether `condition` was recorded at or after `since`.
    ///
    /// Looks further back than the working set by asking the store when
    /// `since` is older than the rolling window.
    pub fn occurred_since(&self, condition: &str, since: DateTime<Utc>) -> bool {
        if self.latest(condition).is_some_and(|e| e.timestamp >= since) {
            return true;
        }
        if since >= self.clock.now() - self.retention.window {
            return false;
        }
        match self.store.recent_events(since) {
            Ok(events) => events.iter().any(|e| e.condition == condition),
            Err(e) => {
                log::warn!("could not read event log: {}", e);
                false
            }
        }
    }

    /// Every record at or after `since`, oldest first.
    pub fn recent(&self, since: DateTime<Utc>) -> Vec<EventRecord> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect()
    }

    /// Drop working-set records that fell out of the rolling window.
    pub fn prune(&self) -> usize {
        let cutoff = self.clock.now() - self.retention.window;
        let mut state = self.lock();
        let before = state.events.len();
        while state.events.front().is_some_and(|e| e.timestamp < cutoff) {
            state.events.pop_front();
        }
        before - state.events.len()
    }
}
