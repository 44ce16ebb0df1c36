use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use rand::Rng;
use rand_pcg::Mcg128Xsl64;
use serde::Serialize;

use super::callback::ReminderCallback;
use crate::storage::TimerRecord;

/// Registration parameters for one timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerOptions {
    pub interval_minutes: u32,
    pub jitter_minutes: u32,
    /// Activity used when no persisted state exists.
    pub initially_active: bool,
}

impl TimerOptions {
    pub fn new(interval_minutes: u32) -> Self {
        Self {
            interval_minutes,
            jitter_minutes: 0,
            initially_active: true,
        }
    }

    pub fn jitter(mut self, minutes: u32) -> Self {
        self.jitter_minutes = minutes;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.initially_active = false;
        self
    }
}

/// Read-only view of a registered timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimerStatus {
    pub name: String,
    pub active: bool,
    pub interval_minutes: u32,
    pub jitter_minutes: u32,
    pub next_trigger_time: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
}

pub(super) struct Timer {
    pub name: String,
    pub interval_minutes: u32,
    pub jitter_minutes: u32,
    pub is_active: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub next_trigger_time: DateTime<Utc>,
    pub callback: Arc<dyn ReminderCallback>,
}

impl Timer {
    pub fn fresh(
        name: String,
        options: TimerOptions,
        callback: Arc<dyn ReminderCallback>,
        now: DateTime<Utc>,
        rng: &mut Mcg128Xsl64,
    ) -> Self {
        let mut timer = Self {
            name,
            interval_minutes: options.interval_minutes,
            jitter_minutes: options.jitter_minutes,
            is_active: options.initially_active,
            last_triggered: None,
            next_trigger_time: now,
            callback,
        };
        timer.schedule_from(now, rng);
        timer
    }

    /// Rebuild from a persisted record.
    ///
    /// Interval and jitter come from `options`; activity and both timestamps
    /// come from the record when they parse.
    pub fn restore(
        name: String,
        options: TimerOptions,
        callback: Arc<dyn ReminderCallback>,
        record: &TimerRecord,
        now: DateTime<Utc>,
        rng: &mut Mcg128Xsl64,
    ) -> Self {
        let mut timer = Self::fresh(name, options, callback, now, rng);
        timer.is_active = record.is_active;
        timer.last_triggered = record.last_triggered.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                log::warn!("timer '{}': discarding unparsable last_triggered {:?}", timer.name, raw);
            }
            parsed
        });
        match record.next_trigger_time.as_deref().map(parse_timestamp) {
            Some(Some(next)) => timer.next_trigger_time = next,
            Some(None) => log::warn!(
                "timer '{}': unparsable next_trigger_time, rescheduling from now",
                timer.name
            ),
            None => {}
        }
        timer
    }

    /// `next_trigger_time = now + max(1, interval ± jitter)` minutes.
    pub fn schedule_from(&mut self, now: DateTime<Utc>, rng: &mut Mcg128Xsl64) {
        let minutes = jittered_minutes(self.interval_minutes, self.jitter_minutes, rng);
        self.next_trigger_time = now + Duration::minutes(minutes);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_trigger_time <= now
    }

    pub fn to_record(&self) -> TimerRecord {
        TimerRecord {
            name: self.name.clone(),
            last_triggered: self.last_triggered.map(|t| t.to_rfc3339()),
            interval_minutes: self.interval_minutes,
            jitter_minutes: self.jitter_minutes,
            is_active: self.is_active,
            next_trigger_time: Some(self.next_trigger_time.to_rfc3339()),
        }
    }

    pub fn status(&self) -> TimerStatus {
        TimerStatus {
            name: self.name.clone(),
            active: self.is_active,
            interval_minutes: self.interval_minutes,
            jitter_minutes: self.jitter_minutes,
            next_trigger_time: self.next_trigger_time,
            last_triggered: self.last_triggered,
        }
    }
}

/// Interval with a uniform offset in `[-jitter, +jitter]`, never below one minute.
pub(super) fn jittered_minutes(interval: u32, jitter: u32, rng: &mut Mcg128Xsl64) -> i64 {
    let offset = if jitter > 0 {
        let j = i64::from(jitter);
        rng.gen_range(-j..=j)
    } else {
        0
    };
    (i64::from(interval) + offset).max(1)
}

/// Parse a persisted timestamp.
///
/// RFC 3339 is what this crate writes; offset-less ISO timestamps from older
/// state files are read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc).trunc_subsecs(0));
    }
    raw.parse::<NaiveDateTime>()
        .ok()
        .map(|naive| naive.and_utc().trunc_subsecs(0))
}
