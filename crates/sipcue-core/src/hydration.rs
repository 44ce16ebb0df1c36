//! Daily hydration tracking and the dehydration level that drives the drink
//! reminder interval.
//!
//! All time-of-day arithmetic is done on local wall-clock time, passed in by
//! the caller so the calculations stay deterministic.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::storage::{HydrationConfig, StateStore, LIFETIME_STATS_KEY};

/// Upper bound of the dehydration level.
pub const MAX_DEHYDRATION_LEVEL: f64 = 3.0;

/// Urgency reported after the window closes while still short of the goal.
const AFTER_WINDOW_URGENCY: f64 = 5.0;
const MAX_IN_WINDOW_URGENCY: f64 = 3.0;

const DAILY_CONSUMED_KEY: &str = "daily_consumed_ml";
const LAST_DAILY_RESET_KEY: &str = "last_daily_reset";

/// Position of the current time relative to the hydration window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowStatus {
    BeforeWindow,
    InWindow,
    AfterWindow,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowInfo {
    pub status: WindowStatus,
    pub hours_remaining: f64,
    pub hours_in_window: f64,
    pub remaining_ml_needed: f64,
    pub required_ml_per_hour: f64,
    pub urgency_factor: f64,
    pub progress_percent: f64,
}

/// Totals carried across sessions and session resets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifetimeStats {
    pub total_ml_consumed: f64,
    pub total_days: u32,
    pub total_sessions: u32,
    pub total_drink_events: u32,
}

pub struct HydrationTracker {
    config: HydrationConfig,
    store: Arc<dyn StateStore>,
    daily_consumed_ml: f64,
    last_daily_reset: NaiveDate,
    lifetime: LifetimeStats,
}

impl HydrationTracker {
    /// Restore today's consumption from the app-state blob.
    ///
    /// A missing or unparsable reset date is treated as `today`.
    pub fn load(mut config: HydrationConfig, store: Arc<dyn StateStore>, today: NaiveDate) -> Self {
        config.start_hour = config.start_hour.min(23);
        config.end_hour = config.end_hour.min(24);

        let state = store.load_app_state().unwrap_or_else(|e| {
            log::warn!("could not load hydration state: {}", e);
            Map::new()
        });

        let daily_consumed_ml = state
            .get(DAILY_CONSUMED_KEY)
            .and_then(Value::as_f64)
            .filter(|ml| ml.is_finite() && *ml >= 0.0)
            .unwrap_or(0.0);
        let last_daily_reset = state
            .get(LAST_DAILY_RESET_KEY)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<NaiveDate>().ok())
            .unwrap_or(today);
        let lifetime = state
            .get(LIFETIME_STATS_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        log::debug!(
            "hydration state loaded: {:.0}ml consumed, last reset {}",
            daily_consumed_ml,
            last_daily_reset
        );

        Self {
            config,
            store,
            daily_consumed_ml,
            last_daily_reset,
            lifetime,
        }
    }

    pub fn daily_consumed_ml(&self) -> f64 {
        self.daily_consumed_ml
    }

    pub fn last_daily_reset(&self) -> NaiveDate {
        self.last_daily_reset
    }

    pub fn lifetime(&self) -> &LifetimeStats {
        &self.lifetime
    }

    pub fn config(&self) -> &HydrationConfig {
        &self.config
    }

    fn hours_in_window(&self) -> f64 {
        let (start, end) = (self.config.start_hour, self.config.end_hour);
        if start <= end {
            f64::from(end - start)
        } else {
            f64::from(24 - start + end)
        }
    }

    fn status_at(&self, hour: u32) -> WindowStatus {
        let (start, end) = (self.config.start_hour, self.config.end_hour);
        if start <= end {
            if hour < start {
                WindowStatus::BeforeWindow
            } else if hour >= end {
                WindowStatus::AfterWindow
            } else {
                WindowStatus::InWindow
            }
        } else if hour >= start || hour < end {
            WindowStatus::InWindow
        } else {
            WindowStatus::AfterWindow
        }
    }

    /// Where `local_now` falls in the hydration window and how hard the user
    /// has to catch up.
    pub fn window_info(&self, local_now: NaiveDateTime) -> WindowInfo {
        let hour = local_now.hour();
        let fraction = f64::from(local_now.minute()) / 60.0;
        let end = self.config.end_hour;
        let hours_in_window = self.hours_in_window();
        let status = self.status_at(hour);

        let hours_remaining = match status {
            WindowStatus::BeforeWindow => hours_in_window,
            WindowStatus::AfterWindow => 0.0,
            WindowStatus::InWindow if hour >= end => f64::from(24 - hour + end) - fraction,
            WindowStatus::InWindow => f64::from(end - hour) - fraction,
        };

        let goal = f64::from(self.config.daily_goal_ml);
        let remaining_ml_needed = (goal - self.daily_consumed_ml).max(0.0);
        let reasonable = f64::from(self.config.reasonable_ml_per_hour.max(1));

        let (urgency_factor, required_ml_per_hour) =
            if hours_remaining <= 0.0 || status == WindowStatus::AfterWindow {
                let urgency = if remaining_ml_needed == 0.0 {
                    0.0
                } else {
                    AFTER_WINDOW_URGENCY
                };
                (urgency, 0.0)
            } else if status == WindowStatus::BeforeWindow {
                (0.0, remaining_ml_needed / hours_in_window)
            } else {
                let required = remaining_ml_needed / hours_remaining;
                ((required / reasonable).min(MAX_IN_WINDOW_URGENCY), required)
            };

        let progress_percent = if goal > 0.0 {
            self.daily_consumed_ml / goal * 100.0
        } else {
            0.0
        };

        WindowInfo {
            status,
            hours_remaining: hours_remaining.max(0.0),
            hours_in_window,
            remaining_ml_needed,
            required_ml_per_hour,
            urgency_factor,
            progress_percent,
        }
    }

    /// Hours of the window that have already elapsed at `local_now`.
    fn hours_since_start(&self, local_now: NaiveDateTime) -> f64 {
        let hour = local_now.hour();
        let fraction = f64::from(local_now.minute()) / 60.0;
        let start = self.config.start_hour;
        match self.status_at(hour) {
            WindowStatus::BeforeWindow => 0.0,
            WindowStatus::AfterWindow => self.hours_in_window(),
            WindowStatus::InWindow if hour >= start => f64::from(hour - start) + fraction,
            WindowStatus::InWindow => f64::from(24 - start + hour) + fraction,
        }
    }

    /// Dehydration level in `[0.0, 3.0]`.
    ///
    /// Compares what should have been drunk by now at the reasonable hourly
    /// rate against what was actually drunk. The deficit, as a share of the
    /// daily goal, maps to 0..1 up to 10%, 1..2 up to 25%, and 2..3 beyond.
    pub fn dehydration_level(&self, local_now: NaiveDateTime) -> f64 {
        let expected_ml =
            self.hours_since_start(local_now) * f64::from(self.config.reasonable_ml_per_hour);
        let deficit_ml = (expected_ml - self.daily_consumed_ml).max(0.0);
        let deficit = if self.config.daily_goal_ml > 0 {
            deficit_ml / f64::from(self.config.daily_goal_ml)
        } else {
            0.0
        };

        if deficit <= 0.1 {
            deficit * 10.0
        } else if deficit <= 0.25 {
            1.0 + (deficit - 0.1) / 0.15
        } else {
            (2.0 + (deficit - 0.25) / 0.25).min(MAX_DEHYDRATION_LEVEL)
        }
    }

    /// Add a drink to today's total.
    pub fn record_drink(&mut self, ml: f64) {
        if !ml.is_finite() || ml <= 0.0 {
            log::warn!("ignoring drink of {} ml", ml);
            return;
        }
        self.daily_consumed_ml += ml;
        self.lifetime.total_drink_events = self.lifetime.total_drink_events.saturating_add(1);
        log::info!(
            "recorded drink of {:.0}ml, {:.0}/{}ml today",
            ml,
            self.daily_consumed_ml,
            self.config.daily_goal_ml
        );
        self.persist();
    }

    pub fn record_session(&mut self) {
        self.lifetime.total_sessions = self.lifetime.total_sessions.saturating_add(1);
        self.persist();
    }

    /// Start a new day if the local date moved on.
    ///
    /// Yesterday's consumption is folded into the lifetime totals before the
    /// daily counter is zeroed. Returns whether a rollover happened.
    pub fn check_daily_rollover(&mut self, today: NaiveDate) -> bool {
        if today == self.last_daily_reset {
            return false;
        }
        log::info!(
            "daily rollover {} -> {}, closing day at {:.0}ml",
            self.last_daily_reset,
            today,
            self.daily_consumed_ml
        );
        self.lifetime.total_ml_consumed += self.daily_consumed_ml;
        self.lifetime.total_days = self.lifetime.total_days.saturating_add(1);
        self.daily_consumed_ml = 0.0;
        self.last_daily_reset = today;
        self.persist();
        true
    }

    fn persist(&self) {
        let mut fields = Map::new();
        fields.insert(DAILY_CONSUMED_KEY.into(), json!(self.daily_consumed_ml));
        fields.insert(
            LAST_DAILY_RESET_KEY.into(),
            json!(self.last_daily_reset.to_string()),
        );
        match serde_json::to_value(&self.lifetime) {
            Ok(stats) => {
                fields.insert(LIFETIME_STATS_KEY.into(), stats);
            }
            Err(e) => log::error!("failed to encode lifetime stats: {}", e),
        }
        if let Err(e) = self.store.merge_app_state(fields) {
            log::error!("failed to persist hydration state: {}", e);
        }
    }
}
