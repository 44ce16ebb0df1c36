//! The standard reminder set of a smart water bottle.
//!
//! Four timers share one scheduler:
//!
//! | timer                  | policy        | fires when                              |
//! |------------------------|---------------|-----------------------------------------|
//! | `drink_reminder`       | level         | always (interval follows dehydration)   |
//! | `bad_orientation`      | ignored count | bottle is not vertical                  |
//! | `empty_reminder`       | ignored count | bottle is empty                         |
//! | `recalibrate_reminder` | fixed (days)  | no `very_empty` event in the last days  |
//!
//! Sensor readings come in through [`BottleSensors`]; state changes detected
//! by the caller (a drink, the bottle being emptied or tilted) go through the
//! transition methods on [`ReminderSet`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};

use crate::clock::{Clock, SystemClock};
use crate::error::SchedulerError;
use crate::events::Payload;
use crate::hydration::{HydrationTracker, WindowInfo, MAX_DEHYDRATION_LEVEL};
use crate::policy::{Feedback, IntervalPolicy};
use crate::scheduler::{
    CallbackError, FireContext, ReminderCallback, Scheduler, TimerOptions,
};
use crate::severity::{Retention, SeverityCounter};
use crate::storage::{Config, JsonFileStore, StateStore};

pub const DRINK_REMINDER: &str = "drink_reminder";
pub const BAD_ORIENTATION: &str = "bad_orientation";
pub const EMPTY_REMINDER: &str = "empty_reminder";
pub const RECALIBRATE_REMINDER: &str = "recalibrate_reminder";

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Bottle state the reminders need at fire time.
pub trait BottleSensors: Send + Sync {
    fn is_vertical(&self) -> bool;
    fn is_empty(&self) -> bool;
}

/// Sensors driven by hand, for the CLI and tests.
#[derive(Debug)]
pub struct StaticSensors {
    vertical: AtomicBool,
    empty: AtomicBool,
}

impl Default for StaticSensors {
    fn default() -> Self {
        Self {
            vertical: AtomicBool::new(true),
            empty: AtomicBool::new(false),
        }
    }
}

impl StaticSensors {
    pub fn set_vertical(&self, vertical: bool) {
        self.vertical.store(vertical, Ordering::SeqCst);
    }

    pub fn set_empty(&self, empty: bool) {
        self.empty.store(empty, Ordering::SeqCst);
    }
}

impl BottleSensors for StaticSensors {
    fn is_vertical(&self) -> bool {
        self.vertical.load(Ordering::SeqCst)
    }

    fn is_empty(&self) -> bool {
        self.empty.load(Ordering::SeqCst)
    }
}

/// How UTC instants map to the user's wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub enum LocalTime {
    /// The system time zone.
    #[default]
    System,
    Fixed(FixedOffset),
}

impl LocalTime {
    pub fn naive(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            LocalTime::System => at.with_timezone(&Local).naive_local(),
            LocalTime::Fixed(offset) => at.with_timezone(offset).naive_local(),
        }
    }
}

/// State shared by the reminder callbacks.
///
/// Holds no scheduler handle; callbacks reach the scheduler through
/// [`FireContext`].
struct ReminderContext {
    counter: SeverityCounter,
    tracker: Mutex<HydrationTracker>,
    sensors: Arc<dyn BottleSensors>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    local_time: LocalTime,
    config: Config,
    drink_policy: IntervalPolicy,
    orientation_policy: IntervalPolicy,
    empty_policy: IntervalPolicy,
}

impl ReminderContext {
    fn tracker(&self) -> MutexGuard<'_, HydrationTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn dehydration_level(&self, at: DateTime<Utc>) -> f64 {
        self.tracker().dehydration_level(self.local_time.naive(at))
    }

    fn drink_interval(&self, level: f64) -> u32 {
        self.drink_policy.interval(Feedback::Level(level))
    }

    fn ignored_interval(&self, timer: &str) -> u32 {
        let ignored = self.counter.count(timer, Some(timer));
        self.policy_for(timer).interval(Feedback::Ignored(ignored))
    }

    fn policy_for(&self, timer: &str) -> IntervalPolicy {
        if timer == BAD_ORIENTATION {
            self.orientation_policy
        } else {
            self.empty_policy
        }
    }
}

fn to_callback_error(e: SchedulerError) -> CallbackError {
    CallbackError::Failed(e.to_string())
}

fn payload(pairs: &[(&str, Value)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

struct DrinkReminder(Arc<ReminderContext>);

#[async_trait]
impl ReminderCallback for DrinkReminder {
    async fn fire(&self, fire: FireContext) -> Result<(), CallbackError> {
        let ctx = &self.0;
        let level = ctx.dehydration_level(fire.fired_at);
        let interval = ctx.drink_interval(level);
        let severity = ctx.counter.increment(
            DRINK_REMINDER,
            Some(DRINK_REMINDER),
            payload(&[
                ("dehydration_level", json!(level)),
                ("reminder_interval_minutes", json!(interval)),
            ]),
        );
        log::info!(
            "drink reminder #{} (dehydration {:.1}, every {} min)",
            severity,
            level,
            interval
        );
        fire.scheduler
            .set_interval(&fire.timer, interval)
            .map_err(to_callback_error)?;
        Ok(())
    }
}

/// Shared by `bad_orientation` and `empty_reminder`: fire while the condition
/// holds and tighten the interval with every ignored reminder.
struct ConditionReminder {
    ctx: Arc<ReminderContext>,
    condition_holds: fn(&dyn BottleSensors) -> bool,
}

#[async_trait]
impl ReminderCallback for ConditionReminder {
    async fn fire(&self, fire: FireContext) -> Result<(), CallbackError> {
        if !(self.condition_holds)(self.ctx.sensors.as_ref()) {
            log::debug!("{}: condition cleared, nothing to remind", fire.timer);
            return Ok(());
        }
        let severity = self
            .ctx
            .counter
            .increment(&fire.timer, Some(fire.timer.as_str()), Payload::new());
        let interval = self.ctx.ignored_interval(&fire.timer);
        log::info!("{} #{} (next in {} min)", fire.timer, severity, interval);
        fire.scheduler
            .set_interval(&fire.timer, interval)
            .map_err(to_callback_error)?;
        Ok(())
    }
}

struct RecalibrateReminder(Arc<ReminderContext>);

#[async_trait]
impl ReminderCallback for RecalibrateReminder {
    async fn fire(&self, fire: FireContext) -> Result<(), CallbackError> {
        let ctx = &self.0;
        let days = i64::from(ctx.config.recalibrate_reminder.days.max(1));
        let since = fire.fired_at - Duration::days(days);
        if ctx.counter.occurred_since("very_empty", since) {
            log::debug!("bottle ran very empty within {} days, no recalibration needed", days);
            return Ok(());
        }
        let severity =
            ctx.counter
                .increment(RECALIBRATE_REMINDER, Some(RECALIBRATE_REMINDER), Payload::new());
        log::info!("recalibrate reminder #{}", severity);
        Ok(())
    }
}

/// The four standard reminders wired to one scheduler.
pub struct ReminderSet {
    scheduler: Scheduler,
    ctx: Arc<ReminderContext>,
}

impl ReminderSet {
    /// Build the set and register its timers, restoring persisted state.
    pub fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        sensors: Arc<dyn BottleSensors>,
        local_time: LocalTime,
    ) -> Result<Self, SchedulerError> {
        let today = local_time.naive(clock.now()).date();
        let counter =
            SeverityCounter::load(store.clone(), clock.clone(), Retention::from(&config.events));
        let tracker = HydrationTracker::load(config.hydration.clone(), store.clone(), today);
        let scheduler = Scheduler::new(store.clone(), clock.clone(), config.scheduler.clone());

        let drink_policy = IntervalPolicy::Level {
            base: config.drink_reminder.base,
            limit: config.drink_reminder.limit,
            level_max: MAX_DEHYDRATION_LEVEL,
        };
        let orientation_policy = IntervalPolicy::IgnoredCount {
            base: config.bad_orientation.base,
            limit: config.bad_orientation.limit,
            step: config.bad_orientation.step,
        };
        let empty_policy = IntervalPolicy::IgnoredCount {
            base: config.empty_reminder.base,
            limit: config.empty_reminder.limit,
            step: config.empty_reminder.step,
        };
        let recalibrate_policy = IntervalPolicy::Fixed {
            minutes: config
                .recalibrate_reminder
                .days
                .max(1)
                .saturating_mul(MINUTES_PER_DAY),
        };

        // Register at the level-derived interval so that the refresh on
        // startup keeps a restored trigger time.
        let level = tracker.dehydration_level(local_time.naive(clock.now()));
        let drink_minutes = drink_policy.interval(Feedback::Level(level));

        let ctx = Arc::new(ReminderContext {
            counter,
            tracker: Mutex::new(tracker),
            sensors,
            store,
            clock,
            local_time,
            config,
            drink_policy,
            orientation_policy,
            empty_policy,
        });

        scheduler.register_with(
            DRINK_REMINDER,
            TimerOptions::new(drink_minutes).jitter(ctx.config.drink_reminder.jitter),
            Arc::new(DrinkReminder(ctx.clone())),
        )?;
        scheduler.register_with(
            BAD_ORIENTATION,
            TimerOptions::new(orientation_policy.base()).inactive(),
            Arc::new(ConditionReminder {
                ctx: ctx.clone(),
                condition_holds: |s| !s.is_vertical(),
            }),
        )?;
        scheduler.register_with(
            EMPTY_REMINDER,
            TimerOptions::new(empty_policy.base()).inactive(),
            Arc::new(ConditionReminder {
                ctx: ctx.clone(),
                condition_holds: |s| s.is_empty(),
            }),
        )?;
        scheduler.register_with(
            RECALIBRATE_REMINDER,
            TimerOptions::new(recalibrate_policy.base()),
            Arc::new(RecalibrateReminder(ctx.clone())),
        )?;

        Ok(Self { scheduler, ctx })
    }

    /// Build the set on the JSON store in the default data directory, with
    /// the system clock and time zone.
    pub fn open(config: Config, sensors: Arc<dyn BottleSensors>) -> crate::error::Result<Self> {
        let store = JsonFileStore::open()?.with_max_records(config.events.max_records);
        let set = Self::new(
            config,
            Arc::new(store),
            Arc::new(SystemClock),
            sensors,
            LocalTime::System,
        )?;
        Ok(set)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn counter(&self) -> &SeverityCounter {
        &self.ctx.counter
    }

    pub fn daily_consumed_ml(&self) -> f64 {
        self.ctx.tracker().daily_consumed_ml()
    }

    pub fn dehydration_level(&self) -> f64 {
        self.ctx.dehydration_level(self.ctx.clock.now())
    }

    pub fn window_info(&self) -> WindowInfo {
        let local = self.ctx.local_time.naive(self.ctx.clock.now());
        self.ctx.tracker().window_info(local)
    }

    fn log_failure(&self, action: &str, result: Result<impl Sized, SchedulerError>) {
        if let Err(e) = result {
            log::error!("{} failed: {}", action, e);
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Record the session start and begin firing.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// Sessions that started without a matching shutdown are logged as
    /// `app_shutdown_unexpected` first. Returns how many were found.
    pub fn startup(&self) -> u32 {
        let now = self.ctx.clock.now();
        self.check_daily_rollover(self.ctx.local_time.naive(now).date());

        let counter = &self.ctx.counter;
        let started = counter.count("app_started", None);
        let accounted = counter
            .count("app_shutdown", None)
            .saturating_add(counter.count("app_shutdown_unexpected", None));
        let unexpected = started.saturating_sub(accounted);
        if unexpected > 0 {
            log::warn!("{} previous session(s) ended without a clean shutdown", unexpected);
        }
        for _ in 0..unexpected {
            counter.increment(
                "app_shutdown_unexpected",
                None,
                payload(&[
                    ("detected_at_startup", json!(now.to_rfc3339())),
                    ("reason", json!("unexpected_exit_detected")),
                ]),
            );
        }

        counter.increment(
            "app_started",
            None,
            payload(&[("session_start", json!(now.to_rfc3339()))]),
        );
        self.ctx.tracker().record_session();

        let retention = Duration::days(self.ctx.config.events.log_retention_days.max(1));
        match self.ctx.store.prune_events(now - retention) {
            Ok(0) => {}
            Ok(n) => log::info!("pruned {} old event records", n),
            Err(e) => log::warn!("could not prune event log: {}", e),
        }
        counter.prune();

        self.refresh_drink_interval();
        self.scheduler.start();
        unexpected
    }

    /// Record a clean shutdown and stop the scheduler.
    pub async fn shutdown(&self, reason: &str) {
        self.ctx.counter.increment(
            "app_shutdown",
            None,
            payload(&[
                ("reason", json!(reason)),
                ("daily_consumed_ml", json!(self.daily_consumed_ml())),
            ]),
        );
        self.scheduler.stop().await;
        log::info!("reminders shut down ({})", reason);
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Recompute the drink interval from the current dehydration level.
    pub fn refresh_drink_interval(&self) -> u32 {
        let level = self.dehydration_level();
        let interval = self.ctx.drink_interval(level);
        self.log_failure(
            "refresh drink interval",
            self.scheduler.set_interval(DRINK_REMINDER, interval),
        );
        interval
    }

    /// The user drank `ml` millilitres.
    pub fn record_drink(&self, ml: f64) {
        self.ctx.tracker().record_drink(ml);
        self.ctx.counter.increment(
            "drink",
            None,
            payload(&[
                ("amount_ml", json!(ml)),
                ("daily_total_ml", json!(self.daily_consumed_ml())),
            ]),
        );
        self.ctx.counter.reset(DRINK_REMINDER, Some(DRINK_REMINDER));
        self.log_failure("reset drink reminder", self.scheduler.reset(DRINK_REMINDER));
        self.refresh_drink_interval();
    }

    pub fn bottle_emptied(&self) {
        self.ctx.counter.increment("empty", None, Payload::new());
        self.log_failure("activate empty reminder", self.scheduler.activate(EMPTY_REMINDER));
        self.log_failure("reset empty reminder", self.scheduler.reset(EMPTY_REMINDER));
    }

    pub fn bottle_refilled(&self) {
        self.ctx.counter.increment("filled_up", None, Payload::new());
        self.resolve(EMPTY_REMINDER);
    }

    pub fn orientation_changed(&self, vertical: bool) {
        if vertical {
            let was_active = self
                .scheduler
                .timer_status(BAD_ORIENTATION)
                .is_some_and(|s| s.active);
            if was_active {
                self.resolve(BAD_ORIENTATION);
            }
        } else {
            self.log_failure(
                "activate bad orientation reminder",
                self.scheduler.activate(BAD_ORIENTATION),
            );
        }
    }

    /// Deactivate a condition reminder and start it from scratch next time.
    fn resolve(&self, timer: &str) {
        self.log_failure("deactivate", self.scheduler.deactivate(timer));
        self.ctx.counter.reset(timer, Some(timer));
        self.log_failure(
            "restore base interval",
            self.scheduler
                .set_interval(timer, self.ctx.policy_for(timer).base()),
        );
        self.log_failure("reset", self.scheduler.reset(timer));
    }

    /// The bottle reads as completely empty. With `recalibrated` the user
    /// confirmed a new empty weight.
    pub fn very_empty(&self, recalibrated: bool) {
        if recalibrated {
            self.ctx
                .counter
                .increment("very_empty_recalibrated", None, Payload::new());
            self.log_failure(
                "reset recalibrate reminder",
                self.scheduler.reset(RECALIBRATE_REMINDER),
            );
        } else {
            self.ctx.counter.increment("very_empty", None, Payload::new());
        }
    }

    /// Start a new hydration day if the local date changed.
    pub fn check_daily_rollover(&self, today: NaiveDate) -> bool {
        let rolled = self.ctx.tracker().check_daily_rollover(today);
        if rolled {
            self.ctx.counter.reset(DRINK_REMINDER, Some(DRINK_REMINDER));
            self.refresh_drink_interval();
        }
        rolled
    }
}
