//! Named persistent timers.
//!
//! The scheduler owns a registry of timers, each with an interval, optional
//! symmetric jitter and an async callback. A polling task wakes every tick and
//! fires, in registration order, every active timer whose next trigger time
//! has passed, provided at least `min_gap_minutes` elapsed since the last
//! firing of *any* timer. A second task re-persists the registry
//! periodically.
//!
//! ## Firing
//!
//! ```text
//! due -> callback (bounded by timeout) -> Completed | TimedOut | Cancelled -> reschedule + persist
//!                                      -> Failed                          -> schedule untouched
//! ```
//!
//! Callbacks run one at a time and never while the registry is locked, so a
//! callback may call back into the scheduler through [`FireContext`].
//!
//! ## Usage
//!
//! ```ignore
//! let scheduler = Scheduler::new(store, Arc::new(SystemClock), config.scheduler);
//! scheduler.register("drink_reminder", 45, 5, callback)?;
//! scheduler.start();
//! // ...
//! scheduler.stop().await;
//! ```

mod callback;
mod timer;

pub use callback::{callback_fn, CallbackError, FireContext, ReminderCallback};
pub use timer::{parse_timestamp, TimerOptions, TimerStatus};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rand::SeedableRng;
use rand_pcg::Mcg128Xsl64;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::SchedulerError;
use crate::storage::{SchedulerConfig, StateStore, TimerRecord};
use timer::Timer;

/// How a single firing ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Completed,
    TimedOut,
    Cancelled,
    Failed(String),
}

impl FireOutcome {
    /// Whether the timer moves on to its next trigger time.
    pub fn reschedules(&self) -> bool {
        !matches!(self, FireOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireReport {
    pub timer: String,
    pub fired_at: DateTime<Utc>,
    pub outcome: FireOutcome,
    /// Next trigger time after this firing, if the timer is still registered.
    pub next_trigger_time: Option<DateTime<Utc>>,
}

struct Registry {
    /// Registration order.
    timers: Vec<Timer>,
    /// Persisted records whose timers were not registered (yet) this session.
    dormant: BTreeMap<String, TimerRecord>,
    last_any_fire: Option<DateTime<Utc>>,
    rng: Mcg128Xsl64,
}

impl Registry {
    fn timer_and_rng(
        &mut self,
        name: &str,
    ) -> Result<(&mut Timer, &mut Mcg128Xsl64), SchedulerError> {
        let Registry { timers, rng, .. } = self;
        let timer = timers
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| SchedulerError::UnknownTimer(name.to_string()))?;
        Ok((timer, rng))
    }

    fn gap_elapsed(&self, now: DateTime<Utc>, min_gap: Duration) -> bool {
        self.last_any_fire.map_or(true, |last| now - last >= min_gap)
    }

    fn snapshot(&self) -> BTreeMap<String, TimerRecord> {
        let mut records = self.dormant.clone();
        for timer in &self.timers {
            records.insert(timer.name.clone(), timer.to_record());
        }
        records
    }
}

struct RunningTasks {
    cancel: CancellationToken,
    poll: JoinHandle<()>,
    flush: JoinHandle<()>,
}

struct Inner {
    registry: Mutex<Registry>,
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// Held across snapshot + save.
    persist_lock: Mutex<()>,
    /// Held across a due-check pass, so the loop and `run_pending` never
    /// see the same timer as due.
    pass_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Option<RunningTasks>>,
    in_flight: Mutex<Option<AbortHandle>>,
}

/// Shared handle to the timer registry. Cloning is cheap.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Scheduler {
    /// Create an empty scheduler and read persisted timer state.
    ///
    /// Persisted records are only applied when a timer of the same name is
    /// registered.
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Self {
        let dormant: BTreeMap<String, TimerRecord> = store
            .load_timers()
            .unwrap_or_else(|e| {
                log::warn!("could not load timer states, starting fresh: {}", e);
                HashMap::new()
            })
            .into_iter()
            .collect();
        let rng = match config.jitter_seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };

        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry {
                    timers: Vec::new(),
                    dormant,
                    last_any_fire: None,
                    rng,
                }),
                store,
                clock,
                config,
                persist_lock: Mutex::new(()),
                pass_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    fn min_gap(&self) -> Duration {
        Duration::minutes(i64::from(self.inner.config.min_gap_minutes))
    }

    // ── Registration API ─────────────────────────────────────────────

    /// Register an active timer. See [`Scheduler::register_with`].
    pub fn register(
        &self,
        name: impl Into<String>,
        interval_minutes: u32,
        jitter_minutes: u32,
        callback: Arc<dyn ReminderCallback>,
    ) -> Result<(), SchedulerError> {
        self.register_with(
            name,
            TimerOptions::new(interval_minutes).jitter(jitter_minutes),
            callback,
        )
    }

    /// Register a timer, restoring persisted state for the same name.
    ///
    /// # Errors
    ///
    /// `DuplicateTimer` if the name is taken, `InvalidInterval` for a zero
    /// interval.
    pub fn register_with(
        &self,
        name: impl Into<String>,
        options: TimerOptions,
        callback: Arc<dyn ReminderCallback>,
    ) -> Result<(), SchedulerError> {
        let name = name.into();
        if options.interval_minutes == 0 {
            return Err(SchedulerError::InvalidInterval {
                name,
                minutes: 0,
            });
        }
        let now = self.inner.clock.now();

        {
            let mut reg = lock(&self.inner.registry);
            if reg.timers.iter().any(|t| t.name == name) {
                return Err(SchedulerError::DuplicateTimer(name));
            }
            let persisted = reg.dormant.remove(&name);
            let timer = match persisted {
                Some(record) => {
                    let timer =
                        Timer::restore(name, options, callback, &record, now, &mut reg.rng);
                    log::info!(
                        "timer '{}' restored (active: {}, next: {})",
                        timer.name,
                        timer.is_active,
                        timer.next_trigger_time
                    );
                    timer
                }
                None => {
                    let timer = Timer::fresh(name, options, callback, now, &mut reg.rng);
                    log::info!(
                        "timer '{}' registered (every {}±{} min, next: {})",
                        timer.name,
                        timer.interval_minutes,
                        timer.jitter_minutes,
                        timer.next_trigger_time
                    );
                    timer
                }
            };
            reg.timers.push(timer);
        }

        self.persist();
        Ok(())
    }

    fn update<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Timer, DateTime<Utc>, &mut Mcg128Xsl64) -> R,
    ) -> Result<R, SchedulerError> {
        let now = self.inner.clock.now();
        let result = {
            let mut reg = lock(&self.inner.registry);
            let (timer, rng) = reg.timer_and_rng(name)?;
            f(timer, now, rng)
        };
        self.persist();
        Ok(result)
    }

    /// Resume firing. The schedule is left as it was.
    pub fn activate(&self, name: &str) -> Result<(), SchedulerError> {
        self.update(name, |timer, _, _| {
            if !timer.is_active {
                log::debug!("timer '{}' activated", timer.name);
            }
            timer.is_active = true;
        })
    }

    /// Stop firing without losing the schedule.
    pub fn deactivate(&self, name: &str) -> Result<(), SchedulerError> {
        self.update(name, |timer, _, _| {
            if timer.is_active {
                log::debug!("timer '{}' deactivated", timer.name);
            }
            timer.is_active = false;
        })
    }

    /// Forget the last firing and schedule a full interval from now.
    pub fn reset(&self, name: &str) -> Result<(), SchedulerError> {
        self.update(name, |timer, now, rng| {
            timer.last_triggered = None;
            timer.schedule_from(now, rng);
            log::debug!("timer '{}' reset, next: {}", timer.name, timer.next_trigger_time);
        })
    }

    /// Change the interval. A different value reschedules from now.
    ///
    /// Returns whether the interval changed.
    pub fn set_interval(&self, name: &str, minutes: u32) -> Result<bool, SchedulerError> {
        if minutes == 0 {
            return Err(SchedulerError::InvalidInterval {
                name: name.to_string(),
                minutes,
            });
        }
        let changed = {
            let now = self.inner.clock.now();
            let mut reg = lock(&self.inner.registry);
            let (timer, rng) = reg.timer_and_rng(name)?;
            if timer.interval_minutes == minutes {
                false
            } else {
                log::info!(
                    "timer '{}' interval {} -> {} min",
                    timer.name,
                    timer.interval_minutes,
                    minutes
                );
                timer.interval_minutes = minutes;
                timer.schedule_from(now, rng);
                true
            }
        };
        if changed {
            self.persist();
        }
        Ok(changed)
    }

    /// Drop a timer and its persisted state.
    pub fn remove(&self, name: &str) -> Result<(), SchedulerError> {
        {
            let mut reg = lock(&self.inner.registry);
            let index = reg
                .timers
                .iter()
                .position(|t| t.name == name)
                .ok_or_else(|| SchedulerError::UnknownTimer(name.to_string()))?;
            reg.timers.remove(index);
            reg.dormant.remove(name);
        }
        log::info!("timer '{}' removed", name);
        self.persist();
        Ok(())
    }

    /// Every registered timer, in registration order.
    pub fn status(&self) -> Vec<TimerStatus> {
        lock(&self.inner.registry)
            .timers
            .iter()
            .map(Timer::status)
            .collect()
    }

    pub fn timer_status(&self, name: &str) -> Option<TimerStatus> {
        lock(&self.inner.registry)
            .timers
            .iter()
            .find(|t| t.name == name)
            .map(Timer::status)
    }

    pub fn last_any_fire(&self) -> Option<DateTime<Utc>> {
        lock(&self.inner.registry).last_any_fire
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Write the current registry to the store.
    ///
    /// Returns `false` if the store rejected the write; the in-memory state
    /// is kept and the next persist retries.
    pub fn persist(&self) -> bool {
        let _writer = lock(&self.inner.persist_lock);
        let snapshot = lock(&self.inner.registry).snapshot();
        match self.inner.store.save_timers(&snapshot) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("failed to persist timer states: {}", e);
                false
            }
        }
    }

    // ── Firing ───────────────────────────────────────────────────────

    /// Run one due-check pass now and wait for every firing it triggers.
    ///
    /// Waits for a pass already running in the polling task to finish first.
    pub async fn run_pending(&self) -> Vec<FireReport> {
        let cancel = lock(&self.inner.tasks)
            .as_ref()
            .map(|t| t.cancel.clone())
            .unwrap_or_else(CancellationToken::new);
        self.run_pass(&cancel).await
    }

    async fn run_pass(&self, cancel: &CancellationToken) -> Vec<FireReport> {
        let _pass = self.inner.pass_lock.lock().await;
        let names: Vec<String> = lock(&self.inner.registry)
            .timers
            .iter()
            .map(|t| t.name.clone())
            .collect();

        let mut reports = Vec::new();
        for name in names {
            if cancel.is_cancelled() {
                log::debug!("due-check pass cancelled");
                break;
            }
            if let Some(report) = self.fire_if_due(&name).await {
                reports.push(report);
            }
        }
        reports
    }

    async fn fire_if_due(&self, name: &str) -> Option<FireReport> {
        let now = self.inner.clock.now();
        let (callback, interval_minutes) = {
            let reg = lock(&self.inner.registry);
            let timer = reg.timers.iter().find(|t| t.name == name)?;
            if !timer.is_due(now) {
                return None;
            }
            if !reg.gap_elapsed(now, self.min_gap()) {
                log::debug!("timer '{}' is due but held back by the global gap", name);
                return None;
            }
            (timer.callback.clone(), timer.interval_minutes)
        };

        log::info!("firing timer '{}'", name);
        let ctx = FireContext {
            timer: name.to_string(),
            fired_at: now,
            interval_minutes,
            scheduler: self.clone(),
        };
        let outcome = self.invoke(callback, ctx).await;

        let next_trigger_time = if outcome.reschedules() {
            let next = {
                let mut reg = lock(&self.inner.registry);
                reg.last_any_fire = Some(now);
                let Registry { timers, rng, .. } = &mut *reg;
                timers.iter_mut().find(|t| t.name == name).map(|timer| {
                    timer.last_triggered = Some(now);
                    timer.schedule_from(now, rng);
                    timer.next_trigger_time
                })
            };
            self.persist();
            if let Some(next) = next {
                log::debug!("timer '{}' next trigger {}", name, next);
            }
            next
        } else {
            self.timer_status(name).map(|s| s.next_trigger_time)
        };

        Some(FireReport {
            timer: name.to_string(),
            fired_at: now,
            outcome,
            next_trigger_time,
        })
    }

    async fn invoke(&self, callback: Arc<dyn ReminderCallback>, ctx: FireContext) -> FireOutcome {
        let name = ctx.timer.clone();
        let timeout = self.inner.config.callback_timeout();

        let mut handle = tokio::spawn(async move { callback.fire(ctx).await });
        *lock(&self.inner.in_flight) = Some(handle.abort_handle());
        let result = tokio::time::timeout(timeout, &mut handle).await;
        lock(&self.inner.in_flight).take();

        match result {
            Err(_) => {
                handle.abort();
                log::warn!("timer '{}' callback timed out after {:?}", name, timeout);
                FireOutcome::TimedOut
            }
            Ok(Ok(Ok(()))) => FireOutcome::Completed,
            Ok(Ok(Err(CallbackError::Cancelled))) => {
                log::warn!("timer '{}' callback cancelled", name);
                FireOutcome::Cancelled
            }
            Ok(Ok(Err(CallbackError::Failed(message)))) => {
                log::error!("timer '{}' callback failed: {}", name, message);
                FireOutcome::Failed(message)
            }
            Ok(Err(join)) if join.is_cancelled() => {
                log::warn!("timer '{}' callback aborted", name);
                FireOutcome::Cancelled
            }
            Ok(Err(join)) => {
                log::error!("timer '{}' callback panicked: {}", name, join);
                FireOutcome::Failed(format!("callback panicked: {join}"))
            }
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        lock(&self.inner.tasks).is_some()
    }

    /// Spawn the polling and flush tasks. Does nothing if already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut tasks = lock(&self.inner.tasks);
        if tasks.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let poll = tokio::spawn(self.clone().poll_loop(cancel.clone()));
        let flush = tokio::spawn(self.clone().flush_loop(cancel.clone()));
        *tasks = Some(RunningTasks {
            cancel,
            poll,
            flush,
        });
        log::info!(
            "scheduler started (tick {:?}, min gap {} min)",
            self.inner.config.tick(),
            self.inner.config.min_gap_minutes
        );
    }

    /// Stop both tasks and persist a final snapshot.
    ///
    /// An in-flight callback gets up to `stop_timeout` to finish before it is
    /// aborted. No timer fires after this returns. Does nothing if not
    /// running.
    pub async fn stop(&self) {
        let running = lock(&self.inner.tasks).take();
        let Some(tasks) = running else {
            return;
        };
        let RunningTasks {
            cancel,
            mut poll,
            flush,
        } = tasks;
        cancel.cancel();

        let grace = self.inner.config.stop_timeout();
        if tokio::time::timeout(grace, &mut poll).await.is_err() {
            log::warn!("scheduler loop still busy after {:?}, aborting", grace);
            poll.abort();
            if let Some(in_flight) = lock(&self.inner.in_flight).take() {
                in_flight.abort();
            }
            let _ = poll.await;
        }
        flush.abort();
        let _ = flush.await;

        self.persist();
        log::info!("scheduler stopped");
    }

    async fn poll_loop(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.inner.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_pass(&cancel).await;
                }
            }
        }
        log::debug!("scheduler loop exited");
    }

    async fn flush_loop(self, cancel: CancellationToken) {
        let period = self.inner.config.flush_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    log::debug!("periodic timer flush");
                    self.persist();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            jitter_seed: Some(42),
            callback_timeout_secs: 1,
            ..SchedulerConfig::default()
        }
    }

    fn setup() -> (Scheduler, ManualClock, Arc<MemoryStore>) {
        let clock = ManualClock::new(t0());
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(store.clone(), Arc::new(clock.clone()), config());
        (scheduler, clock, store)
    }

    fn counting() -> (Arc<dyn ReminderCallback>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let cb = callback_fn(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        (cb, hits)
    }

    #[test]
    fn register_schedules_within_bounds() {
        let (scheduler, _, _) = setup();
        for i in 0..20 {
            let (cb, _) = counting();
            scheduler.register(format!("t{i}"), 10, 3, cb).unwrap();
        }
        for status in scheduler.status() {
            assert!(status.next_trigger_time > t0());
            assert!(status.next_trigger_time <= t0() + Duration::minutes(13));
            assert!(status.next_trigger_time >= t0() + Duration::minutes(7));
        }
    }

    #[test]
    fn registration_errors() {
        let (scheduler, _, _) = setup();
        let (cb, _) = counting();
        scheduler.register("a", 5, 0, cb.clone()).unwrap();
        assert_eq!(
            scheduler.register("a", 5, 0, cb.clone()),
            Err(SchedulerError::DuplicateTimer("a".into()))
        );
        assert!(matches!(
            scheduler.register("b", 0, 0, cb),
            Err(SchedulerError::InvalidInterval { .. })
        ));
        assert_eq!(
            scheduler.activate("missing"),
            Err(SchedulerError::UnknownTimer("missing".into()))
        );
        assert!(matches!(
            scheduler.set_interval("a", 0),
            Err(SchedulerError::InvalidInterval { .. })
        ));
    }

    #[tokio::test]
    async fn set_interval_reschedules_from_now() {
        let (scheduler, clock, _) = setup();
        let (cb, hits) = counting();
        scheduler.register("empty_reminder", 10, 0, cb).unwrap();

        clock.advance_minutes(10);
        let fired = scheduler.run_pending().await;
        assert_eq!(fired.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let fired_at = clock.now();
        assert_eq!(
            scheduler.timer_status("empty_reminder").unwrap().next_trigger_time,
            fired_at + Duration::minutes(10)
        );

        clock.advance_minutes(2);
        assert!(scheduler.set_interval("empty_reminder", 4).unwrap());
        assert_eq!(
            scheduler.timer_status("empty_reminder").unwrap().next_trigger_time,
            clock.now() + Duration::minutes(4)
        );
        assert!(!scheduler.set_interval("empty_reminder", 4).unwrap());
    }

    #[tokio::test]
    async fn global_gap_defers_second_timer() {
        let (scheduler, clock, _) = setup();
        let (a, a_hits) = counting();
        let (b, b_hits) = counting();
        scheduler.register("a", 5, 0, a).unwrap();
        scheduler.register("b", 5, 0, b).unwrap();

        clock.advance_minutes(5);
        let first = scheduler.run_pending().await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].timer, "a");
        assert_eq!(b_hits.load(Ordering::SeqCst), 0);

        // Same minute: still blocked.
        clock.advance(Duration::seconds(30));
        assert!(scheduler.run_pending().await.is_empty());

        clock.advance(Duration::seconds(30));
        let second = scheduler.run_pending().await;
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].timer, "b");
        assert_eq!(a_hits.load(Ordering::SeqCst), 1);
        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactive_timers_are_skipped() {
        let (scheduler, clock, _) = setup();
        let (cb, hits) = counting();
        scheduler
            .register_with("bad_orientation", TimerOptions::new(10).inactive(), cb)
            .unwrap();
        clock.advance_minutes(30);
        assert!(scheduler.run_pending().await.is_empty());

        scheduler.activate("bad_orientation").unwrap();
        assert_eq!(scheduler.run_pending().await.len(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_callback_stays_due() {
        let (scheduler, clock, _) = setup();
        let cb = callback_fn(|_| async { Err(CallbackError::Failed("sensor offline".into())) });
        scheduler.register("flaky", 5, 0, cb).unwrap();
        clock.advance_minutes(5);
        let due_at = scheduler.timer_status("flaky").unwrap().next_trigger_time;

        let reports = scheduler.run_pending().await;
        assert_eq!(reports[0].outcome, FireOutcome::Failed("sensor offline".into()));
        let status = scheduler.timer_status("flaky").unwrap();
        assert_eq!(status.next_trigger_time, due_at);
        assert!(status.last_triggered.is_none());
        assert!(scheduler.last_any_fire().is_none());

        // Still due on the next pass.
        assert_eq!(scheduler.run_pending().await.len(), 1);
    }

    #[tokio::test]
    async fn panicking_callback_is_contained() {
        let (scheduler, clock, _) = setup();
        let cb = callback_fn(|ctx: FireContext| async move {
            if ctx.interval_minutes > 0 {
                panic!("boom");
            }
            Ok(())
        });
        scheduler.register("explodes", 5, 0, cb).unwrap();
        clock.advance_minutes(5);
        let reports = scheduler.run_pending().await;
        assert!(matches!(reports[0].outcome, FireOutcome::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reschedules_like_success() {
        let (scheduler, clock, _) = setup();
        let cb = callback_fn(|_| async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(())
        });
        scheduler.register("slow", 5, 0, cb).unwrap();
        clock.advance_minutes(5);
        let fired_at = clock.now();

        let reports = scheduler.run_pending().await;
        assert_eq!(reports[0].outcome, FireOutcome::TimedOut);
        assert_eq!(reports[0].next_trigger_time, Some(fired_at + Duration::minutes(5)));
        assert_eq!(scheduler.last_any_fire(), Some(fired_at));
    }

    #[tokio::test]
    async fn cancelled_callback_reschedules() {
        let (scheduler, clock, _) = setup();
        let cb = callback_fn(|_| async { Err(CallbackError::Cancelled) });
        scheduler.register("gives_up", 5, 0, cb).unwrap();
        clock.advance_minutes(5);
        let reports = scheduler.run_pending().await;
        assert_eq!(reports[0].outcome, FireOutcome::Cancelled);
        assert!(scheduler.timer_status("gives_up").unwrap().last_triggered.is_some());
    }

    #[tokio::test]
    async fn callback_can_change_its_own_interval() {
        let (scheduler, clock, _) = setup();
        let cb = callback_fn(|ctx: FireContext| async move {
            ctx.scheduler
                .set_interval(&ctx.timer, 20)
                .map(|_| ())
                .map_err(|e| CallbackError::Failed(e.to_string()))
        });
        scheduler.register("drink_reminder", 45, 0, cb).unwrap();
        clock.advance_minutes(45);
        let fired_at = clock.now();
        scheduler.run_pending().await;
        let status = scheduler.timer_status("drink_reminder").unwrap();
        assert_eq!(status.interval_minutes, 20);
        assert_eq!(status.next_trigger_time, fired_at + Duration::minutes(20));
    }

    #[tokio::test]
    async fn next_trigger_strictly_advances() {
        let (scheduler, clock, _) = setup();
        let (cb, _) = counting();
        scheduler.register("jittery", 3, 5, cb).unwrap();
        let mut previous = scheduler.timer_status("jittery").unwrap().next_trigger_time;
        for _ in 0..50 {
            clock.set(previous);
            scheduler.run_pending().await;
            let next = scheduler.timer_status("jittery").unwrap().next_trigger_time;
            assert!(next > previous);
            assert!(next - previous >= Duration::minutes(1));
            previous = next;
        }
    }

    #[test]
    fn mutations_persist_and_survive_reregistration() {
        let (scheduler, clock, store) = setup();
        let (cb, _) = counting();
        scheduler.register("a", 10, 2, cb.clone()).unwrap();
        scheduler.register("b", 10, 0, cb.clone()).unwrap();
        scheduler.deactivate("b").unwrap();
        let before = scheduler.status();

        clock.advance_minutes(3);
        let restarted = Scheduler::new(store.clone(), Arc::new(clock.clone()), config());
        restarted.register("a", 10, 2, cb.clone()).unwrap();
        restarted.register("b", 10, 0, cb).unwrap();
        assert_eq!(restarted.status(), before);
    }

    #[test]
    fn unregistered_records_are_kept_until_removed() {
        let (scheduler, clock, store) = setup();
        let (cb, _) = counting();
        scheduler.register("a", 10, 0, cb.clone()).unwrap();
        scheduler.register("b", 10, 0, cb.clone()).unwrap();

        let restarted = Scheduler::new(store.clone(), Arc::new(clock.clone()), config());
        restarted.register("a", 10, 0, cb.clone()).unwrap();
        assert!(store.load_timers().unwrap().contains_key("b"));

        restarted.remove("a").unwrap();
        assert!(!store.load_timers().unwrap().contains_key("a"));
        assert!(restarted.status().is_empty());
    }

    #[test]
    fn persist_failures_are_absorbed() {
        let (scheduler, _, store) = setup();
        store.set_fail_writes(true);
        let (cb, _) = counting();
        scheduler.register("a", 10, 0, cb).unwrap();
        assert_eq!(scheduler.status().len(), 1);
        assert!(!scheduler.persist());
        store.set_fail_writes(false);
        assert!(scheduler.persist());
        assert!(store.load_timers().unwrap().contains_key("a"));
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (scheduler, _, store) = setup();
        let (cb, _) = counting();
        scheduler.register("a", 10, 0, cb).unwrap();

        scheduler.stop().await;
        scheduler.start();
        scheduler.start();
        assert!(scheduler.is_running());

        let saves = store.timer_saves();
        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert_eq!(store.timer_saves(), saves + 1);
        scheduler.stop().await;
        assert_eq!(store.timer_saves(), saves + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_fires_due_timers() {
        let (scheduler, clock, _) = setup();
        let (cb, hits) = counting();
        scheduler.register("a", 1, 0, cb).unwrap();
        clock.advance_minutes(1);

        scheduler.start();
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        scheduler.stop().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_aborts_stuck_callback() {
        let clock = ManualClock::new(t0());
        let store = Arc::new(MemoryStore::new());
        let cfg = SchedulerConfig {
            callback_timeout_secs: 600,
            stop_timeout_secs: 1,
            jitter_seed: Some(1),
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(store, Arc::new(clock.clone()), cfg);
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let (s, f) = (started.clone(), finished.clone());
        let cb = callback_fn(move |_| {
            let (s, f) = (s.clone(), f.clone());
            async move {
                s.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_secs(300)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        scheduler.register("stuck", 1, 0, cb).unwrap();
        clock.advance_minutes(1);

        scheduler.start();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        scheduler.stop().await;
        tokio::time::sleep(std::time::Duration::from_secs(600)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_pending_waits_for_running_pass() {
        let (scheduler, clock, _) = setup();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let cb = callback_fn(move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                Ok(())
            }
        });
        scheduler.register("slow", 1, 0, cb).unwrap();
        clock.advance_minutes(1);

        scheduler.start();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let reports = scheduler.run_pending().await;
        scheduler.stop().await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(reports.len() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_flush_retries_failed_writes() {
        let (scheduler, _, store) = setup();
        let (cb, _) = counting();
        scheduler.register("a", 10, 0, cb).unwrap();

        store.set_fail_writes(true);
        scheduler.deactivate("a").unwrap();
        store.set_fail_writes(false);
        assert!(store.load_timers().unwrap()["a"].is_active);
        let saves = store.timer_saves();

        scheduler.start();
        let period = scheduler.config().flush_interval();
        tokio::time::sleep(period + std::time::Duration::from_secs(1)).await;

        assert!(store.timer_saves() > saves);
        assert!(!store.load_timers().unwrap()["a"].is_active);
        scheduler.stop().await;
    }
}
