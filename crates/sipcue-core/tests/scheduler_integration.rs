//! Integration tests for the timer scheduler.
//!
//! These drive the scheduler through its public API against a file-backed
//! store and a manual clock, covering restart recovery and the firing rules.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use sipcue_core::storage::{SchedulerConfig, TimerRecord};
use sipcue_core::{
    callback_fn, FireOutcome, JsonFileStore, ManualClock, MemoryStore, ReminderCallback,
    Scheduler, StateStore,
};
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

fn config(seed: u64) -> SchedulerConfig {
    SchedulerConfig {
        jitter_seed: Some(seed),
        ..SchedulerConfig::default()
    }
}

fn recorder(log: Arc<Mutex<Vec<(String, DateTime<Utc>)>>>) -> Arc<dyn ReminderCallback> {
    callback_fn(move |ctx| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push((ctx.timer, ctx.fired_at));
            Ok(())
        }
    })
}

#[test]
fn test_restart_round_trip_through_files() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(t0());
    let noop = callback_fn(|_| async { Ok(()) });

    let before = {
        let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
        let scheduler = Scheduler::new(store, Arc::new(clock.clone()), config(1));
        scheduler.register("drink_reminder", 45, 5, noop.clone()).unwrap();
        scheduler.register("bad_orientation", 10, 0, noop.clone()).unwrap();
        scheduler.deactivate("bad_orientation").unwrap();
        scheduler.status()
    };

    assert!(dir.path().join("timer_states.json").exists());

    clock.advance_minutes(7);
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    let scheduler = Scheduler::new(store, Arc::new(clock.clone()), config(2));
    scheduler.register("drink_reminder", 45, 5, noop.clone()).unwrap();
    scheduler.register("bad_orientation", 10, 0, noop).unwrap();

    let after = scheduler.status();
    assert_eq!(after, before);
    assert!(!after[1].active);
}

#[test]
fn test_malformed_persisted_state_is_repaired() {
    let clock = ManualClock::new(t0());
    let store = Arc::new(MemoryStore::new());
    store.insert_timer(TimerRecord {
        name: "empty_reminder".into(),
        last_triggered: Some("not a time".into()),
        interval_minutes: 2,
        jitter_minutes: 0,
        is_active: true,
        next_trigger_time: Some("also not a time".into()),
    });

    let scheduler = Scheduler::new(store.clone(), Arc::new(clock.clone()), config(1));
    scheduler
        .register("empty_reminder", 10, 0, callback_fn(|_| async { Ok(()) }))
        .unwrap();

    let status = scheduler.timer_status("empty_reminder").unwrap();
    assert_eq!(status.interval_minutes, 10);
    assert!(status.last_triggered.is_none());
    assert_eq!(status.next_trigger_time, t0() + Duration::minutes(10));

    let saved = store.load_timers().unwrap();
    assert_eq!(
        saved["empty_reminder"].next_trigger_time.as_deref(),
        Some("2024-05-01T09:10:00+00:00")
    );
}

#[tokio::test]
async fn test_firings_respect_global_gap() {
    let clock = ManualClock::new(t0());
    let scheduler = Scheduler::new(
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        SchedulerConfig {
            min_gap_minutes: 2,
            ..config(9)
        },
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    for name in ["a", "b", "c"] {
        scheduler.register(name, 10, 2, recorder(log.clone())).unwrap();
    }

    // One pass per simulated minute for six hours.
    for _ in 0..360 {
        clock.advance_minutes(1);
        scheduler.run_pending().await;
    }

    let fired = log.lock().unwrap().clone();
    assert!(fired.len() > 50);
    for pair in fired.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::minutes(2));
    }
    for name in ["a", "b", "c"] {
        assert!(fired.iter().any(|(n, _)| n == name), "{name} never fired");
    }
}

#[tokio::test]
async fn test_no_refire_within_interval_minus_jitter() {
    let clock = ManualClock::new(t0());
    let scheduler = Scheduler::new(
        Arc::new(MemoryStore::new()),
        Arc::new(clock.clone()),
        config(5),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    scheduler.register("drink_reminder", 20, 5, recorder(log.clone())).unwrap();

    for _ in 0..(24 * 60) {
        clock.advance_minutes(1);
        scheduler.run_pending().await;
    }

    let fired = log.lock().unwrap().clone();
    assert!(fired.len() >= 24 * 60 / 25);
    for pair in fired.windows(2) {
        let gap = pair[1].1 - pair[0].1;
        assert!(gap >= Duration::minutes(15) && gap <= Duration::minutes(25));
    }
}

#[tokio::test]
async fn test_store_outage_does_not_stop_firing() {
    let clock = ManualClock::new(t0());
    let store = Arc::new(MemoryStore::new());
    let scheduler = Scheduler::new(store.clone(), Arc::new(clock.clone()), config(1));
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    scheduler
        .register(
            "drink_reminder",
            5,
            0,
            callback_fn(move |_| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

    store.set_fail_writes(true);
    clock.advance_minutes(5);
    let reports = scheduler.run_pending().await;
    assert_eq!(reports[0].outcome, FireOutcome::Completed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The next successful write carries the state that failed to persist.
    store.set_fail_writes(false);
    assert!(scheduler.persist());
    let saved = store.load_timers().unwrap();
    assert_eq!(
        saved["drink_reminder"].last_triggered.as_deref(),
        Some("2024-05-01T09:05:00+00:00")
    );
}
