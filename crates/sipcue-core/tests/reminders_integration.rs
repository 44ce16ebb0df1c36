//! Integration tests for the standard reminder set.
//!
//! Runs whole sessions against the JSON file store to check what survives a
//! restart and a session reset.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use sipcue_core::reminders::{DRINK_REMINDER, EMPTY_REMINDER};
use sipcue_core::{
    Clock, Config, JsonFileStore, LocalTime, ManualClock, ReminderSet, StateStore, StaticSensors,
};
use tempfile::TempDir;

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn open_set(dir: &TempDir, clock: &ManualClock) -> (ReminderSet, Arc<JsonFileStore>) {
    let store = Arc::new(JsonFileStore::new(dir.path()).unwrap());
    let mut config = Config::default();
    config.scheduler.jitter_seed = Some(11);
    let set = ReminderSet::new(
        config,
        store.clone(),
        Arc::new(clock.clone()),
        Arc::new(StaticSensors::default()),
        LocalTime::Fixed(FixedOffset::east_opt(0).unwrap()),
    )
    .unwrap();
    (set, store)
}

#[tokio::test]
async fn test_session_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(noon());

    let empty_next = {
        let (set, _) = open_set(&dir, &clock);
        set.startup();
        set.record_drink(400.0);
        set.bottle_emptied();
        set.shutdown("user_quit").await;
        set.scheduler().timer_status(EMPTY_REMINDER).unwrap().next_trigger_time
    };

    clock.advance_minutes(3);
    let (set, store) = open_set(&dir, &clock);
    assert_eq!(set.daily_consumed_ml(), 400.0);
    assert_eq!(set.counter().count("drink", None), 1);

    let empty = set.scheduler().timer_status(EMPTY_REMINDER).unwrap();
    assert!(empty.active);
    assert_eq!(empty.next_trigger_time, empty_next);

    assert_eq!(set.startup(), 0);
    set.shutdown("test").await;

    let app_state = store.load_app_state().unwrap();
    assert!(app_state.contains_key("event_counts"));
    assert!(app_state.contains_key("lifetime_stats"));
    assert_eq!(app_state["last_daily_reset"], "2024-05-01");
}

#[tokio::test]
async fn test_session_reset_keeps_lifetime_stats() {
    let dir = TempDir::new().unwrap();
    let clock = ManualClock::new(noon());
    {
        let (set, _) = open_set(&dir, &clock);
        set.startup();
        set.record_drink(250.0);
        set.shutdown("user_quit").await;
    }

    let store = JsonFileStore::new(dir.path()).unwrap();
    store.reset_session_data(true).unwrap();

    let (set, store) = open_set(&dir, &clock);
    assert_eq!(set.daily_consumed_ml(), 0.0);
    assert_eq!(set.counter().count("app_started", None), 0);
    let stats = &store.load_app_state().unwrap()["lifetime_stats"];
    assert_eq!(stats["total_sessions"], 1);
    assert_eq!(stats["total_drink_events"], 1);

    // Timers start fresh after a reset, at the interval for today's deficit.
    let drink = set.scheduler().timer_status(DRINK_REMINDER).unwrap();
    let expected = set.refresh_drink_interval();
    assert!(expected < 45);
    assert_eq!(drink.interval_minutes, expected);
    assert!(drink.next_trigger_time > clock.now());
    assert!(drink.next_trigger_time <= clock.now() + Duration::minutes(i64::from(expected) + 5));
}

#[tokio::test]
async fn test_foreign_app_state_fields_are_preserved() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("app_state.json"),
        r#"{ "bottle_weight": 312.5, "event_counts": { "drink": 4 } }"#,
    )
    .unwrap();

    let clock = ManualClock::new(noon());
    let (set, store) = open_set(&dir, &clock);
    assert_eq!(set.counter().count("drink", None), 4);
    set.record_drink(100.0);

    let app_state = store.load_app_state().unwrap();
    assert_eq!(app_state["bottle_weight"], 312.5);
    assert_eq!(app_state["event_counts"]["drink"], 5);
    assert_eq!(app_state["daily_consumed_ml"], 100.0);
}
