use chrono::{DateTime, Duration, Local, Utc};
use clap::Args;
use serde::Serialize;
use sipcue_core::scheduler::parse_timestamp;
use sipcue_core::{EventRecord, JsonFileStore, StateStore, TimerRecord};

const RECENT_EVENTS: usize = 5;

#[derive(Args)]
pub struct StatusArgs {
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct TimerView {
    name: String,
    active: bool,
    interval_minutes: u32,
    jitter_minutes: u32,
    last_triggered: Option<DateTime<Utc>>,
    next_trigger_time: Option<DateTime<Utc>>,
    /// Negative when overdue.
    seconds_until_next: Option<i64>,
}

impl TimerView {
    fn from_record(record: TimerRecord, now: DateTime<Utc>) -> Self {
        let next = record.next_trigger_time.as_deref().and_then(parse_timestamp);
        Self {
            active: record.is_active,
            interval_minutes: record.interval_minutes,
            jitter_minutes: record.jitter_minutes,
            last_triggered: record.last_triggered.as_deref().and_then(parse_timestamp),
            next_trigger_time: next,
            seconds_until_next: next.map(|t| (t - now).num_seconds()),
            name: record.name,
        }
    }
}

pub fn run(args: StatusArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonFileStore::open()?;
    let now = Utc::now();

    let mut timers: Vec<TimerView> = store
        .load_timers()?
        .into_values()
        .map(|record| TimerView::from_record(record, now))
        .collect();
    timers.sort_by(|a, b| a.name.cmp(&b.name));

    let events = store.recent_events(DateTime::<Utc>::MIN_UTC)?;
    let recent: Vec<EventRecord> = events
        .into_iter()
        .rev()
        .take(RECENT_EVENTS)
        .rev()
        .collect();

    if args.json {
        let body = serde_json::json!({ "timers": timers, "recent_events": recent });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if timers.is_empty() {
        println!("No timers saved yet. Start with `sipcue run`.");
    }
    for timer in &timers {
        let state = if timer.active { "active" } else { "inactive" };
        println!(
            "{} [{}] every {} min (±{})",
            timer.name, state, timer.interval_minutes, timer.jitter_minutes
        );
        match (timer.next_trigger_time, timer.seconds_until_next) {
            (Some(next), Some(secs)) if secs >= 0 => println!(
                "  next: {} (in {})",
                next.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                format_duration(Duration::seconds(secs))
            ),
            (Some(next), Some(secs)) => println!(
                "  next: {} (OVERDUE by {})",
                next.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                format_duration(Duration::seconds(-secs))
            ),
            _ => println!("  next: unknown"),
        }
        match timer.last_triggered {
            Some(last) => println!(
                "  last: {}",
                last.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("  last: never"),
        }
    }

    if !recent.is_empty() {
        println!();
        println!("Recent events:");
        for event in &recent {
            println!(
                "  {}  {}",
                event.timestamp.with_timezone(&Local).format("%H:%M:%S"),
                event.label()
            );
        }
    }
    Ok(())
}

/// Human-readable duration: `1h 05m`, `12m 30s` or `45s`.
pub fn format_duration(d: Duration) -> String {
    let total = d.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes:02}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}
