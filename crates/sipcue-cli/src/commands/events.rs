use chrono::{Duration, Local, Utc};
use clap::Args;
use sipcue_core::{JsonFileStore, StateStore};

#[derive(Args)]
pub struct EventsArgs {
    /// How far back to look, in hours
    #[arg(long, default_value_t = 24)]
    hours: i64,
    /// Only show this condition (e.g. "drink", "empty")
    #[arg(long)]
    condition: Option<String>,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub fn run(args: EventsArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.hours <= 0 {
        return Err("--hours must be positive".into());
    }
    let store = JsonFileStore::open()?;
    let since = Utc::now() - Duration::hours(args.hours);

    let events: Vec<_> = store
        .recent_events(since)?
        .into_iter()
        .filter(|e| args.condition.as_ref().map_or(true, |c| &e.condition == c))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No events in the last {} hour(s).", args.hours);
        return Ok(());
    }
    for event in &events {
        let when = event.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        if event.payload.is_empty() {
            println!("{when}  {}", event.label());
        } else {
            let payload = serde_json::to_string(&event.payload)?;
            println!("{when}  {}  {payload}", event.label());
        }
    }
    println!("{} event(s)", events.len());
    Ok(())
}
