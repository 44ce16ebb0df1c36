use std::io::{self, BufRead, Write};

use clap::Args;
use sipcue_core::storage::{EVENT_COUNTS_KEY, LIFETIME_STATS_KEY};
use sipcue_core::{JsonFileStore, StateStore};

#[derive(Args)]
pub struct ResetArgs {
    /// Also clear lifetime statistics
    #[arg(long)]
    complete: bool,
    /// Skip the confirmation prompt
    #[arg(long)]
    confirm: bool,
}

pub fn run(args: ResetArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonFileStore::open()?;
    let app_state = store.load_app_state()?;

    let consumed = app_state
        .get("daily_consumed_ml")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let tracked = app_state
        .get(EVENT_COUNTS_KEY)
        .and_then(|v| v.as_object())
        .map_or(0, |m| m.len());
    println!("Data directory: {}", store.dir().display());
    println!("Today's consumption: {consumed:.0} ml");
    println!("Tracked conditions: {tracked}");
    if let Some(stats) = app_state.get(LIFETIME_STATS_KEY) {
        println!("Lifetime stats: {stats}");
    }

    let kind = if args.complete {
        "ALL data including lifetime stats"
    } else {
        "session data (lifetime stats are kept)"
    };

    if !args.confirm {
        print!("Reset {kind}? (y/N): ");
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("cancelled");
            return Ok(());
        }
    }

    store.reset_session_data(!args.complete)?;
    println!("reset {kind}");
    Ok(())
}
