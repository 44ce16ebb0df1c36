use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::Args;
use sipcue_core::{Config, ReminderSet, StaticSensors};

#[derive(Args)]
pub struct RunArgs {
    /// Seconds between scheduler passes (overrides scheduler.tick_secs)
    #[arg(long)]
    tick_secs: Option<u64>,
    /// Start with the bottle reported empty
    #[arg(long)]
    empty: bool,
    /// Start with the bottle reported tilted
    #[arg(long)]
    tilted: bool,
}

pub fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    if let Some(secs) = args.tick_secs {
        config.scheduler.tick_secs = secs.max(1);
    }

    let sensors = Arc::new(StaticSensors::default());
    sensors.set_empty(args.empty);
    sensors.set_vertical(!args.tilted);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let reminders = ReminderSet::open(config, sensors)?;

        let unexpected = reminders.startup();
        if unexpected > 0 {
            println!("recovered from {unexpected} unexpected shutdown(s)");
        }
        if args.empty {
            reminders.bottle_emptied();
        }
        if args.tilted {
            reminders.orientation_changed(false);
        }

        let drink = reminders.refresh_drink_interval();
        println!("sipcue running (drink interval {drink} min), press Ctrl-C to stop");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut rollover = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                res = &mut ctrl_c => {
                    if let Err(e) = res {
                        log::error!("failed to listen for Ctrl-C: {}", e);
                    }
                    break;
                }
                _ = rollover.tick() => {
                    reminders.check_daily_rollover(Local::now().date_naive());
                }
            }
        }

        reminders.shutdown("user_interrupt").await;
        println!("stopped");
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
