use clap::Subcommand;
use sipcue_core::{compute_interval, ignored_count_interval, Config};

#[derive(Subcommand)]
pub enum IntervalAction {
    /// Interval for a dehydration level (continuous feedback)
    Level {
        /// Dehydration level, 0 = on track
        level: f64,
        /// Base interval in minutes [default: drink_reminder.base]
        #[arg(long)]
        base: Option<u32>,
        /// Shortest interval in minutes [default: drink_reminder.limit]
        #[arg(long)]
        limit: Option<u32>,
        /// Level at which the interval reaches the limit
        #[arg(long, default_value_t = 3.0)]
        level_max: f64,
    },
    /// Interval after a number of ignored reminders (discrete feedback)
    Ignored {
        /// How many reminders in a row went unresolved
        count: u32,
        /// Base interval in minutes [default: empty_reminder.base]
        #[arg(long)]
        base: Option<u32>,
        /// Shortest interval in minutes [default: empty_reminder.limit]
        #[arg(long)]
        limit: Option<u32>,
        /// Minutes removed per ignored reminder [default: empty_reminder.step]
        #[arg(long)]
        step: Option<u32>,
    },
}

pub fn run(action: IntervalAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();

    match action {
        IntervalAction::Level {
            level,
            base,
            limit,
            level_max,
        } => {
            let base = base.unwrap_or(config.drink_reminder.base);
            let limit = limit.unwrap_or(config.drink_reminder.limit);
            if !level.is_finite() || !level_max.is_finite() || level_max <= 0.0 {
                return Err("level and --level-max must be finite, --level-max positive".into());
            }
            check_bounds(base, limit)?;
            println!("{} min", compute_interval(level, base, limit, level_max));
        }
        IntervalAction::Ignored {
            count,
            base,
            limit,
            step,
        } => {
            let base = base.unwrap_or(config.empty_reminder.base);
            let limit = limit.unwrap_or(config.empty_reminder.limit);
            let step = step.unwrap_or(config.empty_reminder.step);
            check_bounds(base, limit)?;
            println!("{} min", ignored_count_interval(count, base, limit, step));
        }
    }
    Ok(())
}

fn check_bounds(base: u32, limit: u32) -> Result<(), String> {
    if limit == 0 || limit > base {
        return Err(format!("need 0 < limit <= base (got limit {limit}, base {base})"));
    }
    Ok(())
}
