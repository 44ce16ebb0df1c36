use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sipcue", version, about = "Adaptive hydration reminders")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reminder loop until Ctrl-C
    Run(commands::run::RunArgs),
    /// Show persisted timer states and recent events
    Status(commands::status::StatusArgs),
    /// List recorded events
    Events(commands::events::EventsArgs),
    /// Reset session data
    Reset(commands::reset::ResetArgs),
    /// Preview reminder intervals
    Interval {
        #[command(subcommand)]
        action: commands::interval::IntervalAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Status(args) => commands::status::run(args),
        Commands::Events(args) => commands::events::run(args),
        Commands::Reset(args) => commands::reset::run(args),
        Commands::Interval { action } => commands::interval::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
