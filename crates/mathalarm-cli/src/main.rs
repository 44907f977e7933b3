use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "mathalarm", version, about = "Alarms you silence by solving arithmetic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Alarm management
    Alarm {
        #[command(subcommand)]
        action: commands::alarm::AlarmAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Generate and check puzzles
    Puzzle {
        #[command(subcommand)]
        action: commands::puzzle::PuzzleAction,
    },
    /// Reconcile stored alarm status with the clock
    Recover,
    /// Purge old terminal alarms and puzzles
    Cleanup,
    /// Run in the foreground: ring alarms and read answers from stdin
    Run(commands::run::RunArgs),
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("MATHALARM_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Alarm { action } => commands::alarm::run(action),
        Commands::Config { action } => commands::config::run(action),
        Commands::Puzzle { action } => commands::puzzle::run(action),
        Commands::Recover => commands::maintenance::recover(),
        Commands::Cleanup => commands::maintenance::cleanup(),
        Commands::Run(args) => commands::run::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
