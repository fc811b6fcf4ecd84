use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;

use commands::{ConfigCommand, FetchCommand, StatusCommand, WatchCommand};
use config::Config;

#[derive(Parser)]
#[command(name = "agrisync")]
#[command(version)]
#[command(about = "Live farm, crop and carbon-credit data from the terminal", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a resource live
    Watch(WatchCommand),

    /// Fetch a resource once
    Fetch(FetchCommand),

    /// Show backend connection status
    Status(StatusCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Save config path for config init
    let cli_config_path = cli.config.clone();

    // Load configuration
    let config = Config::load(cli.config)?;
    init_tracing(&config);

    match &cli.command {
        Some(Commands::Watch(cmd)) => {
            cmd.run(&config)?;
        }
        Some(Commands::Fetch(cmd)) => {
            cmd.run(&config)?;
        }
        Some(Commands::Status(cmd)) => {
            cmd.run(&config)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config, cli_config_path)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}

/// Logs to stderr so record output on stdout stays clean.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter.value));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
