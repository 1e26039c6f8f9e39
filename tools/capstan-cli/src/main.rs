//! Capstan CLI: record the screen and audio from the command line.
//!
//! Usage:
//!   capstan record [OPTIONS]   Record until Ctrl+C or --duration elapses
//!   capstan check              Check ffmpeg and capture element availability

use std::path::PathBuf;

use capstan_common::config::AppConfig;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "capstan",
    about = "Screen and audio recording through ffmpeg",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file (defaults to the per-user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a session
    Record(commands::record::RecordArgs),

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app_config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    let mut logging = app_config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    logging.json |= cli.log_json;
    capstan_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record(args) => commands::record::run(args, app_config).await,
        Commands::Check => commands::check::run(&app_config),
    }
}
