//! Veneer CLI: composite a still overlay onto a video.
//!
//! Usage:
//!   veneer export <VIDEO> --overlay <PNG> -o <OUT>   Export with the overlay
//!   veneer probe <VIDEO>                             Describe an input video
//!   veneer check                                     Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use veneer_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "veneer",
    about = "Blend an image overlay onto every frame of a video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Load configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a video with an overlay composited onto every frame
    Export(commands::export::ExportArgs),

    /// Describe a video: geometry, rotation, codecs, and the output size
    Probe {
        /// Path to the video
        path: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .map_err(|e| anyhow::anyhow!("Failed to load config {}: {e}", path.display()))?,
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    veneer_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Export(args) => commands::export::run(args, config.export).await,
        Commands::Probe { path, json } => commands::probe::run(path, json),
        Commands::Check => commands::check::run(&config.export),
    }
}
