//! livecap CLI: drive capture sessions from the command line.
//!
//! Usage:
//!   livecap record [OPTIONS]    Record a synthetic test pattern and tone
//!   livecap info <SUMMARY>      Show a finished session's summary
//!   livecap check               Check encoder availability and configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use livecap_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "livecap",
    about = "Real-time audio/video capture through an external encoder",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a synthetic session (moving colour bars and a sine tone)
    Record {
        /// Recording length in seconds
        #[arg(short, long, default_value = "5.0")]
        duration: f64,

        /// Frame width (rounded up to a multiple of 32)
        #[arg(long, default_value = "640")]
        width: u32,

        /// Frame height (rounded up to a multiple of 2)
        #[arg(long, default_value = "360")]
        height: u32,

        /// Frame rate as NUM or NUM/DEN; defaults to the configured rate
        #[arg(long)]
        fps: Option<String>,

        /// Output directory; defaults to the configured directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip the audio track
        #[arg(long)]
        no_audio: bool,
    },

    /// Show a session summary
    Info {
        /// Path to a session's `.json` summary
        path: PathBuf,
    },

    /// Check encoder availability and the effective configuration
    Check {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write_config: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    livecap_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Record {
            duration,
            width,
            height,
            fps,
            output,
            no_audio,
        } => commands::record::run(
            config.capture,
            commands::record::RecordOptions {
                duration_secs: duration,
                width,
                height,
                fps,
                output,
                audio: !no_audio,
            },
        ),
        Commands::Info { path } => commands::info::run(path),
        Commands::Check { write_config } => commands::check::run(&config, write_config),
    }
}
