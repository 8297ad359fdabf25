//! chanwatch CLI
//!
//! Monitors an imageboard's thread index and captures changed threads.

use std::path::PathBuf;
use std::time::Duration;

use chanwatch::{
    error::Result,
    models::{Config, LoggingConfig},
    pipeline::{CaptureOutcome, Requester},
};
use clap::{Parser, Subcommand};

/// chanwatch - Imageboard Thread Monitor
#[derive(Parser, Debug)]
#[command(name = "chanwatch", version, about = "Imageboard thread index monitor")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "chanwatch.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor boards until interrupted with Ctrl+C
    Monitor,

    /// Fetch and save the board index
    Boards,

    /// Fetch and save one board's thread listing
    Board {
        /// Board code (e.g., "g")
        code: String,
    },

    /// Fetch one thread and merge it into storage
    Thread {
        /// Board code (e.g., "g")
        board: String,
        /// Thread id
        id: u64,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging based on verbosity flag and configured level.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = Config::load(&cli.config);
    let level = match &loaded {
        Ok(config) => config.logging.level.clone(),
        Err(_) => LoggingConfig::default().level,
    };
    init_logging(cli.verbose, &level);

    log::info!("chanwatch starting...");

    let config = match loaded {
        Ok(config) => config,
        // `validate` never falls back to defaults
        Err(e) if matches!(cli.command, Command::Validate) => {
            log::error!("Config load failed from {:?}: {}", cli.config, e);
            return Err(e);
        }
        Err(e) => {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                cli.config,
                e
            );
            Config::default()
        }
    };

    match cli.command {
        Command::Monitor => {
            let mut requester = Requester::from_config(&config)?;
            requester.begin_monitoring()?;
            log::info!("Monitoring started. Press Ctrl+C to stop.");

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    signal = &mut ctrl_c => {
                        signal?;
                        log::info!("Shutting down...");
                        break;
                    }
                    _ = tick.tick() => {
                        // the loop exits on its own only after a discovery failure
                        if !requester.is_monitoring() {
                            break;
                        }
                    }
                }
            }
            requester.end_monitoring().await?;
        }

        Command::Boards => {
            let requester = Requester::from_config(&config)?;
            let index = requester.save_board_index().await?;
            log::info!("Saved board index with {} boards", index.boards.len());
        }

        Command::Board { code } => {
            let requester = Requester::from_config(&config)?;
            let listing = requester.save_board_listing(&code).await?;
            log::info!(
                "Saved listing of /{}/ with {} threads on {} pages",
                code,
                listing.thread_count(),
                listing.0.len()
            );
        }

        Command::Thread { board, id } => {
            let requester = Requester::from_config(&config)?;
            match requester.capture_thread(&board, &id.to_string()).await? {
                CaptureOutcome::Created => log::info!("Saved new thread /{}/{}", board, id),
                CaptureOutcome::Merged => log::info!("Merged thread /{}/{}", board, id),
                CaptureOutcome::Gone => log::warn!("Thread /{}/{} is gone", board, id),
                CaptureOutcome::Recovered => {
                    log::warn!("Replaced unreadable copy of /{}/{}", board, id)
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration {:?}...", cli.config);

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }
    }

    log::info!("Done!");

    Ok(())
}
