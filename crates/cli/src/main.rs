//! FocusLens CLI: the main entry point.
//!
//! Commands:
//! - `run`       Read focus events from stdin and print a context block per event
//! - `context`   Run a single cycle for one subject
//! - `status`    Show knowledge store statistics
//! - `decay`     Decay stale acquired knowledge and persist
//! - `onboard`   Write a default config file
//! - `config`    Show or validate the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "focuslens",
    about = "FocusLens — ambient activity context for generative assistants",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Read `subject[<TAB>image-path]` lines from stdin, one cycle per line
    Run,

    /// Run one cycle and print the context block
    Context {
        /// Focused window title or other subject
        subject: String,

        /// Screenshot of the focused window (png, jpeg, webp or gif)
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Show knowledge store statistics
    Status,

    /// Decay stale acquired knowledge
    Decay,

    /// Write a default configuration file
    Onboard,

    /// Show the effective configuration
    Config {
        /// Only validate, print nothing on success
        #[arg(long)]
        validate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays a clean stream of context blocks.
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run => commands::run::run().await?,
        Commands::Context { subject, image } => commands::context::run(subject, image).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Decay => commands::decay::run().await?,
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Config { validate } => {
            if validate {
                commands::config_cmd::validate().await?
            } else {
                commands::config_cmd::show().await?
            }
        }
    }

    Ok(())
}
