//! Astrolabe CLI, the developer entry point.
//!
//! Commands:
//! - `extract` : Pull tool calls out of model text
//! - `replay`  : Run the conversation loop against a scripted model
//! - `config`  : Show, validate, or locate the configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "astrolabe",
    about = "Astrolabe: tool-augmented conversation engine",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.astrolabe/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract tool calls from model text (file or stdin)
    Extract {
        /// Input file; reads stdin when omitted
        file: Option<PathBuf>,

        /// Also print the text with tool-call scaffolding removed
        #[arg(long)]
        scrub: bool,
    },

    /// Replay a scripted conversation and print events as JSON lines
    Replay {
        /// JSON script with model turns and canned tool results
        script: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Check the configuration for errors
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Extract { file, scrub } => commands::extract::run(file.as_deref(), scrub)?,
        Commands::Replay { script } => commands::replay::run(&script, config_path).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
        },
    }

    Ok(())
}
