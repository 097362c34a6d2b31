//! Flowgen CLI
//!
//! A thin driver over `flowgen-core` for exercising a worker by hand:
//! probing it, submitting runs and chats, and checking its environment.
//!
//! Logs go to stderr. Set RUST_LOG to override the configured level, e.g.
//! `RUST_LOG=flowgen::worker=debug` to see everything the worker logs.

mod args;
mod commands;
mod console;

use anyhow::{Context, Result};
use args::{Cli, Commands};
use clap::Parser;
use flowgen_core::{BridgeConfig, LoggingConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Probe { count } => commands::probe::execute(config, count, cli.verbose).await,
        Commands::Run {
            document,
            settings,
            json,
        } => {
            commands::run::execute(config, &document, settings.as_deref(), json, cli.verbose)
                .await
        }
        Commands::Chat { prompt, context } => {
            commands::chat::execute(config, prompt, context.as_deref(), cli.verbose).await
        }
        Commands::Check => commands::check::execute(&config, cli.verbose).await,
    }
}

/// Layer the config file, environment, and command-line overrides
fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = flowgen_core::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.apply_env_overrides()?;

    if let Some(worker) = &cli.worker {
        config.worker.program = worker.clone();
    }
    if let Some(dir) = &cli.working_dir {
        config.worker.working_dir = Some(dir.clone());
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
}
