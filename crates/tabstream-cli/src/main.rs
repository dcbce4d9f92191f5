//! tabstream - stream parquet datasets as CSV, JSON or parquet
//!
//! Serves datasets over HTTP, runs function-runtime events locally, and
//! fetches single datasets to a file.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::MultiProgress;
use tabstream_core::{locator_from_config, Config, StreamPipeline};

mod cmd;
mod config;

use config::Overrides;

#[derive(Parser)]
#[command(name = "tabstream")]
#[command(about = "Stream parquet datasets as CSV, JSON or parquet")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Config file path (default: ./tabstream.toml or ~/.config/tabstream/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP download service
    Serve(cmd::serve::ServeArgs),
    /// Stream one dataset to a file or stdout
    Fetch(cmd::fetch::FetchArgs),
    /// Run the function handler on an event file, body to stdout
    Invoke(cmd::invoke::InvokeArgs),
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Progress output only for interactive fetches
    let multi = match &cli.command {
        Command::Fetch(_) if std::io::stderr().is_terminal() => Some(MultiProgress::new()),
        _ => None,
    };
    tabstream_core::init_logging(cli.quiet, cli.debug, multi.as_ref());

    let mut config = match &cli.config {
        Some(path) => config::from_file(path)?,
        None => config::load()?,
    };
    cli.overrides.apply(&mut config);

    match cli.command {
        Command::Serve(args) => cmd::serve::run(args, build_pipeline(config).await?).await,
        Command::Fetch(args) => {
            cmd::fetch::run(args, build_pipeline(config).await?, multi).await
        }
        Command::Invoke(args) => cmd::invoke::run(args, build_pipeline(config).await?).await,
        Command::Config => {
            cmd::config::run(&config);
            Ok(())
        }
    }
}

/// Validate once and wire the storage locator into a shared pipeline.
async fn build_pipeline(config: Config) -> Result<Arc<StreamPipeline>> {
    config.validate()?;
    let locator = locator_from_config(&config.storage)
        .await
        .context("Failed to initialise dataset storage")?;
    log::info!("Serving datasets from {}", locator.describe());
    Ok(Arc::new(StreamPipeline::new(
        Arc::from(locator),
        Arc::new(config),
    )))
}
