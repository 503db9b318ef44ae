//! CLI entry point for the transfer tool.

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info};

mod app;
mod cli;

use app::config::{default_log_level, load_default_file_config};
use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Config errors surface after the subscriber is installed.
    let file_config = load_default_file_config();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info
    let default_level = default_log_level(
        args.quiet,
        args.verbose,
        file_config.as_ref().ok().and_then(Option::as_ref),
    );
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let file_config = file_config?;

    debug!(?args, "CLI arguments parsed");
    info!(url = %args.command.request().url, "transfer starting");

    app::run(&args.command, args.quiet, file_config.as_ref()).await
}
