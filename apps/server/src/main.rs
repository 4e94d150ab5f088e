//! Helix Server - Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use helix_server::config::{Config, Overrides};
use helix_server::logging;

/// Helix - asynchronous training jobs over HTTP
#[derive(Parser, Debug)]
#[command(name = "helix-server", author, version, about = "Helix training service")]
struct Args {
    /// Configuration file (defaults to ./helix.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind, e.g. 0.0.0.0:8000
    #[arg(short, long)]
    address: Option<String>,

    /// Log filter (trace, debug, info, warn, error, or EnvFilter directives)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let overrides = Overrides { address: args.address.clone(), log_filter: args.log_level.clone() };
    let config = Config::load(args.config.as_deref(), &overrides).context("failed to load configuration")?;
    logging::init(&config.logging, args.log_level.is_some())?;

    helix_server::serve(config).await
}
