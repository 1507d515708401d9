mod cli;
mod commands;
mod loader;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Start { seed, plugins, loopback } => {
            commands::start(seed, plugins, loopback).await
        }
        Command::Validate { seed } => commands::validate(seed).await,
        Command::Render { seed, request } => commands::render(seed, request).await,
        Command::Status { seed, request } => commands::status(seed, request).await,
    }
}
