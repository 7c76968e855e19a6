//! FluxKV server binary.
//!
//! `fluxkv serve --config <path>` loads the YAML configuration, starts every
//! enabled transport, and runs until SIGINT, then shuts down in order:
//! transports, batch writer, stores.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use fluxkv::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fluxkv", version, about = "High-throughput key-value storage front end")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the server from a configuration file.
    Serve {
        /// Path to the YAML configuration document.
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(config).await,
    }
}

async fn serve(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.logger.level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = fluxkv::VERSION, "Starting FluxKV");

    let server = Server::new(&config).context("building server")?;
    server.start().await.context("starting transports")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received, stopping server...");

    server.stop().await.context("stopping server")?;
    info!("Server shutdown complete");
    Ok(())
}
