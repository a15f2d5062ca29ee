//! Tessera daemon - HTTP API and background maintenance over one data directory

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use tessera_server::Engine;
use tessera_server::api::ApiServer;
use tessera_server::config::Config;
use tessera_server::error::Result;

/// Tessera - tiered knowledge store with versioned and write-once records
#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "A tiered knowledge store with versioned and write-once records")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP API (default command)
    #[command(name = "serve")]
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        listen: Option<String>,

        /// Override the configured data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        None => serve(cli.config, None, None).await,
        Some(Command::Serve { listen, data_dir }) => serve(cli.config, listen, data_dir).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tessera=debug,tessera_server=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    data_dir: Option<PathBuf>,
) -> Result<()> {
    tracing::info!("Starting Tessera daemon");

    let mut config = Config::discover(config_path.as_deref())?;
    if let Some(listen) = listen {
        config.server.listen_addr = listen;
    }
    if let Some(data_dir) = data_dir {
        config.storage.data_dir = data_dir;
    }
    tracing::debug!("Config loaded: {:?}", config);

    let engine = Arc::new(Engine::open(&config).await?);
    let maintenance = engine.start_maintenance();

    let result = ApiServer::new(engine.clone()).serve().await;

    engine.close();
    if let Err(e) = maintenance.await {
        tracing::warn!("Maintenance task ended abnormally: {e}");
    }

    tracing::info!("Tessera daemon stopped");
    result
}
