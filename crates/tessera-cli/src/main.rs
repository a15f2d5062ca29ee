use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tessera_cli::commands::{BackupCommand, KeysCommand, RecordCommand, StatsCommand};
use tessera_cli::error::CliResult;
use tessera_cli::output::OutputFormat;
use tessera_server::Engine;
use tessera_server::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tessera-cli")]
#[command(about = "Tessera CLI - Operator tool for a Tessera data directory")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Show tier and operation statistics")]
    Stats(StatsCommand),

    #[clap(about = "Record and version commands")]
    Record(RecordCommand),

    #[clap(about = "Backup and restore commands")]
    Backup(BackupCommand),

    #[clap(about = "API key management")]
    Keys(KeysCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    // Diagnostics go to stderr so JSON output stays parseable
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir.clone() {
        config.storage.data_dir = data_dir;
    }
    let engine = Engine::open(&config).await?;

    let result = match &cli.command {
        Command::Stats(cmd) => cmd.execute(&engine, format).await,
        Command::Record(cmd) => cmd.execute(&engine, format).await,
        Command::Backup(cmd) => cmd.execute(&engine, format).await,
        Command::Keys(cmd) => cmd.execute(&engine, format).await,
    };

    engine.close();
    result
}
