use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde_json::json;
use tessera_server::Engine;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_size, format_timestamp, print_json};

#[derive(Parser)]
pub struct BackupCommand {
    #[clap(subcommand)]
    pub command: BackupSubcommand,
}

#[derive(Subcommand)]
pub enum BackupSubcommand {
    #[clap(about = "Snapshot every persistent tier")]
    Create(CreateArgs),

    #[clap(about = "List backups, newest first")]
    List,

    #[clap(about = "Replace live data with a backup (a pre_restore backup is taken first)")]
    Restore(RestoreArgs),

    #[clap(about = "Delete backups older than the retention period")]
    Prune(PruneArgs),
}

#[derive(Parser)]
pub struct CreateArgs {
    #[clap(long = "type", default_value = "manual", help = "Backup type tag")]
    pub backup_type: String,
}

#[derive(Parser)]
pub struct RestoreArgs {
    #[clap(help = "Backup name from `backup list`")]
    pub name: String,
}

#[derive(Parser)]
pub struct PruneArgs {
    #[clap(long, help = "Retention in days (defaults to backup.retention_days)")]
    pub days: Option<u64>,
}

impl BackupCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            BackupSubcommand::Create(args) => Self::create(engine, args, format).await,
            BackupSubcommand::List => Self::list(engine, format).await,
            BackupSubcommand::Restore(args) => Self::restore(engine, args, format).await,
            BackupSubcommand::Prune(args) => Self::prune(engine, args, format).await,
        }
    }

    async fn create(engine: &Engine, args: &CreateArgs, format: OutputFormat) -> CliResult<()> {
        let manifest = engine.backups().create(&args.backup_type).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&manifest)?)?,
            OutputFormat::Table => {
                let records: usize = manifest.tiers.iter().map(|t| t.record_count).sum();
                println!(
                    "Created backup '{}' ({} records, {}).",
                    manifest.name,
                    records,
                    format_size(manifest.total_size_bytes)
                );
            }
        }
        Ok(())
    }

    async fn list(engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let backups = engine.backups().list().await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&backups)?)?,
            OutputFormat::Table => {
                if backups.is_empty() {
                    println!("No backups found.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Name", "Type", "Created", "Records", "Size"]);
                for manifest in &backups {
                    let records: usize = manifest.tiers.iter().map(|t| t.record_count).sum();
                    table.add_row([
                        manifest.name.clone(),
                        manifest.backup_type.clone(),
                        format_timestamp(&manifest.created_at),
                        records.to_string(),
                        format_size(manifest.total_size_bytes),
                    ]);
                }
                println!("{table}");
                println!("\nTotal: {} backups", backups.len());
            }
        }
        Ok(())
    }

    async fn restore(engine: &Engine, args: &RestoreArgs, format: OutputFormat) -> CliResult<()> {
        let restored = engine.backups().restore(&args.name).await?;

        match format {
            OutputFormat::Json => print_json(&json!({
                "name": args.name,
                "restored": restored,
            }))?,
            OutputFormat::Table => {
                println!("Restored backup '{}'.", args.name);
                println!("The previous state was saved as a pre_restore backup.");
            }
        }
        Ok(())
    }

    async fn prune(engine: &Engine, args: &PruneArgs, format: OutputFormat) -> CliResult<()> {
        let days = args
            .days
            .unwrap_or(engine.config().backup.retention_days);
        let report = engine.backups().prune(days).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&report)?)?,
            OutputFormat::Table => {
                for name in &report.removed {
                    println!("Removed {name}");
                }
                if report.failures > 0 {
                    eprintln!("{} backups could not be removed; see the log.", report.failures);
                }
                println!(
                    "Pruned {} backups older than {days} days; {} kept.",
                    report.removed.len(),
                    report.kept
                );
            }
        }
        Ok(())
    }
}
