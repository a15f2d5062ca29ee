use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde_json::json;
use tessera_server::Engine;
use tessera_server::record::PutOptions;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_size, format_timestamp, print_json, truncate_string};

#[derive(Parser)]
pub struct RecordCommand {
    #[clap(subcommand)]
    pub command: RecordSubcommand,
}

#[derive(Subcommand)]
pub enum RecordSubcommand {
    #[clap(about = "Show a record")]
    Get(KeyArgs),

    #[clap(about = "List the saved versions of a record")]
    Versions(KeyArgs),

    #[clap(about = "Restore a record to a saved version")]
    Restore(RestoreArgs),

    #[clap(about = "Create or update a record")]
    Put(PutArgs),
}

#[derive(Parser)]
pub struct KeyArgs {
    #[clap(help = "Record key")]
    pub key: String,
}

#[derive(Parser)]
pub struct RestoreArgs {
    #[clap(help = "Record key")]
    pub key: String,

    #[clap(help = "Version number from `record versions`")]
    pub version: u64,
}

#[derive(Parser)]
pub struct PutArgs {
    #[clap(help = "Record key")]
    pub key: String,

    #[clap(help = "Record content")]
    pub content: String,

    #[clap(long, help = "Store as a write-once record")]
    pub immutable: bool,

    #[clap(long, help = "Record title")]
    pub title: Option<String>,

    #[clap(long = "tag", help = "Tag to attach (repeatable)")]
    pub tags: Vec<String>,

    #[clap(long, help = "Summary for the version this update creates")]
    pub summary: Option<String>,
}

impl RecordCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            RecordSubcommand::Get(args) => Self::get(engine, args, format).await,
            RecordSubcommand::Versions(args) => Self::versions(engine, args, format).await,
            RecordSubcommand::Restore(args) => Self::restore(engine, args, format).await,
            RecordSubcommand::Put(args) => Self::put(engine, args, format).await,
        }
    }

    async fn get(engine: &Engine, args: &KeyArgs, format: OutputFormat) -> CliResult<()> {
        let record = engine.records().get(&args.key).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&record)?)?,
            OutputFormat::Table => {
                println!("Key:        {}", record.key);
                println!("ID:         {}", record.id);
                if let Some(ref title) = record.title {
                    println!("Title:      {title}");
                }
                println!("Tier:       {}", record.tier);
                println!("Immutable:  {}", record.immutable);
                if !record.tags.is_empty() {
                    let tags: Vec<&str> = record.tags.iter().map(String::as_str).collect();
                    println!("Tags:       {}", tags.join(", "));
                }
                for (name, value) in &record.attributes {
                    println!("  {name} = {value}");
                }
                println!("Created:    {}", format_timestamp(&record.created_at));
                println!("Updated:    {}", format_timestamp(&record.updated_at));
                println!("Reads:      {}", record.access_count);
                if let Some(ref signature) = record.signature {
                    println!("Signature:  {signature}");
                }
                println!("\n{}", record.content);
            }
        }
        Ok(())
    }

    async fn versions(engine: &Engine, args: &KeyArgs, format: OutputFormat) -> CliResult<()> {
        let versions = engine.records().list_versions(&args.key).await?;

        match format {
            OutputFormat::Json => print_json(&json!({
                "key": args.key,
                "versions": versions,
            }))?,
            OutputFormat::Table => {
                if versions.is_empty() {
                    println!("No saved versions for '{}'.", args.key);
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Version", "Created", "Size", "Summary"]);
                for version in &versions {
                    table.add_row([
                        version.number.to_string(),
                        format_timestamp(&version.created_at),
                        format_size(version.size_bytes),
                        truncate_string(&version.summary, 60),
                    ]);
                }
                println!("{table}");
            }
        }
        Ok(())
    }

    async fn restore(engine: &Engine, args: &RestoreArgs, format: OutputFormat) -> CliResult<()> {
        let restored = engine.records().restore(&args.key, args.version).await?;

        match format {
            OutputFormat::Json => print_json(&json!({
                "key": args.key,
                "version": args.version,
                "restored": restored,
            }))?,
            OutputFormat::Table => {
                println!("Restored '{}' to version {}.", args.key, args.version);
            }
        }
        Ok(())
    }

    async fn put(engine: &Engine, args: &PutArgs, format: OutputFormat) -> CliResult<()> {
        let mut options = if args.immutable {
            PutOptions::immutable()
        } else {
            PutOptions::default()
        };
        if !args.tags.is_empty() {
            options = options.with_tags(args.tags.iter().cloned());
        }
        if let Some(ref title) = args.title {
            options = options.with_title(title.clone());
        }
        if let Some(ref summary) = args.summary {
            options = options.with_summary(summary.clone());
        }

        let outcome = engine.records().put(&args.key, &args.content, options).await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&outcome)?)?,
            OutputFormat::Table => {
                println!("Stored '{}' in tier '{}'.", outcome.key, outcome.tier);
                if let Some(version) = outcome.superseded_version {
                    println!("Previous content saved as version {version}.");
                }
            }
        }
        Ok(())
    }
}
