use std::collections::BTreeSet;

use chrono::Duration;
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use serde_json::json;
use tessera_server::Engine;
use tessera_server::access::Permission;

use crate::error::CliResult;
use crate::output::{OutputFormat, format_timestamp, print_json};

#[derive(Parser)]
pub struct KeysCommand {
    #[clap(subcommand)]
    pub command: KeysSubcommand,
}

#[derive(Subcommand)]
pub enum KeysSubcommand {
    #[clap(about = "Issue a new API key")]
    Issue(IssueArgs),

    #[clap(about = "List issued keys (secrets are shortened)")]
    List,

    #[clap(about = "Revoke an API key")]
    Revoke(RevokeArgs),
}

#[derive(Parser)]
pub struct IssueArgs {
    #[clap(help = "Who the key belongs to")]
    pub owner: String,

    #[clap(long, help = "Grant admin permission (implies read and write)")]
    pub admin: bool,

    #[clap(long, help = "Grant read permission only", conflicts_with = "admin")]
    pub read_only: bool,

    #[clap(long, help = "Lifetime in days (defaults to auth.key_ttl_days)")]
    pub ttl_days: Option<i64>,
}

#[derive(Parser)]
pub struct RevokeArgs {
    #[clap(help = "The full API key")]
    pub key: String,
}

impl KeysCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        match &self.command {
            KeysSubcommand::Issue(args) => Self::issue(engine, args, format).await,
            KeysSubcommand::List => Self::list(engine, format),
            KeysSubcommand::Revoke(args) => Self::revoke(engine, args, format).await,
        }
    }

    async fn issue(engine: &Engine, args: &IssueArgs, format: OutputFormat) -> CliResult<()> {
        let permissions = if args.admin {
            Some(BTreeSet::from([Permission::Admin]))
        } else if args.read_only {
            Some(BTreeSet::from([Permission::Read]))
        } else {
            None
        };
        let ttl = match args.ttl_days {
            Some(days) => Some(
                Duration::try_days(days).ok_or_else(|| format!("--ttl-days {days} is out of range"))?,
            ),
            None => None,
        };

        let key = engine
            .gatekeeper()
            .issue_key(&args.owner, ttl, permissions)
            .await?;

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&key)?)?,
            OutputFormat::Table => {
                let permissions: Vec<String> = key.permissions.iter().map(|p| p.to_string()).collect();
                println!("{}", key.key);
                println!();
                println!("Owner:       {}", key.owner);
                println!("Permissions: {}", permissions.join(", "));
                println!("Expires:     {}", format_timestamp(&key.expires_at));
                println!("\nStore this key now; it is not shown again.");
                println!("A running daemon picks it up on its next restart.");
            }
        }
        Ok(())
    }

    fn list(engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let keys = engine.gatekeeper().list_keys();

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&keys)?)?,
            OutputFormat::Table => {
                if keys.is_empty() {
                    println!("No API keys issued.");
                    return Ok(());
                }

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Key", "Owner", "Permissions", "Expires", "Status"]);
                for info in &keys {
                    let permissions: Vec<String> =
                        info.permissions.iter().map(|p| p.to_string()).collect();
                    table.add_row([
                        info.key_prefix.clone(),
                        info.owner.clone(),
                        permissions.join(", "),
                        format_timestamp(&info.expires_at),
                        if info.expired { "expired" } else { "active" }.to_string(),
                    ]);
                }
                println!("{table}");
            }
        }
        Ok(())
    }

    async fn revoke(engine: &Engine, args: &RevokeArgs, format: OutputFormat) -> CliResult<()> {
        if !engine.gatekeeper().revoke_key(&args.key).await? {
            return Err("No such API key".into());
        }

        match format {
            OutputFormat::Json => print_json(&json!({ "revoked": true }))?,
            OutputFormat::Table => println!("Key revoked."),
        }
        Ok(())
    }
}
