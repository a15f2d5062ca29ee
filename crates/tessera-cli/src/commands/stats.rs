use clap::Parser;
use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use tessera_server::Engine;

use crate::error::CliResult;
use crate::output::{OutputFormat, print_json};

#[derive(Parser)]
pub struct StatsCommand {
    #[clap(long, help = "Include per-operation timings")]
    pub operations: bool,
}

impl StatsCommand {
    pub async fn execute(&self, engine: &Engine, format: OutputFormat) -> CliResult<()> {
        let stats = engine.statistics();

        match format {
            OutputFormat::Json => print_json(&serde_json::to_value(&stats)?)?,
            OutputFormat::Table => {
                println!("Tessera Statistics");
                println!("==================\n");

                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL_CONDENSED)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(["Tier", "Kind", "Entries", "Capacity", "Persistent"]);

                for tier in &stats.storage.tiers {
                    table.add_row([
                        tier.name.clone(),
                        format!("{:?}", tier.kind).to_lowercase(),
                        tier.entries.to_string(),
                        tier.capacity
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        if tier.persistent { "yes" } else { "no" }.to_string(),
                    ]);
                }
                println!("{table}\n");

                println!("Indexed keys:   {}", stats.storage.indexed_keys);
                println!("Write-through:  {}", stats.storage.write_through);
                println!("Versions kept:  {}", stats.versions);
                println!("Relationships:  {}", stats.edges);

                if self.operations && !stats.diagnostics.operations.is_empty() {
                    let mut ops = Table::new();
                    ops.load_preset(UTF8_FULL_CONDENSED)
                        .set_content_arrangement(ContentArrangement::Dynamic)
                        .set_header(["Operation", "Count", "Errors", "Avg (us)", "Max (us)"]);
                    for (name, op) in &stats.diagnostics.operations {
                        ops.add_row([
                            name.clone(),
                            op.count.to_string(),
                            op.errors.to_string(),
                            op.avg_micros.to_string(),
                            op.max_micros.to_string(),
                        ]);
                    }
                    println!("\n{ops}");
                }
            }
        }

        Ok(())
    }
}
