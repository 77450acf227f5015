//! Cron job commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use crate::client::ApiClient;
use crate::output::{print_json, print_ok, print_table, OutputFormat};

#[derive(Subcommand)]
pub enum CronCommands {
    /// Register a cron job from a JSON file
    Add { file: String },
    /// List registered cron jobs
    List,
    /// Remove a cron job
    Remove { id: String },
}

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: CronCommands) -> Result<()> {
    match cmd {
        CronCommands::Add { file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let body: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {file}"))?;
            let data = client.post("/api/cron/jobs", &body).await?;
            print_ok(&format!("job id {}", data["id"].as_str().unwrap_or("?")));
        }
        CronCommands::List => {
            let data = client.get("/api/cron/jobs").await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => {
                    print_table(&data, &["id", "name", "spec", "target_type", "enabled", "next_time_ms"])
                }
            }
        }
        CronCommands::Remove { id } => {
            client.delete(&format!("/api/cron/jobs/{id}")).await?;
            print_ok("removed");
        }
    }
    Ok(())
}
