//! Worker fleet commands.

use anyhow::Result;
use clap::Subcommand;

use crate::client::ApiClient;
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// List registered workers
    List,
}

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: WorkerCommands) -> Result<()> {
    match cmd {
        WorkerCommands::List => {
            let data = client.get("/api/workers").await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => print_table(
                    &data,
                    &["id", "host", "port", "alive", "running_tasks", "max_running_tasks", "last_seen_ms_ago"],
                ),
            }
        }
    }
    Ok(())
}
