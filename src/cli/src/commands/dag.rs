//! DAG run commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use crate::client::ApiClient;
use crate::output::{print_json, print_ok, print_table, OutputFormat};

#[derive(Subcommand)]
pub enum DagCommands {
    /// Run a DAG described by a JSON file
    Run {
        /// Path to the DAG body (`{name?, config?, tasks: [...]}`)
        file: String,
        /// Submit asynchronously and return the run id immediately
        #[arg(long)]
        detach: bool,
    },
    /// List recent DAG runs
    Runs {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// List task runs of a DAG run
    Tasks {
        run_id: String,
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
    /// List events of a DAG run
    Events {
        run_id: String,
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
}

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: DagCommands) -> Result<()> {
    match cmd {
        DagCommands::Run { file, detach } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let body: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {file}"))?;

            if detach {
                let data = client.post("/api/dag/run_async", &body).await?;
                print_ok(&format!("run_id={}", data["run_id"].as_str().unwrap_or("?")));
            } else {
                let data = client.post("/api/dag/run", &body).await?;
                match format {
                    OutputFormat::Json => print_json(&data),
                    OutputFormat::Table => {
                        println!("run_id: {}", data["run_id"].as_str().unwrap_or("?"));
                        println!("summary: {}", data["summary"]);
                        print_table(&data["nodes"], &["id", "run_id", "result"]);
                    }
                }
            }
        }
        DagCommands::Runs { run_id, name, limit } => {
            let mut path = format!("/api/dag/runs?limit={limit}");
            if let Some(run_id) = run_id {
                path.push_str(&format!("&run_id={run_id}"));
            }
            if let Some(name) = name {
                path.push_str(&format!("&name={name}"));
            }
            let data = client.get(&path).await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => print_table(
                    &data,
                    &["run_id", "name", "source", "status", "total", "success_count", "failed_count", "skipped_count"],
                ),
            }
        }
        DagCommands::Tasks { run_id, limit } => {
            let data = client.get(&format!("/api/dag/task_runs?run_id={run_id}&limit={limit}")).await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => {
                    print_table(&data, &["task_id", "exec_type", "status", "duration_ms", "attempt", "message"])
                }
            }
        }
        DagCommands::Events { run_id, limit } => {
            let data = client.get(&format!("/api/dag/events?run_id={run_id}&limit={limit}")).await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => print_table(&data, &["ts_ms", "task_id", "kind", "event"]),
            }
        }
    }
    Ok(())
}
