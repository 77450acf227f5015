//! Single-task commands.

use anyhow::Result;
use clap::Subcommand;
use serde_json::{json, Value};

use crate::client::ApiClient;
use crate::output::{print_json, print_ok, print_table, task_status_name, OutputFormat};

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Submit a single task
    Submit {
        /// Logical task id
        id: String,
        /// Execution type (shell, http, local, script, remote)
        #[arg(long, default_value = "shell")]
        exec_type: String,
        /// Command / URL / handler key
        #[arg(long)]
        command: String,
        /// Timeout in milliseconds (0 = none)
        #[arg(long, default_value_t = 0)]
        timeout_ms: i64,
        /// Retry count
        #[arg(long, default_value_t = 0)]
        retries: u32,
        /// Queue name
        #[arg(long, default_value = "")]
        queue: String,
    },
    /// List recent task runs
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show one task run by logical id
    Show { id: String },
    /// Cancel a running task
    Cancel { id: String },
    /// Page a task's log records
    Logs {
        id: String,
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, default_value_t = 1)]
        from: u64,
        #[arg(long, default_value_t = 200)]
        limit: usize,
    },
}

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: TaskCommands) -> Result<()> {
    match cmd {
        TaskCommands::Submit { id, exec_type, command, timeout_ms, retries, queue } => {
            let body = json!({
                "id": id,
                "exec_type": exec_type,
                "exec_command": command,
                "timeout_ms": timeout_ms,
                "retry_count": retries,
                "queue": queue,
            });
            let data = client.post("/api/tasks", &body).await?;
            print_ok(&format!("submitted, run_id={}", data["run_id"].as_str().unwrap_or("?")));
        }
        TaskCommands::List { limit } => {
            let data = client.get(&format!("/api/tasks?limit={limit}")).await?;
            let data = with_status_names(data);
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => {
                    print_table(&data, &["task_id", "run_id", "exec_type", "status_name", "duration_ms", "message"])
                }
            }
        }
        TaskCommands::Show { id } => {
            let data = client.get(&format!("/api/tasks/{id}")).await?;
            print_json(&data);
        }
        TaskCommands::Cancel { id } => {
            client.post(&format!("/api/tasks/{id}/cancel"), &json!({})).await?;
            print_ok("cancel flag set");
        }
        TaskCommands::Logs { id, run_id, from, limit } => {
            let mut path = format!("/api/tasks/logs?task_id={id}&from={from}&limit={limit}");
            if let Some(run_id) = run_id {
                path.push_str(&format!("&run_id={run_id}"));
            }
            let data = client.get(&path).await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => {
                    print_table(&data["records"], &["seq", "ts_ms", "level", "stream", "message"]);
                    println!("next_from: {}", data["next_from"]);
                }
            }
        }
    }
    Ok(())
}

fn with_status_names(mut data: Value) -> Value {
    if let Some(rows) = data.as_array_mut() {
        for row in rows {
            let status = row.get("status").and_then(Value::as_i64).unwrap_or(-1);
            row["status_name"] = Value::String(task_status_name(status).to_string());
        }
    }
    data
}
