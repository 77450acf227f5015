//! Template commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::{json, Value};

use crate::client::ApiClient;
use crate::output::{print_json, print_ok, print_table, OutputFormat};

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Register (or replace) a template from a JSON file
    Register { file: String },
    /// List registered templates
    List,
    /// Show one template
    Show { id: String },
    /// Delete a template
    Delete { id: String },
    /// Render a template with parameters (JSON string)
    Render {
        id: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
    /// Render and execute a template
    Run {
        id: String,
        #[arg(long, default_value = "{}")]
        params: String,
    },
}

fn parse_params(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("params must be a JSON object")
}

pub async fn run(client: &ApiClient, format: OutputFormat, cmd: TemplateCommands) -> Result<()> {
    match cmd {
        TemplateCommands::Register { file } => {
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
            let body: Value = serde_json::from_str(&raw).with_context(|| format!("parsing {file}"))?;
            let data = client.post("/template", &body).await?;
            print_ok(&format!("registered {}", data["template_id"].as_str().unwrap_or("?")));
        }
        TemplateCommands::List => {
            let data = client.get("/templates").await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => print_table(&data, &["template_id", "name", "description"]),
            }
        }
        TemplateCommands::Show { id } => {
            let data = client.get(&format!("/template/{id}")).await?;
            print_json(&data);
        }
        TemplateCommands::Delete { id } => {
            client.delete(&format!("/template/{id}")).await?;
            print_ok("deleted");
        }
        TemplateCommands::Render { id, params } => {
            let body = json!({ "template_id": id, "params": parse_params(&params)? });
            let data = client.post("/template/render", &body).await?;
            print_json(&data);
        }
        TemplateCommands::Run { id, params } => {
            let body = json!({ "template_id": id, "params": parse_params(&params)? });
            let data = client.post("/template/run", &body).await?;
            match format {
                OutputFormat::Json => print_json(&data),
                OutputFormat::Table => {
                    println!("run_id: {}", data["run_id"].as_str().unwrap_or("?"));
                    println!("summary: {}", data["summary"]);
                }
            }
        }
    }
    Ok(())
}
