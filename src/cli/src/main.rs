//! TaskHub CLI - command-line client for the TaskHub API.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;

use commands::{cron, dag, task, template, worker};
use output::{print_ok, OutputFormat};

/// TaskHub - workflow and task orchestration CLI
#[derive(Parser)]
#[command(name = "taskhub", version, about = "TaskHub - workflow and task orchestration CLI", propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "TASKHUB_API_URL", default_value = "http://localhost:8080")]
    api_url: String,

    /// Bearer token (from `taskhub login`)
    #[arg(long, global = true, env = "TASKHUB_TOKEN")]
    token: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain an API token
    Login {
        #[arg(long, default_value = "admin")]
        username: String,
        #[arg(long)]
        password: String,
    },

    /// Single task operations
    #[command(subcommand)]
    Task(task::TaskCommands),

    /// DAG run operations
    #[command(subcommand)]
    Dag(dag::DagCommands),

    /// Template management
    #[command(subcommand)]
    Template(template::TemplateCommands),

    /// Cron job management
    #[command(subcommand)]
    Cron(cron::CronCommands),

    /// Worker fleet operations
    #[command(subcommand)]
    Worker(worker::WorkerCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let client = client::ApiClient::new(&cli.api_url, cli.token.clone())?;
    let format = cli.output;

    match cli.command {
        Commands::Login { username, password } => {
            let data = client.post("/api/login", &json!({ "username": username, "password": password })).await?;
            let token = data["token"].as_str().unwrap_or_default();
            print_ok("logged in; export the token for subsequent commands:");
            println!("export TASKHUB_TOKEN={token}");
        }
        Commands::Task(cmd) => task::run(&client, format, cmd).await?,
        Commands::Dag(cmd) => dag::run(&client, format, cmd).await?,
        Commands::Template(cmd) => template::run(&client, format, cmd).await?,
        Commands::Cron(cmd) => cron::run(&client, format, cmd).await?,
        Commands::Worker(cmd) => worker::run(&client, format, cmd).await?,
    }

    Ok(())
}
