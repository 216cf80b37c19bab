//! Operator CLI: start the orchestrator's intake API, or talk to an
//! already-running one to submit a task and poll its status.

use clap::{Parser, Subcommand};
use task_orchestrator::api::ApiServer;
use task_orchestrator::config::OrchestratorConfig;
use task_orchestrator::orchestrator::Orchestrator;
use task_orchestrator::ports::Ports;
use task_orchestrator::Result;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "orchestrator-cli", about = "Task orchestrator operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the intake API and run until interrupted.
    Serve,
    /// Submit a task (read as JSON from a file, or `-` for stdin) to a
    /// running orchestrator and print the assigned task id.
    Submit {
        /// Base URL of a running orchestrator, e.g. http://127.0.0.1:8080
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        /// Path to a JSON task submission body, or `-` for stdin.
        file: String,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Fetch a task's current status from a running orchestrator.
    Status {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        task_id: String,
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve().await,
        Command::Submit { url, file, api_key } => submit(&url, &file, api_key.as_deref()).await,
        Command::Status { url, task_id, api_key } => status(&url, &task_id, api_key.as_deref()).await,
    }
}

async fn serve() -> Result<()> {
    let config = OrchestratorConfig::load()?;
    let orchestrator = Orchestrator::new(config.clone(), Ports::in_memory())?;
    let api_server = ApiServer::new(config, orchestrator.clone())?;

    info!("orchestrator-cli serve: starting intake API");
    if let Err(e) = api_server.run().await {
        error!("intake API failed: {e}");
    }
    orchestrator.shutdown().await;
    Ok(())
}

fn read_task_body(file: &str) -> Result<String> {
    use std::io::Read;
    if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        Ok(std::fs::read_to_string(file)?)
    }
}

async fn submit(url: &str, file: &str, api_key: Option<&str>) -> Result<()> {
    let body = read_task_body(file)?;
    let value: serde_json::Value = serde_json::from_str(&body)?;

    let client = reqwest::Client::new();
    let mut request = client.post(format!("{url}/tasks")).json(&value);
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        println!("{text}");
        Ok(())
    } else {
        error!(%status, "task submission failed: {text}");
        std::process::exit(1);
    }
}

async fn status(url: &str, task_id: &str, api_key: Option<&str>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut request = client.get(format!("{url}/tasks/{task_id}"));
    if let Some(key) = api_key {
        request = request.header("x-api-key", key);
    }

    let response = request.send().await?;
    let status = response.status();
    let text = response.text().await?;
    if status.is_success() {
        println!("{text}");
        Ok(())
    } else {
        error!(%status, "status lookup failed: {text}");
        std::process::exit(1);
    }
}
