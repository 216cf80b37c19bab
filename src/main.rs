use task_orchestrator::api::ApiServer;
use task_orchestrator::config::OrchestratorConfig;
use task_orchestrator::orchestrator::Orchestrator;
use task_orchestrator::ports::Ports;
use task_orchestrator::Result;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    info!("starting task orchestrator");

    let config = OrchestratorConfig::load()?;
    let orchestrator = Orchestrator::new(config.clone(), Ports::in_memory())?;
    let api_server = ApiServer::new(config, orchestrator.clone())?;

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    tokio::select! {
        result = api_server.run() => {
            if let Err(e) = result {
                error!("intake API failed: {e}");
            }
        }
        _ = shutdown_signal => {
            info!("received shutdown signal");
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}
