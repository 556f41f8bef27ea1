use finance_automation_agents::{agent::Orchestrator, api::start_server, config::Settings};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    let port = settings.port;

    info!("Finance Automation Agents - API Server");
    info!(port, llm = ?settings.llm_provider, selector = ?settings.step_selector, "Configuration loaded");

    let orchestrator = Arc::new(Orchestrator::from_settings(settings)?);

    info!("Orchestrator initialized, starting API server");

    start_server(orchestrator, port).await?;

    Ok(())
}
