use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use toolflow::{
    builtin_chains, AgentService, AppConfig, McpToolProvider, OllamaClient, Result, ToolProvider,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("TOOLFLOW_CONFIG").unwrap_or_else(|_| "toolflow.toml".to_string());
    let config = AppConfig::load(&config_path)?;

    let providers: Vec<Arc<dyn ToolProvider>> = config
        .providers
        .iter()
        .map(|p| {
            Arc::new(McpToolProvider::over_http(p.name.clone(), p.url.clone()))
                as Arc<dyn ToolProvider>
        })
        .collect();

    let model = Arc::new(OllamaClient::from_config(&config.generation)?);
    let chains = builtin_chains()?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|err| toolflow::FlowError::Protocol(format!("invalid listen address: {err}")))?;

    let service = AgentService::new(&config, providers, chains, model);
    service.serve(addr).await
}
