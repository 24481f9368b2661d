use anyhow::Result;
use coordination_hub::{api::ApiServer, config::Config, hub::Hub};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting coordination hub");

    let config = Config::load()?;
    let hub = Hub::new(&config);
    let api_server = ApiServer::new(config.clone(), hub.clone());

    tokio::select! {
        _ = hub.run_liveness_sweep(config.liveness_sweep_secs) => {
            tracing::error!("liveness sweep task exited unexpectedly");
        }
        result = api_server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {}", e);
            }
        }
    }

    Ok(())
}
