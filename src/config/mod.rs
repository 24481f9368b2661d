use crate::error::HubError;
use crate::{constants, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub liveness_sweep_secs: u64,
    pub stale_agent_secs: i64,
    pub event_ring_capacity: usize,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(e) => tracing::debug!("No .env file loaded: {}", e),
        }

        let host = env::var("HUB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port: u16 = env::var("HUB_PORT")
            .unwrap_or_else(|_| constants::DEFAULT_PORT.to_string())
            .parse()
            .map_err(|_| HubError::Config("HUB_PORT must be a valid port number".to_string()))?;

        let liveness_sweep_secs: u64 = env::var("HUB_LIVENESS_SWEEP_SECS")
            .unwrap_or_else(|_| constants::LIVENESS_SWEEP_INTERVAL_SECS.to_string())
            .parse()
            .map_err(|_| {
                HubError::Config("HUB_LIVENESS_SWEEP_SECS must be a positive integer".to_string())
            })?;

        let stale_agent_secs: i64 = env::var("HUB_STALE_AGENT_SECS")
            .unwrap_or_else(|_| constants::STALE_AGENT_THRESHOLD_SECS.to_string())
            .parse()
            .map_err(|_| {
                HubError::Config("HUB_STALE_AGENT_SECS must be a positive integer".to_string())
            })?;

        let event_ring_capacity: usize = env::var("HUB_EVENT_RING_CAPACITY")
            .unwrap_or_else(|_| constants::EVENT_RING_CAPACITY.to_string())
            .parse()
            .map_err(|_| {
                HubError::Config("HUB_EVENT_RING_CAPACITY must be a positive integer".to_string())
            })?;
        if event_ring_capacity == 0 {
            return Err(HubError::Config("HUB_EVENT_RING_CAPACITY must be at least 1".to_string()));
        }

        let allowed_origins = env::var("HUB_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            host,
            port,
            liveness_sweep_secs,
            stale_agent_secs,
            event_ring_capacity,
            allowed_origins,
        })
    }
}
