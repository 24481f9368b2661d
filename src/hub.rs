//! Composition root: wires the registry, coordinator, and event hub
//! together and exposes the operations the transport layer dispatches
//! inbound messages to.

use std::sync::Arc;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::events::EventHub;
use crate::registry::Registry;

#[derive(Clone)]
pub struct Hub {
    pub registry: Arc<Registry>,
    pub coordinator: Arc<Coordinator>,
    pub events: Arc<EventHub>,
}

impl Hub {
    pub fn new(config: &Config) -> Self {
        let events = Arc::new(EventHub::new(config.event_ring_capacity));
        let registry = Arc::new(Registry::new(events.clone()));
        let coordinator = Arc::new(Coordinator::new(registry.clone(), events.clone()));
        Self {
            registry,
            coordinator,
            events,
        }
    }

    /// Background liveness sweep; runs for the lifetime of the process.
    pub async fn run_liveness_sweep(&self, interval_secs: u64) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let transitioned = self.registry.sweep_liveness().await;
            if !transitioned.is_empty() {
                self.coordinator.process_pending_tasks().await;
            }
        }
    }
}
