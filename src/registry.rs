//! Agent registry: tracks known agents, scores them against a task's
//! required capabilities, and sweeps for liveness.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock;
use crate::constants::{
    CAPABILITY_WEIGHT, MAX_PERFORMANCE_SCORE, MIN_PERFORMANCE_SCORE, PERFORMANCE_WEIGHT,
    STALE_AGENT_THRESHOLD_SECS, WORKLOAD_WEIGHT,
};
use crate::error::{HubError, Result};
use crate::events::{CoordinationEvent, EventHub};
use crate::models::{Agent, AgentStatus};

/// Insertion-ordered agent store plus the event hub it reports to.
///
/// `order` tracks registration sequence for selection tie-breaking;
/// agents are never removed from it, only marked `Offline`.
pub struct Registry {
    agents: Mutex<HashMap<String, Agent>>,
    order: Mutex<Vec<String>>,
    events: Arc<EventHub>,
}

impl Registry {
    pub fn new(events: Arc<EventHub>) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Registers or re-registers an agent. Re-registration preserves
    /// performance counters and clears `current_task`.
    pub async fn register(
        &self,
        id: String,
        name: Option<String>,
        capabilities: std::collections::HashSet<String>,
        channel_ref: Option<String>,
    ) -> Agent {
        let mut agents = self.agents.lock().await;
        let agent = match agents.remove(&id) {
            Some(mut existing) => {
                existing.name = name.unwrap_or(existing.name);
                existing.capabilities = capabilities;
                existing.channel_ref = channel_ref;
                existing.current_task = None;
                existing.status = AgentStatus::Online;
                existing.last_seen = clock::now();
                existing
            }
            None => {
                let mut new_agent = Agent::new(id.clone(), name, capabilities);
                new_agent.channel_ref = channel_ref;
                new_agent
            }
        };
        agents.insert(id.clone(), agent.clone());
        drop(agents);

        let mut order = self.order.lock().await;
        if !order.contains(&id) {
            order.push(id.clone());
        }
        drop(order);

        info!(agent_id = %id, "agent registered");
        self.events.record(
            CoordinationEvent::new("agent_registered")
                .with_agent(id.clone())
                .with_payload("success", true)
                .with_payload("agentId", id.clone()),
        );
        self.events
            .record(CoordinationEvent::new("agent_joined").with_agent(id));
        agent
    }

    pub async fn get(&self, id: &str) -> Option<Agent> {
        self.agents.lock().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<Agent> {
        let order = self.order.lock().await;
        let agents = self.agents.lock().await;
        order.iter().filter_map(|id| agents.get(id).cloned()).collect()
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_task: Option<String>,
    ) -> Result<Agent> {
        let mut agents = self.agents.lock().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| HubError::AgentNotFound { id: id.to_string() })?;
        agent.status = status;
        agent.current_task = current_task;
        agent.last_seen = clock::now();
        if status == AgentStatus::Offline {
            agent.channel_ref = None;
        }
        let updated = agent.clone();
        drop(agents);

        self.events.record(
            CoordinationEvent::new("agent_status_updated")
                .with_agent(id.to_string())
                .with_payload("status", json!(status)),
        );
        Ok(updated)
    }

    /// Drops the channel token and transitions the owning agent to
    /// `Offline`, matching the weak-reference redesign: the transport
    /// layer calls this with the `ChannelToken` it handed out on
    /// connect, the registry never inspects the socket itself. A no-op
    /// if no agent currently holds that token (e.g. an observer-only
    /// connection, or one that never registered an agent).
    pub async fn handle_disconnect(&self, channel_token: &str) -> Result<()> {
        let mut agents = self.agents.lock().await;
        let Some(agent) = agents
            .values_mut()
            .find(|a| a.channel_ref.as_deref() == Some(channel_token))
        else {
            return Ok(());
        };
        let id = agent.id.clone();
        let current_task = agent.current_task.clone();
        agent.status = AgentStatus::Offline;
        agent.current_task = current_task;
        agent.channel_ref = None;
        agent.last_seen = clock::now();
        drop(agents);

        self.events.record(
            CoordinationEvent::new("agent_status_updated")
                .with_agent(id)
                .with_payload("status", json!(AgentStatus::Offline))
                .with_payload("reason", "disconnect"),
        );
        Ok(())
    }

    pub async fn record_performance(&self, id: &str, duration_ms: f64, success: bool) -> Result<()> {
        let mut agents = self.agents.lock().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| HubError::AgentNotFound { id: id.to_string() })?;

        if success {
            agent.tasks_completed += 1;
            agent.average_task_time = if agent.tasks_completed == 1 {
                duration_ms
            } else {
                (agent.average_task_time + duration_ms) / 2.0
            };
            let efficiency = (crate::constants::EFFICIENCY_REFERENCE_DURATION_MS / duration_ms)
                .clamp(MIN_PERFORMANCE_SCORE, MAX_PERFORMANCE_SCORE);
            agent.performance_score = (0.9 * agent.performance_score + 0.1 * efficiency)
                .clamp(MIN_PERFORMANCE_SCORE, MAX_PERFORMANCE_SCORE);
        } else {
            agent.performance_score = (0.8 * agent.performance_score).max(MIN_PERFORMANCE_SCORE);
        }
        let score = agent.performance_score;
        drop(agents);

        self.events.record(
            CoordinationEvent::new("agent_performance_updated")
                .with_agent(id.to_string())
                .with_payload("performanceScore", score),
        );
        Ok(())
    }

    /// Scored selection over online, idle agents. Ties broken by
    /// registration order. Coverage is soft: an under-qualified agent
    /// may still win if nothing better is available.
    pub async fn select(&self, required_capabilities: &std::collections::HashSet<String>) -> Option<Agent> {
        let order = self.order.lock().await;
        let agents = self.agents.lock().await;

        let mut best: Option<(f64, &Agent)> = None;
        for id in order.iter() {
            let Some(agent) = agents.get(id) else { continue };
            if agent.status != AgentStatus::Online {
                continue;
            }
            let score = score_agent(agent, required_capabilities);
            match best {
                Some((best_score, _)) if score <= best_score => {}
                _ => best = Some((score, agent)),
            }
        }
        best.map(|(_, agent)| agent.clone())
    }

    /// Marks any non-`Offline` agent stale past the threshold as
    /// `Offline`. Returns the ids transitioned.
    pub async fn sweep_liveness(&self) -> Vec<String> {
        let mut transitioned = Vec::new();
        let mut agents = self.agents.lock().await;
        let now = clock::now();
        for agent in agents.values_mut() {
            if agent.status == AgentStatus::Offline {
                continue;
            }
            let idle_secs = (now - agent.last_seen).num_seconds();
            if idle_secs > STALE_AGENT_THRESHOLD_SECS {
                agent.status = AgentStatus::Offline;
                agent.channel_ref = None;
                transitioned.push(agent.id.clone());
            }
        }
        drop(agents);

        for id in &transitioned {
            warn!(agent_id = %id, "agent marked offline by liveness sweep");
            self.events.record(
                CoordinationEvent::new("agent_status_updated")
                    .with_agent(id.clone())
                    .with_payload("status", json!(AgentStatus::Offline))
                    .with_payload("reason", "liveness_sweep"),
            );
        }
        transitioned
    }
}

fn score_agent(agent: &Agent, required_capabilities: &std::collections::HashSet<String>) -> f64 {
    let capability_score = if required_capabilities.is_empty() {
        1.0
    } else {
        let matched = agent.capabilities.intersection(required_capabilities).count();
        matched as f64 / required_capabilities.len() as f64
    };
    let performance_component = agent.performance_score;
    let workload_component = if agent.status == AgentStatus::Online { 1.0 } else { 0.5 };

    let total = CAPABILITY_WEIGHT * capability_score
        + PERFORMANCE_WEIGHT * performance_component
        + WORKLOAD_WEIGHT * workload_component;
    debug!(agent_id = %agent.id, total, "scored candidate");
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn caps(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn register_is_idempotent_and_preserves_counters() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry
            .register("a1".into(), None, caps(&["python"]), None)
            .await;
        registry
            .record_performance("a1", 30_000.0, true)
            .await
            .unwrap();

        let rehydrated = registry
            .register("a1".into(), None, caps(&["python", "sql"]), None)
            .await;
        assert_eq!(rehydrated.tasks_completed, 1);
        assert_eq!(rehydrated.current_task, None);
        assert_eq!(rehydrated.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn select_prefers_full_capability_coverage() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry
            .register("a1".into(), None, caps(&["react"]), None)
            .await;
        registry
            .register("a2".into(), None, caps(&["react", "typescript"]), None)
            .await;

        let required = caps(&["react", "typescript"]);
        let winner = registry.select(&required).await.unwrap();
        assert_eq!(winner.id, "a2");
    }

    #[tokio::test]
    async fn select_returns_none_when_no_agent_online() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry
            .register("a1".into(), None, caps(&["python"]), None)
            .await;
        registry
            .set_status("a1", AgentStatus::Offline, None)
            .await
            .unwrap();
        assert!(registry.select(&caps(&["python"])).await.is_none());
    }

    #[tokio::test]
    async fn record_performance_blends_efficiency_on_success() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry.register("a1".into(), None, caps(&[]), None).await;
        registry
            .record_performance("a1", 60_000.0, true)
            .await
            .unwrap();
        let agent = registry.get("a1").await.unwrap();
        assert!((agent.performance_score - 1.0).abs() < 1e-9);
        assert_eq!(agent.tasks_completed, 1);
        assert!((agent.average_task_time - 60_000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn record_performance_penalizes_failure() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry.register("a1".into(), None, caps(&[]), None).await;
        registry
            .record_performance("a1", 60_000.0, false)
            .await
            .unwrap();
        let agent = registry.get("a1").await.unwrap();
        assert!((agent.performance_score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn disconnect_is_looked_up_by_channel_token_not_agent_id() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry
            .register("a1".into(), None, caps(&["python"]), Some("tok-123".into()))
            .await;
        registry.handle_disconnect("tok-123").await.unwrap();
        let agent = registry.get("a1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Offline);
        assert!(agent.channel_ref.is_none());
    }

    #[tokio::test]
    async fn disconnect_on_unknown_token_is_a_no_op() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        registry
            .register("a1".into(), None, caps(&["python"]), Some("tok-123".into()))
            .await;
        registry.handle_disconnect("tok-unrelated").await.unwrap();
        let agent = registry.get("a1").await.unwrap();
        assert_eq!(agent.status, AgentStatus::Online);
    }

    #[tokio::test]
    async fn unknown_agent_operations_return_not_found() {
        let events = Arc::new(EventHub::new(100));
        let registry = Registry::new(events);
        let err = registry
            .set_status("ghost", AgentStatus::Online, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::AgentNotFound { .. }));
    }
}
