//! Coordination event log: a bounded ring buffer plus a broadcast
//! fan-out for live observers.
//!
//! Events are appended inside the same critical section as the state
//! mutation that produced them (see `crate::coordinator`,
//! `crate::registry`); this module only owns storage and delivery.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// One entry in the coordination event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationEvent {
    pub event_type: String,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Map<String, Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl CoordinationEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            agent_id: None,
            task_id: None,
            payload: serde_json::Map::new(),
            timestamp: crate::clock::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_payload(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }
}

/// Ring buffer of recent events plus a broadcast channel for live
/// delivery. Cheap to clone: both halves are reference-counted.
#[derive(Clone)]
pub struct EventHub {
    ring: std::sync::Arc<std::sync::Mutex<VecDeque<CoordinationEvent>>>,
    capacity: usize,
    sender: broadcast::Sender<CoordinationEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            ring: std::sync::Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            sender,
        }
    }

    /// Appends the event to the ring and broadcasts it. Called from
    /// within the hub's single mutation lock; never awaits.
    pub fn record(&self, event: CoordinationEvent) {
        {
            let mut ring = self.ring.lock().expect("event ring poisoned");
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(event.clone());
        }
        // A lagging or absent receiver is dropped, never blocks the caller.
        if self.sender.send(event).is_err() {
            trace!("no subscribers for event broadcast");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinationEvent> {
        self.sender.subscribe()
    }

    /// Last `n` events in insertion order (oldest first).
    pub fn recent(&self, n: usize) -> Vec<CoordinationEvent> {
        let ring = self.ring.lock().expect("event ring poisoned");
        let skip = ring.len().saturating_sub(n);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Last `n` events of a given type, in insertion order.
    pub fn by_type(&self, event_type: &str, n: usize) -> Vec<CoordinationEvent> {
        let ring = self.ring.lock().expect("event ring poisoned");
        let matching: Vec<CoordinationEvent> = ring
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        let skip = matching.len().saturating_sub(n);
        matching[skip..].to_vec()
    }
}

/// Convenience builder for the project status aggregate, computed from
/// a snapshot rather than stored as an event.
pub fn project_status_payload(
    total_tasks: usize,
    completed_tasks: usize,
    active_agents: usize,
) -> HashMap<&'static str, Value> {
    let status = if total_tasks == 0 {
        "initializing"
    } else if completed_tasks == total_tasks {
        "completed"
    } else {
        "active"
    };
    let progress = if total_tasks == 0 {
        0
    } else {
        ((completed_tasks as f64 / total_tasks as f64) * 100.0).round() as i64
    };
    let mut map = HashMap::new();
    map.insert("status", Value::from(status));
    map.insert("progress", Value::from(progress));
    map.insert("activeAgents", Value::from(active_agents));
    map.insert("totalTasks", Value::from(total_tasks));
    map.insert("completedTasks", Value::from(completed_tasks));
    map
}
