//! Inbound message parsing and dispatch. One entry point, `dispatch`,
//! called by both the WebSocket and any future bidirectional adapter.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::events::CoordinationEvent;
use crate::hub::Hub;
use crate::models::{AgentStatus, Priority, TaskStatus};
use crate::transport::ConnectionTable;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum InboundMessage {
    RegisterAgent {
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(default)]
        capabilities: Vec<String>,
        name: Option<String>,
    },
    CreateTask {
        description: String,
        #[serde(default, rename = "requiredCapabilities")]
        required_capabilities: Vec<String>,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        dependencies: Vec<String>,
        #[serde(rename = "estimatedDuration")]
        #[serde(default)]
        estimated_duration: Option<u64>,
    },
    TaskProgress {
        #[serde(rename = "taskId")]
        task_id: String,
        progress: Option<u8>,
        status: Option<TaskStatus>,
        message: Option<String>,
    },
    UpdateTaskProgress {
        #[serde(rename = "taskId")]
        task_id: String,
        progress: Option<u8>,
        status: Option<TaskStatus>,
        message: Option<String>,
    },
    AgentStatus {
        #[serde(rename = "agentId")]
        agent_id: String,
        status: AgentStatus,
        #[serde(rename = "currentTask")]
        current_task: Option<String>,
    },
    AgentMessage {
        sender: String,
        message: String,
        timestamp: Option<String>,
    },
    GetProjectStatus {},
    GetAgentRegistry {},
    GetTasks {},
    /// Not in the original protocol table but the only way a bidirectional
    /// client can trigger the Conflict Detector's "on request" pass
    /// (§4.3) without going through the read-only HTTP surface.
    DetectConflicts {},
}

/// Parses and executes one inbound message. `token` identifies the
/// connection it arrived on, used for direct (non-broadcast) replies.
pub async fn dispatch(hub: &Hub, table: &ConnectionTable, token: &str, raw: &str) {
    let parsed: Result<InboundMessage, _> = serde_json::from_str(raw);
    let message = match parsed {
        Ok(message) => message,
        Err(err) => {
            warn!(error = %err, "malformed inbound message");
            table
                .send(
                    token,
                    json!({"type": "registration_error", "error": format!("malformed message: {err}")}),
                )
                .await;
            return;
        }
    };

    match message {
        InboundMessage::RegisterAgent { agent_id, capabilities, name } => {
            let caps: HashSet<String> = capabilities.into_iter().collect();
            hub.registry
                .register(agent_id, name, caps, Some(token.to_string()))
                .await;
        }
        InboundMessage::CreateTask {
            description,
            required_capabilities,
            priority,
            dependencies,
            estimated_duration: _,
        } => {
            let caps: HashSet<String> = required_capabilities.into_iter().collect();
            match hub
                .coordinator
                .create_task(description, caps, priority.unwrap_or_default(), dependencies)
                .await
            {
                Ok(task) => {
                    if let Err(err) = hub.coordinator.assign_optimal(&task.id).await {
                        warn!(task_id = %task.id, error = %err, "assignment attempt failed");
                    }
                }
                Err(err) => {
                    table
                        .send(token, json!({"type": "task_error", "error": err.to_string()}))
                        .await;
                }
            }
        }
        InboundMessage::TaskProgress { task_id, progress, status, message }
        | InboundMessage::UpdateTaskProgress { task_id, progress, status, message } => {
            match hub
                .coordinator
                .update_progress(&task_id, progress, status, message)
                .await
            {
                Ok(task) => {
                    hub.events.record(
                        CoordinationEvent::new("task_progress")
                            .with_task(task.id.clone())
                            .with_payload("progress", task.progress)
                            .with_payload("status", json!(task.status)),
                    );
                }
                Err(err) => {
                    table
                        .send(token, json!({"type": "task_error", "error": err.to_string()}))
                        .await;
                }
            }
        }
        InboundMessage::AgentStatus { agent_id, status, current_task } => {
            if let Err(err) = hub.registry.set_status(&agent_id, status, current_task).await {
                table
                    .send(token, json!({"type": "registration_error", "error": err.to_string()}))
                    .await;
            }
        }
        InboundMessage::AgentMessage { sender, message, timestamp } => {
            let forwarded = json!({
                "type": "agent_message",
                "sender": sender,
                "message": message,
                "timestamp": timestamp.unwrap_or_else(|| crate::clock::now().to_rfc3339()),
            });
            table.broadcast_except(token, forwarded).await;
        }
        InboundMessage::GetProjectStatus {} => {
            let tasks = hub.coordinator.all().await;
            let agents = hub.registry.all().await;
            let total = tasks.len();
            let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
            let active_agents = agents.iter().filter(|a| a.status != AgentStatus::Offline).count();
            let mut payload = crate::events::project_status_payload(total, completed, active_agents);
            let mut reply = serde_json::Map::new();
            reply.insert("type".to_string(), json!("project_status_update"));
            for (key, value) in payload.drain() {
                reply.insert(key.to_string(), value);
            }
            table.send(token, Value::Object(reply)).await;
        }
        InboundMessage::GetAgentRegistry {} => {
            for agent in hub.registry.all().await {
                table
                    .send(
                        token,
                        json!({"type": "agent_registered", "success": true, "agentId": agent.id, "agent": agent}),
                    )
                    .await;
            }
        }
        InboundMessage::GetTasks {} => {
            for task in hub.coordinator.all().await {
                table
                    .send(token, json!({"type": "task_assigned", "task": task}))
                    .await;
            }
        }
        InboundMessage::DetectConflicts {} => {
            let tasks = hub.coordinator.all().await;
            let agents = hub.registry.all().await;
            crate::conflict::detect_and_report(&tasks, &agents, hub.events.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hub::Hub;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            liveness_sweep_secs: 60,
            stale_agent_secs: 300,
            event_ring_capacity: 100,
            allowed_origins: vec![],
        }
    }

    #[tokio::test]
    async fn register_agent_message_registers_in_the_hub() {
        let hub = Hub::new(&test_config());
        let table = ConnectionTable::new();
        dispatch(
            &hub,
            &table,
            "tok-1",
            r#"{"type":"register_agent","agentId":"A1","capabilities":["python"]}"#,
        )
        .await;
        let agent = hub.registry.get("A1").await.unwrap();
        assert!(agent.capabilities.contains("python"));
    }

    #[tokio::test]
    async fn create_task_message_attempts_immediate_assignment() {
        let hub = Hub::new(&test_config());
        let table = ConnectionTable::new();
        hub.registry.register("A1".into(), None, ["python".to_string()].into(), None).await;
        dispatch(
            &hub,
            &table,
            "tok-1",
            r#"{"type":"create_task","description":"ship it","requiredCapabilities":["python"]}"#,
        )
        .await;
        let tasks = hub.coordinator.all().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].assigned_agent.as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn task_progress_message_broadcasts_both_progress_events() {
        let hub = Hub::new(&test_config());
        let table = ConnectionTable::new();
        hub.registry.register("A1".into(), None, Default::default(), None).await;
        let task = hub
            .coordinator
            .create_task("work".into(), Default::default(), crate::models::Priority::Medium, vec![])
            .await
            .unwrap();
        hub.coordinator.assign_optimal(&task.id).await.unwrap();

        dispatch(
            &hub,
            &table,
            "tok-1",
            &format!(
                r#"{{"type":"task_progress","taskId":"{}","progress":50,"status":"in_progress"}}"#,
                task.id
            ),
        )
        .await;

        let recent = hub.events.recent(100);
        assert!(recent.iter().any(|e| e.event_type == "task_progress_updated"));
        assert!(recent.iter().any(|e| e.event_type == "task_progress"));
    }

    #[tokio::test]
    async fn malformed_message_replies_with_a_typed_error_and_stays_connected() {
        let hub = Hub::new(&test_config());
        let table = ConnectionTable::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let token = table.insert(tx).await;
        dispatch(&hub, &table, &token, "{not json").await;
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply["type"], "registration_error");
    }

    #[tokio::test]
    async fn detect_conflicts_message_surfaces_a_soft_capability_mismatch() {
        let hub = Hub::new(&test_config());
        let table = ConnectionTable::new();
        hub.registry.register("A1".into(), None, ["python".to_string()].into(), None).await;
        dispatch(
            &hub,
            &table,
            "tok-1",
            r#"{"type":"create_task","description":"needs sql too","requiredCapabilities":["python","sql"]}"#,
        )
        .await;

        dispatch(&hub, &table, "tok-1", r#"{"type":"detect_conflicts"}"#).await;
        let found = hub
            .events
            .recent(100)
            .into_iter()
            .any(|e| e.event_type == "conflicts_detected");
        assert!(found, "expected a conflicts_detected event for the under-qualified assignment");
    }
}
