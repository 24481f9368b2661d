use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A registered worker endpoint.
///
/// Identified by a client-supplied id. `channel_ref` never points at a
/// live socket directly — it is an opaque token resolved through the
/// transport layer's connection table (see `crate::transport`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub status: AgentStatus,
    pub channel_ref: Option<String>,
    pub current_task: Option<String>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    pub performance_score: f64,
    pub tasks_completed: u64,
    pub average_task_time: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Busy,
    Offline,
}

/// A unit of work with a description, required capabilities, and a
/// dependency list. Tasks are never deleted once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub required_capabilities: HashSet<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub assigned_agent: Option<String>,
    pub dependencies: Vec<String>,
    pub progress: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Accepted but unused by the current matcher — preserved for protocol
/// compatibility. See DESIGN.md for why it must not silently drive sort order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

/// Ephemeral record of a (task, agent) binding. Exists only while the
/// task is `Assigned` or `InProgress`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: String,
    pub agent_id: String,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
    pub reason: String,
}

/// Severity tag attached to a detected conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

/// One detected coordination anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub task_ids: Vec<String>,
    pub agent_ids: Vec<String>,
    pub severity: ConflictSeverity,
    pub resolution: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    ResourceContention,
    DependencyDeadlock,
    CapabilityMismatch,
}

impl Agent {
    pub fn new(id: String, name: Option<String>, capabilities: HashSet<String>) -> Self {
        let now = crate::clock::now();
        Self {
            name: name.unwrap_or_else(|| id.clone()),
            id,
            capabilities,
            status: AgentStatus::Online,
            channel_ref: None,
            current_task: None,
            last_seen: now,
            performance_score: 1.0,
            tasks_completed: 0,
            average_task_time: 0.0,
        }
    }
}

impl Task {
    pub fn new(
        description: String,
        required_capabilities: HashSet<String>,
        priority: Priority,
        dependencies: Vec<String>,
    ) -> Self {
        let mut deps = Vec::new();
        for dep in dependencies {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        Self {
            id: crate::clock::new_task_id(),
            description,
            required_capabilities,
            priority,
            status: TaskStatus::Pending,
            assigned_agent: None,
            dependencies: deps,
            progress: 0,
            created_at: crate::clock::now(),
            started_at: None,
            completed_at: None,
        }
    }
}
