//! Task coordinator: owns task lifecycle, dependency gating, and the
//! handoff into and out of `Busy` agents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::clock;
use crate::error::{HubError, Result};
use crate::events::{CoordinationEvent, EventHub};
use crate::models::{Assignment, Priority, Task, TaskStatus};
use crate::registry::Registry;

pub struct Coordinator {
    tasks: Mutex<HashMap<String, Task>>,
    order: Mutex<Vec<String>>,
    assignments: Mutex<HashMap<String, Assignment>>,
    /// Serializes the select-then-claim sequence in `assign_optimal` so
    /// two tasks racing for the same idle agent can't both see it as
    /// the best candidate before either marks it `Busy`.
    assign_lock: Mutex<()>,
    registry: Arc<Registry>,
    events: Arc<EventHub>,
}

impl Coordinator {
    pub fn new(registry: Arc<Registry>, events: Arc<EventHub>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            assignments: Mutex::new(HashMap::new()),
            assign_lock: Mutex::new(()),
            registry,
            events,
        }
    }

    pub async fn create_task(
        &self,
        description: String,
        required_capabilities: HashSet<String>,
        priority: Priority,
        dependencies: Vec<String>,
    ) -> Result<Task> {
        if description.trim().is_empty() {
            return Err(HubError::Validation("task description must not be empty".into()));
        }
        let task = Task::new(description, required_capabilities, priority, dependencies);

        let mut tasks = self.tasks.lock().await;
        tasks.insert(task.id.clone(), task.clone());
        drop(tasks);
        self.order.lock().await.push(task.id.clone());

        info!(task_id = %task.id, "task created");
        self.events.record(
            CoordinationEvent::new("task_created")
                .with_task(task.id.clone())
                .with_payload("success", true)
                .with_payload("task", json!(task)),
        );
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<Task> {
        let order = self.order.lock().await;
        let tasks = self.tasks.lock().await;
        order.iter().filter_map(|id| tasks.get(id).cloned()).collect()
    }

    pub async fn assignments(&self) -> Vec<Assignment> {
        self.assignments.lock().await.values().cloned().collect()
    }

    fn dependencies_met(tasks: &HashMap<String, Task>, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| matches!(tasks.get(dep), Some(t) if t.status == TaskStatus::Completed))
    }

    /// No-op (returns `Ok(None)`) if the task is not `Pending` or has
    /// unmet dependencies — neither case is an error.
    pub async fn assign_optimal(&self, task_id: &str) -> Result<Option<Assignment>> {
        let _guard = self.assign_lock.lock().await;
        let candidate_caps = {
            let tasks = self.tasks.lock().await;
            let task = tasks
                .get(task_id)
                .ok_or_else(|| HubError::TaskNotFound { id: task_id.to_string() })?;
            if task.status != TaskStatus::Pending {
                return Ok(None);
            }
            if !Self::dependencies_met(&tasks, task) {
                return Ok(None);
            }
            task.required_capabilities.clone()
        };

        let Some(agent) = self.registry.select(&candidate_caps).await else {
            self.events.record(
                CoordinationEvent::new("task_pending")
                    .with_task(task_id.to_string())
                    .with_payload("reason", "no_viable_agent"),
            );
            return Ok(None);
        };

        let assignment = Assignment {
            task_id: task_id.to_string(),
            agent_id: agent.id.clone(),
            assigned_at: clock::now(),
            reason: "scored_selection".to_string(),
        };

        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| HubError::TaskNotFound { id: task_id.to_string() })?;
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(agent.id.clone());
        let updated = task.clone();
        drop(tasks);

        self.assignments
            .lock()
            .await
            .insert(task_id.to_string(), assignment.clone());

        self.registry
            .set_status(&agent.id, crate::models::AgentStatus::Busy, Some(task_id.to_string()))
            .await?;

        info!(task_id = %task_id, agent_id = %agent.id, "task assigned");
        self.events.record(
            CoordinationEvent::new("task_assigned")
                .with_task(task_id.to_string())
                .with_agent(agent.id.clone())
                .with_payload("task", json!(updated)),
        );
        Ok(Some(assignment))
    }

    /// Applies a progress/status update, enforcing the state machine.
    /// A completing transition triggers `process_pending_tasks`.
    pub async fn update_progress(
        &self,
        task_id: &str,
        progress: Option<u8>,
        status: Option<TaskStatus>,
        _message: Option<String>,
    ) -> Result<Task> {
        let (updated, just_completed_or_failed, duration_ms, agent_id) = {
            let mut tasks = self.tasks.lock().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| HubError::TaskNotFound { id: task_id.to_string() })?;

            if let Some(p) = progress {
                task.progress = task.progress.max(p.min(100));
            }

            let mut terminal = false;
            let mut duration_ms = None;
            let agent_id = task.assigned_agent.clone();

            if let Some(new_status) = status {
                if new_status != task.status {
                    validate_transition(task.status, new_status, task_id)?;
                    match new_status {
                        TaskStatus::InProgress => {
                            if task.started_at.is_none() {
                                task.started_at = Some(clock::now());
                            }
                        }
                        TaskStatus::Completed => {
                            task.progress = 100;
                            task.completed_at = Some(clock::now());
                            duration_ms = Some(elapsed_ms(task));
                            terminal = true;
                        }
                        TaskStatus::Failed => {
                            task.completed_at = Some(clock::now());
                            duration_ms = Some(elapsed_ms(task));
                            terminal = true;
                        }
                        _ => {}
                    }
                    task.status = new_status;
                }
            }

            (task.clone(), terminal, duration_ms, agent_id)
        };

        if just_completed_or_failed {
            if let Some(agent_id) = &agent_id {
                let success = updated.status == TaskStatus::Completed;
                if let Err(err) = self
                    .registry
                    .record_performance(agent_id, duration_ms.unwrap_or(0.0), success)
                    .await
                {
                    warn!(agent_id = %agent_id, error = %err, "failed to record performance on task completion");
                }
                if let Err(err) = self
                    .registry
                    .set_status(agent_id, crate::models::AgentStatus::Online, None)
                    .await
                {
                    warn!(agent_id = %agent_id, error = %err, "failed to free agent after task completion");
                }
            }
            self.assignments.lock().await.remove(task_id);
        }

        self.events.record(
            CoordinationEvent::new("task_progress_updated")
                .with_task(task_id.to_string())
                .with_payload("progress", updated.progress)
                .with_payload("status", json!(updated.status)),
        );

        if just_completed_or_failed {
            self.process_pending_tasks().await;
        }

        Ok(updated)
    }

    /// Attempts `assign_optimal` on every `Pending` task, in creation
    /// order. Individual failures are logged, never fatal.
    pub async fn process_pending_tasks(&self) {
        let pending_ids: Vec<String> = {
            let order = self.order.lock().await;
            let tasks = self.tasks.lock().await;
            order
                .iter()
                .filter(|id| matches!(tasks.get(*id), Some(t) if t.status == TaskStatus::Pending))
                .cloned()
                .collect()
        };
        for id in pending_ids {
            if let Err(err) = self.assign_optimal(&id).await {
                warn!(task_id = %id, error = %err, "assignment attempt failed");
            }
        }
    }
}

fn elapsed_ms(task: &Task) -> f64 {
    let start = task.started_at.unwrap_or(task.created_at);
    let now = clock::now();
    (now - start).num_milliseconds().max(0) as f64
}

fn validate_transition(from: TaskStatus, to: TaskStatus, task_id: &str) -> Result<()> {
    use TaskStatus::*;
    let allowed = matches!(
        (from, to),
        (Pending, Assigned)
            | (Assigned, InProgress)
            | (Assigned, Completed)
            | (Assigned, Failed)
            | (InProgress, Completed)
            | (InProgress, Failed)
    );
    if allowed {
        Ok(())
    } else {
        Err(HubError::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to,
        })
    }
}
