//! Conflict detection: a pure function over a snapshot of agents and
//! tasks, plus the (deliberately partial) simulated resolution flow.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::constants::{CONFLICT_RESOLUTION_DELAY_MAX_SECS, CONFLICT_RESOLUTION_DELAY_MIN_SECS};
use crate::events::{CoordinationEvent, EventHub};
use crate::models::{Agent, Conflict, ConflictSeverity, ConflictType, Task, TaskStatus};

fn is_active(status: TaskStatus) -> bool {
    matches!(status, TaskStatus::Assigned | TaskStatus::InProgress)
}

/// Agents assigned to more than one non-terminal task.
fn resource_contention(tasks: &[Task]) -> Vec<Conflict> {
    let mut by_agent: HashMap<&str, Vec<&Task>> = HashMap::new();
    for task in tasks.iter().filter(|t| is_active(t.status)) {
        if let Some(agent_id) = &task.assigned_agent {
            by_agent.entry(agent_id.as_str()).or_default().push(task);
        }
    }
    by_agent
        .into_iter()
        .filter(|(_, tasks)| tasks.len() > 1)
        .map(|(agent_id, contending)| Conflict {
            conflict_type: ConflictType::ResourceContention,
            task_ids: contending.iter().map(|t| t.id.clone()).collect(),
            agent_ids: vec![agent_id.to_string()],
            severity: ConflictSeverity::Medium,
            resolution: format!("agent {agent_id} holds more than one active assignment"),
        })
        .collect()
}

/// Cycles in the task dependency graph via DFS with a recursion stack.
fn dependency_deadlocks(tasks: &[Task]) -> Vec<Conflict> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut conflicts = Vec::new();

    for task in tasks {
        if visited.contains(task.id.as_str()) {
            continue;
        }
        let mut stack: Vec<&str> = Vec::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        if let Some(cycle) = find_cycle(task.id.as_str(), &by_id, &mut visited, &mut stack, &mut on_stack) {
            conflicts.push(Conflict {
                conflict_type: ConflictType::DependencyDeadlock,
                task_ids: cycle,
                agent_ids: vec![],
                severity: ConflictSeverity::High,
                resolution: "dependency cycle must be broken manually".to_string(),
            });
        }
    }
    conflicts
}

fn find_cycle<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a Task>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    on_stack: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(id);
    stack.push(id);
    on_stack.insert(id);

    if let Some(task) = by_id.get(id) {
        for dep in &task.dependencies {
            let dep = dep.as_str();
            if !by_id.contains_key(dep) {
                continue;
            }
            if on_stack.contains(dep) {
                let start = stack.iter().position(|&x| x == dep).unwrap_or(0);
                return Some(stack[start..].iter().map(|s| s.to_string()).collect());
            }
            if !visited.contains(dep) {
                if let Some(cycle) = find_cycle(dep, by_id, visited, stack, on_stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    on_stack.remove(id);
    None
}

/// Assigned/in-progress tasks whose agent's capabilities don't cover
/// the task's required set.
fn capability_mismatches(tasks: &[Task], agents: &[Agent]) -> Vec<Conflict> {
    let by_agent: HashMap<&str, &Agent> = agents.iter().map(|a| (a.id.as_str(), a)).collect();
    tasks
        .iter()
        .filter(|t| is_active(t.status))
        .filter_map(|task| {
            let agent_id = task.assigned_agent.as_deref()?;
            let agent = by_agent.get(agent_id)?;
            let missing: Vec<String> = task
                .required_capabilities
                .difference(&agent.capabilities)
                .cloned()
                .collect();
            if missing.is_empty() {
                return None;
            }
            Some(Conflict {
                conflict_type: ConflictType::CapabilityMismatch,
                task_ids: vec![task.id.clone()],
                agent_ids: vec![agent_id.to_string()],
                severity: ConflictSeverity::Low,
                resolution: format!("agent missing capabilities: {}", missing.join(", ")),
            })
        })
        .collect()
}

/// Runs all three detectors over the given snapshot.
pub fn detect(tasks: &[Task], agents: &[Agent]) -> Vec<Conflict> {
    let mut conflicts = resource_contention(tasks);
    conflicts.extend(dependency_deadlocks(tasks));
    conflicts.extend(capability_mismatches(tasks, agents));
    conflicts
}

/// Emits the conflict list, then — per conflict — a started/resolved
/// pair after a type-dependent delay. No actual remediation runs.
pub async fn detect_and_report(tasks: &[Task], agents: &[Agent], events: Arc<EventHub>) -> Vec<Conflict> {
    let conflicts = detect(tasks, agents);
    if conflicts.is_empty() {
        return conflicts;
    }

    events.record(
        CoordinationEvent::new("conflicts_detected")
            .with_payload("conflicts", serde_json::to_value(&conflicts).unwrap_or_default())
            .with_payload("count", conflicts.len()),
    );

    for conflict in &conflicts {
        let delay_secs = match conflict.conflict_type {
            ConflictType::DependencyDeadlock => CONFLICT_RESOLUTION_DELAY_MAX_SECS,
            _ => CONFLICT_RESOLUTION_DELAY_MIN_SECS,
        };
        let events = events.clone();
        let conflict = conflict.clone();
        tokio::spawn(async move {
            events.record(
                CoordinationEvent::new("conflict_resolution_started")
                    .with_payload("type", serde_json::to_value(conflict.conflict_type).unwrap_or_default())
                    .with_payload("resolution", conflict.resolution.clone()),
            );
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            info!(conflict_type = ?conflict.conflict_type, "simulated conflict resolution complete");
            events.record(
                CoordinationEvent::new("conflict_resolved")
                    .with_payload("type", serde_json::to_value(conflict.conflict_type).unwrap_or_default()),
            );
        });
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn caps(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|s| s.to_string()).collect()
    }

    fn task(id: &str, status: TaskStatus, assigned: Option<&str>, deps: &[&str]) -> Task {
        let mut t = Task::new("t".into(), HashSet::new(), crate::models::Priority::Medium, deps.iter().map(|s| s.to_string()).collect());
        t.id = id.to_string();
        t.status = status;
        t.assigned_agent = assigned.map(|s| s.to_string());
        t
    }

    #[test]
    fn detects_dependency_cycle() {
        let t1 = task("T1", TaskStatus::Pending, None, &["T2"]);
        let t2 = task("T2", TaskStatus::Pending, None, &["T1"]);
        let conflicts = detect(&[t1, t2], &[]);
        let deadlocks: Vec<_> = conflicts
            .iter()
            .filter(|c| c.conflict_type == ConflictType::DependencyDeadlock)
            .collect();
        assert_eq!(deadlocks.len(), 1);
        assert_eq!(deadlocks[0].severity, ConflictSeverity::High);
        assert!(deadlocks[0].task_ids.contains(&"T1".to_string()));
        assert!(deadlocks[0].task_ids.contains(&"T2".to_string()));
    }

    #[test]
    fn detects_resource_contention() {
        let t1 = task("T1", TaskStatus::Assigned, Some("a1"), &[]);
        let t2 = task("T2", TaskStatus::InProgress, Some("a1"), &[]);
        let conflicts = detect(&[t1, t2], &[]);
        assert!(conflicts.iter().any(|c| c.conflict_type == ConflictType::ResourceContention));
    }

    #[test]
    fn detects_capability_mismatch() {
        let mut t1 = task("T1", TaskStatus::Assigned, Some("a1"), &[]);
        t1.required_capabilities = caps(&["python", "sql"]);
        let agent = Agent::new("a1".into(), None, caps(&["python"]));
        let conflicts = detect(&[t1], &[agent]);
        let mismatches: Vec<_> = conflicts
            .iter()
            .filter(|c| c.conflict_type == ConflictType::CapabilityMismatch)
            .collect();
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].resolution.contains("sql"));
    }

    #[test]
    fn no_conflicts_on_healthy_snapshot() {
        let t1 = task("T1", TaskStatus::Completed, Some("a1"), &[]);
        let conflicts = detect(&[t1], &[]);
        assert!(conflicts.is_empty());
    }
}
