//! Bounded FSM over `TaskState`. Transitions are synchronous and guarded
//! under a single lock so two callers can never race a task through
//! overlapping transitions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{OrchestratorError, Result};
use crate::models::task::TaskState;

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

struct TaskRecord {
    state: TaskState,
    history: Vec<TransitionRecord>,
}

fn allowed(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;
    matches!(
        (from, to),
        (Pending, Queued)
            | (Queued, Assigned)
            | (Queued, Cancelled)
            | (Assigned, Running)
            | (Assigned, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Failed, Queued)
    )
}

/// Per-task lifecycle tracker. Held by the orchestrator, consulted by the
/// queue, supervisor, and pleading workflow before they act on a task.
pub struct TaskStateMachine {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn initialize_task(&self, task_id: &str) {
        let mut tasks = self.tasks.write().await;
        tasks.insert(
            task_id.to_string(),
            TaskRecord {
                state: TaskState::Pending,
                history: Vec::new(),
            },
        );
    }

    pub async fn transition(&self, task_id: &str, to: TaskState, reason: &str) -> Result<TaskState> {
        let mut tasks = self.tasks.write().await;
        let record = tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        if !allowed(record.state, to) {
            return Err(OrchestratorError::InvalidTransition {
                from: record.state.to_string(),
                to: to.to_string(),
            });
        }

        record.history.push(TransitionRecord {
            from: record.state,
            to,
            reason: reason.to_string(),
            at: Utc::now(),
        });
        record.state = to;
        Ok(to)
    }

    pub async fn get_state(&self, task_id: &str) -> Result<TaskState> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|r| r.state)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))
    }

    pub async fn get_history(&self, task_id: &str) -> Result<Vec<TransitionRecord>> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|r| r.history.clone())
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
