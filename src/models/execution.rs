use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single attempt at running a task on an assigned agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: String,
    pub agent_id: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Running,
    Succeeded {
        result: serde_json::Value,
        #[serde(default)]
        logs: Vec<String>,
    },
    Failed {
        error: String,
        retryable: bool,
        #[serde(default)]
        logs: Vec<String>,
    },
    TimedOut { timeout_ms: u64 },
}

impl ExecutionOutcome {
    pub fn succeeded(result: serde_json::Value) -> Self {
        ExecutionOutcome::Succeeded { result, logs: Vec::new() }
    }

    pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
        ExecutionOutcome::Failed {
            error: error.into(),
            retryable,
            logs: Vec::new(),
        }
    }

    pub fn logs(&self) -> &[String] {
        match self {
            ExecutionOutcome::Succeeded { logs, .. } | ExecutionOutcome::Failed { logs, .. } => logs,
            _ => &[],
        }
    }
}

impl TaskExecution {
    pub fn start(task_id: String, agent_id: String, attempt: u32) -> Self {
        Self {
            task_id,
            agent_id,
            attempt,
            started_at: Utc::now(),
            finished_at: None,
            outcome: ExecutionOutcome::Running,
        }
    }

    pub fn complete(&mut self, outcome: ExecutionOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = outcome;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}
