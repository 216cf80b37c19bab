use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

use crate::constants::{HIGH_PRIORITY_THRESHOLD, URGENT_PRIORITY_THRESHOLD};

/// The five task types the worker pool knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Script,
    ApiCall,
    DataProcessing,
    AiInference,
    FileEditing,
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "script" => Ok(TaskType::Script),
            "api_call" => Ok(TaskType::ApiCall),
            "data_processing" => Ok(TaskType::DataProcessing),
            "ai_inference" => Ok(TaskType::AiInference),
            "file_editing" => Ok(TaskType::FileEditing),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Script => "script",
            TaskType::ApiCall => "api_call",
            TaskType::DataProcessing => "data_processing",
            TaskType::AiInference => "ai_inference",
            TaskType::FileEditing => "file_editing",
        };
        write!(f, "{s}")
    }
}

/// Closed priority enumeration, mapped from the integer `priority` field
/// on intake. `0..=2` = low, `3..=5` = normal, `6..=8` = high, `9..=10` = urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn from_level(level: u8) -> Self {
        if level >= URGENT_PRIORITY_THRESHOLD {
            Priority::Critical
        } else if level >= HIGH_PRIORITY_THRESHOLD {
            Priority::High
        } else if level >= 3 {
            Priority::Normal
        } else {
            Priority::Low
        }
    }

    pub fn is_urgent(&self) -> bool {
        matches!(self, Priority::Critical)
    }
}

/// Resource envelope a task is permitted to consume.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskBudget {
    pub max_files: Option<usize>,
    pub max_loc: Option<usize>,
    pub max_tokens: Option<u32>,
}

/// Tagged payload, one variant per `TaskType`. Replaces an "any"-typed
/// field with a closed, per-type shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    Script {
        code: String,
        args: HashMap<String, String>,
        timeout_ms: u64,
    },
    ApiCall {
        method: String,
        url: String,
        headers: HashMap<String, String>,
        body: Option<serde_json::Value>,
        timeout_ms: u64,
    },
    DataProcessing {
        operation: DataOperation,
        items: Vec<serde_json::Value>,
    },
    AiInference {
        prompt: String,
        model_hint: Option<String>,
    },
    FileEditing {
        project_root: String,
        operations: Vec<FileOperation>,
    },
}

/// A tagged per-item operation for the `data_processing` executor. Each
/// variant is a closed, data-only description of the transform to apply —
/// never executable code — so the worker can evaluate it without a
/// scripting engine in the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DataOperation {
    Filter { predicate: DataPredicate },
    Map { transform: DataTransform },
    Reduce {
        reducer: DataReducer,
        initial: Option<serde_json::Value>,
    },
    Sort { key: String, descending: bool },
}

/// A guarded per-item predicate for `filter`. Failing to evaluate against
/// a given item (e.g. a missing field) is treated as "does not match"
/// rather than propagated, per the per-item exception rule in spec §4.9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataPredicate {
    FieldExists { field: String },
    FieldEquals { field: String, value: serde_json::Value },
    FieldGreaterThan { field: String, value: f64 },
    FieldLessThan { field: String, value: f64 },
    Not(Box<DataPredicate>),
    And(Vec<DataPredicate>),
    Or(Vec<DataPredicate>),
}

/// A guarded per-item transform for `map`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataTransform {
    PluckField { field: String },
    SetField { field: String, value: serde_json::Value },
    MultiplyField { field: String, factor: f64 },
    UppercaseField { field: String },
}

/// An accumulator step for `reduce`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataReducer {
    SumField { field: String },
    CountItems,
    ConcatField { field: String, separator: String },
    MaxField { field: String },
    MinField { field: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileOperation {
    FileRead { path: String },
    FileSearchReplace { path: String, search: String, replace: String },
    FileWrite { path: String, content: String },
    RunTerminalCmd { command: String },
}

/// The unit of work submitted to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    pub required_capabilities: HashSet<String>,
    pub budget: TaskBudget,
    pub timeout_ms: u64,
    pub payload: TaskPayload,
    pub metadata: HashMap<String, String>,
    pub priority_level: u8,
    pub priority: Priority,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub assigned_agent: Option<String>,
}

impl Task {
    pub fn new(
        task_type: TaskType,
        description: String,
        payload: TaskPayload,
        priority_level: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            description,
            required_capabilities: HashSet::new(),
            budget: TaskBudget::default(),
            timeout_ms: 30_000,
            payload,
            metadata: HashMap::new(),
            priority_level,
            priority: Priority::from_level(priority_level),
            attempts: 0,
            max_attempts: 3,
            created_at: Utc::now(),
            assigned_agent: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: HashSet<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Bounded lifecycle states. See `crate::orchestrator::state_machine` for
/// the transition graph these values participate in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
