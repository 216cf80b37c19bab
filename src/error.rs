use thiserror::Error;

/// Convenience alias for `Result<T, OrchestratorError>`.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Top-level error type for the orchestrator core.
///
/// Each variant family corresponds to one taxonomy entry from the
/// orchestrator's error handling design: validation, routing, sandbox,
/// execution, policy, and verification errors.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported task type: {0}")]
    UnsupportedType(String),

    #[error("no eligible agent for task {task_id}")]
    NoEligibleAgent { task_id: String },

    #[error("agent registry is full (max {max_agents})")]
    RegistryFull { max_agents: usize },

    #[error("agent registry is not ready")]
    RegistryNotReady,

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent {0} is already registered")]
    AgentAlreadyRegistered(String),

    #[error("invalid artifact path: {0}")]
    InvalidArtifactPath(String),

    #[error("quota exceeded ({kind}): observed {observed}, limit {limit}")]
    QuotaExceeded {
        kind: String,
        observed: u64,
        limit: u64,
    },

    #[error("task execution error for {task_id}: {message}")]
    Execution { task_id: String, message: String },

    #[error("task execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("task {task_id} exhausted retries after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        task_id: String,
        attempts: u32,
        last_error: String,
    },

    #[error("policy rejected: {verdict}")]
    PolicyRejected {
        verdict: String,
        remediation: Option<String>,
    },

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("invalid task state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("task queue is full (max {max_size})")]
    QueueFull { max_size: usize },

    #[error("no active pleading workflow for task {0}")]
    NoActiveWorkflow(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// A short, stable machine-readable code for API responses and events.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "INVALID_TASK",
            OrchestratorError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            OrchestratorError::NoEligibleAgent { .. } => "NO_ELIGIBLE_AGENT",
            OrchestratorError::RegistryFull { .. } => "REGISTRY_FULL",
            OrchestratorError::RegistryNotReady => "REGISTRY_NOT_READY",
            OrchestratorError::AgentNotFound(_) => "AGENT_NOT_FOUND",
            OrchestratorError::AgentAlreadyRegistered(_) => "AGENT_ALREADY_REGISTERED",
            OrchestratorError::InvalidArtifactPath(_) => "INVALID_ARTIFACT_PATH",
            OrchestratorError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            OrchestratorError::Execution { .. } => "EXECUTION_FAILED",
            OrchestratorError::ExecutionTimeout { .. } => "EXECUTION_TIMEOUT",
            OrchestratorError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            OrchestratorError::PolicyRejected { .. } => "POLICY_REJECTED",
            OrchestratorError::Verification(_) => "VERIFICATION_FAILED",
            OrchestratorError::InvalidTransition { .. } => "INVALID_TRANSITION",
            OrchestratorError::TaskNotFound(_) => "TASK_NOT_FOUND",
            OrchestratorError::DuplicateTask(_) => "DUPLICATE_TASK",
            OrchestratorError::QueueFull { .. } => "QUEUE_FULL",
            OrchestratorError::NoActiveWorkflow(_) => "NO_ACTIVE_WORKFLOW",
            OrchestratorError::Configuration(_) => "CONFIGURATION_ERROR",
            OrchestratorError::Http(_) => "HTTP_ERROR",
            OrchestratorError::Serialization(_) => "SERIALIZATION_ERROR",
            OrchestratorError::Io(_) => "IO_ERROR",
            OrchestratorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
