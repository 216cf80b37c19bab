//! The composing orchestrator: wires the event bus, sandbox factory,
//! state machine, queue, agent registry, routing, retry, supervisor,
//! worker pool, and pleading workflow together, and implements the
//! submit → route → enqueue → execute → settle pipeline every task
//! passes through.

pub mod agent_registry;
pub mod pleading;
pub mod retry;
pub mod routing;
pub mod state_machine;
pub mod supervisor;
pub mod task_queue;
pub mod worker_pool;

pub use agent_registry::{AgentRegistry, CapabilityQuery, RankedAgent, RegistryStats};
pub use pleading::PleadingManager;
pub use retry::{RetryHandler, RetryVerdict};
pub use routing::RoutingManager;
pub use state_machine::TaskStateMachine;
pub use supervisor::{AdmissionDecision, FailureKind, FailurePlan, WorkerPoolSupervisor};
pub use task_queue::{TaskQueue, TaskQueueStats};
pub use worker_pool::{ArtifactsInfo, ExecutionMetrics, WorkerOutcomeMsg, WorkerPool, WorkerTaskResult};

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::OrchestratorConfig;
use crate::constants::DEFAULT_MAX_REGISTERED_AGENTS;
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::executors::DefaultTaskExecutor;
use crate::models::agent::{AgentCapabilities, AgentProfile};
use crate::models::pleading::{PleadingStatus, PleadingVerdict};
use crate::models::task::{Priority, Task, TaskState, TaskType};
use crate::ports::{Ports, TaskExecutor};
use crate::sandbox::{ArtifactSandbox, SandboxQuotas};
use crate::validation::TaskContentValidator;

struct TaskRecordEntry {
    task: Task,
    last_result: Option<WorkerTaskResult>,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub state: TaskState,
    pub task_type: TaskType,
    pub priority: Priority,
    pub attempts: u32,
    pub assigned_agent: Option<String>,
    pub result: Option<WorkerTaskResult>,
    pub error: Option<String>,
}

/// The service capability descriptor returned by `getCapabilities`. This is
/// distinct from the agent catalog (`AgentRegistry::get_agents_by_capability`):
/// it answers "what can this orchestrator do", not "which agents are registered".
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitiesDescriptor {
    pub max_concurrent_tasks: usize,
    pub supported_task_types: Vec<TaskType>,
    pub pleading_support: bool,
    pub retry_support: bool,
    pub isolation_level: String,
    pub monitoring_enabled: bool,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerPoolMetrics {
    pub active_workers: u32,
    pub total_workers: u32,
    pub active_tasks: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetrics {
    pub active_tasks: usize,
    pub queued_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub worker_pool: WorkerPoolMetrics,
}

/// Top-level coordination layer. Always held behind an `Arc` since
/// `process_queue`/`execute_task` detach each admitted task onto its own
/// `tokio::spawn` so slow executions don't block admission of the next one.
pub struct Orchestrator {
    config: OrchestratorConfig,
    event_bus: Arc<EventBus>,
    state_machine: Arc<TaskStateMachine>,
    queue: Arc<TaskQueue>,
    registry: Arc<AgentRegistry>,
    routing: Arc<RoutingManager>,
    retry: Arc<RetryHandler>,
    supervisor: Arc<WorkerPoolSupervisor>,
    worker_pool: Arc<WorkerPool>,
    pleading: Arc<PleadingManager>,
    ports: Ports,
    content_validator: TaskContentValidator,
    tasks: RwLock<HashMap<String, TaskRecordEntry>>,
    completed_count: AtomicU64,
    failed_count: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, ports: Ports) -> Result<Arc<Self>> {
        let event_bus = Arc::new(EventBus::with_limits(
            config.events.max_events,
            config.events.handler_timeout_ms,
            config.events.retention_ms,
        ));
        let state_machine = Arc::new(TaskStateMachine::new());
        let queue = Arc::new(TaskQueue::new(config.queue.max_queue_size));
        let registry = Arc::new(AgentRegistry::new(DEFAULT_MAX_REGISTERED_AGENTS, event_bus.clone()));
        let routing = Arc::new(RoutingManager::new(registry.clone(), config.routing.clone(), event_bus.clone()));
        let retry = Arc::new(RetryHandler::new(config.retry.clone()));
        let supervisor = Arc::new(WorkerPoolSupervisor::new(
            config.supervisor.clone(),
            config.supervisor.min_pool_size as u32,
            event_bus.clone(),
        ));

        let executor: Arc<dyn TaskExecutor> = Arc::new(DefaultTaskExecutor::new(ports.model_provider.clone()));
        let worker_pool = Arc::new(WorkerPool::spawn(
            config.supervisor.min_pool_size,
            executor,
            supervisor.clone(),
            event_bus.clone(),
        ));
        let pleading = Arc::new(PleadingManager::new(event_bus.clone()));
        let content_validator = TaskContentValidator::new()?;

        Ok(Arc::new(Self {
            config,
            event_bus,
            state_machine,
            queue,
            registry,
            routing,
            retry,
            supervisor,
            worker_pool,
            pleading,
            ports,
            content_validator,
            tasks: RwLock::new(HashMap::new()),
            completed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
        }))
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub async fn register_agent(
        &self,
        id: String,
        capabilities: AgentCapabilities,
        max_concurrent: u32,
    ) -> Result<AgentProfile> {
        self.registry.register_agent(id, capabilities, max_concurrent).await
    }

    fn sandbox_quotas(&self) -> SandboxQuotas {
        SandboxQuotas {
            max_file_size_bytes: self.config.sandbox.max_file_size_bytes,
            max_total_size_bytes: self.config.sandbox.max_total_size_bytes,
            max_total_files: self.config.sandbox.max_total_files,
            max_path_length: self.config.sandbox.max_path_length,
        }
    }

    /// Intake: sanitizes content, consults policy, routes (every type but
    /// `file_editing`, which edits a declared project rather than running
    /// on a matched agent), enqueues, and kicks off admission.
    pub async fn submit_task(self: &Arc<Self>, mut task: Task) -> Result<String> {
        task.description = self
            .content_validator
            .validate_and_sanitize_description(&task.description)?;
        task.metadata = self.content_validator.validate_metadata(&task.metadata)?;

        let verdict = self.ports.policy_validator.validate(&task).await?;
        self.ports
            .performance_tracker
            .record_constitutional_validation(&task.id, &verdict)
            .await;
        self.event_bus
            .emit(
                "caws:validation",
                serde_json::json!({"taskId": task.id, "passed": verdict.passed, "verdict": verdict.verdict}),
            )
            .await;
        if !verdict.passed {
            self.event_bus
                .emit("caws:compliance", serde_json::json!({"taskId": task.id, "passed": false}))
                .await;
            return Err(OrchestratorError::PolicyRejected {
                verdict: verdict.verdict,
                remediation: verdict.remediation,
            });
        }
        self.event_bus
            .emit("caws:compliance", serde_json::json!({"taskId": task.id, "passed": true}))
            .await;

        if task.task_type != TaskType::FileEditing {
            let decision = self.routing.route_task(&task).await?;
            self.ports.performance_tracker.record_routing_decision(&decision).await;
            task.assigned_agent = Some(decision.agent_id);
        }

        let task_id = task.id.clone();
        self.queue.enqueue(task.clone()).await?;
        self.state_machine.initialize_task(&task_id).await;
        self.state_machine
            .transition(&task_id, TaskState::Queued, "enqueued")
            .await?;
        self.ports
            .performance_tracker
            .start_execution(&task_id, task.assigned_agent.as_deref().unwrap_or("unassigned"))
            .await;

        self.tasks.write().await.insert(
            task_id.clone(),
            TaskRecordEntry {
                task: task.clone(),
                last_result: None,
                last_error: None,
            },
        );

        self.event_bus
            .emit(
                "task:submitted",
                serde_json::json!({"taskId": task_id, "taskType": task.task_type}),
            )
            .await;

        self.process_queue().await;
        Ok(task_id)
    }

    /// Admits as many queued tasks as the supervisor currently allows,
    /// detaching each admitted task onto its own execution so admission
    /// doesn't block on a slow running task.
    pub async fn process_queue(self: &Arc<Self>) {
        loop {
            let Some(head) = self.queue.peek().await else {
                break;
            };
            let queue_depth = self.queue.size().await;
            let decision = self.supervisor.evaluate_capacity(queue_depth, head.priority).await;

            match decision {
                AdmissionDecision::Admit => {
                    let Some(task) = self.queue.dequeue().await else {
                        break;
                    };
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.execute_task(task).await;
                    });
                }
                AdmissionDecision::Queue | AdmissionDecision::Backpressure => break,
            }
        }
    }

    async fn execute_task(self: Arc<Self>, task: Task) {
        let task_id = task.id.clone();

        if let Err(err) = self.state_machine.transition(&task_id, TaskState::Assigned, "dequeued").await {
            warn!(task_id = %task_id, error = %err, "could not mark task assigned");
        } else {
            self.event_bus
                .emit(
                    "task:assigned",
                    serde_json::json!({"taskId": task_id, "agentId": task.assigned_agent}),
                )
                .await;
        }
        if let Err(err) = self
            .state_machine
            .transition(&task_id, TaskState::Running, "dispatched to worker")
            .await
        {
            warn!(task_id = %task_id, error = %err, "could not mark task running");
        } else {
            self.event_bus
                .emit("task:started", serde_json::json!({"taskId": task_id}))
                .await;
        }

        let sandbox = match ArtifactSandbox::open(
            Path::new(&self.config.sandbox.root_path),
            &task_id,
            self.sandbox_quotas(),
        )
        .await
        {
            Ok(sandbox) => Arc::new(sandbox),
            Err(err) => {
                self.handle_failure(task, err.to_string(), false).await;
                return;
            }
        };

        let outcome = self.worker_pool.execute(task.clone(), sandbox.clone(), task.attempts).await;
        match outcome {
            WorkerOutcomeMsg::Completed { mut result, .. } => {
                let manifest = sandbox.generate_manifest().await;
                if let Some(artifacts) = result.artifacts.as_mut() {
                    artifacts.manifest = manifest;
                }
                self.complete_task(task, result).await
            }
            WorkerOutcomeMsg::Failed { error, retryable, .. } => self.handle_failure(task, error, retryable).await,
        }
    }

    async fn complete_task(self: &Arc<Self>, task: Task, result: WorkerTaskResult) {
        if let Err(err) = self
            .state_machine
            .transition(&task.id, TaskState::Completed, "execution succeeded")
            .await
        {
            warn!(task_id = %task.id, error = %err, "could not mark task completed");
        }
        self.queue.complete(&task.id).await;
        self.ports
            .performance_tracker
            .complete_execution(&task.id, true, result.metrics.execution_time_ms)
            .await;
        if let Some(agent_id) = &task.assigned_agent {
            let _ = self
                .registry
                .update_performance(agent_id, result.metrics.execution_time_ms, true)
                .await;
        }

        if let Some(entry) = self.tasks.write().await.get_mut(&task.id) {
            entry.last_result = Some(result.clone());
            entry.last_error = None;
            entry.task = task.clone();
        }

        self.completed_count.fetch_add(1, Ordering::Relaxed);
        self.event_bus
            .emit(
                "task:completed",
                serde_json::json!({"taskId": task.id, "success": result.success}),
            )
            .await;

        self.process_queue().await;
    }

    async fn handle_failure(self: &Arc<Self>, mut task: Task, error: String, retryable: bool) {
        if let Err(err) = self.state_machine.transition(&task.id, TaskState::Failed, &error).await {
            warn!(task_id = %task.id, error = %err, "could not mark task failed");
        }
        self.queue.complete(&task.id).await;
        self.ports.performance_tracker.complete_execution(&task.id, false, 0).await;
        if let Some(agent_id) = &task.assigned_agent {
            let _ = self.registry.update_performance(agent_id, 0, false).await;
        }

        task.attempts += 1;
        if let Some(entry) = self.tasks.write().await.get_mut(&task.id) {
            entry.last_error = Some(error.clone());
            entry.task = task.clone();
        }

        self.failed_count.fetch_add(1, Ordering::Relaxed);
        self.event_bus
            .emit(
                "task:failed",
                serde_json::json!({"taskId": task.id, "error": error, "retryable": retryable}),
            )
            .await;

        if task.attempts >= self.config.pleading.escalation_attempt_threshold {
            self.initiate_pleading(task, error).await;
            return;
        }

        if !retryable {
            return;
        }

        match self.retry.evaluate(task.attempts) {
            RetryVerdict::Exhausted => self.initiate_pleading(task, error).await,
            RetryVerdict::RetryAfter(delay_ms) => {
                self.event_bus
                    .emit(
                        "task:retry_scheduled",
                        serde_json::json!({"taskId": task.id, "delayMs": delay_ms, "attempts": task.attempts}),
                    )
                    .await;
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    if let Err(err) = this.state_machine.transition(&task.id, TaskState::Queued, "retrying after failure").await {
                        warn!(task_id = %task.id, error = %err, "could not requeue task for retry");
                        return;
                    }
                    if let Err(err) = this.queue.enqueue(task).await {
                        warn!(error = %err, "could not enqueue retried task");
                        return;
                    }
                    this.process_queue().await;
                });
            }
        }
    }

    async fn initiate_pleading(&self, task: Task, error: String) {
        let required = self.config.pleading.required_approvals;
        let max_decisions = self.config.pleading.max_decisions;
        if let Err(err) = self.pleading.open_workflow(task.id.clone(), required, max_decisions).await {
            warn!(task_id = %task.id, error = %err, "failed to open pleading workflow");
            return;
        }
        self.event_bus
            .emit("task:pleading", serde_json::json!({"taskId": task.id, "error": error}))
            .await;
    }

    /// Records an approver's decision. Quorum approval requeues the task,
    /// crediting it one additional attempt and one additional `max_attempts`
    /// (the attempt counter is not reset); denial leaves it terminally failed.
    pub async fn submit_pleading_decision(
        self: &Arc<Self>,
        task_id: &str,
        approver_id: String,
        verdict: PleadingVerdict,
        comment: Option<String>,
    ) -> Result<PleadingStatus> {
        let status = self.pleading.submit_decision(task_id, approver_id, verdict, comment).await?;

        match status {
            PleadingStatus::Approved => {
                let requeued = {
                    let mut tasks = self.tasks.write().await;
                    tasks.get_mut(task_id).map(|entry| {
                        entry.task.attempts += 1;
                        entry.task.max_attempts += 1;
                        entry.task.clone()
                    })
                };
                if let Some(task) = requeued {
                    self.state_machine
                        .transition(task_id, TaskState::Queued, "pleading approved")
                        .await?;
                    self.queue.enqueue(task).await?;
                    self.process_queue().await;
                }
            }
            PleadingStatus::Denied => {
                self.event_bus
                    .emit("task:pleading_denied", serde_json::json!({"taskId": task_id}))
                    .await;
            }
            PleadingStatus::Open | PleadingStatus::Escalated => {}
        }

        Ok(status)
    }

    pub async fn get_task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let state = self.state_machine.get_state(task_id).await?;
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        Ok(TaskStatus {
            id: task_id.to_string(),
            state,
            task_type: entry.task.task_type,
            priority: entry.task.priority,
            attempts: entry.task.attempts,
            assigned_agent: entry.task.assigned_agent.clone(),
            result: entry.last_result.clone(),
            error: entry.last_error.clone(),
        })
    }

    /// Describes what this orchestrator instance supports, not which agents
    /// are registered with it (see `AgentRegistry::get_agents_by_capability`
    /// for the agent catalog).
    pub async fn get_capabilities(&self) -> CapabilitiesDescriptor {
        CapabilitiesDescriptor {
            max_concurrent_tasks: self.config.supervisor.max_pool_size,
            supported_task_types: vec![
                TaskType::Script,
                TaskType::ApiCall,
                TaskType::DataProcessing,
                TaskType::AiInference,
                TaskType::FileEditing,
            ],
            pleading_support: true,
            retry_support: true,
            isolation_level: "sandboxed-worker".to_string(),
            monitoring_enabled: true,
            metrics_enabled: true,
        }
    }

    pub async fn get_metrics(&self) -> OrchestratorMetrics {
        let queue_stats = self.queue.get_stats().await;
        OrchestratorMetrics {
            active_tasks: queue_stats.processing,
            queued_tasks: queue_stats.queued,
            completed_tasks: self.completed_count.load(Ordering::Relaxed),
            failed_tasks: self.failed_count.load(Ordering::Relaxed),
            worker_pool: WorkerPoolMetrics {
                active_workers: self.supervisor.active_workers(),
                total_workers: self.supervisor.total_workers(),
                active_tasks: self.supervisor.active_workers(),
            },
        }
    }

    pub async fn shutdown(&self) {
        self.worker_pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskPayload;
    use std::collections::HashMap as Map;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            api: crate::config::ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                api_key: None,
                allowed_origins: vec![],
            },
            queue: crate::config::QueueConfig {
                max_queue_size: 100,
                stale_task_age_ms: 300_000,
            },
            sandbox: crate::config::SandboxConfig {
                root_path: std::env::temp_dir().join("orchestrator-tests").to_string_lossy().into_owned(),
                max_file_size_bytes: 1024 * 1024,
                max_total_size_bytes: 10 * 1024 * 1024,
                max_total_files: 100,
                max_path_length: 4096,
            },
            retry: crate::config::RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 10,
                max_backoff_ms: 100,
                multiplier: 2.0,
                jitter: false,
            },
            supervisor: crate::config::SupervisorConfig {
                min_pool_size: 2,
                max_pool_size: 4,
                saturation_ratio: 0.8,
                queue_depth_threshold: 20,
                backpressure_cooldown_ms: 1000,
                failure_base_delay_ms: 50,
                failure_max_delay_ms: 500,
                failure_max_attempts: 3,
            },
            routing: crate::config::RoutingConfig {
                min_agents_required: 1,
                max_agents_to_consider: 10,
                max_routing_time_ms: 500,
                capability_match_weight: 0.6,
                load_balancing_weight: 0.4,
                urgent_priority_threshold: 9,
                high_priority_threshold: 6,
            },
            pleading: crate::config::PleadingConfig {
                required_approvals: 1,
                max_decisions: 2,
                escalation_attempt_threshold: 2,
            },
            events: crate::config::EventsConfig {
                max_events: 1000,
                handler_timeout_ms: 1000,
                retention_ms: 60_000,
            },
        }
    }

    fn script_task() -> Task {
        Task::new(
            TaskType::Script,
            "run a script".to_string(),
            TaskPayload::Script {
                code: "return 1".to_string(),
                args: Map::new(),
                timeout_ms: 1000,
            },
            5,
        )
    }

    async fn orchestrator_with_agent() -> Arc<Orchestrator> {
        let orchestrator = Orchestrator::new(test_config(), Ports::in_memory()).unwrap();
        orchestrator
            .register_agent(
                "agent-1".to_string(),
                AgentCapabilities {
                    task_types: [TaskType::Script].into_iter().collect(),
                    ..Default::default()
                },
                4,
            )
            .await
            .unwrap();
        orchestrator
    }

    #[tokio::test]
    async fn submit_task_with_no_eligible_agent_is_rejected() {
        let orchestrator = Orchestrator::new(test_config(), Ports::in_memory()).unwrap();
        let err = orchestrator.submit_task(script_task()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoEligibleAgent { .. }));
    }

    #[tokio::test]
    async fn submit_task_runs_to_completion() {
        let orchestrator = orchestrator_with_agent().await;
        let task_id = orchestrator.submit_task(script_task()).await.unwrap();

        for _ in 0..50 {
            let status = orchestrator.get_task_status(&task_id).await.unwrap();
            if status.state == TaskState::Completed {
                assert!(status.result.unwrap().success);
                orchestrator.shutdown().await;
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("task never reached Completed state");
    }

    #[tokio::test]
    async fn file_editing_task_skips_routing() {
        let orchestrator = Orchestrator::new(test_config(), Ports::in_memory()).unwrap();
        let project = tempfile::tempdir().unwrap();
        let task = Task::new(
            TaskType::FileEditing,
            "edit a file".to_string(),
            TaskPayload::FileEditing {
                project_root: project.path().to_str().unwrap().to_string(),
                operations: vec![crate::models::task::FileOperation::FileWrite {
                    path: "out.txt".to_string(),
                    content: "hi".to_string(),
                }],
            },
            5,
        );
        let task_id = orchestrator.submit_task(task).await.unwrap();
        assert!(orchestrator.get_task_status(&task_id).await.is_ok());
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn completed_task_emits_the_full_lifecycle_sequence_and_counts_toward_metrics() {
        let orchestrator = orchestrator_with_agent().await;
        let task_id = orchestrator.submit_task(script_task()).await.unwrap();

        for _ in 0..50 {
            if orchestrator.get_task_status(&task_id).await.unwrap().state == TaskState::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let events = orchestrator
            .event_bus
            .get_events(Some(&crate::events::EventFilter::kind("task:assigned")), 10)
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].task_id.as_deref(), Some(task_id.as_str()));

        let started = orchestrator
            .event_bus
            .get_events(Some(&crate::events::EventFilter::kind("task:started")), 10)
            .await;
        assert_eq!(started.len(), 1);

        let metrics = orchestrator.get_metrics().await;
        assert_eq!(metrics.completed_tasks, 1);
        assert_eq!(metrics.failed_tasks, 0);
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn get_capabilities_returns_the_service_descriptor() {
        let orchestrator = Orchestrator::new(test_config(), Ports::in_memory()).unwrap();
        let capabilities = orchestrator.get_capabilities().await;
        assert!(capabilities.supported_task_types.contains(&TaskType::Script));
        assert!(capabilities.pleading_support);
        assert!(capabilities.retry_support);
        assert_eq!(capabilities.max_concurrent_tasks, test_config().supervisor.max_pool_size);
    }
}
