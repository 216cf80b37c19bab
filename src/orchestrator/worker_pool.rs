//! Isolated execution contexts that run task payloads. Workers
//! communicate with the rest of the orchestrator only by message —
//! `execute()` hands a task across a channel and awaits a response, the
//! same boundary a queue-lease loop draws between itself and the runtime
//! that owns handler state. A panicking executor is isolated per task via
//! its own `tokio::spawn`, standing in for a crashed OS-level worker
//! process in this in-process pool.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{info, warn};

use crate::constants::WORKER_SHUTDOWN_GRACE;
use crate::events::EventBus;
use crate::models::manifest::ArtifactManifest;
use crate::models::execution::ExecutionOutcome;
use crate::models::task::Task;
use crate::orchestrator::supervisor::{FailureKind, WorkerPoolSupervisor};
use crate::ports::TaskExecutor;
use crate::sandbox::ArtifactSandbox;

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMetrics {
    pub execution_time_ms: u64,
    /// No OS-level sampling is wired in; approximated as wall-clock time.
    pub cpu_usage_ms: u64,
    /// No OS-level sampling is wired in; cost/resource metering is out of scope.
    pub memory_bytes: u64,
    pub output_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactsInfo {
    pub manifest: ArtifactManifest,
    pub root_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerTaskResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub logs: Vec<String>,
    pub metrics: ExecutionMetrics,
    pub artifacts: Option<ArtifactsInfo>,
}

#[derive(Debug, Clone)]
pub enum WorkerOutcomeMsg {
    Completed { task_id: String, result: WorkerTaskResult },
    Failed { task_id: String, error: String, retryable: bool },
}

struct WorkItem {
    task: Task,
    sandbox: Arc<ArtifactSandbox>,
    attempt: u32,
    respond_to: oneshot::Sender<WorkerOutcomeMsg>,
}

/// A set of workers pulling from one shared lease queue, with a
/// watch-channel shutdown signal workers race against every time they'd
/// otherwise block waiting for work.
pub struct WorkerPool {
    work_tx: mpsc::Sender<WorkItem>,
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn spawn(
        pool_size: usize,
        executor: Arc<dyn TaskExecutor>,
        supervisor: Arc<WorkerPoolSupervisor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(1024);
        let shared_rx = Arc::new(Mutex::new(work_rx));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(pool_size);
        for worker_id in 0..pool_size {
            let queue = shared_rx.clone();
            let executor = executor.clone();
            let supervisor = supervisor.clone();
            let event_bus = event_bus.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, executor, supervisor, event_bus, &mut shutdown_rx).await;
            }));
        }

        supervisor.set_max_workers(pool_size as u32);
        Self {
            work_tx,
            shutdown_tx,
            joins: Mutex::new(joins),
        }
    }

    /// Hands a task to the pool and awaits the worker's response. This is
    /// one of the control plane's defined suspension points.
    pub async fn execute(&self, task: Task, sandbox: Arc<ArtifactSandbox>, attempt: u32) -> WorkerOutcomeMsg {
        let task_id = task.id.clone();
        let (respond_to, response_rx) = oneshot::channel();

        if self
            .work_tx
            .send(WorkItem { task, sandbox, attempt, respond_to })
            .await
            .is_err()
        {
            return WorkerOutcomeMsg::Failed {
                task_id,
                error: "worker pool is shut down".to_string(),
                retryable: false,
            };
        }

        response_rx.await.unwrap_or(WorkerOutcomeMsg::Failed {
            task_id,
            error: "worker pool dropped the task before responding".to_string(),
            retryable: true,
        })
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops admitting new leases, lets in-flight tasks finish up to the
    /// grace period, then force-terminates any worker still running.
    pub async fn shutdown(&self) {
        self.request_shutdown();

        let handles = std::mem::take(&mut *self.joins.lock().await);
        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let collector = tokio::spawn(async move {
            for handle in handles {
                let _ = handle.await;
            }
        });

        match tokio::time::timeout(WORKER_SHUTDOWN_GRACE, collector).await {
            Ok(_) => info!("worker pool shut down within grace period"),
            Err(_) => {
                warn!("worker pool grace period elapsed, force-terminating remaining workers");
                for abort_handle in abort_handles {
                    abort_handle.abort();
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    executor: Arc<dyn TaskExecutor>,
    supervisor: Arc<WorkerPoolSupervisor>,
    event_bus: Arc<EventBus>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    event_bus
        .emit("worker.ready", serde_json::json!({"workerId": worker_id}))
        .await;

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let item = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            item = async { queue.lock().await.recv().await } => item,
        };

        let Some(item) = item else {
            break;
        };

        supervisor.mark_busy();
        let outcome_msg = run_one(worker_id, &executor, &supervisor, &event_bus, item).await;
        supervisor.mark_idle();

        if let WorkerOutcomeMsg::Completed { task_id, .. } = &outcome_msg {
            event_bus
                .emit("worker_metrics", serde_json::json!({"workerId": worker_id, "lastTaskId": task_id}))
                .await;
        }
    }
}

async fn run_one(
    worker_id: usize,
    executor: &Arc<dyn TaskExecutor>,
    supervisor: &Arc<WorkerPoolSupervisor>,
    event_bus: &Arc<EventBus>,
    item: WorkItem,
) -> WorkerOutcomeMsg {
    let WorkItem { task, sandbox, attempt, respond_to } = item;
    let task_id = task.id.clone();
    let started = Instant::now();

    let exec = executor.clone();
    let sandbox_for_exec = sandbox.clone();
    let task_for_exec = task.clone();
    let isolated = tokio::spawn(async move { exec.execute(&task_for_exec, &sandbox_for_exec).await });

    let outcome_msg = match isolated.await {
        Ok(Ok(outcome)) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            to_message(&task_id, outcome, &sandbox, elapsed_ms)
        }
        Ok(Err(err)) => {
            let kind = match &err {
                crate::error::OrchestratorError::ExecutionTimeout { .. } => FailureKind::Timeout,
                crate::error::OrchestratorError::Validation(_) | crate::error::OrchestratorError::UnsupportedType(_) => {
                    FailureKind::InvalidTask
                }
                _ => FailureKind::Timeout,
            };
            let plan = supervisor.classify_failure(kind, attempt);
            WorkerOutcomeMsg::Failed {
                task_id: task_id.clone(),
                error: err.to_string(),
                retryable: plan.retry,
            }
        }
        Err(join_err) => {
            let plan = supervisor.classify_failure(FailureKind::WorkerCrash, attempt);
            warn!(worker_id, task_id = %task_id, error = %join_err, "worker task panicked");
            event_bus
                .emit("worker.crashed", serde_json::json!({"workerId": worker_id, "taskId": task_id}))
                .await;
            WorkerOutcomeMsg::Failed {
                task_id: task_id.clone(),
                error: format!("worker crashed: {join_err}"),
                retryable: plan.retry,
            }
        }
    };

    let _ = respond_to.send(outcome_msg.clone());
    outcome_msg
}

fn to_message(task_id: &str, outcome: ExecutionOutcome, sandbox: &ArtifactSandbox, elapsed_ms: u64) -> WorkerOutcomeMsg {
    match outcome {
        ExecutionOutcome::Succeeded { result, logs } => WorkerOutcomeMsg::Completed {
            task_id: task_id.to_string(),
            result: build_result(true, Some(result), logs, sandbox, elapsed_ms),
        },
        ExecutionOutcome::Failed { error, retryable, logs } => {
            let _ = build_result(false, None, logs, sandbox, elapsed_ms);
            WorkerOutcomeMsg::Failed {
                task_id: task_id.to_string(),
                error,
                retryable,
            }
        }
        ExecutionOutcome::TimedOut { timeout_ms } => WorkerOutcomeMsg::Failed {
            task_id: task_id.to_string(),
            error: format!("task timed out after {timeout_ms}ms"),
            retryable: true,
        },
        ExecutionOutcome::Running => WorkerOutcomeMsg::Failed {
            task_id: task_id.to_string(),
            error: "executor returned without completing".to_string(),
            retryable: true,
        },
    }
}

fn build_result(
    success: bool,
    result: Option<serde_json::Value>,
    logs: Vec<String>,
    sandbox: &ArtifactSandbox,
    elapsed_ms: u64,
) -> WorkerTaskResult {
    let output_size = result.as_ref().map(|v| v.to_string().len() as u64).unwrap_or(0);
    WorkerTaskResult {
        success,
        result,
        logs,
        metrics: ExecutionMetrics {
            execution_time_ms: elapsed_ms,
            cpu_usage_ms: elapsed_ms,
            memory_bytes: 0,
            output_size,
        },
        artifacts: None,
        // manifest is filled in by the orchestrator after generate_manifest(),
        // since that call is async and this helper is synchronous.
    }
    .with_root_path(sandbox.root().to_string_lossy().into_owned())
}

impl WorkerTaskResult {
    fn with_root_path(mut self, root_path: String) -> Self {
        if self.artifacts.is_none() {
            self.artifacts = Some(ArtifactsInfo {
                manifest: ArtifactManifest::new(String::new(), Vec::new()),
                root_path,
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, Result};
    use crate::models::task::{TaskPayload, TaskType};
    use crate::sandbox::SandboxQuotas;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedExecutor {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(&self, _task: &Task, _sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
            if self.remaining_failures.load(Ordering::SeqCst) > 0 {
                self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
                return Ok(ExecutionOutcome::failed("intentional failure", true));
            }
            Ok(ExecutionOutcome::succeeded(serde_json::json!({"ok": true})))
        }
    }

    struct PanicExecutor;

    #[async_trait]
    impl TaskExecutor for PanicExecutor {
        async fn execute(&self, _task: &Task, _sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
            panic!("simulated worker crash");
        }
    }

    fn sample_task() -> Task {
        Task::new(
            TaskType::Script,
            "echo hi".to_string(),
            TaskPayload::Script {
                code: "return 1".to_string(),
                args: HashMap::new(),
                timeout_ms: 1000,
            },
            5,
        )
    }

    async fn sandbox(dir: &tempfile::TempDir, id: &str) -> Arc<ArtifactSandbox> {
        Arc::new(ArtifactSandbox::open(dir.path(), id, SandboxQuotas::default()).await.unwrap())
    }

    #[tokio::test]
    async fn executes_task_and_returns_completion() {
        let event_bus = Arc::new(EventBus::new());
        let supervisor = Arc::new(WorkerPoolSupervisor::new(test_supervisor_config(), 2, event_bus.clone()));
        let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptedExecutor { remaining_failures: AtomicU32::new(0) });
        let pool = WorkerPool::spawn(1, executor, supervisor, event_bus);

        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        let outcome = pool.execute(task.clone(), sandbox(&dir, &task.id).await, 0).await;

        match outcome {
            WorkerOutcomeMsg::Completed { result, .. } => assert!(result.success),
            other => panic!("expected completion, got {other:?}"),
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn executor_failure_is_surfaced_as_failed_message() {
        let event_bus = Arc::new(EventBus::new());
        let supervisor = Arc::new(WorkerPoolSupervisor::new(test_supervisor_config(), 2, event_bus.clone()));
        let executor: Arc<dyn TaskExecutor> = Arc::new(ScriptedExecutor { remaining_failures: AtomicU32::new(1) });
        let pool = WorkerPool::spawn(1, executor, supervisor, event_bus);

        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        let outcome = pool.execute(task.clone(), sandbox(&dir, &task.id).await, 0).await;

        match outcome {
            WorkerOutcomeMsg::Failed { retryable, .. } => assert!(retryable),
            other => panic!("expected failure, got {other:?}"),
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_executor_is_isolated_and_reported_as_crash() {
        let event_bus = Arc::new(EventBus::new());
        let supervisor = Arc::new(WorkerPoolSupervisor::new(test_supervisor_config(), 2, event_bus.clone()));
        let executor: Arc<dyn TaskExecutor> = Arc::new(PanicExecutor);
        let pool = WorkerPool::spawn(1, executor, supervisor, event_bus);

        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        let outcome = pool.execute(task.clone(), sandbox(&dir, &task.id).await, 0).await;

        match outcome {
            WorkerOutcomeMsg::Failed { error, .. } => assert!(error.contains("worker crashed")),
            other => panic!("expected a crash-classified failure, got {other:?}"),
        }
        pool.shutdown().await;
    }

    fn test_supervisor_config() -> crate::config::SupervisorConfig {
        crate::config::SupervisorConfig {
            min_pool_size: 1,
            max_pool_size: 4,
            saturation_ratio: 0.8,
            queue_depth_threshold: 20,
            backpressure_cooldown_ms: 1000,
            failure_base_delay_ms: 50,
            failure_max_delay_ms: 500,
            failure_max_attempts: 3,
        }
    }
}
