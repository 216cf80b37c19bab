//! Trait boundaries the orchestration core depends on but does not own
//! the implementation of, plus in-memory reference implementations so the
//! crate runs standalone without an external model provider, policy
//! engine, or persistence backend wired in.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::agent::AgentProfile;
use crate::models::execution::ExecutionOutcome;
use crate::models::routing::RoutingDecision;
use crate::models::task::Task;
use crate::sandbox::ArtifactSandbox;

/// Result of a policy/spec validation pass, consulted during intake.
/// `passed = false` does not fail the call itself — the orchestrator
/// reads `passed` and turns it into a `PolicyRejected` error.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PolicyVerdict {
    pub passed: bool,
    pub verdict: String,
    pub remediation: Option<String>,
}

impl PolicyVerdict {
    pub fn approved() -> Self {
        Self {
            passed: true,
            verdict: "approved".to_string(),
            remediation: None,
        }
    }
}

/// Runs a task's payload and produces an outcome. Implemented per task
/// type by the `executors` module.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task, sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome>;
}

/// Independent check of an execution's result, separate from the
/// executor that produced it.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, task: &Task, outcome: &ExecutionOutcome) -> Result<bool>;
}

/// Pre-execution policy gate, consulted during intake before a task is
/// admitted to the queue. Rejection is signaled via `PolicyVerdict.passed`,
/// not by returning `Err` — only a genuine validator failure (e.g. the
/// backing service is unreachable) should propagate as `Err`.
#[async_trait]
pub trait PolicyValidator: Send + Sync {
    async fn validate(&self, task: &Task) -> Result<PolicyVerdict>;
}

/// Records execution spans independent of the agent registry's rolling
/// success-rate bookkeeping, for external metrics backends.
#[async_trait]
pub trait PerformanceTracker: Send + Sync {
    async fn start_execution(&self, task_id: &str, agent_id: &str);
    async fn complete_execution(&self, task_id: &str, success: bool, duration_ms: u64);
    async fn record_routing_decision(&self, decision: &RoutingDecision);
    async fn record_constitutional_validation(&self, task_id: &str, verdict: &PolicyVerdict);
}

/// Durable persistence of task state, independent of the in-memory task
/// queue and state machine.
#[async_trait]
pub trait TaskSnapshotRepository: Send + Sync {
    async fn save_snapshot(&self, task: &Task) -> Result<()>;
    async fn load_snapshot(&self, task_id: &str) -> Result<Option<Task>>;
}

/// Durable persistence of agent capability profiles, independent of the
/// in-memory agent registry.
#[async_trait]
pub trait WorkerCapabilityRepository: Send + Sync {
    async fn save_profile(&self, profile: &AgentProfile) -> Result<()>;
    async fn load_profiles(&self) -> Result<Vec<AgentProfile>>;
}

/// Tracks spend against a task's budget, independent of `TaskBudget`'s
/// static caps.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn debit(&self, task_id: &str, amount: u64) -> Result<()>;
    async fn balance(&self, task_id: &str) -> Result<u64>;
}

/// The narrow contract `ai_inference` tasks delegate to. Local/GPU
/// inference runtimes, cost tracking, and hot-swap between providers are
/// all out of scope here; this is only the seam a real one would plug
/// into.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, prompt: &str, model_hint: Option<&str>) -> Result<String>;
}

/// Deterministic stand-in with no real inference behind it, for
/// deployments with no model provider wired in.
pub struct EchoModelProvider;

#[async_trait]
impl ModelProvider for EchoModelProvider {
    async fn complete(&self, prompt: &str, model_hint: Option<&str>) -> Result<String> {
        match model_hint {
            Some(hint) => Ok(format!("[{hint}] {prompt}")),
            None => Ok(prompt.to_string()),
        }
    }
}

/// Always verifies successfully. The reference implementation for
/// deployments with no separate verification stage.
pub struct NoopVerifier;

#[async_trait]
impl Verifier for NoopVerifier {
    async fn verify(&self, _task: &Task, outcome: &ExecutionOutcome) -> Result<bool> {
        Ok(matches!(outcome, ExecutionOutcome::Succeeded { .. }))
    }
}

/// Admits every task. The reference implementation for deployments with
/// no external policy engine.
pub struct PermissiveValidator;

#[async_trait]
impl PolicyValidator for PermissiveValidator {
    async fn validate(&self, _task: &Task) -> Result<PolicyVerdict> {
        Ok(PolicyVerdict::approved())
    }
}

struct ExecutionSpan {
    agent_id: String,
    started_at: chrono::DateTime<chrono::Utc>,
}

/// Process-local performance tracker, keyed by task id.
#[derive(Default)]
pub struct InMemoryPerformanceTracker {
    spans: RwLock<HashMap<String, ExecutionSpan>>,
    completed: RwLock<Vec<(String, bool, u64)>>,
    routing_decisions: RwLock<Vec<RoutingDecision>>,
    constitutional_validations: RwLock<Vec<(String, bool)>>,
}

impl InMemoryPerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn history(&self) -> Vec<(String, bool, u64)> {
        self.completed.read().await.clone()
    }

    pub async fn routing_history(&self) -> Vec<RoutingDecision> {
        self.routing_decisions.read().await.clone()
    }

    pub async fn validation_history(&self) -> Vec<(String, bool)> {
        self.constitutional_validations.read().await.clone()
    }
}

#[async_trait]
impl PerformanceTracker for InMemoryPerformanceTracker {
    async fn start_execution(&self, task_id: &str, agent_id: &str) {
        self.spans.write().await.insert(
            task_id.to_string(),
            ExecutionSpan {
                agent_id: agent_id.to_string(),
                started_at: chrono::Utc::now(),
            },
        );
    }

    async fn complete_execution(&self, task_id: &str, success: bool, duration_ms: u64) {
        self.spans.write().await.remove(task_id);
        self.completed
            .write()
            .await
            .push((task_id.to_string(), success, duration_ms));
    }

    async fn record_routing_decision(&self, decision: &RoutingDecision) {
        self.routing_decisions.write().await.push(decision.clone());
    }

    async fn record_constitutional_validation(&self, task_id: &str, verdict: &PolicyVerdict) {
        self.constitutional_validations
            .write()
            .await
            .push((task_id.to_string(), verdict.passed));
    }
}

/// Process-local task snapshot store.
#[derive(Default)]
pub struct InMemoryTaskSnapshotRepository {
    snapshots: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskSnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskSnapshotRepository for InMemoryTaskSnapshotRepository {
    async fn save_snapshot(&self, task: &Task) -> Result<()> {
        self.snapshots.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load_snapshot(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.snapshots.read().await.get(task_id).cloned())
    }
}

/// Process-local agent profile store.
#[derive(Default)]
pub struct InMemoryWorkerCapabilityRepository {
    profiles: RwLock<HashMap<String, AgentProfile>>,
}

impl InMemoryWorkerCapabilityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerCapabilityRepository for InMemoryWorkerCapabilityRepository {
    async fn save_profile(&self, profile: &AgentProfile) -> Result<()> {
        self.profiles.write().await.insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn load_profiles(&self) -> Result<Vec<AgentProfile>> {
        Ok(self.profiles.read().await.values().cloned().collect())
    }
}

/// Process-local credit ledger. Tracks cumulative spend per task with no
/// upper bound of its own; `TaskBudget` is what enforces a cap.
#[derive(Default)]
pub struct InMemoryCreditLedger {
    balances: RwLock<HashMap<String, u64>>,
}

impl InMemoryCreditLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn debit(&self, task_id: &str, amount: u64) -> Result<()> {
        let mut balances = self.balances.write().await;
        *balances.entry(task_id.to_string()).or_insert(0) += amount;
        Ok(())
    }

    async fn balance(&self, task_id: &str) -> Result<u64> {
        Ok(*self.balances.read().await.get(task_id).unwrap_or(&0))
    }
}

/// Convenience bundle so the orchestrator can be constructed with one
/// argument of default, in-memory ports.
pub struct Ports {
    pub verifier: Arc<dyn Verifier>,
    pub policy_validator: Arc<dyn PolicyValidator>,
    pub performance_tracker: Arc<dyn PerformanceTracker>,
    pub task_snapshots: Arc<dyn TaskSnapshotRepository>,
    pub worker_capabilities: Arc<dyn WorkerCapabilityRepository>,
    pub credit_ledger: Arc<dyn CreditLedger>,
    pub model_provider: Arc<dyn ModelProvider>,
}

impl Ports {
    pub fn in_memory() -> Self {
        Self {
            verifier: Arc::new(NoopVerifier),
            policy_validator: Arc::new(PermissiveValidator),
            performance_tracker: Arc::new(InMemoryPerformanceTracker::new()),
            task_snapshots: Arc::new(InMemoryTaskSnapshotRepository::new()),
            worker_capabilities: Arc::new(InMemoryWorkerCapabilityRepository::new()),
            credit_ledger: Arc::new(InMemoryCreditLedger::new()),
            model_provider: Arc::new(EchoModelProvider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskPayload;
    use std::collections::HashMap as Map;

    fn sample_task() -> Task {
        Task::new(
            crate::models::task::TaskType::Script,
            "echo hi".to_string(),
            TaskPayload::Script {
                code: "echo hi".to_string(),
                args: Map::new(),
                timeout_ms: 1000,
            },
            5,
        )
    }

    #[tokio::test]
    async fn noop_verifier_passes_only_successes() {
        let verifier = NoopVerifier;
        let task = sample_task();
        assert!(verifier
            .verify(&task, &ExecutionOutcome::succeeded(serde_json::json!({})))
            .await
            .unwrap());
        assert!(!verifier
            .verify(&task, &ExecutionOutcome::failed("boom", true))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn permissive_validator_admits_everything() {
        let validator = PermissiveValidator;
        assert!(validator.validate(&sample_task()).await.is_ok());
    }

    #[tokio::test]
    async fn in_memory_snapshot_repository_round_trips() {
        let repo = InMemoryTaskSnapshotRepository::new();
        let task = sample_task();
        repo.save_snapshot(&task).await.unwrap();
        let loaded = repo.load_snapshot(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
    }

    #[tokio::test]
    async fn in_memory_credit_ledger_accumulates_debits() {
        let ledger = InMemoryCreditLedger::new();
        ledger.debit("t1", 10).await.unwrap();
        ledger.debit("t1", 5).await.unwrap();
        assert_eq!(ledger.balance("t1").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn in_memory_performance_tracker_records_completions() {
        let tracker = InMemoryPerformanceTracker::new();
        tracker.start_execution("t1", "a1").await;
        tracker.complete_execution("t1", true, 250).await;
        let history = tracker.history().await;
        assert_eq!(history, vec![("t1".to_string(), true, 250)]);
    }
}
