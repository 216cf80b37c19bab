//! Admission control and failure classification for the worker pool,
//! repurposing the circuit breaker's closed/open/half-open bookkeeping as
//! an admit/queue/backpressure decision.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::SupervisorConfig;
use crate::events::EventBus;
use crate::models::task::Priority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    Queue,
    Backpressure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    WorkerCrash,
    Timeout,
    InvalidTask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailurePlan {
    pub replace_worker: bool,
    pub retry: bool,
    pub delay_ms: u64,
}

/// Tracks busy-worker count and saturation-triggered backpressure.
/// Holds an `Arc<EventBus>`, not a reference to the pool it watches over.
pub struct WorkerPoolSupervisor {
    config: SupervisorConfig,
    busy_workers: AtomicU32,
    max_workers: AtomicU32,
    cooldown_until: RwLock<Option<DateTime<Utc>>>,
    event_bus: Arc<EventBus>,
}

impl WorkerPoolSupervisor {
    pub fn new(config: SupervisorConfig, initial_max_workers: u32, event_bus: Arc<EventBus>) -> Self {
        Self {
            config,
            busy_workers: AtomicU32::new(0),
            max_workers: AtomicU32::new(initial_max_workers),
            cooldown_until: RwLock::new(None),
            event_bus,
        }
    }

    pub fn set_max_workers(&self, max_workers: u32) {
        self.max_workers.store(max_workers, Ordering::Relaxed);
    }

    pub fn mark_busy(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_idle(&self) {
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_workers(&self) -> u32 {
        self.busy_workers.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> u32 {
        self.max_workers.load(Ordering::Relaxed)
    }

    fn saturation(&self) -> f64 {
        let max = self.max_workers.load(Ordering::Relaxed);
        if max == 0 {
            1.0
        } else {
            self.busy_workers.load(Ordering::Relaxed) as f64 / max as f64
        }
    }

    /// Urgent priority bypasses saturation-based queueing, but never the
    /// hard worker cap: if every worker is busy there is nothing to admit to.
    pub async fn evaluate_capacity(&self, queue_depth: usize, priority: Priority) -> AdmissionDecision {
        let at_worker_cap = self.busy_workers.load(Ordering::Relaxed) >= self.max_workers.load(Ordering::Relaxed);
        if at_worker_cap {
            return AdmissionDecision::Queue;
        }

        if let Some(until) = *self.cooldown_until.read().await {
            if Utc::now() < until {
                return AdmissionDecision::Queue;
            }
            *self.cooldown_until.write().await = None;
            info!("backpressure cooldown elapsed, resuming admission");
        }

        let saturated = self.saturation() >= self.config.saturation_ratio;
        if !saturated {
            return AdmissionDecision::Admit;
        }

        if priority.is_urgent() {
            return AdmissionDecision::Admit;
        }

        if queue_depth >= self.config.queue_depth_threshold {
            let until = Utc::now() + chrono::Duration::milliseconds(self.config.backpressure_cooldown_ms);
            *self.cooldown_until.write().await = Some(until);
            warn!(queue_depth, "entering backpressure");
            self.event_bus
                .emit("supervisor.backpressure", serde_json::json!({"queueDepth": queue_depth}))
                .await;
            AdmissionDecision::Backpressure
        } else {
            AdmissionDecision::Queue
        }
    }

    /// `worker_crash` replaces the worker and backs off
    /// `baseDelayMs * 2^attempt` capped at `maxDelayMs`, up to `maxAttempts`.
    /// `timeout` retries without replacing the worker. `invalid_task` never retries.
    pub fn classify_failure(&self, kind: FailureKind, attempt: u32) -> FailurePlan {
        match kind {
            FailureKind::WorkerCrash => {
                if attempt >= self.config.failure_max_attempts {
                    FailurePlan {
                        replace_worker: true,
                        retry: false,
                        delay_ms: 0,
                    }
                } else {
                    let raw = self.config.failure_base_delay_ms as f64 * 2f64.powi(attempt as i32);
                    let delay_ms = raw.min(self.config.failure_max_delay_ms as f64) as u64;
                    FailurePlan {
                        replace_worker: true,
                        retry: true,
                        delay_ms,
                    }
                }
            }
            FailureKind::Timeout => FailurePlan {
                replace_worker: false,
                retry: true,
                delay_ms: 0,
            },
            FailureKind::InvalidTask => FailurePlan {
                replace_worker: false,
                retry: false,
                delay_ms: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            min_pool_size: 2,
            max_pool_size: 4,
            saturation_ratio: 0.8,
            queue_depth_threshold: 5,
            backpressure_cooldown_ms: 2000,
            failure_base_delay_ms: 200,
            failure_max_delay_ms: 2000,
            failure_max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn admits_when_below_saturation() {
        let supervisor = WorkerPoolSupervisor::new(config(), 4, Arc::new(EventBus::new()));
        let decision = supervisor.evaluate_capacity(0, Priority::Normal).await;
        assert_eq!(decision, AdmissionDecision::Admit);
    }

    #[tokio::test]
    async fn queues_at_worker_cap_even_for_urgent() {
        let supervisor = WorkerPoolSupervisor::new(config(), 1, Arc::new(EventBus::new()));
        supervisor.mark_busy();
        let decision = supervisor.evaluate_capacity(0, Priority::Critical).await;
        assert_eq!(decision, AdmissionDecision::Queue);
    }

    #[tokio::test]
    async fn urgent_bypasses_saturation_below_worker_cap() {
        let supervisor = WorkerPoolSupervisor::new(config(), 4, Arc::new(EventBus::new()));
        supervisor.mark_busy();
        supervisor.mark_busy();
        supervisor.mark_busy();
        let decision = supervisor.evaluate_capacity(10, Priority::Critical).await;
        assert_eq!(decision, AdmissionDecision::Admit);
    }

    #[tokio::test]
    async fn enters_backpressure_past_queue_threshold() {
        let supervisor = WorkerPoolSupervisor::new(config(), 4, Arc::new(EventBus::new()));
        supervisor.mark_busy();
        supervisor.mark_busy();
        supervisor.mark_busy();
        let decision = supervisor.evaluate_capacity(10, Priority::Normal).await;
        assert_eq!(decision, AdmissionDecision::Backpressure);
    }

    #[test]
    fn worker_crash_backoff_doubles_and_caps() {
        let supervisor = WorkerPoolSupervisor::new(config(), 4, Arc::new(EventBus::new()));
        let plan0 = supervisor.classify_failure(FailureKind::WorkerCrash, 0);
        assert_eq!(plan0.delay_ms, 200);
        let plan2 = supervisor.classify_failure(FailureKind::WorkerCrash, 3);
        assert_eq!(plan2.delay_ms, 0);
        assert!(!plan2.retry);
    }

    #[test]
    fn timeout_retries_without_replacing_worker() {
        let supervisor = WorkerPoolSupervisor::new(config(), 4, Arc::new(EventBus::new()));
        let plan = supervisor.classify_failure(FailureKind::Timeout, 0);
        assert!(plan.retry);
        assert!(!plan.replace_worker);
    }

    #[test]
    fn invalid_task_never_retries() {
        let supervisor = WorkerPoolSupervisor::new(config(), 4, Arc::new(EventBus::new()));
        let plan = supervisor.classify_failure(FailureKind::InvalidTask, 0);
        assert!(!plan.retry);
        assert!(!plan.replace_worker);
    }
}
