use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::models::task::TaskType;

/// Declared skills an agent can be matched against during routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub task_types: HashSet<TaskType>,
    pub languages: HashSet<String>,
    pub specializations: HashSet<String>,
}

/// Rolling success/failure counters used by the routing weight formula.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceHistory {
    pub completed: u64,
    pub failed: u64,
    pub avg_duration_ms: f64,
}

impl Default for PerformanceHistory {
    fn default() -> Self {
        Self {
            completed: 0,
            failed: 0,
            avg_duration_ms: 0.0,
        }
    }
}

impl PerformanceHistory {
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            1.0
        } else {
            self.completed as f64 / total as f64
        }
    }

    pub fn record_completion(&mut self, duration_ms: u64) {
        let total_before = self.completed + self.failed;
        let total_duration = self.avg_duration_ms * total_before as f64 + duration_ms as f64;
        self.completed += 1;
        self.avg_duration_ms = total_duration / (self.completed + self.failed) as f64;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }
}

/// Concurrent-task bookkeeping used by the pool supervisor's saturation check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentLoad {
    pub active_tasks: u32,
    pub max_concurrent: u32,
}

impl CurrentLoad {
    pub fn saturation_ratio(&self) -> f64 {
        if self.max_concurrent == 0 {
            1.0
        } else {
            self.active_tasks as f64 / self.max_concurrent as f64
        }
    }
}

/// A registered worker's routing-relevant profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub capabilities: AgentCapabilities,
    pub performance: PerformanceHistory,
    pub load: CurrentLoad,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl AgentProfile {
    pub fn new(id: String, capabilities: AgentCapabilities, max_concurrent: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            capabilities,
            performance: PerformanceHistory::default(),
            load: CurrentLoad {
                active_tasks: 0,
                max_concurrent,
            },
            registered_at: now,
            last_seen_at: now,
        }
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.task_types.contains(&task_type)
    }

    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_defaults_to_one_with_no_history() {
        let perf = PerformanceHistory::default();
        assert_eq!(perf.success_rate(), 1.0);
    }

    #[test]
    fn success_rate_reflects_mixed_outcomes() {
        let mut perf = PerformanceHistory::default();
        perf.record_completion(100);
        perf.record_completion(200);
        perf.record_failure();
        assert!((perf.success_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn saturation_ratio_at_capacity_is_one() {
        let load = CurrentLoad {
            active_tasks: 4,
            max_concurrent: 4,
        };
        assert_eq!(load.saturation_ratio(), 1.0);
    }
}
