//! Scores eligible agents for a task and emits a `RoutingDecision`. Falls
//! back to the first capable candidate, unranked, if scoring runs past
//! `maxRoutingTimeMs` — a late decision is worse than an imperfect one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::warn;

use crate::config::RoutingConfig;
use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::models::routing::{RoutingAlternative, RoutingDecision, RoutingStrategy};
use crate::models::task::Task;
use crate::orchestrator::agent_registry::{AgentRegistry, CapabilityQuery, RankedAgent};

pub struct RoutingManager {
    registry: Arc<AgentRegistry>,
    config: RoutingConfig,
    event_bus: Arc<EventBus>,
}

impl RoutingManager {
    pub fn new(registry: Arc<AgentRegistry>, config: RoutingConfig, event_bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            config,
            event_bus,
        }
    }

    /// `capabilityMatchWeight·matchScore + loadBalancingWeight·(1 − utilization/100)`.
    fn combined_score(&self, candidate: &RankedAgent) -> f64 {
        let utilization = (candidate.profile.load.saturation_ratio() * 100.0).min(100.0);
        self.config.capability_match_weight * candidate.match_score
            + self.config.load_balancing_weight * (1.0 - utilization / 100.0)
    }

    pub async fn route_task(&self, task: &Task) -> Result<RoutingDecision> {
        let query = CapabilityQuery {
            task_type: Some(task.task_type),
            specializations: task.required_capabilities.clone(),
            ..Default::default()
        };

        let deadline = Duration::from_millis(self.config.max_routing_time_ms);
        let scoring = tokio::time::timeout(deadline, self.registry.get_agents_by_capability(&query));

        let (candidates, strategy) = match scoring.await {
            Ok(ranked) => (ranked, RoutingStrategy::WeightedScore),
            Err(_) => {
                warn!(task_id = %task.id, timeout_ms = self.config.max_routing_time_ms, "routing scoring exceeded deadline, falling back");
                let fallback = self
                    .registry
                    .get_agents_by_capability(&CapabilityQuery {
                        task_type: Some(task.task_type),
                        ..Default::default()
                    })
                    .await;
                (fallback, RoutingStrategy::TimeoutFallback)
            }
        };

        if candidates.len() < self.config.min_agents_required {
            return Err(OrchestratorError::NoEligibleAgent {
                task_id: task.id.clone(),
            });
        }

        let considered: Vec<RankedAgent> = candidates
            .into_iter()
            .take(self.config.max_agents_to_consider)
            .collect();

        // Score every considered candidate once, then rank by that score
        // regardless of strategy: under timeout-fallback the first capable
        // candidate still wins, but runner-up reasons and confidence are
        // reported consistently either way.
        let mut scored: Vec<(f64, &RankedAgent)> = considered
            .iter()
            .map(|candidate| {
                let score = match strategy {
                    RoutingStrategy::TimeoutFallback => candidate.match_score,
                    RoutingStrategy::WeightedScore => self.combined_score(candidate),
                };
                (score, candidate)
            })
            .collect();

        let winner_index = match strategy {
            RoutingStrategy::TimeoutFallback => 0,
            RoutingStrategy::WeightedScore => scored
                .iter()
                .enumerate()
                .max_by(|(_, (a, _)), (_, (b, _))| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(idx, _)| idx)
                .ok_or_else(|| OrchestratorError::NoEligibleAgent {
                    task_id: task.id.clone(),
                })?,
        };

        if scored.is_empty() {
            return Err(OrchestratorError::NoEligibleAgent { task_id: task.id.clone() });
        }
        let (score, chosen) = scored.remove(winner_index);
        // Remaining entries are runner-ups, ordered by descending score.
        scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let total_score: f64 = scored.iter().map(|(s, _)| s).sum::<f64>() + score;
        let confidence = if total_score > 0.0 { (score / total_score).clamp(0.0, 1.0) } else { 1.0 };

        let chosen_utilization = chosen.profile.load.saturation_ratio();
        let alternatives: Vec<RoutingAlternative> = scored
            .into_iter()
            .take(2)
            .map(|(alt_score, alt)| {
                let reason = if alt.profile.load.saturation_ratio() > chosen_utilization {
                    "higher load".to_string()
                } else {
                    "lower score".to_string()
                };
                RoutingAlternative {
                    agent_id: alt.profile.id.clone(),
                    score: alt_score,
                    reason,
                }
            })
            .collect();

        let rationale = format!(
            "selected {} via {:?} (score {:.3}, confidence {:.3} over {} candidate(s))",
            chosen.profile.id,
            strategy,
            score,
            confidence,
            considered.len()
        );

        let decision = RoutingDecision {
            task_id: task.id.clone(),
            agent_id: chosen.profile.id.clone(),
            score,
            confidence,
            strategy,
            alternatives,
            rationale,
            candidates_considered: considered.len(),
            decided_at: Utc::now(),
        };

        self.event_bus
            .emit(
                "task.routed",
                serde_json::json!({
                    "taskId": decision.task_id,
                    "agentId": decision.agent_id,
                    "score": decision.score,
                    "strategy": decision.strategy,
                }),
            )
            .await;

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::TaskPayload;
    use std::collections::HashMap;

    fn test_config() -> RoutingConfig {
        RoutingConfig {
            min_agents_required: 1,
            max_agents_to_consider: 10,
            max_routing_time_ms: 500,
            capability_match_weight: 0.6,
            load_balancing_weight: 0.4,
            urgent_priority_threshold: 9,
            high_priority_threshold: 6,
        }
    }

    fn script_task() -> Task {
        Task::new(
            crate::models::task::TaskType::Script,
            "echo hi".to_string(),
            TaskPayload::Script {
                code: "echo hi".to_string(),
                args: HashMap::new(),
                timeout_ms: 1000,
            },
            5,
        )
    }

    #[tokio::test]
    async fn routes_to_only_eligible_agent() {
        let event_bus = Arc::new(EventBus::new());
        let registry = Arc::new(AgentRegistry::new(10, event_bus.clone()));
        registry
            .register_agent(
                "a1".to_string(),
                crate::models::agent::AgentCapabilities {
                    task_types: [crate::models::task::TaskType::Script].into_iter().collect(),
                    ..Default::default()
                },
                4,
            )
            .await
            .unwrap();

        let manager = RoutingManager::new(registry, test_config(), event_bus);
        let decision = manager.route_task(&script_task()).await.unwrap();
        assert_eq!(decision.agent_id, "a1");
        assert_eq!(decision.strategy, RoutingStrategy::WeightedScore);
    }

    #[tokio::test]
    async fn no_eligible_agent_raises_error() {
        let event_bus = Arc::new(EventBus::new());
        let registry = Arc::new(AgentRegistry::new(10, event_bus.clone()));
        let manager = RoutingManager::new(registry, test_config(), event_bus);
        let err = manager.route_task(&script_task()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoEligibleAgent { .. }));
    }

    #[tokio::test]
    async fn prefers_less_loaded_agent_with_equal_match() {
        let event_bus = Arc::new(EventBus::new());
        let registry = Arc::new(AgentRegistry::new(10, event_bus.clone()));
        let caps = crate::models::agent::AgentCapabilities {
            task_types: [crate::models::task::TaskType::Script].into_iter().collect(),
            ..Default::default()
        };
        registry
            .register_agent("busy".to_string(), caps.clone(), 4)
            .await
            .unwrap();
        registry
            .register_agent("idle".to_string(), caps, 4)
            .await
            .unwrap();
        registry.update_load("busy", 4, 4).await.unwrap();

        let manager = RoutingManager::new(registry, test_config(), event_bus);
        let decision = manager.route_task(&script_task()).await.unwrap();
        assert_eq!(decision.agent_id, "idle");
    }
}
