//! Capability-indexed catalog of agent profiles: registration, capacity
//! filters, performance-weighted ranking, and a stale-profile sweep.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::models::agent::{AgentCapabilities, AgentProfile};
use crate::models::task::TaskType;

/// Required and optional filters for `get_agents_by_capability`.
#[derive(Debug, Clone, Default)]
pub struct CapabilityQuery {
    pub task_type: Option<TaskType>,
    pub languages: HashSet<String>,
    pub specializations: HashSet<String>,
    pub max_utilization: Option<f64>,
    pub min_success_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RankedAgent {
    pub profile: AgentProfile,
    pub match_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_agents: usize,
    pub active_agents: usize,
    pub idle_agents: usize,
    pub average_utilization: f64,
    pub average_success_rate: f64,
}

/// A worker's utilization as a percentage, clamped to `[0, 100]`.
fn utilization_percent(profile: &AgentProfile) -> f64 {
    (profile.load.saturation_ratio() * 100.0).min(100.0)
}

/// `0.3·taskType + 0.3·(matched languages / requested) +
/// 0.2·(matched specializations / requested) + 0.2·successRate`,
/// normalized by the sum of the weights actually applied (a filter with
/// no requested values contributes no weight).
fn match_score(profile: &AgentProfile, query: &CapabilityQuery) -> f64 {
    let mut score = 0.0;
    let mut weight_total = 0.0;

    // task_type is already a required filter by the time candidates reach
    // here, so a surviving candidate always matches fully.
    score += 0.3;
    weight_total += 0.3;

    if !query.languages.is_empty() {
        let matched = query
            .languages
            .intersection(&profile.capabilities.languages)
            .count();
        score += 0.3 * (matched as f64 / query.languages.len() as f64);
        weight_total += 0.3;
    }

    if !query.specializations.is_empty() {
        let matched = query
            .specializations
            .intersection(&profile.capabilities.specializations)
            .count();
        score += 0.2 * (matched as f64 / query.specializations.len() as f64);
        weight_total += 0.2;
    }

    score += 0.2 * profile.performance.success_rate();
    weight_total += 0.2;

    if weight_total == 0.0 {
        0.0
    } else {
        score / weight_total
    }
}

/// Catalog of registered agents. Mutated only through its own API; the
/// routing manager and orchestrator consult it but never reach into its
/// internal map.
pub struct AgentRegistry {
    profiles: RwLock<HashMap<String, AgentProfile>>,
    max_agents: usize,
    event_bus: Arc<EventBus>,
}

impl AgentRegistry {
    pub fn new(max_agents: usize, event_bus: Arc<EventBus>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            max_agents,
            event_bus,
        }
    }

    pub async fn register_agent(
        &self,
        id: String,
        capabilities: AgentCapabilities,
        max_concurrent: u32,
    ) -> Result<AgentProfile> {
        let mut profiles = self.profiles.write().await;

        if profiles.contains_key(&id) {
            return Err(OrchestratorError::AgentAlreadyRegistered(id));
        }
        if profiles.len() >= self.max_agents {
            return Err(OrchestratorError::RegistryFull {
                max_agents: self.max_agents,
            });
        }

        let profile = AgentProfile::new(id.clone(), capabilities, max_concurrent);
        profiles.insert(id.clone(), profile.clone());
        drop(profiles);

        info!(agent_id = %id, "agent registered");
        self.event_bus
            .emit("agent.registered", serde_json::json!({"agentId": id}))
            .await;

        Ok(profile)
    }

    pub async fn unregister_agent(&self, id: &str) -> bool {
        let removed = self.profiles.write().await.remove(id).is_some();
        if removed {
            info!(agent_id = %id, "agent unregistered");
            self.event_bus
                .emit("agent.unregistered", serde_json::json!({"agentId": id}))
                .await;
        }
        removed
    }

    pub async fn get_profile(&self, id: &str) -> Result<AgentProfile> {
        self.profiles
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))
    }

    /// Filters candidates, then sorts by `successRate` descending with
    /// ties (`|Δ| < 0.01`) broken by weighted match score.
    pub async fn get_agents_by_capability(&self, query: &CapabilityQuery) -> Vec<RankedAgent> {
        let profiles = self.profiles.read().await;

        let mut ranked: Vec<RankedAgent> = profiles
            .values()
            .filter(|p| match query.task_type {
                Some(task_type) => p.supports(task_type),
                None => true,
            })
            .filter(|p| query.languages.is_subset(&p.capabilities.languages))
            .filter(|p| query.specializations.is_subset(&p.capabilities.specializations))
            .filter(|p| {
                query
                    .max_utilization
                    .map_or(true, |max| utilization_percent(p) <= max)
            })
            .filter(|p| {
                query
                    .min_success_rate
                    .map_or(true, |min| p.performance.success_rate() >= min)
            })
            .map(|p| RankedAgent {
                match_score: match_score(p, query),
                profile: p.clone(),
            })
            .collect();

        ranked.sort_by(|a, b| {
            let success_delta = b.profile.performance.success_rate() - a.profile.performance.success_rate();
            if success_delta.abs() < 0.01 {
                b.match_score
                    .partial_cmp(&a.match_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            } else {
                success_delta.partial_cmp(&0.0).unwrap_or(std::cmp::Ordering::Equal)
            }
        });

        ranked
    }

    pub async fn update_performance(&self, id: &str, duration_ms: u64, success: bool) -> Result<AgentProfile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))?;

        if success {
            profile.performance.record_completion(duration_ms);
        } else {
            profile.performance.record_failure();
        }
        profile.touch();
        Ok(profile.clone())
    }

    pub async fn update_load(&self, id: &str, active_tasks: u32, max_concurrent: u32) -> Result<AgentProfile> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::AgentNotFound(id.to_string()))?;

        profile.load.active_tasks = active_tasks;
        profile.load.max_concurrent = max_concurrent;
        profile.touch();
        Ok(profile.clone())
    }

    pub async fn get_stats(&self) -> RegistryStats {
        let profiles = self.profiles.read().await;
        let total_agents = profiles.len();
        let active_agents = profiles.values().filter(|p| p.load.active_tasks > 0).count();
        let idle_agents = total_agents - active_agents;

        let (average_utilization, average_success_rate) = if total_agents == 0 {
            (0.0, 0.0)
        } else {
            let util_sum: f64 = profiles.values().map(utilization_percent).sum();
            let success_sum: f64 = profiles.values().map(|p| p.performance.success_rate()).sum();
            (
                util_sum / total_agents as f64,
                success_sum / total_agents as f64,
            )
        };

        RegistryStats {
            total_agents,
            active_agents,
            idle_agents,
            average_utilization,
            average_success_rate,
        }
    }

    /// Removes profiles whose `last_seen_at` predates `now - stale_threshold_ms`.
    pub async fn sweep_stale(&self, stale_threshold_ms: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(stale_threshold_ms);
        let mut profiles = self.profiles.write().await;
        let before = profiles.len();
        profiles.retain(|id, p| {
            let keep = p.last_seen_at > cutoff;
            if !keep {
                warn!(agent_id = %id, "sweeping stale agent profile");
            }
            keep
        });
        before - profiles.len()
    }

    pub async fn count(&self) -> usize {
        self.profiles.read().await.len()
    }
}
