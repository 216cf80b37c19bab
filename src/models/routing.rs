use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One runner-up candidate from a routing pass, with the reason it lost
/// to the winner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingAlternative {
    pub agent_id: String,
    pub score: f64,
    pub reason: String,
}

/// Result of a single routing pass: the chosen agent, its score, the
/// runner-up candidates considered, and which strategy produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub task_id: String,
    pub agent_id: String,
    pub score: f64,
    /// `score` of the winner normalized by the sum of scores over every
    /// considered candidate.
    pub confidence: f64,
    pub strategy: RoutingStrategy,
    pub alternatives: Vec<RoutingAlternative>,
    pub rationale: String,
    pub candidates_considered: usize,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Normal ranked scoring over all eligible candidates.
    WeightedScore,
    /// `maxRoutingTimeMs` elapsed before scoring finished; first capable
    /// candidate was chosen instead.
    TimeoutFallback,
}
