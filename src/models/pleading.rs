use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single approver's decision on a pleading workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PleadingDecision {
    pub approver_id: String,
    pub verdict: PleadingVerdict,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PleadingVerdict {
    Approve,
    Deny,
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PleadingStatus {
    Open,
    Approved,
    Denied,
    Escalated,
}

/// A terminally-failed task's escalation record: a quorum of approvers
/// must agree before the task is requeued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PleadingWorkflow {
    pub task_id: String,
    pub required_approvals: u32,
    pub max_decisions: u32,
    pub decisions: Vec<PleadingDecision>,
    pub status: PleadingStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PleadingWorkflow {
    pub fn open(task_id: String, required_approvals: u32, max_decisions: u32) -> Self {
        Self {
            task_id,
            required_approvals,
            max_decisions,
            decisions: Vec::new(),
            status: PleadingStatus::Open,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    pub fn approval_count(&self) -> u32 {
        self.decisions
            .iter()
            .filter(|d| d.verdict == PleadingVerdict::Approve)
            .count() as u32
    }

    pub fn denial_count(&self) -> u32 {
        self.decisions
            .iter()
            .filter(|d| d.verdict == PleadingVerdict::Deny)
            .count() as u32
    }

    pub fn is_closed(&self) -> bool {
        !matches!(self.status, PleadingStatus::Open)
    }
}
