//! Multi-approval escalation for tasks that exhaust retries or fail a
//! policy check: an N-approver quorum that can requeue a terminally
//! failed task for one more attempt.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::events::EventBus;
use crate::models::pleading::{PleadingDecision, PleadingStatus, PleadingVerdict, PleadingWorkflow};

pub struct PleadingManager {
    workflows: RwLock<HashMap<String, PleadingWorkflow>>,
    event_bus: Arc<EventBus>,
}

impl PleadingManager {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            event_bus,
        }
    }

    pub async fn open_workflow(
        &self,
        task_id: String,
        required_approvals: u32,
        max_decisions: u32,
    ) -> Result<PleadingWorkflow> {
        let mut workflows = self.workflows.write().await;
        if workflows.get(&task_id).is_some_and(|w| !w.is_closed()) {
            return Err(OrchestratorError::Validation(format!(
                "pleading workflow already open for task {task_id}"
            )));
        }

        let workflow = PleadingWorkflow::open(task_id.clone(), required_approvals, max_decisions);
        workflows.insert(task_id.clone(), workflow.clone());
        drop(workflows);

        info!(task_id = %task_id, required_approvals, "pleading workflow opened");
        self.event_bus
            .emit(
                "pleading_initiated",
                serde_json::json!({"taskId": task_id, "requiredApprovals": required_approvals}),
            )
            .await;

        Ok(workflow)
    }

    /// Records a decision. Quorum approval or exhausting `maxDecisions`
    /// closes the workflow; otherwise it stays open for more decisions.
    pub async fn submit_decision(
        &self,
        task_id: &str,
        approver_id: String,
        verdict: PleadingVerdict,
        comment: Option<String>,
    ) -> Result<PleadingStatus> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(task_id)
            .ok_or_else(|| OrchestratorError::NoActiveWorkflow(task_id.to_string()))?;

        if workflow.is_closed() {
            return Err(OrchestratorError::NoActiveWorkflow(task_id.to_string()));
        }

        workflow.decisions.push(PleadingDecision {
            approver_id,
            verdict,
            comment,
            decided_at: Utc::now(),
        });

        if workflow.approval_count() >= workflow.required_approvals {
            workflow.status = PleadingStatus::Approved;
            workflow.closed_at = Some(Utc::now());
        } else if workflow.decisions.len() as u32 >= workflow.max_decisions {
            workflow.status = PleadingStatus::Denied;
            workflow.closed_at = Some(Utc::now());
        }

        let status = workflow.status;
        let approvals = workflow.approval_count();
        drop(workflows);

        match status {
            PleadingStatus::Approved => {
                info!(task_id, approvals, "pleading workflow approved by quorum");
                self.event_bus
                    .emit("pleading_approved", serde_json::json!({"taskId": task_id}))
                    .await;
            }
            PleadingStatus::Denied => {
                info!(task_id, "pleading workflow denied, max decisions reached");
                self.event_bus
                    .emit("pleading_denied", serde_json::json!({"taskId": task_id}))
                    .await;
            }
            PleadingStatus::Open => {}
            PleadingStatus::Escalated => {}
        }

        Ok(status)
    }

    pub async fn get_workflow(&self, task_id: &str) -> Result<PleadingWorkflow> {
        self.workflows
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NoActiveWorkflow(task_id.to_string()))
    }

    pub async fn remove_workflow(&self, task_id: &str) -> Option<PleadingWorkflow> {
        self.workflows.write().await.remove(task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quorum_approval_closes_workflow_as_approved() {
        let manager = PleadingManager::new(Arc::new(EventBus::new()));
        manager.open_workflow("t1".to_string(), 2, 4).await.unwrap();

        let status = manager
            .submit_decision("t1", "r1".to_string(), PleadingVerdict::Approve, None)
            .await
            .unwrap();
        assert_eq!(status, PleadingStatus::Open);

        let status = manager
            .submit_decision("t1", "r2".to_string(), PleadingVerdict::Approve, None)
            .await
            .unwrap();
        assert_eq!(status, PleadingStatus::Approved);
    }

    #[tokio::test]
    async fn exhausting_max_decisions_without_quorum_denies() {
        let manager = PleadingManager::new(Arc::new(EventBus::new()));
        manager.open_workflow("t1".to_string(), 3, 2).await.unwrap();

        manager
            .submit_decision("t1", "r1".to_string(), PleadingVerdict::Deny, None)
            .await
            .unwrap();
        let status = manager
            .submit_decision("t1", "r2".to_string(), PleadingVerdict::Deny, None)
            .await
            .unwrap();
        assert_eq!(status, PleadingStatus::Denied);
    }

    #[tokio::test]
    async fn decisions_after_close_are_rejected() {
        let manager = PleadingManager::new(Arc::new(EventBus::new()));
        manager.open_workflow("t1".to_string(), 1, 1).await.unwrap();
        manager
            .submit_decision("t1", "r1".to_string(), PleadingVerdict::Approve, None)
            .await
            .unwrap();

        let err = manager
            .submit_decision("t1", "r2".to_string(), PleadingVerdict::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoActiveWorkflow(_)));
    }

    #[tokio::test]
    async fn reopening_while_open_is_rejected() {
        let manager = PleadingManager::new(Arc::new(EventBus::new()));
        manager.open_workflow("t1".to_string(), 2, 4).await.unwrap();
        let err = manager.open_workflow("t1".to_string(), 2, 4).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }
}
