//! Runs `ai_inference` tasks by delegating the prompt to whatever
//! `ModelProvider` the orchestrator was constructed with. This executor
//! owns no inference logic of its own — that boundary is deliberate,
//! inference runtimes are out of scope for the core.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};
use crate::models::execution::ExecutionOutcome;
use crate::models::task::{Task, TaskPayload};
use crate::ports::{EchoModelProvider, ModelProvider, TaskExecutor};
use crate::sandbox::ArtifactSandbox;

pub struct AiInferenceExecutor {
    provider: Arc<dyn ModelProvider>,
}

impl AiInferenceExecutor {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

impl Default for AiInferenceExecutor {
    fn default() -> Self {
        Self::new(Arc::new(EchoModelProvider))
    }
}

#[async_trait]
impl TaskExecutor for AiInferenceExecutor {
    async fn execute(&self, task: &Task, _sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
        let TaskPayload::AiInference { prompt, model_hint } = &task.payload else {
            return Err(OrchestratorError::UnsupportedType(
                "ai_inference executor received a non-ai_inference payload".to_string(),
            ));
        };

        match self.provider.complete(prompt, model_hint.as_deref()).await {
            Ok(completion) => Ok(ExecutionOutcome::succeeded(serde_json::json!({
                "completion": completion,
            }))),
            Err(err) => Ok(ExecutionOutcome::failed(err.to_string(), true)),
        }
    }
}
