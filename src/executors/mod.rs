//! One executor per `TaskType`, dispatched by payload shape rather than a
//! lookup table — the payload variant already names the executor that
//! handles it. Each sub-executor implements `ports::TaskExecutor` on its
//! own so it can be swapped or tested in isolation; `DefaultTaskExecutor`
//! is the dispatching front the worker pool actually holds.

mod ai_inference;
mod api_call;
mod data_processing;
mod file_editing;
mod script;

pub use ai_inference::AiInferenceExecutor;
pub use api_call::ApiCallExecutor;
pub use data_processing::DataProcessingExecutor;
pub use file_editing::FileEditingExecutor;
pub use script::ScriptExecutor;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::execution::ExecutionOutcome;
use crate::models::task::{Task, TaskPayload};
use crate::ports::{ModelProvider, TaskExecutor};
use crate::sandbox::ArtifactSandbox;

/// Dispatches to the per-type executor matching `task.payload`. Holding
/// one of these is how the worker pool runs any task without knowing its
/// type up front.
#[derive(Default)]
pub struct DefaultTaskExecutor {
    script: ScriptExecutor,
    api_call: ApiCallExecutor,
    data_processing: DataProcessingExecutor,
    ai_inference: AiInferenceExecutor,
    file_editing: FileEditingExecutor,
}

impl DefaultTaskExecutor {
    pub fn new(model_provider: Arc<dyn ModelProvider>) -> Self {
        Self {
            ai_inference: AiInferenceExecutor::new(model_provider),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TaskExecutor for DefaultTaskExecutor {
    async fn execute(&self, task: &Task, sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
        match &task.payload {
            TaskPayload::Script { .. } => self.script.execute(task, sandbox).await,
            TaskPayload::ApiCall { .. } => self.api_call.execute(task, sandbox).await,
            TaskPayload::DataProcessing { .. } => self.data_processing.execute(task, sandbox).await,
            TaskPayload::AiInference { .. } => self.ai_inference.execute(task, sandbox).await,
            TaskPayload::FileEditing { .. } => self.file_editing.execute(task, sandbox).await,
        }
    }
}
