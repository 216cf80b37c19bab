//! Runs `api_call` tasks: issues one HTTP request and folds the response
//! into the task result, parsing the body as JSON when possible and
//! falling back to a plain string otherwise.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};

use crate::error::{OrchestratorError, Result};
use crate::models::execution::ExecutionOutcome;
use crate::models::task::{Task, TaskPayload};
use crate::ports::TaskExecutor;
use crate::sandbox::ArtifactSandbox;

#[derive(Default)]
pub struct ApiCallExecutor;

#[async_trait]
impl TaskExecutor for ApiCallExecutor {
    async fn execute(&self, task: &Task, _sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
        let TaskPayload::ApiCall { method, url, headers, body, timeout_ms } = &task.payload else {
            return Err(OrchestratorError::UnsupportedType(
                "api_call executor received a non-api_call payload".to_string(),
            ));
        };

        let method = Method::from_str(&method.to_uppercase())
            .map_err(|_| OrchestratorError::Validation(format!("invalid HTTP method: {method}")))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(*timeout_ms))
            .build()?;

        let mut request = client.request(method, url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let deadline = Duration::from_millis(*timeout_ms);
        let response = match tokio::time::timeout(deadline, request.send()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(OrchestratorError::ExecutionTimeout {
                    timeout_ms: *timeout_ms,
                })
            }
        };

        let status = response.status();
        let bytes = response.bytes().await?;
        let body_value: serde_json::Value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).to_string()));

        let result = serde_json::json!({
            "status": status.as_u16(),
            "body": body_value,
        });

        if status.is_success() {
            Ok(ExecutionOutcome::succeeded(result))
        } else {
            Ok(ExecutionOutcome::Failed {
                error: format!("api_call returned status {status}"),
                retryable: status.is_server_error(),
                logs: vec![format!("response body: {result}")],
            })
        }
    }
}
