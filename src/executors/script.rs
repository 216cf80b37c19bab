//! Runs `script` tasks. "Evaluate `payload.code` in a constrained
//! execution context" is implemented literally: the code is a small
//! line-oriented directive language, not an embedded general-purpose
//! interpreter, so a task can never do anything beyond what the sandbox
//! facade and scoped deadline already allow.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::models::execution::ExecutionOutcome;
use crate::models::task::{Task, TaskPayload};
use crate::ports::TaskExecutor;
use crate::sandbox::ArtifactSandbox;

#[derive(Default)]
pub struct ScriptExecutor;

#[async_trait]
impl TaskExecutor for ScriptExecutor {
    async fn execute(&self, task: &Task, sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
        let TaskPayload::Script { code, args, timeout_ms } = &task.payload else {
            return Err(OrchestratorError::UnsupportedType(
                "script executor received a non-script payload".to_string(),
            ));
        };

        let deadline = Duration::from_millis(*timeout_ms);
        match tokio::time::timeout(deadline, run(code, args, sandbox)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(OrchestratorError::ExecutionTimeout {
                timeout_ms: *timeout_ms,
            }),
        }
    }
}

/// Directives, one per line: `log <text>`, `write <path> <content>`,
/// `sleep <ms>`, `return <json-or-bare-string>`. Blank lines and `#`
/// comments are skipped. `${name}` in `log`/`write`/`return` arguments
/// interpolates from `args`. An unrecognized directive fails the task
/// rather than being silently ignored.
async fn run(code: &str, args: &HashMap<String, String>, sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
    let mut logs = Vec::new();
    let mut result = Value::Null;

    for raw_line in code.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut parts = line.splitn(2, char::is_whitespace);
        let directive = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match directive {
            "log" => logs.push(interpolate(rest, args)),
            "write" => {
                let mut path_and_content = rest.splitn(2, char::is_whitespace);
                let path = path_and_content.next().unwrap_or_default();
                let content = path_and_content.next().unwrap_or_default();
                if let Err(err) = sandbox.write_file(path, interpolate(content, args).as_bytes()).await {
                    logs.push(format!("write {path} failed: {err}"));
                    return Err(err);
                }
            }
            "sleep" => {
                let ms: u64 = rest.parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            "return" => {
                let interpolated = interpolate(rest, args);
                result = serde_json::from_str(&interpolated).unwrap_or(Value::String(interpolated));
            }
            other => {
                return Ok(ExecutionOutcome::Failed {
                    error: format!("unknown script directive: {other}"),
                    retryable: false,
                    logs,
                });
            }
        }
    }

    Ok(ExecutionOutcome::Succeeded { result, logs })
}

fn interpolate(text: &str, args: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in args {
        out = out.replace(&format!("${{{key}}}"), value);
    }
    out
}
