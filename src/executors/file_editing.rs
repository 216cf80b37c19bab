//! Runs `file_editing` tasks: a sequence of file operations against a
//! declared project root (a real checkout, not the per-task artifact
//! sandbox — editing an existing project is the point). Paths are
//! jailed to the root the same way the sandbox jails artifact paths;
//! shell commands are checked against a denylist before they run.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{OrchestratorError, Result};
use crate::models::execution::ExecutionOutcome;
use crate::models::task::{FileOperation, Task, TaskPayload};
use crate::ports::TaskExecutor;
use crate::sandbox::ArtifactSandbox;

/// Substring denylist, checked case-insensitively, same allowlist-is-
/// easier-to-reason-about tradeoff `validation::TaskContentValidator`
/// makes for free-text content.
static DANGEROUS_COMMAND_PATTERNS: &[&str] = &[
    "rm -rf",
    "sudo ",
    "mkfs",
    "dd if=",
    "> /dev/",
    ":(){",
    "chmod 777 /",
    "curl ",
    "wget ",
    "| sh",
    "| bash",
    "shutdown",
    "reboot",
    "passwd",
];

#[derive(Default)]
pub struct FileEditingExecutor;

#[async_trait]
impl TaskExecutor for FileEditingExecutor {
    async fn execute(&self, task: &Task, _sandbox: &ArtifactSandbox) -> Result<ExecutionOutcome> {
        let TaskPayload::FileEditing { project_root, operations } = &task.payload else {
            return Err(OrchestratorError::UnsupportedType(
                "file_editing executor received a non-file_editing payload".to_string(),
            ));
        };

        let root = Path::new(project_root);
        let mut logs = Vec::new();
        let mut outputs = Vec::new();

        for operation in operations {
            let output = run_operation(root, operation, &mut logs).await?;
            outputs.push(output);
        }

        Ok(ExecutionOutcome::Succeeded {
            result: serde_json::json!({ "operations": outputs }),
            logs,
        })
    }
}

async fn run_operation(root: &Path, operation: &FileOperation, logs: &mut Vec<String>) -> Result<serde_json::Value> {
    match operation {
        FileOperation::FileRead { path } => {
            let resolved = resolve_within_root(root, path)?;
            let content = tokio::fs::read_to_string(&resolved).await?;
            logs.push(format!("read {path} ({} bytes)", content.len()));
            Ok(serde_json::json!({"op": "file_read", "path": path, "content": content}))
        }
        FileOperation::FileSearchReplace { path, search, replace } => {
            let resolved = resolve_within_root(root, path)?;
            let content = tokio::fs::read_to_string(&resolved).await?;
            let replacements = content.matches(search.as_str()).count();
            let updated = content.replace(search.as_str(), replace);
            tokio::fs::write(&resolved, &updated).await?;
            logs.push(format!("replaced {replacements} occurrence(s) in {path}"));
            Ok(serde_json::json!({"op": "file_search_replace", "path": path, "replacements": replacements}))
        }
        FileOperation::FileWrite { path, content } => {
            let resolved = resolve_within_root(root, path)?;
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&resolved, content).await?;
            logs.push(format!("wrote {} bytes to {path}", content.len()));
            Ok(serde_json::json!({"op": "file_write", "path": path, "bytes_written": content.len()}))
        }
        FileOperation::RunTerminalCmd { command } => {
            reject_dangerous_command(command)?;
            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(root)
                .output()
                .await?;
            let exit_code = output.status.code().unwrap_or(-1);
            logs.push(format!("ran `{command}` (exit {exit_code})"));
            Ok(serde_json::json!({
                "op": "run_terminal_cmd",
                "command": command,
                "exit_code": exit_code,
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
            }))
        }
    }
}

fn reject_dangerous_command(command: &str) -> Result<()> {
    let lower = command.to_lowercase();
    for pattern in DANGEROUS_COMMAND_PATTERNS {
        if lower.contains(pattern) {
            return Err(OrchestratorError::PolicyRejected {
                verdict: format!("command matches disallowed pattern: {pattern}"),
                remediation: Some("remove the disallowed pattern from the command".to_string()),
            });
        }
    }
    Ok(())
}

/// Same traversal rejection as `ArtifactSandbox::validate_path`, rooted
/// at the declared project root instead of a generated sandbox dir.
fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf> {
    if relative.is_empty() || relative.starts_with('/') || relative.starts_with('\\') {
        return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
    }

    let candidate = Path::new(relative);
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => return Err(OrchestratorError::InvalidArtifactPath(relative.to_string())),
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()))
            }
        }
    }

    let resolved = root.join(&normalized);
    if resolved != root && !resolved.starts_with(root) {
        return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxQuotas;

    async fn sandbox() -> (tempfile::TempDir, ArtifactSandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = ArtifactSandbox::open(dir.path(), "file-task", SandboxQuotas::default())
            .await
            .unwrap();
        (dir, sandbox)
    }

    fn task(project_root: &str, operations: Vec<FileOperation>) -> Task {
        Task::new(
            crate::models::task::TaskType::FileEditing,
            "edit a project".to_string(),
            TaskPayload::FileEditing {
                project_root: project_root.to_string(),
                operations,
            },
            5,
        )
    }

    #[tokio::test]
    async fn write_then_search_replace_then_read_round_trips() {
        let (_dir, sandbox) = sandbox().await;
        let project = tempfile::tempdir().unwrap();

        let outcome = FileEditingExecutor
            .execute(
                &task(
                    project.path().to_str().unwrap(),
                    vec![
                        FileOperation::FileWrite {
                            path: "notes.txt".to_string(),
                            content: "hello world".to_string(),
                        },
                        FileOperation::FileSearchReplace {
                            path: "notes.txt".to_string(),
                            search: "world".to_string(),
                            replace: "rust".to_string(),
                        },
                        FileOperation::FileRead { path: "notes.txt".to_string() },
                    ],
                ),
                &sandbox,
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Succeeded { result, .. } => {
                let ops = result["operations"].as_array().unwrap();
                assert_eq!(ops[2]["content"], "hello rust");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn path_traversal_outside_project_root_is_rejected() {
        let (_dir, sandbox) = sandbox().await;
        let project = tempfile::tempdir().unwrap();
        let outcome = FileEditingExecutor
            .execute(
                &task(
                    project.path().to_str().unwrap(),
                    vec![FileOperation::FileRead { path: "../../etc/passwd".to_string() }],
                ),
                &sandbox,
            )
            .await;
        assert!(matches!(outcome, Err(OrchestratorError::InvalidArtifactPath(_))));
    }

    #[tokio::test]
    async fn dangerous_terminal_command_is_rejected() {
        let (_dir, sandbox) = sandbox().await;
        let project = tempfile::tempdir().unwrap();
        let outcome = FileEditingExecutor
            .execute(
                &task(
                    project.path().to_str().unwrap(),
                    vec![FileOperation::RunTerminalCmd { command: "rm -rf /".to_string() }],
                ),
                &sandbox,
            )
            .await;
        assert!(matches!(outcome, Err(OrchestratorError::PolicyRejected { .. })));
    }

    #[tokio::test]
    async fn safe_terminal_command_runs_and_captures_output() {
        let (_dir, sandbox) = sandbox().await;
        let project = tempfile::tempdir().unwrap();
        let outcome = FileEditingExecutor
            .execute(
                &task(
                    project.path().to_str().unwrap(),
                    vec![FileOperation::RunTerminalCmd { command: "echo hi".to_string() }],
                ),
                &sandbox,
            )
            .await
            .unwrap();

        match outcome {
            ExecutionOutcome::Succeeded { result, .. } => {
                let ops = result["operations"].as_array().unwrap();
                assert_eq!(ops[0]["exit_code"], 0);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
