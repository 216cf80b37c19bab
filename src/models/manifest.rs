use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One file written into a task's sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub mime_type: String,
    pub written_at: DateTime<Utc>,
}

/// Snapshot of everything a task produced in its sandbox, generated on
/// demand from the sandbox's directory tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub task_id: String,
    pub files: Vec<ManifestFile>,
    pub total_size_bytes: u64,
    pub generated_at: DateTime<Utc>,
}

impl ArtifactManifest {
    pub fn new(task_id: String, files: Vec<ManifestFile>) -> Self {
        let total_size_bytes = files.iter().map(|f| f.size_bytes).sum();
        Self {
            task_id,
            files,
            total_size_bytes,
            generated_at: Utc::now(),
        }
    }
}
