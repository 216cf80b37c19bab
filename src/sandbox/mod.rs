//! Per-task rooted filesystem facade. Every worker sees only
//! `<root>/<task_id>`; any path that would escape it is rejected before
//! touching the filesystem.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::constants::{
    DEFAULT_MAX_FILE_SIZE_BYTES, DEFAULT_MAX_PATH_LENGTH, DEFAULT_MAX_TOTAL_FILES,
    DEFAULT_MAX_TOTAL_SIZE_BYTES,
};
use crate::error::{OrchestratorError, Result};
use crate::models::manifest::{ArtifactManifest, ManifestFile};

/// Closed extension → MIME table. Unknown extensions map to
/// `application/octet-stream`.
const MIME_TABLE: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("md", "text/markdown"),
    ("json", "application/json"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("toml", "application/toml"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("ts", "text/typescript"),
    ("rs", "text/x-rust"),
    ("py", "text/x-python"),
    ("log", "text/plain"),
    ("xml", "application/xml"),
    ("svg", "image/svg+xml"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
];

fn infer_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext {
        Some(ext) => MIME_TABLE
            .iter()
            .find(|(candidate, _)| *candidate == ext)
            .map(|(_, mime)| *mime)
            .unwrap_or("application/octet-stream"),
        None => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct SandboxQuotas {
    pub max_file_size_bytes: u64,
    pub max_total_size_bytes: u64,
    pub max_total_files: usize,
    pub max_path_length: usize,
}

impl Default for SandboxQuotas {
    fn default() -> Self {
        Self {
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_BYTES,
            max_total_size_bytes: DEFAULT_MAX_TOTAL_SIZE_BYTES,
            max_total_files: DEFAULT_MAX_TOTAL_FILES,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    size_bytes: u64,
    sha256: String,
    mime_type: String,
    written_at: chrono::DateTime<Utc>,
}

/// A single task's sandbox. Created by `ArtifactSandboxFactory::open`.
pub struct ArtifactSandbox {
    task_id: String,
    root: PathBuf,
    quotas: SandboxQuotas,
    entries: RwLock<HashMap<String, Entry>>,
    total_size: RwLock<u64>,
}

impl ArtifactSandbox {
    pub async fn open(base_dir: &Path, task_id: &str, quotas: SandboxQuotas) -> Result<Self> {
        let root = base_dir.join(task_id);
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            task_id: task_id.to_string(),
            root,
            quotas,
            entries: RwLock::new(HashMap::new()),
            total_size: RwLock::new(0),
        })
    }

    /// Applies the 6 ordered validation rules and returns the resolved
    /// absolute path on success.
    fn validate_path(&self, relative: &str) -> Result<PathBuf> {
        if relative.is_empty() {
            return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
        }
        if relative.starts_with('/') || relative.starts_with('\\') || has_drive_letter(relative) {
            return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
        }
        if relative.as_bytes().contains(&0) {
            return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
        }

        let candidate = Path::new(relative);
        let mut normalized = PathBuf::new();
        for component in candidate.components() {
            match component {
                Component::ParentDir => {
                    return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
                }
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
                }
            }
        }

        if normalized.as_os_str().len() > self.quotas.max_path_length {
            return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
        }

        let resolved = self.root.join(&normalized);
        if resolved != self.root && !resolved.starts_with(&self.root) {
            return Err(OrchestratorError::InvalidArtifactPath(relative.to_string()));
        }

        Ok(resolved)
    }

    pub async fn write_file(&self, relative: &str, content: &[u8]) -> Result<()> {
        let resolved = self.validate_path(relative)?;

        if content.len() as u64 > self.quotas.max_file_size_bytes {
            return Err(OrchestratorError::QuotaExceeded {
                kind: "size".to_string(),
                observed: content.len() as u64,
                limit: self.quotas.max_file_size_bytes,
            });
        }

        let mut entries = self.entries.write().await;
        let mut total_size = self.total_size.write().await;

        let previous_size = entries.get(relative).map(|e| e.size_bytes).unwrap_or(0);
        let prospective_total = *total_size - previous_size + content.len() as u64;
        if prospective_total > self.quotas.max_total_size_bytes {
            return Err(OrchestratorError::QuotaExceeded {
                kind: "size".to_string(),
                observed: prospective_total,
                limit: self.quotas.max_total_size_bytes,
            });
        }
        if !entries.contains_key(relative) && entries.len() >= self.quotas.max_total_files {
            return Err(OrchestratorError::QuotaExceeded {
                kind: "files".to_string(),
                observed: entries.len() as u64 + 1,
                limit: self.quotas.max_total_files as u64,
            });
        }

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = resolved.with_extension("tmp-write");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &resolved).await?;

        let mut hasher = Sha256::new();
        hasher.update(content);
        let sha256 = format!("{:x}", hasher.finalize());

        *total_size = prospective_total;
        entries.insert(
            relative.to_string(),
            Entry {
                size_bytes: content.len() as u64,
                sha256,
                mime_type: infer_mime(Path::new(relative)).to_string(),
                written_at: Utc::now(),
            },
        );

        Ok(())
    }

    pub async fn mkdir(&self, relative: &str) -> Result<()> {
        let resolved = self.validate_path(relative)?;
        tokio::fs::create_dir_all(resolved).await?;
        Ok(())
    }

    pub async fn readdir(&self, relative: &str) -> Result<Vec<String>> {
        let resolved = self.validate_path(relative)?;
        let mut read_dir = tokio::fs::read_dir(resolved).await?;
        let mut names = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(names)
    }

    pub async fn stat(&self, relative: &str) -> Result<std::fs::Metadata> {
        let resolved = self.validate_path(relative)?;
        Ok(tokio::fs::metadata(resolved).await?)
    }

    pub async fn rename(&self, old_relative: &str, new_relative: &str) -> Result<()> {
        let old_resolved = self.validate_path(old_relative)?;
        let new_resolved = self.validate_path(new_relative)?;
        if let Some(parent) = new_resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(old_resolved, new_resolved).await?;

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.remove(old_relative) {
            entries.insert(new_relative.to_string(), entry);
        }
        Ok(())
    }

    pub async fn generate_manifest(&self) -> ArtifactManifest {
        let entries = self.entries.read().await;
        let files = entries
            .iter()
            .map(|(path, entry)| ManifestFile {
                path: path.clone(),
                size_bytes: entry.size_bytes,
                sha256: entry.sha256.clone(),
                mime_type: entry.mime_type.clone(),
                written_at: entry.written_at,
            })
            .collect();
        ArtifactManifest::new(self.task_id.clone(), files)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn has_drive_letter(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
