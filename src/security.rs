//! API key generation and persistence for the intake API's auth layer.

use crate::error::OrchestratorError;
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// 64 base62 chars ≈ 380 bits of entropy, comfortably above the 256-bit
/// floor typically required for session-bearing API keys.
pub const API_KEY_LENGTH: usize = 64;

pub const API_KEY_FILE: &str = ".orchestrator-api-key";

pub fn generate_secure_api_key() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LENGTH)
        .map(char::from)
        .collect()
}

pub fn save_api_key_to_file(api_key: &str) -> Result<(), OrchestratorError> {
    info!(file = API_KEY_FILE, "saving API key to secure file");

    fs::write(API_KEY_FILE, api_key)
        .map_err(|e| OrchestratorError::Configuration(format!("failed to write API key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(API_KEY_FILE)
            .map_err(|e| {
                OrchestratorError::Configuration(format!("failed to read API key file metadata: {e}"))
            })?
            .permissions();
        perms.set_mode(0o600);
        fs::set_permissions(API_KEY_FILE, perms).map_err(|e| {
            OrchestratorError::Configuration(format!("failed to set API key file permissions: {e}"))
        })?;
    }

    Ok(())
}

pub fn load_api_key_from_file() -> Result<Option<String>, OrchestratorError> {
    if !Path::new(API_KEY_FILE).exists() {
        return Ok(None);
    }

    let api_key = fs::read_to_string(API_KEY_FILE)
        .map_err(|e| OrchestratorError::Configuration(format!("failed to read API key file: {e}")))?;
    let api_key = api_key.trim().to_string();

    if api_key.len() != API_KEY_LENGTH || !api_key.chars().all(|c| c.is_alphanumeric()) {
        warn!("API key file contents do not match the expected format, ignoring");
        return Err(OrchestratorError::Configuration(
            "invalid API key format in file".to_string(),
        ));
    }

    Ok(Some(api_key))
}

/// Uses the configured key if present, otherwise falls back to a
/// previously-persisted key, otherwise generates and persists a new one.
pub fn ensure_api_key_exists(existing_api_key: Option<&str>) -> Result<String, OrchestratorError> {
    if let Some(key) = existing_api_key {
        if !key.trim().is_empty() {
            return Ok(key.to_string());
        }
    }

    match load_api_key_from_file()? {
        Some(existing_key) => Ok(existing_key),
        None => {
            let new_key = generate_secure_api_key();
            save_api_key_to_file(&new_key)?;
            info!("generated and persisted a new API key");
            Ok(new_key)
        }
    }
}
