//! Orchestrator configuration, loaded from the environment with fail-fast
//! validation for security-relevant values and sensible defaults for
//! tunables (queue size, backoff, quotas, pool sizing).

use std::env;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub api: ApiConfig,
    pub queue: QueueConfig,
    pub sandbox: SandboxConfig,
    pub retry: RetryConfig,
    pub supervisor: SupervisorConfig,
    pub routing: RoutingConfig,
    pub pleading: PleadingConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub stale_task_age_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub root_path: String,
    pub max_file_size_bytes: u64,
    pub max_total_size_bytes: u64,
    pub max_total_files: usize,
    pub max_path_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    pub min_pool_size: usize,
    pub max_pool_size: usize,
    pub saturation_ratio: f64,
    pub queue_depth_threshold: usize,
    pub backpressure_cooldown_ms: i64,
    pub failure_base_delay_ms: u64,
    pub failure_max_delay_ms: u64,
    pub failure_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub min_agents_required: usize,
    pub max_agents_to_consider: usize,
    pub max_routing_time_ms: u64,
    pub capability_match_weight: f64,
    pub load_balancing_weight: f64,
    pub urgent_priority_threshold: u8,
    pub high_priority_threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PleadingConfig {
    pub required_approvals: u32,
    pub max_decisions: u32,
    pub escalation_attempt_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub max_events: usize,
    pub handler_timeout_ms: u64,
    pub retention_ms: i64,
}

impl OrchestratorConfig {
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(?path, "loaded .env file"),
            Err(_) => tracing::debug!("no .env file found, using process environment only"),
        }

        let api_key = env::var("API_KEY").ok();
        match &api_key {
            Some(key) if key.trim().is_empty() => {
                return Err(OrchestratorError::Configuration(
                    "API_KEY is set but blank".to_string(),
                ));
            }
            Some(key) if key.len() < 32 => {
                return Err(OrchestratorError::Configuration(
                    "API_KEY must be at least 32 characters".to_string(),
                ));
            }
            Some(_) => tracing::info!("API authentication configured"),
            None => tracing::warn!("API_KEY not set; intake API will run without authentication"),
        }

        let allowed_origins = env_var_or("ALLOWED_ORIGINS", "http://localhost:3000")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env_var_or("API_HOST", "127.0.0.1"),
            port: env_parse_or("API_PORT", 8080)?,
            api_key,
            allowed_origins,
        };

        let queue = QueueConfig {
            max_queue_size: env_parse_or("MAX_QUEUE_SIZE", DEFAULT_MAX_QUEUE_SIZE)?,
            stale_task_age_ms: env_parse_or("STALE_TASK_AGE_MS", 300_000)?,
        };

        let sandbox = SandboxConfig {
            root_path: env_var_or("SANDBOX_ROOT", "./sandboxes"),
            max_file_size_bytes: env_parse_or(
                "SANDBOX_MAX_FILE_SIZE_BYTES",
                DEFAULT_MAX_FILE_SIZE_BYTES,
            )?,
            max_total_size_bytes: env_parse_or(
                "SANDBOX_MAX_TOTAL_SIZE_BYTES",
                DEFAULT_MAX_TOTAL_SIZE_BYTES,
            )?,
            max_total_files: env_parse_or("SANDBOX_MAX_TOTAL_FILES", DEFAULT_MAX_TOTAL_FILES)?,
            max_path_length: env_parse_or("SANDBOX_MAX_PATH_LENGTH", DEFAULT_MAX_PATH_LENGTH)?,
        };

        let retry = RetryConfig {
            max_retries: env_parse_or("RETRY_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            initial_backoff_ms: env_parse_or(
                "RETRY_INITIAL_BACKOFF_MS",
                DEFAULT_INITIAL_BACKOFF_MS,
            )?,
            max_backoff_ms: env_parse_or("RETRY_MAX_BACKOFF_MS", DEFAULT_MAX_BACKOFF_MS)?,
            multiplier: env_parse_or("RETRY_MULTIPLIER", DEFAULT_BACKOFF_MULTIPLIER)?,
            jitter: env_parse_or("RETRY_JITTER", true)?,
        };

        let supervisor = SupervisorConfig {
            min_pool_size: env_parse_or("POOL_MIN_SIZE", DEFAULT_MIN_POOL_SIZE)?,
            max_pool_size: env_parse_or("POOL_MAX_SIZE", DEFAULT_MAX_POOL_SIZE)?,
            saturation_ratio: env_parse_or("POOL_SATURATION_RATIO", DEFAULT_SATURATION_RATIO)?,
            queue_depth_threshold: env_parse_or(
                "POOL_QUEUE_DEPTH_THRESHOLD",
                DEFAULT_QUEUE_DEPTH_THRESHOLD,
            )?,
            backpressure_cooldown_ms: env_parse_or(
                "POOL_BACKPRESSURE_COOLDOWN_MS",
                DEFAULT_BACKPRESSURE_COOLDOWN_MS as i64,
            )?,
            failure_base_delay_ms: env_parse_or("POOL_FAILURE_BASE_DELAY_MS", 200u64)?,
            failure_max_delay_ms: env_parse_or("POOL_FAILURE_MAX_DELAY_MS", 30_000u64)?,
            failure_max_attempts: env_parse_or("POOL_FAILURE_MAX_ATTEMPTS", 5u32)?,
        };

        let routing = RoutingConfig {
            min_agents_required: env_parse_or(
                "ROUTING_MIN_AGENTS_REQUIRED",
                DEFAULT_MIN_AGENTS_REQUIRED,
            )?,
            max_agents_to_consider: env_parse_or(
                "ROUTING_MAX_AGENTS_TO_CONSIDER",
                DEFAULT_MAX_AGENTS_TO_CONSIDER,
            )?,
            max_routing_time_ms: env_parse_or("ROUTING_MAX_TIME_MS", DEFAULT_MAX_ROUTING_TIME_MS)?,
            capability_match_weight: env_parse_or(
                "ROUTING_CAPABILITY_WEIGHT",
                DEFAULT_CAPABILITY_MATCH_WEIGHT,
            )?,
            load_balancing_weight: env_parse_or(
                "ROUTING_LOAD_WEIGHT",
                DEFAULT_LOAD_BALANCING_WEIGHT,
            )?,
            urgent_priority_threshold: env_parse_or(
                "ROUTING_URGENT_THRESHOLD",
                URGENT_PRIORITY_THRESHOLD,
            )?,
            high_priority_threshold: env_parse_or(
                "ROUTING_HIGH_THRESHOLD",
                HIGH_PRIORITY_THRESHOLD,
            )?,
        };

        let pleading = PleadingConfig {
            required_approvals: env_parse_or(
                "PLEADING_REQUIRED_APPROVALS",
                DEFAULT_REQUIRED_APPROVALS,
            )?,
            max_decisions: env_parse_or("PLEADING_MAX_DECISIONS", DEFAULT_MAX_DECISIONS)?,
            escalation_attempt_threshold: env_parse_or(
                "PLEADING_ESCALATION_ATTEMPT_THRESHOLD",
                PLEADING_ESCALATION_ATTEMPT_THRESHOLD,
            )?,
        };

        let events = EventsConfig {
            max_events: env_parse_or("EVENTS_MAX_EVENTS", DEFAULT_MAX_EVENTS)?,
            handler_timeout_ms: env_parse_or(
                "EVENTS_HANDLER_TIMEOUT_MS",
                DEFAULT_HANDLER_TIMEOUT_MS,
            )?,
            retention_ms: env_parse_or("EVENTS_RETENTION_MS", DEFAULT_EVENT_RETENTION_MS)?,
        };

        Ok(Self {
            api,
            queue,
            sandbox,
            retry,
            supervisor,
            routing,
            pleading,
            events,
        })
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| OrchestratorError::Configuration(format!("invalid value for {key}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn load_succeeds_with_defaults_and_no_api_key() {
        for key in ["API_KEY", "API_PORT", "MAX_QUEUE_SIZE", "RETRY_MAX_RETRIES"] {
            std::env::remove_var(key);
        }
        let config = OrchestratorConfig::load().unwrap();
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.queue.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert!(config.api.api_key.is_none());
    }

    #[test]
    #[serial]
    fn rejects_short_api_key() {
        std::env::set_var("API_KEY", "too-short");
        let err = OrchestratorConfig::load().unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
        std::env::remove_var("API_KEY");
    }
}
