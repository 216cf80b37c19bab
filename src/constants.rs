//! System-wide default values for tunables not carried in `OrchestratorConfig`
//! overrides. Values here are the defaults a fresh `Config::load()` falls
//! back to; all are overridable via environment variables.

/// Control-plane poll interval when the queue is empty.
pub const TASK_POLL_INTERVAL_MS: u64 = 100;

/// Default max pending tasks before `submitTask` rejects with `QueueFull`.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Sliding window for task-record and result retention in the orchestrator.
pub const CLEANUP_INTERVAL_SECS: u64 = 300;
pub const TASK_RETENTION_HOURS: i64 = 24;

/// Default sandbox quotas.
pub const DEFAULT_MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_SIZE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_FILES: usize = 1000;
pub const DEFAULT_MAX_PATH_LENGTH: usize = 4096;

/// Default retry handler tunables.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default worker pool supervisor tunables.
pub const DEFAULT_MIN_POOL_SIZE: usize = 2;
pub const DEFAULT_MAX_POOL_SIZE: usize = 8;
pub const DEFAULT_SATURATION_RATIO: f64 = 0.8;
pub const DEFAULT_QUEUE_DEPTH_THRESHOLD: usize = 20;
pub const DEFAULT_BACKPRESSURE_COOLDOWN_MS: u64 = 2000;
pub const WORKER_SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Default registry capacity.
pub const DEFAULT_MAX_REGISTERED_AGENTS: usize = 500;

/// Default routing tunables.
pub const DEFAULT_MIN_AGENTS_REQUIRED: usize = 1;
pub const DEFAULT_MAX_AGENTS_TO_CONSIDER: usize = 10;
pub const DEFAULT_MAX_ROUTING_TIME_MS: u64 = 500;
pub const DEFAULT_CAPABILITY_MATCH_WEIGHT: f64 = 0.6;
pub const DEFAULT_LOAD_BALANCING_WEIGHT: f64 = 0.4;

/// Priority thresholds; tunable per deployment, not fixed by the priority model itself.
pub const URGENT_PRIORITY_THRESHOLD: u8 = 9;
pub const HIGH_PRIORITY_THRESHOLD: u8 = 6;

/// Pleading workflow defaults.
pub const DEFAULT_REQUIRED_APPROVALS: u32 = 2;
pub const DEFAULT_MAX_DECISIONS: u32 = 4;
pub const PLEADING_ESCALATION_ATTEMPT_THRESHOLD: u32 = 2;

/// Event bus defaults.
pub const DEFAULT_MAX_EVENTS: usize = 10_000;
pub const DEFAULT_HANDLER_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_EVENT_RETENTION_MS: i64 = 24 * 60 * 60 * 1000;

/// Intake limits (description/metadata size bounds).
pub const MAX_DESCRIPTION_LENGTH: usize = 10_000;
pub const MAX_METADATA_KEY_LENGTH: usize = 100;
pub const MAX_METADATA_VALUE_LENGTH: usize = 1_000;
pub const MAX_METADATA_ENTRIES: usize = 64;
