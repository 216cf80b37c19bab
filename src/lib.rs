//! # Task Orchestrator
//!
//! A coordination layer that accepts tasks over HTTP, routes each to the
//! best-matched agent out of a registered pool, executes it under sandbox
//! and quota constraints, retries transient failures with backoff, and
//! escalates policy-sensitive outcomes through a multi-approval pleading
//! workflow.
//!
//! ## Architecture
//!
//! - **Event Bus**: typed pub/sub backbone every other component publishes
//!   lifecycle events onto, with per-handler timeouts so one slow
//!   subscriber can't stall the rest.
//! - **Artifact Sandbox**: a path-jailed, quota-enforced working directory
//!   per task, with a SHA-256 manifest of everything a task produced.
//! - **Task State Machine** / **Task Queue**: the bounded lifecycle and
//!   FIFO admission queue tasks pass through.
//! - **Agent Registry** / **Routing Manager**: capability-indexed agent
//!   bookkeeping and the scoring pass that assigns a task to an agent.
//! - **Retry Handler** / **Worker Pool Supervisor** / **Worker Pool**: the
//!   execution layer, with backoff, admission control, and isolated
//!   per-task-type workers.
//! - **Pleading Workflow**: escalates tasks that fail policy or repeated
//!   execution into a quorum-based human approval process.
//!
//! Components never hold a reference back to the orchestrator; they hold
//! an `Arc<EventBus>` and publish what happened, letting the orchestrator
//! (and anything else listening) react.

/// HTTP intake API: task submission, status, pleading decisions, metrics.
pub mod api;
/// API-key authentication middleware.
pub mod auth;
/// Environment-driven configuration for every tunable subsystem.
pub mod config;
/// Default values for tunables defined in `config`.
pub mod constants;
/// Unified error type and machine-readable error codes.
pub mod error;
/// Per-task-type execution backends behind the `TaskExecutor` port.
pub mod executors;
/// Core domain models: tasks, agents, executions, manifests, routing, pleading.
pub mod models;
/// The orchestration core: state machine, queue, registry, routing, retry,
/// supervisor, worker pool, pleading workflow, and the top-level orchestrator.
pub mod orchestrator;
/// Typed event bus used for decoupled cross-component notification.
pub mod events;
/// Trait boundaries (ports) the orchestrator depends on, plus in-memory
/// reference implementations.
pub mod ports;
/// Per-client-IP rate limiting middleware.
pub mod rate_limit;
/// Artifact sandbox: path jail, quota enforcement, manifest generation.
pub mod sandbox;
/// API key generation and persistence.
pub mod security;
/// Input validation and sanitization for task content.
pub mod validation;

pub use error::{OrchestratorError, Result};
