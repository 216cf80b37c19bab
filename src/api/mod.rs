//! The Intake API: the HTTP surface the orchestrator's public contract
//! (`submitTask`, `submitPleadingDecision`, `getTaskStatus`,
//! `getCapabilities`, `getMetrics`) is exposed through.

#[cfg(test)]
mod tests;

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    auth::{auth_middleware, create_auth_state},
    config::{ApiConfig, OrchestratorConfig},
    error::OrchestratorError,
    models::{
        AgentCapabilities, AgentProfile, PleadingStatus, PleadingVerdict, Task, TaskBudget,
        TaskPayload, TaskType,
    },
    orchestrator::{CapabilitiesDescriptor, OrchestratorMetrics, Orchestrator, TaskStatus},
    rate_limit::{rate_limit_middleware, RateLimiters},
    Result,
};

const SERVICE_NAME: &str = "task-orchestrator";
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

const ROUTE_HEALTH: &str = "/health";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_BY_ID: &str = "/tasks/{task_id}";
const ROUTE_TASK_PLEADING: &str = "/tasks/{task_id}/pleading";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_CAPABILITIES: &str = "/capabilities";
const ROUTE_METRICS: &str = "/metrics";

/// Owns the orchestrator handle and everything the router's handlers
/// close over. Cheap to clone: every field is an `Arc` or plain config.
#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    orchestrator: Arc<Orchestrator>,
    rate_limiters: Arc<RateLimiters>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub description: String,
    pub payload: TaskPayload,
    #[serde(default = "default_priority_level")]
    pub priority: u8,
    #[serde(default)]
    pub required_capabilities: std::collections::HashSet<String>,
    #[serde(default)]
    pub budget: TaskBudget,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_priority_level() -> u8 {
    5
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    3
}

#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
    pub assignment_id: Option<String>,
    pub queued: bool,
}

#[derive(Debug, Deserialize)]
pub struct PleadingDecisionRequest {
    pub approver_id: String,
    pub decision: PleadingVerdict,
    pub reasoning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PleadingDecisionResponse {
    pub status: PleadingStatus,
}

#[derive(Debug, Deserialize)]
pub struct RegisterAgentRequest {
    pub id: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    pub max_concurrent_tasks: u32,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: OrchestratorError) -> ApiError {
    let status = match &err {
        OrchestratorError::Validation(_)
        | OrchestratorError::UnsupportedType(_)
        | OrchestratorError::DuplicateTask(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::PolicyRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OrchestratorError::NoEligibleAgent { .. }
        | OrchestratorError::AgentAlreadyRegistered(_) => StatusCode::CONFLICT,
        OrchestratorError::RegistryFull { .. } | OrchestratorError::QueueFull { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        OrchestratorError::RegistryNotReady => StatusCode::SERVICE_UNAVAILABLE,
        OrchestratorError::AgentNotFound(_)
        | OrchestratorError::TaskNotFound(_)
        | OrchestratorError::NoActiveWorkflow(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let code = err.code().to_string();
    warn!(%code, error = %err, "intake API request failed");
    let details = match &err {
        OrchestratorError::PolicyRejected { remediation, .. } => remediation.clone(),
        _ => None,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code,
            details,
        }),
    )
}

impl ApiServer {
    pub fn new(config: OrchestratorConfig, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        Ok(Self {
            config: config.api,
            orchestrator,
            rate_limiters: Arc::new(RateLimiters::new()),
        })
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.build_router();

        let listener =
            tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
                .await?;

        info!("intake API listening on {}:{}", self.config.host, self.config.port);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await?;

        Ok(())
    }

    /// Middleware order: rate limit (drop floods before they're
    /// authenticated) -> auth -> trace -> CORS -> routes.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());

        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(std::time::Duration::from_secs(3600));

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_TASKS, post(submit_task))
            .route(ROUTE_TASK_BY_ID, get(get_task_status))
            .route(ROUTE_TASK_PLEADING, post(submit_pleading_decision))
            .route(ROUTE_AGENTS, post(register_agent))
            .route(ROUTE_CAPABILITIES, get(get_capabilities))
            .route(ROUTE_METRICS, get(get_metrics))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(
                        self.rate_limiters.clone(),
                        rate_limit_middleware,
                    ))
                    .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

/// `POST /tasks` — the primary intake entry point. Validation and
/// sanitization of `description`/`metadata` happen inside
/// `Orchestrator::submit_task`; this handler only shapes the request
/// into a `Task` and maps the result.
async fn submit_task(
    State(api_server): State<ApiServer>,
    Json(request): Json<SubmitTaskRequest>,
) -> std::result::Result<(StatusCode, Json<SubmitTaskResponse>), ApiError> {
    let mut task = Task::new(
        request.task_type,
        request.description,
        request.payload,
        request.priority,
    );
    task.required_capabilities = request.required_capabilities;
    task.budget = request.budget;
    task.timeout_ms = request.timeout_ms;
    task.metadata = request.metadata;
    task.max_attempts = request.max_attempts;

    let task_id = api_server
        .orchestrator
        .submit_task(task)
        .await
        .map_err(api_error)?;

    let status = api_server
        .orchestrator
        .get_task_status(&task_id)
        .await
        .ok();

    Ok((
        StatusCode::CREATED,
        Json(SubmitTaskResponse {
            task_id,
            assignment_id: status.and_then(|s| s.assigned_agent),
            queued: true,
        }),
    ))
}

async fn get_task_status(
    State(api_server): State<ApiServer>,
    Path(task_id): Path<String>,
) -> std::result::Result<Json<TaskStatus>, ApiError> {
    api_server
        .orchestrator
        .get_task_status(&task_id)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn submit_pleading_decision(
    State(api_server): State<ApiServer>,
    Path(task_id): Path<String>,
    Json(request): Json<PleadingDecisionRequest>,
) -> std::result::Result<Json<PleadingDecisionResponse>, ApiError> {
    let status = api_server
        .orchestrator
        .submit_pleading_decision(&task_id, request.approver_id, request.decision, request.reasoning)
        .await
        .map_err(api_error)?;

    Ok(Json(PleadingDecisionResponse { status }))
}

async fn register_agent(
    State(api_server): State<ApiServer>,
    Json(request): Json<RegisterAgentRequest>,
) -> std::result::Result<(StatusCode, Json<AgentProfile>), ApiError> {
    let profile = api_server
        .orchestrator
        .register_agent(request.id, request.capabilities, request.max_concurrent_tasks)
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(profile)))
}

async fn get_capabilities(State(api_server): State<ApiServer>) -> Json<CapabilitiesDescriptor> {
    Json(api_server.orchestrator.get_capabilities().await)
}

async fn get_metrics(State(api_server): State<ApiServer>) -> Json<OrchestratorMetrics> {
    Json(api_server.orchestrator.get_metrics().await)
}
