use super::*;
use crate::{
    config::{
        EventsConfig, PleadingConfig, QueueConfig, RetryConfig, RoutingConfig, SandboxConfig,
        SupervisorConfig,
    },
    models::TaskType,
    orchestrator::Orchestrator,
    ports::Ports,
};
use tokio::net::TcpListener;

fn test_orchestrator_config(api_key: Option<&str>) -> OrchestratorConfig {
    OrchestratorConfig {
        api: ApiConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            api_key: api_key.map(str::to_string),
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
        queue: QueueConfig {
            max_queue_size: 100,
            stale_task_age_ms: 300_000,
        },
        sandbox: SandboxConfig {
            root_path: std::env::temp_dir()
                .join("orchestrator-api-tests")
                .to_string_lossy()
                .into_owned(),
            max_file_size_bytes: 1024 * 1024,
            max_total_size_bytes: 10 * 1024 * 1024,
            max_total_files: 100,
            max_path_length: 4096,
        },
        retry: RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            multiplier: 2.0,
            jitter: false,
        },
        supervisor: SupervisorConfig {
            min_pool_size: 2,
            max_pool_size: 4,
            saturation_ratio: 0.8,
            queue_depth_threshold: 20,
            backpressure_cooldown_ms: 1000,
            failure_base_delay_ms: 50,
            failure_max_delay_ms: 500,
            failure_max_attempts: 3,
        },
        routing: RoutingConfig {
            min_agents_required: 1,
            max_agents_to_consider: 10,
            max_routing_time_ms: 500,
            capability_match_weight: 0.6,
            load_balancing_weight: 0.4,
            urgent_priority_threshold: 9,
            high_priority_threshold: 6,
        },
        pleading: PleadingConfig {
            required_approvals: 1,
            max_decisions: 2,
            escalation_attempt_threshold: 2,
        },
        events: EventsConfig {
            max_events: 1000,
            handler_timeout_ms: 1000,
            retention_ms: 60_000,
        },
    }
}

async fn spawn_server(api_key: Option<&str>) -> (String, Arc<Orchestrator>) {
    let config = test_orchestrator_config(api_key);
    let orchestrator = Orchestrator::new(config.clone(), Ports::in_memory()).unwrap();
    let api_server = ApiServer::new(config, orchestrator.clone()).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api_server.build_router();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .await
        .unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (format!("http://{addr}"), orchestrator)
}

#[tokio::test]
async fn health_check_does_not_require_authentication() {
    let (base_url, _orchestrator) = spawn_server(Some("test-secret-key-1234567890123456789012345678901234567890")).await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base_url}/health")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn task_submission_requires_api_key_when_configured() {
    let (base_url, _orchestrator) = spawn_server(Some("test-secret-key-1234567890123456789012345678901234567890")).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/tasks"))
        .json(&serde_json::json!({
            "type": "script",
            "description": "run a script",
            "payload": {"type": "script", "code": "return 1", "args": {}, "timeout_ms": 1000},
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn task_submission_without_eligible_agent_is_rejected() {
    let (base_url, _orchestrator) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/tasks"))
        .json(&serde_json::json!({
            "type": "script",
            "description": "run a script",
            "payload": {"type": "script", "code": "return 1", "args": {}, "timeout_ms": 1000},
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 409);
    let body: ErrorResponse = response.json().await.unwrap();
    assert_eq!(body.code, "NO_ELIGIBLE_AGENT");
}

#[tokio::test]
async fn register_then_submit_script_task_reaches_completed() {
    let (base_url, _orchestrator) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let register = client
        .post(format!("{base_url}/agents"))
        .json(&serde_json::json!({
            "id": "agent-1",
            "capabilities": {"task_types": ["script"], "languages": [], "specializations": []},
            "max_concurrent_tasks": 4,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(register.status(), 201);

    let submit = client
        .post(format!("{base_url}/tasks"))
        .json(&serde_json::json!({
            "type": "script",
            "description": "run a script",
            "payload": {"type": "script", "code": "return 1", "args": {}, "timeout_ms": 1000},
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(submit.status(), 201);
    let created: SubmitTaskResponse = submit.json().await.unwrap();
    assert!(created.queued);

    for _ in 0..50 {
        let status = client
            .get(format!("{base_url}/tasks/{}", created.task_id))
            .send()
            .await
            .unwrap();
        if status.status() == 200 {
            let status: TaskStatus = status.json().await.unwrap();
            if status.state == crate::models::TaskState::Completed {
                return;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("task never reached Completed state");
}

#[tokio::test]
async fn unknown_task_status_returns_not_found() {
    let (base_url, _orchestrator) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/tasks/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn pleading_decision_against_unknown_workflow_is_rejected() {
    let (base_url, _orchestrator) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/tasks/does-not-exist/pleading"))
        .json(&serde_json::json!({
            "approver_id": "alice",
            "decision": "approve",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn capabilities_and_metrics_are_reachable() {
    let (base_url, _orchestrator) = spawn_server(None).await;
    let client = reqwest::Client::new();

    let caps = client.get(format!("{base_url}/capabilities")).send().await.unwrap();
    assert_eq!(caps.status(), 200);
    let descriptor: CapabilitiesDescriptor = caps.json().await.unwrap();
    assert!(descriptor.supported_task_types.contains(&TaskType::Script));
    assert!(descriptor.pleading_support);
    assert!(descriptor.retry_support);

    let metrics = client.get(format!("{base_url}/metrics")).send().await.unwrap();
    assert_eq!(metrics.status(), 200);
    let metrics: OrchestratorMetrics = metrics.json().await.unwrap();
    assert_eq!(metrics.completed_tasks, 0);
    assert_eq!(metrics.failed_tasks, 0);
}

#[tokio::test]
async fn file_editing_task_is_admitted_without_routing() {
    let (base_url, _orchestrator) = spawn_server(None).await;
    let client = reqwest::Client::new();
    let project = tempfile::tempdir().unwrap();

    let submit = client
        .post(format!("{base_url}/tasks"))
        .json(&serde_json::json!({
            "type": "file_editing",
            "description": "edit a file",
            "payload": {
                "type": "file_editing",
                "project_root": project.path().to_str().unwrap(),
                "operations": [
                    {"op": "file_write", "path": "out.txt", "content": "hi"}
                ],
            },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(submit.status(), 201);
}

#[test]
fn submit_task_request_defaults_are_sensible() {
    let request: SubmitTaskRequest = serde_json::from_value(serde_json::json!({
        "type": "script",
        "description": "run it",
        "payload": {"type": "script", "code": "1", "args": {}, "timeout_ms": 500},
    }))
    .unwrap();

    assert_eq!(request.priority, 5);
    assert_eq!(request.timeout_ms, 30_000);
    assert_eq!(request.max_attempts, 3);
    assert!(matches!(request.task_type, TaskType::Script));
}
