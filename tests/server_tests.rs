#![cfg(feature = "server")]

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use cognitionflow::classifier::CodeFragment;
use cognitionflow::client_wrapper::{ClientError, ClientWrapper, Message, Role};
use cognitionflow::config::CognitionFlowConfig;
use cognitionflow::executor::{CodeExecutor, ExecutionError};
use cognitionflow::orchestration::RunStatus;
use cognitionflow::run_store::{InMemoryRunStore, RunStore};
use cognitionflow::server::{router, AppState, ClientFactory, ClientOptions};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Writes code on the first call and approves on every later one.
struct CodeThenApprove {
    calls: AtomicUsize,
}

#[async_trait]
impl ClientWrapper for CodeThenApprove {
    async fn send_message(&self, _: &[Message]) -> Result<Message, ClientError> {
        let reply = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            "```python\nopen('report.md', 'w').write('# Done')\n```"
        } else {
            "report.md verified. PIPELINE_COMPLETE"
        };
        Ok(Message::new(Role::Assistant, reply))
    }

    fn model_name(&self) -> &str {
        "test-model"
    }
}

struct ReportWriter;

#[async_trait]
impl CodeExecutor for ReportWriter {
    async fn execute(&self, _: &[CodeFragment], work_dir: &Path) -> Result<String, ExecutionError> {
        tokio::fs::write(work_dir.join("report.md"), "# Done").await?;
        Ok("exitcode: 0 (execution succeeded)\nCode output: ".to_string())
    }
}

fn working_factory(seen: Arc<Mutex<Vec<ClientOptions>>>) -> ClientFactory {
    Arc::new(move |options: &ClientOptions| -> Result<Arc<dyn ClientWrapper>, BoxError> {
        seen.lock().unwrap().push(options.clone());
        Ok(Arc::new(CodeThenApprove {
            calls: AtomicUsize::new(0),
        }))
    })
}

fn failing_factory() -> ClientFactory {
    Arc::new(|_: &ClientOptions| -> Result<Arc<dyn ClientWrapper>, BoxError> {
        Err("Set GROQ_API_KEY or OPENAI_API_KEY in environment or .env".into())
    })
}

fn state(
    workspace: &Path,
    max_concurrent_runs: usize,
    factory: ClientFactory,
) -> (AppState, Arc<InMemoryRunStore>) {
    let config = CognitionFlowConfig {
        workspace_dir: workspace.to_path_buf(),
        run_store_path: workspace.join("runs.jsonl"),
        max_concurrent_runs,
        bind_addr: "127.0.0.1:0".to_string(),
    };
    let store = Arc::new(InMemoryRunStore::new());
    let app = AppState::new(config, store.clone(), factory, Arc::new(ReportWriter));
    (app, store)
}

async fn send(app: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router(app.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn get_json(app: &AppState, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(app, Request::get(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_run(app: &AppState, body: &str) -> (StatusCode, Value) {
    let request = Request::post("/run")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_and_config() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = state(dir.path(), 2, failing_factory());

    let (status, health) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["concurrent_limit"], 2);
    assert_eq!(health["active_runs"], 0);

    let (status, config) = get_json(&app, "/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(config["models"].as_array().unwrap().len(), 4);
    assert_eq!(config["agent_modes"].as_array().unwrap().len(), 3);
    assert_eq!(config["task_templates"].as_array().unwrap().len(), 5);
    assert_eq!(config["defaults"]["variant"], "three_role");
}

#[tokio::test]
async fn test_unknown_run_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = state(dir.path(), 2, failing_factory());

    for uri in ["/runs/nope", "/runs/nope/artifacts", "/runs/nope/events"] {
        let (status, body) = get_json(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["detail"], "Run not found");
    }
}

#[tokio::test]
async fn test_missing_credentials_is_503() {
    let dir = tempfile::tempdir().unwrap();
    let (app, store) = state(dir.path(), 2, failing_factory());

    let (status, body) = post_run(&app, "{}").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("GROQ_API_KEY"));
    assert_eq!(store.metrics().await.unwrap().total_runs, 0);
    // The admission slot is released again.
    assert_eq!(app.permits.available_permits(), 2);
}

#[tokio::test]
async fn test_bad_requests_are_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = state(dir.path(), 2, failing_factory());

    let (status, _) = post_run(&app, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_run(&app, r#"{"agent_mode": "verbose"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());

    let (status, _) = post_run(&app, r#"{"variant": "five_role"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post_run(&app, r#"{"output_format": "pdf"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("pdf"));
}

#[tokio::test]
async fn test_round_cap_below_two_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = state(dir.path(), 2, failing_factory());

    for body in [r#"{"max_rounds": 0}"#, r#"{"max_rounds": 1}"#] {
        let (status, body) = post_run(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("max_rounds"));
    }

    // Two turns is the smallest accepted cap; the request gets past validation.
    let (status, _) = post_run(&app, r#"{"max_rounds": 2}"#).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_busy_server_is_429() {
    let dir = tempfile::tempdir().unwrap();
    let (app, _) = state(dir.path(), 1, working_factory(Arc::default()));

    let _held = Arc::clone(&app.permits).try_acquire_owned().unwrap();
    let (status, body) = post_run(&app, "{}").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["detail"].as_str().unwrap().contains("Server busy"));
}

#[tokio::test]
async fn test_run_lifecycle_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (app, store) = state(dir.path(), 2, working_factory(seen.clone()));

    let (status, started) = post_run(
        &app,
        r#"{"template_id": "data_analysis", "model": "llama-3.3-70b-versatile", "temperature": 0.3, "agent_mode": "concise"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(started["status"], "started");
    let run_id = started["run_id"].as_str().unwrap().to_string();

    assert_eq!(
        seen.lock().unwrap()[0],
        ClientOptions {
            model: Some("llama-3.3-70b-versatile".to_string()),
            temperature: Some(0.3),
        }
    );

    let mut record = None;
    for _ in 0..200 {
        if let Some(r) = store.get(&run_id).await.unwrap() {
            if r.status.is_terminal() {
                record = Some(r);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let record = record.expect("run did not finish");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.config["agent_mode"], "concise");
    assert_eq!(record.config["template_id"], "data_analysis");

    let (status, body) = get_json(&app, &format!("/runs/{}", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let (status, body) = get_json(&app, &format!("/runs/{}/artifacts", run_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["artifacts"][0]["name"], "report.md");
    assert_eq!(body["artifacts"][0]["type"], "markdown");

    let (status, bytes) = send(
        &app,
        Request::get(format!("/runs/{}/artifacts/report.md", run_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"# Done");

    let (status, _) = send(
        &app,
        Request::get(format!("/runs/{}/artifacts/..%2Fruns.jsonl", run_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A finished run streams its final status.
    let (status, stream) = send(
        &app,
        Request::get(format!("/runs/{}/events", run_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(stream).unwrap();
    assert!(text.contains("event: done"));
    assert!(text.contains("\"status\":\"completed\""));

    let (_, runs) = get_json(&app, "/runs?limit=5").await;
    assert_eq!(runs["runs"].as_array().unwrap().len(), 1);
    assert_eq!(runs["limit"], 5);

    let (_, metrics) = get_json(&app, "/metrics").await;
    assert_eq!(metrics["total_runs"], 1);
    assert_eq!(metrics["success_rate"], 100.0);
}
