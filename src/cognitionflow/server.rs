//! HTTP service exposing runs, live progress and artifacts.
//!
//! Routes:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/health` | liveness plus admission limits |
//! | GET | `/config` | models, modes, templates and output formats |
//! | POST | `/run` | start a run in the background |
//! | GET | `/runs` | paginated history (`limit`, `offset`) |
//! | GET | `/runs/{run_id}` | one run record |
//! | GET | `/runs/{run_id}/events` | server-sent progress events |
//! | GET | `/runs/{run_id}/artifacts` | artifact listing |
//! | GET | `/runs/{run_id}/artifacts/{name}` | artifact bytes |
//! | GET | `/metrics` | aggregate run metrics |
//!
//! At most `max_concurrent_runs` runs execute at once; further `POST /run` requests get
//! `429 Too Many Requests` until a slot frees up.

use crate::cognitionflow::artifacts::{resolve_artifact, scan_artifacts};
use crate::cognitionflow::catalog::{
    compose_task, find_template, is_known_model, is_known_output_format, AGENT_MODES,
    AVAILABLE_MODELS, OUTPUT_FORMATS, TASK_TEMPLATES,
};
use crate::cognitionflow::client_wrapper::ClientWrapper;
use crate::cognitionflow::config::{CognitionFlowConfig, DEFAULT_GROQ_MODEL, DEFAULT_TEMPERATURE};
use crate::cognitionflow::event::RunEvent;
use crate::cognitionflow::executor::CodeExecutor;
use crate::cognitionflow::orchestration::{Orchestrator, RunRequest, MIN_ROUND_CAP};
use crate::cognitionflow::registry::RunRegistry;
use crate::cognitionflow::role::AgentMode;
use crate::cognitionflow::router::ConversationVariant;
use crate::cognitionflow::run_store::{RunRecord, RunStore};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Semaphore;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

/// Per-run provider choices taken from the request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

/// Builds a completion client for one run. Errors are reported as `503`, since they mean
/// the provider is not configured.
pub type ClientFactory = Arc<
    dyn Fn(&ClientOptions) -> Result<Arc<dyn ClientWrapper>, Box<dyn Error + Send + Sync>>
        + Send
        + Sync,
>;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: CognitionFlowConfig,
    pub store: Arc<dyn RunStore>,
    pub registry: Arc<RunRegistry>,
    pub permits: Arc<Semaphore>,
    pub client_factory: ClientFactory,
    pub executor: Arc<dyn CodeExecutor>,
}

impl AppState {
    pub fn new(
        config: CognitionFlowConfig,
        store: Arc<dyn RunStore>,
        client_factory: ClientFactory,
        executor: Arc<dyn CodeExecutor>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_runs));
        Self {
            config,
            store,
            registry: RunRegistry::new(),
            permits,
            client_factory,
            executor,
        }
    }
}

/// Body of `POST /run`. Every field is optional; an empty body runs the first template.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunStartRequest {
    pub template_id: Option<String>,
    pub task: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub agent_mode: Option<String>,
    pub output_format: Option<String>,
    pub variant: Option<String>,
    pub max_rounds: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/run", post(start_run))
        .route("/runs", get(list_runs))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/events", get(run_events))
        .route("/runs/{run_id}/artifacts", get(list_artifacts))
        .route("/runs/{run_id}/artifacts/{name}", get(get_artifact))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Bind `state.config.bind_addr` and serve until the process exits.
pub async fn serve(state: AppState) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(&state.config.bind_addr).await?;
    log::info!("CognitionFlow listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "concurrent_limit": state.config.max_concurrent_runs,
        "active_runs": state.registry.active_runs(),
    }))
}

async fn config() -> Json<serde_json::Value> {
    Json(json!({
        "models": AVAILABLE_MODELS,
        "agent_modes": AGENT_MODES,
        "task_templates": TASK_TEMPLATES,
        "output_formats": OUTPUT_FORMATS,
        "defaults": {
            "model": DEFAULT_GROQ_MODEL,
            "temperature": DEFAULT_TEMPERATURE,
            "agent_mode": AgentMode::default().as_str(),
            "output_format": "auto",
            "template_id": TASK_TEMPLATES.first().map(|t| t.id),
            "variant": ConversationVariant::default().as_str(),
        },
    }))
}

async fn start_run(State(state): State<AppState>, body: Bytes) -> Response {
    let request: RunStartRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunStartRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid body: {}", e)),
        }
    };

    let agent_mode = match request.agent_mode.as_deref().map(str::parse::<AgentMode>) {
        None => AgentMode::default(),
        Some(Ok(mode)) => mode,
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let variant = match request.variant.as_deref().map(str::parse::<ConversationVariant>) {
        None => ConversationVariant::default(),
        Some(Ok(variant)) => variant,
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    if let Some(format) = request.output_format.as_deref() {
        if !is_known_output_format(format) {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("unknown output format: {}", format),
            );
        }
    }
    if let Some(max_rounds) = request.max_rounds {
        if max_rounds < MIN_ROUND_CAP {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!(
                    "max_rounds must be at least {} (seed turn plus one reply), got {}",
                    MIN_ROUND_CAP, max_rounds
                ),
            );
        }
    }
    if let Some(model) = request.model.as_deref() {
        if !is_known_model(model) {
            log::warn!("model {} is not in the catalog; passing it through", model);
        }
    }

    let Ok(permit) = Arc::clone(&state.permits).try_acquire_owned() else {
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            format!(
                "Server busy: {} runs already in progress. Try again shortly.",
                state.config.max_concurrent_runs
            ),
        );
    };

    let options = ClientOptions {
        model: request.model.clone(),
        temperature: request.temperature,
    };
    let client = match (state.client_factory)(&options) {
        Ok(client) => client,
        Err(e) => {
            log::error!("cannot configure completion provider: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
        }
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let work_dir: PathBuf = state.config.workspace_dir.join(&run_id);
    if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Cannot create working directory: {}", e),
        );
    }

    let Some(sink) = state.registry.register(&run_id) else {
        return error_response(StatusCode::CONFLICT, "Run id already registered");
    };

    let template_id = request
        .template_id
        .as_deref()
        .and_then(find_template)
        .or_else(|| TASK_TEMPLATES.first())
        .map(|t| t.id);
    let task = compose_task(
        request.template_id.as_deref(),
        request.task.as_deref(),
        request.output_format.as_deref(),
    );

    let mut orchestrator = Orchestrator::new(client, Arc::clone(&state.executor))
        .with_variant(variant)
        .with_agent_mode(agent_mode)
        .with_event_sink(Arc::new(sink))
        .with_run_store(Arc::clone(&state.store))
        .with_metadata("template_id", template_id.unwrap_or_default())
        .with_metadata(
            "output_format",
            request.output_format.clone().unwrap_or_else(|| "auto".to_string()),
        );
    if let Some(temperature) = request.temperature {
        orchestrator = orchestrator.with_metadata("temperature", temperature);
    }
    if let Some(max_rounds) = request.max_rounds {
        orchestrator = orchestrator.with_max_rounds(max_rounds);
    }

    let registry = Arc::clone(&state.registry);
    let spawned_id = run_id.clone();
    tokio::spawn(async move {
        let _permit = permit;
        match orchestrator
            .run(RunRequest::new(task, work_dir).with_run_id(spawned_id.clone()))
            .await
        {
            Ok(outcome) => log::info!(
                "run {} finished: {} ({} artifacts)",
                outcome.run_id,
                outcome.status,
                outcome.artifacts.len()
            ),
            Err(e) => log::error!("run {} could not start: {}", spawned_id, e),
        }
        registry.remove(&spawned_id);
    });

    Json(json!({
        "run_id": run_id,
        "status": "started",
        "message": format!(
            "Workflow started. Poll GET /runs/{} or stream GET /runs/{}/events.",
            run_id, run_id
        ),
    }))
    .into_response()
}

async fn list_runs(State(state): State<AppState>, Query(params): Query<HistoryParams>) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let offset = params.offset.unwrap_or(0);
    match state.store.history(limit, offset).await {
        Ok(runs) => Json(json!({ "runs": runs, "limit": limit, "offset": offset })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn stored_record(state: &AppState, run_id: &str) -> Option<RunRecord> {
    match state.store.get(run_id).await {
        Ok(record) => record,
        Err(e) => {
            log::warn!("run store lookup for {} failed: {}", run_id, e);
            None
        }
    }
}

async fn get_run(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    if let Some(record) = stored_record(&state, &run_id).await {
        return Json(record).into_response();
    }
    match state.registry.summary(&run_id) {
        Some(summary) => Json(json!({
            "id": summary.run_id,
            "status": summary.status,
            "started_at": summary.started_at,
        }))
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Run not found"),
    }
}

fn to_sse(event: &RunEvent) -> Result<Event, Infallible> {
    let kind = match event {
        RunEvent::Phase { .. } => "phase",
        RunEvent::Turn { .. } => "turn",
        RunEvent::Done { .. } => "done",
    };
    Ok(Event::default()
        .event(kind)
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())))
}

fn event_stream(
    history: Vec<RunEvent>,
    receiver: Option<tokio::sync::broadcast::Receiver<RunEvent>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let finished = history.iter().any(RunEvent::is_done);
    let live = stream::unfold(
        (receiver, finished),
        |(receiver, finished)| async move {
            if finished {
                return None;
            }
            let mut rx = receiver?;
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let done = event.is_done();
                        return Some((event, (Some(rx), done)));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("event stream lagged, skipped {} event(s)", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        },
    );
    stream::iter(history).chain(live).map(|event| to_sse(&event))
}

async fn run_events(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    if let Some((history, receiver)) = state.registry.subscribe(&run_id) {
        return Sse::new(event_stream(history, Some(receiver)))
            .keep_alive(KeepAlive::default())
            .into_response();
    }

    // Finished runs replay their final status only.
    match stored_record(&state, &run_id).await {
        Some(record) if record.status.is_terminal() => {
            let done = RunEvent::Done {
                run_id: record.id,
                status: record.status,
                error: record.error,
                warning: record.warning,
                artifacts: record.artifacts,
            };
            Sse::new(event_stream(vec![done], None)).into_response()
        }
        Some(_) => error_response(StatusCode::GONE, "Run is no longer streaming"),
        None => error_response(StatusCode::NOT_FOUND, "Run not found"),
    }
}

async fn run_work_dir(state: &AppState, run_id: &str) -> Option<PathBuf> {
    if let Some(record) = stored_record(state, run_id).await {
        return Some(record.work_dir);
    }
    state
        .registry
        .contains(run_id)
        .then(|| state.config.workspace_dir.join(run_id))
}

async fn list_artifacts(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match run_work_dir(&state, &run_id).await {
        Some(dir) => Json(json!({ "run_id": run_id, "artifacts": scan_artifacts(dir) })).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Run not found"),
    }
}

async fn get_artifact(
    State(state): State<AppState>,
    Path((run_id, name)): Path<(String, String)>,
) -> Response {
    let Some(dir) = run_work_dir(&state, &run_id).await else {
        return error_response(StatusCode::NOT_FOUND, "Run not found");
    };
    let Some(artifact) = resolve_artifact(&dir, &name) else {
        return error_response(StatusCode::NOT_FOUND, "Artifact not found");
    };
    match tokio::fs::read(&artifact.path).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, artifact.kind.content_type(&artifact.path))],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, format!("Artifact not readable: {}", e)),
    }
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.store.metrics().await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
