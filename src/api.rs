use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{Query, State, rejection::FormRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{MethodRouter, any, get, post},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::completion::CompletionClient;
use crate::config::{Config, PollMode};
use crate::poll::{JobStore, StatusView};
use crate::relay::relay;
use crate::render;
use crate::stream::{Frame, PeriodicEmitter, PushConnection, demo, run_emitters, sse_response};

pub const RELAY_STREAM_PATH: &str = "/openai-sse";
pub const POLL_STATUS_PATH: &str = "/openai-poll-status";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub config: Config,
    pub completion: Arc<dyn CompletionClient>,
    pub jobs: Arc<JobStore>,
    /// Parent of every push connection's token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, completion: Arc<dyn CompletionClient>) -> Self {
        let jobs = Arc::new(JobStore::new(config.poll.mode).with_retention(config.poll_retention()));
        Self {
            config,
            completion,
            jobs,
            shutdown: CancellationToken::new(),
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct PromptForm {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub session: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RelayQuery {
    pub prompt: Option<String>,
    pub session: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session: Option<String>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, message).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/events", get(basic_events))
        .route("/multi-events", get(multi_events))
        .route("/status", get(random_status))
        .route("/openai-sse-start", post_only(post(relay_start)))
        .route(RELAY_STREAM_PATH, get(relay_stream))
        .route("/openai-poll", post_only(post(poll_submit)))
        .route(POLL_STATUS_PATH, get(poll_status))
        .route("/openai-cleanup", any(cleanup))
        .route("/health", get(health_check))
}

/// Answer any other method on a POST route with a plain-text 405.
fn post_only(route: MethodRouter<SharedState>) -> MethodRouter<SharedState> {
    route.fallback(|| async { (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed") })
}

// ── Helpers ───────────────────────────────────────────────────────────

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Form body, or an empty form when the body is missing or malformed.
fn form_or_default(form: Result<Form<PromptForm>, FormRejection>) -> PromptForm {
    form.map(|Form(form)| form).unwrap_or_default()
}

/// URL the poll fragments re-check, carrying the session in per-session mode.
fn poll_status_url(mode: PollMode, key: &str) -> String {
    match mode {
        PollMode::SingleSlot => POLL_STATUS_PATH.to_string(),
        PollMode::PerSession => format!(
            "{}?{}",
            POLL_STATUS_PATH,
            render::query_string(&[("session", key)])
        ),
    }
}

/// Open a push connection tied to the shutdown token, or refuse if the
/// server is already going down.
fn open_connection(state: &AppState) -> Result<(PushConnection, Response), ApiError> {
    if state.shutdown.is_cancelled() {
        return Err(ApiError::Unavailable("Server shutting down".to_string()));
    }
    let (conn, rx) = PushConnection::open(state.config.channel_capacity(), state.shutdown.child_token());
    Ok((conn, sse_response(rx)))
}

fn open_push(
    state: &AppState,
    name: &'static str,
    (greeting, emitters): (Frame, Vec<PeriodicEmitter>),
) -> Result<Response, ApiError> {
    let (conn, response) = open_connection(state)?;
    let span = info_span!("push", stream = name, connection = %Uuid::new_v4());
    tokio::spawn(
        async move {
            info!("push connection opened");
            let reason = run_emitters(&conn, greeting, emitters).await;
            info!(%reason, "push connection closed");
        }
        .instrument(span),
    );
    Ok(response)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn basic_events(State(state): State<SharedState>) -> Result<Response, ApiError> {
    open_push(&state, "basic", demo::basic())
}

async fn multi_events(State(state): State<SharedState>) -> Result<Response, ApiError> {
    open_push(&state, "multi", demo::multi())
}

async fn random_status() -> Html<String> {
    Html(demo::random_status())
}

async fn relay_start(form: Result<Form<PromptForm>, FormRejection>) -> Html<String> {
    let form = form_or_default(form);
    if form.prompt.trim().is_empty() {
        return Html(render::prompt_error());
    }
    let session = non_empty(form.session).unwrap_or_else(|| Uuid::new_v4().to_string());
    Html(render::relay_shell(RELAY_STREAM_PATH, &form.prompt, &session))
}

async fn relay_stream(
    State(state): State<SharedState>,
    Query(query): Query<RelayQuery>,
) -> Result<Response, ApiError> {
    let prompt =
        non_empty(query.prompt).ok_or_else(|| ApiError::BadRequest("Prompt required".to_string()))?;
    let session = non_empty(query.session).unwrap_or_else(|| Uuid::new_v4().to_string());

    let (conn, response) = open_connection(&state)?;
    let client = Arc::clone(&state.completion);
    let timeout = state.config.relay_deadline();
    let span = info_span!("relay", %session);
    tokio::spawn(
        async move {
            info!(chars = prompt.len(), "relay session started");
            relay(client.as_ref(), &prompt, &conn, timeout).await;
        }
        .instrument(span),
    );
    Ok(response)
}

async fn poll_submit(
    State(state): State<SharedState>,
    form: Result<Form<PromptForm>, FormRejection>,
) -> Html<String> {
    let form = form_or_default(form);
    if form.prompt.trim().is_empty() {
        return Html(render::prompt_error());
    }
    let key = state.jobs.key_for(form.session.as_deref());
    let submission = state.jobs.submit(
        Arc::clone(&state.completion),
        key,
        form.prompt,
        state.config.relay_deadline(),
    );
    info!(key = %submission.key, generation = submission.generation, "poll job submitted");
    Html(render::poll_loading(
        &poll_status_url(state.jobs.mode(), &submission.key),
        state.config.recheck_delay(),
    ))
}

async fn poll_status(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Html<String> {
    let key = state.jobs.key_for(query.session.as_deref());
    let html = match state.jobs.check(&key) {
        StatusView::Idle => render::POLL_IDLE.to_string(),
        StatusView::Processing { elapsed, phase } => render::poll_processing(
            &poll_status_url(state.jobs.mode(), &key),
            state.config.recheck_delay(),
            phase,
            elapsed,
        ),
        StatusView::Completed(result) => render::poll_completed(&result),
        StatusView::Failed(error) => render::poll_error(&error),
    };
    Html(html)
}

async fn cleanup() -> Html<String> {
    Html(render::sse_container())
}

async fn health_check() -> &'static str {
    "ok"
}
