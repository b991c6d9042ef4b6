//! Inbound HTTP layer.
//!
//! Accepts a task request, checks the shared secret, hands the run to the
//! background tracker and answers immediately. Pipeline outcomes are only
//! visible in the logs and in the evaluation callback.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::DeployerConfig;
use crate::orchestrator::TaskOrchestrator;
use crate::request::TaskRequest;

/// Shared state for the request handlers.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<TaskOrchestrator>,
    secret: Arc<str>,
    tracker: TaskTracker,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<TaskOrchestrator>,
        secret: impl Into<Arc<str>>,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            orchestrator,
            secret: secret.into(),
            tracker,
        }
    }
}

/// Request body: a [`TaskRequest`] plus the caller's secret.
#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    #[serde(default)]
    pub secret: String,
    #[serde(flatten)]
    pub request: TaskRequest,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct AcceptedResponse {
    status: &'static str,
    note: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handle_root))
        .route("/api-endpoint", post(handle_task))
        .with_state(state)
}

async fn handle_root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "running",
        message: "POST task requests to /api-endpoint",
    })
}

async fn handle_task(State(state): State<AppState>, Json(body): Json<InboundRequest>) -> Response {
    let InboundRequest { secret, request } = body;

    if secret != *state.secret {
        warn!(task = %request.task, "Rejected request with invalid secret");
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "Invalid secret".into(),
            }),
        )
            .into_response();
    }

    if request.task.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Missing task name".into(),
            }),
        )
            .into_response();
    }

    let round = request.round;
    info!(task = %request.task, round, attachments = request.attachments.len(), "Accepted task");
    state.orchestrator.spawn(&state.tracker, request);

    Json(AcceptedResponse {
        status: "accepted",
        note: format!("processing round {round} started"),
    })
    .into_response()
}

/// Run the inbound server until Ctrl-C, then wait for in-flight runs.
pub async fn serve(config: DeployerConfig) -> Result<()> {
    let secret = config
        .user_secret
        .clone()
        .context("USER_SECRET must be set to accept requests")?;
    let orchestrator = Arc::new(TaskOrchestrator::from_config(&config)?);
    let tracker = TaskTracker::new();
    let app = router(AppState::new(orchestrator, secret, tracker.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracker.close();
    if !tracker.is_empty() {
        info!(in_flight = tracker.len(), "Waiting for running tasks to finish");
    }
    tracker.wait().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
