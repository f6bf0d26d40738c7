//! HTTP surface for run requests.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use crate::language::Language;
use crate::orchestrator::Orchestrator;
use crate::types::{ExecutionRequest, ExecutionStatus};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Upper bound for a whole request, polling included.
    pub request_timeout: Duration,
}

/// Body of `POST /run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub code: String,
    /// `python3`/`java21`, or the `python`/`java` shorthands
    #[serde(default)]
    pub language: Option<String>,
    /// Accepted for compatibility; the in-cluster filename is always derived.
    #[serde(default)]
    pub filename: Option<String>,
}

/// Body returned by `POST /run`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub status: String,
    pub log: String,
    pub description: String,
}

/// Build the HTTP router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(state.request_timeout)),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "code-runner",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(_state): State<AppState>) -> Json<Value> {
    // State only exists once the cluster handle has been established
    Json(json!({
        "status": "ready",
        "service": "code-runner",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn run_handler(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> (StatusCode, Json<RunResponse>) {
    info!(
        language = ?body.language,
        filename = body.filename.as_deref().unwrap_or_default(),
        bytes = body.code.len(),
        "Received run request"
    );

    let language = match body.language.as_deref().map(str::parse::<Language>).transpose() {
        Ok(language) => language,
        Err(e) => {
            info!(error = %e, "Rejected run request");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(RunResponse {
                    status: ExecutionStatus::Rejected.to_string(),
                    log: String::new(),
                    description: e.to_string(),
                }),
            );
        }
    };

    let request = ExecutionRequest::new(body.code, language);
    match state.orchestrator.execute(request).await {
        Ok(result) => {
            let code = if result.status == ExecutionStatus::Rejected {
                StatusCode::UNPROCESSABLE_ENTITY
            } else {
                StatusCode::OK
            };
            (
                code,
                Json(RunResponse {
                    status: result.status.to_string(),
                    log: result.log,
                    description: result.description,
                }),
            )
        }
        Err(e) => {
            error!(error = %e, "Run request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RunResponse {
                    status: "Error".to_string(),
                    log: String::new(),
                    description: e.to_string(),
                }),
            )
        }
    }
}
