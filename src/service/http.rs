//! HTTP control and scrape endpoints
//!
//! `/test` triggers a publish, `/metrics` serves the Prometheus text format,
//! `/health` and `/stats` report the service state.

use crate::metrics::MetricsCollector;
use crate::publish::PublishAction;
use crate::service::lifecycle::LifecycleState;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub action: PublishAction,
    pub metrics: Arc<MetricsCollector>,
    pub lifecycle: watch::Receiver<LifecycleState>,
}

/// Create the Axum router with all endpoints
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/test", any(test_handler))
        .route("/metrics", any(metrics_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

/// Root endpoint handler - shows service information
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "publish-bridge",
        "version": crate::VERSION,
        "endpoints": ["/test", "/metrics", "/health", "/stats"]
    }))
}

/// Control endpoint: publish the request body (or the default payload)
async fn test_handler(State(state): State<HttpState>, body: Bytes) -> impl IntoResponse {
    debug!("Publish requested ({} byte body)", body.len());

    match state.action.execute(&body).await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            error!("Publish request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "publish failed")
        }
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HttpState>) -> Response {
    debug!("Metrics endpoint requested");

    match state.metrics.encode_text() {
        Ok(metrics_output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, state.metrics.content_type())],
            metrics_output,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Liveness: healthy while the listener is serving normally
async fn health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let current = *state.lifecycle.borrow();
    match current {
        LifecycleState::Running => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "shutting down"),
    }
}

/// Publish counters and lifecycle state as JSON
async fn stats_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let snapshot = state.metrics.publish().snapshot();
    let current = *state.lifecycle.borrow();

    Json(json!({
        "service": {
            "name": "publish-bridge",
            "version": crate::VERSION,
            "state": current,
        },
        "publish": {
            "destination": state.action.destination(),
            "mode": state.action.mode(),
            "received": snapshot.received,
            "sent": snapshot.sent,
            "failed": snapshot.failed,
            "last_send_duration_seconds": snapshot.last_send_duration_seconds,
        },
        "timestamp": chrono::Utc::now(),
    }))
}
