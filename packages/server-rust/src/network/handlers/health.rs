//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the server is actually healthy. This lets monitoring tools
/// distinguish between "server is up but draining" vs "server is down".
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Process health summary")),
    tags = ["health"],
    operation_id = "health"
)]
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();

    Json(json!({
        "role": state.config.role.as_str(),
        "node": state.config.node_id,
        "state": health.as_str(),
        "connections": state.registry.count(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe -- always returns 200 OK.
///
/// Does not look at downstream dependencies or health state, because a
/// failed liveness probe triggers a restart.
#[utoipa::path(
    get,
    path = "/health/live",
    responses((status = 200, description = "Process is running")),
    tags = ["health"],
    operation_id = "live"
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- returns 200 when ready, 503 otherwise.
///
/// Returns 503 during startup (before `set_ready()` is called), during
/// graceful shutdown (Draining state), and after stop.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Accepting traffic"),
        (status = 503, description = "Starting or draining")
    ),
    tags = ["health"],
    operation_id = "ready"
)]
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
