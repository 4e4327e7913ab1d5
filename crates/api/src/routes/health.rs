//! Health endpoints backed by the processing monitor.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use dispatch::{HandlerHealth, HealthStatus};
use serde::Serialize;

use crate::error::ApiError;
use crate::pipeline::Pipeline;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub active_invocations: usize,
    pub handlers: BTreeMap<String, HandlerHealth>,
}

/// GET /health: worst handler status plus every handler's record.
///
/// Responds 503 while any handler is unhealthy.
pub async fn check(State(pipeline): State<Arc<Pipeline>>) -> (StatusCode, Json<HealthResponse>) {
    let monitor = pipeline.monitor();
    let status = monitor.overall_health();
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    (
        code,
        Json(HealthResponse {
            status,
            active_invocations: monitor.active_count(),
            handlers: monitor.get_all_health(),
        }),
    )
}

/// GET /health/{handler}: one handler's record.
pub async fn handler(
    State(pipeline): State<Arc<Pipeline>>,
    Path(name): Path<String>,
) -> Result<Json<HandlerHealth>, ApiError> {
    pipeline
        .monitor()
        .get_all_health()
        .remove(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No health record for handler {name}")))
}
