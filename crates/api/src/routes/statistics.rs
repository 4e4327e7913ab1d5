//! Processing statistics endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use dispatch::ProcessingStatistics;

use crate::pipeline::Pipeline;

/// GET /statistics: snapshot of the monitor's counters.
pub async fn get(State(pipeline): State<Arc<Pipeline>>) -> Json<ProcessingStatistics> {
    Json(pipeline.monitor().get_statistics())
}

/// DELETE /statistics: administrative reset of counters and health.
pub async fn reset(State(pipeline): State<Arc<Pipeline>>) -> StatusCode {
    pipeline.monitor().reset_statistics();
    StatusCode::NO_CONTENT
}
