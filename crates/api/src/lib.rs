//! HTTP service around the domain-event pipeline.
//!
//! Wires handlers, subscribers, the processing monitor and the configured
//! publisher into a [`Pipeline`], and exposes ingestion, health,
//! statistics and Prometheus metrics over HTTP.

pub mod config;
pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use pipeline::Pipeline;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(pipeline: Arc<Pipeline>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/health/{handler}", get(routes::health::handler))
        .route(
            "/statistics",
            get(routes::statistics::get).delete(routes::statistics::reset),
        )
        .route("/events", post(routes::events::publish))
        .with_state(pipeline)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
