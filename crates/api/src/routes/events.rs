//! Event ingestion: each request is one committed transaction.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use events::{EventEnvelope, EventId, EventKind};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::pipeline::Pipeline;

#[derive(Debug, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub aggregate_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub sequence: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub events: Vec<NewEvent>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub accepted: usize,
    pub event_ids: Vec<EventId>,
}

/// POST /events: validates the whole batch, then publishes it as one commit.
///
/// A batch with any invalid event is rejected without publishing anything.
pub async fn publish(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<PublishRequest>,
) -> Result<(StatusCode, Json<PublishResponse>), ApiError> {
    let envelopes = request
        .events
        .into_iter()
        .map(to_envelope)
        .collect::<Result<Vec<_>, _>>()?;

    let event_ids: Vec<EventId> = envelopes.iter().map(EventEnvelope::event_id).collect();
    pipeline.publish_committed(envelopes).await;

    tracing::debug!(accepted = event_ids.len(), "event batch committed");
    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            accepted: event_ids.len(),
            event_ids,
        }),
    ))
}

fn to_envelope(event: NewEvent) -> Result<EventEnvelope, ApiError> {
    if event.event_type.trim().is_empty() {
        return Err(ApiError::BadRequest("event_type must not be empty".to_string()));
    }
    if event.aggregate_id.trim().is_empty() {
        return Err(ApiError::BadRequest("aggregate_id must not be empty".to_string()));
    }
    if EventKind::from_event_type(&event.event_type).is_some_and(|kind| kind.is_abstract()) {
        return Err(ApiError::BadRequest(format!(
            "{} is an event group and cannot be raised",
            event.event_type
        )));
    }

    let mut builder = EventEnvelope::builder()
        .event_type(event.event_type)
        .aggregate_id(event.aggregate_id)
        .payload_raw(event.payload);
    if let Some(sequence) = event.sequence {
        builder = builder.sequence(sequence);
    }
    Ok(builder.build()?)
}
