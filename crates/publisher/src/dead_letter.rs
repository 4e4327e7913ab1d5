//! Dead-letter routing for events that could not be delivered.

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use events::EventEnvelope;
use serde::{Deserialize, Serialize};

use crate::log_sink::TopicNaming;
use crate::producer::{LogProducer, LogRecord};

/// Why an event ended up in the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterCause {
    /// Top-level error message.
    pub message: String,
    /// Messages of the error's sources, outermost first.
    pub chain: Vec<String>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterCause {
    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(inner) = source {
            chain.push(inner.to_string());
            source = inner.source();
        }
        Self {
            message: error.to_string(),
            chain,
            failed_at: Utc::now(),
        }
    }
}

/// The JSON document written to a dead-letter topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub event: EventEnvelope,
    pub cause: DeadLetterCause,
    /// Topic the event was originally bound for.
    pub destination: String,
}

/// Best-effort sink for undeliverable events.
///
/// Writes go to `{namespace}.{event_type}.dlq`, keyed by aggregate id. A
/// failed dead-letter write is logged and counted, never raised: there is
/// no further fallback.
pub struct DeadLetterSink {
    producer: Arc<dyn LogProducer>,
    naming: TopicNaming,
}

impl DeadLetterSink {
    pub fn new(producer: Arc<dyn LogProducer>, naming: TopicNaming) -> Self {
        Self { producer, naming }
    }

    pub fn naming(&self) -> &TopicNaming {
        &self.naming
    }

    /// Records `event` together with the error that kept it from being delivered.
    #[tracing::instrument(skip_all, fields(event_type = %event.event_type(), event_id = %event.event_id()))]
    pub async fn send_to_dead_letter(
        &self,
        event: &EventEnvelope,
        cause: &(dyn Error + Send + Sync + 'static),
    ) {
        let topic = self.naming.dead_letter_topic_for(event.event_type());
        let record = DeadLetterRecord {
            event: event.clone(),
            cause: DeadLetterCause::from_error(cause),
            destination: self.naming.topic_for(event.event_type()),
        };

        let payload = match serde_json::to_vec(&record) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode dead-letter record, dropping event");
                metrics::counter!("dead_letter_failures_total").increment(1);
                return;
            }
        };

        let log_record = LogRecord::new(&topic, event.aggregate_id().as_str(), payload)
            .with_header("event_type", event.event_type())
            .with_header("event_id", event.event_id().to_string());

        match self.producer.send(log_record).await {
            Ok(metadata) => {
                metrics::counter!("events_dead_lettered_total", "event_type" => event.event_type().to_string())
                    .increment(1);
                tracing::warn!(
                    topic = %metadata.topic,
                    partition = metadata.partition,
                    offset = metadata.offset,
                    cause = %record.cause.message,
                    "event routed to dead-letter topic"
                );
            }
            Err(err) => {
                metrics::counter!("dead_letter_failures_total").increment(1);
                tracing::error!(
                    topic = %topic,
                    aggregate_id = %event.aggregate_id(),
                    cause = %record.cause.message,
                    error = %err,
                    "dead-letter write failed, event is lost"
                );
            }
        }
    }
}

impl std::fmt::Debug for DeadLetterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterSink")
            .field("producer", &self.producer.name())
            .field("namespace", &self.naming.namespace())
            .finish()
    }
}
