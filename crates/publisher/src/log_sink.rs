//! Durable publishing to a partitioned message log.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use dispatch::EventDispatcher;
use events::EventEnvelope;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::dead_letter::DeadLetterSink;
use crate::error::SinkError;
use crate::producer::{DeliveryFuture, LogProducer, LogRecord, RecordMetadata};
use crate::publisher::EventPublisher;

/// Derives topic names from event type tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNaming {
    namespace: String,
}

impl TopicNaming {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `{namespace}.{event_type lowercased}`
    pub fn topic_for(&self, event_type: &str) -> String {
        format!("{}.{}", self.namespace, event_type.to_lowercase())
    }

    /// `{namespace}.{event_type lowercased}.dlq`
    pub fn dead_letter_topic_for(&self, event_type: &str) -> String {
        format!("{}.dlq", self.topic_for(event_type))
    }
}

impl Default for TopicNaming {
    fn default() -> Self {
        Self::new("domain")
    }
}

/// Awaitable outcome of one [`LogSink::send`].
///
/// Dropping the handle does not cancel the delivery; dead-lettering on
/// failure happens either way.
#[derive(Debug)]
pub struct DeliveryHandle {
    inner: JoinHandle<Result<RecordMetadata, SinkError>>,
}

impl Future for DeliveryHandle {
    type Output = Result<RecordMetadata, SinkError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| Err(SinkError::Cancelled(err.to_string())))
        })
    }
}

/// Publishes events to a message log, one topic per event type, keyed by
/// aggregate id.
///
/// `send` enqueues synchronously and returns immediately; acknowledgement
/// is awaited on a background task. Failed deliveries are routed to the
/// [`DeadLetterSink`] and never surface to the publishing caller.
pub struct LogSink {
    producer: Arc<dyn LogProducer>,
    naming: TopicNaming,
    dead_letter: Arc<DeadLetterSink>,
    dispatcher: Option<Arc<EventDispatcher>>,
    in_flight: TaskTracker,
    flush_lock: Mutex<()>,
}

impl LogSink {
    /// Creates a log sink whose dead letters go through the same producer.
    pub fn new(producer: Arc<dyn LogProducer>, naming: TopicNaming) -> Self {
        let dead_letter = Arc::new(DeadLetterSink::new(Arc::clone(&producer), naming.clone()));
        Self::with_dead_letter(producer, naming, dead_letter)
    }

    pub fn with_dead_letter(
        producer: Arc<dyn LogProducer>,
        naming: TopicNaming,
        dead_letter: Arc<DeadLetterSink>,
    ) -> Self {
        Self {
            producer,
            naming,
            dead_letter,
            dispatcher: None,
            in_flight: TaskTracker::new(),
            flush_lock: Mutex::new(()),
        }
    }

    /// Also dispatches each event to local handlers once the log acknowledged it.
    pub fn with_local_dispatch(mut self, dispatcher: Arc<EventDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn naming(&self) -> &TopicNaming {
        &self.naming
    }

    /// Number of deliveries still awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Enqueues one event and returns a handle to its delivery outcome.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, event: EventEnvelope) -> DeliveryHandle {
        let topic = self.naming.topic_for(event.event_type());
        let delivery = self.enqueue(&topic, &event);

        let dead_letter = Arc::clone(&self.dead_letter);
        let dispatcher = self.dispatcher.clone();
        let inner = self.in_flight.spawn(async move {
            match delivery.await {
                Ok(metadata) => {
                    metrics::counter!("events_published_total", "sink" => "log").increment(1);
                    tracing::debug!(
                        topic = %metadata.topic,
                        partition = metadata.partition,
                        offset = metadata.offset,
                        event_id = %event.event_id(),
                        "event delivered"
                    );
                    if let Some(dispatcher) = dispatcher {
                        dispatcher.dispatch(&event).await;
                    }
                    Ok(metadata)
                }
                Err(err) => {
                    metrics::counter!("events_publish_failures_total", "sink" => "log").increment(1);
                    tracing::error!(
                        topic = %topic,
                        event_type = event.event_type(),
                        event_id = %event.event_id(),
                        aggregate_id = %event.aggregate_id(),
                        error = %err,
                        "event delivery failed, routing to dead-letter"
                    );
                    dead_letter.send_to_dead_letter(&event, &err).await;
                    Err(err)
                }
            }
        });

        DeliveryHandle { inner }
    }

    /// Waits until every delivery started so far has completed, including
    /// any resulting dead-letter writes.
    ///
    /// Concurrent flushes are serialized so one flush cannot reopen the
    /// tracker while another is still waiting on it.
    pub async fn flush(&self) {
        let _guard = self.flush_lock.lock().await;
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    fn enqueue(&self, topic: &str, event: &EventEnvelope) -> DeliveryFuture {
        match serde_json::to_vec(event) {
            Ok(payload) => {
                let record = LogRecord::new(topic, event.aggregate_id().as_str(), payload)
                    .with_header("event_type", event.event_type())
                    .with_header("event_id", event.event_id().to_string());
                self.producer.send(record)
            }
            Err(err) => Box::pin(futures::future::ready(Err(SinkError::from(err)))),
        }
    }
}

impl std::fmt::Debug for LogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSink")
            .field("producer", &self.producer.name())
            .field("naming", &self.naming)
            .field("in_flight", &self.in_flight.len())
            .field("dispatching", &self.dispatcher.is_some())
            .finish()
    }
}

#[async_trait]
impl EventPublisher for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type(), event_id = %event.event_id()))]
    async fn publish(&self, event: EventEnvelope) {
        drop(self.send(event));
    }
}
