//! Assembly of the event pipeline from configuration.

use std::sync::Arc;

use dispatch::{
    EventDispatcher, EventHandler, HandlerRegistry, MonitorConfig, ProcessingMonitor,
    Subscription, SubscriptionManager,
};
use events::{EventEnvelope, SequenceTracker, TypeHierarchy};
use publisher::{
    CaptureSink, EventPublisher, InMemoryLog, LogProducer, LogSink, TopicNaming,
    TransactionalPublisher,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SinkKind};
use crate::error::StartupError;

/// The wired pipeline: transaction boundary → publisher → dispatcher → monitor.
///
/// Built once at startup and read-only afterwards.
pub struct Pipeline {
    monitor: Arc<ProcessingMonitor>,
    dispatcher: Arc<EventDispatcher>,
    publisher: TransactionalPublisher,
    capture: Option<Arc<CaptureSink>>,
    log_sink: Option<Arc<LogSink>>,
}

impl Pipeline {
    /// Builds the registries, monitor and configured publisher.
    pub fn assemble(
        config: &Config,
        handlers: Vec<Arc<dyn EventHandler>>,
        subscriptions: Vec<Subscription>,
    ) -> Result<Self, StartupError> {
        let registry = HandlerRegistry::builder()
            .collision_policy(config.collision_policy)
            .register_all(handlers)
            .build()?;

        let subscriptions = subscriptions
            .into_iter()
            .fold(
                SubscriptionManager::builder(TypeHierarchy::commerce()),
                |builder, subscription| builder.subscribe(subscription),
            )
            .build();

        let monitor = Arc::new(ProcessingMonitor::new(MonitorConfig {
            timeout: config.monitor_timeout,
            sweep_interval: config.sweep_interval,
            ..MonitorConfig::default()
        }));

        let dispatcher = Arc::new(
            EventDispatcher::new(Arc::new(registry), Arc::new(subscriptions), Arc::clone(&monitor))
                .with_sequence_tracker(Arc::new(SequenceTracker::with_max_aggregates(
                    config.sequence_max_aggregates,
                ))),
        );

        let (publisher, capture, log_sink) = match config.sink {
            SinkKind::Capture => {
                let capture = Arc::new(CaptureSink::with_dispatcher(Arc::clone(&dispatcher)));
                (capture.clone() as Arc<dyn EventPublisher>, Some(capture), None)
            }
            SinkKind::Log => {
                let sink = Arc::new(
                    LogSink::new(log_producer(config)?, TopicNaming::new(&config.namespace))
                        .with_local_dispatch(Arc::clone(&dispatcher)),
                );
                (sink.clone() as Arc<dyn EventPublisher>, None, Some(sink))
            }
        };

        tracing::info!(
            sink = publisher.name(),
            handlers = dispatcher.registry().len(),
            subscriptions = dispatcher.subscriptions().subscription_count(),
            "event pipeline assembled"
        );

        Ok(Self {
            monitor,
            dispatcher,
            publisher: TransactionalPublisher::new(publisher),
            capture,
            log_sink,
        })
    }

    pub fn monitor(&self) -> &Arc<ProcessingMonitor> {
        &self.monitor
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn publisher(&self) -> &TransactionalPublisher {
        &self.publisher
    }

    /// The capture sink, when `EVENT_SINK=capture`.
    pub fn capture(&self) -> Option<&Arc<CaptureSink>> {
        self.capture.as_ref()
    }

    /// Stages `events` in a fresh transaction and commits it.
    pub async fn publish_committed(&self, events: Vec<EventEnvelope>) {
        let mut tx = self.publisher.begin();
        tx.add_pending_events(events);
        self.publisher.after_commit(&mut tx).await;
    }

    pub fn spawn_timeout_sweeper(&self, token: CancellationToken) -> JoinHandle<()> {
        self.monitor.spawn_timeout_sweeper(token)
    }

    /// Waits for in-flight log deliveries.
    pub async fn shutdown(&self) {
        if let Some(sink) = &self.log_sink {
            sink.flush().await;
        }
        tracing::info!(active = self.monitor.active_count(), "event pipeline drained");
    }
}

#[cfg(feature = "kafka")]
fn log_producer(config: &Config) -> Result<Arc<dyn LogProducer>, StartupError> {
    if let Some(brokers) = &config.kafka_brokers {
        let producer = publisher::KafkaProducer::new(brokers, std::time::Duration::from_secs(5))?;
        return Ok(Arc::new(producer));
    }
    tracing::warn!("KAFKA_BROKERS not set, falling back to the in-memory log");
    Ok(Arc::new(InMemoryLog::new(config.partitions)))
}

#[cfg(not(feature = "kafka"))]
fn log_producer(config: &Config) -> Result<Arc<dyn LogProducer>, StartupError> {
    tracing::info!(partitions = config.partitions, "using the in-memory log");
    Ok(Arc::new(InMemoryLog::new(config.partitions)))
}
