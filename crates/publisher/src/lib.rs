//! Publishing side of the domain-event pipeline.
//!
//! Events raised inside a unit of work are staged in an
//! [`EventTransaction`] and handed to an [`EventPublisher`] only after the
//! unit of work commits. Two publishers are provided:
//!
//! - [`CaptureSink`] keeps an in-memory ordered log and forwards each event
//!   to the local [`dispatch::EventDispatcher`]; used in tests and
//!   single-process deployments.
//! - [`LogSink`] sends each event to a partitioned message log through a
//!   [`LogProducer`], keyed by aggregate id. Failed deliveries are routed
//!   to the [`DeadLetterSink`] instead of reaching the committing caller.

pub mod capture;
pub mod dead_letter;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod log_sink;
pub mod producer;
pub mod publisher;
pub mod transaction;

pub use capture::CaptureSink;
pub use dead_letter::{DeadLetterCause, DeadLetterRecord, DeadLetterSink};
pub use error::{Result, SinkError};
#[cfg(feature = "kafka")]
pub use kafka::KafkaProducer;
pub use log_sink::{DeliveryHandle, LogSink, TopicNaming};
pub use producer::{DeliveryFuture, InMemoryLog, LogProducer, LogRecord, RecordMetadata};
pub use publisher::{EventPublisher, EventPublisherExt};
pub use transaction::{EventTransaction, TransactionalPublisher};
