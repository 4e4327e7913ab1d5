//! Kafka-compatible producer, enabled by the `kafka` feature.

use std::time::Duration;

use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use crate::error::SinkError;
use crate::producer::{DeliveryFuture, LogProducer, LogRecord, RecordMetadata};

/// [`LogProducer`] backed by an rdkafka [`FutureProducer`].
///
/// Records are handed to librdkafka's queue inside `send`, which keeps
/// per-key send order; the returned future resolves on broker
/// acknowledgement.
pub struct KafkaProducer {
    producer: FutureProducer,
    brokers: String,
}

impl KafkaProducer {
    /// Connects to `brokers` with idempotent, fully acknowledged delivery.
    pub fn new(brokers: &str, message_timeout: Duration) -> Result<Self, SinkError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", message_timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| SinkError::Producer(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, "kafka producer created");

        Ok(Self {
            producer,
            brokers: brokers.to_string(),
        })
    }

    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Blocks until queued records are delivered or `timeout` elapses.
    pub fn flush(&self, timeout: Duration) -> Result<(), SinkError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| SinkError::Producer(format!("Flush failed: {e}")))
    }
}

impl LogProducer for KafkaProducer {
    fn name(&self) -> &str {
        "kafka"
    }

    fn send(&self, record: LogRecord) -> DeliveryFuture {
        let headers = record
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key,
                    value: Some(value.as_str()),
                })
            });

        let future_record = FutureRecord::to(&record.topic)
            .key(&record.key)
            .payload(&record.payload)
            .headers(headers);

        let topic = record.topic.clone();
        match self.producer.send_result(future_record) {
            Ok(delivery) => async move {
                match delivery.await {
                    Ok(Ok((partition, offset))) => Ok(RecordMetadata {
                        topic,
                        partition,
                        offset,
                    }),
                    Ok(Err((err, _message))) => Err(SinkError::Delivery {
                        topic,
                        reason: err.to_string(),
                    }),
                    Err(_canceled) => Err(SinkError::Cancelled(
                        "producer dropped before acknowledgement".to_string(),
                    )),
                }
            }
            .boxed(),
            Err((err, _record)) => {
                let error = SinkError::Delivery {
                    topic,
                    reason: err.to_string(),
                };
                futures::future::ready(Err(error)).boxed()
            }
        }
    }
}
