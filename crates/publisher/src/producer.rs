//! Message-log producer abstraction and the in-memory log.

use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::error::SinkError;

/// One keyed record bound for a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub topic: String,
    /// Partitioning key; records sharing a key keep their send order.
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl LogRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of the first header called `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Where an acknowledged record landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Completes when the log acknowledges or rejects a record.
pub type DeliveryFuture = BoxFuture<'static, Result<RecordMetadata, SinkError>>;

/// A producer for a partitioned, append-only message log.
///
/// `send` enqueues the record before returning, so two sends made in
/// sequence for the same key are appended in that order. Only the
/// acknowledgement is asynchronous.
pub trait LogProducer: Send + Sync {
    fn name(&self) -> &str;

    fn send(&self, record: LogRecord) -> DeliveryFuture;
}

/// Partition for `key`, using the murmur2 hash of the common Kafka
/// partitioner so keys map the same way in memory and on a broker.
pub fn partition_for(key: &str, partitions: u32) -> i32 {
    ((murmur2(key.as_bytes()) & 0x7fff_ffff) % partitions.max(1)) as i32
}

fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = SEED ^ data.len() as u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}

/// In-process partitioned log.
///
/// Records are appended at send time; acknowledgement can be delayed to
/// mimic a remote broker, and individual topics can be made to reject
/// records.
#[derive(Debug)]
pub struct InMemoryLog {
    partitions: u32,
    ack_delay: Option<Duration>,
    topics: DashMap<String, Vec<Vec<LogRecord>>>,
    failing: DashMap<String, String>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new(3)
    }
}

impl InMemoryLog {
    /// Creates a log whose topics have `partitions` partitions each.
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            ack_delay: None,
            topics: DashMap::new(),
            failing: DashMap::new(),
        }
    }

    /// Delays every acknowledgement by `delay`.
    pub fn with_ack_delay(mut self, delay: Duration) -> Self {
        self.ack_delay = Some(delay);
        self
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Makes every send to `topic` fail with `reason`.
    pub fn fail_topic(&self, topic: impl Into<String>, reason: impl Into<String>) {
        self.failing.insert(topic.into(), reason.into());
    }

    /// Undoes [`fail_topic`](Self::fail_topic).
    pub fn heal_topic(&self, topic: &str) {
        self.failing.remove(topic);
    }

    /// All records of `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<LogRecord> {
        self.topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Records of one partition, in append order.
    pub fn partition_records(&self, topic: &str, partition: i32) -> Vec<LogRecord> {
        self.topics
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize).cloned())
            .unwrap_or_default()
    }

    pub fn record_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Names of every topic that holds at least one record, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().map(|entry| entry.key().clone()).collect();
        topics.sort();
        topics
    }

    fn append(&self, record: LogRecord) -> Result<RecordMetadata, SinkError> {
        if let Some(reason) = self.failing.get(&record.topic) {
            return Err(SinkError::Delivery {
                topic: record.topic.clone(),
                reason: reason.value().clone(),
            });
        }

        let partition = partition_for(&record.key, self.partitions);
        let topic = record.topic.clone();
        let mut partitions = self
            .topics
            .entry(topic.clone())
            .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
        let log = &mut partitions[partition as usize];
        let offset = log.len() as i64;
        log.push(record);

        Ok(RecordMetadata {
            topic,
            partition,
            offset,
        })
    }
}

impl LogProducer for InMemoryLog {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn send(&self, record: LogRecord) -> DeliveryFuture {
        let outcome = self.append(record);
        let delay = self.ack_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }
}
