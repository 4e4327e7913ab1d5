//! Sink error types.

use thiserror::Error;

/// Errors raised while handing events to a message log.
///
/// These never reach the code that committed the events: the log sink
/// turns them into dead-letter records.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The log rejected or failed to acknowledge a record.
    #[error("Delivery to '{topic}' failed: {reason}")]
    Delivery { topic: String, reason: String },

    /// The producer could not be created or configured.
    #[error("Producer error: {0}")]
    Producer(String),

    /// The event could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The delivery task ended without reporting an outcome.
    #[error("Delivery was cancelled: {0}")]
    Cancelled(String),
}

/// Convenience type alias for sink results.
pub type Result<T> = std::result::Result<T, SinkError>;
