//! Dispatch error types.

use thiserror::Error;

/// Errors raised while assembling the dispatch layer at startup.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Two handlers declared the same event type under the reject policy.
    #[error("Handlers {existing} and {duplicate} both declare event type {event_type}")]
    DuplicateHandler {
        event_type: String,
        existing: String,
        duplicate: String,
    },

    /// A collision policy name could not be parsed.
    #[error("Unknown handler collision policy: {0}")]
    UnknownCollisionPolicy(String),
}

/// Result type for dispatch setup operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
