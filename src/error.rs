//! Error types for a3s-eda

use crate::types::HandlerFailure;
use thiserror::Error;

/// Errors that can occur on the event bus
#[derive(Debug, Error)]
pub enum EventError {
    /// Malformed `(event_name, handler)` registration
    #[error("Failed to register handler for '{event_name}': {reason}")]
    Registration { event_name: String, reason: String },

    /// The behavior could not accept the whole batch; nothing was delivered
    #[error("Publish rejected: {reason}")]
    PublishRejected { reason: String },

    /// `commit`/`rollback` without a matching `tx`
    #[error("No open transaction scope")]
    NoOpenScope,

    /// `tx` while a scope is already open and the behavior does not nest
    #[error("Transaction scope already open and nested transactions are disabled")]
    NestedScope,

    /// State token not issued by this behavior
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// One or more handlers failed; every handler was still invoked
    #[error("{} handler(s) failed during delivery", .0.len())]
    HandlerFailures(Vec<HandlerFailure>),

    /// Observe stream closed by the behavior, not by the consumer
    #[error("Stream for '{event_name}' terminated by the behavior")]
    StreamTerminated { event_name: String },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Behavior was shut down
    #[error("Behavior closed: {0}")]
    Closed(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal behavior failure
    #[error("Behavior error: {0}")]
    Behavior(String),
}

impl EventError {
    /// True when events were accepted and delivered but some handlers failed
    pub fn is_delivery_failure(&self) -> bool {
        matches!(self, EventError::HandlerFailures(_))
    }

    /// Handler failures carried by this error, if any
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            EventError::HandlerFailures(failures) => failures,
            _ => &[],
        }
    }
}

/// Result type alias for event bus operations
pub type Result<T> = std::result::Result<T, EventError>;
