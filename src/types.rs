//! Core event types for the a3s-eda system
//!
//! All types use camelCase JSON serialization for wire compatibility.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single named event
///
/// `name` is the only routing key (e.g., `order.created`). The payload is
/// opaque to the bus; its shape is implied by the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Event name used for routing
    pub name: String,

    /// Event payload — arbitrary JSON data
    pub payload: serde_json::Value,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    /// Optional key-value metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event with auto-generated id and timestamp
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            payload,
            timestamp: now_millis(),
            metadata: HashMap::new(),
        }
    }

    /// Create an event whose payload is the JSON form of `data`
    pub fn from_data<T: Serialize>(name: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self::new(name, serde_json::to_value(data)?))
    }

    /// Decode the payload into the type the caller associates with this name
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A single handler failure during delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerFailure {
    /// Id of the event being delivered
    pub event_id: String,

    /// Name of the event being delivered
    pub event_name: String,

    /// Position of the handler in the registration order for that name
    pub handler_position: usize,

    /// Error message or panic text
    pub reason: String,
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
