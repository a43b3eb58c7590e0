//! Dead Letter Queue — keep events whose handlers failed
//!
//! Behaviors deliver to every handler regardless of failures. Each failed
//! `(event, handler)` pair can additionally be routed to a `DlqHandler`
//! for inspection or replay.

use crate::error::Result;
use crate::types::{now_millis, Event, HandlerFailure};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A failed delivery with context about why it ended up in the DLQ
#[derive(Debug, Clone)]
pub struct DeadLetterEvent {
    /// The event that was being delivered
    pub event: Event,

    /// Position of the failing handler in registration order
    pub handler_position: usize,

    /// Reason the delivery failed
    pub reason: String,

    /// Unix timestamp in milliseconds when the event was dead-lettered
    pub dead_lettered_at: u64,
}

impl DeadLetterEvent {
    /// Create a new dead letter event
    pub fn new(event: Event, handler_position: usize, reason: impl Into<String>) -> Self {
        Self {
            event,
            handler_position,
            reason: reason.into(),
            dead_lettered_at: now_millis(),
        }
    }

    /// Create a dead letter event from a recorded handler failure
    pub fn from_failure(event: Event, failure: &HandlerFailure) -> Self {
        Self::new(event, failure.handler_position, failure.reason.clone())
    }
}

/// Trait for dead letter queue handlers
#[async_trait]
pub trait DlqHandler: Send + Sync {
    /// Handle a dead-lettered event
    async fn handle(&self, event: DeadLetterEvent) -> Result<()>;

    /// Get the number of events currently in the DLQ
    async fn count(&self) -> Result<usize>;

    /// List recent dead-lettered events, most recent first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>>;
}

/// In-memory DLQ handler for development and testing
///
/// Keeps at most `max_events` entries, dropping the oldest.
pub struct MemoryDlqHandler {
    events: Arc<RwLock<Vec<DeadLetterEvent>>>,
    max_events: usize,
}

impl MemoryDlqHandler {
    /// Create a new in-memory DLQ handler
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            max_events,
        }
    }
}

impl Default for MemoryDlqHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DlqHandler for MemoryDlqHandler {
    async fn handle(&self, event: DeadLetterEvent) -> Result<()> {
        tracing::warn!(
            event_id = %event.event.id,
            event_name = %event.event.name,
            handler = event.handler_position,
            reason = %event.reason,
            "Event dead-lettered"
        );

        let mut events = self.events.write().await;
        events.push(event);

        if self.max_events > 0 && events.len() > self.max_events {
            let drain_count = events.len() - self.max_events;
            events.drain(..drain_count);
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let events = self.events.read().await;
        Ok(events.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(reason: &str) -> DeadLetterEvent {
        DeadLetterEvent::new(
            Event::new("order.created", serde_json::json!({})),
            0,
            reason,
        )
    }

    #[test]
    fn test_from_failure() {
        let event = Event::new("order.created", serde_json::json!({"n": 1}));
        let failure = HandlerFailure {
            event_id: event.id.clone(),
            event_name: event.name.clone(),
            handler_position: 3,
            reason: "timeout talking to billing".to_string(),
        };

        let dle = DeadLetterEvent::from_failure(event.clone(), &failure);
        assert_eq!(dle.event.id, event.id);
        assert_eq!(dle.handler_position, 3);
        assert_eq!(dle.reason, "timeout talking to billing");
        assert!(dle.dead_lettered_at > 0);
    }

    #[tokio::test]
    async fn test_memory_dlq_handle_and_count() {
        let dlq = MemoryDlqHandler::default();
        assert_eq!(dlq.count().await.unwrap(), 0);

        dlq.handle(failed("boom")).await.unwrap();
        assert_eq!(dlq.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_dlq_list_most_recent_first() {
        let dlq = MemoryDlqHandler::default();
        for i in 0..5 {
            dlq.handle(failed(&format!("reason {}", i))).await.unwrap();
        }

        let list = dlq.list(3).await.unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].reason, "reason 4");
        assert_eq!(list[2].reason, "reason 2");
    }

    #[tokio::test]
    async fn test_memory_dlq_max_capacity() {
        let dlq = MemoryDlqHandler::new(3);
        for i in 0..5 {
            dlq.handle(failed(&format!("reason {}", i))).await.unwrap();
        }

        assert_eq!(dlq.count().await.unwrap(), 3);
        let list = dlq.list(10).await.unwrap();
        assert_eq!(list[0].reason, "reason 4");
        assert_eq!(list[2].reason, "reason 2");
    }
}
