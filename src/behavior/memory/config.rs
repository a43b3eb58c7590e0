//! Memory behavior configuration

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a full observe buffer does to the publisher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Backpressure {
    /// Drop the incoming event for that observer only
    #[default]
    DropNewest,
    /// Wait for the observer to make room (or stop)
    Block,
}

/// Configuration for `MemoryBehavior`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// Per-observer channel capacity
    pub observe_buffer: usize,

    /// Policy when an observer's channel is full
    pub backpressure: Backpressure,

    /// Events retained per name for `pull` when nobody is waiting (0 = none)
    pub pull_backlog: usize,

    /// How long `pull` waits before timing out (None = forever)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_timeout_ms: Option<u64>,

    /// Allow `tx` inside an open scope
    pub nested_transactions: bool,

    /// Maximum events per publish call (0 = unlimited)
    pub max_batch_size: usize,

    /// Delivered events kept for `history` (0 = none)
    pub history_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            observe_buffer: 256,
            backpressure: Backpressure::DropNewest,
            pull_backlog: 1024,
            pull_timeout_ms: None,
            nested_transactions: false,
            max_batch_size: 1000,
            history_capacity: 1000,
        }
    }
}

impl MemoryConfig {
    /// Set the observe channel capacity
    pub fn with_observe_buffer(mut self, capacity: usize) -> Self {
        self.observe_buffer = capacity;
        self
    }

    /// Set the observe backpressure policy
    pub fn with_backpressure(mut self, backpressure: Backpressure) -> Self {
        self.backpressure = backpressure;
        self
    }

    /// Set the per-name pull backlog
    pub fn with_pull_backlog(mut self, capacity: usize) -> Self {
        self.pull_backlog = capacity;
        self
    }

    /// Set the pull timeout
    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Enable or disable nested transaction scopes
    pub fn with_nested_transactions(mut self, enabled: bool) -> Self {
        self.nested_transactions = enabled;
        self
    }

    /// Set the maximum publish batch size
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Set the history ring capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Pull timeout as a `Duration`
    pub fn pull_timeout(&self) -> Option<Duration> {
        self.pull_timeout_ms.map(Duration::from_millis)
    }

    /// Check the configuration for values the behavior cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.observe_buffer == 0 {
            return Err(EventError::Config(
                "observeBuffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MemoryConfig::default();
        assert_eq!(config.observe_buffer, 256);
        assert_eq!(config.backpressure, Backpressure::DropNewest);
        assert_eq!(config.pull_backlog, 1024);
        assert!(config.pull_timeout().is_none());
        assert!(!config.nested_transactions);
        assert_eq!(config.max_batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = MemoryConfig::default()
            .with_observe_buffer(8)
            .with_backpressure(Backpressure::Block)
            .with_pull_timeout(Duration::from_millis(250))
            .with_nested_transactions(true)
            .with_max_batch_size(0)
            .with_history_capacity(10)
            .with_pull_backlog(0);

        assert_eq!(config.observe_buffer, 8);
        assert_eq!(config.backpressure, Backpressure::Block);
        assert_eq!(config.pull_timeout(), Some(Duration::from_millis(250)));
        assert!(config.nested_transactions);
        assert_eq!(config.max_batch_size, 0);
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.pull_backlog, 0);
    }

    #[test]
    fn test_huge_pull_timeout_saturates() {
        let config = MemoryConfig::default().with_pull_timeout(Duration::MAX);
        assert_eq!(config.pull_timeout_ms, Some(u64::MAX));
    }

    #[test]
    fn test_zero_observe_buffer_rejected() {
        let err = MemoryConfig::default()
            .with_observe_buffer(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, EventError::Config(_)));
    }

    #[test]
    fn test_deserialize_partial_uses_defaults() {
        let config: MemoryConfig =
            serde_json::from_str(r#"{"backpressure":"block","pullTimeoutMs":500}"#).unwrap();
        assert_eq!(config.backpressure, Backpressure::Block);
        assert_eq!(config.pull_timeout_ms, Some(500));
        assert_eq!(config.observe_buffer, 256);
        assert!(!config.nested_transactions);
    }

    #[test]
    fn test_serialize_skips_unset_timeout() {
        let json = serde_json::to_string(&MemoryConfig::default()).unwrap();
        assert!(json.contains("\"observeBuffer\":256"));
        assert!(json.contains("\"backpressure\":\"dropNewest\""));
        assert!(!json.contains("pullTimeoutMs"));
    }
}
