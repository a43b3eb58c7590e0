//! Behavior trait — the core abstraction for event bus backends
//!
//! Every backend (in-memory, durable log, message broker) implements
//! `Behavior`. The `EventBus` only threads the backend's opaque `State`
//! through these entry points and never inspects it.

use crate::error::Result;
use crate::handler::HandlerRef;
use crate::observe::Observation;
use crate::types::Event;
use async_trait::async_trait;

pub mod memory;

/// Core trait for event bus backends
///
/// `State` is whatever session, connection, or transaction context the
/// backend needs. Operations that may change it return the new value.
#[async_trait]
pub trait Behavior: Send + Sync + 'static {
    /// Opaque backend state carried by each bus value
    type State: Clone + Send + Sync + 'static;

    /// Register `handler` for future events named `event_name`
    async fn subscribe(
        &self,
        state: &Self::State,
        event_name: &str,
        handler: HandlerRef,
    ) -> Result<Self::State>;

    /// Remove one matching registration
    ///
    /// Must not fail when no registration matches.
    async fn unsubscribe(
        &self,
        state: &Self::State,
        event_name: &str,
        handler: HandlerRef,
    ) -> Result<Self::State>;

    /// Accept a batch of events atomically, returning the accepted events
    ///
    /// Inside an open scope the events are buffered until commit.
    async fn publish(&self, state: &Self::State, events: Vec<Event>) -> Result<Vec<Event>>;

    /// Wait for one event named `event_name`
    async fn pull(&self, state: &Self::State, event_name: &str) -> Result<Event>;

    /// Open a cancellable stream of future events named `event_name`
    async fn observe(&self, state: &Self::State, event_name: &str) -> Result<Observation>;

    /// Open a transaction scope
    async fn tx(&self, state: &Self::State) -> Result<Self::State>;

    /// Close the innermost scope, making its events visible
    async fn commit(&self, state: &Self::State) -> Result<Self::State>;

    /// Close the innermost scope, discarding its events
    async fn rollback(&self, state: &Self::State) -> Result<Self::State>;

    /// Behavior name (e.g., "memory")
    fn name(&self) -> &str;

    /// Get behavior status information
    async fn info(&self) -> Result<BehaviorInfo>;

    /// Health check — returns true if the behavior is operational
    ///
    /// Default implementation delegates to `info()` and returns true if it succeeds.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Behavior status information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviorInfo {
    /// Behavior name
    pub behavior: String,
    /// Total events delivered (committed or published outside a scope)
    pub published: u64,
    /// Number of handler registrations
    pub subscriptions: usize,
    /// Number of live observe streams
    pub observers: usize,
    /// Number of open transaction scopes across sessions
    pub open_scopes: usize,
    /// Events retained for `pull`
    pub backlog: usize,
    /// Pending `pull` calls
    pub waiting: usize,
}
