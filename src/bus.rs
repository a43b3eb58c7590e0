//! Event bus façade over a pluggable behavior
//!
//! `EventBus` pairs a behavior's opaque state token with the behavior
//! itself. Every operation delegates to the behavior and returns a new
//! bus value carrying the (possibly updated) state; the façade holds no
//! locks and never inspects the state.

use crate::behavior::{Behavior, BehaviorInfo};
use crate::error::Result;
use crate::handler::HandlerRef;
use crate::observe::Observation;
use crate::types::Event;
use std::sync::Arc;

/// Immutable handle pairing backend state with a behavior
pub struct EventBus<B: Behavior> {
    state: B::State,
    behavior: Arc<B>,
}

impl<B: Behavior> Clone for EventBus<B> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            behavior: self.behavior.clone(),
        }
    }
}

impl<B: Behavior> std::fmt::Debug for EventBus<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("behavior", &self.behavior.name())
            .finish_non_exhaustive()
    }
}

impl<B: Behavior> EventBus<B> {
    /// Bind a behavior to its initial state
    pub fn new(state: B::State, behavior: Arc<B>) -> Self {
        Self { state, behavior }
    }

    /// The opaque state token
    pub fn state(&self) -> &B::State {
        &self.state
    }

    /// The underlying behavior
    pub fn behavior(&self) -> &Arc<B> {
        &self.behavior
    }

    /// Get the behavior name
    pub fn behavior_name(&self) -> &str {
        self.behavior.name()
    }

    fn with_state(&self, state: B::State) -> Self {
        Self {
            state,
            behavior: self.behavior.clone(),
        }
    }

    /// Register `handler` for future events named `event_name`
    pub async fn subscribe(&self, event_name: &str, handler: HandlerRef) -> Result<Self> {
        let state = self
            .behavior
            .subscribe(&self.state, event_name, handler)
            .await?;
        Ok(self.with_state(state))
    }

    /// Remove one registration of `handler`; a missing one is not an error
    pub async fn unsubscribe(&self, event_name: &str, handler: HandlerRef) -> Result<Self> {
        let state = self
            .behavior
            .unsubscribe(&self.state, event_name, handler)
            .await?;
        Ok(self.with_state(state))
    }

    /// Publish a batch of events atomically
    ///
    /// Inside an open scope the events are buffered until `commit`.
    pub async fn publish(&self, events: Vec<Event>) -> Result<Self> {
        self.behavior.publish(&self.state, events).await?;
        Ok(self.clone())
    }

    /// Wait for one event named `event_name`
    pub async fn pull(&self, event_name: &str) -> Result<Event> {
        self.behavior.pull(&self.state, event_name).await
    }

    /// Open a cancellable stream of future events named `event_name`
    pub async fn observe(&self, event_name: &str) -> Result<Observation> {
        self.behavior.observe(&self.state, event_name).await
    }

    /// Open a transaction scope
    pub async fn tx(&self) -> Result<Self> {
        let state = self.behavior.tx(&self.state).await?;
        Ok(self.with_state(state))
    }

    /// Commit the innermost scope
    pub async fn commit(&self) -> Result<Self> {
        let state = self.behavior.commit(&self.state).await?;
        Ok(self.with_state(state))
    }

    /// Roll back the innermost scope
    pub async fn rollback(&self) -> Result<Self> {
        let state = self.behavior.rollback(&self.state).await?;
        Ok(self.with_state(state))
    }

    /// Get behavior info
    pub async fn info(&self) -> Result<BehaviorInfo> {
        self.behavior.info().await
    }

    /// Health check
    pub async fn health(&self) -> Result<bool> {
        self.behavior.health().await
    }
}
