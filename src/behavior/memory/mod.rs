//! In-memory behavior
//!
//! Reference backend for tests and single-process use. Handlers and
//! observers receive every event (broadcast); `pull` is a competing queue.
//! Transaction scopes belong to a `MemorySession`, the state token carried
//! by each bus value.

mod config;
mod queue;
mod registry;
mod scope;

pub use config::{Backpressure, MemoryConfig};

use self::queue::{PullQueues, Pulled, Routed};
use self::registry::{ObserverSlot, Registry};
use self::scope::{Committed, Scopes};
use crate::behavior::{Behavior, BehaviorInfo};
use crate::bus::EventBus;
use crate::dlq::{DeadLetterEvent, DlqHandler};
use crate::error::{EventError, Result};
use crate::handler::{invoke, HandlerRef};
use crate::observe::{Observation, StopHandle};
use crate::types::{Event, HandlerFailure};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

/// State token for `MemoryBehavior`: a session owning its own scope stack
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemorySession {
    id: String,
}

impl MemorySession {
    /// Session identifier (ses-<uuid>)
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

struct Inner {
    registry: Registry,
    scopes: Scopes,
    queues: PullQueues,
    history: VecDeque<Event>,
    published: u64,
    next_observer_id: u64,
    closed: bool,
}

impl Inner {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EventError::Closed("memory behavior is shut down".to_string()));
        }
        Ok(())
    }

    fn ensure_session(&self, session: &MemorySession) -> Result<()> {
        self.ensure_open()?;
        if !self.scopes.contains(&session.id) {
            return Err(EventError::UnknownSession(session.id.clone()));
        }
        Ok(())
    }

    fn record(&mut self, event: &Event, capacity: usize) {
        self.published += 1;
        if capacity == 0 {
            return;
        }
        self.history.push_back(event.clone());
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }
}

/// One event with the receivers snapshotted at delivery time
struct Delivery {
    event: Event,
    handlers: Vec<HandlerRef>,
    observers: Vec<ObserverSlot>,
}

/// A registered pull waiter; unregisters itself when the pull ends
/// (received, timed out, or dropped)
struct PendingPull<'a> {
    inner: &'a Mutex<Inner>,
    event_name: &'a str,
    capacity: usize,
    receiver: oneshot::Receiver<Event>,
}

impl Drop for PendingPull<'_> {
    fn drop(&mut self) {
        self.receiver.close();
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        // Handed over after the puller stopped waiting: route it again
        if let Ok(event) = self.receiver.try_recv() {
            if !inner.closed {
                inner.queues.route(event, self.capacity);
            }
        }
        inner.queues.prune(self.event_name);
    }
}

/// In-memory event bus behavior
pub struct MemoryBehavior {
    config: MemoryConfig,
    inner: Arc<Mutex<Inner>>,
    dlq: Option<Arc<dyn DlqHandler>>,
}

impl MemoryBehavior {
    /// Create a behavior from a validated configuration
    pub fn new(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: MemoryConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                registry: Registry::default(),
                scopes: Scopes::default(),
                queues: PullQueues::default(),
                history: VecDeque::new(),
                published: 0,
                next_observer_id: 0,
                closed: false,
            })),
            dlq: None,
        }
    }

    /// Route handler failures to a dead letter queue
    pub fn with_dlq(mut self, dlq: Arc<dyn DlqHandler>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Start a new session with an empty scope stack
    pub fn open_session(&self) -> Result<MemorySession> {
        let session = MemorySession {
            id: format!("ses-{}", uuid::Uuid::new_v4()),
        };
        let mut inner = self.lock()?;
        inner.ensure_open()?;
        inner.scopes.open_session(&session.id);
        tracing::debug!(session = %session, "Session opened");
        Ok(session)
    }

    /// Forget a session, discarding any open scopes
    pub fn close_session(&self, session: &MemorySession) -> Result<()> {
        let discarded = self
            .lock()?
            .scopes
            .close_session(&session.id)
            .ok_or_else(|| EventError::UnknownSession(session.id.clone()))?;

        if discarded > 0 {
            tracing::warn!(
                session = %session,
                discarded,
                "Session closed with uncommitted events"
            );
        } else {
            tracing::debug!(session = %session, "Session closed");
        }
        Ok(())
    }

    /// Number of open scopes for a session
    pub fn scope_depth(&self, session: &MemorySession) -> Result<usize> {
        self.lock()?.scopes.depth(&session.id)
    }

    /// Most recent delivered events, optionally filtered by name, in publish order
    pub fn history(&self, event_name: Option<&str>, limit: usize) -> Result<Vec<Event>> {
        let inner = self.lock()?;
        let matching: Vec<&Event> = inner
            .history
            .iter()
            .filter(|e| event_name.map_or(true, |name| e.name == name))
            .collect();
        let start = matching.len().saturating_sub(limit);
        Ok(matching[start..].iter().map(|e| (*e).clone()).collect())
    }

    /// Close every observe stream and pending pull; later operations fail
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        let observers = inner.registry.close_observers();
        inner.queues.close();
        inner.scopes.clear();

        tracing::info!(observers, "Memory behavior shut down");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| EventError::Behavior(format!("Failed to acquire state lock: {}", e)))
    }

    fn validate_batch(&self, events: &[Event]) -> Result<()> {
        if self.config.max_batch_size > 0 && events.len() > self.config.max_batch_size {
            return Err(EventError::PublishRejected {
                reason: format!(
                    "batch of {} events exceeds maxBatchSize {}",
                    events.len(),
                    self.config.max_batch_size
                ),
            });
        }
        if let Some(pos) = events.iter().position(|e| e.name.trim().is_empty()) {
            return Err(EventError::PublishRejected {
                reason: format!("event at position {} has an empty name", pos),
            });
        }
        Ok(())
    }

    /// Deliver events in order: pull queue, observers, then handlers
    async fn deliver(&self, events: Vec<Event>) -> Result<()> {
        let deliveries = {
            let mut inner = self.lock()?;
            inner.ensure_open()?;

            let mut deliveries = Vec::with_capacity(events.len());
            for event in events {
                match inner.queues.route(event.clone(), self.config.pull_backlog) {
                    Routed::QueuedDroppedOldest => tracing::warn!(
                        event_name = %event.name,
                        capacity = self.config.pull_backlog,
                        "Pull backlog full, dropped oldest event"
                    ),
                    routed => tracing::debug!(event_name = %event.name, ?routed, "Pull routing"),
                }
                inner.record(&event, self.config.history_capacity);
                deliveries.push(Delivery {
                    handlers: inner.registry.handlers(&event.name),
                    observers: inner.registry.live_observers(&event.name),
                    event,
                });
            }
            deliveries
        };

        let mut failures = Vec::new();
        for delivery in deliveries {
            for slot in &delivery.observers {
                self.feed(slot, &delivery.event).await;
            }

            for (position, handler) in delivery.handlers.iter().enumerate() {
                if let Err(reason) = invoke(handler, &delivery.event).await {
                    tracing::warn!(
                        event_id = %delivery.event.id,
                        event_name = %delivery.event.name,
                        handler = position,
                        reason = %reason,
                        "Handler failed"
                    );
                    let failure = HandlerFailure {
                        event_id: delivery.event.id.clone(),
                        event_name: delivery.event.name.clone(),
                        handler_position: position,
                        reason,
                    };
                    self.dead_letter(&delivery.event, &failure).await;
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(EventError::HandlerFailures(failures))
        }
    }

    async fn feed(&self, slot: &ObserverSlot, event: &Event) {
        if slot.stop.is_stopped() {
            return;
        }
        match self.config.backpressure {
            Backpressure::DropNewest => match slot.sender.try_send(event.clone()) {
                Ok(()) | Err(TrySendError::Closed(_)) => {}
                Err(TrySendError::Full(_)) => tracing::warn!(
                    observer = slot.id,
                    event_name = %event.name,
                    "Observer buffer full, dropping event"
                ),
            },
            Backpressure::Block => {
                tokio::select! {
                    _ = slot.sender.send(event.clone()) => {}
                    _ = slot.stop.stopped() => {}
                }
            }
        }
    }

    async fn dead_letter(&self, event: &Event, failure: &HandlerFailure) {
        let Some(dlq) = &self.dlq else {
            return;
        };
        if let Err(e) = dlq
            .handle(DeadLetterEvent::from_failure(event.clone(), failure))
            .await
        {
            tracing::warn!(
                event_id = %event.id,
                error = %e,
                "Failed to dead-letter handler failure"
            );
        }
    }
}

impl Default for MemoryBehavior {
    fn default() -> Self {
        Self::build(MemoryConfig::default())
    }
}

fn check_name(event_name: &str) -> Result<()> {
    if event_name.trim().is_empty() {
        return Err(EventError::Registration {
            event_name: event_name.to_string(),
            reason: "event name must not be empty".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Behavior for MemoryBehavior {
    type State = MemorySession;

    async fn subscribe(
        &self,
        state: &MemorySession,
        event_name: &str,
        handler: HandlerRef,
    ) -> Result<MemorySession> {
        check_name(event_name)?;
        let mut inner = self.lock()?;
        inner.ensure_session(state)?;
        inner.registry.add_handler(event_name, handler);

        tracing::info!(
            session = %state,
            event_name,
            handlers = inner.registry.handlers(event_name).len(),
            "Handler subscribed"
        );
        Ok(state.clone())
    }

    async fn unsubscribe(
        &self,
        state: &MemorySession,
        event_name: &str,
        handler: HandlerRef,
    ) -> Result<MemorySession> {
        check_name(event_name)?;
        let mut inner = self.lock()?;
        inner.ensure_session(state)?;

        if inner.registry.remove_handler(event_name, &handler) {
            tracing::info!(session = %state, event_name, "Handler unsubscribed");
        } else {
            tracing::debug!(event_name, "Unsubscribe with no matching registration");
        }
        Ok(state.clone())
    }

    async fn publish(&self, state: &MemorySession, events: Vec<Event>) -> Result<Vec<Event>> {
        self.validate_batch(&events)?;
        if events.is_empty() {
            return Ok(events);
        }

        let accepted = events.clone();
        let immediate = {
            let mut inner = self.lock()?;
            inner.ensure_session(state)?;
            inner.scopes.buffer(&state.id, events)?
        };

        match immediate {
            Some(events) => {
                tracing::debug!(session = %state, count = events.len(), "Publishing events");
                self.deliver(events).await?;
            }
            None => {
                tracing::debug!(session = %state, count = accepted.len(), "Events buffered in scope");
            }
        }
        Ok(accepted)
    }

    async fn pull(&self, state: &MemorySession, event_name: &str) -> Result<Event> {
        check_name(event_name)?;
        let pulled = {
            let mut inner = self.lock()?;
            inner.ensure_session(state)?;
            inner.queues.take_or_wait(event_name)
        };

        let receiver = match pulled {
            Pulled::Ready(event) => return Ok(event),
            Pulled::Waiting(receiver) => receiver,
        };
        let mut pending = PendingPull {
            inner: &self.inner,
            event_name,
            capacity: self.config.pull_backlog,
            receiver,
        };

        let received = match self.config.pull_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, &mut pending.receiver)
                .await
                .map_err(|_| {
                    EventError::Timeout(format!(
                        "pull '{}' after {}ms",
                        event_name,
                        timeout.as_millis()
                    ))
                })?,
            None => (&mut pending.receiver).await,
        };

        received.map_err(|_| EventError::Closed(format!("pull '{}' interrupted", event_name)))
    }

    async fn observe(&self, state: &MemorySession, event_name: &str) -> Result<Observation> {
        check_name(event_name)?;
        let (sender, receiver) = mpsc::channel(self.config.observe_buffer);

        let stop = {
            let mut inner = self.lock()?;
            inner.ensure_session(state)?;
            let id = inner.next_observer_id;
            inner.next_observer_id += 1;

            let weak = Arc::downgrade(&self.inner);
            let name = event_name.to_string();
            let stop = StopHandle::with_hook(move || {
                if let Some(inner) = weak.upgrade() {
                    if let Ok(mut inner) = inner.lock() {
                        inner.registry.remove_observer(&name, id);
                    }
                }
                tracing::debug!(observer = id, event_name = %name, "Observer stopped");
            });

            inner.registry.add_observer(
                event_name,
                ObserverSlot {
                    id,
                    sender,
                    stop: stop.clone(),
                },
            );
            tracing::debug!(session = %state, observer = id, event_name, "Observer registered");
            stop
        };

        Ok(Observation::new(event_name, receiver, stop))
    }

    async fn tx(&self, state: &MemorySession) -> Result<MemorySession> {
        let mut inner = self.lock()?;
        inner.ensure_session(state)?;
        let depth = inner
            .scopes
            .begin(&state.id, self.config.nested_transactions)?;

        tracing::info!(session = %state, depth, "Transaction scope opened");
        Ok(state.clone())
    }

    async fn commit(&self, state: &MemorySession) -> Result<MemorySession> {
        let committed = {
            let mut inner = self.lock()?;
            inner.ensure_session(state)?;
            inner.scopes.commit(&state.id)?
        };

        match committed {
            Committed::Deliver(events) => {
                tracing::info!(session = %state, count = events.len(), "Transaction committed");
                self.deliver(events).await?;
            }
            Committed::Merged(count) => {
                tracing::info!(session = %state, count, "Nested scope merged into parent");
            }
        }
        Ok(state.clone())
    }

    async fn rollback(&self, state: &MemorySession) -> Result<MemorySession> {
        let discarded = {
            let mut inner = self.lock()?;
            inner.ensure_session(state)?;
            inner.scopes.rollback(&state.id)?
        };

        tracing::info!(session = %state, discarded, "Transaction rolled back");
        Ok(state.clone())
    }

    fn name(&self) -> &str {
        "memory"
    }

    async fn info(&self) -> Result<BehaviorInfo> {
        let inner = self.lock()?;
        Ok(BehaviorInfo {
            behavior: "memory".to_string(),
            published: inner.published,
            subscriptions: inner.registry.handler_count(),
            observers: inner.registry.observer_count(),
            open_scopes: inner.scopes.open_scopes(),
            backlog: inner.queues.backlog_len(),
            waiting: inner.queues.waiting_len(),
        })
    }

    async fn health(&self) -> Result<bool> {
        Ok(!self.lock()?.closed)
    }
}

impl EventBus<MemoryBehavior> {
    /// Build a bus over a fresh `MemoryBehavior` with one session
    pub fn in_memory(config: MemoryConfig) -> Result<Self> {
        let behavior = Arc::new(MemoryBehavior::new(config)?);
        let session = behavior.open_session()?;
        Ok(EventBus::new(session, behavior))
    }

    /// A bus on the same behavior with its own session and scopes
    ///
    /// The session lives until `close()`; dropping the bus does not end it.
    pub fn fork(&self) -> Result<Self> {
        let session = self.behavior().open_session()?;
        Ok(EventBus::new(session, self.behavior().clone()))
    }

    /// End this bus's session, discarding any uncommitted scopes
    ///
    /// Other buses carrying the same session fail with `UnknownSession` afterwards.
    pub fn close(self) -> Result<()> {
        self.behavior().close_session(self.state())
    }

    /// Number of open scopes for this bus's session
    pub fn scope_depth(&self) -> Result<usize> {
        self.behavior().scope_depth(self.state())
    }
}
