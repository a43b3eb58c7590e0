//! Cancellable observe streams
//!
//! A behavior hands each `observe` call its own bounded channel and a
//! `StopHandle`. Stopping runs the behavior's unsubscribe hook once and
//! ends the stream for that consumer, including events already buffered.

use crate::error::{EventError, Result};
use crate::types::Event;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;

type StopHook = Box<dyn FnOnce() + Send>;

struct StopState {
    stopped: watch::Sender<bool>,
    on_stop: Mutex<Option<StopHook>>,
}

/// Cancels one observe stream
///
/// Cheap to clone; every clone controls the same stream. `stop()` is
/// idempotent.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopState>,
}

impl StopHandle {
    /// Create a handle with no unsubscribe hook
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            inner: Arc::new(StopState {
                stopped,
                on_stop: Mutex::new(None),
            }),
        }
    }

    /// Create a handle that runs `hook` the first time it is stopped
    pub fn with_hook(hook: impl FnOnce() + Send + 'static) -> Self {
        let handle = Self::new();
        if let Ok(mut slot) = handle.inner.on_stop.lock() {
            *slot = Some(Box::new(hook));
        }
        handle
    }

    /// Stop the stream; later calls are no-ops
    pub fn stop(&self) {
        if self.inner.stopped.send_replace(true) {
            return;
        }
        let hook = match self.inner.on_stop.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Whether `stop()` has been called
    pub fn is_stopped(&self) -> bool {
        *self.inner.stopped.borrow()
    }

    /// Resolves once the handle is stopped
    pub async fn stopped(&self) {
        let mut rx = self.inner.stopped.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// An event yielded by an observe stream, with the capability to stop it
#[derive(Debug, Clone)]
pub struct ObservedEvent {
    /// The event data
    pub event: Event,

    /// Stops the stream this event came from
    pub stop: StopHandle,
}

impl ObservedEvent {
    /// Stop the stream this event came from
    pub fn stop(&self) {
        self.stop.stop();
    }
}

/// A lazy, infinite sequence of events for one event name
///
/// Ends with `Ok(None)` after `stop()`; yields `StreamTerminated` once
/// when the behavior closes it. Dropping the observation stops it.
pub struct Observation {
    event_name: String,
    receiver: mpsc::Receiver<Event>,
    stop: StopHandle,
    finished: bool,
}

impl Observation {
    /// Build an observation from a behavior-fed channel
    pub fn new(event_name: impl Into<String>, receiver: mpsc::Receiver<Event>, stop: StopHandle) -> Self {
        Self {
            event_name: event_name.into(),
            receiver,
            stop,
            finished: false,
        }
    }

    /// Event name this stream observes
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Handle that stops this stream
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stop this stream
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the next event
    ///
    /// Returns `Ok(None)` once stopped and `Err(StreamTerminated)` once if
    /// the behavior closed the stream.
    pub async fn next(&mut self) -> Result<Option<ObservedEvent>> {
        if self.finished || self.stop.is_stopped() {
            self.finished = true;
            return Ok(None);
        }

        let stop = self.stop.clone();
        tokio::select! {
            biased;
            _ = stop.stopped() => {
                self.finished = true;
                Ok(None)
            }
            received = self.receiver.recv() => match received {
                Some(event) if !self.stop.is_stopped() => Ok(Some(ObservedEvent {
                    event,
                    stop: self.stop.clone(),
                })),
                Some(_) => {
                    self.finished = true;
                    Ok(None)
                }
                None => {
                    self.finished = true;
                    if self.stop.is_stopped() {
                        Ok(None)
                    } else {
                        Err(EventError::StreamTerminated {
                            event_name: self.event_name.clone(),
                        })
                    }
                }
            },
        }
    }

    /// Convert into a `Stream` of results
    pub fn into_stream(self) -> impl Stream<Item = Result<ObservedEvent>> + Send {
        futures::stream::unfold(self, |mut observation| async move {
            match observation.next().await {
                Ok(Some(observed)) => Some((Ok(observed), observation)),
                Ok(None) => None,
                Err(e) => Some((Err(e), observation)),
            }
        })
    }
}

impl Drop for Observation {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn event(n: u64) -> Event {
        Event::new("tick", serde_json::json!({ "n": n }))
    }

    #[test]
    fn test_stop_is_idempotent_and_runs_hook_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let stop = StopHandle::with_hook(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!stop.is_stopped());
        stop.stop();
        stop.stop();
        stop.clone().stop();

        assert!(stop.is_stopped());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_next_yields_buffered_events() {
        let (tx, rx) = mpsc::channel(4);
        let mut observation = Observation::new("tick", rx, StopHandle::new());

        tx.send(event(1)).await.unwrap();
        tx.send(event(2)).await.unwrap();

        let first = observation.next().await.unwrap().unwrap();
        let second = observation.next().await.unwrap().unwrap();
        assert_eq!(first.event.payload["n"], 1);
        assert_eq!(second.event.payload["n"], 2);
    }

    #[tokio::test]
    async fn test_stop_discards_buffered_events() {
        let (tx, rx) = mpsc::channel(4);
        let mut observation = Observation::new("tick", rx, StopHandle::new());

        tx.send(event(1)).await.unwrap();
        let observed = observation.next().await.unwrap().unwrap();

        tx.send(event(2)).await.unwrap();
        observed.stop();

        assert!(observation.next().await.unwrap().is_none());
        assert!(observation.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stop_wakes_pending_next() {
        let (_tx, rx) = mpsc::channel::<Event>(4);
        let mut observation = Observation::new("tick", rx, StopHandle::new());
        let stop = observation.stop_handle();

        let waiter = tokio::spawn(async move { observation.next().await });
        tokio::task::yield_now().await;
        stop.stop();

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_sender_drop_is_stream_terminated() {
        let (tx, rx) = mpsc::channel::<Event>(4);
        let mut observation = Observation::new("tick", rx, StopHandle::new());
        drop(tx);

        let err = observation.next().await.unwrap_err();
        assert!(matches!(err, EventError::StreamTerminated { ref event_name } if event_name == "tick"));
        // Terminated streams end afterwards
        assert!(observation.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_runs_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let (_tx, rx) = mpsc::channel::<Event>(1);
        let observation = Observation::new(
            "tick",
            rx,
            StopHandle::with_hook(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        drop(observation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_stop() {
        let (tx, rx) = mpsc::channel(4);
        let stream = Observation::new("tick", rx, StopHandle::new()).into_stream();
        tokio::pin!(stream);

        tx.send(event(1)).await.unwrap();
        let observed = stream.next().await.unwrap().unwrap();
        observed.stop();
        tx.send(event(2)).await.unwrap();

        assert!(stream.next().await.is_none());
    }
}
