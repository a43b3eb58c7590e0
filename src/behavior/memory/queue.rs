//! Pull queues for the memory behavior
//!
//! `pull` competes: each delivered event goes to exactly one waiting
//! puller (oldest first), or into a bounded per-name backlog.

use crate::types::Event;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;

pub(crate) enum Pulled {
    Ready(Event),
    Waiting(oneshot::Receiver<Event>),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Routed {
    /// Handed to a waiting puller
    Handed,
    /// Stored in the backlog
    Queued,
    /// Stored; the oldest backlog entry was dropped to make room
    QueuedDroppedOldest,
    /// Backlog disabled and nobody waiting
    Discarded,
}

#[derive(Default)]
pub(crate) struct PullQueues {
    backlog: HashMap<String, VecDeque<Event>>,
    waiters: HashMap<String, VecDeque<oneshot::Sender<Event>>>,
}

impl PullQueues {
    /// Take the oldest retained event, or register as a waiter
    pub fn take_or_wait(&mut self, event_name: &str) -> Pulled {
        if let Some(backlog) = self.backlog.get_mut(event_name) {
            let event = backlog.pop_front();
            if backlog.is_empty() {
                self.backlog.remove(event_name);
            }
            if let Some(event) = event {
                return Pulled::Ready(event);
            }
        }

        self.prune(event_name);
        let (tx, rx) = oneshot::channel();
        self.waiters
            .entry(event_name.to_string())
            .or_default()
            .push_back(tx);
        Pulled::Waiting(rx)
    }

    pub fn route(&mut self, mut event: Event, capacity: usize) -> Routed {
        if let Some((name, mut waiters)) = self.waiters.remove_entry(&event.name) {
            while let Some(waiter) = waiters.pop_front() {
                match waiter.send(event) {
                    Ok(()) => {
                        if !waiters.is_empty() {
                            self.waiters.insert(name, waiters);
                        }
                        return Routed::Handed;
                    }
                    // Puller gave up (timeout or drop); try the next one
                    Err(returned) => event = returned,
                }
            }
        }

        if capacity == 0 {
            return Routed::Discarded;
        }

        let backlog = self.backlog.entry(event.name.clone()).or_default();
        backlog.push_back(event);
        if backlog.len() > capacity {
            backlog.pop_front();
            Routed::QueuedDroppedOldest
        } else {
            Routed::Queued
        }
    }

    /// Forget waiters whose puller has gone away
    pub fn prune(&mut self, event_name: &str) {
        if let Some(waiters) = self.waiters.get_mut(event_name) {
            waiters.retain(|waiter| !waiter.is_closed());
            if waiters.is_empty() {
                self.waiters.remove(event_name);
            }
        }
    }

    pub fn waiting_len(&self) -> usize {
        self.waiters.values().map(VecDeque::len).sum()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.values().map(VecDeque::len).sum()
    }

    /// Drop all waiters and retained events
    pub fn close(&mut self) {
        self.waiters.clear();
        self.backlog.clear();
    }
}
