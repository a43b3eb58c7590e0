//! Subscription registry for the memory behavior
//!
//! Handlers are kept per event name in registration order. Duplicates are
//! allowed; each registration is delivered to separately.

use crate::handler::{same_handler, HandlerRef};
use crate::observe::StopHandle;
use crate::types::Event;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// A live observe stream's sending side
#[derive(Clone)]
pub(crate) struct ObserverSlot {
    pub id: u64,
    pub sender: mpsc::Sender<Event>,
    pub stop: StopHandle,
}

impl ObserverSlot {
    fn is_live(&self) -> bool {
        !self.stop.is_stopped() && !self.sender.is_closed()
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    handlers: HashMap<String, Vec<HandlerRef>>,
    observers: HashMap<String, Vec<ObserverSlot>>,
}

impl Registry {
    pub fn add_handler(&mut self, event_name: &str, handler: HandlerRef) {
        self.handlers
            .entry(event_name.to_string())
            .or_default()
            .push(handler);
    }

    /// Remove the earliest identical registration
    pub fn remove_handler(&mut self, event_name: &str, handler: &HandlerRef) -> bool {
        let Some(list) = self.handlers.get_mut(event_name) else {
            return false;
        };
        let Some(pos) = list.iter().position(|h| same_handler(h, handler)) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            self.handlers.remove(event_name);
        }
        true
    }

    /// Snapshot of handlers for a name, in registration order
    pub fn handlers(&self, event_name: &str) -> Vec<HandlerRef> {
        self.handlers.get(event_name).cloned().unwrap_or_default()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn add_observer(&mut self, event_name: &str, slot: ObserverSlot) {
        self.observers
            .entry(event_name.to_string())
            .or_default()
            .push(slot);
    }

    pub fn remove_observer(&mut self, event_name: &str, id: u64) -> bool {
        let Some(list) = self.observers.get_mut(event_name) else {
            return false;
        };
        let before = list.len();
        list.retain(|slot| slot.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.observers.remove(event_name);
        }
        removed
    }

    /// Snapshot of live observers for a name, pruning stopped ones
    pub fn live_observers(&mut self, event_name: &str) -> Vec<ObserverSlot> {
        let Some(list) = self.observers.get_mut(event_name) else {
            return Vec::new();
        };
        list.retain(ObserverSlot::is_live);
        let live = list.clone();
        if list.is_empty() {
            self.observers.remove(event_name);
        }
        live
    }

    pub fn observer_count(&self) -> usize {
        self.observers
            .values()
            .flat_map(|list| list.iter())
            .filter(|slot| slot.is_live())
            .count()
    }

    /// Drop every observer sender, returning how many were closed
    pub fn close_observers(&mut self) -> usize {
        let count = self.observers.values().map(Vec::len).sum();
        self.observers.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> HandlerRef {
        handler_fn(|_| async { Ok(()) })
    }

    fn slot(id: u64) -> (ObserverSlot, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(1);
        (
            ObserverSlot {
                id,
                sender,
                stop: StopHandle::new(),
            },
            receiver,
        )
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = Registry::default();
        let (a, b, c) = (noop(), noop(), noop());
        registry.add_handler("order.created", a.clone());
        registry.add_handler("order.created", b.clone());
        registry.add_handler("order.created", c.clone());

        let handlers = registry.handlers("order.created");
        assert_eq!(handlers.len(), 3);
        assert!(same_handler(&handlers[0], &a));
        assert!(same_handler(&handlers[1], &b));
        assert!(same_handler(&handlers[2], &c));
    }

    #[test]
    fn test_resubscribe_moves_to_end() {
        let mut registry = Registry::default();
        let (a, b) = (noop(), noop());
        registry.add_handler("x", a.clone());
        registry.add_handler("x", b.clone());

        assert!(registry.remove_handler("x", &a));
        registry.add_handler("x", a.clone());

        let handlers = registry.handlers("x");
        assert!(same_handler(&handlers[0], &b));
        assert!(same_handler(&handlers[1], &a));
    }

    #[test]
    fn test_duplicates_removed_one_at_a_time() {
        let mut registry = Registry::default();
        let a = noop();
        registry.add_handler("x", a.clone());
        registry.add_handler("x", a.clone());
        assert_eq!(registry.handler_count(), 2);

        assert!(registry.remove_handler("x", &a));
        assert_eq!(registry.handlers("x").len(), 1);
        assert!(registry.remove_handler("x", &a));
        assert!(!registry.remove_handler("x", &a));
        assert_eq!(registry.handler_count(), 0);
    }

    #[test]
    fn test_remove_does_not_touch_other_names_or_handlers() {
        let mut registry = Registry::default();
        let (a, b) = (noop(), noop());
        registry.add_handler("x", a.clone());
        registry.add_handler("y", a.clone());
        registry.add_handler("x", b.clone());

        assert!(!registry.remove_handler("z", &a));
        assert!(registry.remove_handler("x", &a));

        assert_eq!(registry.handlers("y").len(), 1);
        let x = registry.handlers("x");
        assert_eq!(x.len(), 1);
        assert!(same_handler(&x[0], &b));
    }

    #[test]
    fn test_observer_pruning() {
        let mut registry = Registry::default();
        let (s1, _r1) = slot(1);
        let (s2, r2) = slot(2);
        let (s3, _r3) = slot(3);
        s1.stop.stop();
        registry.add_observer("x", s1);
        registry.add_observer("x", s2);
        registry.add_observer("x", s3);
        drop(r2);

        let live = registry.live_observers("x");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, 3);
        assert_eq!(registry.observer_count(), 1);

        assert!(registry.remove_observer("x", 3));
        assert!(!registry.remove_observer("x", 3));
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn test_close_observers() {
        let mut registry = Registry::default();
        let (s1, mut r1) = slot(1);
        registry.add_observer("x", s1);

        assert_eq!(registry.close_observers(), 1);
        assert!(r1.try_recv().is_err());
        assert_eq!(registry.observer_count(), 0);
    }
}
