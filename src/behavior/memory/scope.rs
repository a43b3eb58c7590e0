//! Transaction scopes for the memory behavior
//!
//! Each session owns a stack of scopes. A scope buffers publishes in
//! issuance order until it is committed or rolled back.

use crate::error::{EventError, Result};
use crate::types::Event;
use std::collections::HashMap;

/// Outcome of committing the innermost scope
#[derive(Debug, PartialEq)]
pub(crate) enum Committed {
    /// Outermost scope closed; these events must be delivered now
    Deliver(Vec<Event>),
    /// Inner scope closed; this many events moved into the parent scope
    Merged(usize),
}

#[derive(Default)]
pub(crate) struct Scopes {
    sessions: HashMap<String, Vec<Vec<Event>>>,
}

impl Scopes {
    pub fn open_session(&mut self, session: &str) {
        self.sessions.entry(session.to_string()).or_default();
    }

    /// Forget a session, returning how many buffered events were discarded
    pub fn close_session(&mut self, session: &str) -> Option<usize> {
        self.sessions
            .remove(session)
            .map(|stack| stack.iter().map(Vec::len).sum())
    }

    pub fn contains(&self, session: &str) -> bool {
        self.sessions.contains_key(session)
    }

    pub fn depth(&self, session: &str) -> Result<usize> {
        Ok(self.stack(session)?.len())
    }

    /// Open a scope, returning the new depth
    pub fn begin(&mut self, session: &str, nested: bool) -> Result<usize> {
        let stack = self.stack_mut(session)?;
        if !stack.is_empty() && !nested {
            return Err(EventError::NestedScope);
        }
        stack.push(Vec::new());
        Ok(stack.len())
    }

    /// Append to the innermost scope
    ///
    /// Hands the events back when no scope is open.
    pub fn buffer(&mut self, session: &str, events: Vec<Event>) -> Result<Option<Vec<Event>>> {
        match self.stack_mut(session)?.last_mut() {
            Some(scope) => {
                scope.extend(events);
                Ok(None)
            }
            None => Ok(Some(events)),
        }
    }

    pub fn commit(&mut self, session: &str) -> Result<Committed> {
        let stack = self.stack_mut(session)?;
        let scope = stack.pop().ok_or(EventError::NoOpenScope)?;
        match stack.last_mut() {
            Some(parent) => {
                let merged = scope.len();
                parent.extend(scope);
                Ok(Committed::Merged(merged))
            }
            None => Ok(Committed::Deliver(scope)),
        }
    }

    /// Discard the innermost scope, returning how many events it held
    pub fn rollback(&mut self, session: &str) -> Result<usize> {
        let stack = self.stack_mut(session)?;
        let scope = stack.pop().ok_or(EventError::NoOpenScope)?;
        Ok(scope.len())
    }

    pub fn open_scopes(&self) -> usize {
        self.sessions.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }

    fn stack(&self, session: &str) -> Result<&Vec<Vec<Event>>> {
        self.sessions
            .get(session)
            .ok_or_else(|| EventError::UnknownSession(session.to_string()))
    }

    fn stack_mut(&mut self, session: &str) -> Result<&mut Vec<Vec<Event>>> {
        self.sessions
            .get_mut(session)
            .ok_or_else(|| EventError::UnknownSession(session.to_string()))
    }
}
