//! Event handlers
//!
//! Handlers are registered by identity: two `HandlerRef`s are the same
//! registration only when they point at the same allocation.

use crate::types::Event;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Boxed error returned by handlers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by handlers
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Shared handler reference; cloning keeps the identity
pub type HandlerRef = Arc<dyn EventHandler>;

/// Receives events delivered by a behavior
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one delivered event
    async fn handle(&self, event: &Event) -> HandlerResult;
}

/// Adapter turning an async closure into an `EventHandler`
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.f)(event.clone()).await
    }
}

/// Wrap an async closure as a `HandlerRef`
///
/// ```rust
/// use a3s_eda::handler_fn;
///
/// let handler = handler_fn(|event| async move {
///     println!("got {}", event.name);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerRef
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Identity comparison ignoring vtable metadata
pub fn same_handler(a: &HandlerRef, b: &HandlerRef) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Invoke a handler, converting both errors and panics into a message
pub(crate) async fn invoke(handler: &HandlerRef, event: &Event) -> std::result::Result<(), String> {
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_same_handler_identity() {
        let a = handler_fn(|_| async { Ok(()) });
        let b = handler_fn(|_| async { Ok(()) });
        let a2 = a.clone();

        assert!(same_handler(&a, &a2));
        assert!(!same_handler(&a, &b));
    }

    #[tokio::test]
    async fn test_invoke_ok() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handler = handler_fn(move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let event = Event::new("a", serde_json::json!({}));
        assert!(invoke(&handler, &event).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_error_message() {
        let handler = handler_fn(|_| async { Err("disk full".into()) });
        let event = Event::new("a", serde_json::json!({}));
        assert_eq!(invoke(&handler, &event).await.unwrap_err(), "disk full");
    }

    #[tokio::test]
    async fn test_invoke_catches_panic() {
        let handler = handler_fn(|event| async move {
            if event.name == "a" {
                panic!("kaboom");
            }
            Ok(())
        });
        let event = Event::new("a", serde_json::json!({}));
        let reason = invoke(&handler, &event).await.unwrap_err();
        assert_eq!(reason, "handler panicked: kaboom");
    }
}
