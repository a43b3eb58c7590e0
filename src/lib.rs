//! # a3s-eda
//!
//! Backend-agnostic transactional event bus for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-eda` defines one contract for subscribing to, publishing, pulling,
//! and observing named events, with explicit `tx`/`commit`/`rollback`
//! scopes. Backends implement the [`Behavior`] trait; the [`EventBus`]
//! façade threads the backend's state token through every call and
//! returns a new bus value each time.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_eda::{handler_fn, Event, EventBus, MemoryConfig};
//!
//! # async fn example() -> a3s_eda::Result<()> {
//! let bus = EventBus::in_memory(MemoryConfig::default())?;
//!
//! let bus = bus
//!     .subscribe(
//!         "order.created",
//!         handler_fn(|event| async move {
//!             println!("order created: {}", event.payload);
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//! // Buffered until commit
//! let bus = bus.tx().await?;
//! let bus = bus
//!     .publish(vec![Event::new("order.created", serde_json::json!({"id": 1}))])
//!     .await?;
//! let _bus = bus.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Behaviors
//!
//! - **memory** — in-process reference behavior: broadcast delivery to
//!   handlers and observers, competing `pull`, per-session scopes
//!
//! ## Architecture
//!
//! - **Behavior** trait — the contract every backend implements
//! - **EventBus** — immutable façade over a behavior and its state
//! - **Observation** — cancellable stream with a `StopHandle`
//! - **Event** — named envelope with an opaque JSON payload

pub mod behavior;
pub mod bus;
pub mod dlq;
pub mod error;
pub mod handler;
pub mod observe;
pub mod types;

// Re-export core types
pub use behavior::{Behavior, BehaviorInfo};
pub use bus::EventBus;
pub use dlq::{DeadLetterEvent, DlqHandler, MemoryDlqHandler};
pub use error::{EventError, Result};
pub use handler::{handler_fn, same_handler, BoxError, EventHandler, HandlerRef, HandlerResult};
pub use observe::{Observation, ObservedEvent, StopHandle};
pub use types::{Event, HandlerFailure};

// Re-export the memory behavior for convenience
pub use behavior::memory::{Backpressure, MemoryBehavior, MemoryConfig, MemorySession};
