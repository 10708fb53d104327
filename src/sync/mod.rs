//! Synchronization primitives
//!
//! The building blocks underneath the workflow engine:
//! - [`AtomicStack`]: lock-free intrusive LIFO with a tagged head (ABA-safe)
//! - [`Event`]: auto-/manual-reset blocking event
//! - [`EventPool`]: bounded free lists of pooled events
//! - [`TeamBarrier`]: reusable multi-party rendezvous with a two-gate protocol

mod barrier;
mod event;
mod event_pool;
mod stack;

pub use barrier::{BarrierGuard, TeamBarrier};
pub use event::{Event, EventKind};
pub use event_pool::{EventPool, PooledEvent};
pub use stack::AtomicStack;
