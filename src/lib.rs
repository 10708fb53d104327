//! Multi-branched concurrent workflow engine
//!
//! This crate provides a workflow engine whose graphs are built from barrier
//! steps joined by *branch groups* — teams of N worker threads that execute an
//! inner sub-flow in parallel — and *branch-group transitions*, handoffs that
//! move a live team from one group to a compatible one without respawning
//! threads. Workflows are driven by a growable pool of OS worker threads and
//! are externally controllable: start, pause, resume, stop.
//!
//! The engine stands on a small set of primitives that are also exported for
//! direct use:
//! - [`sync::AtomicStack`]: a lock-free, ABA-defended LIFO stack
//! - [`sync::Event`] / [`sync::EventPool`]: auto- and manual-reset events with
//!   a bounded object pool
//! - [`sync::TeamBarrier`]: a reusable multi-party rendezvous
//! - [`pool::ThreadPool`]: a worker pool with result slots and panic capture
//! - [`data::DataStorage`]: hierarchical, reference-counted data scopes
//!   (global → workflow → branch group → branch)
//!
//! Cancellation is cooperative: every branch observes the workflow state at
//! each step boundary and at barrier entry, so `pause` and `stop` take effect
//! at the next boundary rather than preempting running steps.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod config;
pub mod data;
pub mod error;
pub mod flow;
pub mod pool;
pub mod runtime;
pub mod sync;

pub use config::EngineConfig;
pub use data::{DataBinder, DataCache, DataRef, DataStorage, ScopeLevel};
pub use error::{EngineError, EngineResult};
pub use flow::{
    Branch, BranchFilter, BranchFilterInfo, BranchGroup, ConnId, DecisionAction, ParallelPairs,
    ParallelRange, StepAction, StepId, Workflow, WorkflowState,
};
pub use pool::{FallbackHandler, JobError, JobHandle, ThreadPool};
pub use runtime::{finalize, global, initialize, CpuInfo, Runtime};
pub use sync::{AtomicStack, BarrierGuard, Event, EventKind, EventPool, PooledEvent, TeamBarrier};
