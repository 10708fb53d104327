//! Work items and result slots

use std::any::Any;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::sync::PooledEvent;

/// Failure captured from a work item
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// The work item panicked; carries the rendered panic payload
    #[error("work item panicked: {0}")]
    Panicked(String),
}

/// Renders a panic payload into a displayable message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("opaque panic payload")
    }
}

/// Type-erased payload a worker executes. Result-carrying payloads capture
/// their own panics; detached payloads leave that to the worker loop.
pub(crate) struct Assignment {
    pub(crate) run: Box<dyn FnOnce() + Send + 'static>,
    pub(crate) captures_panics: bool,
}

pub(crate) struct JobSlot<T> {
    outcome: Mutex<Option<Result<T, JobError>>>,
    done: PooledEvent,
}

impl<T> JobSlot<T> {
    pub(crate) fn new(done: PooledEvent) -> Self {
        Self {
            outcome: Mutex::new(None),
            done,
        }
    }

    pub(crate) fn fulfill(&self, value: T) {
        *self.outcome.lock() = Some(Ok(value));
        self.done.signal();
    }

    pub(crate) fn fail(&self, error: JobError) {
        *self.outcome.lock() = Some(Err(error));
        self.done.signal();
    }
}

/// Handle to a work item's result slot.
///
/// The slot starts out pending; completion (ready or failed) signals a latch
/// so any thread holding the handle may block on [`wait`](JobHandle::wait).
pub struct JobHandle<T> {
    slot: Arc<JobSlot<T>>,
}

impl<T> JobHandle<T> {
    pub(crate) fn new(slot: Arc<JobSlot<T>>) -> Self {
        Self { slot }
    }

    /// Blocks until the work item has completed or failed.
    pub fn wait(&self) {
        self.slot.done.wait();
    }

    /// True once a result or error has been stored.
    pub fn is_finished(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    /// Waits for completion and takes the stored result.
    pub fn into_result(self) -> Result<T, JobError> {
        self.slot.done.wait();
        match self.slot.outcome.lock().take() {
            Some(outcome) => outcome,
            // The latch only fires after an outcome is stored, and the handle
            // is consumed here, so the slot cannot be empty.
            None => unreachable!("result slot signalled without an outcome"),
        }
    }
}
