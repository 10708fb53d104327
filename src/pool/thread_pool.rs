//! Thread pool

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

use super::work::{panic_message, Assignment, JobError, JobHandle, JobSlot};
use super::worker::Worker;
use crate::error::EngineResult;
use crate::sync::{AtomicStack, EventKind, EventPool, PooledEvent};

/// Handler for failures that neither a result slot nor user code caught.
pub type FallbackHandler = Arc<dyn Fn(&JobError) + Send + Sync + 'static>;

/// Pool of worker threads.
///
/// The pool keeps up to `capacity` idle workers on a lock-free stack and
/// grows past it on demand: dispatching with an empty stack spawns a fresh
/// worker, and a worker released into a full stack retires its thread.
/// Dropping the pool closes all workers and waits for their threads to
/// account themselves out.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    idle: AtomicStack<Arc<Worker>>,
    capacity: AtomicUsize,
    live: AtomicUsize,
    next_id: AtomicUsize,
    closing: AtomicBool,
    drained: PooledEvent,
    fallback: RwLock<Option<FallbackHandler>>,
    events: Arc<EventPool>,
}

impl ThreadPool {
    /// Creates a pool that keeps at most `capacity` idle workers.
    pub fn new(capacity: usize, events: Arc<EventPool>) -> Self {
        let drained = events.acquire(EventKind::Manual);
        Self {
            inner: Arc::new(PoolInner {
                idle: AtomicStack::new(),
                capacity: AtomicUsize::new(capacity),
                live: AtomicUsize::new(0),
                next_id: AtomicUsize::new(0),
                closing: AtomicBool::new(false),
                drained,
                fallback: RwLock::new(None),
                events,
            }),
        }
    }

    /// Runs `work` on a pool worker and returns a handle to its result slot.
    ///
    /// A panic inside `work` is captured into the slot as a
    /// [`JobError::Panicked`] and the completion latch is signalled either way.
    pub fn execute<T, F>(&self, work: F) -> EngineResult<JobHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(JobSlot::new(self.inner.events.acquire(EventKind::Manual)));
        let shared = Arc::clone(&slot);
        let run = Box::new(move || {
            match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(value) => shared.fulfill(value),
                Err(payload) => shared.fail(JobError::Panicked(panic_message(payload.as_ref()))),
            }
        });
        self.inner.dispatch(Assignment {
            run,
            captures_panics: true,
        })?;
        Ok(JobHandle::new(slot))
    }

    /// Runs `work` on a pool worker without a result slot.
    ///
    /// A panic inside `work` goes to the fallback handler if one is set;
    /// otherwise it is re-raised and costs the pool that worker.
    pub fn execute_detached<F>(&self, work: F) -> EngineResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.dispatch(Assignment {
            run: Box::new(work),
            captures_panics: false,
        })
    }

    /// Installs (or clears) the handler for otherwise-unreported failures.
    pub fn set_fallback_handler(&self, handler: Option<FallbackHandler>) {
        *self.inner.fallback.write() = handler;
    }

    /// Routes a failure through the fallback handler, or logs it.
    pub(crate) fn report_failure(&self, error: &JobError) {
        match self.inner.fallback() {
            Some(handler) => handler(error),
            None => error!(%error, "unhandled work item failure"),
        }
    }

    /// Maximum number of idle workers kept around.
    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Relaxed)
    }

    /// Adjusts the idle-worker bound.
    pub fn set_capacity(&self, capacity: usize) {
        self.inner.capacity.store(capacity, Ordering::Relaxed);
    }

    /// Number of worker threads currently alive (idle or busy).
    pub fn live_workers(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }

    /// Number of workers currently parked on the idle stack.
    pub fn idle_workers(&self) -> usize {
        self.inner.idle.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        while let Some(worker) = self.inner.idle.pop() {
            worker.close();
        }
        if self.inner.live.load(Ordering::SeqCst) > 0 {
            self.inner.drained.wait();
        }
    }
}

impl PoolInner {
    fn dispatch(self: &Arc<Self>, assignment: Assignment) -> EngineResult<()> {
        let worker = match self.idle.pop() {
            Some(worker) => worker,
            None => Worker::spawn(Arc::clone(self))?,
        };
        worker.assign(assignment);
        Ok(())
    }

    /// Takes a worker back after it finished an assignment.
    pub(crate) fn reclaim(&self, worker: Arc<Worker>) {
        if self.closing.load(Ordering::SeqCst)
            || self.idle.len() >= self.capacity.load(Ordering::Relaxed)
        {
            worker.close();
            return;
        }
        self.idle.push(worker);
        // Shutdown may have begun between the check and the push; make sure
        // a just-parked worker cannot be stranded on the idle stack.
        if self.closing.load(Ordering::SeqCst) {
            if let Some(worker) = self.idle.pop() {
                worker.close();
            }
        }
    }

    pub(crate) fn worker_spawned(&self) {
        self.live.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn worker_exited(&self) {
        if self.live.fetch_sub(1, Ordering::SeqCst) == 1 && self.closing.load(Ordering::SeqCst) {
            self.drained.signal();
        }
    }

    pub(crate) fn next_worker_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn fallback(&self) -> Option<FallbackHandler> {
        self.fallback.read().clone()
    }

    pub(crate) fn events(&self) -> &Arc<EventPool> {
        &self.events
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pool() -> ThreadPool {
        ThreadPool::new(2, Arc::new(EventPool::new(8, 8)))
    }

    #[test]
    fn execute_returns_the_result() {
        let pool = pool();
        let handle = pool.execute(|| 21 * 2).unwrap();
        assert_eq!(handle.into_result().unwrap(), 42);
    }

    #[test]
    fn panic_is_captured_in_the_result_slot() {
        let pool = pool();
        let handle = pool.execute(|| -> i32 { panic!("boom") }).unwrap();
        let error = handle.into_result().unwrap_err();
        assert!(matches!(error, JobError::Panicked(message) if message.contains("boom")));
    }

    #[test]
    fn workers_are_reused_up_to_capacity() {
        let pool = pool();
        for _ in 0..8 {
            pool.execute(|| ()).unwrap().wait();
        }
        assert!(pool.idle_workers() <= pool.capacity());
    }
}
