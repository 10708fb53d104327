//! Worker threads

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::trace;

use super::thread_pool::PoolInner;
use super::work::{panic_message, Assignment, JobError};
use crate::error::{EngineError, EngineResult};
use crate::sync::EventKind;

/// One pool worker: an OS thread parked on a ready event.
///
/// A worker without an assignment waits; handing it an assignment and
/// signalling the ready event wakes it. After running the item it returns
/// itself to the owning pool and parks again. A closed worker with no
/// pending assignment exits its thread.
pub(crate) struct Worker {
    ready: crate::sync::PooledEvent,
    slot: Mutex<Option<Assignment>>,
    closed: AtomicBool,
    id: usize,
}

impl Worker {
    /// Spawns a new worker thread registered with `pool`.
    pub(crate) fn spawn(pool: Arc<PoolInner>) -> EngineResult<Arc<Worker>> {
        let id = pool.next_worker_id();
        let worker = Arc::new(Worker {
            ready: pool.events().acquire(EventKind::Auto),
            slot: Mutex::new(None),
            closed: AtomicBool::new(false),
            id,
        });
        pool.worker_spawned();

        let thread_worker = Arc::clone(&worker);
        let thread_pool = Arc::clone(&pool);
        let result = thread::Builder::new()
            .name(format!("branchflow-worker-{id}"))
            .spawn(move || thread_worker.run(thread_pool));
        match result {
            Ok(_) => {
                trace!(worker = id, "worker thread spawned");
                Ok(worker)
            }
            Err(source) => {
                pool.worker_exited();
                Err(EngineError::System(format!(
                    "failed to spawn worker thread: {source}"
                )))
            }
        }
    }

    /// Hands the worker an assignment and wakes it.
    pub(crate) fn assign(&self, assignment: Assignment) {
        *self.slot.lock() = Some(assignment);
        self.ready.signal();
    }

    /// Marks the worker for shutdown and wakes it so the loop can exit.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.signal();
    }

    fn run(self: Arc<Self>, pool: Arc<PoolInner>) {
        loop {
            self.ready.wait();

            let assignment = self.slot.lock().take();
            let Some(assignment) = assignment else {
                if self.closed.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            };

            if assignment.captures_panics {
                // The payload stores its own panic into the result slot.
                (assignment.run)();
            } else if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(assignment.run)) {
                let error = JobError::Panicked(panic_message(payload.as_ref()));
                match pool.fallback() {
                    Some(handler) => handler(&error),
                    None => {
                        // No result slot and no handler: the panic costs this
                        // worker its thread.
                        pool.worker_exited();
                        panic::resume_unwind(payload);
                    }
                }
            }

            pool.reclaim(Arc::clone(&self));
        }

        trace!(worker = self.id, "worker thread retired");
        pool.worker_exited();
    }
}
