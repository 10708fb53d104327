//! Reusable multi-party barrier
//!
//! The barrier coordinates one *phase* at a time with two manual-reset
//! events. The phase gate is signalled while the barrier is idle and is
//! closed by the last thread to arrive; the release gate is signalled to let
//! a full phase through and is reopened by the last thread to leave. The two
//! gates are what make the barrier reusable: a fast thread coming back for
//! the next phase parks at the phase gate until every slow thread of the
//! previous phase has left. A single counter cannot provide this guarantee.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use super::event::EventKind;
use super::event_pool::{EventPool, PooledEvent};

/// Reusable rendezvous for a team of threads.
///
/// The expected party count is supplied at each phase, so the same barrier
/// can serve phases of different widths (the count must be consistent within
/// one phase).
pub struct TeamBarrier {
    /// Signalled while no phase is in progress.
    phase_gate: PooledEvent,
    /// Signalled to release the threads of the current phase.
    release_gate: PooledEvent,
    remaining: AtomicI32,
    exited: AtomicI32,
}

impl TeamBarrier {
    pub fn new(events: &Arc<EventPool>) -> Self {
        let phase_gate = events.acquire(EventKind::Manual);
        phase_gate.signal();
        let release_gate = events.acquire(EventKind::Manual);
        Self {
            phase_gate,
            release_gate,
            remaining: AtomicI32::new(0),
            exited: AtomicI32::new(0),
        }
    }

    /// Enters the barrier and blocks until `expected` threads have arrived.
    ///
    /// Returns `true` for the last thread to arrive. With
    /// `release_if_last = false` the last thread returns *without blocking*
    /// and without releasing the others; it must call [`release`] once its
    /// exclusive work is done (see [`lock`] for the enforced version). All
    /// callers of one phase must pass the same `release_if_last` value.
    ///
    /// A single-party barrier (`expected <= 1`) is a pass-through.
    ///
    /// [`release`]: TeamBarrier::release
    /// [`lock`]: TeamBarrier::lock
    pub fn enter(&self, release_if_last: bool, expected: usize) -> bool {
        if expected <= 1 {
            return true;
        }
        let expected = expected as i32;

        // Wait for the previous phase to be fully drained.
        self.phase_gate.wait();

        // First thread of the phase installs the count. Overlapping phases
        // would race here, but the phase gate makes them unreachable.
        let _ = self
            .remaining
            .compare_exchange(0, expected, Ordering::AcqRel, Ordering::Acquire);

        let last = self.remaining.fetch_sub(1, Ordering::AcqRel) == 1;
        if last {
            // Close the barrier to new phases until everyone has left.
            self.phase_gate.reset();
            if !release_if_last {
                return true;
            }
            self.release_gate.signal();
        } else {
            self.release_gate.wait();
        }

        self.exit(expected);
        last
    }

    /// Releases a phase that was entered with `release_if_last = false`.
    ///
    /// Must be called exactly once per such phase, by the thread `enter`
    /// returned `true` for.
    pub fn release(&self, expected: usize) {
        if expected > 1 {
            self.release_gate.signal();
            self.exit(expected as i32);
        }
    }

    /// Enters the barrier and returns a guard that performs the release.
    ///
    /// Exactly one thread per phase observes [`BarrierGuard::is_last`] as
    /// `true`; dropping that guard releases the rest of the team. This is the
    /// "one thread runs this block" idiom:
    ///
    /// ```ignore
    /// if barrier.lock(count).is_last() {
    ///     // executed by exactly one thread while the others wait
    /// }
    /// ```
    pub fn lock(&self, expected: usize) -> BarrierGuard<'_> {
        let last = self.enter(false, expected);
        BarrierGuard {
            barrier: self,
            expected,
            last,
        }
    }

    fn exit(&self, expected: i32) {
        if self.exited.fetch_add(1, Ordering::AcqRel) + 1 == expected {
            // Last thread out reopens the barrier for the next phase.
            self.exited.store(0, Ordering::Release);
            self.release_gate.reset();
            self.phase_gate.signal();
        }
    }
}

/// Guard returned by [`TeamBarrier::lock`]; releases the barrier on drop if
/// this thread was the last to enter.
pub struct BarrierGuard<'a> {
    barrier: &'a TeamBarrier,
    expected: usize,
    last: bool,
}

impl BarrierGuard<'_> {
    /// True for the one thread per phase that should run the guarded block.
    pub fn is_last(&self) -> bool {
        self.last
    }
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        if self.last {
            self.barrier.release(self.expected);
        }
    }
}
