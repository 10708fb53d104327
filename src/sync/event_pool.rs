//! Bounded pool of event objects
//!
//! Events are acquired far more often than they are created: every barrier
//! phase, worker thread and result slot needs one. The pool keeps a bounded
//! lock-free free list per event kind and recycles events through it.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::event::{Event, EventKind, EVENT_KINDS};
use super::stack::AtomicStack;

/// Pool of [`Event`] objects, one bounded free list per [`EventKind`].
pub struct EventPool {
    pools: [AtomicStack<Box<Event>>; EVENT_KINDS],
    capacities: [AtomicUsize; EVENT_KINDS],
}

impl EventPool {
    /// Creates a pool with the given free-list capacities.
    pub fn new(auto_capacity: usize, manual_capacity: usize) -> Self {
        Self {
            pools: [AtomicStack::new(), AtomicStack::new()],
            capacities: [
                AtomicUsize::new(auto_capacity),
                AtomicUsize::new(manual_capacity),
            ],
        }
    }

    /// Takes an event from the pool, allocating a new one when the free list
    /// is empty. The returned event is always unsignalled.
    pub fn acquire(self: &Arc<Self>, kind: EventKind) -> PooledEvent {
        let event = self.pools[kind as usize]
            .pop()
            .unwrap_or_else(|| Box::new(Event::new(kind)));
        event.reset();
        PooledEvent {
            event: ManuallyDrop::new(event),
            pool: Arc::clone(self),
        }
    }

    /// Current free-list capacity for the given kind.
    pub fn capacity(&self, kind: EventKind) -> usize {
        self.capacities[kind as usize].load(Ordering::Relaxed)
    }

    /// Adjusts the free-list capacity for the given kind.
    pub fn set_capacity(&self, kind: EventKind, capacity: usize) {
        self.capacities[kind as usize].store(capacity, Ordering::Relaxed);
    }

    /// Number of events currently parked in the free list.
    pub fn idle(&self, kind: EventKind) -> usize {
        self.pools[kind as usize].len()
    }

    fn release(&self, event: Box<Event>) {
        let index = event.kind() as usize;
        if self.pools[index].len() < self.capacities[index].load(Ordering::Relaxed) {
            self.pools[index].push(event);
        }
        // A full pool simply drops the event.
    }
}

/// Smart handle for a pooled event; returns the event on drop.
pub struct PooledEvent {
    event: ManuallyDrop<Box<Event>>,
    pool: Arc<EventPool>,
}

impl Deref for PooledEvent {
    type Target = Event;

    fn deref(&self) -> &Event {
        &self.event
    }
}

impl Drop for PooledEvent {
    fn drop(&mut self) {
        let event = unsafe { ManuallyDrop::take(&mut self.event) };
        self.pool.release(event);
    }
}
