//! Blocking events with auto- and manual-reset semantics

use parking_lot::{Condvar, Mutex};

/// Reset behaviour of an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum EventKind {
    /// `signal` releases exactly one waiter and returns to unsignalled
    Auto = 0,
    /// `signal` releases all current and future waiters until `reset`
    Manual = 1,
}

/// Number of event kinds; used to size per-kind tables.
pub(crate) const EVENT_KINDS: usize = 2;

/// A blocking event.
///
/// Waiters block until the event is signalled. An auto-reset event consumes
/// the signal when it releases a waiter; a manual-reset event stays signalled
/// until it is explicitly reset.
pub struct Event {
    kind: EventKind,
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Blocks until the event is signalled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        if self.kind == EventKind::Auto {
            *signaled = false;
        }
    }

    /// Signals the event, releasing one waiter (auto) or all waiters (manual).
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        match self.kind {
            EventKind::Auto => {
                self.cond.notify_one();
            }
            EventKind::Manual => {
                self.cond.notify_all();
            }
        }
    }

    /// Returns the event to the unsignalled state.
    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    /// Current signal state, without consuming it.
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn manual_signal_then_reset_restores_unsignalled() {
        let event = Event::new(EventKind::Manual);
        event.signal();
        assert!(event.is_signaled());
        event.reset();
        assert!(!event.is_signaled());
    }

    #[test]
    fn auto_reset_consumes_the_signal() {
        let event = Event::new(EventKind::Auto);
        event.signal();
        event.wait();
        assert!(!event.is_signaled());
    }

    #[test]
    fn manual_event_releases_all_waiters() {
        let event = Arc::new(Event::new(EventKind::Manual));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let event = event.clone();
                thread::spawn(move || event.wait())
            })
            .collect();
        event.signal();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
    }
}
