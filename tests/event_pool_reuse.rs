//! Event pool recycling behaviour

use branchflow::{EngineConfig, EventKind, Runtime};

#[test]
fn released_events_are_handed_out_again_unsignalled() {
    let runtime = Runtime::new(&EngineConfig {
        worker_capacity: 2,
        auto_event_capacity: 2,
        manual_event_capacity: 2,
    });
    let events = runtime.events();

    let first = events.acquire(EventKind::Auto);
    let second = events.acquire(EventKind::Auto);
    let original = [
        &*first as *const _ as usize,
        &*second as *const _ as usize,
    ];

    first.signal();
    second.signal();
    drop(first);
    drop(second);

    let third = events.acquire(EventKind::Auto);
    let fourth = events.acquire(EventKind::Auto);
    let recycled = [
        &*third as *const _ as usize,
        &*fourth as *const _ as usize,
    ];

    // Same two objects come back, reset on the way out.
    for address in recycled {
        assert!(original.contains(&address));
    }
    assert_ne!(recycled[0], recycled[1]);
    assert!(!third.is_signaled());
    assert!(!fourth.is_signaled());
}

#[test]
fn signal_then_reset_restores_the_unsignalled_state() {
    let runtime = Runtime::new(&EngineConfig::default());
    let event = runtime.events().acquire(EventKind::Manual);
    event.signal();
    event.reset();
    assert!(!event.is_signaled());
}

#[test]
fn kinds_are_pooled_separately() {
    let runtime = Runtime::new(&EngineConfig::default());
    let events = runtime.events();
    let manual = events.acquire(EventKind::Manual);
    drop(manual);
    let auto = events.acquire(EventKind::Auto);
    assert_eq!(auto.kind(), EventKind::Auto);
}
