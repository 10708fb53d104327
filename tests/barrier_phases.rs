//! Reusable barrier across many phases

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use branchflow::{EngineConfig, Runtime, TeamBarrier};

const THREADS: usize = 4;
const PHASES: usize = 100;

#[test]
fn no_thread_enters_a_phase_before_everyone_arrived() {
    let runtime = Runtime::new(&EngineConfig::default());
    let barrier = Arc::new(TeamBarrier::new(runtime.events()));
    let arrivals = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let arrivals = Arc::clone(&arrivals);
            thread::spawn(move || {
                for phase in 0..PHASES {
                    arrivals.fetch_add(1, Ordering::SeqCst);
                    barrier.enter(true, THREADS);
                    // Passing the barrier means the whole team arrived at
                    // this phase; a premature release would observe fewer.
                    let seen = arrivals.load(Ordering::SeqCst);
                    assert!(
                        seen >= (phase + 1) * THREADS,
                        "phase {phase} released after only {seen} arrivals"
                    );
                }
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().is_ok());
    }
    assert_eq!(arrivals.load(Ordering::SeqCst), THREADS * PHASES);
}

#[test]
fn manual_release_runs_the_critical_section_once_per_phase() {
    let runtime = Runtime::new(&EngineConfig::default());
    let barrier = Arc::new(TeamBarrier::new(runtime.events()));
    let executed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let executed = Arc::clone(&executed);
            thread::spawn(move || {
                for _ in 0..PHASES {
                    let guard = barrier.lock(3);
                    if guard.is_last() {
                        executed.fetch_add(1, Ordering::SeqCst);
                    }
                    drop(guard);
                }
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().is_ok());
    }
    assert_eq!(executed.load(Ordering::SeqCst), PHASES);
}

#[test]
fn single_party_barrier_never_blocks() {
    let runtime = Runtime::new(&EngineConfig::default());
    let barrier = TeamBarrier::new(runtime.events());
    for _ in 0..10 {
        assert!(barrier.enter(true, 1));
    }
}
