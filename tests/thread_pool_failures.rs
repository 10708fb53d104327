//! Failure routing through the thread pool

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use branchflow::{Branch, EngineConfig, JobError, Runtime, Workflow};
use parking_lot::Mutex;

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn detached_panics_reach_the_fallback_handler() {
    let runtime = Runtime::new(&EngineConfig::default());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    runtime
        .thread_pool()
        .set_fallback_handler(Some(Arc::new(move |error: &JobError| {
            sink.lock().push(error.to_string());
        })));

    runtime
        .thread_pool()
        .execute_detached(|| panic!("detached failure"))
        .unwrap();

    assert!(wait_until(Duration::from_secs(2), || !seen.lock().is_empty()));
    assert!(seen.lock()[0].contains("detached failure"));
}

#[test]
fn result_slots_capture_panics_without_involving_the_handler() {
    let runtime = Runtime::new(&EngineConfig::default());
    let handler_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&handler_hits);
    runtime
        .thread_pool()
        .set_fallback_handler(Some(Arc::new(move |_error: &JobError| {
            hits.fetch_add(1, Ordering::SeqCst);
        })));

    let handle = runtime
        .thread_pool()
        .execute(|| -> u32 { panic!("slotted failure") })
        .unwrap();
    let error = handle.into_result().unwrap_err();
    assert!(matches!(error, JobError::Panicked(message) if message.contains("slotted failure")));
    assert_eq!(handler_hits.load(Ordering::SeqCst), 0);
}

#[test]
fn a_panicking_step_does_not_abort_the_workflow() {
    let runtime = Runtime::new(&EngineConfig::default());
    let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&failures);
    runtime
        .thread_pool()
        .set_fallback_handler(Some(Arc::new(move |error: &JobError| {
            sink.lock().push(error.to_string());
        })));

    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 4).unwrap();

    let survivors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&survivors);
    let flaky = workflow
        .add_work_step(group, |branch: &mut Branch| {
            if branch.branch_id() == 0 {
                panic!("branch zero gives up");
            }
        })
        .unwrap();
    let tally = workflow
        .add_work_step(group, move |_branch: &mut Branch| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    workflow.connect_flow(flaky, tally, 0).unwrap();
    workflow.set_first_step(group, flaky).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    // The panicking branch aborted its flow; the other three finished it.
    assert_eq!(survivors.load(Ordering::SeqCst), 3);
    assert_eq!(failures.lock().len(), 1);
}
