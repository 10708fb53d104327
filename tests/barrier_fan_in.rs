//! Workflow barriers join inbound groups before fanning out

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use branchflow::{Branch, EngineConfig, Runtime, Workflow};

#[test]
fn fan_out_happens_once_and_only_after_every_inbound_group() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let initial = workflow.branch_groups()[0];
    workflow.remove_connection(initial).unwrap();

    // Diamond: the start step fans out into two groups that join at `mid`;
    // a third group runs from `mid` to the finish step.
    let mid = workflow.add_barrier();
    let left = workflow.connect(workflow.start_step(), mid).unwrap();
    let right = workflow.connect(workflow.start_step(), mid).unwrap();
    let tail = workflow.connect(mid, workflow.finish_step()).unwrap();
    workflow.set_branch_count(left, 2).unwrap();
    workflow.set_branch_count(right, 3).unwrap();
    workflow.set_branch_count(tail, 2).unwrap();

    let upstream = Arc::new(AtomicUsize::new(0));
    for (group, delay) in [(left, 1u64), (right, 7u64)] {
        let progress = Arc::clone(&upstream);
        let step = workflow
            .add_work_step(group, move |_branch: &mut Branch| {
                thread::sleep(Duration::from_millis(delay));
                progress.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        workflow.set_first_step(group, step).unwrap();
    }

    let observed = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&observed);
    let executions = Arc::clone(&runs);
    let progress = Arc::clone(&upstream);
    let check = workflow
        .add_work_step(tail, move |_branch: &mut Branch| {
            seen.fetch_max(progress.load(Ordering::SeqCst), Ordering::SeqCst);
            executions.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    workflow.set_first_step(tail, check).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    // The joining barrier released exactly one fan-out, and only after all
    // five upstream branches had finished their work.
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(observed.load(Ordering::SeqCst), 5);
    assert_eq!(upstream.load(Ordering::SeqCst), 5);
}
