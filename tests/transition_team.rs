//! Branch-group transitions hand the live team over

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use branchflow::{Branch, EngineConfig, Runtime, ScopeLevel, Workflow};
use parking_lot::Mutex;

const THREAD_KEY: i32 = 100;

#[test]
fn the_same_threads_execute_both_groups() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let initial = workflow.branch_groups()[0];
    workflow.remove_connection(initial).unwrap();

    // start -> BG1 -> mid -> BG2 -> finish; BG1 ends at a transition barrier
    // that hands its four branches straight to BG2.
    let mid = workflow.add_barrier();
    let bg1 = workflow.connect(workflow.start_step(), mid).unwrap();
    let bg2 = workflow.connect(mid, workflow.finish_step()).unwrap();
    workflow.set_branch_count(bg1, 4).unwrap();
    workflow.set_branch_count(bg2, 4).unwrap();

    let write_side: Arc<Mutex<HashMap<usize, ThreadId>>> = Arc::new(Mutex::new(HashMap::new()));
    let read_side: Arc<Mutex<HashMap<usize, (ThreadId, ThreadId)>>> =
        Arc::new(Mutex::new(HashMap::new()));

    let writes = Arc::clone(&write_side);
    let record = workflow
        .add_work_step(bg1, move |branch: &mut Branch| {
            let me = thread::current().id();
            branch
                .data()
                .add(THREAD_KEY, me, ScopeLevel::Branch)
                .unwrap();
            writes.lock().insert(branch.branch_id(), me);
        })
        .unwrap();
    let handover = workflow.add_transition_barrier(bg1).unwrap();
    workflow.connect_flow(record, handover, 0).unwrap();
    workflow.set_first_step(bg1, record).unwrap();

    let reads = Arc::clone(&read_side);
    let verify = workflow
        .add_work_step(bg2, move |branch: &mut Branch| {
            let stored = branch.data().get::<ThreadId>(THREAD_KEY).unwrap();
            reads
                .lock()
                .insert(branch.branch_id(), (*stored, thread::current().id()));
        })
        .unwrap();
    workflow.connect_transition(handover, verify).unwrap();
    workflow.set_first_step(bg2, verify).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    let writes = write_side.lock();
    let reads = read_side.lock();
    assert_eq!(writes.len(), 4);
    assert_eq!(reads.len(), 4);
    for branch_id in 0..4 {
        let written = writes[&branch_id];
        let (stored, executing) = reads[&branch_id];
        assert_eq!(stored, written, "branch {branch_id} lost its scope");
        assert_eq!(
            executing, written,
            "branch {branch_id} moved to a different thread across the transition"
        );
    }
}

#[test]
fn a_group_can_transition_to_itself() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let initial = workflow.branch_groups()[0];
    workflow.remove_connection(initial).unwrap();

    let mid = workflow.add_barrier();
    let looping = workflow.connect(workflow.start_step(), mid).unwrap();
    workflow.set_branch_count(looping, 2).unwrap();

    let generations = Arc::new(AtomicUsize::new(0));
    let ticks = Arc::clone(&generations);
    let work = workflow
        .add_work_step(looping, move |_branch: &mut Branch| {
            ticks.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        })
        .unwrap();
    let handover = workflow.add_transition_barrier(looping).unwrap();
    workflow.connect_flow(work, handover, 0).unwrap();
    workflow.set_first_step(looping, work).unwrap();
    // The transition points back into the same group's flow: a loop whose
    // termination is driven from outside.
    workflow.connect_transition(handover, work).unwrap();

    workflow.start().unwrap();
    while generations.load(Ordering::SeqCst) < 10 {
        thread::sleep(Duration::from_millis(2));
    }
    workflow.stop().unwrap();
    workflow.wait();
    assert!(generations.load(Ordering::SeqCst) >= 10);
}

#[test]
fn transitions_between_unrelated_groups_are_rejected() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let initial = workflow.branch_groups()[0];
    workflow.remove_connection(initial).unwrap();

    // Two parallel groups between the same barriers share no barrier path.
    let a = workflow.connect(workflow.start_step(), workflow.finish_step()).unwrap();
    let b = workflow.connect(workflow.start_step(), workflow.finish_step()).unwrap();
    let from = workflow.add_transition_barrier(a).unwrap();
    let target = workflow.add_nop_step(b).unwrap();
    assert!(workflow.connect_transition(from, target).is_err());
}
