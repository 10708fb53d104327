//! Decision steps route branches by their last decision

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use branchflow::{Branch, EngineConfig, Runtime, Workflow};

#[test]
fn binary_decision_splits_the_team_by_proportion() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    let team = 40;
    let high = 12;
    workflow.set_branch_count(group, team).unwrap();

    let decision = workflow
        .add_binary_decision(group, move |branch: &mut Branch| branch.branch_id() < high)
        .unwrap();
    let false_hits = Arc::new(AtomicUsize::new(0));
    let true_hits = Arc::new(AtomicUsize::new(0));
    let false_counter = Arc::clone(&false_hits);
    let true_counter = Arc::clone(&true_hits);
    let false_step = workflow
        .add_work_step(group, move |_branch: &mut Branch| {
            false_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let true_step = workflow
        .add_work_step(group, move |_branch: &mut Branch| {
            true_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    workflow.connect_flow(decision, false_step, 0).unwrap();
    workflow.connect_flow(decision, true_step, 1).unwrap();
    workflow.set_first_step(group, decision).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    assert_eq!(true_hits.load(Ordering::SeqCst), high);
    assert_eq!(false_hits.load(Ordering::SeqCst), team - high);
}

#[test]
fn decision_table_routes_on_arbitrary_ports() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 6).unwrap();

    // Route branch id modulo 3 onto ports 10, 20, 30.
    let decision = workflow
        .add_decision(group, |branch: &mut Branch| {
            (branch.branch_id() as i32 % 3 + 1) * 10
        })
        .unwrap();
    let hits: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    for (index, port) in [10, 20, 30].into_iter().enumerate() {
        let counter = Arc::clone(&hits[index]);
        let step = workflow
            .add_work_step(group, move |_branch: &mut Branch| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        workflow.connect_flow(decision, step, port).unwrap();
    }
    workflow.set_first_step(group, decision).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    for counter in &hits {
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}

#[test]
fn a_missing_table_entry_ends_the_branch_flow() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];

    let decision = workflow
        .add_decision(group, |_branch: &mut Branch| 42)
        .unwrap();
    let reached = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reached);
    let step = workflow
        .add_work_step(group, move |_branch: &mut Branch| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    workflow.connect_flow(decision, step, 7).unwrap();
    workflow.set_first_step(group, decision).unwrap();

    workflow.start().unwrap();
    workflow.wait();
    assert_eq!(reached.load(Ordering::SeqCst), 0);
}
