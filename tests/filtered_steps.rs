//! Branch filters restrict which branches execute a step

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use branchflow::{Branch, BranchFilterInfo, EngineConfig, Runtime, Workflow};
use parking_lot::Mutex;

#[test]
fn only_allowed_branches_execute_a_filtered_step() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 6).unwrap();

    let executed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&executed);
    let step = workflow
        .add_filtered_step(group, move |branch: &mut Branch| {
            seen.lock().push(branch.branch_id());
        })
        .unwrap();
    workflow.set_first_step(group, step).unwrap();
    workflow.set_sync_on_exit(step, true).unwrap();

    let mut info = BranchFilterInfo::new(6);
    info.activate();
    for denied in [0, 2, 5] {
        info.deny(denied).unwrap();
    }
    workflow.set_branch_filter(step, info).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    let mut ran = executed.lock().clone();
    ran.sort_unstable();
    assert_eq!(ran, vec![1, 3, 4]);
}

#[test]
fn a_filter_with_no_allowed_branches_skips_the_step() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 4).unwrap();

    let executions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&executions);
    let step = workflow
        .add_filtered_step(group, move |_branch: &mut Branch| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    workflow.set_first_step(group, step).unwrap();
    workflow.set_sync_on_exit(step, true).unwrap();

    let mut info = BranchFilterInfo::new(4);
    info.activate();
    info.deny_all();
    workflow.set_branch_filter(step, info).unwrap();

    workflow.start().unwrap();
    workflow.wait();
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[test]
fn split_work_inside_a_filtered_step_covers_the_total_once() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 5).unwrap();

    let total = 23usize;
    let covered: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&covered);
    let step = workflow
        .add_filtered_step(group, move |branch: &mut Branch| {
            let (count, start) = branch.split_work(total);
            let mut covered = sink.lock();
            covered.extend(start..start + count);
        })
        .unwrap();
    workflow.set_first_step(group, step).unwrap();

    let mut info = BranchFilterInfo::new(5);
    info.activate();
    info.deny(1).unwrap();
    info.deny(3).unwrap();
    workflow.set_branch_filter(step, info).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    let mut indices = covered.lock().clone();
    indices.sort_unstable();
    assert_eq!(indices, (0..total).collect::<Vec<_>>());
}

#[test]
fn parallel_range_synchronises_the_team_on_end() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 4).unwrap();

    let total = 100usize;
    let marks: Arc<Vec<AtomicUsize>> =
        Arc::new((0..total).map(|_| AtomicUsize::new(0)).collect());
    let gaps = Arc::new(AtomicUsize::new(0));
    let cells = Arc::clone(&marks);
    let holes = Arc::clone(&gaps);
    let step = workflow
        .add_work_step(group, move |branch: &mut Branch| {
            let range = branchflow::ParallelRange::new(branch, total);
            range.execute(|index| {
                cells[index].fetch_add(1, Ordering::SeqCst);
            }, true);
            // After the end-of-range rendezvous every branch sees the whole
            // range processed.
            for cell in cells.iter() {
                if cell.load(Ordering::SeqCst) != 1 {
                    holes.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .unwrap();
    workflow.set_first_step(group, step).unwrap();

    workflow.start().unwrap();
    workflow.wait();

    assert_eq!(gaps.load(Ordering::SeqCst), 0);
    assert!(marks.iter().all(|cell| cell.load(Ordering::SeqCst) == 1));
}

#[test]
fn resizing_the_group_resizes_its_filters() {
    let runtime = Runtime::new(&EngineConfig::default());
    let workflow = Workflow::new(runtime, None).unwrap();
    let group = workflow.branch_groups()[0];
    workflow.set_branch_count(group, 3).unwrap();

    let step = workflow
        .add_filtered_step(group, |_branch: &mut Branch| {})
        .unwrap();
    let mut info = BranchFilterInfo::new(3);
    info.activate();
    info.deny(0).unwrap();
    workflow.set_branch_filter(step, info).unwrap();

    workflow.set_branch_count(group, 6).unwrap();
    let filter = workflow.branch_filter(step).unwrap();
    let resized = filter.info();
    assert_eq!(resized.len(), 6);
    assert!(!resized.allows(0).unwrap());
    for allowed in 1..6 {
        assert!(resized.allows(allowed).unwrap());
    }
}
