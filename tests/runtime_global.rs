//! Process-global runtime lifecycle

use branchflow::{finalize, global, initialize, EngineConfig};
use serial_test::serial;

#[test]
#[serial]
fn initialize_finalize_round_trip() {
    assert!(global().is_err());
    let runtime = initialize(&EngineConfig::default()).unwrap();
    assert!(initialize(&EngineConfig::default()).is_err());
    let shared = global().unwrap();
    assert!(runtime.cpu().logical_cores() >= 1);
    assert!(shared.cpu().logical_cores() >= 1);
    finalize().unwrap();
    assert!(global().is_err());
    assert!(finalize().is_err());
}

#[test]
#[serial]
fn the_global_runtime_drives_workflows() {
    let runtime = initialize(&EngineConfig::default()).unwrap();
    let workflow = branchflow::Workflow::new(runtime, None).unwrap();
    workflow.start().unwrap();
    workflow.wait();
    finalize().unwrap();
}
