//! Engine runtime: process-wide services with explicit lifetime
//!
//! A [`Runtime`] owns the CPU info, the event pool and the thread pool, and
//! is passed to workflows at construction. Callers that prefer process-global
//! state can use [`initialize`] / [`finalize`] and fetch the shared instance
//! with [`global`].

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::pool::ThreadPool;
use crate::sync::EventPool;

/// CPU topology snapshot taken at runtime construction.
#[derive(Debug, Clone, Copy)]
pub struct CpuInfo {
    physical_cores: usize,
    logical_cores: usize,
}

impl CpuInfo {
    fn detect() -> Self {
        Self {
            physical_cores: num_cpus::get_physical(),
            logical_cores: num_cpus::get(),
        }
    }

    pub fn physical_cores(&self) -> usize {
        self.physical_cores
    }

    pub fn logical_cores(&self) -> usize {
        self.logical_cores
    }
}

/// Shared services for workflows.
///
/// Field order is the teardown order: the thread pool drains first (workers
/// may still own pooled events), then the event pool, then the CPU info.
pub struct Runtime {
    thread_pool: ThreadPool,
    events: Arc<EventPool>,
    cpu: CpuInfo,
}

impl Runtime {
    /// Builds a runtime from the given configuration.
    pub fn new(config: &EngineConfig) -> Arc<Runtime> {
        let cpu = CpuInfo::detect();
        let events = Arc::new(EventPool::new(
            config.auto_event_capacity,
            config.manual_event_capacity,
        ));
        let thread_pool = ThreadPool::new(config.worker_capacity, Arc::clone(&events));
        info!(
            workers = config.worker_capacity,
            logical_cores = cpu.logical_cores,
            "runtime created"
        );
        Arc::new(Runtime {
            thread_pool,
            events,
            cpu,
        })
    }

    pub fn thread_pool(&self) -> &ThreadPool {
        &self.thread_pool
    }

    pub fn events(&self) -> &Arc<EventPool> {
        &self.events
    }

    pub fn cpu(&self) -> &CpuInfo {
        &self.cpu
    }
}

static GLOBAL: RwLock<Option<Arc<Runtime>>> = RwLock::new(None);

/// Creates the process-global runtime.
///
/// Fails with an invalid-operation error when one already exists.
pub fn initialize(config: &EngineConfig) -> EngineResult<Arc<Runtime>> {
    let mut slot = GLOBAL.write();
    if slot.is_some() {
        return Err(EngineError::invalid_operation(
            "global runtime already initialized",
        ));
    }
    let runtime = Runtime::new(config);
    *slot = Some(Arc::clone(&runtime));
    Ok(runtime)
}

/// Tears down the process-global runtime.
///
/// Outstanding `Arc` handles keep the runtime alive until they drop.
pub fn finalize() -> EngineResult<()> {
    match GLOBAL.write().take() {
        Some(_) => Ok(()),
        None => Err(EngineError::invalid_operation(
            "global runtime was never initialized",
        )),
    }
}

/// Fetches the process-global runtime created by [`initialize`].
pub fn global() -> EngineResult<Arc<Runtime>> {
    GLOBAL
        .read()
        .clone()
        .ok_or_else(|| EngineError::invalid_operation("global runtime was never initialized"))
}
