//! Engine configuration
//!
//! Sizes for the process-wide pools. Defaults are derived from the CPU
//! topology so a freshly constructed runtime scales with the machine.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Runtime`](crate::runtime::Runtime)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of idle workers the thread pool keeps around.
    ///
    /// The pool still grows past this on demand; workers released into a full
    /// pool retire their threads instead of idling.
    pub worker_capacity: usize,

    /// Capacity of the auto-reset event free list
    pub auto_event_capacity: usize,

    /// Capacity of the manual-reset event free list
    pub manual_event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            worker_capacity: cpus,
            auto_event_capacity: 2 * cpus,
            manual_event_capacity: 2 * cpus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scale_with_cpu_count() {
        let config = EngineConfig::default();
        assert!(config.worker_capacity >= 1);
        assert!(config.auto_event_capacity >= config.worker_capacity);
    }
}
