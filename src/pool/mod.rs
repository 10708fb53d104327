//! Worker threads and the thread pool
//!
//! One OS thread per worker. Idle workers park on an auto-reset ready event
//! and sit on a lock-free stack inside the pool; dispatching a work item pops
//! a worker (or spawns a new one), hands it the item and signals it. Results
//! travel through [`JobHandle`] slots with a completion latch; failures that
//! have no result slot go to the pool's fallback handler.

mod thread_pool;
mod work;
mod worker;

pub use thread_pool::{FallbackHandler, ThreadPool};
pub use work::{JobError, JobHandle};

pub(crate) use work::panic_message;
