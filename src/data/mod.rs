//! Hierarchical data storage
//!
//! Workflow data lives in scopes at four levels — global, workflow, branch
//! group and branch — linked into a chain so that lower scopes can resolve
//! data stored higher up. Entries are reference-counted: an entry cannot be
//! removed while a [`DataRef`] to it is alive.

mod cache;
mod storage;

pub use cache::{BindUpdate, DataBinder, DataCache};
pub use storage::{DataRef, DataStorage, ScopeLevel};
