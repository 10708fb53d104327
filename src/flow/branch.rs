//! Branches
//!
//! A branch is one worker thread's cursor through a branch-group flow. Step
//! actions receive the branch mutably and use it to reach the data scopes,
//! the team barrier and the workload-partitioning helpers.

use std::sync::Arc;

use super::filter::BranchFilter;
use super::group::BranchGroup;
use super::StepId;
use crate::data::{DataStorage, ScopeLevel};
use crate::sync::TeamBarrier;

/// One branch of a branch group.
pub struct Branch {
    group: Arc<BranchGroup>,
    branch_id: usize,
    data: Arc<DataStorage>,
    pub(crate) previous: Option<StepId>,
    pub(crate) last_decision: i32,
    pub(crate) current_filter: Option<Arc<BranchFilter>>,
    pub(crate) executing_last_step: bool,
}

impl Branch {
    pub(crate) fn new(group: Arc<BranchGroup>, branch_id: usize) -> Self {
        let data = Arc::new(DataStorage::new(ScopeLevel::Branch));
        for level in [ScopeLevel::Global, ScopeLevel::Workflow] {
            if let Some(parent) = group.data().parent(level) {
                let _ = data.set_parent(level, Some(parent));
            }
        }
        let _ = data.set_parent(ScopeLevel::Group, Some(Arc::clone(group.data())));
        Self {
            group,
            branch_id,
            data,
            previous: None,
            last_decision: -1,
            current_filter: None,
            executing_last_step: false,
        }
    }

    /// ID of this branch within its group, `0..branch_count`.
    pub fn branch_id(&self) -> usize {
        self.branch_id
    }

    /// The group this branch currently belongs to.
    pub fn group(&self) -> &Arc<BranchGroup> {
        &self.group
    }

    /// This branch's private data scope. Lookups walk outward through the
    /// group, workflow and global scopes.
    pub fn data(&self) -> &Arc<DataStorage> {
        &self.data
    }

    /// The step executed before the current one, if any.
    pub fn previous_step(&self) -> Option<StepId> {
        self.previous
    }

    /// Stores the routing value decision steps dispatch on.
    pub fn set_last_decision(&mut self, decision: i32) {
        self.last_decision = decision;
    }

    pub fn last_decision(&self) -> i32 {
        self.last_decision
    }

    /// Filter of the step being executed, when it has one.
    pub fn current_filter(&self) -> Option<&Arc<BranchFilter>> {
        self.current_filter.as_ref()
    }

    /// True while the branch executes its group's last step.
    pub fn is_executing_last_step(&self) -> bool {
        self.executing_last_step
    }

    /// The barrier this branch should synchronise on: the current filter's
    /// barrier while an active filter is in effect, the group's otherwise.
    pub fn barrier(&self) -> &TeamBarrier {
        match &self.current_filter {
            Some(filter) if filter.is_active() => filter.barrier(),
            _ => self.group.barrier(),
        }
    }

    /// Number of branches expected at [`barrier`](Branch::barrier).
    pub fn barrier_count(&self) -> usize {
        match &self.current_filter {
            Some(filter) => filter.branch_count(),
            None => self.group.branch_count(),
        }
    }

    /// This branch's ID within the current filter, or its plain ID when no
    /// filter is in effect. `None` when the filter excludes the branch.
    pub fn filtered_id(&self) -> Option<usize> {
        match &self.current_filter {
            Some(filter) => filter.filtered_id(self.branch_id),
            None => Some(self.branch_id),
        }
    }

    /// Splits `total` work units across the participating branches.
    ///
    /// Returns `(count, start)`: this branch's share and where it begins.
    /// Shares are contiguous, sum to `total` across the team, and any
    /// remainder goes to the lowest-ID branches. A branch excluded by the
    /// current filter receives no work.
    pub fn split_work(&self, total: usize) -> (usize, usize) {
        let (branches, id) = match &self.current_filter {
            Some(filter) => (filter.branch_count(), filter.filtered_id(self.branch_id)),
            None => (self.group.branch_count(), Some(self.branch_id)),
        };
        let Some(id) = id else { return (0, 0) };
        if branches == 0 {
            return (0, 0);
        }
        let mut count = total / branches;
        let remainder = total % branches;
        let start = if id < remainder {
            count += 1;
            count * id
        } else {
            count * id + remainder
        };
        (count, start)
    }

    /// Just the `count` part of [`split_work`](Branch::split_work).
    pub fn split_work_count(&self, total: usize) -> usize {
        self.split_work(total).0
    }

    /// Moves the branch onto another group's flow, keeping its private scope.
    pub(crate) fn rebind(&mut self, group: Arc<BranchGroup>) {
        let _ = self
            .data
            .set_parent(ScopeLevel::Group, Some(Arc::clone(group.data())));
        self.group = group;
        self.previous = None;
        self.last_decision = -1;
        self.current_filter = None;
        self.executing_last_step = false;
    }
}
