//! Branch filters
//!
//! A filter restricts which branches of a group execute a step. Filtered
//! branches skip the step entirely; allowed branches receive a compacted
//! *filtered ID* (0..allowed_count) so workload partitioning stays dense.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{EngineError, EngineResult};
use crate::sync::{EventPool, TeamBarrier};

#[derive(Debug, Clone, Copy)]
struct FilterSlot {
    allowed: bool,
    filtered_id: usize,
}

/// Allow/deny table for the branches of one group.
///
/// While inactive, every branch is allowed and keeps its own ID. Resizing
/// preserves previous allow flags and recomputes filtered IDs in ascending
/// branch order; new slots default to allowed.
#[derive(Debug, Clone)]
pub struct BranchFilterInfo {
    active: bool,
    allowed: usize,
    slots: Vec<FilterSlot>,
}

impl BranchFilterInfo {
    /// Creates an inactive filter sized for `size` branches, all allowed.
    pub fn new(size: usize) -> Self {
        let mut info = Self {
            active: false,
            allowed: 0,
            slots: Vec::new(),
        };
        info.resize(size);
        info
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Number of branch slots the filter covers.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Allows the branch with the given ID.
    pub fn allow(&mut self, branch_id: usize) -> EngineResult<()> {
        self.slot_check(branch_id)?;
        self.slots[branch_id].allowed = true;
        self.reindex();
        Ok(())
    }

    /// Disallows the branch with the given ID.
    pub fn deny(&mut self, branch_id: usize) -> EngineResult<()> {
        self.slot_check(branch_id)?;
        self.slots[branch_id].allowed = false;
        self.reindex();
        Ok(())
    }

    pub fn allow_all(&mut self) {
        for slot in &mut self.slots {
            slot.allowed = true;
        }
        self.reindex();
    }

    pub fn deny_all(&mut self) {
        for slot in &mut self.slots {
            slot.allowed = false;
        }
        self.reindex();
    }

    /// Grows or shrinks the filter, preserving existing allow flags.
    pub fn resize(&mut self, size: usize) {
        self.slots.resize(
            size,
            FilterSlot {
                allowed: true,
                filtered_id: 0,
            },
        );
        self.reindex();
    }

    /// Allow flag of the branch with the given ID.
    pub fn allows(&self, branch_id: usize) -> EngineResult<bool> {
        self.slot_check(branch_id)?;
        Ok(self.slots[branch_id].allowed)
    }

    /// Whether the branch should execute the filtered step.
    pub fn can_execute(&self, branch_id: usize) -> bool {
        !self.active || self.slots.get(branch_id).map_or(false, |slot| slot.allowed)
    }

    /// Compacted ID of the branch, or `None` when it is filtered out.
    pub fn filtered_id(&self, branch_id: usize) -> Option<usize> {
        if !self.active {
            return Some(branch_id);
        }
        let slot = self.slots.get(branch_id)?;
        slot.allowed.then_some(slot.filtered_id)
    }

    /// Number of branches that take part while the filter is active.
    pub fn branch_count(&self) -> usize {
        if self.active {
            self.allowed
        } else {
            self.len()
        }
    }

    fn reindex(&mut self) {
        let mut next = 0;
        for slot in &mut self.slots {
            if slot.allowed {
                slot.filtered_id = next;
                next += 1;
            }
        }
        self.allowed = next;
    }

    fn slot_check(&self, branch_id: usize) -> EngineResult<()> {
        if branch_id >= self.slots.len() {
            return Err(EngineError::OutOfRange {
                what: "branch id",
                value: branch_id as i64,
            });
        }
        Ok(())
    }
}

/// Runtime filter attached to a filtered step: the allow table plus a barrier
/// for synchronising the allowed branches.
pub struct BranchFilter {
    info: RwLock<BranchFilterInfo>,
    barrier: TeamBarrier,
}

impl BranchFilter {
    pub(crate) fn new(size: usize, events: &Arc<EventPool>) -> Self {
        Self {
            info: RwLock::new(BranchFilterInfo::new(size)),
            barrier: TeamBarrier::new(events),
        }
    }

    /// Snapshot of the allow table.
    pub fn info(&self) -> BranchFilterInfo {
        self.info.read().clone()
    }

    /// Replaces the allow table.
    pub fn set_info(&self, info: BranchFilterInfo) {
        *self.info.write() = info;
    }

    /// Barrier shared by the allowed branches of this filter.
    pub fn barrier(&self) -> &TeamBarrier {
        &self.barrier
    }

    pub fn is_active(&self) -> bool {
        self.info.read().is_active()
    }

    pub fn can_execute(&self, branch_id: usize) -> bool {
        self.info.read().can_execute(branch_id)
    }

    pub fn filtered_id(&self, branch_id: usize) -> Option<usize> {
        self.info.read().filtered_id(branch_id)
    }

    pub fn branch_count(&self) -> usize {
        self.info.read().branch_count()
    }

    pub(crate) fn resize(&self, size: usize) {
        self.info.write().resize(size);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn inactive_filter_allows_everyone() {
        let info = BranchFilterInfo::new(4);
        for id in 0..4 {
            assert!(info.can_execute(id));
            assert_eq!(info.filtered_id(id), Some(id));
        }
        assert_eq!(info.branch_count(), 4);
    }

    #[test]
    fn filtered_ids_are_compacted_in_ascending_order() {
        let mut info = BranchFilterInfo::new(5);
        info.activate();
        info.deny(0).unwrap();
        info.deny(2).unwrap();
        assert_eq!(info.filtered_id(0), None);
        assert_eq!(info.filtered_id(1), Some(0));
        assert_eq!(info.filtered_id(3), Some(1));
        assert_eq!(info.filtered_id(4), Some(2));
        assert_eq!(info.branch_count(), 3);
    }

    #[test]
    fn resize_preserves_flags_and_reindexes() {
        let mut info = BranchFilterInfo::new(3);
        info.activate();
        info.deny(1).unwrap();
        info.resize(5);
        assert_eq!(info.filtered_id(0), Some(0));
        assert_eq!(info.filtered_id(1), None);
        assert_eq!(info.filtered_id(2), Some(1));
        assert_eq!(info.filtered_id(3), Some(2));
        assert_eq!(info.filtered_id(4), Some(3));
        info.resize(2);
        assert_eq!(info.branch_count(), 1);
    }

    #[test]
    fn out_of_range_branch_id_is_an_error() {
        let mut info = BranchFilterInfo::new(2);
        assert!(info.allow(2).is_err());
        assert!(info.allows(5).is_err());
    }
}
