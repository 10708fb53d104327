//! Branch groups
//!
//! A branch group is one edge of the workflow graph and owns the team that
//! executes its inner flow: N branches, a group-level data scope, a reusable
//! team barrier and the flow-end protocol that decides which branch executes
//! the group's exit barrier and whether the team is handed to another group.

use std::sync::atomic::{AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::branch::Branch;
use super::workflow::{run_branch, WorkflowCore};
use super::{ConnId, StepId};
use crate::data::{DataStorage, ScopeLevel};
use crate::error::EngineResult;
use crate::sync::{EventKind, EventPool, PooledEvent, TeamBarrier};

const NO_STEP: u32 = u32::MAX;

/// Where a branch goes after finishing its group's flow.
pub(crate) enum FlowEnd {
    /// The branch is done; its worker returns to the pool.
    Done,
    /// The branch carries on inside another group, on the same thread.
    Continue {
        group: Arc<BranchGroup>,
        first: StepId,
    },
}

/// Team handoff decided by a transition barrier's fan-out.
#[derive(Clone)]
pub(crate) struct Handoff {
    pub(crate) group: Arc<BranchGroup>,
    pub(crate) first: StepId,
    pub(crate) branch_count: usize,
}

/// Per-run gate the team's branches meet at when their flows end.
///
/// Every branch captures the gate before decrementing the active counter, so
/// even a self-transition (which installs a fresh gate for the next run)
/// cannot strand a slow branch on the wrong phase.
struct PhaseGate {
    event: PooledEvent,
    handoff: Mutex<Option<Handoff>>,
}

/// A team of N branches sharing one branch-group flow.
pub struct BranchGroup {
    id: ConnId,
    branch_count: AtomicUsize,
    data: Arc<DataStorage>,
    barrier: TeamBarrier,
    events: Arc<EventPool>,
    active: AtomicI32,
    /// Step the branches execute last, discovered at run time. `NO_STEP`
    /// until the first branch reaches a transition barrier.
    last_step: AtomicU32,
    first_step: Mutex<Option<StepId>>,
    phase: Mutex<Arc<PhaseGate>>,
}

impl BranchGroup {
    pub(crate) fn new(
        id: ConnId,
        global: &Arc<DataStorage>,
        workflow_data: &Arc<DataStorage>,
        events: &Arc<EventPool>,
    ) -> EngineResult<Self> {
        let data = Arc::new(DataStorage::with_parents(
            ScopeLevel::Group,
            &[Arc::clone(global), Arc::clone(workflow_data)],
        )?);
        let phase = Arc::new(PhaseGate {
            event: events.acquire(EventKind::Manual),
            handoff: Mutex::new(None),
        });
        Ok(Self {
            id,
            branch_count: AtomicUsize::new(1),
            data,
            barrier: TeamBarrier::new(events),
            events: Arc::clone(events),
            active: AtomicI32::new(0),
            last_step: AtomicU32::new(NO_STEP),
            first_step: Mutex::new(None),
            phase: Mutex::new(phase),
        })
    }

    /// Connection handle of this group in its workflow.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Number of branches in the team.
    pub fn branch_count(&self) -> usize {
        self.branch_count.load(Ordering::Acquire)
    }

    pub(crate) fn set_branch_count(&self, count: usize) {
        self.branch_count.store(count.max(1), Ordering::Release);
    }

    /// Group-level data scope, shared by every branch of the team.
    pub fn data(&self) -> &Arc<DataStorage> {
        &self.data
    }

    /// Barrier shared by the branches of this group.
    pub fn barrier(&self) -> &TeamBarrier {
        &self.barrier
    }

    /// Default first step of the group's flow.
    pub fn first_step(&self) -> Option<StepId> {
        *self.first_step.lock()
    }

    pub(crate) fn set_first_step(&self, step: Option<StepId>) {
        *self.first_step.lock() = step;
    }

    /// Records the run-time-discovered last step. Only the first call per
    /// run takes effect; the lost-update race between branches is intended.
    pub(crate) fn set_last_step(&self, step: StepId) {
        let _ =
            self.last_step
                .compare_exchange(NO_STEP, step.0, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn last_step(&self) -> Option<StepId> {
        match self.last_step.load(Ordering::Acquire) {
            NO_STEP => None,
            id => Some(StepId(id)),
        }
    }

    /// Resets the per-run state ahead of a new run of this group.
    ///
    /// The phase gate is replaced rather than reset: a branch of the previous
    /// run that has not woken yet keeps its (signalled) gate.
    pub(crate) fn begin_run(&self, branches: usize) {
        self.active.store(branches as i32, Ordering::Release);
        self.last_step.store(NO_STEP, Ordering::Release);
        *self.phase.lock() = Arc::new(PhaseGate {
            event: self.events.acquire(EventKind::Manual),
            handoff: Mutex::new(None),
        });
    }

    /// Starts a fresh team: every branch becomes a work item on the pool.
    pub(crate) fn start_team(
        self: &Arc<Self>,
        core: &Arc<WorkflowCore>,
        first: Option<StepId>,
    ) -> EngineResult<()> {
        let first = match first {
            Some(step) if core.step_in_flow(step, self.id) => Some(step),
            Some(step) => {
                warn!(
                    step = step.0,
                    group = self.id.0,
                    "first-step override does not belong to this group's flow; using the default"
                );
                self.first_step()
            }
            None => self.first_step(),
        };
        let branches = self.branch_count();
        self.begin_run(branches);
        debug!(group = self.id.0, branches, "starting branch group");

        for branch_id in 0..branches {
            core.branch_started();
            let branch = Branch::new(Arc::clone(self), branch_id);
            let worker_core = Arc::clone(core);
            let spawned = core
                .runtime()
                .thread_pool()
                .execute_detached(move || run_branch(worker_core, branch, first));
            if let Err(error) = spawned {
                core.branch_ended();
                return Err(error);
            }
        }
        Ok(())
    }

    /// Flow-end protocol, run by every branch when its traversal stops.
    ///
    /// The branch that brings the active counter to zero executes the
    /// group's exit barrier (its recorded last step, or the destination
    /// barrier of the group's connection when none was discovered), decides
    /// the phase outcome and opens the gate. The other branches retire their
    /// workflow registration and wait at the gate, then either end or carry
    /// the team into the successor group.
    ///
    /// Workflow accounting across the phase: every retirement is the same
    /// zero-checked decrement, so the drain is correct no matter which
    /// thread's decrement the OS schedules last. The last branch publishes
    /// the team's whole transition — the survivors' re-registration and its
    /// own retirement — as a single atomic adjustment, after the exit
    /// barrier has registered any fanned-out groups and strictly before the
    /// gate opens, so no observer can catch the count between the two
    /// halves of the handoff.
    pub(crate) fn finish_flow(
        self: &Arc<Self>,
        core: &Arc<WorkflowCore>,
        branch: &Branch,
    ) -> FlowEnd {
        let gate = Arc::clone(&self.phase.lock());
        let team = self.branch_count();
        let last = self.active.fetch_sub(1, Ordering::AcqRel) == 1;

        let handoff = if last {
            let exit = self.last_step().or_else(|| core.group_sink(self.id));
            let handoff = match exit {
                Some(step) => {
                    trace!(
                        group = self.id.0,
                        step = step.0,
                        "last branch executes the exit barrier"
                    );
                    core.execute_barrier(step)
                }
                None => None,
            };
            // One atomic step: the continuing branches (this one included,
            // when its ID survives) stay registered, everyone else leaves
            // the count. `continuing - 1` folds this branch's own
            // retirement in, so there is no window in which the team is
            // half-accounted.
            let continuing = handoff
                .as_ref()
                .map_or(0, |handoff| team.min(handoff.branch_count));
            *gate.handoff.lock() = handoff.clone();
            core.adjust_branches(continuing as i32 - 1);
            gate.event.signal();
            handoff
        } else {
            // Retire this branch's registration before blocking: a paused
            // workflow must not wait on branches parked at the gate. The
            // retirement is zero-checked like every other, so a decrement
            // delayed past the rest of the team's drain still fires the
            // end latch. The last branch re-registers the survivors before
            // it opens the gate.
            core.branch_ended();
            gate.event.wait();
            gate.handoff.lock().clone()
        };

        match handoff {
            Some(handoff) if branch.branch_id() < handoff.branch_count => FlowEnd::Continue {
                group: handoff.group,
                first: handoff.first,
            },
            _ => FlowEnd::Done,
        }
    }
}
