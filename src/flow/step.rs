//! Step behaviour
//!
//! Steps are stored as tagged variants in the workflow's arena; user code
//! contributes the work through the [`StepAction`] and [`DecisionAction`]
//! traits, blanket-implemented for closures. Execution follows the
//! `enter → run → exit` protocol: `enter` decides whether the branch performs
//! the operation, `exit` handles the optional post-step rendezvous.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use super::branch::Branch;
use super::filter::BranchFilter;
use super::ConnId;

/// Work performed by a step, executed once per admitted branch.
pub trait StepAction: Send + Sync + 'static {
    fn run(&self, branch: &mut Branch);
}

impl<F> StepAction for F
where
    F: Fn(&mut Branch) + Send + Sync + 'static,
{
    fn run(&self, branch: &mut Branch) {
        self(branch)
    }
}

/// Computes the integer decision a decision step routes on.
pub trait DecisionAction: Send + Sync + 'static {
    fn decide(&self, branch: &mut Branch) -> i32;
}

impl<F> DecisionAction for F
where
    F: Fn(&mut Branch) -> i32 + Send + Sync + 'static,
{
    fn decide(&self, branch: &mut Branch) -> i32 {
        self(branch)
    }
}

/// Barrier step flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierKind {
    /// The workflow's entry point; no inbound connections.
    Start,
    /// The workflow's exit point; no outbound connections.
    Finish,
    /// Fan-in/fan-out barrier between branch groups.
    Interior,
    /// Terminus of a branch-group flow that hands the team to another group.
    Transition,
}

pub(crate) enum StepKind {
    /// Plain work step with a single outbound slot.
    Work { action: Arc<dyn StepAction> },
    /// Structural placeholder: never executed, single outbound slot.
    Nop,
    /// Work step guarded by a branch filter, optional exit rendezvous.
    Filtered {
        action: Arc<dyn StepAction>,
        filter: Arc<BranchFilter>,
        sync_on_exit: bool,
    },
    /// Two outbound slots keyed by connection port 0 / nonzero.
    BinaryDecision {
        action: Arc<dyn DecisionAction>,
        slots: [Option<ConnId>; 2],
    },
    /// Outbound slots keyed by arbitrary connection ports.
    Decision {
        action: Arc<dyn DecisionAction>,
        table: HashMap<i32, ConnId>,
    },
    /// Barrier step; `hits` counts inbound branch groups per phase.
    Barrier {
        kind: BarrierKind,
        hits: Arc<AtomicUsize>,
    },
}

impl StepKind {
    pub(crate) fn barrier() -> Self {
        StepKind::Barrier {
            kind: BarrierKind::Interior,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn barrier_of(kind: BarrierKind) -> Self {
        StepKind::Barrier {
            kind,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Which flow a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowRef {
    /// The workflow graph itself (barrier steps only).
    Workflow,
    /// The inner flow of the branch group owned by this connection.
    Group(ConnId),
}

/// Arena node for a step.
pub(crate) struct StepNode {
    pub(crate) kind: StepKind,
    pub(crate) flow: FlowRef,
    pub(crate) inbound: BTreeSet<ConnId>,
    pub(crate) outbound: BTreeSet<ConnId>,
}

impl StepNode {
    pub(crate) fn new(kind: StepKind, flow: FlowRef) -> Self {
        Self {
            kind,
            flow,
            inbound: BTreeSet::new(),
            outbound: BTreeSet::new(),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.inbound.is_empty() || !self.outbound.is_empty()
    }
}

/// Behaviour snapshot cloned out of the graph lock so user code runs without
/// holding it.
pub(crate) enum StepExec {
    Work {
        action: Arc<dyn StepAction>,
    },
    Nop,
    Filtered {
        action: Arc<dyn StepAction>,
        filter: Arc<BranchFilter>,
        sync_on_exit: bool,
    },
    Decision {
        action: Arc<dyn DecisionAction>,
    },
    Transition,
    WorkflowBarrier,
}

impl StepExec {
    /// Decides whether the branch executes this step's operation.
    pub(crate) fn enter(&self, branch: &mut Branch, step: super::StepId) -> bool {
        match self {
            StepExec::Work { .. } | StepExec::Decision { .. } => true,
            StepExec::Nop => false,
            StepExec::Filtered { filter, .. } => {
                if filter.can_execute(branch.branch_id()) {
                    branch.current_filter = Some(Arc::clone(filter));
                    true
                } else {
                    false
                }
            }
            StepExec::Transition => {
                // First branch to get here fixes the group's last step; the
                // lost-update race between branches is harmless.
                branch.group().set_last_step(step);
                false
            }
            StepExec::WorkflowBarrier => false,
        }
    }

    /// Performs the step's operation.
    pub(crate) fn run(&self, branch: &mut Branch) {
        match self {
            StepExec::Work { action } | StepExec::Filtered { action, .. } => action.run(branch),
            StepExec::Decision { action } => {
                let decision = action.decide(branch);
                branch.set_last_decision(decision);
            }
            _ => {}
        }
    }

    /// Post-operation hook; filtered steps may rendezvous here.
    pub(crate) fn exit(&self, branch: &Branch) {
        if let StepExec::Filtered {
            sync_on_exit: true, ..
        } = self
        {
            branch.barrier().enter(true, branch.barrier_count());
        }
    }
}
