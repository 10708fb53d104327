//! Workflows
//!
//! The top-level owner: arena of barrier steps, side table of branch groups
//! and transitions, the data scopes, and the lifecycle surface
//! (start / pause / resume / stop / wait). Cancellation is cooperative —
//! branches observe the state at step boundaries and barrier entry.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace};

use super::branch::Branch;
use super::connection::{ConnKind, ConnNode};
use super::filter::{BranchFilter, BranchFilterInfo};
use super::graph::Graph;
use super::group::{BranchGroup, FlowEnd, Handoff};
use super::step::{BarrierKind, DecisionAction, FlowRef, StepAction, StepExec, StepKind, StepNode};
use super::{ConnId, StepId};
use crate::data::{DataStorage, ScopeLevel};
use crate::error::{EngineError, EngineResult};
use crate::pool::panic_message;
use crate::pool::JobError;
use crate::runtime::Runtime;
use crate::sync::{EventKind, PooledEvent};

/// Execution state of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    Stopped,
    Running,
    Paused,
}

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const PAUSED: u8 = 2;

impl WorkflowState {
    fn as_u8(self) -> u8 {
        match self {
            WorkflowState::Stopped => STOPPED,
            WorkflowState::Running => RUNNING,
            WorkflowState::Paused => PAUSED,
        }
    }

    fn from_u8(value: u8) -> WorkflowState {
        match value {
            RUNNING => WorkflowState::Running,
            PAUSED => WorkflowState::Paused,
            _ => WorkflowState::Stopped,
        }
    }
}

/// A multi-branched workflow.
///
/// Construction creates the start and finish steps pre-connected by one
/// branch group; from there the graph is edited through this handle. All
/// mutation methods report their errors before touching the graph. Editing a
/// running workflow is a usage error.
pub struct Workflow {
    core: Arc<WorkflowCore>,
}

pub(crate) struct WorkflowCore {
    runtime: Arc<Runtime>,
    global_data: Arc<DataStorage>,
    data: Arc<DataStorage>,
    graph: RwLock<Graph>,
    start: StepId,
    finish: StepId,
    state: AtomicU8,
    /// Serialises the external control calls.
    control: Mutex<()>,
    /// Auto-reset: acknowledges that a state change has fully taken effect.
    state_change: PooledEvent,
    /// Manual-reset: paused branches park here.
    pause_gate: PooledEvent,
    /// Manual-reset: signalled when the workflow has fully stopped.
    end: PooledEvent,
    active_branches: AtomicI32,
    paused_branches: AtomicI32,
}

impl Workflow {
    /// Creates a workflow with start and finish steps joined by one branch
    /// group. `global` is the process-wide data scope to link against; pass
    /// `None` to give the workflow a private one.
    pub fn new(runtime: Arc<Runtime>, global: Option<Arc<DataStorage>>) -> EngineResult<Workflow> {
        let global = match global {
            Some(storage) => {
                if storage.level() != ScopeLevel::Global {
                    return Err(EngineError::invalid_argument(
                        "global",
                        "storage is not a global scope",
                    ));
                }
                storage
            }
            None => Arc::new(DataStorage::new(ScopeLevel::Global)),
        };
        let data = Arc::new(DataStorage::with_parents(
            ScopeLevel::Workflow,
            std::slice::from_ref(&global),
        )?);

        let mut graph = Graph::new();
        let start = graph.insert_step(StepNode::new(
            StepKind::barrier_of(BarrierKind::Start),
            FlowRef::Workflow,
        ));
        let finish = graph.insert_step(StepNode::new(
            StepKind::barrier_of(BarrierKind::Finish),
            FlowRef::Workflow,
        ));
        let conn = graph.alloc_conn_id();
        let group = Arc::new(BranchGroup::new(conn, &global, &data, runtime.events())?);
        graph.insert_conn(
            conn,
            ConnNode {
                port: 0,
                kind: ConnKind::Group(group),
                from: start,
                to: finish,
            },
        );
        graph.attach(conn)?;

        let state_change = runtime.events().acquire(EventKind::Auto);
        let pause_gate = runtime.events().acquire(EventKind::Manual);
        let end = runtime.events().acquire(EventKind::Manual);
        Ok(Workflow {
            core: Arc::new(WorkflowCore {
                runtime,
                global_data: global,
                data,
                graph: RwLock::new(graph),
                start,
                finish,
                state: AtomicU8::new(STOPPED),
                control: Mutex::new(()),
                state_change,
                pause_gate,
                end,
                active_branches: AtomicI32::new(0),
                paused_branches: AtomicI32::new(0),
            }),
        })
    }

    // ---- introspection ----------------------------------------------------

    pub fn start_step(&self) -> StepId {
        self.core.start
    }

    pub fn finish_step(&self) -> StepId {
        self.core.finish
    }

    pub fn state(&self) -> WorkflowState {
        self.core.state()
    }

    /// Workflow-level data scope.
    pub fn data(&self) -> &Arc<DataStorage> {
        &self.core.data
    }

    /// The global scope this workflow is linked against.
    pub fn global_data(&self) -> &Arc<DataStorage> {
        &self.core.global_data
    }

    /// All branch groups, in creation order.
    pub fn branch_groups(&self) -> Vec<ConnId> {
        self.core.graph.read().group_ids()
    }

    /// All branch-group transitions, in creation order.
    pub fn transitions(&self) -> Vec<ConnId> {
        self.core.graph.read().transition_ids()
    }

    /// The group behind a branch-group connection.
    pub fn group(&self, id: ConnId) -> EngineResult<Arc<BranchGroup>> {
        self.core.graph.read().group_arc(id)
    }

    /// Group-level data scope of a branch group.
    pub fn group_data(&self, id: ConnId) -> EngineResult<Arc<DataStorage>> {
        Ok(Arc::clone(self.group(id)?.data()))
    }

    // ---- workflow-level graph edits ---------------------------------------

    /// Adds an interior fan-in/fan-out barrier to the workflow.
    pub fn add_barrier(&self) -> StepId {
        self.core
            .graph
            .write()
            .insert_step(StepNode::new(StepKind::barrier(), FlowRef::Workflow))
    }

    /// Connects two workflow barriers with a new branch group (team size 1).
    ///
    /// Fails — leaving the graph unchanged — when an endpoint is not a
    /// workflow barrier, when the start/finish constraints are violated, or
    /// when the new edge would invalidate an existing transition.
    pub fn connect(&self, from: StepId, to: StepId) -> EngineResult<ConnId> {
        let mut graph = self.core.graph.write();
        for (what, step) in [("from", from), ("to", to)] {
            let node = graph.step(step)?;
            if node.flow != FlowRef::Workflow {
                return Err(EngineError::invalid_argument(
                    what,
                    "step is not a workflow barrier",
                ));
            }
        }
        graph.ensure_outbound_free(from, 0)?;
        graph.ensure_inbound_free(to)?;

        let conn = graph.alloc_conn_id();
        let group = Arc::new(BranchGroup::new(
            conn,
            &self.core.global_data,
            &self.core.data,
            self.core.runtime.events(),
        )?);
        graph.insert_conn(
            conn,
            ConnNode {
                port: 0,
                kind: ConnKind::Group(group),
                from,
                to,
            },
        );
        graph.attach(conn)?;
        if !graph.transitions_valid(&[]) {
            graph.detach(conn)?;
            return Err(EngineError::invalid_operation(
                "connecting these steps would invalidate a branch-group transition",
            ));
        }
        debug!(conn = conn.0, from = from.0, to = to.0, "branch group added");
        Ok(conn)
    }

    /// Connects a transition barrier to a step of a compatible group's flow.
    pub fn connect_transition(&self, from: StepId, to: StepId) -> EngineResult<ConnId> {
        let mut graph = self.core.graph.write();
        let from_group = match (graph.is_transition_step(from), graph.owner_group(from)) {
            (true, Some(group)) => group,
            _ => {
                return Err(EngineError::invalid_argument(
                    "from",
                    "step is not a transition barrier inside a branch-group flow",
                ))
            }
        };
        let to_group = graph.owner_group(to).ok_or_else(|| {
            EngineError::invalid_argument("to", "step does not belong to a branch-group flow")
        })?;
        graph.ensure_outbound_free(from, 1)?;
        graph.ensure_inbound_free(to)?;
        if !graph.groups_compatible(from_group, to_group, &[]) {
            return Err(EngineError::invalid_argument(
                "to",
                "the two branch groups are not transition-compatible",
            ));
        }
        let conn = graph.alloc_conn_id();
        graph.insert_conn(
            conn,
            ConnNode {
                port: 1,
                kind: ConnKind::Transition,
                from,
                to,
            },
        );
        graph.attach(conn)?;
        debug!(conn = conn.0, from = from.0, to = to.0, "transition added");
        Ok(conn)
    }

    /// Removes a connection of any kind.
    ///
    /// Removing a branch group also removes its inner flow. A group whose
    /// flow still hosts transition endpoints, or whose removal would strand
    /// an existing transition, is refused.
    pub fn remove_connection(&self, conn: ConnId) -> EngineResult<()> {
        let mut graph = self.core.graph.write();
        let is_group = graph.conn(conn)?.is_group();
        if is_group {
            if graph.group_has_transition_endpoints(conn) {
                return Err(EngineError::invalid_operation(
                    "branch group still hosts transition endpoints; remove the transition first",
                ));
            }
            if !graph.transitions_valid(&[conn]) {
                return Err(EngineError::invalid_operation(
                    "disconnecting these steps would invalidate a branch-group transition",
                ));
            }
            graph.detach(conn)?;
            graph.remove_group_flow(conn);
        } else {
            graph.detach(conn)?;
        }
        Ok(())
    }

    /// Removes a step from the workflow or from a branch-group flow.
    ///
    /// The start and finish steps cannot be removed. A connected step is
    /// refused unless `disconnect` is set, in which case its connections are
    /// removed first (with the same checks as [`remove_connection`]).
    ///
    /// [`remove_connection`]: Workflow::remove_connection
    pub fn remove_step(&self, step: StepId, disconnect: bool) -> EngineResult<()> {
        if step == self.core.start || step == self.core.finish {
            return Err(EngineError::invalid_operation(
                "cannot remove the start or finish step of the workflow",
            ));
        }
        let mut graph = self.core.graph.write();
        let (conns, connected): (Vec<ConnId>, bool) = {
            let node = graph.step(step)?;
            (
                node.inbound.iter().chain(node.outbound.iter()).copied().collect(),
                node.is_connected(),
            )
        };
        if connected && !disconnect {
            return Err(EngineError::invalid_operation(
                "step is still connected; disconnect it first",
            ));
        }
        // Validate every group removal before mutating anything.
        let groups: Vec<ConnId> = conns
            .iter()
            .filter(|id| graph.conn(**id).map(ConnNode::is_group).unwrap_or(false))
            .copied()
            .collect();
        for group in &groups {
            if graph.group_has_transition_endpoints(*group) {
                return Err(EngineError::invalid_operation(
                    "branch group still hosts transition endpoints; remove the transition first",
                ));
            }
        }
        if !graph.transitions_valid(&groups) {
            return Err(EngineError::invalid_operation(
                "disconnecting these steps would invalidate a branch-group transition",
            ));
        }
        for conn in conns {
            let group = graph.conn(conn).map(ConnNode::is_group).unwrap_or(false);
            graph.detach(conn)?;
            if group {
                graph.remove_group_flow(conn);
            }
        }
        graph.remove_step(step);
        Ok(())
    }

    // ---- branch-group flow edits ------------------------------------------

    /// Adds a work step to a group's flow.
    pub fn add_work_step<A>(&self, group: ConnId, action: A) -> EngineResult<StepId>
    where
        A: StepAction,
    {
        self.add_flow_step(
            group,
            StepKind::Work {
                action: Arc::new(action),
            },
        )
    }

    /// Adds a placeholder step that no branch executes.
    pub fn add_nop_step(&self, group: ConnId) -> EngineResult<StepId> {
        self.add_flow_step(group, StepKind::Nop)
    }

    /// Adds a filtered work step; the filter starts inactive, sized to the
    /// group's branch count.
    pub fn add_filtered_step<A>(&self, group: ConnId, action: A) -> EngineResult<StepId>
    where
        A: StepAction,
    {
        let branches = {
            let graph = self.core.graph.read();
            graph.group_arc(group)?.branch_count()
        };
        self.add_flow_step(
            group,
            StepKind::Filtered {
                action: Arc::new(action),
                filter: Arc::new(BranchFilter::new(branches, self.core.runtime.events())),
                sync_on_exit: false,
            },
        )
    }

    /// Adds a two-way decision; `decide` routes to port 0 (false) or any
    /// nonzero port (true).
    pub fn add_binary_decision<F>(&self, group: ConnId, decide: F) -> EngineResult<StepId>
    where
        F: Fn(&mut Branch) -> bool + Send + Sync + 'static,
    {
        let action = move |branch: &mut Branch| -> i32 {
            if decide(branch) {
                1
            } else {
                0
            }
        };
        self.add_flow_step(
            group,
            StepKind::BinaryDecision {
                action: Arc::new(action),
                slots: [None, None],
            },
        )
    }

    /// Adds a decision with an arbitrary port table.
    pub fn add_decision<A>(&self, group: ConnId, decide: A) -> EngineResult<StepId>
    where
        A: DecisionAction,
    {
        self.add_flow_step(
            group,
            StepKind::Decision {
                action: Arc::new(decide),
                table: Default::default(),
            },
        )
    }

    /// Adds a transition barrier: the terminus of this group's flow from
    /// which a transition can hand the team to a compatible group.
    pub fn add_transition_barrier(&self, group: ConnId) -> EngineResult<StepId> {
        self.add_flow_step(group, StepKind::barrier_of(BarrierKind::Transition))
    }

    fn add_flow_step(&self, group: ConnId, kind: StepKind) -> EngineResult<StepId> {
        let mut graph = self.core.graph.write();
        graph.group_arc(group)?;
        Ok(graph.insert_step(StepNode::new(kind, FlowRef::Group(group))))
    }

    /// Connects two steps of the same branch-group flow.
    ///
    /// `port` is the connection ID: 0 for plain edges and the false side of
    /// binary decisions, nonzero for decision outcomes.
    pub fn connect_flow(&self, from: StepId, to: StepId, port: i32) -> EngineResult<ConnId> {
        let mut graph = self.core.graph.write();
        let from_group = graph.owner_group(from);
        let to_group = graph.owner_group(to);
        match (from_group, to_group) {
            (Some(a), Some(b)) if a == b => {}
            _ => {
                return Err(EngineError::invalid_argument(
                    "to",
                    "steps do not belong to the same branch-group flow",
                ))
            }
        }
        if graph.is_transition_step(from) {
            return Err(EngineError::invalid_argument(
                "from",
                "a transition barrier has no flow successors",
            ));
        }
        graph.ensure_outbound_free(from, port)?;
        graph.ensure_inbound_free(to)?;
        let conn = graph.alloc_conn_id();
        graph.insert_conn(
            conn,
            ConnNode {
                port,
                kind: ConnKind::FlowEdge,
                from,
                to,
            },
        );
        graph.attach(conn)?;
        Ok(conn)
    }

    /// Changes a flow edge's connection ID, migrating decision slots.
    pub fn set_connection_port(&self, conn: ConnId, port: i32) -> EngineResult<()> {
        self.core.graph.write().set_conn_port(conn, port)
    }

    /// Sets the step a group's branches begin at.
    pub fn set_first_step(&self, group: ConnId, step: StepId) -> EngineResult<()> {
        let graph = self.core.graph.read();
        let target = graph.group_arc(group)?;
        if graph.owner_group(step) != Some(group) {
            return Err(EngineError::invalid_argument(
                "step",
                "step does not belong to this group's flow",
            ));
        }
        target.set_first_step(Some(step));
        Ok(())
    }

    /// Resizes a group's team. Every filtered step of the group's flow
    /// resizes its branch filter in place.
    pub fn set_branch_count(&self, group: ConnId, count: usize) -> EngineResult<()> {
        let graph = self.core.graph.read();
        let target = graph.group_arc(group)?;
        let count = count.max(1);
        target.set_branch_count(count);
        for step in graph.flow_steps(group) {
            if let Ok(node) = graph.step(step) {
                if let StepKind::Filtered { filter, .. } = &node.kind {
                    filter.resize(count);
                }
            }
        }
        Ok(())
    }

    /// Replaces the allow table of a filtered step, then resizes it to the
    /// enclosing group's branch count.
    pub fn set_branch_filter(&self, step: StepId, info: BranchFilterInfo) -> EngineResult<()> {
        let graph = self.core.graph.read();
        let branches = graph
            .owner_group(step)
            .and_then(|group| graph.group_arc(group).ok())
            .map(|group| group.branch_count());
        match &graph.step(step)?.kind {
            StepKind::Filtered { filter, .. } => {
                filter.set_info(info);
                if let Some(branches) = branches {
                    filter.resize(branches);
                }
                Ok(())
            }
            _ => Err(EngineError::invalid_argument(
                "step",
                "step carries no branch filter",
            )),
        }
    }

    /// The filter attached to a filtered step.
    pub fn branch_filter(&self, step: StepId) -> EngineResult<Arc<BranchFilter>> {
        match &self.core.graph.read().step(step)?.kind {
            StepKind::Filtered { filter, .. } => Ok(Arc::clone(filter)),
            _ => Err(EngineError::invalid_argument(
                "step",
                "step carries no branch filter",
            )),
        }
    }

    /// Sets whether a filtered step's allowed branches rendezvous on exit.
    pub fn set_sync_on_exit(&self, step: StepId, sync: bool) -> EngineResult<()> {
        let mut graph = self.core.graph.write();
        match &mut graph.step_mut(step)?.kind {
            StepKind::Filtered { sync_on_exit, .. } => {
                *sync_on_exit = sync;
                Ok(())
            }
            _ => Err(EngineError::invalid_argument(
                "step",
                "step carries no branch filter",
            )),
        }
    }

    // ---- control ----------------------------------------------------------

    /// Starts the workflow: the start step fans out on the calling thread.
    pub fn start(&self) -> EngineResult<()> {
        let _guard = self.core.control.lock();
        if !self.core.cas_state(WorkflowState::Stopped, WorkflowState::Running) {
            return Err(EngineError::invalid_operation(
                "workflow is already running or paused",
            ));
        }
        self.core.state_change.reset();
        self.core.end.reset();
        self.core.pause_gate.reset();
        self.core.paused_branches.store(0, Ordering::Release);
        info!("workflow starting");
        self.core.fan_out_groups(self.core.start)
    }

    /// Pauses a running workflow; returns once every active branch has
    /// parked on the pause gate.
    pub fn pause(&self) -> EngineResult<()> {
        let _guard = self.core.control.lock();
        if !self.core.cas_state(WorkflowState::Running, WorkflowState::Paused) {
            return Err(EngineError::invalid_operation(
                "cannot pause a workflow that is not running",
            ));
        }
        info!("workflow pausing");
        self.core.state_change.wait();
        Ok(())
    }

    /// Resumes a paused workflow; returns once the last parked branch has
    /// passed the gate.
    pub fn resume(&self) -> EngineResult<()> {
        let _guard = self.core.control.lock();
        if !self.core.cas_state(WorkflowState::Paused, WorkflowState::Running) {
            return Err(EngineError::invalid_operation(
                "cannot resume a workflow that is not paused",
            ));
        }
        info!("workflow resuming");
        self.core.pause_gate.signal();
        self.core.state_change.wait();
        Ok(())
    }

    /// Stops the workflow and waits for its branches to run down. Stopping
    /// an already-stopped workflow is a no-op.
    pub fn stop(&self) -> EngineResult<()> {
        let _guard = self.core.control.lock();
        if self.core.cas_state(WorkflowState::Running, WorkflowState::Stopped) {
            info!("workflow stopping");
            self.core.state_change.wait();
        } else if self.core.cas_state(WorkflowState::Paused, WorkflowState::Stopped) {
            info!("workflow stopping from pause");
            self.core.pause_gate.signal();
            self.core.state_change.wait();
        }
        Ok(())
    }

    /// Blocks until the workflow has finished or been stopped.
    pub fn wait(&self) {
        self.core.end.wait();
    }
}

impl WorkflowCore {
    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub(crate) fn state(&self) -> WorkflowState {
        WorkflowState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn cas_state(&self, from: WorkflowState, to: WorkflowState) -> bool {
        self.state
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Cooperative cancellation gate, called at step boundaries and barrier
    /// entry. Parks the branch while the workflow is paused; returns `false`
    /// once it is stopped.
    pub(crate) fn state_check(&self) -> bool {
        if self.state() == WorkflowState::Paused {
            if self.paused_branches.fetch_add(1, Ordering::AcqRel) + 1
                == self.active_branches.load(Ordering::Acquire)
            {
                // Every active branch is parked; acknowledge the pause.
                self.state_change.signal();
            }
            self.pause_gate.wait();
            if self.paused_branches.fetch_sub(1, Ordering::AcqRel) - 1 == 0
                && self.state() == WorkflowState::Running
            {
                // Last branch through the gate closes it behind the team.
                self.pause_gate.reset();
                self.state_change.signal();
            }
        }
        self.state() != WorkflowState::Stopped
    }

    pub(crate) fn branch_started(&self) {
        self.active_branches.fetch_add(1, Ordering::AcqRel);
    }

    /// Retires one branch registration.
    pub(crate) fn branch_ended(&self) {
        self.adjust_branches(-1);
    }

    /// Applies a flow-end adjustment to the active-branch count as one
    /// atomic step.
    ///
    /// Every retirement — a branch ending, a branch parking at its team's
    /// flow-end gate, or a team's net adjustment — goes through here, and
    /// every negative adjustment checks for the count reaching zero. The
    /// threads of a draining team decrement independently, so whichever
    /// retirement the OS schedules last is the one that fires the end latch;
    /// a zero-check confined to any single designated thread would miss a
    /// straggler's decrement.
    pub(crate) fn adjust_branches(&self, delta: i32) {
        if delta == 0 {
            return;
        }
        if self.active_branches.fetch_add(delta, Ordering::AcqRel) + delta == 0 {
            self.state.store(STOPPED, Ordering::Release);
            self.end.signal();
            self.state_change.signal();
            info!("workflow finished");
        }
    }

    // ---- barrier execution -------------------------------------------------

    /// Executes a barrier step on behalf of one inbound branch group.
    ///
    /// Counts the hit; the hit that completes the fan-in resets the counter
    /// and performs the fan-out — unless the workflow is no longer running.
    /// For transition barriers the prepared team handoff is returned to the
    /// caller (the flow-end protocol) instead of spawning anything.
    pub(crate) fn execute_barrier(self: &Arc<Self>, step: StepId) -> Option<Handoff> {
        let (hits, kind) = self.graph.read().barrier_hits(step)?;
        let expected = match kind {
            BarrierKind::Transition | BarrierKind::Start => 1,
            _ => self.graph.read().inbound_group_count(step).max(1),
        };
        if hits.fetch_add(1, Ordering::AcqRel) + 1 < expected {
            return None;
        }
        hits.store(0, Ordering::Release);

        match kind {
            BarrierKind::Transition => {
                // The handoff itself is not a cancellation point: a paused
                // workflow still hands the team over and the inherited
                // branches park at their first step boundary instead, so the
                // teammates waiting at the flow-end gate are never stranded.
                if self.state() != WorkflowState::Stopped {
                    self.transition_handoff(step)
                } else {
                    None
                }
            }
            _ => {
                if self.state_check() {
                    if let Err(error) = self.fan_out_groups(step) {
                        error!(%error, step = step.0, "barrier fan-out failed");
                    }
                }
                None
            }
        }
    }

    /// Starts every branch group leaving `step`.
    fn fan_out_groups(self: &Arc<Self>, step: StepId) -> EngineResult<()> {
        let groups = self.graph.read().outbound_groups(step);
        trace!(step = step.0, groups = groups.len(), "barrier fan-out");
        for group in groups {
            group.start_team(self, None)?;
        }
        Ok(())
    }

    /// Prepares the successor group of a transition to inherit the team.
    fn transition_handoff(self: &Arc<Self>, step: StepId) -> Option<Handoff> {
        let (source, successor, target) = {
            let graph = self.graph.read();
            let source = graph
                .owner_group(step)
                .and_then(|id| graph.group_arc(id).ok());
            let target = graph.transition_target(step);
            let successor = target
                .and_then(|t| graph.owner_group(t))
                .and_then(|id| graph.group_arc(id).ok());
            (source, successor, target)
        };
        // A transition barrier without an outgoing transition dissolves the
        // team.
        let (source, successor, target) = (source?, successor?, target?);

        let inherited = source.branch_count();
        let needed = successor.branch_count();
        debug!(
            from = source.id().0,
            to = successor.id().0,
            inherited,
            needed,
            "branch-group transition hands the team over"
        );
        successor.begin_run(needed);

        // Branches the inherited team cannot cover start fresh on the pool.
        for branch_id in inherited..needed {
            self.branch_started();
            let branch = Branch::new(Arc::clone(&successor), branch_id);
            let core = Arc::clone(self);
            if let Err(error) = self
                .runtime
                .thread_pool()
                .execute_detached(move || run_branch(core, branch, Some(target)))
            {
                self.branch_ended();
                error!(%error, "failed to spawn a replacement branch for the handoff");
            }
        }

        Some(Handoff {
            branch_count: needed,
            group: successor,
            first: target,
        })
    }

    // ---- graph lookups used during execution -------------------------------

    pub(crate) fn step_exec(&self, step: StepId) -> Option<StepExec> {
        self.graph.read().step_exec(step)
    }

    pub(crate) fn next_step(&self, step: StepId, last_decision: i32) -> Option<StepId> {
        self.graph.read().next_step(step, last_decision)
    }

    pub(crate) fn group_sink(&self, group: ConnId) -> Option<StepId> {
        self.graph.read().group_sink(group)
    }

    pub(crate) fn step_in_flow(&self, step: StepId, group: ConnId) -> bool {
        self.graph.read().owner_group(step) == Some(group)
    }
}

/// The branch loop: traverses the branch-group flow step by step, then runs
/// the flow-end protocol, continuing into a successor group when a
/// transition hands the team over.
pub(crate) fn run_branch(core: Arc<WorkflowCore>, mut branch: Branch, first: Option<StepId>) {
    let mut next = first;
    loop {
        while let Some(step) = next {
            if !core.state_check() {
                break;
            }
            let Some(exec) = core.step_exec(step) else {
                break;
            };
            if exec.enter(&mut branch, step) {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| exec.run(&mut branch)));
                match outcome {
                    Ok(()) => exec.exit(&branch),
                    Err(payload) => {
                        // The branch aborts its flow but still runs the
                        // flow-end protocol, so the team's accounting stays
                        // intact and the remaining branches continue.
                        let error = JobError::Panicked(panic_message(payload.as_ref()));
                        error!(
                            step = step.0,
                            branch = branch.branch_id(),
                            %error,
                            "step action panicked; branch aborts its flow"
                        );
                        core.runtime().thread_pool().report_failure(&error);
                        break;
                    }
                }
            }
            branch.previous = Some(step);
            branch.current_filter = None;
            next = core.next_step(step, branch.last_decision());
        }

        branch.executing_last_step = true;
        let group = Arc::clone(branch.group());
        // finish_flow settles the workflow's branch accounting for ending
        // branches, so nothing more is owed after `Done`.
        match group.finish_flow(&core, &branch) {
            FlowEnd::Done => break,
            FlowEnd::Continue { group, first } => {
                trace!(
                    branch = branch.branch_id(),
                    group = group.id().0,
                    "branch continues into the successor group"
                );
                branch.rebind(group);
                next = Some(first);
            }
        }
    }
}
