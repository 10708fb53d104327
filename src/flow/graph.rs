//! Step arena and connection side table
//!
//! The workflow owns all steps and connections; the graph references them by
//! ID only, so edits are index manipulation and removal cannot leave dangling
//! pointers. Every validity check runs before any mutation — a failed edit
//! leaves the graph untouched.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::connection::{ConnKind, ConnNode};
use super::group::BranchGroup;
use super::step::{BarrierKind, StepExec, StepKind, StepNode};
use super::{ConnId, StepId};
use crate::error::{EngineError, EngineResult};

pub(crate) struct Graph {
    steps: HashMap<u32, StepNode>,
    conns: HashMap<u32, ConnNode>,
    next_step: u32,
    next_conn: u32,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self {
            steps: HashMap::new(),
            conns: HashMap::new(),
            next_step: 0,
            next_conn: 0,
        }
    }

    // ---- arena management -------------------------------------------------

    pub(crate) fn insert_step(&mut self, node: StepNode) -> StepId {
        let id = self.next_step;
        self.next_step += 1;
        self.steps.insert(id, node);
        StepId(id)
    }

    pub(crate) fn alloc_conn_id(&mut self) -> ConnId {
        let id = self.next_conn;
        self.next_conn += 1;
        ConnId(id)
    }

    pub(crate) fn insert_conn(&mut self, id: ConnId, node: ConnNode) {
        self.conns.insert(id.0, node);
    }

    pub(crate) fn step(&self, id: StepId) -> EngineResult<&StepNode> {
        self.steps
            .get(&id.0)
            .ok_or_else(|| EngineError::invalid_argument("step", "unknown step"))
    }

    pub(crate) fn step_mut(&mut self, id: StepId) -> EngineResult<&mut StepNode> {
        self.steps
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::invalid_argument("step", "unknown step"))
    }

    pub(crate) fn conn(&self, id: ConnId) -> EngineResult<&ConnNode> {
        self.conns
            .get(&id.0)
            .ok_or_else(|| EngineError::invalid_argument("connection", "unknown connection"))
    }

    // ---- attach / detach --------------------------------------------------

    /// Checks that `step` can take another outbound connection on `port`.
    pub(crate) fn ensure_outbound_free(&self, step: StepId, port: i32) -> EngineResult<()> {
        let node = self.step(step)?;
        match &node.kind {
            StepKind::Work { .. } | StepKind::Nop | StepKind::Filtered { .. } => {
                if node.outbound.is_empty() {
                    Ok(())
                } else {
                    Err(EngineError::invalid_operation(
                        "outbound point of the step is already connected",
                    ))
                }
            }
            StepKind::BinaryDecision { slots, .. } => {
                if slots[usize::from(port != 0)].is_some() {
                    Err(EngineError::invalid_operation(
                        "outbound point required by the step is already connected",
                    ))
                } else {
                    Ok(())
                }
            }
            StepKind::Decision { table, .. } => {
                if table.contains_key(&port) {
                    Err(EngineError::invalid_operation(
                        "outbound point required by the step is already connected",
                    ))
                } else {
                    Ok(())
                }
            }
            StepKind::Barrier { kind, .. } => match kind {
                BarrierKind::Finish => Err(EngineError::invalid_operation(
                    "finish step cannot have outbound connections",
                )),
                BarrierKind::Transition => {
                    if node.outbound.is_empty() {
                        Ok(())
                    } else {
                        Err(EngineError::invalid_operation(
                            "transition barrier already has an outgoing group",
                        ))
                    }
                }
                BarrierKind::Start | BarrierKind::Interior => Ok(()),
            },
        }
    }

    /// Checks that `step` can take another inbound connection.
    pub(crate) fn ensure_inbound_free(&self, step: StepId) -> EngineResult<()> {
        let node = self.step(step)?;
        if let StepKind::Barrier {
            kind: BarrierKind::Start,
            ..
        } = node.kind
        {
            return Err(EngineError::invalid_operation(
                "start step cannot have inbound connections",
            ));
        }
        Ok(())
    }

    /// Records an inserted connection on both endpoints. Validation must have
    /// happened already.
    pub(crate) fn attach(&mut self, id: ConnId) -> EngineResult<()> {
        let (from, to, port) = {
            let conn = self.conn(id)?;
            (conn.from, conn.to, conn.port)
        };
        {
            let node = self.step_mut(from)?;
            node.outbound.insert(id);
            match &mut node.kind {
                StepKind::BinaryDecision { slots, .. } => {
                    slots[usize::from(port != 0)] = Some(id);
                }
                StepKind::Decision { table, .. } => {
                    table.insert(port, id);
                }
                _ => {}
            }
        }
        self.step_mut(to)?.inbound.insert(id);
        Ok(())
    }

    /// Removes a connection from both endpoints and from the side table.
    pub(crate) fn detach(&mut self, id: ConnId) -> EngineResult<()> {
        let (from, to, port) = {
            let conn = self.conn(id)?;
            (conn.from, conn.to, conn.port)
        };
        if let Ok(node) = self.step_mut(from) {
            node.outbound.remove(&id);
            match &mut node.kind {
                StepKind::BinaryDecision { slots, .. } => {
                    let slot = usize::from(port != 0);
                    if slots[slot] == Some(id) {
                        slots[slot] = None;
                    }
                }
                StepKind::Decision { table, .. } => {
                    if table.get(&port) == Some(&id) {
                        table.remove(&port);
                    }
                }
                _ => {}
            }
        }
        if let Ok(node) = self.step_mut(to) {
            node.inbound.remove(&id);
        }
        self.conns.remove(&id.0);
        Ok(())
    }

    /// Moves a flow-edge connection to a new port, migrating decision slots.
    pub(crate) fn set_conn_port(&mut self, id: ConnId, port: i32) -> EngineResult<()> {
        let (from, old_port, is_edge) = {
            let conn = self.conn(id)?;
            (conn.from, conn.port, matches!(conn.kind, ConnKind::FlowEdge))
        };
        if !is_edge {
            return Err(EngineError::invalid_operation(
                "cannot change the connection ID of this connection type",
            ));
        }
        if old_port == port {
            return Ok(());
        }
        {
            let node = self.step_mut(from)?;
            match &mut node.kind {
                StepKind::BinaryDecision { slots, .. } => {
                    let old_slot = usize::from(old_port != 0);
                    let new_slot = usize::from(port != 0);
                    if old_slot != new_slot {
                        if slots[new_slot].is_some() {
                            return Err(EngineError::invalid_operation(
                                "outbound point required by the step is already connected",
                            ));
                        }
                        slots[new_slot] = slots[old_slot].take();
                    }
                }
                StepKind::Decision { table, .. } => {
                    if table.contains_key(&port) {
                        return Err(EngineError::invalid_operation(
                            "outbound point required by the step is already connected",
                        ));
                    }
                    if let Some(conn) = table.remove(&old_port) {
                        table.insert(port, conn);
                    }
                }
                _ => {}
            }
        }
        if let Some(conn) = self.conns.get_mut(&id.0) {
            conn.port = port;
        }
        Ok(())
    }

    // ---- traversal --------------------------------------------------------

    /// Behaviour snapshot for one step, cloned so user code runs unlocked.
    pub(crate) fn step_exec(&self, id: StepId) -> Option<StepExec> {
        let node = self.steps.get(&id.0)?;
        Some(match &node.kind {
            StepKind::Work { action } => StepExec::Work {
                action: Arc::clone(action),
            },
            StepKind::Nop => StepExec::Nop,
            StepKind::Filtered {
                action,
                filter,
                sync_on_exit,
            } => StepExec::Filtered {
                action: Arc::clone(action),
                filter: Arc::clone(filter),
                sync_on_exit: *sync_on_exit,
            },
            StepKind::BinaryDecision { action, .. } | StepKind::Decision { action, .. } => {
                StepExec::Decision {
                    action: Arc::clone(action),
                }
            }
            StepKind::Barrier { kind, .. } => match kind {
                BarrierKind::Transition => StepExec::Transition,
                _ => StepExec::WorkflowBarrier,
            },
        })
    }

    /// The step a branch moves to after `id`, given its last decision.
    pub(crate) fn next_step(&self, id: StepId, last_decision: i32) -> Option<StepId> {
        let node = self.steps.get(&id.0)?;
        let conn = match &node.kind {
            StepKind::Work { .. } | StepKind::Nop | StepKind::Filtered { .. } => {
                node.outbound.iter().next().copied()
            }
            StepKind::BinaryDecision { slots, .. } => slots[usize::from(last_decision != 0)],
            StepKind::Decision { table, .. } => table.get(&last_decision).copied(),
            StepKind::Barrier { .. } => None,
        }?;
        self.conns.get(&conn.0).map(|conn| conn.to)
    }

    // ---- groups and barriers ----------------------------------------------

    pub(crate) fn group_arc(&self, id: ConnId) -> EngineResult<Arc<BranchGroup>> {
        self.conn(id)?
            .group()
            .cloned()
            .ok_or_else(|| EngineError::invalid_argument("connection", "not a branch group"))
    }

    /// The branch group whose flow owns `step`, if any.
    pub(crate) fn owner_group(&self, step: StepId) -> Option<ConnId> {
        match self.steps.get(&step.0)?.flow {
            super::step::FlowRef::Group(id) => Some(id),
            super::step::FlowRef::Workflow => None,
        }
    }

    /// Destination barrier of a branch-group connection.
    pub(crate) fn group_sink(&self, id: ConnId) -> Option<StepId> {
        let conn = self.conns.get(&id.0)?;
        conn.is_group().then_some(conn.to)
    }

    /// Number of branch groups feeding into a barrier step.
    pub(crate) fn inbound_group_count(&self, step: StepId) -> usize {
        self.steps.get(&step.0).map_or(0, |node| {
            node.inbound
                .iter()
                .filter(|id| self.conns.get(&id.0).is_some_and(ConnNode::is_group))
                .count()
        })
    }

    /// All groups leaving a barrier step.
    pub(crate) fn outbound_groups(&self, step: StepId) -> Vec<Arc<BranchGroup>> {
        self.steps.get(&step.0).map_or_else(Vec::new, |node| {
            node.outbound
                .iter()
                .filter_map(|id| self.conns.get(&id.0).and_then(ConnNode::group).cloned())
                .collect()
        })
    }

    /// Target step of the transition leaving a transition barrier.
    pub(crate) fn transition_target(&self, step: StepId) -> Option<StepId> {
        let node = self.steps.get(&step.0)?;
        node.outbound.iter().find_map(|id| {
            let conn = self.conns.get(&id.0)?;
            conn.is_transition().then_some(conn.to)
        })
    }

    pub(crate) fn is_transition_step(&self, step: StepId) -> bool {
        self.steps.get(&step.0).is_some_and(|node| {
            matches!(
                node.kind,
                StepKind::Barrier {
                    kind: BarrierKind::Transition,
                    ..
                }
            )
        })
    }

    pub(crate) fn barrier_hits(&self, step: StepId) -> Option<(Arc<std::sync::atomic::AtomicUsize>, BarrierKind)> {
        let node = self.steps.get(&step.0)?;
        match &node.kind {
            StepKind::Barrier { kind, hits } => Some((Arc::clone(hits), *kind)),
            _ => None,
        }
    }

    /// All branch-group connection IDs, in insertion order.
    pub(crate) fn group_ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.is_group())
            .map(|(id, _)| ConnId(*id))
            .collect();
        ids.sort();
        ids
    }

    /// All transition connection IDs.
    pub(crate) fn transition_ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| conn.is_transition())
            .map(|(id, _)| ConnId(*id))
            .collect();
        ids.sort();
        ids
    }

    /// IDs of the steps belonging to a group's flow.
    pub(crate) fn flow_steps(&self, group: ConnId) -> Vec<StepId> {
        self.steps
            .iter()
            .filter(|(_, node)| node.flow == super::step::FlowRef::Group(group))
            .map(|(id, _)| StepId(*id))
            .collect()
    }

    // ---- transition compatibility -----------------------------------------

    /// True when `b` is downstream of `a` through branch-group edges: some
    /// barrier path leads from `a`'s destination to `b`'s source. Edges in
    /// `ignore` are treated as absent.
    fn downstream(&self, a: ConnId, b: ConnId, ignore: &[ConnId]) -> bool {
        let (Some(a_conn), Some(b_conn)) = (self.conns.get(&a.0), self.conns.get(&b.0)) else {
            return false;
        };
        let target = b_conn.from;
        if a_conn.to == target {
            return true;
        }
        let mut queue = VecDeque::from([a_conn.to]);
        let mut visited = HashSet::from([a_conn.to]);
        while let Some(barrier) = queue.pop_front() {
            let Some(node) = self.steps.get(&barrier.0) else {
                continue;
            };
            for conn_id in &node.outbound {
                if ignore.contains(conn_id) {
                    continue;
                }
                let Some(conn) = self.conns.get(&conn_id.0) else {
                    continue;
                };
                if !conn.is_group() {
                    continue;
                }
                if conn.to == target {
                    return true;
                }
                if visited.insert(conn.to) {
                    queue.push_back(conn.to);
                }
            }
        }
        false
    }

    /// Two groups can exchange teams when one is reachable from the other
    /// through branch-group edges (or they are the same group).
    pub(crate) fn groups_compatible(&self, a: ConnId, b: ConnId, ignore: &[ConnId]) -> bool {
        a == b || self.downstream(a, b, ignore) || self.downstream(b, a, ignore)
    }

    /// Whether every transition stays legal with the `ignore` edges removed.
    pub(crate) fn transitions_valid(&self, ignore: &[ConnId]) -> bool {
        for id in self.transition_ids() {
            let Ok(conn) = self.conn(id) else {
                continue;
            };
            let (Some(a), Some(b)) = (self.owner_group(conn.from), self.owner_group(conn.to))
            else {
                return false;
            };
            if !self.groups_compatible(a, b, ignore) {
                return false;
            }
        }
        true
    }

    /// Whether any transition endpoint lives inside the given group's flow.
    pub(crate) fn group_has_transition_endpoints(&self, group: ConnId) -> bool {
        self.transition_ids().iter().any(|id| {
            self.conns.get(&id.0).is_some_and(|conn| {
                self.owner_group(conn.from) == Some(group)
                    || self.owner_group(conn.to) == Some(group)
            })
        })
    }

    /// Removes a group's flow: every step bound to it and their edges.
    pub(crate) fn remove_group_flow(&mut self, group: ConnId) {
        for step in self.flow_steps(group) {
            let conn_ids: Vec<ConnId> = {
                let Ok(node) = self.step(step) else { continue };
                node.inbound.iter().chain(node.outbound.iter()).copied().collect()
            };
            for conn in conn_ids {
                let _ = self.detach(conn);
            }
            self.steps.remove(&step.0);
        }
    }

    /// Removes a step from the arena. Connections must be gone already.
    pub(crate) fn remove_step(&mut self, step: StepId) {
        self.steps.remove(&step.0);
    }
}
