//! Connections between steps

use std::sync::Arc;

use super::group::BranchGroup;
use super::StepId;

/// Connection variants.
#[derive(Clone)]
pub(crate) enum ConnKind {
    /// Edge between two steps of the same branch-group flow.
    FlowEdge,
    /// Branch group: joins two workflow barriers and owns a team of branches
    /// plus the inner flow they execute.
    Group(Arc<BranchGroup>),
    /// Branch-group transition: joins a transition barrier inside one group's
    /// flow to a step inside a compatible group's flow.
    Transition,
}

/// Side-table record for a connection.
pub(crate) struct ConnNode {
    /// Connection ID within the source step: 0 for the default edge, nonzero
    /// ports select decision outcomes.
    pub(crate) port: i32,
    pub(crate) kind: ConnKind,
    pub(crate) from: StepId,
    pub(crate) to: StepId,
}

impl ConnNode {
    pub(crate) fn group(&self) -> Option<&Arc<BranchGroup>> {
        match &self.kind {
            ConnKind::Group(group) => Some(group),
            _ => None,
        }
    }

    pub(crate) fn is_group(&self) -> bool {
        matches!(self.kind, ConnKind::Group(_))
    }

    pub(crate) fn is_transition(&self) -> bool {
        matches!(self.kind, ConnKind::Transition)
    }
}
