//! Control-flow aware inspection over graphs with genuine cycles.
//!
//! A whole-graph setup pass ([`SetupJoinPoints`]) counts the incoming edges of
//! every node reachable along a [`FlowEdges`] relation and records loop edges.
//! The main inspection pass then defers each arrival at a join point until the
//! last one, merges the captured [`FlowState`]s and descends exactly once.

mod setup;

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

pub use setup::{FlowEdges, SetupJoinPoints, StateMachineEdges, StructuralEdges, is_builtin_state, transition_targets};

use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{NodeId, NodeRef};
use crate::ir::visitor::{ContextFrame, Inspector};

/// Pass-specific data threaded through a control-flow traversal.
///
/// `merge` must be commutative and associative: arrivals at a join point may
/// be combined in any order.
pub trait FlowState: Sized {
    /// Independent copy for a deferred or divergent branch.
    fn duplicate(&self) -> Self;

    fn merge(&mut self, other: Self) -> Result<()>;
}

impl FlowState for () {
    fn duplicate(&self) -> Self {}

    fn merge(&mut self, _other: Self) -> Result<()> {
        Ok(())
    }
}

/// A captured traversal continuation: where it was taken, the node it waits
/// on, and the flow state of its branch.
#[derive(Debug, Clone)]
pub struct PendingItem<F> {
    pub context: Vec<ContextFrame>,
    pub node: NodeRef,
    pub state: F,
}

impl<F> PendingItem<F> {
    /// Node whose child edge produced this item.
    pub fn origin(&self) -> Option<&NodeRef> {
        self.context.last().map(|frame| &frame.node)
    }
}

#[derive(Debug, Clone)]
pub struct JoinCount {
    pub node: NodeRef,
    pub incoming: usize,
}

/// Result of the setup pass.
#[derive(Debug, Default, Clone)]
pub struct JoinPoints {
    counts: FxHashMap<NodeId, JoinCount>,
    loop_edges: FxHashSet<(NodeId, NodeId)>,
}

impl JoinPoints {
    /// Incoming non-loop edges of `node`, if the setup pass reached it.
    pub fn incoming(&self, node: &NodeRef) -> Option<usize> {
        self.counts.get(&NodeId::of(node)).map(|count| count.incoming)
    }

    pub fn is_join(&self, node: &NodeRef) -> bool {
        self.incoming(node).is_some_and(|incoming| incoming > 1)
    }

    pub fn is_loop_edge(&self, from: &NodeRef, to: &NodeRef) -> bool {
        self.loop_edges.contains(&(NodeId::of(from), NodeId::of(to)))
    }

    /// Join points ordered by source position, then by display.
    pub fn joins(&self) -> Vec<&JoinCount> {
        let mut joins: Vec<_> = self.counts.values().filter(|count| count.incoming > 1).collect();
        joins.sort_by_key(|count| {
            let base = count.node.base();
            (base.line, base.column, count.node.to_string())
        });
        joins
    }

    pub fn join_count(&self) -> usize {
        self.counts.values().filter(|count| count.incoming > 1).count()
    }

    pub fn loop_edge_count(&self) -> usize {
        self.loop_edges.len()
    }

    /// Nodes reached by the setup pass.
    pub fn reached(&self) -> usize {
        self.counts.len()
    }

    pub(crate) fn first_arrival(&mut self, node: &NodeRef) {
        self.counts
            .insert(NodeId::of(node), JoinCount { node: Arc::clone(node), incoming: 1 });
    }

    pub(crate) fn add_arrival(&mut self, node: &NodeRef) {
        if let Some(count) = self.counts.get_mut(&NodeId::of(node)) {
            count.incoming += 1;
        }
    }

    pub(crate) fn add_loop_edge(&mut self, from: &NodeRef, to: &NodeRef) {
        self.loop_edges.insert((NodeId::of(from), NodeId::of(to)));
    }
}

#[derive(Debug)]
struct JoinArrival<F> {
    expected: usize,
    arrived: usize,
    filtered: bool,
    resumed: bool,
    pending: Vec<PendingItem<F>>,
}

/// Main-pass bookkeeping of arrivals at join points.
#[derive(Debug)]
pub struct JoinFlows<F> {
    points: JoinPoints,
    arrivals: FxHashMap<NodeId, JoinArrival<F>>,
}

impl<F> JoinFlows<F> {
    pub fn new(points: JoinPoints) -> Self {
        JoinFlows { points, arrivals: FxHashMap::default() }
    }

    pub fn points(&self) -> &JoinPoints {
        &self.points
    }

    /// Checks that every join point was reached and resumed.
    pub fn verify(&self) -> Result<()> {
        for join in self.points.joins() {
            match self.arrivals.get(&NodeId::of(&join.node)) {
                None => {
                    return Err(FaultKind::JoinNeverReached {
                        node: join.node.to_string(),
                        expected: join.incoming,
                    }
                    .into());
                }
                Some(arrival) if !arrival.filtered && arrival.arrived < arrival.expected => {
                    return Err(FaultKind::ArrivalMismatch {
                        node: join.node.to_string(),
                        expected: arrival.expected,
                        actual: arrival.arrived,
                    }
                    .into());
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// What the main pass does with an arrival at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arrival {
    Proceed,
    Deferred,
    Loop,
}

pub(crate) fn arrive<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef) -> Result<Arrival> {
    let state = v.state_ref();
    let Some(joins) = state.joins.as_ref() else {
        return Ok(Arrival::Proceed);
    };
    // Re-entry on the current path is handled by the visit itself.
    if state.traversal.tracker.busy(node) {
        return Ok(Arrival::Proceed);
    }
    if let Some(parent) = state.traversal.context.current() {
        if joins.points.is_loop_edge(&parent.node, node) {
            return Ok(Arrival::Loop);
        }
    }
    let Some(expected) = joins.points.incoming(node).filter(|incoming| *incoming > 1) else {
        return Ok(Arrival::Proceed);
    };
    let id = NodeId::of(node);
    let first = !joins.arrivals.contains_key(&id);
    let filtered = first && v.filter_join_point(node)?;

    let state = v.state();
    let Some(joins) = state.joins.as_mut() else {
        return Ok(Arrival::Proceed);
    };
    let arrival = joins.arrivals.entry(id).or_insert_with(|| JoinArrival {
        expected,
        arrived: 0,
        filtered,
        resumed: false,
        pending: Vec::new(),
    });
    if arrival.filtered {
        return Ok(Arrival::Proceed);
    }
    if arrival.resumed {
        return Err(FaultKind::ArrivalMismatch {
            node: node.to_string(),
            expected,
            actual: arrival.arrived + 1,
        }
        .into());
    }
    arrival.arrived += 1;

    if arrival.arrived < expected {
        trace!(node = %node, arrived = arrival.arrived, expected, "deferring join arrival");
        let item = PendingItem {
            context: state.traversal.context.snapshot(),
            node: Arc::clone(node),
            state: state.flow.duplicate(),
        };
        v.on_defer(&item)?;
        if let Some(arrival) = v.state().joins.as_mut().and_then(|joins| joins.arrivals.get_mut(&id)) {
            arrival.pending.push(item);
        }
        return Ok(Arrival::Deferred);
    }

    arrival.resumed = true;
    for item in std::mem::take(&mut arrival.pending) {
        state.flow.merge(item.state)?;
    }
    trace!(node = %node, arrivals = expected, "merged join arrivals");
    v.on_merge(node, expected)?;
    Ok(Arrival::Proceed)
}
