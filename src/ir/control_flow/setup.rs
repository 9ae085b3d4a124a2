use std::sync::Arc;

use tracing::{debug, trace};

use super::JoinPoints;
use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{Node, NodeRef};
use crate::ir::resolve::ReferenceResolver;
use crate::ir::visitor::{recurse, ChangeTracker, ContextStack};

/// The successor relation a control-flow traversal follows.
pub trait FlowEdges {
    /// Labelled successors of `node`, which is the current frame of `context`.
    fn successors(&self, node: &NodeRef, context: &ContextStack) -> Result<Vec<(&'static str, NodeRef)>>;

    /// Whether repeated arrivals at `node` make it a join point.
    fn counts_as_join(&self, _node: &NodeRef) -> bool {
        true
    }
}

fn structural_successors(node: &NodeRef) -> Vec<(&'static str, NodeRef)> {
    node.children()
        .into_iter()
        .map(|child| (child.label, Arc::clone(child.node)))
        .collect()
}

/// Plain child references in declared order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralEdges;

impl FlowEdges for StructuralEdges {
    fn successors(&self, node: &NodeRef, _context: &ContextStack) -> Result<Vec<(&'static str, NodeRef)>> {
        Ok(structural_successors(node))
    }
}

/// Parser state machines: a parser enters its `start` state and each state
/// leads straight to the states its transition names, so an edge runs from
/// state to state even when several states share one target expression. Only
/// states count as join points, and the built-in `accept`/`reject` states
/// never do.
#[derive(Debug, Clone)]
pub struct StateMachineEdges<R> {
    resolver: R,
}

impl<R: ReferenceResolver> StateMachineEdges<R> {
    pub fn new(resolver: R) -> Self {
        StateMachineEdges { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }
}

/// States a parser state's transition leads to, in case order.
pub fn transition_targets<R: ReferenceResolver + ?Sized>(resolver: &R, state: &NodeRef) -> Result<Vec<NodeRef>> {
    let Node::ParserState { transition: Some(transition), .. } = &**state else {
        return Ok(Vec::new());
    };
    match &**transition {
        Node::Select { cases, .. } => cases
            .iter()
            .map(|case| match &**case {
                Node::SelectCase { state, .. } => resolver.resolve(state),
                other => Err(FaultKind::Unresolved(format!("select case {other}")).into()),
            })
            .collect(),
        _ => Ok(vec![resolver.resolve(transition)?]),
    }
}

pub fn is_builtin_state(node: &Node) -> bool {
    matches!(node, Node::ParserState { name, components, .. }
        if (name == "accept" || name == "reject") && components.is_empty())
}

impl<R: ReferenceResolver> FlowEdges for StateMachineEdges<R> {
    fn successors(&self, node: &NodeRef, _context: &ContextStack) -> Result<Vec<(&'static str, NodeRef)>> {
        match &**node {
            Node::Parser { .. } => Ok(vec![("start", self.resolver.resolve_name("start")?)]),
            Node::ParserState { .. } => Ok(transition_targets(&self.resolver, node)?
                .into_iter()
                .map(|target| ("transition", target))
                .collect()),
            _ => Ok(structural_successors(node)),
        }
    }

    fn counts_as_join(&self, node: &NodeRef) -> bool {
        matches!(**node, Node::ParserState { .. }) && !is_builtin_state(node)
    }
}

/// Read-only discovery of join points and loop edges.
#[derive(Debug)]
pub struct SetupJoinPoints<E> {
    edges: E,
    tracker: ChangeTracker,
    context: ContextStack,
    points: JoinPoints,
}

impl<E: FlowEdges> SetupJoinPoints<E> {
    pub fn new(edges: E, max_depth: usize) -> Self {
        SetupJoinPoints {
            edges,
            tracker: ChangeTracker::new(),
            context: ContextStack::new(max_depth),
            points: JoinPoints::default(),
        }
    }

    pub fn run(mut self, root: &NodeRef) -> Result<JoinPoints> {
        self.walk(root, "root")
            .map_err(|err| err.or_context(|| self.context.path()))?;
        debug!(
            reached = self.points.reached(),
            join_points = self.points.join_count(),
            loop_edges = self.points.loop_edge_count(),
            "join points discovered"
        );
        Ok(self.points)
    }

    fn walk(&mut self, node: &NodeRef, label: &'static str) -> Result<()> {
        recurse(|| self.walk_edge(node, label))
    }

    fn walk_edge(&mut self, node: &NodeRef, label: &'static str) -> Result<()> {
        self.context.label_child(label);
        if self.tracker.busy(node) {
            if let Some(from) = self.context.current() {
                trace!(from = %from.node, to = %node, "loop edge");
                self.points.add_loop_edge(&from.node, node);
            }
            self.context.skip_child();
            return Ok(());
        }
        if self.tracker.done(node) {
            if self.edges.counts_as_join(node) {
                self.points.add_arrival(node);
            }
            self.context.skip_child();
            return Ok(());
        }

        self.points.first_arrival(node);
        self.context.push(node)?;
        self.tracker.start(node, true)?;
        for (label, successor) in self.edges.successors(node, &self.context)? {
            self.walk(&successor, label)?;
        }
        self.tracker.finish(node, Some(Arc::clone(node)))?;
        self.context.pop();
        Ok(())
    }
}
