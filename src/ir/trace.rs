//! Control-flow trace of a parser state machine.
//!
//! [`FlowTrace`] walks the states reachable from `start`, carrying the set of
//! states seen along each path. Each state steps directly to the states its
//! transition names, exploring select cases as parallel branches. A state
//! reached from several predecessors is entered once with the union of their
//! arrivals, and back edges are reported as loops.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::config::TraversalConfig;
use crate::ir::control_flow::{
    transition_targets, FlowState, JoinPoints, PendingItem, SetupJoinPoints, StateMachineEdges,
};
use crate::ir::error::Result;
use crate::ir::node::{NodeKind, NodeRef};
use crate::ir::resolve::{ReferenceResolver, StateResolver};
use crate::ir::visitor::{Inspector, InspectorState};

/// Names of the states on some path to the current point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachingStates(BTreeSet<String>);

impl ReachingStates {
    pub fn contains(&self, state: &str) -> bool {
        self.0.contains(state)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FlowState for ReachingStates {
    fn duplicate(&self) -> Self {
        self.clone()
    }

    fn merge(&mut self, other: Self) -> Result<()> {
        self.0.extend(other.0);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// First descent into a state, with the states that reach it.
    Enter { state: String, reaching: Vec<String> },
    /// A finished state reached again along a forward edge.
    Revisit { state: String },
    /// A state reached along a back edge.
    Loop { state: String, from: String },
    /// An early arrival at a join point, parked until the last one.
    Defer { state: String, from: String },
    Merge { state: String, arrivals: usize },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Enter { state, reaching } => write!(f, "enter {} <- [{}]", state, reaching.join(", ")),
            TraceEvent::Revisit { state } => write!(f, "revisit {}", state),
            TraceEvent::Loop { state, from } => write!(f, "loop {} -> {}", from, state),
            TraceEvent::Defer { state, from } => write!(f, "defer {} -> {}", from, state),
            TraceEvent::Merge { state, arrivals } => write!(f, "merge {} ({} arrivals)", state, arrivals),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub state: String,
    pub incoming: usize,
}

/// Serializable summary of one traced parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceReport {
    pub parser: String,
    pub join_points: Vec<JoinReport>,
    pub loop_edges: usize,
    pub events: Vec<TraceEvent>,
}

/// Join-aware inspector over one parser's state machine.
#[derive(Debug)]
pub struct FlowTrace {
    state: InspectorState<ReachingStates>,
    resolver: StateResolver,
    parser: String,
    events: Vec<TraceEvent>,
}

fn state_name(node: &NodeRef) -> String {
    node.name().unwrap_or_default().to_string()
}

impl FlowTrace {
    /// Join handling is always on; the rest of `config` is honored as given.
    pub fn new(parser: &NodeRef, config: TraversalConfig) -> Result<Self> {
        Ok(FlowTrace {
            state: InspectorState::new(config.with_join_flows()),
            resolver: StateResolver::for_parser(parser)?,
            parser: state_name(parser),
            events: Vec::new(),
        })
    }

    /// Traces `parser` in one call.
    pub fn run(parser: &NodeRef, config: TraversalConfig) -> Result<Self> {
        let mut trace = FlowTrace::new(parser, config)?;
        trace.apply(parser)?;
        Ok(trace)
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn join_points(&self) -> Option<&JoinPoints> {
        self.state.join_points()
    }

    /// Flow state at the end of the last trace: every state on some path.
    pub fn reaching(&self) -> &ReachingStates {
        &self.state.flow
    }

    pub fn report(&self) -> TraceReport {
        let (join_points, loop_edges) = match self.join_points() {
            Some(points) => (
                points
                    .joins()
                    .into_iter()
                    .map(|join| JoinReport { state: state_name(&join.node), incoming: join.incoming })
                    .collect(),
                points.loop_edge_count(),
            ),
            None => (Vec::new(), 0),
        };
        TraceReport { parser: self.parser.clone(), join_points, loop_edges, events: self.events.clone() }
    }

    /// State whose transition is being followed.
    fn enclosing_state(&self) -> String {
        self.context()
            .find(NodeKind::ParserState)
            .map(|frame| state_name(&frame.node))
            .unwrap_or_default()
    }
}

impl Inspector for FlowTrace {
    type Flow = ReachingStates;

    fn state(&mut self) -> &mut InspectorState<ReachingStates> {
        &mut self.state
    }

    fn state_ref(&self) -> &InspectorState<ReachingStates> {
        &self.state
    }

    fn init_apply(&mut self, _root: &NodeRef) -> Result<()> {
        self.events.clear();
        self.state.flow = ReachingStates::default();
        Ok(())
    }

    fn setup_join_points(&mut self, root: &NodeRef) -> Result<JoinPoints> {
        let max_depth = self.state.traversal.config().max_depth;
        SetupJoinPoints::new(StateMachineEdges::new(&self.resolver), max_depth).run(root)
    }

    fn preorder_parser(&mut self, _node: &NodeRef) -> Result<bool> {
        let start = self.resolver.resolve_name("start")?;
        self.visit(&start, "start")?;
        Ok(false)
    }

    fn preorder_parser_state(&mut self, node: &NodeRef) -> Result<bool> {
        let state = state_name(node);
        self.events.push(TraceEvent::Enter { state: state.clone(), reaching: self.state.flow.names() });
        self.state.flow.0.insert(state);
        let targets = transition_targets(&self.resolver, node)?;
        self.parallel_visit(&targets, "transition")?;
        Ok(false)
    }

    fn revisit_parser_state(&mut self, node: &NodeRef) -> Result<()> {
        self.events.push(TraceEvent::Revisit { state: state_name(node) });
        Ok(())
    }

    fn loop_revisit_parser_state(&mut self, node: &NodeRef) -> Result<()> {
        let from = self.enclosing_state();
        self.events.push(TraceEvent::Loop { state: state_name(node), from });
        Ok(())
    }

    fn on_defer(&mut self, item: &PendingItem<ReachingStates>) -> Result<()> {
        let from = item
            .context
            .iter()
            .rev()
            .find(|frame| frame.node.kind() == NodeKind::ParserState)
            .map(|frame| state_name(&frame.node))
            .unwrap_or_default();
        self.events.push(TraceEvent::Defer { state: state_name(&item.node), from });
        Ok(())
    }

    fn on_merge(&mut self, node: &NodeRef, arrivals: usize) -> Result<()> {
        self.events.push(TraceEvent::Merge { state: state_name(node), arrivals });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ir::builder::Builder;

    fn events(trace: &FlowTrace) -> Vec<String> {
        trace.events().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_linear_parser() {
        let b = Builder::new();
        let parser = b.parser(
            "p",
            vec![
                b.state("start", vec![], Some(b.path("next"))),
                b.state("next", vec![], Some(b.path("accept"))),
            ],
        );
        let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();
        assert_eq!(events(&trace), vec!["enter start <- []", "enter next <- [start]", "enter accept <- [next, start]"]);
        assert_eq!(trace.join_points().unwrap().join_count(), 0);
    }

    #[test]
    fn test_select_branches_join_once() {
        let b = Builder::new();
        let parser = b.parser(
            "p",
            vec![
                b.state(
                    "start",
                    vec![],
                    Some(b.select(
                        vec![b.dotted("hdr.eth.type")],
                        vec![b.select_case(b.constant(1), "a"), b.select_case(b.wildcard(), "b")],
                    )),
                ),
                b.state("a", vec![], Some(b.path("c"))),
                b.state("b", vec![], Some(b.path("c"))),
                b.state("c", vec![], Some(b.path("accept"))),
            ],
        );
        let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();
        assert_eq!(
            events(&trace),
            vec![
                "enter start <- []",
                "enter a <- [start]",
                "defer a -> c",
                "enter b <- [start]",
                "merge c (2 arrivals)",
                "enter c <- [a, b, start]",
                "enter accept <- [a, b, c, start]",
            ]
        );
        let report = trace.report();
        assert_eq!(report.join_points, vec![JoinReport { state: "c".to_string(), incoming: 2 }]);
        assert_eq!(report.loop_edges, 0);
        assert!(trace.reaching().contains("accept"));
    }

    #[test]
    fn test_shared_transition_expression_still_joins() {
        let b = Builder::new();
        let to_c = b.path("c");
        let parser = b.parser(
            "p",
            vec![
                b.state(
                    "start",
                    vec![],
                    Some(b.select(
                        vec![b.dotted("hdr.eth.type")],
                        vec![b.select_case(b.constant(1), "a"), b.select_case(b.wildcard(), "b")],
                    )),
                ),
                b.state("a", vec![], Some(Arc::clone(&to_c))),
                b.state("b", vec![], Some(to_c)),
                b.state("c", vec![], Some(b.path("accept"))),
            ],
        );
        let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();
        assert_eq!(
            events(&trace),
            vec![
                "enter start <- []",
                "enter a <- [start]",
                "defer a -> c",
                "enter b <- [start]",
                "merge c (2 arrivals)",
                "enter c <- [a, b, start]",
                "enter accept <- [a, b, c, start]",
            ]
        );
        assert_eq!(trace.report().join_points, vec![JoinReport { state: "c".to_string(), incoming: 2 }]);
    }

    #[test]
    fn test_self_loop_is_reported_not_descended() {
        let b = Builder::new();
        let parser = b.parser(
            "p",
            vec![b.state(
                "start",
                vec![],
                Some(b.select(
                    vec![b.path("more")],
                    vec![b.select_case(b.constant(1), "start"), b.select_case(b.wildcard(), "accept")],
                )),
            )],
        );
        let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();
        assert_eq!(
            events(&trace),
            vec!["enter start <- []", "loop start -> start", "enter accept <- [start]"]
        );
        assert_eq!(trace.report().loop_edges, 1);
    }

    #[test]
    fn test_unknown_state_is_a_fault() {
        let b = Builder::new();
        let parser = b.parser("p", vec![b.state("start", vec![], Some(b.path("missing")))]);
        let err = FlowTrace::run(&parser, TraversalConfig::default()).unwrap_err();
        assert!(matches!(err.kind, crate::ir::error::FaultKind::Unresolved(_)));
    }
}
