pub mod common;

use std::sync::Arc;

use irwalk::config::TraversalConfig;
use irwalk::ir::builder::Builder;
use irwalk::ir::control_flow::{
    transition_targets, JoinPoints, PendingItem, SetupJoinPoints, StateMachineEdges,
};
use irwalk::ir::error::{FaultKind, Result};
use irwalk::ir::node::{BinaryOp, NodeRef};
use irwalk::ir::resolve::{ReferenceResolver, StateResolver};
use irwalk::ir::trace::{FlowTrace, TraceEvent};
use irwalk::ir::visitor::{Inspector, InspectorState};

use crate::common::{diamond_parser, fan_in_parser, init_logging};

fn enters(trace: &FlowTrace, state: &str) -> Vec<Vec<String>> {
    trace
        .events()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Enter { state: entered, reaching } if entered == state => Some(reaching.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_join_point_is_entered_once_with_merged_flow() {
    init_logging();
    let b = Builder::new();
    let parser = diamond_parser(&b);
    let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();

    let points = trace.join_points().unwrap();
    assert_eq!(points.join_count(), 1);
    assert_eq!(points.joins()[0].node.name(), Some("c"));
    assert_eq!(points.joins()[0].incoming, 2);
    assert_eq!(enters(&trace, "c"), vec![vec!["a", "b", "start"]]);
}

#[test]
fn test_parallel_branches_start_from_the_same_state() {
    let b = Builder::new();
    let parser = diamond_parser(&b);
    let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();

    assert_eq!(enters(&trace, "a"), vec![vec!["start"]]);
    assert_eq!(enters(&trace, "b"), vec![vec!["start"]]);
}

#[test]
fn test_three_way_merge_is_order_independent() {
    let orders: [&[&str]; 3] = [&["a", "b", "c"], &["c", "a", "b"], &["b", "c", "a"]];
    for order in orders {
        let b = Builder::new();
        let parser = fan_in_parser(&b, order);
        let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();

        assert_eq!(enters(&trace, "d"), vec![vec!["a", "b", "c", "start"]], "order {:?}", order);
        let defers = trace.events().iter().filter(|event| matches!(event, TraceEvent::Defer { .. })).count();
        assert_eq!(defers, 2);
        assert!(trace.events().contains(&TraceEvent::Merge { state: "d".to_string(), arrivals: 3 }));
    }
}

/// Follows parser transitions with plain sequential visits and no loop handling.
struct Follow {
    state: InspectorState,
    resolver: StateResolver,
    entered: Vec<String>,
}

impl Follow {
    fn new(parser: &NodeRef) -> Self {
        Follow {
            state: InspectorState::new(TraversalConfig::default().with_join_flows()),
            resolver: StateResolver::for_parser(parser).unwrap(),
            entered: Vec::new(),
        }
    }
}

impl Inspector for Follow {
    type Flow = ();

    fn state(&mut self) -> &mut InspectorState {
        &mut self.state
    }

    fn state_ref(&self) -> &InspectorState {
        &self.state
    }

    fn setup_join_points(&mut self, root: &NodeRef) -> Result<JoinPoints> {
        SetupJoinPoints::new(StateMachineEdges::new(&self.resolver), 64).run(root)
    }

    fn preorder_parser(&mut self, _node: &NodeRef) -> Result<bool> {
        let start = self.resolver.resolve_name("start")?;
        self.visit(&start, "start")?;
        Ok(false)
    }

    fn preorder_parser_state(&mut self, node: &NodeRef) -> Result<bool> {
        self.entered.push(node.name().unwrap_or_default().to_string());
        for target in transition_targets(&self.resolver, node)? {
            self.visit(&target, "transition")?;
        }
        Ok(false)
    }
}

#[test]
fn test_sequential_visits_also_join() {
    let b = Builder::new();
    let parser = diamond_parser(&b);
    let mut follow = Follow::new(&parser);
    follow.apply(&parser).unwrap();
    assert_eq!(follow.entered, vec!["start", "a", "b", "c", "accept"]);
}

#[test]
fn test_states_sharing_a_transition_expression_join() {
    let b = Builder::new();
    let to_c = b.path("c");
    let parser = b.parser(
        "shared",
        vec![
            b.state(
                "start",
                vec![],
                Some(b.select(
                    vec![b.path("tag")],
                    vec![b.select_case(b.constant(1), "a"), b.select_case(b.wildcard(), "b")],
                )),
            ),
            b.state("a", vec![], Some(Arc::clone(&to_c))),
            b.state("b", vec![], Some(to_c)),
            b.state("c", vec![], Some(b.path("accept"))),
        ],
    );
    let resolver = StateResolver::for_parser(&parser).unwrap();
    let points = SetupJoinPoints::new(StateMachineEdges::new(&resolver), 64).run(&parser).unwrap();
    assert_eq!(points.join_count(), 1);
    assert_eq!(points.joins()[0].node.name(), Some("c"));
    assert_eq!(points.loop_edge_count(), 0);

    let trace = FlowTrace::run(&parser, TraversalConfig::default()).unwrap();
    assert_eq!(enters(&trace, "c"), vec![vec!["a", "b", "start"]]);

    let mut follow = Follow::new(&parser);
    follow.apply(&parser).unwrap();
    assert_eq!(follow.entered, vec!["start", "a", "b", "c", "accept"]);
}

#[test]
fn test_loop_without_loop_revisit_is_a_fault() {
    let b = Builder::new();
    let parser = b.parser(
        "spin",
        vec![b.state(
            "start",
            vec![],
            Some(b.select(
                vec![b.path("more")],
                vec![b.select_case(b.constant(1), "start"), b.select_case(b.wildcard(), "accept")],
            )),
        )],
    );
    let mut follow = Follow::new(&parser);
    let err = follow.apply(&parser).unwrap_err();
    assert_eq!(err.kind, FaultKind::Loop("ParserState start".to_string()));
    assert!(err.context.starts_with("Parser spin > start[0]: ParserState start"));
}

/// Structural join-point bookkeeping over a shared expression.
#[derive(Default)]
struct Joins {
    state: InspectorState,
    prune_left: Vec<&'static str>,
    filter: bool,
    revisit_after: Option<NodeRef>,
    defers: usize,
    merges: Vec<usize>,
    binaries: usize,
}

impl Joins {
    fn flowing() -> Self {
        Joins { state: InspectorState::new(TraversalConfig::default().with_join_flows()), ..Joins::default() }
    }
}

impl Inspector for Joins {
    type Flow = ();

    fn state(&mut self) -> &mut InspectorState {
        &mut self.state
    }

    fn state_ref(&self) -> &InspectorState {
        &self.state
    }

    fn preorder_assign(&mut self, node: &NodeRef) -> Result<bool> {
        let left = node.children()[0].node.name().unwrap_or_default().to_string();
        Ok(!self.prune_left.iter().any(|pruned| *pruned == left))
    }

    fn preorder_binary(&mut self, _node: &NodeRef) -> Result<bool> {
        self.binaries += 1;
        Ok(true)
    }

    fn postorder_block(&mut self, _node: &NodeRef) -> Result<()> {
        if let Some(node) = self.revisit_after.take() {
            self.visit(&node, "extra")?;
        }
        Ok(())
    }

    fn filter_join_point(&mut self, _node: &NodeRef) -> Result<bool> {
        Ok(self.filter)
    }

    fn on_defer(&mut self, _item: &PendingItem<()>) -> Result<()> {
        self.defers += 1;
        Ok(())
    }

    fn on_merge(&mut self, _node: &NodeRef, arrivals: usize) -> Result<()> {
        self.merges.push(arrivals);
        Ok(())
    }
}

fn shared_operand(b: &Builder) -> (NodeRef, NodeRef) {
    let shared = b.binary(BinaryOp::Add, b.path("a"), b.constant(1));
    let root = b.block(vec![b.assign(b.path("x"), Arc::clone(&shared)), b.assign(b.path("y"), Arc::clone(&shared))]);
    (root, shared)
}

#[test]
fn test_shared_subtree_is_a_structural_join() {
    let b = Builder::new();
    let (root, _) = shared_operand(&b);
    let mut joins = Joins::flowing();
    joins.apply(&root).unwrap();

    assert_eq!(joins.defers, 1);
    assert_eq!(joins.merges, vec![2]);
    assert_eq!(joins.binaries, 1);
    assert_eq!(joins.state.traversal.stats().revisited, 0);
    assert_eq!(joins.state.join_points().unwrap().join_count(), 1);
}

#[test]
fn test_filtered_join_point_is_revisited() {
    let b = Builder::new();
    let (root, _) = shared_operand(&b);
    let mut joins = Joins { filter: true, ..Joins::flowing() };
    joins.apply(&root).unwrap();

    assert_eq!(joins.defers, 0);
    assert!(joins.merges.is_empty());
    assert_eq!(joins.binaries, 1);
    assert_eq!(joins.state.traversal.stats().revisited, 1);
}

#[test]
fn test_arrival_after_merge_is_a_mismatch() {
    let b = Builder::new();
    let (root, shared) = shared_operand(&b);
    let mut joins = Joins { revisit_after: Some(shared), ..Joins::flowing() };
    let err = joins.apply(&root).unwrap_err();
    assert_eq!(err.kind, FaultKind::ArrivalMismatch { node: "Binary +".to_string(), expected: 2, actual: 3 });
}

#[test]
fn test_missing_arrivals_are_reported() {
    let b = Builder::new();
    let (root, _) = shared_operand(&b);

    let mut partial = Joins { prune_left: vec!["y"], ..Joins::flowing() };
    let err = partial.apply(&root).unwrap_err();
    assert_eq!(err.kind, FaultKind::ArrivalMismatch { node: "Binary +".to_string(), expected: 2, actual: 1 });

    let mut none = Joins { prune_left: vec!["x", "y"], ..Joins::flowing() };
    let err = none.apply(&root).unwrap_err();
    assert_eq!(err.kind, FaultKind::JoinNeverReached { node: "Binary +".to_string(), expected: 2 });
    let points = none.state.join_points().unwrap();
    assert_eq!(points.join_count(), 1);
    assert_eq!(points.joins()[0].incoming, 2);
}
