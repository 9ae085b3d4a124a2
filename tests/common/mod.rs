#![allow(dead_code)]

pub mod generator;

use std::sync::Arc;

use rustc_hash::FxHashSet;

use irwalk::ir::builder::Builder;
use irwalk::ir::node::{NodeId, NodeRef};

pub fn init_logging() {
    let _ = irwalk::logging::init_logger(false, Some("warn"), false);
}

/// Distinct node allocations reachable from `root`.
pub fn unique_nodes(root: &NodeRef) -> usize {
    let mut seen = FxHashSet::default();
    let mut stack = vec![Arc::clone(root)];
    while let Some(node) = stack.pop() {
        if seen.insert(NodeId::of(&node)) {
            stack.extend(node.children().into_iter().map(|child| Arc::clone(child.node)));
        }
    }
    seen.len()
}

/// Child edges out of every distinct node, plus the root arrival.
pub fn arrivals(root: &NodeRef) -> usize {
    let mut seen = FxHashSet::default();
    let mut stack = vec![Arc::clone(root)];
    let mut edges = 1;
    while let Some(node) = stack.pop() {
        if seen.insert(NodeId::of(&node)) {
            let children = node.children();
            edges += children.len();
            stack.extend(children.into_iter().map(|child| Arc::clone(child.node)));
        }
    }
    edges
}

/// `start` selects between `a` and `b`, which both continue at `c`.
pub fn diamond_parser(b: &Builder) -> NodeRef {
    b.parser(
        "diamond",
        vec![
            b.state(
                "start",
                vec![],
                Some(b.select(
                    vec![b.dotted("hdr.eth.type")],
                    vec![b.select_case(b.constant(0x800), "a"), b.select_case(b.wildcard(), "b")],
                )),
            ),
            b.state("a", vec![], Some(b.path("c"))),
            b.state("b", vec![], Some(b.path("c"))),
            b.state("c", vec![], Some(b.path("accept"))),
        ],
    )
}

/// `start` fans out to `targets`, each of which continues at `d`.
pub fn fan_in_parser(b: &Builder, targets: &[&str]) -> NodeRef {
    let cases = targets
        .iter()
        .enumerate()
        .map(|(key, target)| b.select_case(b.constant(key as i64), target))
        .collect();
    let mut states = vec![b.state("start", vec![], Some(b.select(vec![b.path("tag")], cases)))];
    let mut sorted: Vec<&str> = targets.to_vec();
    sorted.sort_unstable();
    for target in sorted {
        states.push(b.state(target, vec![], Some(b.path("d"))));
    }
    states.push(b.state("d", vec![], Some(b.path("accept"))));
    b.parser("fan_in", states)
}
