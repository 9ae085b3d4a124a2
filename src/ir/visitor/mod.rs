//! Visitor disciplines over the IR graph.
//!
//! * [`Inspector`] reads the graph; the only discipline that tolerates cycles
//!   (through `loop_revisit`) and joins flows at control-flow join points.
//! * [`Modifier`] mutates copy-on-write through [`CowNode`], preserving the
//!   identity of every untouched subtree.
//! * [`Transform`] rebuilds functionally and may replace or delete nodes.
//!
//! Each discipline memoizes by node identity in a [`ChangeTracker`] private to
//! the pass instance, so a shared subtree is processed once per `apply`.

pub mod context;
pub mod cow;
pub(crate) mod hooks;
pub mod inspector;
pub mod modifier;
pub mod tracker;
pub mod transform;

use std::sync::Arc;

use tracing::debug;

/// Stack that must remain before one more level of traversal recursion.
const STACK_RED_ZONE: usize = 128 * 1024;
/// Size of each stack segment allocated when the red zone is reached.
const STACK_SEGMENT: usize = 4 * 1024 * 1024;

/// Runs one level of traversal recursion on a stack that is grown on demand,
/// so any depth below `max_depth` is reachable from a small thread stack.
pub(crate) fn recurse<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, f)
}

pub use context::{ContextFrame, ContextStack};
pub use cow::{CowNode, Field};
pub use inspector::{Inspector, InspectorState};
pub use modifier::Modifier;
pub use tracker::{ChangeTracker, VisitRecord};
pub use transform::Transform;

use crate::config::TraversalConfig;
use crate::ir::error::{Result, TraversalError};
use crate::ir::node::{Node, NodeRef};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalStats {
    /// Nodes whose callbacks ran.
    pub visited: usize,
    /// Arrivals answered from the memo table.
    pub revisited: usize,
    /// Nodes cloned to install a change.
    pub clones: usize,
}

/// State every discipline carries for one pass instance.
#[derive(Debug)]
pub struct Traversal {
    pub(crate) tracker: ChangeTracker,
    pub(crate) context: ContextStack,
    pub(crate) config: TraversalConfig,
    pub(crate) prune: bool,
    pub(crate) stats: TraversalStats,
}

impl Traversal {
    pub fn new(config: TraversalConfig) -> Self {
        Traversal {
            tracker: ChangeTracker::new(),
            context: ContextStack::new(config.max_depth),
            config,
            prune: false,
            stats: TraversalStats::default(),
        }
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    pub fn context(&self) -> &ContextStack {
        &self.context
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn stats(&self) -> TraversalStats {
        self.stats
    }

    /// Skips the children and postorder of the node being visited. Idempotent.
    pub fn prune(&mut self) {
        self.prune = true;
    }

    /// Lets the current node be visited again when reached from another parent.
    pub fn visit_again(&mut self) {
        self.set_visit_once(false);
    }

    pub fn visit_once(&mut self) {
        self.set_visit_once(true);
    }

    fn set_visit_once(&mut self, once: bool) {
        let Some(frame) = self.context.current() else {
            return;
        };
        let original = Arc::clone(&frame.original);
        if let Some(flag) = self.tracker.visit_once_mut(&original) {
            *flag = once;
        }
    }

    /// Allows completed nodes to be traversed again within this pass.
    pub fn forget_finished(&mut self) {
        self.tracker.forget_finished();
    }

    pub(crate) fn reset(&mut self) {
        self.tracker.clear();
        self.context.clear();
        self.prune = false;
        self.stats = TraversalStats::default();
    }

    /// Clears the prune flag for a nested visit and returns the caller's value.
    pub(crate) fn take_prune(&mut self) -> bool {
        std::mem::take(&mut self.prune)
    }

    pub(crate) fn enter(&mut self, node: &NodeRef, label: &'static str) -> Result<()> {
        self.context.label_child(label);
        self.context.push(node).map_err(|err| self.fault(err))
    }

    pub(crate) fn leave(&mut self) {
        self.context.pop();
    }

    /// Attaches the current path to a fault raised at this depth.
    pub(crate) fn fault(&self, err: TraversalError) -> TraversalError {
        err.or_context(|| self.context.path())
    }

    pub(crate) fn log_finished(&self, pass: &str) {
        debug!(
            pass,
            visited = self.stats.visited,
            revisited = self.stats.revisited,
            clones = self.stats.clones,
            "apply finished"
        );
    }
}

impl Default for Traversal {
    fn default() -> Self {
        Traversal::new(TraversalConfig::default())
    }
}

/// Children of `node` already completed in this pass whose recorded result differs by identity.
pub(crate) fn forwarded_children(tracker: &ChangeTracker, node: &Node) -> Vec<(usize, Option<NodeRef>)> {
    node.children()
        .into_iter()
        .filter(|child| tracker.done(child.node))
        .filter_map(|child| match tracker.result(child.node) {
            Some(result) if Arc::ptr_eq(&result, child.node) => None,
            result => Some((child.index, result)),
        })
        .collect()
}
