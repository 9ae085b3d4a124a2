//! Explicit stack of traversal frames mirroring the recursion.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{NodeKind, NodeRef};

/// One level of the traversal. `child_index` and `child_label` describe the
/// child of `node` currently being visited.
#[derive(Debug, Clone)]
pub struct ContextFrame {
    pub node: NodeRef,
    pub original: NodeRef,
    pub child_index: usize,
    pub child_label: &'static str,
    pub depth: usize,
}

#[derive(Debug, Clone)]
pub struct ContextStack {
    frames: Vec<ContextFrame>,
    max_depth: usize,
}

impl ContextStack {
    pub fn new(max_depth: usize) -> Self {
        ContextStack { frames: Vec::new(), max_depth }
    }

    pub(crate) fn push(&mut self, node: &NodeRef) -> Result<()> {
        if self.frames.len() >= self.max_depth {
            return Err(FaultKind::DepthExceeded { limit: self.max_depth }.into());
        }
        let depth = self.frames.len() + 1;
        self.frames.push(ContextFrame {
            node: Arc::clone(node),
            original: Arc::clone(node),
            child_index: 0,
            child_label: "",
            depth,
        });
        Ok(())
    }

    /// Pops the current frame and advances the parent to its next child.
    pub(crate) fn pop(&mut self) -> Option<ContextFrame> {
        let frame = self.frames.pop();
        self.skip_child();
        frame
    }

    pub(crate) fn label_child(&mut self, label: &'static str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.child_label = label;
        }
    }

    /// Advances past a child that was not entered.
    pub(crate) fn skip_child(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.child_index += 1;
        }
    }

    pub(crate) fn set_current(&mut self, node: &NodeRef) {
        if let Some(frame) = self.frames.last_mut() {
            frame.node = Arc::clone(node);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<ContextFrame> {
        self.frames.clone()
    }

    pub(crate) fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn current(&self) -> Option<&ContextFrame> {
        self.frames.last()
    }

    /// Frame of the node whose child is currently being visited.
    pub fn parent(&self) -> Option<&ContextFrame> {
        self.frames.len().checked_sub(2).map(|index| &self.frames[index])
    }

    /// Edge label under which the current node was reached.
    pub fn current_label(&self) -> Option<&'static str> {
        self.parent().map(|frame| frame.child_label)
    }

    /// Nearest proper ancestor of the given kind.
    pub fn find(&self, kind: NodeKind) -> Option<&ContextFrame> {
        self.frames
            .iter()
            .rev()
            .skip(1)
            .find(|frame| frame.node.kind() == kind)
    }

    pub fn find_ancestor(&self, kind: NodeKind) -> Option<&NodeRef> {
        self.find(kind).map(|frame| &frame.node)
    }

    /// Whether `node` is on the current path, as itself or as the original of a rewritten frame.
    pub fn is_in_context(&self, node: &NodeRef) -> bool {
        self.frames
            .iter()
            .any(|frame| Arc::ptr_eq(&frame.node, node) || Arc::ptr_eq(&frame.original, node))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[ContextFrame] {
        &self.frames
    }

    /// Human-readable path from the root, e.g. `Program > declarations[0]: Parser p`.
    pub fn path(&self) -> String {
        let mut path = String::new();
        for (position, frame) in self.frames.iter().enumerate() {
            if position == 0 {
                let _ = write!(path, "{}", frame.node);
            } else {
                let parent = &self.frames[position - 1];
                let _ = write!(path, " > {}[{}]: {}", parent.child_label, parent.child_index, frame.node);
            }
        }
        path
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack::new(crate::config::DEFAULT_MAX_DEPTH)
    }
}
