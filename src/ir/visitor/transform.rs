//! Functional rebuild: callbacks return replacement nodes, or `None` to delete.

use std::sync::Arc;

use tracing::{debug, trace};

use super::hooks::with_node_variants;
use super::{forwarded_children, recurse, ContextStack, Traversal};
use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{NodeKind, NodeRef};

macro_rules! transform_callbacks {
    ($(
        $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
            $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
        }
    )*) => {
        $(
            fn $cpre(&mut self, node: NodeRef) -> Result<Option<NodeRef>> {
                self.preorder_node(node)
            }
            fn $cpost(&mut self, node: NodeRef) -> Result<Option<NodeRef>> {
                self.postorder_node(node)
            }
            fn $crev(&mut self, original: &NodeRef, result: Option<&NodeRef>) -> Result<()> {
                self.revisit_node(original, result)
            }
            $(
                fn $pre(&mut self, node: NodeRef) -> Result<Option<NodeRef>> {
                    self.$cpre(node)
                }
                fn $post(&mut self, node: NodeRef) -> Result<Option<NodeRef>> {
                    self.$cpost(node)
                }
                fn $rev(&mut self, original: &NodeRef, result: Option<&NodeRef>) -> Result<()> {
                    self.$crev(original, result)
                }
            )*
        )*
    };
}

macro_rules! transform_dispatch {
    ($(
        $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
            $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
        }
    )*) => {
        fn dispatch_preorder<V: Transform + ?Sized>(v: &mut V, node: NodeRef) -> Result<Option<NodeRef>> {
            trace!(hook = "preorder", node = %node);
            match node.kind() {
                $( $( NodeKind::$variant => v.$pre(node), )* )*
            }
        }

        fn dispatch_postorder<V: Transform + ?Sized>(v: &mut V, node: NodeRef) -> Result<Option<NodeRef>> {
            trace!(hook = "postorder", node = %node);
            match node.kind() {
                $( $( NodeKind::$variant => v.$post(node), )* )*
            }
        }

        fn dispatch_revisit<V: Transform + ?Sized>(
            v: &mut V,
            original: &NodeRef,
            result: Option<&NodeRef>,
        ) -> Result<()> {
            trace!(hook = "revisit", node = %original);
            match original.kind() {
                $( $( NodeKind::$variant => v.$rev(original, result), )* )*
            }
        }
    };
}

with_node_variants!(transform_dispatch);

/// A rewriting pass.
///
/// Preorder may return the node unchanged, a replacement, or `None` to delete
/// it. Pruning in preorder skips both the children and postorder. Not cycle
/// aware: reaching a node that is still in progress is a loop fault.
pub trait Transform {
    fn traversal(&mut self) -> &mut Traversal;

    fn traversal_ref(&self) -> &Traversal;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn preorder_node(&mut self, node: NodeRef) -> Result<Option<NodeRef>> {
        Ok(Some(node))
    }

    fn postorder_node(&mut self, node: NodeRef) -> Result<Option<NodeRef>> {
        Ok(Some(node))
    }

    fn revisit_node(&mut self, _original: &NodeRef, _result: Option<&NodeRef>) -> Result<()> {
        Ok(())
    }

    with_node_variants!(transform_callbacks);

    fn init_apply(&mut self, _root: &NodeRef) -> Result<()> {
        Ok(())
    }

    fn end_apply(&mut self, _result: Option<&NodeRef>) -> Result<()> {
        Ok(())
    }

    /// Visits every child and rebuilds `node` when any result differs by identity.
    fn visit_children(&mut self, node: NodeRef) -> Result<NodeRef> {
        let mut updates = Vec::new();
        for child in node.children() {
            match self.visit(child.node, child.label)? {
                Some(result) if Arc::ptr_eq(&result, child.node) => {}
                result => updates.push((child.index, result)),
            }
        }
        if updates.is_empty() {
            return Ok(node);
        }
        self.traversal().stats.clones += 1;
        rebuild(&node, &updates)
    }

    fn visit(&mut self, node: &NodeRef, label: &'static str) -> Result<Option<NodeRef>> {
        visit_node(self, node, label)
    }

    /// Runs the pass; `None` when the root itself was deleted.
    fn apply(&mut self, root: &NodeRef) -> Result<Option<NodeRef>> {
        apply(self, root)
    }

    fn prune(&mut self) {
        self.traversal().prune();
    }

    fn visit_again(&mut self) {
        self.traversal().visit_again();
    }

    fn visit_once(&mut self) {
        self.traversal().visit_once();
    }

    fn context(&self) -> &ContextStack {
        self.traversal_ref().context()
    }
}

/// Copy of `node` with child updates applied by flattened index.
pub fn rebuild(node: &NodeRef, updates: &[(usize, Option<NodeRef>)]) -> Result<NodeRef> {
    let mut rebuilt = (**node).clone();
    rebuilt
        .replace_children(updates)
        .map_err(|label| FaultKind::RequiredChild { node: node.to_string(), label })?;
    Ok(Arc::new(rebuilt))
}

fn visit_node<V: Transform + ?Sized>(v: &mut V, node: &NodeRef, label: &'static str) -> Result<Option<NodeRef>> {
    recurse(|| {
        let pruned = v.traversal().take_prune();
        let result = v.traversal().enter(node, label).and_then(|()| {
            let result = transform_entered(v, node).map_err(|err| v.traversal_ref().fault(err));
            v.traversal().leave();
            result
        });
        v.traversal().prune = pruned;
        result
    })
}

fn transform_entered<V: Transform + ?Sized>(v: &mut V, node: &NodeRef) -> Result<Option<NodeRef>> {
    let traversal = v.traversal();
    if traversal.tracker.done(node) {
        traversal.stats.revisited += 1;
        let result = traversal.tracker.result(node);
        dispatch_revisit(v, node, result.as_ref())?;
        return Ok(result);
    }
    let visit_once = traversal.config.visit_dag_once;
    traversal.tracker.start(node, visit_once)?;
    traversal.stats.visited += 1;

    let mut working = Arc::clone(node);
    if traversal.config.forward_children {
        let updates = forwarded_children(&traversal.tracker, node);
        if !updates.is_empty() {
            traversal.stats.clones += 1;
            working = rebuild(node, &updates)?;
            traversal.context.set_current(&working);
        }
    }

    let mut extra = None;
    let result = match dispatch_preorder(v, Arc::clone(&working))? {
        None => None,
        Some(replacement) => {
            let traversal = v.traversal();
            let mut current = Some(Arc::clone(&replacement));
            if !Arc::ptr_eq(&replacement, &working) && !Arc::ptr_eq(&replacement, node) {
                traversal.context.set_current(&replacement);
                if traversal.tracker.done(&replacement) {
                    current = traversal.tracker.result(&replacement);
                    traversal.prune = true;
                } else {
                    traversal.tracker.start(&replacement, visit_once)?;
                    extra = Some(Arc::clone(&replacement));
                }
            }
            match current {
                Some(current) if !traversal.prune => {
                    let rebuilt = v.visit_children(Arc::clone(&current))?;
                    match dispatch_postorder(v, rebuilt)? {
                        Some(post) if !Arc::ptr_eq(&post, &current) && *post == *current => Some(current),
                        post => post,
                    }
                }
                current => current,
            }
        }
    };

    let tracker = &mut v.traversal().tracker;
    let changed = tracker.finish(node, result.clone())?;
    if let Some(extra) = extra {
        tracker.finish(&extra, result.clone())?;
    }
    Ok(if changed { result } else { Some(Arc::clone(node)) })
}

fn apply<V: Transform + ?Sized>(v: &mut V, root: &NodeRef) -> Result<Option<NodeRef>> {
    v.traversal().reset();
    match run(v, root) {
        Ok(result) => {
            v.traversal_ref().log_finished(v.name());
            Ok(result)
        }
        Err(err) => {
            debug!(pass = v.name(), error = %err, "apply aborted");
            v.traversal().reset();
            Err(err)
        }
    }
}

fn run<V: Transform + ?Sized>(v: &mut V, root: &NodeRef) -> Result<Option<NodeRef>> {
    v.init_apply(root)?;
    let result = v.visit(root, "root")?;
    v.end_apply(result.as_ref())?;
    Ok(result)
}
