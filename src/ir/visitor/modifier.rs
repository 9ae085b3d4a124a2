//! In-place style mutation over copy-on-write nodes.

use std::sync::Arc;

use tracing::{debug, trace};

use super::hooks::with_node_variants;
use super::{forwarded_children, recurse, ContextStack, CowNode, Traversal};
use crate::ir::error::Result;
use crate::ir::node::{NodeKind, NodeRef};

macro_rules! modifier_callbacks {
    ($(
        $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
            $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
        }
    )*) => {
        $(
            fn $cpre(&mut self, node: &mut CowNode) -> Result<bool> {
                self.preorder_node(node)
            }
            fn $cpost(&mut self, node: &mut CowNode) -> Result<()> {
                self.postorder_node(node)
            }
            fn $crev(&mut self, original: &NodeRef, result: &NodeRef) -> Result<()> {
                self.revisit_node(original, result)
            }
            $(
                fn $pre(&mut self, node: &mut CowNode) -> Result<bool> {
                    self.$cpre(node)
                }
                fn $post(&mut self, node: &mut CowNode) -> Result<()> {
                    self.$cpost(node)
                }
                fn $rev(&mut self, original: &NodeRef, result: &NodeRef) -> Result<()> {
                    self.$crev(original, result)
                }
            )*
        )*
    };
}

macro_rules! modifier_dispatch {
    ($(
        $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
            $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
        }
    )*) => {
        fn dispatch_preorder<V: Modifier + ?Sized>(v: &mut V, node: &mut CowNode) -> Result<bool> {
            trace!(hook = "preorder", node = %node.get());
            match node.get().kind() {
                $( $( NodeKind::$variant => v.$pre(node), )* )*
            }
        }

        fn dispatch_postorder<V: Modifier + ?Sized>(v: &mut V, node: &mut CowNode) -> Result<()> {
            trace!(hook = "postorder", node = %node.get());
            match node.get().kind() {
                $( $( NodeKind::$variant => v.$post(node), )* )*
            }
        }

        fn dispatch_revisit<V: Modifier + ?Sized>(v: &mut V, original: &NodeRef, result: &NodeRef) -> Result<()> {
            trace!(hook = "revisit", node = %original);
            match original.kind() {
                $( $( NodeKind::$variant => v.$rev(original, result), )* )*
            }
        }
    };
}

with_node_variants!(modifier_dispatch);

/// A mutating pass that writes through [`CowNode`].
///
/// Nodes are cloned only when a write changes a value or a child was
/// rewritten, so an untouched subtree keeps its identity. A preorder that
/// returns `false` or prunes skips both the children and the postorder. Not
/// cycle aware: reaching a node that is still in progress is a loop fault.
pub trait Modifier {
    fn traversal(&mut self) -> &mut Traversal;

    fn traversal_ref(&self) -> &Traversal;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn preorder_node(&mut self, _node: &mut CowNode) -> Result<bool> {
        Ok(true)
    }

    fn postorder_node(&mut self, _node: &mut CowNode) -> Result<()> {
        Ok(())
    }

    /// Called when a finished node is reached again; `result` is what its visit produced.
    fn revisit_node(&mut self, _original: &NodeRef, _result: &NodeRef) -> Result<()> {
        Ok(())
    }

    with_node_variants!(modifier_callbacks);

    fn init_apply(&mut self, _root: &NodeRef) -> Result<()> {
        Ok(())
    }

    fn end_apply(&mut self, _result: &NodeRef) -> Result<()> {
        Ok(())
    }

    /// Visits every child and installs the ones whose result changed identity.
    fn visit_children(&mut self, node: &mut CowNode) -> Result<()> {
        let children: Vec<_> = node
            .get()
            .children()
            .into_iter()
            .map(|child| (child.index, child.label, Arc::clone(child.node)))
            .collect();
        let mut updates = Vec::new();
        for (index, label, child) in children {
            let result = self.visit(&child, label)?;
            if !Arc::ptr_eq(&result, &child) {
                updates.push((index, Some(result)));
            }
        }
        node.install_children(&updates)
    }

    fn visit(&mut self, node: &NodeRef, label: &'static str) -> Result<NodeRef> {
        visit_node(self, node, label)
    }

    fn apply(&mut self, root: &NodeRef) -> Result<NodeRef> {
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

fn visit_node<V: Modifier + ?Sized>(v: &mut V, node: &NodeRef, label: &'static str) -> Result<NodeRef> {
    recurse(|| {
        let pruned = v.traversal().take_prune();
        let result = v.traversal().enter(node, label).and_then(|()| {
            let result = modify_entered(v, node).map_err(|err| v.traversal_ref().fault(err));
            v.traversal().leave();
            result
        });
        v.traversal().prune = pruned;
        result
    })
}

fn modify_entered<V: Modifier + ?Sized>(v: &mut V, node: &NodeRef) -> Result<NodeRef> {
    let traversal = v.traversal();
    if traversal.tracker.done(node) {
        traversal.stats.revisited += 1;
        let result = traversal.tracker.result(node).unwrap_or_else(|| Arc::clone(node));
        dispatch_revisit(v, node, &result)?;
        return Ok(result);
    }
    let visit_once = traversal.config.visit_dag_once;
    traversal.tracker.start(node, visit_once)?;
    traversal.stats.visited += 1;

    let mut cow = CowNode::new(Arc::clone(node));
    if traversal.config.forward_children {
        cow.install_children(&forwarded_children(&traversal.tracker, node))?;
    }

    if dispatch_preorder(v, &mut cow)? && !v.traversal_ref().prune {
        v.visit_children(&mut cow)?;
        dispatch_postorder(v, &mut cow)?;
    }

    let (result, cloned) = cow.commit();
    let traversal = v.traversal();
    if cloned {
        traversal.stats.clones += 1;
    }
    if traversal.tracker.finish(node, Some(Arc::clone(&result)))? {
        Ok(result)
    } else {
        Ok(Arc::clone(node))
    }
}

fn apply<V: Modifier + ?Sized>(v: &mut V, root: &NodeRef) -> Result<NodeRef> {
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

fn run<V: Modifier + ?Sized>(v: &mut V, root: &NodeRef) -> Result<NodeRef> {
    v.init_apply(root)?;
    let result = v.visit(root, "root")?;
    v.end_apply(&result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field;
    use crate::ir::builder::Builder;
    use crate::ir::node::Node;

    /// Renames every path expression `from` to `to`.
    struct Rename {
        traversal: Traversal,
        from: &'static str,
        to: &'static str,
    }

    impl Rename {
        fn new(from: &'static str, to: &'static str) -> Self {
            Rename { traversal: Traversal::default(), from, to }
        }
    }

    impl Modifier for Rename {
        fn traversal(&mut self) -> &mut Traversal {
            &mut self.traversal
        }

        fn traversal_ref(&self) -> &Traversal {
            &self.traversal
        }

        fn postorder_path_expr(&mut self, node: &mut CowNode) -> Result<()> {
            let name = field!(PathExpr.name);
            if node.read(&name)? == self.from {
                node.set(&name, self.to.to_string())?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_untouched_tree_keeps_identity() {
        let b = Builder::new();
        let root = b.block(vec![b.assign(b.path("x"), b.constant(1))]);
        let mut pass = Rename::new("nope", "y");
        let result = pass.apply(&root).unwrap();
        assert!(Arc::ptr_eq(&result, &root));
        assert_eq!(pass.traversal.stats().clones, 0);
    }

    #[test]
    fn test_change_bubbles_along_path_only() {
        let b = Builder::new();
        let untouched = b.assign(b.path("z"), b.constant(2));
        let root = b.block(vec![b.assign(b.path("x"), b.constant(1)), untouched.clone()]);
        let mut pass = Rename::new("x", "y");
        let result = pass.apply(&root).unwrap();

        assert!(!Arc::ptr_eq(&result, &root));
        assert_eq!(pass.traversal.stats().clones, 3);
        let Node::Block { statements, .. } = &*result else { panic!("expected block") };
        assert!(Arc::ptr_eq(&statements[1], &untouched));
        assert!(matches!(&*statements[0], Node::Assign { left, .. } if left.name() == Some("y")));
    }

    #[test]
    fn test_shared_child_is_rewritten_once() {
        let b = Builder::new();
        let shared = b.path("x");
        let root = b.block(vec![b.assign(shared.clone(), b.constant(1)), b.assign(b.path("w"), shared.clone())]);
        let mut pass = Rename::new("x", "y");
        let result = pass.apply(&root).unwrap();

        let Node::Block { statements, .. } = &*result else { panic!("expected block") };
        let (Node::Assign { left, .. }, Node::Assign { right, .. }) = (&*statements[0], &*statements[1]) else {
            panic!("expected assignments")
        };
        assert!(Arc::ptr_eq(left, right));
        assert_eq!(pass.traversal.stats().revisited, 1);
    }
}
