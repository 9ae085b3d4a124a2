//! Read-only traversal, optionally joining flows at control-flow join points.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use super::hooks::with_node_variants;
use super::{recurse, ContextStack, Traversal};
use crate::config::TraversalConfig;
use crate::ir::control_flow::{
    self, Arrival, FlowState, JoinFlows, JoinPoints, PendingItem, SetupJoinPoints, StructuralEdges,
};
use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{NodeKind, NodeRef};

/// Traversal state plus the flow state threaded through the pass.
#[derive(Debug)]
pub struct InspectorState<F: FlowState = ()> {
    pub traversal: Traversal,
    pub flow: F,
    pub(crate) joins: Option<JoinFlows<F>>,
}

impl<F: FlowState + Default> InspectorState<F> {
    pub fn new(config: TraversalConfig) -> Self {
        InspectorState::with_flow(config, F::default())
    }
}

impl<F: FlowState> InspectorState<F> {
    pub fn with_flow(config: TraversalConfig, flow: F) -> Self {
        InspectorState { traversal: Traversal::new(config), flow, joins: None }
    }

    /// Join points of the current or last `apply`, when flows are joined.
    /// Kept after a fault so the arrivals behind it can be inspected.
    pub fn join_points(&self) -> Option<&JoinPoints> {
        self.joins.as_ref().map(JoinFlows::points)
    }
}

impl<F: FlowState + Default> Default for InspectorState<F> {
    fn default() -> Self {
        InspectorState::new(TraversalConfig::default())
    }
}

macro_rules! inspector_callbacks {
    ($(
        $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
            $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
        }
    )*) => {
        $(
            #[doc = concat!("Preorder fallback for ", stringify!($category), " variants.")]
            fn $cpre(&mut self, node: &NodeRef) -> Result<bool> {
                self.preorder_node(node)
            }
            fn $cpost(&mut self, node: &NodeRef) -> Result<()> {
                self.postorder_node(node)
            }
            fn $crev(&mut self, node: &NodeRef) -> Result<()> {
                self.revisit_node(node)
            }
            fn $clrev(&mut self, node: &NodeRef) -> Result<()> {
                self.loop_revisit_node(node)
            }
            $(
                #[doc = concat!("Called before the children of a `", stringify!($variant), "`; `false` skips them and the postorder.")]
                fn $pre(&mut self, node: &NodeRef) -> Result<bool> {
                    self.$cpre(node)
                }
                fn $post(&mut self, node: &NodeRef) -> Result<()> {
                    self.$cpost(node)
                }
                fn $rev(&mut self, node: &NodeRef) -> Result<()> {
                    self.$crev(node)
                }
                fn $lrev(&mut self, node: &NodeRef) -> Result<()> {
                    self.$clrev(node)
                }
            )*
        )*
    };
}

macro_rules! inspector_dispatch {
    ($(
        $category:ident ($cpre:ident $cpost:ident $crev:ident $clrev:ident) {
            $( $variant:ident ($pre:ident $post:ident $rev:ident $lrev:ident) )*
        }
    )*) => {
        fn dispatch_preorder<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef) -> Result<bool> {
            trace!(hook = "preorder", node = %node);
            match node.kind() {
                $( $( NodeKind::$variant => v.$pre(node), )* )*
            }
        }

        fn dispatch_postorder<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef) -> Result<()> {
            trace!(hook = "postorder", node = %node);
            match node.kind() {
                $( $( NodeKind::$variant => v.$post(node), )* )*
            }
        }

        fn dispatch_revisit<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef) -> Result<()> {
            trace!(hook = "revisit", node = %node);
            match node.kind() {
                $( $( NodeKind::$variant => v.$rev(node), )* )*
            }
        }

        fn dispatch_loop_revisit<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef) -> Result<()> {
            trace!(hook = "loop_revisit", node = %node);
            match node.kind() {
                $( $( NodeKind::$variant => v.$lrev(node), )* )*
            }
        }
    };
}

with_node_variants!(inspector_dispatch);

/// A read-only pass.
///
/// Override the most specific callbacks the pass cares about; everything else
/// falls back to the variant's category and then to the `*_node` callbacks.
pub trait Inspector {
    type Flow: FlowState;

    fn state(&mut self) -> &mut InspectorState<Self::Flow>;

    fn state_ref(&self) -> &InspectorState<Self::Flow>;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn preorder_node(&mut self, _node: &NodeRef) -> Result<bool> {
        Ok(true)
    }

    fn postorder_node(&mut self, _node: &NodeRef) -> Result<()> {
        Ok(())
    }

    /// Called instead of preorder when a finished node is reached again.
    fn revisit_node(&mut self, _node: &NodeRef) -> Result<()> {
        Ok(())
    }

    /// Called when a node is reached along a loop edge. Passes that are not
    /// cycle aware fault here.
    fn loop_revisit_node(&mut self, node: &NodeRef) -> Result<()> {
        Err(FaultKind::Loop(node.to_string()).into())
    }

    with_node_variants!(inspector_callbacks);

    fn init_apply(&mut self, _root: &NodeRef) -> Result<()> {
        Ok(())
    }

    fn end_apply(&mut self, _root: &NodeRef) -> Result<()> {
        Ok(())
    }

    /// Discovers join points before the main pass. Must follow the same edges
    /// the main pass visits.
    fn setup_join_points(&mut self, root: &NodeRef) -> Result<JoinPoints> {
        let max_depth = self.state_ref().traversal.config().max_depth;
        SetupJoinPoints::new(StructuralEdges, max_depth).run(root)
    }

    /// Returning `true` at the first arrival opts `node` out of join handling.
    fn filter_join_point(&mut self, _node: &NodeRef) -> Result<bool> {
        Ok(false)
    }

    /// Observes an arrival deferred until the join point's last predecessor.
    fn on_defer(&mut self, _item: &PendingItem<Self::Flow>) -> Result<()> {
        Ok(())
    }

    /// Observes the merge of all arrivals at a join point, just before descent.
    fn on_merge(&mut self, _node: &NodeRef, _arrivals: usize) -> Result<()> {
        Ok(())
    }

    fn visit_children(&mut self, node: &NodeRef) -> Result<()> {
        for child in node.children() {
            self.visit(child.node, child.label)?;
        }
        Ok(())
    }

    fn visit(&mut self, node: &NodeRef, label: &'static str) -> Result<()> {
        visit_node(self, node, label)
    }

    /// Visits `nodes` as independent branches, each starting from the current
    /// flow state, and continues with the merge of their results.
    fn parallel_visit(&mut self, nodes: &[NodeRef], label: &'static str) -> Result<()> {
        parallel_visit(self, nodes, label)
    }

    fn apply(&mut self, root: &NodeRef) -> Result<()> {
        apply(self, root)
    }

    fn prune(&mut self) {
        self.state().traversal.prune();
    }

    fn visit_again(&mut self) {
        self.state().traversal.visit_again();
    }

    fn visit_once(&mut self) {
        self.state().traversal.visit_once();
    }

    fn context(&self) -> &ContextStack {
        self.state_ref().traversal.context()
    }
}

fn visit_node<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef, label: &'static str) -> Result<()> {
    recurse(|| {
        let pruned = v.state().traversal.take_prune();
        let result = visit_arrival(v, node, label);
        v.state().traversal.prune = pruned;
        result
    })
}

fn visit_arrival<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef, label: &'static str) -> Result<()> {
    v.state().traversal.context.label_child(label);
    let arrival = control_flow::arrive(v, node).map_err(|err| v.state_ref().traversal.fault(err))?;
    match arrival {
        Arrival::Deferred => {
            v.state().traversal.context.skip_child();
            return Ok(());
        }
        Arrival::Loop => {
            v.state().traversal.enter(node, label)?;
            let result = dispatch_loop_revisit(v, node).map_err(|err| v.state_ref().traversal.fault(err));
            v.state().traversal.leave();
            return result;
        }
        Arrival::Proceed => {}
    }

    v.state().traversal.enter(node, label)?;
    let result = visit_entered(v, node).map_err(|err| v.state_ref().traversal.fault(err));
    v.state().traversal.leave();
    result
}

fn visit_entered<V: Inspector + ?Sized>(v: &mut V, node: &NodeRef) -> Result<()> {
    let traversal = &mut v.state().traversal;
    if traversal.tracker.busy(node) {
        return dispatch_loop_revisit(v, node);
    }
    if traversal.tracker.done(node) {
        traversal.stats.revisited += 1;
        return dispatch_revisit(v, node);
    }
    let visit_once = traversal.config.visit_dag_once;
    traversal.tracker.start(node, visit_once)?;
    traversal.stats.visited += 1;

    if dispatch_preorder(v, node)? && !v.state_ref().traversal.prune {
        v.visit_children(node)?;
        dispatch_postorder(v, node)?;
    }
    v.state().traversal.tracker.finish(node, Some(Arc::clone(node)))?;
    Ok(())
}

fn parallel_visit<V: Inspector + ?Sized>(v: &mut V, nodes: &[NodeRef], label: &'static str) -> Result<()> {
    let state = v.state();
    let context = state.traversal.context.snapshot();
    let mut branches: VecDeque<PendingItem<V::Flow>> = nodes
        .iter()
        .map(|node| PendingItem {
            context: context.clone(),
            node: Arc::clone(node),
            state: state.flow.duplicate(),
        })
        .collect();

    let mut merged: Option<V::Flow> = None;
    while let Some(branch) = branches.pop_front() {
        let entry = std::mem::replace(&mut v.state().flow, branch.state);
        let visited = v.visit(&branch.node, label);
        let outcome = std::mem::replace(&mut v.state().flow, entry);
        visited?;
        merged = Some(match merged.take() {
            Some(mut merged) => {
                merged.merge(outcome)?;
                merged
            }
            None => outcome,
        });
    }
    if let Some(merged) = merged {
        v.state().flow = merged;
    }
    Ok(())
}

fn apply<V: Inspector + ?Sized>(v: &mut V, root: &NodeRef) -> Result<()> {
    let state = v.state();
    state.traversal.reset();
    state.joins = None;

    match run(v, root) {
        Ok(()) => {
            v.state_ref().traversal.log_finished(v.name());
            Ok(())
        }
        Err(err) => {
            debug!(pass = v.name(), error = %err, "apply aborted");
            v.state().traversal.reset();
            Err(err)
        }
    }
}

fn run<V: Inspector + ?Sized>(v: &mut V, root: &NodeRef) -> Result<()> {
    if v.state_ref().traversal.config.join_flows {
        let points = v.setup_join_points(root)?;
        v.state().joins = Some(JoinFlows::new(points));
    }
    v.init_apply(root)?;
    v.visit(root, "root")?;
    if let Some(joins) = &v.state_ref().joins {
        joins.verify()?;
    }
    v.end_apply(root)
}
