use std::sync::{Arc, Mutex};

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::Graph;
use rustc_hash::FxHashMap;
use tracing::debug;

use super::error::{FaultKind, Result, TraversalError};
use super::node::NodeRef;
use super::visitor::{Inspector, Modifier, Transform};

/// Object-safe view of an [`Inspector`] run as a pipeline stage.
pub trait InspectPass {
    fn inspect(&mut self, root: &NodeRef) -> Result<()>;
}

impl<P: Inspector> InspectPass for P {
    fn inspect(&mut self, root: &NodeRef) -> Result<()> {
        self.apply(root)
    }
}

/// Object-safe view of a [`Modifier`] run as a pipeline stage.
pub trait ModifyPass {
    fn modify(&mut self, root: &NodeRef) -> Result<NodeRef>;
}

impl<P: Modifier> ModifyPass for P {
    fn modify(&mut self, root: &NodeRef) -> Result<NodeRef> {
        self.apply(root)
    }
}

/// Object-safe view of a [`Transform`] run as a pipeline stage.
pub trait TransformPass {
    fn transform(&mut self, root: &NodeRef) -> Result<Option<NodeRef>>;
}

impl<P: Transform> TransformPass for P {
    fn transform(&mut self, root: &NodeRef) -> Result<Option<NodeRef>> {
        self.apply(root)
    }
}

/// The pass a stage runs. Passes are shared so callers can read their
/// results after the pipeline has run.
#[derive(Clone)]
pub enum StageKind {
    /// Observes the tree without changing it.
    Inspect(Arc<Mutex<dyn InspectPass + Send>>),
    /// Rewrites the tree in place, cloning only what changes.
    Modify(Arc<Mutex<dyn ModifyPass + Send>>),
    /// Rebuilds the tree from callback results.
    Transform(Arc<Mutex<dyn TransformPass + Send>>),
}

/// A single pass in the pipeline, with the stages it must run after.
#[derive(Clone)]
pub struct Stage {
    pub id: String,
    pub dependencies: Vec<String>,
    pub kind: StageKind,
}

impl Stage {
    pub fn new(id: impl Into<String>, kind: StageKind) -> Self {
        Stage { id: id.into(), dependencies: Vec::new(), kind }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// Passes organized in a dependency graph and run in topological order, so
/// every stage sees the tree produced by its prerequisites.
#[derive(Default)]
pub struct Pipeline {
    graph: Graph<Stage, ()>,
    node_indices: FxHashMap<String, NodeIndex>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    /// Adds a stage. Dependencies may be added before or after it; unknown
    /// ones are reported when the pipeline runs.
    pub fn add_stage(&mut self, stage: Stage) {
        let id = stage.id.clone();
        let dependencies = stage.dependencies.clone();
        let node = self.graph.add_node(stage);
        self.node_indices.insert(id.clone(), node);

        for dependency in &dependencies {
            if let Some(&dep_node) = self.node_indices.get(dependency) {
                self.graph.add_edge(dep_node, node, ());
            }
        }
        let dependents: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|&index| index != node && self.graph[index].dependencies.contains(&id))
            .collect();
        for dependent in dependents {
            self.graph.add_edge(node, dependent, ());
        }
    }

    pub fn remove_stage(&mut self, id: &str) {
        if let Some(node) = self.node_indices.remove(id) {
            self.graph.remove_node(node);
            // Removal moves the last node into the freed index.
            self.node_indices = self
                .graph
                .node_indices()
                .map(|index| (self.graph[index].id.clone(), index))
                .collect();
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Stage ids in the order `apply` runs them.
    pub fn order(&self) -> Result<Vec<&str>> {
        Ok(self.sorted()?.into_iter().map(|index| self.graph[index].id.as_str()).collect())
    }

    fn sorted(&self) -> Result<Vec<NodeIndex>> {
        for stage in self.graph.node_weights() {
            if let Some(missing) = stage.dependencies.iter().find(|dep| !self.node_indices.contains_key(*dep)) {
                return Err(FaultKind::UnknownDependency {
                    stage: stage.id.clone(),
                    dependency: missing.clone(),
                }
                .into());
            }
        }
        toposort(&self.graph, None)
            .map_err(|cycle| FaultKind::PipelineCycle(self.graph[cycle.node_id()].id.clone()).into())
    }

    /// Runs every stage on the output of its predecessors.
    pub fn apply(&self, tree: &NodeRef) -> Result<NodeRef> {
        let order = self.sorted()?;
        let mut current = Arc::clone(tree);
        for index in order {
            let stage = &self.graph[index];
            debug!(stage = %stage.id, "running stage");
            let poisoned = || TraversalError::bug(format!("stage `{}` is poisoned", stage.id));
            match &stage.kind {
                StageKind::Inspect(pass) => {
                    pass.lock().map_err(|_| poisoned())?.inspect(&current)?;
                }
                StageKind::Modify(pass) => {
                    current = pass.lock().map_err(|_| poisoned())?.modify(&current)?;
                }
                StageKind::Transform(pass) => {
                    current = pass
                        .lock()
                        .map_err(|_| poisoned())?
                        .transform(&current)?
                        .ok_or_else(|| TraversalError::bug(format!("stage `{}` deleted the root", stage.id)))?;
                }
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field;
    use crate::ir::builder::Builder;
    use crate::ir::node::Node;
    use crate::ir::visitor::{CowNode, InspectorState, Traversal};

    /// Renames path expressions.
    struct Rename(Traversal, &'static str, &'static str);

    impl Modifier for Rename {
        fn traversal(&mut self) -> &mut Traversal {
            &mut self.0
        }
        fn traversal_ref(&self) -> &Traversal {
            &self.0
        }
        fn postorder_path_expr(&mut self, node: &mut CowNode) -> Result<()> {
            if node.read(&field!(PathExpr.name))? == self.1 {
                node.set(&field!(PathExpr.name), self.2.to_string())?;
            }
            Ok(())
        }
    }

    /// Collects path names in visit order.
    #[derive(Default)]
    struct Names(InspectorState, Vec<String>);

    impl Inspector for Names {
        type Flow = ();
        fn state(&mut self) -> &mut InspectorState {
            &mut self.0
        }
        fn state_ref(&self) -> &InspectorState {
            &self.0
        }
        fn preorder_path_expr(&mut self, node: &NodeRef) -> Result<bool> {
            if let Node::PathExpr { name, .. } = &**node {
                self.1.push(name.clone());
            }
            Ok(true)
        }
    }

    fn rename(from: &'static str, to: &'static str) -> StageKind {
        StageKind::Modify(Arc::new(Mutex::new(Rename(Traversal::default(), from, to))))
    }

    #[test]
    fn test_stages_run_in_dependency_order() {
        let b = Builder::new();
        let root = b.block(vec![b.assign(b.path("a"), b.path("z"))]);
        let names = Arc::new(Mutex::new(Names::default()));

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Stage::new("collect", StageKind::Inspect(names.clone())).after("b-to-c"));
        pipeline.add_stage(Stage::new("b-to-c", rename("b", "c")).after("a-to-b"));
        pipeline.add_stage(Stage::new("a-to-b", rename("a", "b")));

        assert_eq!(pipeline.order().unwrap(), vec!["a-to-b", "b-to-c", "collect"]);
        let result = pipeline.apply(&root).unwrap();
        assert!(!Arc::ptr_eq(&result, &root));
        assert_eq!(names.lock().unwrap().1, vec!["c", "z"]);
    }

    #[test]
    fn test_unknown_dependency_and_cycle_are_faults() {
        let b = Builder::new();
        let root = b.block(vec![]);

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Stage::new("first", rename("a", "b")).after("missing"));
        let err = pipeline.apply(&root).unwrap_err();
        assert_eq!(
            err.kind,
            FaultKind::UnknownDependency { stage: "first".to_string(), dependency: "missing".to_string() }
        );

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Stage::new("x", rename("a", "b")).after("y"));
        pipeline.add_stage(Stage::new("y", rename("b", "a")).after("x"));
        assert!(matches!(pipeline.apply(&root).unwrap_err().kind, FaultKind::PipelineCycle(_)));
    }

    #[test]
    fn test_remove_stage_keeps_indices_consistent() {
        let b = Builder::new();
        let root = b.block(vec![b.assign(b.path("a"), b.constant(1))]);

        let mut pipeline = Pipeline::new();
        pipeline.add_stage(Stage::new("one", rename("a", "b")));
        pipeline.add_stage(Stage::new("two", rename("x", "y")));
        pipeline.add_stage(Stage::new("three", rename("b", "c")).after("one"));
        pipeline.remove_stage("one");

        assert_eq!(pipeline.len(), 2);
        assert!(matches!(pipeline.apply(&root).unwrap_err().kind, FaultKind::UnknownDependency { .. }));
        pipeline.remove_stage("three");
        assert_eq!(pipeline.order().unwrap(), vec!["two"]);
        assert!(Arc::ptr_eq(&pipeline.apply(&root).unwrap(), &root));
    }
}
