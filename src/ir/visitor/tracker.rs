//! Per-traversal memo table keyed by node identity.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{NodeId, NodeRef};

#[derive(Debug, Clone)]
pub struct VisitRecord {
    /// Keeps the keyed allocation alive so its identity cannot be reused mid-pass.
    pub node: NodeRef,
    pub in_progress: bool,
    pub visit_once: bool,
    /// `None` once finished with a deletion.
    pub result: Option<NodeRef>,
}

#[derive(Debug, Default)]
pub struct ChangeTracker {
    records: FxHashMap<NodeId, VisitRecord>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a visit of `node`. Re-entering a node that is still in progress is a loop.
    pub fn start(&mut self, node: &NodeRef, default_visit_once: bool) -> Result<()> {
        let record = self.records.entry(NodeId::of(node)).or_insert_with(|| VisitRecord {
            node: Arc::clone(node),
            in_progress: false,
            visit_once: default_visit_once,
            result: Some(Arc::clone(node)),
        });
        if record.in_progress {
            return Err(FaultKind::Loop(node.to_string()).into());
        }
        record.in_progress = true;
        record.visit_once = default_visit_once;
        record.result = Some(Arc::clone(node));
        Ok(())
    }

    /// Completes the visit of `original`, returning whether the node changed.
    ///
    /// A result that differs both by identity and structurally gets its own
    /// finished record so later arrivals at the rewritten node coalesce.
    pub fn finish(&mut self, original: &NodeRef, result: Option<NodeRef>) -> Result<bool> {
        let record = self
            .records
            .get_mut(&NodeId::of(original))
            .ok_or_else(|| FaultKind::TrackerCorrupted(original.to_string()))?;
        record.in_progress = false;
        let visit_once = record.visit_once;

        match result {
            None => {
                record.result = None;
                Ok(true)
            }
            Some(result) if !Arc::ptr_eq(&result, original) && *result != **original => {
                record.result = Some(Arc::clone(&result));
                self.records.entry(NodeId::of(&result)).or_insert_with(|| VisitRecord {
                    node: Arc::clone(&result),
                    in_progress: false,
                    visit_once,
                    result: Some(Arc::clone(&result)),
                });
                Ok(true)
            }
            Some(_) => {
                record.result = Some(Arc::clone(original));
                Ok(false)
            }
        }
    }

    /// Finished and flagged visit-once.
    pub fn done(&self, node: &NodeRef) -> bool {
        self.records
            .get(&NodeId::of(node))
            .is_some_and(|record| !record.in_progress && record.visit_once)
    }

    pub fn busy(&self, node: &NodeRef) -> bool {
        self.records.get(&NodeId::of(node)).is_some_and(|record| record.in_progress)
    }

    /// Recorded result of `node`; the node itself when it was never visited.
    pub fn result(&self, node: &NodeRef) -> Option<NodeRef> {
        match self.records.get(&NodeId::of(node)) {
            Some(record) => record.result.clone(),
            None => Some(Arc::clone(node)),
        }
    }

    pub fn record(&self, node: &NodeRef) -> Option<&VisitRecord> {
        self.records.get(&NodeId::of(node))
    }

    pub fn visit_once_mut(&mut self, node: &NodeRef) -> Option<&mut bool> {
        self.records.get_mut(&NodeId::of(node)).map(|record| &mut record.visit_once)
    }

    /// Drops every completed record so finished nodes may be traversed again.
    pub fn forget_finished(&mut self) {
        self.records.retain(|_, record| record.in_progress);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
