//! Name resolution contracts the traversal engine consumes.
//!
//! Resolution itself belongs to the front end; the resolvers here cover what
//! the control-flow passes need: parser state transitions and call targets
//! inside a control block.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ir::error::{FaultKind, Result, TraversalError};
use crate::ir::node::{Node, NodeKind, NodeRef};

/// Maps a reference to the unique declaration it names.
pub trait ReferenceResolver {
    fn resolve_name(&self, name: &str) -> Result<NodeRef>;

    fn resolve(&self, reference: &NodeRef) -> Result<NodeRef> {
        match reference.name() {
            Some(name) => self.resolve_name(name),
            None => Err(FaultKind::Unresolved(reference.to_string()).into()),
        }
    }
}

impl<R: ReferenceResolver + ?Sized> ReferenceResolver for &R {
    fn resolve_name(&self, name: &str) -> Result<NodeRef> {
        (**self).resolve_name(name)
    }
}

fn unique(name: &str, candidates: Option<&Vec<NodeRef>>, scope: &str) -> Result<NodeRef> {
    match candidates.map(Vec::as_slice) {
        Some([only]) => Ok(Arc::clone(only)),
        Some(many) if many.len() > 1 => {
            Err(FaultKind::Ambiguous { name: name.to_string(), count: many.len() }.into())
        }
        _ => Err(FaultKind::Unresolved(format!("{} in {}", name, scope)).into()),
    }
}

/// Resolves state names within one parser.
#[derive(Debug, Clone, Default)]
pub struct StateResolver {
    scope: String,
    states: FxHashMap<String, Vec<NodeRef>>,
}

impl StateResolver {
    pub fn for_parser(parser: &NodeRef) -> Result<Self> {
        let Node::Parser { states, .. } = &**parser else {
            return Err(TraversalError::bug(format!("{} is not a parser", parser)));
        };
        let mut resolver = StateResolver { scope: parser.to_string(), states: FxHashMap::default() };
        for state in states.iter() {
            if let Some(name) = state.name() {
                resolver.states.entry(name.to_string()).or_default().push(Arc::clone(state));
            }
        }
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl ReferenceResolver for StateResolver {
    fn resolve_name(&self, name: &str) -> Result<NodeRef> {
        unique(name, self.states.get(name), &self.scope)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMethod {
    IsValid,
    SetValid,
    SetInvalid,
    PushFront,
    PopFront,
}

impl BuiltinMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "isValid" => Some(BuiltinMethod::IsValid),
            "setValid" => Some(BuiltinMethod::SetValid),
            "setInvalid" => Some(BuiltinMethod::SetInvalid),
            "push_front" => Some(BuiltinMethod::PushFront),
            "pop_front" => Some(BuiltinMethod::PopFront),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinMethod::IsValid => "isValid",
            BuiltinMethod::SetValid => "setValid",
            BuiltinMethod::SetInvalid => "setInvalid",
            BuiltinMethod::PushFront => "push_front",
            BuiltinMethod::PopFront => "pop_front",
        }
    }
}

/// What a method call invokes.
#[derive(Debug, Clone)]
pub enum Callee {
    Action(NodeRef),
    /// `t.apply()` on a table.
    Table(NodeRef),
    Builtin { target: NodeRef, method: BuiltinMethod },
    /// Method of an extern object instance declared as a variable.
    ExternMethod { instance: NodeRef, method: String },
}

pub trait CallResolver {
    fn resolve_call(&self, call: &NodeRef) -> Result<Callee>;
}

/// Resolves calls against the declarations visible in a control block.
#[derive(Debug, Clone, Default)]
pub struct ProgramCallResolver {
    declarations: FxHashMap<String, Vec<NodeRef>>,
}

impl ProgramCallResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declarations of `control` plus the top-level actions of `program`, if given.
    pub fn for_control(program: Option<&NodeRef>, control: &NodeRef) -> Result<Self> {
        let Node::Control { parameters, locals, .. } = &**control else {
            return Err(TraversalError::bug(format!("{} is not a control", control)));
        };
        let mut resolver = ProgramCallResolver::new();
        if let Some(Node::Program { declarations, .. }) = program.map(|program| &**program) {
            declarations
                .iter()
                .filter(|decl| decl.kind() == NodeKind::Action)
                .for_each(|decl| resolver.declare(decl));
        }
        parameters.iter().chain(locals.iter()).for_each(|decl| resolver.declare(decl));
        Ok(resolver)
    }

    pub fn declare(&mut self, declaration: &NodeRef) {
        if let Some(name) = declaration.name() {
            self.declarations
                .entry(name.to_string())
                .or_default()
                .push(Arc::clone(declaration));
        }
    }

    /// Actions listed by `table`, in declared order.
    pub fn table_actions(&self, table: &NodeRef) -> Result<Vec<NodeRef>> {
        let Node::Table { actions, .. } = &**table else {
            return Err(TraversalError::bug(format!("{} is not a table", table)));
        };
        actions
            .iter()
            .map(|action| {
                let reference = match &**action {
                    Node::MethodCall { method, .. } => method,
                    _ => action,
                };
                self.resolve(reference)
            })
            .collect()
    }
}

impl ReferenceResolver for ProgramCallResolver {
    fn resolve_name(&self, name: &str) -> Result<NodeRef> {
        unique(name, self.declarations.get(name), "control")
    }
}

impl CallResolver for ProgramCallResolver {
    fn resolve_call(&self, call: &NodeRef) -> Result<Callee> {
        let Node::MethodCall { method, .. } = &**call else {
            return Err(FaultKind::Unresolved(call.to_string()).into());
        };
        match &**method {
            Node::PathExpr { .. } => {
                let target = self.resolve(method)?;
                match target.kind() {
                    NodeKind::Action => Ok(Callee::Action(target)),
                    _ => Err(FaultKind::Unresolved(call.to_string()).into()),
                }
            }
            Node::Member { expr, member, .. } => {
                if let Some(method) = BuiltinMethod::from_name(member) {
                    return Ok(Callee::Builtin { target: Arc::clone(expr), method });
                }
                let target = self.resolve(expr)?;
                match (target.kind(), member.as_str()) {
                    (NodeKind::Table, "apply") => Ok(Callee::Table(target)),
                    (NodeKind::Variable, _) => {
                        Ok(Callee::ExternMethod { instance: target, method: member.clone() })
                    }
                    _ => Err(FaultKind::Unresolved(call.to_string()).into()),
                }
            }
            _ => Err(FaultKind::Unresolved(call.to_string()).into()),
        }
    }
}
