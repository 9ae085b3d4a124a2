//! Call-flow trace of a control block.
//!
//! [`ControlTrace`] walks a control's apply body and follows every call into
//! the table or action it invokes. The actions a table lists are explored as
//! parallel branches, and both arms of an `if` start from the same flow. The
//! flow state is the set of actions that may have run on some path to the
//! current point.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::config::TraversalConfig;
use crate::ir::control_flow::FlowState;
use crate::ir::error::Result;
use crate::ir::node::{Node, NodeRef};
use crate::ir::resolve::{BuiltinMethod, CallResolver, Callee, ProgramCallResolver};
use crate::ir::visitor::{Inspector, InspectorState};

/// Names of the actions that ran on some path to the current point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionsRun(BTreeSet<String>);

impl ActionsRun {
    pub fn contains(&self, action: &str) -> bool {
        self.0.contains(action)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl FlowState for ActionsRun {
    fn duplicate(&self) -> Self {
        self.clone()
    }

    fn merge(&mut self, other: Self) -> Result<()> {
        self.0.extend(other.0);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    /// A table applied, with the actions that may already have run.
    Apply { table: String, after: Vec<String> },
    /// First trace of an action body.
    Action { action: String, after: Vec<String> },
    /// A table or action reached again after its first trace.
    Revisit { name: String },
    /// A header validity or stack method.
    Builtin { target: String, method: String, access: Access },
    Extern { instance: String, method: String },
}

impl fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlEvent::Apply { table, after } => write!(f, "apply {} after [{}]", table, after.join(", ")),
            ControlEvent::Action { action, after } => write!(f, "action {} after [{}]", action, after.join(", ")),
            ControlEvent::Revisit { name } => write!(f, "revisit {}", name),
            ControlEvent::Builtin { target, method, access } => write!(f, "{} {}.{}", access, target, method),
            ControlEvent::Extern { instance, method } => write!(f, "extern {}.{}", instance, method),
        }
    }
}

/// Serializable summary of one traced control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlReport {
    pub control: String,
    /// Every action reachable from the apply body.
    pub actions: Vec<String>,
    pub events: Vec<ControlEvent>,
}

/// Dotted source form of a path or member chain.
fn expr_text(node: &NodeRef) -> String {
    match &**node {
        Node::PathExpr { name, .. } => name.clone(),
        Node::Member { expr, member, .. } => format!("{}.{}", expr_text(expr), member),
        other => other.to_string(),
    }
}

fn decl_name(node: &NodeRef) -> String {
    node.name().unwrap_or_default().to_string()
}

/// Inspector following calls through one control block.
#[derive(Debug)]
pub struct ControlTrace {
    state: InspectorState<ActionsRun>,
    resolver: ProgramCallResolver,
    control: String,
    events: Vec<ControlEvent>,
}

impl ControlTrace {
    /// `program`, when given, contributes its top-level actions to resolution.
    /// Call edges are not structural, so join handling is always off.
    pub fn new(program: Option<&NodeRef>, control: &NodeRef, mut config: TraversalConfig) -> Result<Self> {
        config.join_flows = false;
        Ok(ControlTrace {
            state: InspectorState::new(config),
            resolver: ProgramCallResolver::for_control(program, control)?,
            control: decl_name(control),
            events: Vec::new(),
        })
    }

    /// Traces `control` in one call.
    pub fn run(program: Option<&NodeRef>, control: &NodeRef, config: TraversalConfig) -> Result<Self> {
        let mut trace = ControlTrace::new(program, control, config)?;
        trace.apply(control)?;
        debug!(control = %trace.control, events = trace.events.len(), "control traced");
        Ok(trace)
    }

    pub fn events(&self) -> &[ControlEvent] {
        &self.events
    }

    /// Flow state at the end of the last trace.
    pub fn actions_run(&self) -> &ActionsRun {
        &self.state.flow
    }

    pub fn report(&self) -> ControlReport {
        let mut actions: BTreeSet<String> = BTreeSet::new();
        for event in &self.events {
            if let ControlEvent::Action { action, .. } = event {
                actions.insert(action.clone());
            }
        }
        ControlReport {
            control: self.control.clone(),
            actions: actions.into_iter().collect(),
            events: self.events.clone(),
        }
    }
}

impl Inspector for ControlTrace {
    type Flow = ActionsRun;

    fn state(&mut self) -> &mut InspectorState<ActionsRun> {
        &mut self.state
    }

    fn state_ref(&self) -> &InspectorState<ActionsRun> {
        &self.state
    }

    fn init_apply(&mut self, _root: &NodeRef) -> Result<()> {
        self.events.clear();
        self.state.flow = ActionsRun::default();
        Ok(())
    }

    /// Tables and actions are traced where they are invoked, not where declared.
    fn preorder_control(&mut self, node: &NodeRef) -> Result<bool> {
        if let Node::Control { body, .. } = &**node {
            self.visit(body, "body")?;
        }
        Ok(false)
    }

    fn preorder_table(&mut self, node: &NodeRef) -> Result<bool> {
        let Node::Table { name, keys, .. } = &**node else {
            return Ok(true);
        };
        self.events.push(ControlEvent::Apply { table: name.clone(), after: self.state.flow.names() });
        for key in keys.iter() {
            self.visit(key, "keys")?;
        }
        let actions = self.resolver.table_actions(node)?;
        self.parallel_visit(&actions, "actions")?;
        Ok(false)
    }

    fn revisit_table(&mut self, node: &NodeRef) -> Result<()> {
        self.events.push(ControlEvent::Revisit { name: decl_name(node) });
        for action in self.resolver.table_actions(node)? {
            self.state.flow.0.insert(decl_name(&action));
        }
        Ok(())
    }

    fn preorder_action(&mut self, node: &NodeRef) -> Result<bool> {
        let Node::Action { name, body, .. } = &**node else {
            return Ok(true);
        };
        self.events.push(ControlEvent::Action { action: name.clone(), after: self.state.flow.names() });
        self.state.flow.0.insert(name.clone());
        self.visit(body, "body")?;
        Ok(false)
    }

    fn revisit_action(&mut self, node: &NodeRef) -> Result<()> {
        let name = decl_name(node);
        self.events.push(ControlEvent::Revisit { name: name.clone() });
        self.state.flow.0.insert(name);
        Ok(())
    }

    fn preorder_if(&mut self, node: &NodeRef) -> Result<bool> {
        let Node::If { condition, if_true, if_false, .. } = &**node else {
            return Ok(true);
        };
        self.visit(condition, "condition")?;
        let entry = self.state.flow.duplicate();
        self.visit(if_true, "ifTrue")?;
        let taken = std::mem::replace(&mut self.state.flow, entry);
        if let Some(if_false) = if_false {
            self.visit(if_false, "ifFalse")?;
        }
        self.state.flow.merge(taken)?;
        Ok(false)
    }

    fn preorder_method_call(&mut self, node: &NodeRef) -> Result<bool> {
        let Node::MethodCall { arguments, .. } = &**node else {
            return Ok(true);
        };
        for argument in arguments.iter() {
            self.visit(argument, "arguments")?;
        }
        match self.resolver.resolve_call(node)? {
            Callee::Action(action) => self.visit(&action, "action")?,
            Callee::Table(table) => self.visit(&table, "object")?,
            Callee::Builtin { target, method } => {
                let access = match method {
                    BuiltinMethod::IsValid => Access::Read,
                    _ => Access::Write,
                };
                self.events.push(ControlEvent::Builtin {
                    target: expr_text(&target),
                    method: method.name().to_string(),
                    access,
                });
            }
            Callee::ExternMethod { instance, method } => {
                self.events.push(ControlEvent::Extern { instance: decl_name(&instance), method });
                if !self.context().is_in_context(&instance) {
                    self.visit(&instance, "object")?;
                }
            }
        }
        Ok(false)
    }
}
