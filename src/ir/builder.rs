//! Node construction helpers and the JSON program description the CLI reads.

use std::cell::Cell;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::ir::node::{node_vector, BinaryOp, Direction, Node, NodeBase, NodeRef, UnaryOp};
use crate::session::{DiagnosticKind, Session, Severity, Span};

/// Builds nodes with increasing synthetic source lines, so build order is
/// also source order.
#[derive(Debug)]
pub struct Builder {
    next_line: Cell<u32>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder { next_line: Cell::new(1) }
    }

    fn base(&self) -> NodeBase {
        let line = self.next_line.get();
        self.next_line.set(line + 1);
        NodeBase::new(line, 1)
    }

    pub fn program(&self, declarations: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::Program { base: self.base(), declarations: node_vector(declarations) })
    }

    /// Parser over `states`; `accept` and `reject` are appended when not declared.
    pub fn parser(&self, name: &str, states: Vec<NodeRef>) -> NodeRef {
        self.parser_with_parameters(name, vec![], states)
    }

    pub fn parser_with_parameters(&self, name: &str, parameters: Vec<NodeRef>, mut states: Vec<NodeRef>) -> NodeRef {
        let base = self.base();
        for builtin in ["accept", "reject"] {
            if !states.iter().any(|state| state.name() == Some(builtin)) {
                states.push(self.state(builtin, vec![], None));
            }
        }
        Arc::new(Node::Parser {
            base,
            name: name.to_string(),
            parameters: node_vector(parameters),
            states: node_vector(states),
        })
    }

    pub fn state(&self, name: &str, components: Vec<NodeRef>, transition: Option<NodeRef>) -> NodeRef {
        Arc::new(Node::ParserState {
            base: self.base(),
            name: name.to_string(),
            components: node_vector(components),
            transition,
        })
    }

    pub fn select(&self, selector: Vec<NodeRef>, cases: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::Select { base: self.base(), selector: node_vector(selector), cases: node_vector(cases) })
    }

    pub fn select_case(&self, keyset: NodeRef, state: &str) -> NodeRef {
        Arc::new(Node::SelectCase { base: self.base(), keyset, state: self.path(state) })
    }

    pub fn wildcard(&self) -> NodeRef {
        Arc::new(Node::Wildcard { base: self.base() })
    }

    pub fn control(&self, name: &str, parameters: Vec<NodeRef>, locals: Vec<NodeRef>, body: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::Control {
            base: self.base(),
            name: name.to_string(),
            parameters: node_vector(parameters),
            locals: node_vector(locals),
            body: self.block(body),
        })
    }

    pub fn action(&self, name: &str, parameters: Vec<NodeRef>, body: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::Action {
            base: self.base(),
            name: name.to_string(),
            parameters: node_vector(parameters),
            body: self.block(body),
        })
    }

    pub fn table(&self, name: &str, keys: Vec<NodeRef>, actions: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::Table {
            base: self.base(),
            name: name.to_string(),
            keys: node_vector(keys),
            actions: node_vector(actions),
        })
    }

    pub fn parameter(&self, name: &str, direction: Direction, ty: NodeRef) -> NodeRef {
        Arc::new(Node::Parameter { base: self.base(), name: name.to_string(), direction, ty })
    }

    pub fn variable(&self, name: &str, ty: NodeRef, initializer: Option<NodeRef>) -> NodeRef {
        Arc::new(Node::Variable { base: self.base(), name: name.to_string(), ty, initializer })
    }

    pub fn block(&self, statements: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::Block { base: self.base(), statements: node_vector(statements) })
    }

    pub fn assign(&self, left: NodeRef, right: NodeRef) -> NodeRef {
        Arc::new(Node::Assign { base: self.base(), left, right })
    }

    pub fn op_assign(&self, op: BinaryOp, left: NodeRef, right: NodeRef) -> NodeRef {
        Arc::new(Node::OpAssign { base: self.base(), op, left, right })
    }

    pub fn if_(&self, condition: NodeRef, if_true: NodeRef, if_false: Option<NodeRef>) -> NodeRef {
        Arc::new(Node::If { base: self.base(), condition, if_true, if_false })
    }

    pub fn call_statement(&self, call: NodeRef) -> NodeRef {
        Arc::new(Node::CallStatement { base: self.base(), call })
    }

    pub fn call(&self, method: NodeRef, arguments: Vec<NodeRef>) -> NodeRef {
        Arc::new(Node::MethodCall { base: self.base(), method, arguments: node_vector(arguments) })
    }

    pub fn constant(&self, value: i64) -> NodeRef {
        Arc::new(Node::Constant { base: self.base(), ty: None, value })
    }

    pub fn typed_constant(&self, ty: NodeRef, value: i64) -> NodeRef {
        Arc::new(Node::Constant { base: self.base(), ty: Some(ty), value })
    }

    pub fn path(&self, name: &str) -> NodeRef {
        Arc::new(Node::PathExpr { base: self.base(), name: name.to_string() })
    }

    /// `a.b.c` as nested member accesses over the path `a`.
    pub fn dotted(&self, path: &str) -> NodeRef {
        let mut parts = path.split('.');
        let head = self.path(parts.next().unwrap_or_default());
        parts.fold(head, |expr, member| self.member(expr, member))
    }

    pub fn member(&self, expr: NodeRef, member: &str) -> NodeRef {
        Arc::new(Node::Member { base: self.base(), expr, member: member.to_string() })
    }

    pub fn binary(&self, op: BinaryOp, left: NodeRef, right: NodeRef) -> NodeRef {
        Arc::new(Node::Binary { base: self.base(), op, left, right })
    }

    pub fn unary(&self, op: UnaryOp, operand: NodeRef) -> NodeRef {
        Arc::new(Node::Unary { base: self.base(), op, operand })
    }

    /// Un-interned named type. Prefer [`Session::type_name`] for shared types.
    pub fn type_name(&self, name: &str) -> NodeRef {
        Arc::new(Node::TypeName { base: self.base(), name: name.to_string() })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramDesc {
    #[serde(default)]
    pub parsers: Vec<ParserDesc>,
    #[serde(default)]
    pub controls: Vec<ControlDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserDesc {
    pub name: String,
    pub states: Vec<StateDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDesc {
    pub name: String,
    #[serde(default)]
    pub statements: Vec<StatementDesc>,
    #[serde(default)]
    pub transition: Option<TransitionDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionDesc {
    Next(String),
    Select { select: SelectDesc },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectDesc {
    pub on: Vec<String>,
    pub cases: Vec<CaseDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseDesc {
    /// An integer key, or `default` / `_` for the wildcard.
    pub key: ExprDesc,
    pub next: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprDesc {
    Int(i64),
    /// Dotted path such as `hdr.eth.type`.
    Path(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementDesc {
    Assign { left: String, right: ExprDesc },
    /// `target(args)`; `t.apply` applies table `t`.
    Call {
        target: String,
        #[serde(default)]
        args: Vec<ExprDesc>,
    },
    Declare {
        name: String,
        width: i64,
        #[serde(default)]
        signed: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlDesc {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionDesc>,
    #[serde(default)]
    pub tables: Vec<TableDesc>,
    #[serde(default)]
    pub apply: Vec<StatementDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDesc {
    pub name: String,
    #[serde(default)]
    pub statements: Vec<StatementDesc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDesc {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<String>,
    pub actions: Vec<String>,
}

impl ProgramDesc {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Builds the IR. Problems in the description become session diagnostics;
    /// lowering itself never fails.
    pub fn lower(&self, session: &mut Session) -> NodeRef {
        let lowering = Lowering { builder: Builder::new() };
        let mut declarations = Vec::new();
        for parser in &self.parsers {
            declarations.push(lowering.parser(parser, session));
        }
        for control in &self.controls {
            declarations.push(lowering.control(control, session));
        }
        lowering.builder.program(declarations)
    }
}

struct Lowering {
    builder: Builder,
}

impl Lowering {
    fn parser(&self, desc: &ParserDesc, session: &mut Session) -> NodeRef {
        let b = &self.builder;
        let mut seen = FxHashSet::default();
        let mut states = Vec::new();
        for state in &desc.states {
            if !seen.insert(state.name.as_str()) {
                session.diagnostics_mut().report(
                    Severity::Warning,
                    DiagnosticKind::DuplicateDeclaration,
                    format!("state `{}` declared more than once in parser `{}`", state.name, desc.name),
                    None,
                );
            }
            let components = self.statements(&state.statements, session);
            let transition = state.transition.as_ref().map(|transition| match transition {
                TransitionDesc::Next(next) => b.path(next),
                TransitionDesc::Select { select } => {
                    let selector = select.on.iter().map(|path| b.dotted(path)).collect();
                    let cases = select
                        .cases
                        .iter()
                        .map(|case| {
                            let keyset = match &case.key {
                                ExprDesc::Path(key) if key == "default" || key == "_" => b.wildcard(),
                                key => self.expr(key),
                            };
                            b.select_case(keyset, &case.next)
                        })
                        .collect();
                    b.select(selector, cases)
                }
            });
            states.push(b.state(&state.name, components, transition));
        }
        b.parser(&desc.name, states)
    }

    fn control(&self, desc: &ControlDesc, session: &mut Session) -> NodeRef {
        let b = &self.builder;
        let mut locals = Vec::new();
        for action in &desc.actions {
            let body = self.statements(&action.statements, session);
            locals.push(b.action(&action.name, vec![], body));
        }
        for table in &desc.tables {
            let keys = table.keys.iter().map(|key| b.dotted(key)).collect();
            let actions = table.actions.iter().map(|action| b.path(action)).collect();
            locals.push(b.table(&table.name, keys, actions));
        }
        let body = self.statements(&desc.apply, session);
        b.control(&desc.name, vec![], locals, body)
    }

    fn statements(&self, statements: &[StatementDesc], session: &mut Session) -> Vec<NodeRef> {
        let b = &self.builder;
        statements
            .iter()
            .filter_map(|statement| match statement {
                StatementDesc::Assign { left, right } => Some(b.assign(b.dotted(left), self.expr(right))),
                StatementDesc::Call { target, args } => {
                    let args = args.iter().map(|arg| self.expr(arg)).collect();
                    Some(b.call_statement(b.call(b.dotted(target), args)))
                }
                StatementDesc::Declare { name, width, signed } => {
                    let base = b.base();
                    let span = Span::from(base);
                    session
                        .type_bits(*width, *signed, Some(span))
                        .map(|ty| b.variable(name, ty, None))
                }
            })
            .collect()
    }

    fn expr(&self, expr: &ExprDesc) -> NodeRef {
        match expr {
            ExprDesc::Int(value) => self.builder.constant(*value),
            ExprDesc::Path(path) => self.builder.dotted(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_parser_gets_builtin_states() {
        let b = Builder::new();
        let parser = b.parser("p", vec![b.state("start", vec![], Some(b.path("accept")))]);
        let Node::Parser { states, .. } = &*parser else { panic!("expected parser") };
        let names: Vec<_> = states.iter().filter_map(|state| state.name()).collect();
        assert_eq!(names, vec!["start", "accept", "reject"]);
    }

    #[test]
    fn test_dotted_paths_nest_members() {
        let b = Builder::new();
        let expr = b.dotted("hdr.eth.type");
        assert_eq!(expr.to_string(), "Member .type");
        let Node::Member { expr: inner, .. } = &*expr else { panic!("expected member") };
        assert_eq!(inner.to_string(), "Member .eth");
    }

    #[test]
    fn test_lowering_from_json() {
        let desc = ProgramDesc::from_json(indoc! {r#"
            {
              "parsers": [{
                "name": "p",
                "states": [
                  { "name": "start",
                    "statements": [{ "declare": { "name": "tmp", "width": 8 } }],
                    "transition": { "select": { "on": ["hdr.eth.type"], "cases": [
                      { "key": 2048, "next": "ipv4" },
                      { "key": "default", "next": "accept" }
                    ] } } },
                  { "name": "ipv4", "transition": "accept" },
                  { "name": "ipv4", "transition": "accept" }
                ]
              }],
              "controls": [{
                "name": "ingress",
                "actions": [{ "name": "drop" }],
                "tables": [{ "name": "t", "keys": ["hdr.ipv4.dst"], "actions": ["drop"] }],
                "apply": [{ "call": { "target": "t.apply" } }]
              }]
            }
        "#})
        .unwrap();

        let mut session = Session::default();
        let program = desc.lower(&mut session);
        let Node::Program { declarations, .. } = &*program else { panic!("expected program") };
        assert_eq!(declarations.len(), 2);
        assert_eq!(session.diagnostics().len(), 1);
        assert_eq!(session.diagnostics().iter().next().unwrap().kind, DiagnosticKind::DuplicateDeclaration);

        let Node::Parser { states, .. } = &*declarations[0] else { panic!("expected parser") };
        let Node::ParserState { transition: Some(select), components, .. } = &*states[0] else {
            panic!("expected start state")
        };
        assert_eq!(components.len(), 1);
        let Node::Select { cases, .. } = &**select else { panic!("expected select") };
        assert!(matches!(&*cases[1], Node::SelectCase { keyset, .. } if matches!(**keyset, Node::Wildcard { .. })));
    }
}
