use std::fmt;
use std::sync::Arc;

use archery::ArcK;
use rpds::Vector;

/// Shared handle to an immutable IR node. Identity of the allocation is the memoization key.
pub type NodeRef = Arc<Node>;
pub type NodeVector = Vector<NodeRef, ArcK>;

/// Collects nodes into a persistent child vector.
pub fn node_vector<I: IntoIterator<Item = NodeRef>>(nodes: I) -> NodeVector {
    nodes.into_iter().collect::<NodeVector>()
}

/// Instance identity of a node, valid while some handle keeps the node alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn of(node: &NodeRef) -> Self {
        NodeId(Arc::as_ptr(node) as usize)
    }
}

/// Source position of a node. Positions never participate in structural equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeBase {
    pub line: u32,
    pub column: u32,
}

impl NodeBase {
    pub fn new(line: u32, column: u32) -> Self {
        NodeBase { line, column }
    }
}

impl PartialEq for NodeBase {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for NodeBase {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BAnd,
    BOr,
    BXor,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BAnd => "&",
            BinaryOp::BOr => "|",
            BinaryOp::BXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LAnd => "&&",
            BinaryOp::LOr => "||",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Cmpl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    None,
    In,
    Out,
    InOut,
}

/// Every construct of the IR. Child references come first in each variant's
/// declared field order, which is also the default visiting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Top-level list of declarations.
    Program { base: NodeBase, declarations: NodeVector },
    /// Parser: a state machine entered at its `start` state.
    Parser { base: NodeBase, name: String, parameters: NodeVector, states: NodeVector },
    /// One parser state; `transition` names the successor state(s).
    ParserState { base: NodeBase, name: String, components: NodeVector, transition: Option<NodeRef> },
    /// Control block with local declarations and an apply body.
    Control { base: NodeBase, name: String, parameters: NodeVector, locals: NodeVector, body: NodeRef },
    /// User-defined action.
    Action { base: NodeBase, name: String, parameters: NodeVector, body: NodeRef },
    /// Match-action table; `actions` are references to alternative callees.
    Table { base: NodeBase, name: String, keys: NodeVector, actions: NodeVector },
    Parameter { base: NodeBase, name: String, direction: Direction, ty: NodeRef },
    /// Local variable or extern instance declaration.
    Variable { base: NodeBase, name: String, ty: NodeRef, initializer: Option<NodeRef> },
    Block { base: NodeBase, statements: NodeVector },
    Assign { base: NodeBase, left: NodeRef, right: NodeRef },
    /// Compound assignment such as `a += b`.
    OpAssign { base: NodeBase, op: BinaryOp, left: NodeRef, right: NodeRef },
    If { base: NodeBase, condition: NodeRef, if_true: NodeRef, if_false: Option<NodeRef> },
    CallStatement { base: NodeBase, call: NodeRef },
    Constant { base: NodeBase, ty: Option<NodeRef>, value: i64 },
    /// Reference by name; resolution is external.
    PathExpr { base: NodeBase, name: String },
    Member { base: NodeBase, expr: NodeRef, member: String },
    Binary { base: NodeBase, op: BinaryOp, left: NodeRef, right: NodeRef },
    Unary { base: NodeBase, op: UnaryOp, operand: NodeRef },
    MethodCall { base: NodeBase, method: NodeRef, arguments: NodeVector },
    /// Select transition: the first case whose keyset matches picks the next state.
    Select { base: NodeBase, selector: NodeVector, cases: NodeVector },
    SelectCase { base: NodeBase, keyset: NodeRef, state: NodeRef },
    /// Matches any key (`default` / `_`).
    Wildcard { base: NodeBase },
    TypeBits { base: NodeBase, width: u32, signed: bool },
    TypeName { base: NodeBase, name: String },
}

/// Fieldless discriminant of [`Node`], used for dispatch and ancestry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    Parser,
    ParserState,
    Control,
    Action,
    Table,
    Parameter,
    Variable,
    Block,
    Assign,
    OpAssign,
    If,
    CallStatement,
    Constant,
    PathExpr,
    Member,
    Binary,
    Unary,
    MethodCall,
    Select,
    SelectCase,
    Wildcard,
    TypeBits,
    TypeName,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Coarse variant families; callbacks fall back from a variant to its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Declaration,
    Statement,
    Expression,
    Type,
}

impl NodeKind {
    pub fn category(self) -> Category {
        match self {
            NodeKind::Program
            | NodeKind::Parser
            | NodeKind::ParserState
            | NodeKind::Control
            | NodeKind::Action
            | NodeKind::Table
            | NodeKind::Parameter
            | NodeKind::Variable => Category::Declaration,
            NodeKind::Block
            | NodeKind::Assign
            | NodeKind::OpAssign
            | NodeKind::If
            | NodeKind::CallStatement => Category::Statement,
            NodeKind::Constant
            | NodeKind::PathExpr
            | NodeKind::Member
            | NodeKind::Binary
            | NodeKind::Unary
            | NodeKind::MethodCall
            | NodeKind::Select
            | NodeKind::SelectCase
            | NodeKind::Wildcard => Category::Expression,
            NodeKind::TypeBits | NodeKind::TypeName => Category::Type,
        }
    }
}

/// Borrowed view of one declared child field.
#[derive(Debug, Clone, Copy)]
pub enum Slot<'a> {
    One(&'a NodeRef),
    Maybe(Option<&'a NodeRef>),
    Many(&'a NodeVector),
}

/// Mutable view of one declared child field.
#[derive(Debug)]
pub enum SlotMut<'a> {
    One(&'a mut NodeRef),
    Maybe(&'a mut Option<NodeRef>),
    Many(&'a mut NodeVector),
}

/// A present child, addressed by its flattened index across all slots.
#[derive(Debug, Clone, Copy)]
pub struct Child<'a> {
    pub label: &'static str,
    pub index: usize,
    pub node: &'a NodeRef,
}

impl Node {
    pub fn base(&self) -> &NodeBase {
        match self {
            Node::Program { base, .. }
            | Node::Parser { base, .. }
            | Node::ParserState { base, .. }
            | Node::Control { base, .. }
            | Node::Action { base, .. }
            | Node::Table { base, .. }
            | Node::Parameter { base, .. }
            | Node::Variable { base, .. }
            | Node::Block { base, .. }
            | Node::Assign { base, .. }
            | Node::OpAssign { base, .. }
            | Node::If { base, .. }
            | Node::CallStatement { base, .. }
            | Node::Constant { base, .. }
            | Node::PathExpr { base, .. }
            | Node::Member { base, .. }
            | Node::Binary { base, .. }
            | Node::Unary { base, .. }
            | Node::MethodCall { base, .. }
            | Node::Select { base, .. }
            | Node::SelectCase { base, .. }
            | Node::Wildcard { base }
            | Node::TypeBits { base, .. }
            | Node::TypeName { base, .. } => base,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Program { .. } => NodeKind::Program,
            Node::Parser { .. } => NodeKind::Parser,
            Node::ParserState { .. } => NodeKind::ParserState,
            Node::Control { .. } => NodeKind::Control,
            Node::Action { .. } => NodeKind::Action,
            Node::Table { .. } => NodeKind::Table,
            Node::Parameter { .. } => NodeKind::Parameter,
            Node::Variable { .. } => NodeKind::Variable,
            Node::Block { .. } => NodeKind::Block,
            Node::Assign { .. } => NodeKind::Assign,
            Node::OpAssign { .. } => NodeKind::OpAssign,
            Node::If { .. } => NodeKind::If,
            Node::CallStatement { .. } => NodeKind::CallStatement,
            Node::Constant { .. } => NodeKind::Constant,
            Node::PathExpr { .. } => NodeKind::PathExpr,
            Node::Member { .. } => NodeKind::Member,
            Node::Binary { .. } => NodeKind::Binary,
            Node::Unary { .. } => NodeKind::Unary,
            Node::MethodCall { .. } => NodeKind::MethodCall,
            Node::Select { .. } => NodeKind::Select,
            Node::SelectCase { .. } => NodeKind::SelectCase,
            Node::Wildcard { .. } => NodeKind::Wildcard,
            Node::TypeBits { .. } => NodeKind::TypeBits,
            Node::TypeName { .. } => NodeKind::TypeName,
        }
    }

    pub fn category(&self) -> Category {
        self.kind().category()
    }

    /// Declared name for named declarations, path expressions and named types.
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Parser { name, .. }
            | Node::ParserState { name, .. }
            | Node::Control { name, .. }
            | Node::Action { name, .. }
            | Node::Table { name, .. }
            | Node::Parameter { name, .. }
            | Node::Variable { name, .. }
            | Node::PathExpr { name, .. }
            | Node::TypeName { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Child fields in declared order.
    pub fn slots(&self) -> Vec<(&'static str, Slot<'_>)> {
        use Slot::{Many, Maybe, One};
        match self {
            Node::Program { declarations, .. } => vec![("declarations", Many(declarations))],
            Node::Parser { parameters, states, .. } => {
                vec![("parameters", Many(parameters)), ("states", Many(states))]
            }
            Node::ParserState { components, transition, .. } => {
                vec![("components", Many(components)), ("transition", Maybe(transition.as_ref()))]
            }
            Node::Control { parameters, locals, body, .. } => vec![
                ("parameters", Many(parameters)),
                ("locals", Many(locals)),
                ("body", One(body)),
            ],
            Node::Action { parameters, body, .. } => {
                vec![("parameters", Many(parameters)), ("body", One(body))]
            }
            Node::Table { keys, actions, .. } => vec![("keys", Many(keys)), ("actions", Many(actions))],
            Node::Parameter { ty, .. } => vec![("type", One(ty))],
            Node::Variable { ty, initializer, .. } => {
                vec![("type", One(ty)), ("initializer", Maybe(initializer.as_ref()))]
            }
            Node::Block { statements, .. } => vec![("statements", Many(statements))],
            Node::Assign { left, right, .. } | Node::OpAssign { left, right, .. } => {
                vec![("left", One(left)), ("right", One(right))]
            }
            Node::If { condition, if_true, if_false, .. } => vec![
                ("condition", One(condition)),
                ("ifTrue", One(if_true)),
                ("ifFalse", Maybe(if_false.as_ref())),
            ],
            Node::CallStatement { call, .. } => vec![("call", One(call))],
            Node::Constant { ty, .. } => vec![("type", Maybe(ty.as_ref()))],
            Node::Member { expr, .. } => vec![("expr", One(expr))],
            Node::Binary { left, right, .. } => vec![("left", One(left)), ("right", One(right))],
            Node::Unary { operand, .. } => vec![("operand", One(operand))],
            Node::MethodCall { method, arguments, .. } => {
                vec![("method", One(method)), ("arguments", Many(arguments))]
            }
            Node::Select { selector, cases, .. } => {
                vec![("selector", Many(selector)), ("cases", Many(cases))]
            }
            Node::SelectCase { keyset, state, .. } => vec![("keyset", One(keyset)), ("state", One(state))],
            Node::PathExpr { .. } | Node::Wildcard { .. } | Node::TypeBits { .. } | Node::TypeName { .. } => {
                Vec::new()
            }
        }
    }

    fn slots_mut(&mut self) -> Vec<(&'static str, SlotMut<'_>)> {
        use SlotMut::{Many, Maybe, One};
        match self {
            Node::Program { declarations, .. } => vec![("declarations", Many(declarations))],
            Node::Parser { parameters, states, .. } => {
                vec![("parameters", Many(parameters)), ("states", Many(states))]
            }
            Node::ParserState { components, transition, .. } => {
                vec![("components", Many(components)), ("transition", Maybe(transition))]
            }
            Node::Control { parameters, locals, body, .. } => vec![
                ("parameters", Many(parameters)),
                ("locals", Many(locals)),
                ("body", One(body)),
            ],
            Node::Action { parameters, body, .. } => {
                vec![("parameters", Many(parameters)), ("body", One(body))]
            }
            Node::Table { keys, actions, .. } => vec![("keys", Many(keys)), ("actions", Many(actions))],
            Node::Parameter { ty, .. } => vec![("type", One(ty))],
            Node::Variable { ty, initializer, .. } => vec![("type", One(ty)), ("initializer", Maybe(initializer))],
            Node::Block { statements, .. } => vec![("statements", Many(statements))],
            Node::Assign { left, right, .. } | Node::OpAssign { left, right, .. } => {
                vec![("left", One(left)), ("right", One(right))]
            }
            Node::If { condition, if_true, if_false, .. } => vec![
                ("condition", One(condition)),
                ("ifTrue", One(if_true)),
                ("ifFalse", Maybe(if_false)),
            ],
            Node::CallStatement { call, .. } => vec![("call", One(call))],
            Node::Constant { ty, .. } => vec![("type", Maybe(ty))],
            Node::Member { expr, .. } => vec![("expr", One(expr))],
            Node::Binary { left, right, .. } => vec![("left", One(left)), ("right", One(right))],
            Node::Unary { operand, .. } => vec![("operand", One(operand))],
            Node::MethodCall { method, arguments, .. } => {
                vec![("method", One(method)), ("arguments", Many(arguments))]
            }
            Node::Select { selector, cases, .. } => vec![("selector", Many(selector)), ("cases", Many(cases))],
            Node::SelectCase { keyset, state, .. } => vec![("keyset", One(keyset)), ("state", One(state))],
            Node::PathExpr { .. } | Node::Wildcard { .. } | Node::TypeBits { .. } | Node::TypeName { .. } => {
                Vec::new()
            }
        }
    }

    /// Present children, flattened in declared field order.
    pub fn children(&self) -> Vec<Child<'_>> {
        let mut children = Vec::new();
        for (label, slot) in self.slots() {
            match slot {
                Slot::One(node) | Slot::Maybe(Some(node)) => {
                    let index = children.len();
                    children.push(Child { label, index, node });
                }
                Slot::Maybe(None) => {}
                Slot::Many(nodes) => {
                    for node in nodes.iter() {
                        let index = children.len();
                        children.push(Child { label, index, node });
                    }
                }
            }
        }
        children
    }

    /// Applies child updates addressed by flattened child index; `None` removes the child.
    ///
    /// Fails with the slot label when a required child would be removed.
    pub fn replace_children(&mut self, updates: &[(usize, Option<NodeRef>)]) -> Result<(), &'static str> {
        if updates.is_empty() {
            return Ok(());
        }
        let lookup = |index: usize| updates.iter().find(|(i, _)| *i == index).map(|(_, node)| node);
        let mut index = 0;
        for (label, slot) in self.slots_mut() {
            match slot {
                SlotMut::One(child) => {
                    if let Some(update) = lookup(index) {
                        match update {
                            Some(node) => *child = Arc::clone(node),
                            None => return Err(label),
                        }
                    }
                    index += 1;
                }
                SlotMut::Maybe(child) => {
                    if child.is_some() {
                        if let Some(update) = lookup(index) {
                            *child = update.clone();
                        }
                        index += 1;
                    }
                }
                SlotMut::Many(children) => {
                    let len = children.len();
                    if (index..index + len).any(|i| lookup(i).is_some()) {
                        let rebuilt = children
                            .iter()
                            .enumerate()
                            .filter_map(|(offset, child)| match lookup(index + offset) {
                                Some(update) => update.clone(),
                                None => Some(Arc::clone(child)),
                            })
                            .collect::<NodeVector>();
                        *children = rebuilt;
                    }
                    index += len;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Constant { value, .. } => write!(f, "Constant {}", value),
            Node::Member { member, .. } => write!(f, "Member .{}", member),
            Node::Binary { op, .. } | Node::OpAssign { op, .. } => write!(f, "{} {}", self.kind(), op),
            Node::TypeBits { width, signed, .. } => {
                write!(f, "{}<{}>", if *signed { "int" } else { "bit" }, width)
            }
            _ => match self.name() {
                Some(name) => write!(f, "{} {}", self.kind(), name),
                None => write!(f, "{}", self.kind()),
            },
        }
    }
}
