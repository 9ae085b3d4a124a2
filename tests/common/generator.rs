//! Random statement graphs for property-based tests.
//!
//! Trees are built bottom-up and every new node may reuse one built earlier,
//! so the generated IR is a DAG with arbitrary sharing but never a cycle.

use std::sync::Arc;

use quickcheck::{Arbitrary, Gen};

use irwalk::ir::builder::Builder;
use irwalk::ir::node::{BinaryOp, NodeRef, UnaryOp};

const MAX_DEPTH: usize = 5;
const NAMES: &[&str] = &["a", "b", "c", "x", "y"];
const BINARY_OPS: &[BinaryOp] = &[BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::BAnd, BinaryOp::Eq];
const UNARY_OPS: &[UnaryOp] = &[UnaryOp::Neg, UnaryOp::Not, UnaryOp::Cmpl];

#[derive(Clone, Debug)]
pub struct RandomTree(pub NodeRef);

impl Arbitrary for RandomTree {
    fn arbitrary(g: &mut Gen) -> Self {
        let mut generator = Generator { b: Builder::new(), exprs: Vec::new(), statements: Vec::new() };
        let depth = g.size().min(MAX_DEPTH);
        let count = 1 + usize::arbitrary(g) % 4;
        let statements = (0..count).map(|_| generator.statement(g, depth)).collect();
        RandomTree(generator.b.block(statements))
    }
}

struct Generator {
    b: Builder,
    exprs: Vec<NodeRef>,
    statements: Vec<NodeRef>,
}

fn pick<T: Copy>(g: &mut Gen, choices: &[T]) -> T {
    choices[usize::arbitrary(g) % choices.len()]
}

fn reuse(g: &mut Gen, pool: &[NodeRef]) -> Option<NodeRef> {
    if pool.is_empty() || usize::arbitrary(g) % 4 != 0 {
        return None;
    }
    Some(Arc::clone(&pool[usize::arbitrary(g) % pool.len()]))
}

impl Generator {
    fn expr(&mut self, g: &mut Gen, depth: usize) -> NodeRef {
        if let Some(shared) = reuse(g, &self.exprs) {
            return shared;
        }
        let choice = if depth == 0 { usize::arbitrary(g) % 2 } else { usize::arbitrary(g) % 5 };
        let node = match choice {
            0 => self.b.constant(i64::from(i8::arbitrary(g))),
            1 => self.b.path(pick(g, NAMES)),
            2 => {
                let (left, right) = (self.expr(g, depth - 1), self.expr(g, depth - 1));
                self.b.binary(pick(g, BINARY_OPS), left, right)
            }
            3 => {
                let operand = self.expr(g, depth - 1);
                self.b.unary(pick(g, UNARY_OPS), operand)
            }
            _ => {
                let inner = self.expr(g, depth - 1);
                self.b.member(inner, pick(g, NAMES))
            }
        };
        self.exprs.push(Arc::clone(&node));
        node
    }

    fn statement(&mut self, g: &mut Gen, depth: usize) -> NodeRef {
        if let Some(shared) = reuse(g, &self.statements) {
            return shared;
        }
        let choice = if depth == 0 { usize::arbitrary(g) % 2 } else { usize::arbitrary(g) % 5 };
        let next = depth.saturating_sub(1);
        let node = match choice {
            0 => {
                let (left, right) = (self.b.path(pick(g, NAMES)), self.expr(g, next));
                self.b.assign(left, right)
            }
            1 => {
                let (left, right) = (self.b.path(pick(g, NAMES)), self.expr(g, next));
                self.b.op_assign(pick(g, BINARY_OPS), left, right)
            }
            2 => {
                let condition = self.expr(g, next);
                let if_true = self.statement(g, next);
                let if_false = if bool::arbitrary(g) { Some(self.statement(g, next)) } else { None };
                self.b.if_(condition, if_true, if_false)
            }
            3 => {
                let count = usize::arbitrary(g) % 3;
                let statements = (0..count).map(|_| self.statement(g, next)).collect();
                self.b.block(statements)
            }
            _ => {
                let arguments = (0..usize::arbitrary(g) % 3).map(|_| self.expr(g, next)).collect();
                let method = self.b.dotted("hdr.ipv4.setValid");
                let call = self.b.call(method, arguments);
                self.b.call_statement(call)
            }
        };
        self.statements.push(Arc::clone(&node));
        node
    }
}
