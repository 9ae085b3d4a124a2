//! Copy-on-write access to the node being modified.
//!
//! A [`CowNode`] wraps the original node of the current visit. Reads go to the
//! original until the first write that actually changes a value; that write
//! clones the node once and every later access in the same visit goes through
//! the clone.

use std::fmt;
use std::sync::Arc;

use crate::ir::error::{FaultKind, Result};
use crate::ir::node::{Node, NodeRef};

/// Lens onto one field of one node variant. Build with [`field!`](crate::field).
pub struct Field<T: 'static> {
    name: &'static str,
    get: fn(&Node) -> Option<&T>,
    get_mut: fn(&mut Node) -> Option<&mut T>,
}

impl<T: 'static> Field<T> {
    pub fn new(
        name: &'static str,
        get: fn(&Node) -> Option<&T>,
        get_mut: fn(&mut Node) -> Option<&mut T>,
    ) -> Self {
        Field { name, get, get_mut }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field").field("name", &self.name).finish()
    }
}

/// `field!(Variant.field)` builds a [`Field`] lens for `Node::Variant { field, .. }`.
#[macro_export]
macro_rules! field {
    ($variant:ident . $field:ident) => {
        $crate::ir::visitor::Field::new(
            concat!(stringify!($variant), ".", stringify!($field)),
            |node| match node {
                $crate::ir::node::Node::$variant { $field, .. } => Some($field),
                _ => None,
            },
            |node| match node {
                $crate::ir::node::Node::$variant { $field, .. } => Some($field),
                _ => None,
            },
        )
    };
}

#[derive(Debug)]
pub struct CowNode {
    original: NodeRef,
    clone: Option<Node>,
}

impl CowNode {
    pub fn new(original: NodeRef) -> Self {
        CowNode { original, clone: None }
    }

    /// Current view: the clone once one exists, the original otherwise.
    pub fn get(&self) -> &Node {
        self.clone.as_ref().unwrap_or(&self.original)
    }

    pub fn original(&self) -> &NodeRef {
        &self.original
    }

    pub fn is_cloned(&self) -> bool {
        self.clone.is_some()
    }

    /// Mutable access, cloning the original on first use.
    pub fn modify(&mut self) -> &mut Node {
        let original = &self.original;
        self.clone.get_or_insert_with(|| (**original).clone())
    }

    pub fn read<T>(&self, field: &Field<T>) -> Result<&T> {
        (field.get)(self.get()).ok_or_else(|| self.mismatch(field))
    }

    /// Writes `value` through `field`. Before the node is cloned, a write of the
    /// value already present is dropped and no clone is made. Returns whether a
    /// write happened.
    pub fn set<T: PartialEq>(&mut self, field: &Field<T>, value: T) -> Result<bool> {
        if self.clone.is_none() && *self.read(field)? == value {
            return Ok(false);
        }
        match (field.get_mut)(self.modify()) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Err(self.mismatch(field)),
        }
    }

    /// Installs rewritten children; removing a required child fails with its slot label.
    pub(crate) fn install_children(&mut self, updates: &[(usize, Option<NodeRef>)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let node = self.original.to_string();
        self.modify()
            .replace_children(updates)
            .map_err(|label| FaultKind::RequiredChild { node, label }.into())
    }

    /// Finalizes the visit, yielding the node to hand back and whether a clone was made.
    pub fn commit(self) -> (NodeRef, bool) {
        match self.clone {
            Some(clone) => (Arc::new(clone), true),
            None => (self.original, false),
        }
    }

    fn mismatch<T>(&self, field: &Field<T>) -> crate::ir::error::TraversalError {
        FaultKind::FieldMismatch { node: self.original.to_string(), field: field.name }.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::NodeBase;

    fn constant(value: i64) -> NodeRef {
        Arc::new(Node::Constant { base: NodeBase::default(), ty: None, value })
    }

    #[test]
    fn test_same_value_write_does_not_clone() {
        let original = constant(3);
        let mut cow = CowNode::new(original.clone());
        assert!(!cow.set(&crate::field!(Constant.value), 3).unwrap());
        assert_eq!(*cow.read(&crate::field!(Constant.value)).unwrap(), 3);
        let (result, cloned) = cow.commit();
        assert!(!cloned);
        assert!(Arc::ptr_eq(&result, &original));
    }

    #[test]
    fn test_first_write_clones_once() {
        let original = constant(3);
        let mut cow = CowNode::new(original.clone());
        let value = crate::field!(Constant.value);
        assert!(cow.set(&value, 4).unwrap());
        assert!(cow.is_cloned());
        assert!(cow.set(&value, 4).unwrap());
        assert_eq!(*cow.read(&value).unwrap(), 4);
        assert!(matches!(**cow.original(), Node::Constant { value: 3, .. }));

        let (result, cloned) = cow.commit();
        assert!(cloned);
        assert!(matches!(*result, Node::Constant { value: 4, .. }));
    }

    #[test]
    fn test_field_of_other_variant_is_a_fault() {
        let mut cow = CowNode::new(constant(3));
        let err = cow.set(&crate::field!(Member.member), "x".to_string()).unwrap_err();
        assert_eq!(
            err.kind,
            FaultKind::FieldMismatch { node: "Constant 3".to_string(), field: "Member.member" }
        );
        assert!(!cow.is_cloned());
    }
}
