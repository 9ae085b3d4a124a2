//! Internal consistency faults raised by the traversal engine.
//!
//! Every fault here signals a violated engine invariant, never a property of
//! the program being compiled (those go through [`crate::session::Diagnostics`]).
//! Faults are fatal: they propagate out of `apply` with `?` and the traversal
//! that raised them must not be resumed.

use thiserror::Error;

pub type Result<T, E = TraversalError> = std::result::Result<T, E>;

/// The invariant that was violated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FaultKind {
    /// A node was re-entered while still in progress in a discipline that is not cycle aware.
    #[error("IR loop detected at {0}")]
    Loop(String),

    #[error("visitor state tracker corrupted: {0} was never started")]
    TrackerCorrupted(String),

    #[error("traversal depth exceeds limit {limit}")]
    DepthExceeded { limit: usize },

    /// A join point found by the setup pass was never reached by the main pass.
    #[error("join point {node} has {expected} incoming edges but was never reached")]
    JoinNeverReached { node: String, expected: usize },

    /// Arrivals at a join point did not match the precomputed incoming-edge count.
    #[error("join point {node} expected {expected} arrivals, saw {actual}")]
    ArrivalMismatch { node: String, expected: usize, actual: usize },

    #[error("failed to resolve {0}")]
    Unresolved(String),

    #[error("{name} resolves to {count} declarations")]
    Ambiguous { name: String, count: usize },

    /// A rewrite removed a child slot that cannot be empty.
    #[error("cannot remove required child `{label}` of {node}")]
    RequiredChild { node: String, label: &'static str },

    #[error("field {field} does not exist on {node}")]
    FieldMismatch { node: String, field: &'static str },

    #[error("pass pipeline contains a dependency cycle at stage `{0}`")]
    PipelineCycle(String),

    #[error("stage `{stage}` depends on unknown stage `{dependency}`")]
    UnknownDependency { stage: String, dependency: String },

    /// A pass-level invariant check failed.
    #[error("{0}")]
    PassInvariant(String),
}

/// A fault together with the traversal context it was raised in.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}", display_context(.context))]
pub struct TraversalError {
    pub kind: FaultKind,
    /// Path from the traversal root to the innermost frame, empty when raised outside a traversal.
    pub context: String,
}

fn display_context(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" (at {})", context)
    }
}

impl TraversalError {
    /// Raises a pass-level invariant failure, the equivalent of a BUG check inside a callback.
    pub fn bug(message: impl Into<String>) -> Self {
        FaultKind::PassInvariant(message.into()).into()
    }

    /// Attaches `context` unless an inner frame already did.
    pub fn or_context(mut self, context: impl FnOnce() -> String) -> Self {
        if self.context.is_empty() {
            self.context = context();
            tracing::error!(context = %self.context, "{}", self.kind);
        }
        self
    }
}

impl From<FaultKind> for TraversalError {
    fn from(kind: FaultKind) -> Self {
        TraversalError { kind, context: String::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_is_attached_once() {
        let err: TraversalError = FaultKind::Loop("ParserState s".to_string()).into();
        assert_eq!(err.to_string(), "IR loop detected at ParserState s");

        let err = err.or_context(|| "Parser p/states[0]".to_string());
        let err = err.or_context(|| "Program".to_string());
        assert_eq!(err.context, "Parser p/states[0]");
        assert_eq!(err.to_string(), "IR loop detected at ParserState s (at Parser p/states[0])");
    }

    #[test]
    fn test_bug_is_pass_invariant() {
        let err = TraversalError::bug("inconsistent state in merge");
        assert_eq!(err.kind, FaultKind::PassInvariant("inconsistent state in merge".to_string()));
    }
}
