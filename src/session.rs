//! Compilation session: owns type interning and program diagnostics.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::warn;

use crate::config::SessionConfig;
use crate::ir::node::{Node, NodeBase, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl From<NodeBase> for Span {
    fn from(base: NodeBase) -> Self {
        Span { line: base.line, column: base.column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Width above the configured maximum.
    UnsupportedWidth,
    InvalidWidth,
    SignedZeroWidth,
    DuplicateDeclaration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<Span>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        match self.span {
            Some(span) => write!(f, "{}: {}: {}", span, severity, self.message),
            None => write!(f, "{}: {}", severity, self.message),
        }
    }
}

/// Recoverable problems in the program being compiled. Reporting never halts a traversal.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    reported: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn report(&mut self, severity: Severity, kind: DiagnosticKind, message: String, span: Option<Span>) {
        let diagnostic = Diagnostic { severity, kind, message, span };
        warn!(kind = ?diagnostic.kind, "{}", diagnostic);
        self.reported.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.reported.iter()
    }

    pub fn error_count(&self) -> usize {
        self.reported.iter().filter(|d| d.severity == Severity::Error).count()
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }
}

/// Canonical type nodes: equal types share one allocation for the whole session.
#[derive(Debug, Default)]
pub struct TypeInterner {
    bits: FxHashMap<(u32, bool), NodeRef>,
    names: FxHashMap<String, NodeRef>,
}

impl TypeInterner {
    pub fn bits(&mut self, width: u32, signed: bool) -> NodeRef {
        Arc::clone(self.bits.entry((width, signed)).or_insert_with(|| {
            Arc::new(Node::TypeBits { base: NodeBase::default(), width, signed })
        }))
    }

    pub fn name(&mut self, name: &str) -> NodeRef {
        if let Some(ty) = self.names.get(name) {
            return Arc::clone(ty);
        }
        let ty = Arc::new(Node::TypeName { base: NodeBase::default(), name: name.to_string() });
        self.names.insert(name.to_string(), Arc::clone(&ty));
        ty
    }

    pub fn len(&self) -> usize {
        self.bits.len() + self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct Session {
    config: SessionConfig,
    types: TypeInterner,
    diagnostics: Diagnostics,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session { config, types: TypeInterner::default(), diagnostics: Diagnostics::default() }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Interned `bit<width>` / `int<width>`.
    ///
    /// Widths above the supported maximum and signed zero-width types are
    /// reported but still produce a type; a negative width produces none.
    pub fn type_bits(&mut self, width: i64, signed: bool, span: Option<Span>) -> Option<NodeRef> {
        let max = self.config.max_width_supported;
        let Ok(width) = u32::try_from(width) else {
            self.diagnostics.report(
                Severity::Error,
                DiagnosticKind::InvalidWidth,
                format!("invalid bit width {}", width),
                span,
            );
            return None;
        };
        if width > max {
            self.diagnostics.report(
                Severity::Error,
                DiagnosticKind::UnsupportedWidth,
                format!("bit width {} exceeds the maximum supported width {}", width, max),
                span,
            );
        }
        if width == 0 && signed {
            self.diagnostics.report(
                Severity::Error,
                DiagnosticKind::SignedZeroWidth,
                "signed types cannot be 0 bits wide".to_string(),
                span,
            );
        }
        Some(self.types.bits(width, signed))
    }

    pub fn type_name(&mut self, name: &str) -> NodeRef {
        self.types.name(name)
    }

    pub fn types(&self) -> &TypeInterner {
        &self.types
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }
}
