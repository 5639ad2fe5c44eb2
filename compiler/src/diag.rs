// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types reported by the pass pipeline. Pass
// failures are typed (`PassError`); this module turns them into stable,
// user-facing records.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::error::{GraphError, PassError};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `E0200`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// A pass ran before an upstream stage it depends on.
    pub const E0100: DiagCode = DiagCode("E0100");
    /// Malformed hierarchy: parent index missing or out of range.
    pub const E0200: DiagCode = DiagCode("E0200");
    /// Root output collector has an unconnected input.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// Boundary resolution looped or exceeded the nesting cap.
    pub const E0202: DiagCode = DiagCode("E0202");
    /// A graph mutation was rejected.
    pub const E0300: DiagCode = DiagCode("E0300");
    /// Structural verification failed.
    pub const E0400: DiagCode = DiagCode("E0400");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Node the diagnostic is about, when there is one.
    pub node: Option<String>,
    pub message: String,
    pub hint: Option<String>,
    pub causes: Vec<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, location, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            node: None,
            message: message.into(),
            hint: None,
            causes: Vec::new(),
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the node the diagnostic is about.
    pub fn at_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause to the chain.
    pub fn with_cause(mut self, message: impl Into<String>) -> Self {
        self.causes.push(message.into());
        self
    }

    /// Error-level diagnostic for a failed pass.
    pub fn from_pass_error(err: &PassError) -> Self {
        let (code, hint) = match err {
            PassError::MissingParentIndex { .. } | PassError::BadParentIndex { .. } => (
                codes::E0200,
                Some("every formal input of a subgraph needs `_parent_node_index`"),
            ),
            PassError::UnconnectedOutput { .. } => (codes::E0201, None),
            PassError::NestingTooDeep { .. } => {
                (codes::E0202, Some("raise or drop --max-nesting-depth"))
            }
            PassError::ResolutionCycle { .. } => (
                codes::E0202,
                Some("control-flow containers feed each other in a loop"),
            ),
            PassError::Insert { .. } | PassError::Graph(_) => (codes::E0300, None),
            PassError::Verify(_) => (codes::E0400, None),
        };
        let mut diag = Diagnostic::new(DiagLevel::Error, err.to_string()).with_code(code);
        if let Some(node) = err.node_name() {
            diag = diag.at_node(node);
        }
        if let Some(hint) = hint {
            diag = diag.with_hint(hint);
        }
        if let PassError::Insert { source, .. } = err {
            diag = diag.with_cause(cause_text(source));
        }
        diag
    }
}

fn cause_text(err: &GraphError) -> String {
    match err {
        GraphError::EdgeNotFound { .. } => format!("{err} (edge changed before insertion)"),
        _ => err.to_string(),
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(node) = &self.node {
            write!(f, "\n  --> node '{}'", node)?;
        }
        for cause in &self.causes {
            write!(f, "\n  caused by: {}", cause)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}
