//! The diagnostic model.

use ember_ir::Span;

use crate::ErrorCode;

/// How bad a diagnostic is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational note attached to another diagnostic.
    Note,
    Warning,
    /// The compilation unit cannot be lowered.
    Error,
    /// A middle-end invariant failed after lowering: a compiler bug,
    /// reported with the offending function and block.
    Bug,
}

impl Severity {
    /// Label used by the terminal emitter.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Note => "note",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Bug => "internal compiler error",
        }
    }
}

/// The compilation phase a diagnostic originated in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Resolve,
    Lower,
    Verify,
    Codegen,
}

impl Phase {
    /// Short phase tag for the emitter.
    pub fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "resolve",
            Phase::Lower => "lower",
            Phase::Verify => "verify",
            Phase::Codegen => "codegen",
        }
    }
}

/// One reportable problem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub phase: Phase,
    pub message: String,
    /// Source span, absent for whole-module and internal errors.
    pub span: Option<Span>,
    /// Secondary notes (override locations, hint text).
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// A fatal user-facing error.
    pub fn error(phase: Phase, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            phase,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// A compiler bug (verifier rejection, codegen invariant).
    pub fn bug(phase: Phase, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Bug,
            code,
            phase,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Attach a source span.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// True for severities that abort compilation.
    pub fn is_fatal(&self) -> bool {
        self.severity >= Severity::Error
    }
}
