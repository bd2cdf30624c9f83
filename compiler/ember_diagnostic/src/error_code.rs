//! Stable diagnostic codes.
//!
//! Codes are grouped by phase: E02xx resolution, E03xx lowering, E09xx
//! middle-end invariants (always compiler bugs). Codes never change
//! meaning once published.

use std::fmt;

/// A stable diagnostic code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(
    clippy::upper_case_acronyms,
    reason = "codes are conventionally upper case"
)]
pub enum ErrorCode {
    // ── Resolution (E02xx) ──────────────────────────────────────
    /// Duplicate field name in a class (inherited fields included).
    E0201,
    /// Incompatible override signature.
    E0202,
    /// Ambiguous method resolution (same name and arity twice).
    E0203,
    /// Inheritance cycle.
    E0204,
    /// Runtime prelude class missing from the compilation unit.
    E0205,

    // ── Lowering (E03xx) ────────────────────────────────────────
    /// Input-contract violation: the AST is ill-typed.
    E0301,
    /// Valid construct the middle end cannot lower yet.
    E0302,

    // ── Middle-end invariants (E09xx, compiler bugs) ────────────
    /// Verifier rejection of lowered output.
    E0901,
    /// Codegen invariant violation.
    E0902,
}

impl ErrorCode {
    /// The published code string.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::E0201 => "E0201",
            ErrorCode::E0202 => "E0202",
            ErrorCode::E0203 => "E0203",
            ErrorCode::E0204 => "E0204",
            ErrorCode::E0205 => "E0205",
            ErrorCode::E0301 => "E0301",
            ErrorCode::E0302 => "E0302",
            ErrorCode::E0901 => "E0901",
            ErrorCode::E0902 => "E0902",
        }
    }

    /// True for codes that always indicate a compiler bug.
    pub fn is_internal(self) -> bool {
        matches!(self, ErrorCode::E0901 | ErrorCode::E0902)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_stably() {
        assert_eq!(ErrorCode::E0201.to_string(), "E0201");
        assert_eq!(ErrorCode::E0901.to_string(), "E0901");
    }

    #[test]
    fn internal_classification() {
        assert!(!ErrorCode::E0301.is_internal());
        assert!(ErrorCode::E0901.is_internal());
        assert!(ErrorCode::E0902.is_internal());
    }
}
