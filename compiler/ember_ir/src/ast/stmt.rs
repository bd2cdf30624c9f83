//! Typed statement nodes, match arms, and catch clauses.

use crate::arena::{ArmRange, CatchRange, ExprId, StmtRange};
use crate::{ClassId, LocalId, Name, Span};

/// A statement in the typed AST.
///
/// Statements are stored in the arena's statement table; bodies are
/// [`StmtRange`]s into the flattened statement-id list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stmt {
    /// Evaluate an expression for its effects.
    Expr(ExprId),
    /// Declare and initialize a local slot.
    Let { local: LocalId, value: ExprId },
    /// Assign to a local slot.
    AssignLocal { local: LocalId, value: ExprId },
    /// Assign to an object field at a resolved slot index.
    AssignField {
        object: ExprId,
        class: ClassId,
        field: u32,
        value: ExprId,
    },
    /// Assign to an array/hash element (bounds-checked).
    AssignIndex {
        object: ExprId,
        index: ExprId,
        value: ExprId,
    },
    /// Two-armed conditional; `else_body` may be empty.
    If {
        cond: ExprId,
        then_body: StmtRange,
        else_body: StmtRange,
    },
    /// Pre-tested loop.
    While { cond: ExprId, body: StmtRange },
    /// Iterator-protocol loop: `for binding in iterable: body`.
    For {
        binding: LocalId,
        iterable: ExprId,
        body: StmtRange,
    },
    /// Pattern match; arms are tried in textual order.
    Match { scrutinee: ExprId, arms: ArmRange },
    /// Return from the enclosing function. `value` is invalid for `nil`
    /// returns.
    Return { value: ExprId },
    /// Exit the innermost loop.
    Break,
    /// Next iteration of the innermost loop.
    Continue,
    /// Raise an exception object.
    Throw { value: ExprId },
    /// Protected region with ordered catch clauses and an optional
    /// finally body (empty range = no finally).
    Try {
        body: StmtRange,
        catches: CatchRange,
        finally: StmtRange,
    },
    /// Resource scope: `using local = value: body`, disposing on exit.
    Using {
        local: LocalId,
        value: ExprId,
        body: StmtRange,
    },
    /// Yield a value from a generator.
    Yield { value: ExprId },
}

/// One arm of a `match` statement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MatchArm {
    pub pattern: Pattern,
    /// Guard expression; invalid id = no guard.
    pub guard: ExprId,
    pub body: StmtRange,
    pub span: Span,
}

/// A pattern in a match arm.
///
/// Patterns are flat: the language's nested destructuring is expanded by
/// the front end into guards before the middle end sees it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pattern {
    /// Matches anything, binds nothing.
    Wildcard,
    /// Matches anything, binds the scrutinee to a local.
    Binding { local: LocalId },
    /// Integer literal pattern (drives `switch` lowering).
    Int(i64),
    /// Boolean literal pattern.
    Bool(bool),
    /// String literal pattern.
    Str(Name),
    /// The `nil` pattern.
    Nil,
    /// Runtime type test with binding: `case Dog as d:`.
    Class { class: ClassId, binding: LocalId },
}

impl Pattern {
    /// True if this pattern matches every value of the scrutinee type.
    ///
    /// Used by lowering to decide whether a trailing arm doubles as the
    /// default; matches over open types without one get a `MatchError`
    /// trap appended.
    pub fn is_irrefutable(&self) -> bool {
        matches!(self, Pattern::Wildcard | Pattern::Binding { .. })
    }
}

/// One catch clause of a `try` statement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CatchClause {
    /// The exception class this clause handles (subclasses included).
    pub class: ClassId,
    /// Local slot the caught object is bound to.
    pub binding: LocalId,
    pub body: StmtRange,
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irrefutable_patterns() {
        assert!(Pattern::Wildcard.is_irrefutable());
        assert!(Pattern::Binding {
            local: LocalId::new(1)
        }
        .is_irrefutable());
        assert!(!Pattern::Int(0).is_irrefutable());
        assert!(!Pattern::Class {
            class: ClassId::new(0),
            binding: LocalId::new(1),
        }
        .is_irrefutable());
    }
}
