//! Typed expression nodes.
//!
//! Every expression's canonical type lives in the arena's parallel type
//! array, not on the node itself; the variants below only carry structure.
//! Child references are [`ExprId`] indices into the same arena.

use crate::arena::{EntryRange, ExprId, ExprRange, LocalRange, StmtRange};
use crate::{ClassId, FunctionId, LocalId, Name};

use super::operators::{BinaryOp, LogicOp, UnaryOp};

/// An expression node in the typed AST.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExprKind {
    // ── Literals ────────────────────────────────────────────────
    /// Integer literal. Width comes from the node's recorded type.
    Int(i64),
    /// Float literal, stored as `f64` bits so nodes stay `Eq`/`Hash`.
    Float(u64),
    /// Boolean literal (type `i1`).
    Bool(bool),
    /// Interned string literal.
    Str(Name),
    /// The `nil` literal.
    Nil,

    // ── Variables ───────────────────────────────────────────────
    /// Read of a local slot. Slot 0 is the receiver in instance methods.
    Local(LocalId),

    // ── Operators ───────────────────────────────────────────────
    /// Strict unary operation.
    Unary { op: UnaryOp, operand: ExprId },
    /// Strict binary operation; operand types already agree.
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Short-circuit `and`/`or`.
    Logic {
        op: LogicOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Explicit conversion; the target type is the node's recorded type.
    Cast { operand: ExprId },

    // ── Object model ────────────────────────────────────────────
    /// Allocate an instance and run its `initialize` method.
    New { class: ClassId, args: ExprRange },
    /// Read a field at a resolved slot index.
    FieldGet {
        object: ExprId,
        class: ClassId,
        field: u32,
    },
    /// Instance method call; the dispatch mode (static / virtual /
    /// interface-like / native) is chosen during lowering from the
    /// receiver's static class.
    MethodCall {
        receiver: ExprId,
        name: Name,
        args: ExprRange,
    },
    /// Call of a free function or a static method.
    StaticCall {
        function: FunctionId,
        args: ExprRange,
    },
    /// Class-qualified call by name (`IO.print(…)`, `Point.from_json(…)`);
    /// resolved against the class's method table during lowering, which
    /// also covers methods synthesized by the middle end.
    ClassCall {
        class: ClassId,
        name: Name,
        args: ExprRange,
    },
    /// Invoke a block value (closure `call`).
    BlockCall { callee: ExprId, args: ExprRange },

    // ── Collections ─────────────────────────────────────────────
    /// Array literal.
    ArrayLit { elems: ExprRange },
    /// Hash literal.
    HashLit { entries: EntryRange },
    /// Half-open range literal `start..end`.
    RangeLit { start: ExprId, end: ExprId },
    /// Tuple literal.
    TupleLit { elems: ExprRange },
    /// Tuple element read by constant index.
    TupleGet { tuple: ExprId, index: u32 },
    /// Bounds-checked array/hash element read.
    Index { object: ExprId, index: ExprId },
    /// Array/hash length.
    Length { object: ExprId },

    // ── Blocks ──────────────────────────────────────────────────
    /// Block literal (`do |x|: …`). Parameters are a contiguous run of
    /// the enclosing function's locals; free variables in the body are
    /// ordinary `Local` references classified by capture analysis.
    Block {
        params: LocalRange,
        body: StmtRange,
    },

    // ── Coroutines ──────────────────────────────────────────────
    /// Await a future (only valid inside `async` functions).
    Await { operand: ExprId },

    // ── Concurrency ─────────────────────────────────────────────
    /// Create a channel with the given capacity.
    ChannelNew { capacity: ExprId },
    /// Run a zero-argument block on a new OS thread (`Thread.new`).
    ThreadSpawn { closure: ExprId },

    // ── Strings ─────────────────────────────────────────────────
    /// String interpolation; parts are concatenated left to right with
    /// `to_string` applied to every non-string part.
    Interp { parts: ExprRange },

    /// Placeholder for an upstream error; lowering refuses modules that
    /// still contain one.
    Error,
}

impl ExprKind {
    /// True for nodes that never have side effects or control flow.
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            ExprKind::Int(_)
                | ExprKind::Float(_)
                | ExprKind::Bool(_)
                | ExprKind::Str(_)
                | ExprKind::Nil
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_classification() {
        assert!(ExprKind::Int(4).is_literal());
        assert!(ExprKind::Nil.is_literal());
        assert!(!ExprKind::Local(LocalId::new(0)).is_literal());
    }

    #[test]
    fn float_literals_compare_by_bits() {
        let a = ExprKind::Float(2.5_f64.to_bits());
        let b = ExprKind::Float(2.5_f64.to_bits());
        assert_eq!(a, b);
    }
}
