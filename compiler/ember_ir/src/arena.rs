//! Flat arena storage for the typed AST.
//!
//! All expressions and statements of a module live in one arena:
//! contiguous parallel arrays, id-based child references, bulk
//! deallocation. The expression tables are struct-of-arrays — kinds,
//! spans, and types in separate `Vec`s — because lowering touches kinds
//! and types constantly and spans only on the error path.
//!
//! # Capacity Limits
//! - Max expressions/statements: 4 billion (`u32::MAX`)
//! - Max list/range length: 65,535 (`u16::MAX`)
//!
//! These limits are enforced at runtime with clear panic messages.

use std::fmt;

use crate::ast::{CatchClause, ExprKind, MatchArm, Stmt};
use crate::{LocalId, Span, TypeId};

/// Panic helper for capacity overflow (cold path, never inlined).
#[cold]
#[inline(never)]
fn panic_capacity_exceeded(value: usize, context: &str, max: u64) -> ! {
    panic!(
        "arena capacity exceeded: {context} has {value} elements (0x{value:X}), max is {max} (0x{max:X})"
    )
}

/// Convert usize to u32, panicking with a clear message on overflow.
#[inline]
fn to_u32(value: usize, context: &str) -> u32 {
    u32::try_from(value)
        .unwrap_or_else(|_| panic_capacity_exceeded(value, context, u64::from(u32::MAX)))
}

/// Convert usize to u16, panicking with a clear message on overflow.
#[inline]
fn to_u16(value: usize, context: &str) -> u16 {
    u16::try_from(value)
        .unwrap_or_else(|_| panic_capacity_exceeded(value, context, u64::from(u16::MAX)))
}

macro_rules! define_arena_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Sentinel for "no node".
            pub const NONE: Self = Self(u32::MAX);

            /// Create from a raw index.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Raw `u32` value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Index as `usize`.
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// True unless this is the NONE sentinel.
            #[inline]
            pub const fn is_valid(self) -> bool {
                self.0 != u32::MAX
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!($prefix, "{}"), self.0)
                } else {
                    write!(f, concat!($prefix, "NONE"))
                }
            }
        }
    };
}

define_arena_id! {
    /// An expression node in the arena.
    ExprId, "expr"
}

define_arena_id! {
    /// A statement node in the arena.
    StmtId, "stmt"
}

macro_rules! define_range {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name {
            pub start: u32,
            pub len: u16,
        }

        impl $name {
            /// The empty range.
            pub const EMPTY: Self = Self { start: 0, len: 0 };

            /// True when the range holds no elements.
            #[inline]
            pub const fn is_empty(self) -> bool {
                self.len == 0
            }

            /// Element count.
            #[inline]
            pub const fn len(self) -> usize {
                self.len as usize
            }
        }
    };
}

define_range! {
    /// A run of expression ids in the flattened expression list.
    ExprRange
}

define_range! {
    /// A run of statement ids in the flattened statement list.
    StmtRange
}

define_range! {
    /// A run of match arms.
    ArmRange
}

define_range! {
    /// A run of catch clauses.
    CatchRange
}

define_range! {
    /// A run of hash-literal entries.
    EntryRange
}

/// A contiguous run of local slots (block literal parameters).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalRange {
    pub start: u32,
    pub len: u16,
}

impl LocalRange {
    /// The empty range.
    pub const EMPTY: Self = Self { start: 0, len: 0 };

    /// Iterate the local ids in this range.
    pub fn iter(self) -> impl Iterator<Item = LocalId> {
        (self.start..self.start + u32::from(self.len)).map(LocalId::new)
    }

    /// Element count.
    #[inline]
    pub const fn len(self) -> usize {
        self.len as usize
    }

    /// True when the range holds no elements.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// One key/value pair of a hash literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HashEntry {
    pub key: ExprId,
    pub value: ExprId,
}

/// Contiguous storage for all expressions and statements in a module.
///
/// Expression kinds, spans, and types are parallel arrays indexed by
/// [`ExprId`]; the type array is the input contract — the semantic
/// analyzer records a canonical type handle for every expression node.
#[derive(Default)]
pub struct ExprArena {
    /// Expression kinds (indexed by `ExprId`). Parallel array.
    expr_kinds: Vec<ExprKind>,
    /// Expression spans. Parallel to `expr_kinds`.
    expr_spans: Vec<Span>,
    /// Expression types. Parallel to `expr_kinds`.
    expr_types: Vec<TypeId>,

    /// Flattened expression lists (call args, literal elements, …).
    expr_lists: Vec<ExprId>,

    /// All statements (indexed by `StmtId`), with spans parallel.
    stmts: Vec<Stmt>,
    stmt_spans: Vec<Span>,

    /// Flattened statement lists (bodies).
    stmt_lists: Vec<StmtId>,

    /// All match arms.
    arms: Vec<MatchArm>,

    /// All catch clauses.
    catches: Vec<CatchClause>,

    /// All hash-literal entries.
    entries: Vec<HashEntry>,
}

impl ExprArena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Construction ────────────────────────────────────────────

    /// Append an expression with its span and canonical type.
    pub fn push_expr(&mut self, kind: ExprKind, ty: TypeId, span: Span) -> ExprId {
        let id = ExprId::new(to_u32(self.expr_kinds.len(), "expressions"));
        self.expr_kinds.push(kind);
        self.expr_spans.push(span);
        self.expr_types.push(ty);
        id
    }

    /// Append a statement with its span.
    pub fn push_stmt(&mut self, stmt: Stmt, span: Span) -> StmtId {
        let id = StmtId::new(to_u32(self.stmts.len(), "statements"));
        self.stmts.push(stmt);
        self.stmt_spans.push(span);
        id
    }

    /// Flatten a list of expression ids into the arena.
    pub fn alloc_expr_list(&mut self, ids: &[ExprId]) -> ExprRange {
        let start = to_u32(self.expr_lists.len(), "expression lists");
        let len = to_u16(ids.len(), "expression list");
        self.expr_lists.extend_from_slice(ids);
        ExprRange { start, len }
    }

    /// Flatten a list of statement ids into the arena.
    pub fn alloc_stmt_list(&mut self, ids: &[StmtId]) -> StmtRange {
        let start = to_u32(self.stmt_lists.len(), "statement lists");
        let len = to_u16(ids.len(), "statement list");
        self.stmt_lists.extend_from_slice(ids);
        StmtRange { start, len }
    }

    /// Store match arms contiguously.
    pub fn alloc_arms(&mut self, arms: Vec<MatchArm>) -> ArmRange {
        let start = to_u32(self.arms.len(), "match arms");
        let len = to_u16(arms.len(), "match arm list");
        self.arms.extend(arms);
        ArmRange { start, len }
    }

    /// Store catch clauses contiguously.
    pub fn alloc_catches(&mut self, catches: Vec<CatchClause>) -> CatchRange {
        let start = to_u32(self.catches.len(), "catch clauses");
        let len = to_u16(catches.len(), "catch clause list");
        self.catches.extend(catches);
        CatchRange { start, len }
    }

    /// Store hash-literal entries contiguously.
    pub fn alloc_entries(&mut self, entries: &[HashEntry]) -> EntryRange {
        let start = to_u32(self.entries.len(), "hash entries");
        let len = to_u16(entries.len(), "hash entry list");
        self.entries.extend_from_slice(entries);
        EntryRange { start, len }
    }

    // ── Access ──────────────────────────────────────────────────

    /// Expression kind.
    #[inline]
    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.expr_kinds[id.index()]
    }

    /// Expression span.
    #[inline]
    pub fn span(&self, id: ExprId) -> Span {
        self.expr_spans[id.index()]
    }

    /// Canonical type recorded for an expression.
    #[inline]
    pub fn ty(&self, id: ExprId) -> TypeId {
        self.expr_types[id.index()]
    }

    /// Statement node.
    #[inline]
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    /// Statement span.
    #[inline]
    pub fn stmt_span(&self, id: StmtId) -> Span {
        self.stmt_spans[id.index()]
    }

    /// Resolve an expression range to its ids.
    #[inline]
    pub fn exprs(&self, range: ExprRange) -> &[ExprId] {
        &self.expr_lists[range.start as usize..range.start as usize + range.len()]
    }

    /// Resolve a statement range to its ids.
    #[inline]
    pub fn stmt_ids(&self, range: StmtRange) -> &[StmtId] {
        &self.stmt_lists[range.start as usize..range.start as usize + range.len()]
    }

    /// Resolve an arm range.
    #[inline]
    pub fn arms(&self, range: ArmRange) -> &[MatchArm] {
        &self.arms[range.start as usize..range.start as usize + range.len()]
    }

    /// Resolve a catch range.
    #[inline]
    pub fn catches(&self, range: CatchRange) -> &[CatchClause] {
        &self.catches[range.start as usize..range.start as usize + range.len()]
    }

    /// Resolve an entry range.
    #[inline]
    pub fn entries(&self, range: EntryRange) -> &[HashEntry] {
        &self.entries[range.start as usize..range.start as usize + range.len()]
    }

    /// Total number of expressions.
    #[inline]
    pub fn expr_count(&self) -> usize {
        self.expr_kinds.len()
    }

    /// Total number of statements.
    #[inline]
    pub fn stmt_count(&self) -> usize {
        self.stmts.len()
    }
}

impl fmt::Debug for ExprArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprArena")
            .field("exprs", &self.expr_kinds.len())
            .field("stmts", &self.stmts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprKind;

    #[test]
    fn push_and_read_expr() {
        let mut arena = ExprArena::new();
        let id = arena.push_expr(ExprKind::Int(7), TypeId::new(3), Span::new(0, 1));
        assert_eq!(arena.kind(id), &ExprKind::Int(7));
        assert_eq!(arena.ty(id), TypeId::new(3));
        assert_eq!(arena.span(id), Span::new(0, 1));
    }

    #[test]
    fn expr_lists_roundtrip() {
        let mut arena = ExprArena::new();
        let a = arena.push_expr(ExprKind::Int(1), TypeId::new(0), Span::DUMMY);
        let b = arena.push_expr(ExprKind::Int(2), TypeId::new(0), Span::DUMMY);
        let range = arena.alloc_expr_list(&[a, b]);
        assert_eq!(arena.exprs(range), &[a, b]);
    }

    #[test]
    fn empty_ranges() {
        let arena = ExprArena::new();
        assert!(StmtRange::EMPTY.is_empty());
        assert_eq!(arena.stmt_ids(StmtRange::EMPTY), &[]);
        assert_eq!(arena.exprs(ExprRange::EMPTY), &[]);
    }

    #[test]
    fn invalid_ids_are_not_valid() {
        assert!(!ExprId::NONE.is_valid());
        assert!(ExprId::new(0).is_valid());
        assert!(!StmtId::NONE.is_valid());
    }

    #[test]
    fn local_range_iterates() {
        let r = LocalRange { start: 2, len: 3 };
        let ids: Vec<_> = r.iter().collect();
        assert_eq!(
            ids,
            vec![LocalId::new(2), LocalId::new(3), LocalId::new(4)]
        );
    }
}
