//! The typed AST consumed by the middle end.
//!
//! The front end (lexer, parser, semantic analyzer) produces this
//! representation: resolved names, explicit canonical types on every
//! expression node, fully elaborated class hierarchies. The middle end
//! never mutates it.

mod expr;
mod items;
mod operators;
mod stmt;

pub use expr::ExprKind;
pub use items::{
    ClassDef, FieldDef, FunctionDef, FunctionKind, LayoutKind, LocalDef, Module, NativeBinding,
    Platform, SerializationPolicy,
};
pub use operators::{BinaryOp, LogicOp, UnaryOp};
pub use stmt::{CatchClause, MatchArm, Pattern, Stmt};
