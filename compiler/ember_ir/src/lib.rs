//! Shared handles and the typed AST for the Ember middle end.
//!
//! This crate is the substrate every other middle-end crate builds on:
//!
//! - [`Span`] — compact source locations
//! - [`Name`] / [`StringInterner`] — interned identifiers
//! - [`ClassId`], [`FunctionId`], [`LocalId`], [`TypeId`] — stable integer
//!   handles; cross-references use handles, never owning pointers
//! - [`ast`] — the typed AST the semantic analyzer hands us
//! - [`arena`] — flat struct-of-arrays storage for AST bodies

pub mod arena;
pub mod ast;

mod ids;
mod interner;
mod name;
mod span;

pub use arena::{ExprArena, ExprId, ExprRange, StmtId, StmtRange};
pub use ids::{ClassId, FunctionId, LocalId, TypeId};
pub use interner::{well_known, SharedInterner, StringInterner};
pub use name::Name;
pub use span::{Span, SpanError};
