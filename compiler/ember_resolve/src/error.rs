//! Resolution errors. All of these are fatal for the compilation unit.

use ember_ir::{Name, Span};
use thiserror::Error;

/// A fatal symbol-resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A field name collides with another field of the class or one
    /// inherited from an ancestor.
    #[error("duplicate field `{field:?}` in class `{class:?}`")]
    DuplicateField {
        class: Name,
        field: Name,
        span: Span,
    },

    /// An override's signature does not match the overridden method.
    #[error("incompatible override of `{method:?}` in class `{class:?}`")]
    IncompatibleOverride {
        class: Name,
        method: Name,
        span: Span,
    },

    /// Two methods of one class share a name and arity.
    #[error("ambiguous method `{method:?}` in class `{class:?}`")]
    AmbiguousMethod {
        class: Name,
        method: Name,
        span: Span,
    },

    /// The parent chain of a class loops back on itself.
    #[error("inheritance cycle through class `{class:?}`")]
    InheritanceCycle { class: Name, span: Span },

    /// A runtime prelude class the middle end depends on is missing from
    /// the compilation unit.
    #[error("runtime class `{name}` missing from compilation unit")]
    MissingRuntimeClass { name: &'static str },
}

impl ResolveError {
    /// Source span the error points at, when one exists.
    pub fn span(&self) -> Option<Span> {
        match self {
            ResolveError::DuplicateField { span, .. }
            | ResolveError::IncompatibleOverride { span, .. }
            | ResolveError::AmbiguousMethod { span, .. }
            | ResolveError::InheritanceCycle { span, .. } => Some(*span),
            ResolveError::MissingRuntimeClass { .. } => None,
        }
    }
}
