//! Stable integer handles for cross-referencing middle-end data structures.
//!
//! Classes, functions, and locals reference each other by these handles,
//! never by owning pointers. Handles are dense indices into the owning
//! container (module class list, module function list, per-function local
//! table) and stay valid for the whole compilation of one unit.

use std::fmt;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Create a new id from a raw index.
            #[inline]
            pub const fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Get the raw `u32` value.
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }

            /// Get the index as `usize` (for indexing into `Vec`s).
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id! {
    /// A class in the compilation unit (index into the module class list).
    ClassId, "class"
}

define_id! {
    /// A function body (index into the module function list). Methods,
    /// free functions, and synthesized bodies all share this namespace.
    FunctionId, "fn"
}

define_id! {
    /// A local variable slot within one function. Parameters occupy the
    /// first slots in declaration order (slot 0 is the receiver for
    /// instance methods).
    LocalId, "local"
}

define_id! {
    /// A type handle assigned by the semantic analyzer.
    ///
    /// Raw-value compatible with the type pool's `Idx`: the analyzer interns
    /// into the same pool the middle end reads, so conversion is a
    /// reinterpretation, never a lookup.
    TypeId, "ty"
}

impl TypeId {
    /// Sentinel for "no type recorded" (only valid on synthesized nodes
    /// before the contract check runs).
    pub const NONE: TypeId = TypeId(u32::MAX);

    /// Check if this is the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }
}
