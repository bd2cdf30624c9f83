//! Pre-computed type metadata flags.
//!
//! `TypeFlags` are computed once at interning time and cached, enabling
//! O(1) queries about type properties without traversal. Lowering and
//! codegen gate boxing, write barriers, and reinterpret sites on them.

use bitflags::bitflags;

bitflags! {
    /// Pre-computed type properties for O(1) queries.
    ///
    /// Computed once at interning time, never recomputed.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
    pub struct TypeFlags: u32 {
        // === Presence Flags (bits 0-7) ===

        /// Contains a generic parameter somewhere; reads/writes through
        /// slots of this type need erased access + reinterpret.
        const HAS_TYPE_PARAM = 1 << 0;

        // === Category Flags (bits 8-15) ===

        /// Built-in primitive (i1, i8, i32, i64, f32, f64, nil, intptr).
        const IS_PRIMITIVE = 1 << 8;
        /// Pointer to a GC-managed object; stores need a write barrier
        /// and the collector scans slots of this type. `nil` carries it;
        /// `intptr` never does.
        const IS_REFERENCE = 1 << 9;
        /// Built-in container (array, hash, range, channel, future).
        const IS_CONTAINER = 1 << 10;
        /// Function signature type.
        const IS_FUNCTION = 1 << 11;
        /// Block (closure) value type.
        const IS_BLOCK = 1 << 12;
        /// Class or generic-instance type.
        const IS_CLASS = 1 << 13;

        // === Effect Flags (bits 16-23) ===

        /// Function type that may throw.
        const MAY_THROW = 1 << 16;
        /// Function type that is async.
        const IS_ASYNC = 1 << 17;
    }
}

impl TypeFlags {
    /// Flags that propagate from child types to compound parents.
    pub const PROPAGATE_MASK: Self = Self::HAS_TYPE_PARAM;

    /// Extract the flags a parent inherits from one child.
    #[inline]
    pub fn propagate_from(child: Self) -> Self {
        child & Self::PROPAGATE_MASK
    }

    /// True when slots of this type must be boxed at generic boundaries.
    #[inline]
    pub fn needs_boxing(self) -> bool {
        self.contains(Self::IS_PRIMITIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_only_carries_type_params() {
        let child = TypeFlags::IS_PRIMITIVE | TypeFlags::HAS_TYPE_PARAM;
        assert_eq!(
            TypeFlags::propagate_from(child),
            TypeFlags::HAS_TYPE_PARAM
        );
    }

    #[test]
    fn boxing_follows_primitiveness() {
        assert!(TypeFlags::IS_PRIMITIVE.needs_boxing());
        assert!(!TypeFlags::IS_REFERENCE.needs_boxing());
    }
}
