//! Unified type index handle.
//!
//! `Idx` is THE canonical type representation. All types are stored in a
//! unified pool and referenced by their 32-bit index; two types are equal
//! iff their indices are equal.
//!
//! Primitive types have fixed indices (0-7) for O(1) lookup without
//! touching the pool.

use std::fmt;

/// A 32-bit index into the type pool.
///
/// Types are compared by index equality (O(1)), never by structural
/// comparison.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub struct Idx(u32);

impl Idx {
    // === Primitive Types (indices 0-7) ===
    // Pre-interned at pool creation.

    /// The `i1` type (boolean).
    pub const I1: Self = Self(0);
    /// The `i8` type (8-bit signed integer).
    pub const I8: Self = Self(1);
    /// The `i32` type (32-bit signed integer).
    pub const I32: Self = Self(2);
    /// The `i64` type (64-bit signed integer).
    pub const I64: Self = Self(3);
    /// The `f32` type (32-bit float).
    pub const F32: Self = Self(4);
    /// The `f64` type (64-bit float).
    pub const F64: Self = Self(5);
    /// The `nil` type (sole value `nil`; subtype of every reference type).
    pub const NIL: Self = Self(6);
    /// The `intptr` type (raw pointer-sized integer, never GC-scanned,
    /// never implicitly convertible).
    pub const INTPTR: Self = Self(7);

    // === Reserved Range (8-31) ===
    // Reserved for future primitive types.

    /// First index for dynamically interned types.
    pub const FIRST_DYNAMIC: u32 = 32;

    /// Sentinel value indicating no type / invalid index.
    pub const NONE: Self = Self(u32::MAX);

    /// Number of pre-interned primitive types.
    pub const PRIMITIVE_COUNT: u32 = 8;

    /// Create an index from a raw u32 value.
    ///
    /// The caller must ensure the index is valid in the pool.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Create an index from the raw value of an AST type annotation.
    ///
    /// The semantic analyzer interns into the same pool the middle end
    /// reads, so this is a reinterpretation, not a lookup.
    #[inline]
    pub const fn from_type_id(ty: ember_ir::TypeId) -> Self {
        Self(ty.raw())
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// View as an AST type annotation handle.
    #[inline]
    pub const fn type_id(self) -> ember_ir::TypeId {
        ember_ir::TypeId::new(self.0)
    }

    /// Check if this is a primitive type (pre-interned).
    #[inline]
    pub const fn is_primitive(self) -> bool {
        self.0 < Self::FIRST_DYNAMIC
    }

    /// Check if this is the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    /// Check if this is the NIL type.
    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    /// Get the human-readable name for primitive types.
    ///
    /// Returns `None` for dynamic types, which need a Pool to render.
    #[inline]
    pub const fn name(self) -> Option<&'static str> {
        match self.0 {
            0 => Some("i1"),
            1 => Some("i8"),
            2 => Some("i32"),
            3 => Some("i64"),
            4 => Some("f32"),
            5 => Some("f64"),
            6 => Some("nil"),
            7 => Some("intptr"),
            _ => None,
        }
    }
}

impl fmt::Debug for Idx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "Idx({name})"),
            None if self.is_none() => write!(f, "Idx(NONE)"),
            None => write!(f, "Idx({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_indices_are_fixed() {
        assert_eq!(Idx::I1.raw(), 0);
        assert_eq!(Idx::I8.raw(), 1);
        assert_eq!(Idx::I32.raw(), 2);
        assert_eq!(Idx::I64.raw(), 3);
        assert_eq!(Idx::F32.raw(), 4);
        assert_eq!(Idx::F64.raw(), 5);
        assert_eq!(Idx::NIL.raw(), 6);
        assert_eq!(Idx::INTPTR.raw(), 7);
    }

    #[test]
    fn primitive_check_works() {
        assert!(Idx::I64.is_primitive());
        assert!(Idx::INTPTR.is_primitive());
        assert!(!Idx::from_raw(Idx::FIRST_DYNAMIC).is_primitive());
        assert!(!Idx::from_raw(1000).is_primitive());
    }

    #[test]
    fn none_sentinel_works() {
        assert!(Idx::NONE.is_none());
        assert!(!Idx::I1.is_none());
    }

    #[test]
    fn type_id_roundtrip() {
        let idx = Idx::from_raw(523);
        assert_eq!(Idx::from_type_id(idx.type_id()), idx);
    }

    #[test]
    fn primitive_names() {
        assert_eq!(Idx::I1.name(), Some("i1"));
        assert_eq!(Idx::INTPTR.name(), Some("intptr"));
        assert_eq!(Idx::from_raw(100).name(), None);
    }
}
