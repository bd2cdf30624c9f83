//! Type kind discriminants.

use std::fmt;

/// The kind of a type item in the pool.
///
/// The `data` field of an [`crate::Item`] is interpreted per tag:
///
/// | Tag | `data` meaning |
/// |-----|----------------|
/// | primitives | unused (0) |
/// | `Class` | raw `ClassId` |
/// | `Array`, `Channel`, `Future` | child type `Idx` |
/// | `Range` | unused (0) |
/// | `TypeParam` | parameter index within the declaring class |
/// | `GenericInstance`, `Function`, `Hash`, `Tuple`, `Block` | extra-array index |
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    // === Primitives (fixed pool indices) ===
    I1,
    I8,
    I32,
    I64,
    F32,
    F64,
    Nil,
    IntPtr,

    // === Nominal ===
    /// A class by id. The only tag through which type cycles are legal.
    Class,
    /// An instantiated generic class. Extra: `[class_id, argc, args…]`.
    /// Layout-identical to every other instantiation of the same class;
    /// the arguments exist only for static reinterpret sites.
    GenericInstance,
    /// A generic parameter of the enclosing class declaration.
    /// Erased at layout time to a boxed pointer slot.
    TypeParam,

    // === Structural ===
    /// Function signature. Extra: `[paramc, params…, ret, effects]`.
    Function,
    /// Array of one element type.
    Array,
    /// Hash map. Extra: `[key, value]`.
    Hash,
    /// Integer range (`0..5`).
    Range,
    /// Tuple. Extra: `[elemc, elems…]`.
    Tuple,
    /// Block (closure) value. Extra: `[paramc, params…, ret, capture_shape]`.
    Block,
    /// Channel of one element type.
    Channel,
    /// Future of one element type.
    Future,
}

impl Tag {
    /// True for the eight pre-interned primitives.
    pub const fn is_primitive(self) -> bool {
        matches!(
            self,
            Tag::I1
                | Tag::I8
                | Tag::I32
                | Tag::I64
                | Tag::F32
                | Tag::F64
                | Tag::Nil
                | Tag::IntPtr
        )
    }

    /// True when values of this kind are pointers to GC-managed objects.
    ///
    /// `Nil` is included: it is the null reference. `IntPtr` is not: it is
    /// a raw integer the collector never scans.
    pub const fn is_reference(self) -> bool {
        matches!(
            self,
            Tag::Class
                | Tag::GenericInstance
                | Tag::TypeParam
                | Tag::Array
                | Tag::Hash
                | Tag::Range
                | Tag::Tuple
                | Tag::Block
                | Tag::Channel
                | Tag::Future
                | Tag::Nil
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tag::I1 => "i1",
            Tag::I8 => "i8",
            Tag::I32 => "i32",
            Tag::I64 => "i64",
            Tag::F32 => "f32",
            Tag::F64 => "f64",
            Tag::Nil => "nil",
            Tag::IntPtr => "intptr",
            Tag::Class => "class",
            Tag::GenericInstance => "generic",
            Tag::TypeParam => "typeparam",
            Tag::Function => "fn",
            Tag::Array => "array",
            Tag::Hash => "hash",
            Tag::Range => "range",
            Tag::Tuple => "tuple",
            Tag::Block => "block",
            Tag::Channel => "channel",
            Tag::Future => "future",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_classification() {
        assert!(Tag::I1.is_primitive());
        assert!(Tag::IntPtr.is_primitive());
        assert!(!Tag::Class.is_primitive());
        assert!(!Tag::Array.is_primitive());
    }

    #[test]
    fn reference_classification() {
        assert!(Tag::Class.is_reference());
        assert!(Tag::Nil.is_reference());
        assert!(Tag::Future.is_reference());
        assert!(!Tag::IntPtr.is_reference());
        assert!(!Tag::I64.is_reference());
    }
}
