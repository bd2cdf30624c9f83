//! Typed constructors over the raw interning API.
//!
//! Lowering and the resolver build types through these; the raw
//! `intern`/`intern_complex` pair stays an implementation detail of the
//! extra-array encodings.

use ember_ir::ClassId;

use crate::{Idx, Pool, Tag};

/// Effects recorded on a function type.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FnEffects {
    /// May propagate an exception.
    pub throws: bool,
    /// Async body; calls return a future and suspend at `await`.
    pub is_async: bool,
}

impl FnEffects {
    const THROWS: u32 = 1 << 0;
    const ASYNC: u32 = 1 << 1;

    /// Pack into the extra-array word.
    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.throws {
            bits |= Self::THROWS;
        }
        if self.is_async {
            bits |= Self::ASYNC;
        }
        bits
    }

    /// Unpack from the extra-array word.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            throws: bits & Self::THROWS != 0,
            is_async: bits & Self::ASYNC != 0,
        }
    }
}

impl Pool {
    /// Intern a nominal class type.
    pub fn class(&mut self, class: ClassId) -> Idx {
        self.intern(Tag::Class, class.raw())
    }

    /// Intern a generic instantiation. All instantiations of one class
    /// share a layout; the arguments only matter at reinterpret sites.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "argument counts are bounded by source arity, always fit u32"
    )]
    pub fn generic_instance(&mut self, class: ClassId, args: &[Idx]) -> Idx {
        let mut extra = Vec::with_capacity(2 + args.len());
        extra.push(class.raw());
        extra.push(args.len() as u32);
        extra.extend(args.iter().map(|a| a.raw()));
        self.intern_complex(Tag::GenericInstance, &extra)
    }

    /// Intern a generic parameter reference (index within the declaring
    /// class's parameter list).
    pub fn type_param(&mut self, index: u32) -> Idx {
        self.intern(Tag::TypeParam, index)
    }

    /// Intern a function signature.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "parameter counts are bounded by source arity, always fit u32"
    )]
    pub fn function(&mut self, params: &[Idx], ret: Idx, effects: FnEffects) -> Idx {
        let mut extra = Vec::with_capacity(3 + params.len());
        extra.push(params.len() as u32);
        extra.extend(params.iter().map(|p| p.raw()));
        extra.push(ret.raw());
        extra.push(effects.bits());
        self.intern_complex(Tag::Function, &extra)
    }

    /// Intern an array type.
    pub fn array(&mut self, elem: Idx) -> Idx {
        self.intern(Tag::Array, elem.raw())
    }

    /// Intern a hash type.
    pub fn hash(&mut self, key: Idx, value: Idx) -> Idx {
        self.intern_complex(Tag::Hash, &[key.raw(), value.raw()])
    }

    /// Intern the range type.
    pub fn range(&mut self) -> Idx {
        self.intern(Tag::Range, 0)
    }

    /// Intern a tuple type.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "element counts are bounded by source arity, always fit u32"
    )]
    pub fn tuple(&mut self, elems: &[Idx]) -> Idx {
        let mut extra = Vec::with_capacity(1 + elems.len());
        extra.push(elems.len() as u32);
        extra.extend(elems.iter().map(|e| e.raw()));
        self.intern_complex(Tag::Tuple, &extra)
    }

    /// Intern a block (closure) type. `capture_shape` is the resolver's
    /// opaque key for the capture environment (0 before analysis).
    #[allow(
        clippy::cast_possible_truncation,
        reason = "parameter counts are bounded by source arity, always fit u32"
    )]
    pub fn block(&mut self, params: &[Idx], ret: Idx, capture_shape: u32) -> Idx {
        let mut extra = Vec::with_capacity(3 + params.len());
        extra.push(params.len() as u32);
        extra.extend(params.iter().map(|p| p.raw()));
        extra.push(ret.raw());
        extra.push(capture_shape);
        self.intern_complex(Tag::Block, &extra)
    }

    /// Intern a channel type.
    pub fn channel(&mut self, elem: Idx) -> Idx {
        self.intern(Tag::Channel, elem.raw())
    }

    /// Intern a future type.
    pub fn future(&mut self, elem: Idx) -> Idx {
        self.intern(Tag::Future, elem.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effects_roundtrip() {
        let e = FnEffects {
            throws: true,
            is_async: false,
        };
        assert_eq!(FnEffects::from_bits(e.bits()), e);
        let both = FnEffects {
            throws: true,
            is_async: true,
        };
        assert_eq!(FnEffects::from_bits(both.bits()), both);
    }

    #[test]
    fn constructors_deduplicate() {
        let mut pool = Pool::new();
        let a = pool.array(Idx::I64);
        let b = pool.array(Idx::I64);
        assert_eq!(a, b);
        assert_ne!(pool.array(Idx::F64), a);
    }

    #[test]
    fn function_accessors() {
        let mut pool = Pool::new();
        let f = pool.function(
            &[Idx::I64, Idx::F64],
            Idx::I1,
            FnEffects {
                throws: true,
                is_async: false,
            },
        );
        assert_eq!(pool.function_params(f), vec![Idx::I64, Idx::F64]);
        assert_eq!(pool.function_return(f), Idx::I1);
        assert!(pool.function_effects(f).throws);
        assert!(!pool.function_effects(f).is_async);
    }
}
