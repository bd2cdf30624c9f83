//! Top-level items of a typed compilation unit.
//!
//! The semantic analyzer hands the middle end one [`Module`] per source
//! file: class definitions with resolved parent links, function bodies in
//! one shared expression arena, and an optional entry function.

use crate::arena::{ExprArena, StmtRange};
use crate::{ClassId, FunctionId, Name, Span, TypeId};

/// A fully typed compilation unit.
#[derive(Debug, Default)]
pub struct Module {
    /// Module display name (source file stem).
    pub name: Name,
    /// All classes, indexed by [`ClassId`].
    pub classes: Vec<ClassDef>,
    /// All function bodies, indexed by [`FunctionId`]. Methods and free
    /// functions share this namespace.
    pub functions: Vec<FunctionDef>,
    /// Expression/statement storage for every body in the module.
    pub arena: ExprArena,
    /// The `main` function, when this unit is an executable.
    pub entry: Option<FunctionId>,
}

impl Module {
    /// Look up a class definition.
    #[inline]
    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    /// Look up a function definition.
    #[inline]
    pub fn function(&self, id: FunctionId) -> &FunctionDef {
        &self.functions[id.index()]
    }
}

/// Memory layout family of a class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum LayoutKind {
    /// GC-managed: object header + naturally aligned fields.
    #[default]
    Object,
    /// C-struct layout with platform alignment; no header.
    Struct,
    /// 1-byte alignment, no padding.
    Packed,
    /// All fields at offset 0; size is the max field size.
    Union,
}

/// Serialization policy of a class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum SerializationPolicy {
    /// No synthesized serialization methods.
    #[default]
    None,
    /// Synthesize `to_json` / `from_json` over the field list.
    Json,
}

/// Target platform key for a native library path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Linux,
    MacOs,
    Windows,
}

/// FFI binding of a `NativeLibrary` class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeBinding {
    /// Per-platform shared-library paths, tried in listed order at load.
    pub paths: Vec<(Platform, Name)>,
}

/// One field of a class.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: Name,
    pub ty: TypeId,
    /// `@json(name: …)` key override for serialization.
    pub json_key: Option<Name>,
    pub span: Span,
}

/// A class definition with resolved parent link.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub name: Name,
    pub parent: Option<ClassId>,
    /// Generic parameter names; instances are type-erased, so these only
    /// matter for static reinterpret sites.
    pub type_params: Vec<Name>,
    pub layout: LayoutKind,
    pub serialization: SerializationPolicy,
    /// Present exactly when this is a `NativeLibrary` class.
    pub native: Option<NativeBinding>,
    /// Own fields only; inherited fields are prepended by the resolver.
    pub fields: Vec<FieldDef>,
    /// Own methods in declaration order (bodies live in the module).
    pub methods: Vec<FunctionId>,
    pub span: Span,
}

impl ClassDef {
    /// True when instances are GC-managed heap objects.
    #[inline]
    pub fn is_gc_managed(&self) -> bool {
        self.layout == LayoutKind::Object
    }
}

/// How a function body executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    /// Ordinary body, runs to completion.
    Normal,
    /// Contains `yield`; lowered to a state-machine class.
    Generator,
    /// Marked `async`; lowered to an executor-driven state machine.
    Async,
    /// `@native` method of a NativeLibrary class; `symbol` is the foreign
    /// name bound at module load.
    Native { symbol: Name },
}

/// One local slot of a function.
///
/// Parameters occupy slots `0..arity` in declaration order; instance
/// methods get the receiver at slot 0.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalDef {
    pub name: Name,
    pub ty: TypeId,
    /// Reassigned after initialization somewhere in the body. Drives
    /// by-copy vs by-cell capture classification.
    pub mutable: bool,
    pub span: Span,
}

/// A function definition.
#[derive(Clone, Debug)]
pub struct FunctionDef {
    pub name: Name,
    /// Owning class for methods; `None` for free functions.
    pub owner: Option<ClassId>,
    /// Static methods take no receiver and dispatch directly.
    pub is_static: bool,
    pub kind: FunctionKind,
    /// Number of parameters, receiver included.
    pub arity: u32,
    pub ret: TypeId,
    /// Exception classes this function may propagate.
    pub throws: Vec<ClassId>,
    /// All local slots, parameters first.
    pub locals: Vec<LocalDef>,
    pub body: StmtRange,
    pub span: Span,
}

impl FunctionDef {
    /// Parameter slots (receiver included for instance methods).
    #[inline]
    pub fn params(&self) -> &[LocalDef] {
        &self.locals[..self.arity as usize]
    }

    /// True for bodies lowered to a state machine.
    #[inline]
    pub fn is_coroutine(&self) -> bool {
        matches!(self.kind, FunctionKind::Generator | FunctionKind::Async)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_function() -> FunctionDef {
        FunctionDef {
            name: Name::EMPTY,
            owner: None,
            is_static: false,
            kind: FunctionKind::Normal,
            arity: 2,
            ret: TypeId::new(0),
            throws: Vec::new(),
            locals: vec![
                LocalDef {
                    name: Name::EMPTY,
                    ty: TypeId::new(0),
                    mutable: false,
                    span: Span::DUMMY,
                },
                LocalDef {
                    name: Name::EMPTY,
                    ty: TypeId::new(0),
                    mutable: false,
                    span: Span::DUMMY,
                },
                LocalDef {
                    name: Name::EMPTY,
                    ty: TypeId::new(0),
                    mutable: true,
                    span: Span::DUMMY,
                },
            ],
            body: StmtRange::EMPTY,
            span: Span::DUMMY,
        }
    }

    #[test]
    fn params_are_leading_locals() {
        let f = sample_function();
        assert_eq!(f.params().len(), 2);
    }

    #[test]
    fn coroutine_classification() {
        let mut f = sample_function();
        assert!(!f.is_coroutine());
        f.kind = FunctionKind::Generator;
        assert!(f.is_coroutine());
        f.kind = FunctionKind::Async;
        assert!(f.is_coroutine());
    }
}
