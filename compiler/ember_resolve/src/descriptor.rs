//! Finalized class and method descriptors.
//!
//! Descriptors are the resolver's output: immutable once built, consumed
//! by both lowering (dispatch decisions, field slots) and codegen
//! (v-table materialization). Cross-references use ids, never pointers.

use ember_ir::ast::{LayoutKind, NativeBinding, SerializationPolicy};
use ember_ir::{ClassId, FunctionId, Name};
use ember_types::Idx;
use rustc_hash::FxHashMap;

/// How a call to a method body is dispatched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DispatchMode {
    /// Direct call, no receiver lookup.
    Static,
    /// Indexed v-table call through the receiver.
    Virtual,
    /// Dynamic (name, arity) lookup when the receiver's static class does
    /// not own the method.
    InterfaceLike,
    /// FFI thunk bound at module load.
    Native,
    /// Call constructs a generator state machine.
    Generator,
    /// Call constructs a future-backed state machine.
    Async,
}

/// One field slot of a class, inherited slots included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldSlot {
    pub name: Name,
    pub ty: Idx,
    /// Slot index in the full (inherited-first) field list.
    pub slot: u32,
    /// Byte offset within the instance, filled by layout computation.
    pub offset: u32,
    /// Class that declared this field.
    pub declared_in: ClassId,
    /// `@json(name: …)` serialization key override.
    pub json_key: Option<Name>,
}

/// A resolved method: identity, signature, body, and dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodHandle {
    /// Class whose table this handle currently sits in (an inherited
    /// method keeps its defining body but appears in subclass tables).
    pub owner: ClassId,
    pub name: Name,
    /// Parameter count, receiver excluded.
    pub arity: u32,
    /// Interned function signature (receiver excluded).
    pub signature: Idx,
    /// The Anvil body this dispatches to.
    pub function: FunctionId,
    pub dispatch: DispatchMode,
    /// Stable v-table index; `None` for static and native methods.
    pub vtable_slot: Option<u32>,
    /// Exception classes the body may propagate.
    pub throws: Vec<ClassId>,
}

/// A finalized class descriptor.
///
/// The v-table order is stable across the module: a subclass's table is
/// its parent's table with overrides replaced in place and new virtual
/// methods appended.
#[derive(Clone, Debug)]
pub struct ClassDescriptor {
    pub id: ClassId,
    pub name: Name,
    pub parent: Option<ClassId>,
    pub layout_kind: LayoutKind,
    pub serialization: SerializationPolicy,
    /// FFI binding for NativeLibrary classes.
    pub native: Option<NativeBinding>,
    /// Generic parameter count (instances are type-erased).
    pub type_param_count: u32,
    /// Full field list, inherited slots first.
    pub fields: Vec<FieldSlot>,
    /// Method lookup by (name, arity), inherited entries included.
    pub methods: FxHashMap<(Name, u32), MethodHandle>,
    /// Virtual dispatch table: slot index → body id.
    pub vtable: Vec<FunctionId>,
}

impl ClassDescriptor {
    /// Look up a method by name and arity.
    pub fn method(&self, name: Name, arity: u32) -> Option<&MethodHandle> {
        self.methods.get(&(name, arity))
    }

    /// Look up a field slot by name.
    pub fn field_by_name(&self, name: Name) -> Option<&FieldSlot> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// True when instances are GC-managed heap objects.
    pub fn is_gc_managed(&self) -> bool {
        self.layout_kind == LayoutKind::Object
    }

    /// True for NativeLibrary classes.
    pub fn is_native_library(&self) -> bool {
        self.native.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_descriptor() -> ClassDescriptor {
        ClassDescriptor {
            id: ClassId::new(0),
            name: Name::EMPTY,
            parent: None,
            layout_kind: LayoutKind::Object,
            serialization: SerializationPolicy::None,
            native: None,
            type_param_count: 0,
            fields: Vec::new(),
            methods: FxHashMap::default(),
            vtable: Vec::new(),
        }
    }

    #[test]
    fn method_lookup_by_name_and_arity() {
        let mut desc = empty_descriptor();
        let speak = Name::from_raw(10);
        desc.methods.insert(
            (speak, 0),
            MethodHandle {
                owner: ClassId::new(0),
                name: speak,
                arity: 0,
                signature: Idx::NONE,
                function: FunctionId::new(5),
                dispatch: DispatchMode::Virtual,
                vtable_slot: Some(0),
                throws: Vec::new(),
            },
        );
        assert!(desc.method(speak, 0).is_some());
        assert!(desc.method(speak, 1).is_none());
    }

    #[test]
    fn native_library_detection() {
        let mut desc = empty_descriptor();
        assert!(!desc.is_native_library());
        desc.native = Some(NativeBinding { paths: Vec::new() });
        assert!(desc.is_native_library());
    }
}
