//! Layout materialization: class descriptors, v-tables, strings, and
//! FFI binding slots become module-level constants with stable addresses.

use ember_anvil::{AnvilModule, Op};
use ember_ir::ast::Platform;
use ember_ir::{ClassId, FunctionId, Name, StringInterner};
use ember_types::{Pool, OBJECT_HEADER_SIZE};
use rustc_hash::FxHashMap;

use crate::lowir::{ConstId, Constant, LowModule, NativeLibrary};
use crate::CodegenError;

/// Byte offset of the class-descriptor pointer in the object header.
pub const HEADER_CLASS_PTR_OFFSET: u32 = 0;
/// Byte offset of the GC mark/age word in the object header.
pub const HEADER_GC_BITS_OFFSET: u32 = 8;
/// Byte offset of the v-table pointer within a class descriptor.
pub const DESCRIPTOR_VTABLE_OFFSET: u32 = 16;

const _: () = assert!(HEADER_GC_BITS_OFFSET < OBJECT_HEADER_SIZE);

/// Lookup table from middle-end handles to constant-pool ids.
pub(crate) struct ConstTable {
    /// String pool id → constant id, in pool order.
    pub strings: Vec<ConstId>,
    /// Class id → descriptor constant id.
    pub descriptors: Vec<ConstId>,
    /// FFI binding slot per `@native` method.
    pub ffi_slots: FxHashMap<FunctionId, ConstId>,
    /// Identifier constants for interface-like lookup keys.
    pub names: FxHashMap<Name, ConstId>,
}

impl ConstTable {
    pub fn descriptor(&self, class: ClassId) -> ConstId {
        self.descriptors[class.index()]
    }
}

/// Materialize every constant the function bodies will reference.
pub(crate) fn materialize(
    anvil: &AnvilModule,
    pool: &Pool,
    interner: &StringInterner,
    out: &mut LowModule,
) -> Result<ConstTable, CodegenError> {
    // Interned strings keep their pool order, so ids stay stable.
    let strings = anvil
        .strings
        .iter()
        .map(|(_, contents)| out.add_constant(Constant::Str(contents.to_owned())))
        .collect();

    // Interface-like call sites key the runtime lookup by identifier;
    // those identifiers need stable addresses too.
    let mut names: FxHashMap<Name, ConstId> = FxHashMap::default();
    for function in &anvil.functions {
        for block in &function.blocks {
            for op in &block.ops {
                if let Op::CallInterface { name, .. } = op {
                    names
                        .entry(*name)
                        .or_insert_with(|| {
                            out.add_constant(Constant::Str(interner.lookup(*name).to_owned()))
                        });
                }
            }
        }
    }

    // V-tables first, then descriptors pointing at them.
    let mut descriptors = Vec::with_capacity(anvil.classes.len());
    for class in &anvil.classes {
        let vtable = out.add_constant(Constant::VTable {
            class: class.id,
            slots: class.vtable.clone(),
        });

        let layout = pool
            .layout_of(class.id)
            .ok_or_else(|| CodegenError::Internal {
                detail: format!("class {:?} reached codegen without a layout", class.id),
            })?;
        let reference_offsets = layout
            .fields
            .iter()
            .filter(|f| f.is_reference)
            .map(|f| f.offset)
            .collect();

        descriptors.push(out.add_constant(Constant::ClassDescriptor {
            class: class.id,
            name: interner.lookup(class.name).to_owned(),
            parent: class.parent,
            size: layout.size,
            reference_offsets,
            vtable,
        }));
    }

    // FFI binding slots and the library list for the module initializer.
    let mut ffi_slots = FxHashMap::default();
    for class in &anvil.classes {
        let Some(binding) = &class.native else {
            continue;
        };
        // Stable constant order regardless of method-table hashing.
        let mut natives: Vec<_> = class
            .methods
            .values()
            .filter(|handle| {
                anvil
                    .function(handle.function)
                    .attrs
                    .contains(ember_anvil::FnAttrs::NATIVE_THUNK)
            })
            .collect();
        natives.sort_by_key(|handle| handle.function);

        let mut symbols = Vec::new();
        for handle in natives {
            let slot = out.add_constant(Constant::FfiBindingSlot {
                function: handle.function,
            });
            ffi_slots.insert(handle.function, slot);
            symbols.push((handle.function, interner.lookup(handle.name).to_owned()));
        }

        out.native_libraries.push(NativeLibrary {
            class: class.id,
            paths: binding
                .paths
                .iter()
                .map(|&(platform, path)| {
                    let prefix = match platform {
                        Platform::Linux => "linux:",
                        Platform::MacOs => "macos:",
                        Platform::Windows => "windows:",
                    };
                    format!("{prefix}{}", interner.lookup(path))
                })
                .collect(),
            symbols,
        });
    }

    Ok(ConstTable {
        strings,
        descriptors,
        ffi_slots,
        names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_offsets_fit_the_layout_header() {
        assert_eq!(HEADER_CLASS_PTR_OFFSET, 0);
        assert!(HEADER_GC_BITS_OFFSET + 8 <= OBJECT_HEADER_SIZE);
        assert!(DESCRIPTOR_VTABLE_OFFSET % 8 == 0);
    }
}
