//! Anvil → LowIR lowering.
//!
//! Mechanical and opcode-directed: class layouts become byte offsets,
//! dispatch becomes loads and indirect calls, exceptions become
//! landing-pad dispatchers, suspension becomes state stores and an entry
//! dispatch table. Anything that fails verification never reaches this
//! crate; anything this crate cannot translate is a compiler bug.

mod classes;
mod func;
mod lowir;
mod runtime;

pub use classes::{DESCRIPTOR_VTABLE_OFFSET, HEADER_CLASS_PTR_OFFSET, HEADER_GC_BITS_OFFSET};
pub use lowir::{
    BinOp, Callee, CmpOp, ConstId, Constant, Convert, LandingPad, LowBlock, LowBlockId,
    LowFunction, LowInst, LowModule, LowTerm, LowType, NativeLibrary, SafePointKind, Value,
};
pub use runtime::RuntimeFn;

use ember_anvil::AnvilModule;
use ember_ir::{FunctionId, StringInterner};
use ember_types::Pool;
use smallvec::SmallVec;
use thiserror::Error;

/// A codegen failure. The verifier runs before this crate, so every
/// variant is an internal invariant violation — a compiler bug, not a
/// user error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    #[error("internal codegen invariant violated: {detail}")]
    Internal { detail: String },
}

/// Lower a verified Anvil module to LowIR.
pub fn emit(
    anvil: &AnvilModule,
    pool: &Pool,
    interner: &StringInterner,
) -> Result<LowModule, CodegenError> {
    let _span = tracing::debug_span!("codegen", functions = anvil.functions.len()).entered();

    let mut out = LowModule::default();
    let consts = classes::materialize(anvil, pool, interner, &mut out)?;

    let mut ic_sites = 0u32;
    for function in &anvil.functions {
        let low = func::FnTranslator::new(anvil, pool, interner, &consts, function, &mut ic_sites)
            .run()?;
        out.functions.push(low);
    }

    if !out.native_libraries.is_empty() {
        let init = build_module_init(anvil, &consts, &mut out)?;
        out.functions.push(init);
    }

    out.entry = anvil.entry;
    Ok(out)
}

/// The module initializer: load each NativeLibrary and bind its symbols
/// into their slots, in declaration order.
fn build_module_init(
    anvil: &AnvilModule,
    consts: &classes::ConstTable,
    out: &mut LowModule,
) -> Result<LowFunction, CodegenError> {
    let mut values: Vec<LowType> = Vec::new();
    let mut insts: Vec<LowInst> = Vec::new();
    let mut temp = |ty: LowType, values: &mut Vec<LowType>| {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "value counts are bounded by u32 ids"
        )]
        let value = Value::new(values.len() as u32);
        values.push(ty);
        value
    };

    let libraries = out.native_libraries.clone();
    for library in &libraries {
        let paths = out.add_constant(Constant::Str(library.paths.join(";")));
        let paths_addr = temp(LowType::Ptr, &mut values);
        insts.push(LowInst::ConstAddr {
            dst: paths_addr,
            constant: paths,
        });
        let handle = temp(LowType::Ptr, &mut values);
        insts.push(LowInst::Call {
            dst: Some(handle),
            callee: Callee::Runtime(RuntimeFn::FfiLoadLibrary),
            args: SmallVec::from_slice(&[paths_addr]),
        });

        for (function, symbol) in &library.symbols {
            let name = out.add_constant(Constant::Str(symbol.clone()));
            let name_addr = temp(LowType::Ptr, &mut values);
            insts.push(LowInst::ConstAddr {
                dst: name_addr,
                constant: name,
            });
            let fn_ptr = temp(LowType::Ptr, &mut values);
            insts.push(LowInst::Call {
                dst: Some(fn_ptr),
                callee: Callee::Runtime(RuntimeFn::FfiResolve),
                args: SmallVec::from_slice(&[handle, name_addr]),
            });
            let slot = consts
                .ffi_slots
                .get(function)
                .copied()
                .ok_or_else(|| CodegenError::Internal {
                    detail: format!("native method {function:?} has no binding slot"),
                })?;
            let slot_addr = temp(LowType::Ptr, &mut values);
            insts.push(LowInst::ConstAddr {
                dst: slot_addr,
                constant: slot,
            });
            insts.push(LowInst::Store {
                ty: LowType::Ptr,
                base: slot_addr,
                offset: 0,
                src: fn_ptr,
            });
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "function counts are bounded by u32 ids"
    )]
    let id = FunctionId::new(anvil.functions.len() as u32);
    Ok(LowFunction {
        id,
        name: ember_ir::Name::EMPTY,
        symbol: "ember_module_init".to_owned(),
        params: Vec::new(),
        ret: None,
        slots: Vec::new(),
        values,
        blocks: vec![LowBlock {
            id: LowBlockId::new(0),
            params: Vec::new(),
            insts,
            term: LowTerm::Ret { value: None },
        }],
        landing_pads: Vec::new(),
    })
}

#[cfg(test)]
mod tests;
