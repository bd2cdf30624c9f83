//! FFI thunk lowering.
//!
//! A `@native` method's Anvil body is a marked thunk: the signature and
//! the `NATIVE_THUNK` attribute are all codegen needs to materialize the
//! marshal / indirect-call / unmarshal sequence against the library
//! binding slot. The per-platform library paths live on the owning
//! NativeLibrary class descriptor; codegen emits the load-and-bind calls
//! into the module initializer.

use ember_anvil::{AnvilFunction, BlockId, FnAttrs, FunctionBuilder, Terminator};
use ember_ir::ast::FunctionDef;
use ember_ir::FunctionId;
use ember_types::Idx;

use crate::{Cx, LowerError};

/// Lower one `@native` method to its thunk marker.
pub(crate) fn lower_thunk(cx: &mut Cx<'_>, fid: FunctionId, def: &FunctionDef) -> AnvilFunction {
    let owns_binding = def
        .owner
        .is_some_and(|class| cx.class(class).is_native_library());
    if !owns_binding {
        cx.error(LowerError::ContractViolation {
            detail: "@native method outside a NativeLibrary class".into(),
            span: def.span,
        });
    }

    let params: Vec<Idx> = def
        .params()
        .iter()
        .map(|p| Idx::from_type_id(p.ty))
        .collect();
    let mut fb = FunctionBuilder::new(
        fid,
        def.name,
        def.owner,
        &params,
        Idx::from_type_id(def.ret),
        FnAttrs::NATIVE_THUNK,
    );
    // The body is synthesized in codegen from the signature; the Anvil
    // form never falls through to it.
    fb.terminate(BlockId::new(0), Terminator::Unreachable);
    fb.finish()
}
