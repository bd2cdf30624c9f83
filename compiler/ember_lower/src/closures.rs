//! Closure lowering.
//!
//! A block literal becomes three things:
//!
//! 1. a synthetic class holding one field per captured variable
//!    (the value for by-copy captures, the shared cell for by-cell),
//! 2. a synthetic `call` method whose body is the block body, reading
//!    captures out of the receiver, and
//! 3. at the creation site, an allocation of the class with the captured
//!    values installed.
//!
//! Mutation of a by-cell capture after creation stays visible because the
//! frame and the closure share one cell.

use ember_anvil::{Args, BlockId, FnAttrs, FunctionBuilder, Op, Reg, Terminator};
use ember_ir::arena::LocalRange;
use ember_ir::ast::FunctionDef;
use ember_ir::{ClassId, ExprId, FunctionId, LocalId, StmtRange};
use ember_resolve::{CaptureMode, CaptureSet, DispatchMode, FieldSlot, MethodHandle};
use ember_types::{FnEffects, Idx, Tag};
use rustc_hash::FxHashMap;

use crate::func::{synthetic_class, Binding, FunctionLowerer};
use crate::Cx;

impl FunctionLowerer<'_, '_> {
    /// Lower a block literal at its creation site.
    pub(crate) fn lower_block_literal(
        &mut self,
        block: BlockId,
        expr: ExprId,
        params: LocalRange,
        body: StmtRange,
    ) -> (BlockId, Reg) {
        let captures: CaptureSet = self
            .cx
            .resolution
            .captures
            .get(&expr)
            .cloned()
            .unwrap_or_default();

        // The synthetic capture class.
        let object = self.cx.resolution.well_known.object;
        let outer_name = self.cx.interner.lookup(self.func.name).to_owned();
        let class_index = self.cx.classes.len();
        let mut descriptor = synthetic_class(
            self.cx,
            format!("{outer_name}$Block{class_index}"),
            object,
        );
        for (i, capture) in captures.iter().enumerate() {
            let ty = match capture.mode {
                CaptureMode::ByCopy => {
                    Idx::from_type_id(self.func.locals[capture.local.index()].ty)
                }
                CaptureMode::ByCell => self.cx.boxed_ty(),
            };
            #[allow(
                clippy::cast_possible_truncation,
                reason = "capture counts are bounded by local counts"
            )]
            descriptor.fields.push(FieldSlot {
                name: self.cx.interner.intern(&format!("$cap{i}")),
                ty,
                slot: i as u32,
                offset: 0,
                declared_in: descriptor.id,
                json_key: None,
            });
        }
        let class_id = self.cx.add_class(descriptor);

        // The synthetic `call` method.
        let block_ty = self.expr_ty(expr);
        let func = self.func;
        let ast_id = self.ast_id;
        let call_fid = lower_call_method(
            self.cx, func, ast_id, class_id, params, body, &captures, block_ty,
        );

        // Register `call` in the class's method table and v-table.
        let call_name = self.cx.interner.intern("call");
        let param_types: Vec<Idx> = params
            .iter()
            .map(|p| Idx::from_type_id(func.locals[p.index()].ty))
            .collect();
        let ret = if self.cx.pool.tag(block_ty) == Tag::Block {
            self.cx.pool.block_return(block_ty)
        } else {
            Idx::NIL
        };
        let signature = self.cx.pool.function(&param_types, ret, FnEffects::default());
        let descriptor = &mut self.cx.classes[class_id.index()];
        #[allow(
            clippy::cast_possible_truncation,
            reason = "v-table size is bounded by u32 slot indices"
        )]
        let slot = descriptor.vtable.len() as u32;
        descriptor.vtable.push(call_fid);
        #[allow(
            clippy::cast_possible_truncation,
            reason = "parameter counts are bounded by source arity"
        )]
        descriptor.methods.insert(
            (call_name, params.len() as u32),
            MethodHandle {
                owner: class_id,
                name: call_name,
                arity: params.len() as u32,
                signature,
                function: call_fid,
                dispatch: DispatchMode::Virtual,
                vtable_slot: Some(slot),
                throws: Vec::new(),
            },
        );

        // Creation site: allocate and install the captured values.
        let closure_ty = self.cx.pool.class(class_id);
        let dst = self.fb.reg(closure_ty);
        self.fb.push(block, Op::New { dst, class: class_id, args: Args::new() });
        for (i, capture) in captures.iter().enumerate() {
            let value = match capture.mode {
                CaptureMode::ByCopy => self.local_read(block, capture.local),
                CaptureMode::ByCell => {
                    // Install the cell itself, not its contents.
                    match self.binding_for(capture.local) {
                        Binding::Cell { slot, .. } => {
                            let cell = self.fb.reg(self.fb.local_type(slot));
                            self.fb.push(block, Op::LoadLocal { dst: cell, local: slot });
                            cell
                        }
                        Binding::Slot(slot) => {
                            // A cell-captured local is always cell-bound
                            // in the frame; reaching here is a capture
                            // analysis bug, so fall back to the value.
                            let v = self.fb.reg(self.fb.local_type(slot));
                            self.fb.push(block, Op::LoadLocal { dst: v, local: slot });
                            v
                        }
                    }
                }
            };
            #[allow(
                clippy::cast_possible_truncation,
                reason = "capture counts are bounded by local counts"
            )]
            self.fb.push(
                block,
                Op::SetField {
                    object: dst,
                    class: class_id,
                    slot: i as u32,
                    value,
                },
            );
        }

        (block, dst)
    }
}

/// Build the synthetic `call` method for one block literal.
#[allow(
    clippy::too_many_arguments,
    reason = "one-shot construction helper threading module context"
)]
fn lower_call_method<'a>(
    cx: &mut Cx<'a>,
    outer: &'a FunctionDef,
    outer_id: FunctionId,
    class_id: ClassId,
    params: LocalRange,
    body: StmtRange,
    captures: &CaptureSet,
    block_ty: Idx,
) -> FunctionId {
    let self_ty = cx.pool.class(class_id);
    let mut param_types = vec![self_ty];
    param_types.extend(
        params
            .iter()
            .map(|p| Idx::from_type_id(outer.locals[p.index()].ty)),
    );
    let ret = if cx.pool.tag(block_ty) == Tag::Block {
        cx.pool.block_return(block_ty)
    } else {
        Idx::NIL
    };

    let call_name = cx.interner.intern("call");
    let fb = FunctionBuilder::new(
        FunctionId::new(u32::MAX), // assigned by add_synth
        call_name,
        Some(class_id),
        &param_types,
        ret,
        FnAttrs::SYNTHETIC,
    );

    let mut lowerer = FunctionLowerer {
        cx,
        func: outer,
        ast_id: outer_id,
        fb,
        scopes: Vec::new(),
        regions: Vec::new(),
        bindings: FxHashMap::default(),
        coro: None,
    };

    // Block parameters arrive as the method's own parameters.
    for (i, p) in params.iter().enumerate() {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "parameter counts are bounded by source arity"
        )]
        lowerer.bind(p, Binding::Slot(LocalId::new(i as u32 + 1)));
    }

    // Captures are read out of the receiver at entry.
    let entry = BlockId::new(0);
    for (i, capture) in captures.iter().enumerate() {
        let value_ty = Idx::from_type_id(outer.locals[capture.local.index()].ty);
        let self_reg = lowerer.fb.reg(self_ty);
        lowerer
            .fb
            .push(entry, Op::LoadLocal { dst: self_reg, local: LocalId::new(0) });
        #[allow(
            clippy::cast_possible_truncation,
            reason = "capture counts are bounded by local counts"
        )]
        match capture.mode {
            CaptureMode::ByCopy => {
                let mirror = lowerer.fb.add_local(value_ty);
                let v = lowerer.fb.reg(value_ty);
                lowerer.fb.push(
                    entry,
                    Op::GetField {
                        dst: v,
                        object: self_reg,
                        class: class_id,
                        slot: i as u32,
                    },
                );
                lowerer.fb.push(entry, Op::StoreLocal { local: mirror, src: v });
                lowerer.bind(capture.local, Binding::Slot(mirror));
            }
            CaptureMode::ByCell => {
                let boxed = lowerer.cx.boxed_ty();
                let mirror = lowerer.fb.add_local(boxed);
                let cell = lowerer.fb.reg(boxed);
                lowerer.fb.push(
                    entry,
                    Op::GetField {
                        dst: cell,
                        object: self_reg,
                        class: class_id,
                        slot: i as u32,
                    },
                );
                lowerer.fb.push(entry, Op::StoreLocal { local: mirror, src: cell });
                lowerer.bind(
                    capture.local,
                    Binding::Cell {
                        slot: mirror,
                        ty: value_ty,
                    },
                );
            }
        }
    }

    let end = lowerer.lower_stmts(entry, body);
    if !lowerer.fb.is_terminated(end) {
        if ret == Idx::NIL {
            lowerer.fb.terminate(end, Terminator::Ret { value: None });
        } else {
            let v = lowerer.emit_default(end, ret);
            lowerer.fb.terminate(end, Terminator::Ret { value: Some(v) });
        }
    }

    let cx = lowerer.cx;
    let function = lowerer.fb.finish();
    cx.add_synth(function)
}
