//! Generator and async lowering.
//!
//! A body containing suspension points becomes a synthetic state-machine
//! class plus methods:
//!
//! - generators: `resume()` (the split body, `yield_suspend` at each
//!   yield), `has_next()` (advances and stashes the next value), and
//!   `next()` (returns the stash or advances) — the iterator protocol.
//! - async: `resume()` driven by the runtime executor; each `await`
//!   registers the machine as the continuation and suspends. The callable
//!   wrapper creates the future at entry; exceptions inside the body
//!   become a failed future.
//!
//! The class mirrors the resume body's locals as fields (slot order),
//! which is how suspension materializes live state: codegen stores the
//! locals at every suspend and reloads them in the entry dispatch.

use ember_anvil::{
    Args, BlockId, Cmp, CoroutineInfo, FnAttrs, FunctionBuilder, Op, Terminator,
};
use ember_ir::ast::{FunctionDef, FunctionKind};
use ember_ir::{ClassId, FunctionId, LocalId, Name};
use ember_resolve::{DispatchMode, FieldSlot, MethodHandle};
use ember_types::{layout, FnEffects, Idx};
use rustc_hash::FxHashMap;

use crate::func::{synthetic_class, Binding, CoroCtx, FunctionLowerer};
use crate::{Cx, LowerError};

/// State value stored when the machine has finished.
const DONE_STATE: i32 = -1;

/// Field slots of the synthesized state-machine class.
const STATE_SLOT: u32 = 0;
const GEN_PEEKED_SLOT: u32 = 1;
const GEN_PENDING_SLOT: u32 = 2;
const GEN_FIRST_LOCAL_SLOT: u32 = 3;
const ASYNC_FUTURE_SLOT: u32 = 1;
const ASYNC_FIRST_LOCAL_SLOT: u32 = 2;

/// Lower a generator or async function: synthesize the state-machine
/// class and its methods, and return the callable wrapper that occupies
/// the AST function id.
pub(crate) fn lower_coroutine<'a>(
    cx: &mut Cx<'a>,
    fid: FunctionId,
    def: &'a FunctionDef,
) -> ember_anvil::AnvilFunction {
    let is_async = matches!(def.kind, FunctionKind::Async);
    let inner_ty = Idx::from_type_id(def.ret);

    // Captured parameters would need their cells rebuilt on every
    // resume; the front end rewrites such captures into locals first.
    let cells = &cx.resolution.function(fid).cells;
    let has_cell_param = (0..def.arity).any(|i| cells.get(i as usize).copied().unwrap_or(false));
    if has_cell_param {
        cx.error(LowerError::Unsupported {
            family: "captured parameter in coroutine",
            span: def.span,
        });
    }

    // The state-machine class, fields completed after the resume body
    // is built.
    let object = cx.resolution.well_known.object;
    let base_name = cx.interner.lookup(def.name).to_owned();
    let suffix = if is_async { "Async" } else { "Generator" };
    let mut descriptor = synthetic_class(cx, format!("{base_name}${suffix}"), object);
    let state_name = cx.interner.intern("$state");
    descriptor.fields.push(FieldSlot {
        name: state_name,
        ty: Idx::I32,
        slot: STATE_SLOT,
        offset: 0,
        declared_in: descriptor.id,
        json_key: None,
    });
    if is_async {
        let future_name = cx.interner.intern("$future");
        let future_ty = cx.pool.future(inner_ty);
        descriptor.fields.push(FieldSlot {
            name: future_name,
            ty: future_ty,
            slot: ASYNC_FUTURE_SLOT,
            offset: 0,
            declared_in: descriptor.id,
            json_key: None,
        });
    } else {
        let peeked_name = cx.interner.intern("$peeked");
        let pending_name = cx.interner.intern("$pending");
        descriptor.fields.push(FieldSlot {
            name: peeked_name,
            ty: Idx::I1,
            slot: GEN_PEEKED_SLOT,
            offset: 0,
            declared_in: descriptor.id,
            json_key: None,
        });
        descriptor.fields.push(FieldSlot {
            name: pending_name,
            ty: inner_ty,
            slot: GEN_PENDING_SLOT,
            offset: 0,
            declared_in: descriptor.id,
            json_key: None,
        });
    }
    let class_id = cx.add_class(descriptor);

    // The resume body.
    let resume_fid = build_resume(cx, def, fid, class_id, is_async, inner_ty);

    // Mirror the resume body's locals as fields and finalize the layout.
    let first_local_slot = if is_async {
        ASYNC_FIRST_LOCAL_SLOT
    } else {
        GEN_FIRST_LOCAL_SLOT
    };
    finish_class_fields(cx, class_id, resume_fid, first_local_slot);

    // Method table: resume (+ has_next/next for generators).
    let resume_name = cx.interner.intern("resume");
    let resume_ret = if is_async { Idx::NIL } else { inner_ty };
    let resume_slot = register_method(cx, class_id, resume_name, resume_fid, resume_ret);
    if !is_async {
        let has_next_fid = build_has_next(cx, class_id, inner_ty, resume_slot);
        let next_fid = build_next(cx, class_id, inner_ty, resume_slot);
        let has_next = cx.interner.intern("has_next");
        let next = cx.interner.intern("next");
        register_method(cx, class_id, has_next, has_next_fid, Idx::I1);
        register_method(cx, class_id, next, next_fid, inner_ty);
    }

    build_wrapper(cx, fid, def, class_id, is_async, inner_ty, first_local_slot, resume_slot)
}

/// Lower the original body as the state-machine `resume` method.
fn build_resume<'a>(
    cx: &mut Cx<'a>,
    def: &'a FunctionDef,
    ast_id: FunctionId,
    class_id: ClassId,
    is_async: bool,
    inner_ty: Idx,
) -> FunctionId {
    let self_ty = cx.pool.class(class_id);
    let ret_ty = if is_async { Idx::NIL } else { inner_ty };
    let attrs = if is_async {
        FnAttrs::ASYNC | FnAttrs::SYNTHETIC
    } else {
        FnAttrs::GENERATOR | FnAttrs::SYNTHETIC
    };
    let resume_name = cx.interner.intern("resume");
    let fb = FunctionBuilder::new(
        FunctionId::new(u32::MAX),
        resume_name,
        Some(class_id),
        &[self_ty],
        ret_ty,
        attrs,
    );

    let mut lowerer = FunctionLowerer {
        cx,
        func: def,
        ast_id,
        fb,
        scopes: Vec::new(),
        regions: Vec::new(),
        bindings: FxHashMap::default(),
        coro: Some(CoroCtx {
            class: class_id,
            state_slot: STATE_SLOT,
            future_slot: ASYNC_FUTURE_SLOT,
            is_async,
            resume_points: Vec::new(),
            done_state: DONE_STATE,
            ret_ty,
        }),
    };

    // The original locals occupy slots 1.. in declaration order so the
    // class field mirror stays deterministic.
    for (i, local) in def.locals.iter().enumerate() {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "local counts are bounded by u32 ids"
        )]
        let ast_local = LocalId::new(i as u32);
        let ty = Idx::from_type_id(local.ty);
        let is_cell = lowerer
            .cx
            .resolution
            .function(ast_id)
            .cells
            .get(i)
            .copied()
            .unwrap_or(false);
        let binding = if is_cell {
            let boxed = lowerer.cx.boxed_ty();
            Binding::Cell {
                slot: lowerer.fb.add_local(boxed),
                ty,
            }
        } else {
            Binding::Slot(lowerer.fb.add_local(ty))
        };
        lowerer.bind(ast_local, binding);
    }

    let entry = BlockId::new(0);
    let (body_entry, region) = if is_async {
        // The whole async body is protected: an escaping exception
        // becomes a failed future.
        let body_entry = lowerer.fb.new_block();
        lowerer
            .fb
            .terminate(entry, Terminator::Jump { target: body_entry, args: Args::new() });
        let region = lowerer.fb.reserve_try_region(None, body_entry);
        lowerer.regions.push(region);
        (body_entry, Some(region))
    } else {
        (entry, None)
    };

    let end = lowerer.lower_stmts(body_entry, def.body);
    if !lowerer.fb.is_terminated(end) {
        lowerer.emit_coroutine_epilogue(end);
    }

    if let Some(region) = region {
        lowerer.regions.pop();
        let region_last = lowerer.fb.last_block();
        let exception = lowerer.cx.resolution.well_known.exception;
        let caught_ty = lowerer.cx.pool.class(exception);
        let handler = lowerer.fb.new_block();
        let caught = lowerer.fb.reg(caught_ty);
        lowerer.fb.push(handler, Op::CaughtException { dst: caught });
        lowerer.set_state(handler, class_id, STATE_SLOT, DONE_STATE);
        let self_reg = lowerer.load_self(handler, class_id);
        let future_ty = lowerer.cx.class(class_id).fields[ASYNC_FUTURE_SLOT as usize].ty;
        let fut = lowerer.fb.reg(future_ty);
        lowerer.fb.push(
            handler,
            Op::GetField {
                dst: fut,
                object: self_reg,
                class: class_id,
                slot: ASYNC_FUTURE_SLOT,
            },
        );
        lowerer.fb.push(handler, Op::FutureFail { future: fut, error: caught });
        lowerer.fb.terminate(handler, Terminator::Ret { value: None });
        lowerer
            .fb
            .seal_try_region(region, region_last, vec![(exception, handler)]);
    }

    let resume_points = match lowerer.coro.take() {
        Some(coro) => coro.resume_points,
        None => Vec::new(),
    };
    let cx = lowerer.cx;
    let mut function = lowerer.fb.finish();
    function.coroutine = Some(CoroutineInfo {
        class: class_id,
        state_slot: STATE_SLOT,
        first_local_slot: if is_async {
            ASYNC_FIRST_LOCAL_SLOT
        } else {
            GEN_FIRST_LOCAL_SLOT
        },
        resume_points,
    });
    cx.add_synth(function)
}

impl FunctionLowerer<'_, '_> {
    /// `SetField self.$state = value`.
    pub(crate) fn set_state(
        &mut self,
        block: BlockId,
        class: ClassId,
        state_slot: u32,
        value: i32,
    ) {
        let self_reg = self.load_self(block, class);
        let state = self.fb.reg(Idx::I32);
        self.fb.push(block, Op::ConstInt { dst: state, value: i64::from(value) });
        self.fb.push(
            block,
            Op::SetField {
                object: self_reg,
                class,
                slot: state_slot,
                value: state,
            },
        );
    }

    /// Return type of the current coroutine resume body.
    pub(crate) fn coro_ret_ty(&self) -> Idx {
        self.coro.as_ref().map_or(Idx::NIL, |c| c.ret_ty)
    }

    /// Implicit end of a coroutine body: mark done and return.
    pub(crate) fn emit_coroutine_epilogue(&mut self, block: BlockId) {
        let Some(coro) = &self.coro else {
            self.fb.terminate(block, Terminator::Ret { value: None });
            return;
        };
        let (class, state_slot, future_slot, is_async, done, ret_ty) = (
            coro.class,
            coro.state_slot,
            coro.future_slot,
            coro.is_async,
            coro.done_state,
            coro.ret_ty,
        );
        self.set_state(block, class, state_slot, done);
        if is_async {
            // No explicit return: the future completes with nil.
            let self_reg = self.load_self(block, class);
            let future_ty = self.cx.class(class).fields[future_slot as usize].ty;
            let fut = self.fb.reg(future_ty);
            self.fb.push(
                block,
                Op::GetField {
                    dst: fut,
                    object: self_reg,
                    class,
                    slot: future_slot,
                },
            );
            let nil = self.fb.reg(Idx::NIL);
            self.fb.push(block, Op::ConstNil { dst: nil });
            self.fb.push(block, Op::FutureComplete { future: fut, value: nil });
            self.fb.terminate(block, Terminator::Ret { value: None });
        } else {
            let v = self.emit_default(block, ret_ty);
            self.fb.terminate(block, Terminator::Ret { value: Some(v) });
        }
    }
}

/// Append `$local` mirror fields for the resume body's local slots and
/// finalize the class layout.
fn finish_class_fields(
    cx: &mut Cx<'_>,
    class_id: ClassId,
    resume_fid: FunctionId,
    first_local_slot: u32,
) {
    let resume_index = (resume_fid.raw() - cx.ast_count) as usize;
    let local_types: Vec<Idx> = cx.synth[resume_index].locals[1..].to_vec();

    for (k, ty) in local_types.into_iter().enumerate() {
        let name = cx.interner.intern(&format!("$local{k}"));
        #[allow(
            clippy::cast_possible_truncation,
            reason = "local counts are bounded by u32 ids"
        )]
        cx.classes[class_id.index()].fields.push(FieldSlot {
            name,
            ty,
            slot: first_local_slot + k as u32,
            offset: 0,
            declared_in: class_id,
            json_key: None,
        });
    }

    let field_types: Vec<Idx> = cx.classes[class_id.index()]
        .fields
        .iter()
        .map(|f| f.ty)
        .collect();
    let kind = cx.classes[class_id.index()].layout_kind;
    let new_layout = layout::compute(cx.pool, kind, &field_types);
    for (field, placed) in cx.classes[class_id.index()]
        .fields
        .iter_mut()
        .zip(&new_layout.fields)
    {
        field.offset = placed.offset;
    }
    cx.pool.set_layout(class_id, new_layout);
}

/// Put a synthesized method into the class's tables, appending a fresh
/// v-table slot.
#[allow(
    clippy::cast_possible_truncation,
    reason = "v-table size is bounded by u32 slot indices"
)]
fn register_method(
    cx: &mut Cx<'_>,
    class_id: ClassId,
    name: Name,
    function: FunctionId,
    ret: Idx,
) -> u32 {
    let signature = cx.pool.function(&[], ret, FnEffects::default());
    let descriptor = &mut cx.classes[class_id.index()];
    let slot = descriptor.vtable.len() as u32;
    descriptor.vtable.push(function);
    descriptor.methods.insert(
        (name, 0),
        MethodHandle {
            owner: class_id,
            name,
            arity: 0,
            signature,
            function,
            dispatch: DispatchMode::Virtual,
            vtable_slot: Some(slot),
            throws: Vec::new(),
        },
    );
    slot
}

/// `has_next()`: advance the machine (unless a value is pending) and
/// report whether another element exists.
fn build_has_next(cx: &mut Cx<'_>, class_id: ClassId, elem_ty: Idx, resume_slot: u32) -> FunctionId {
    let self_ty = cx.pool.class(class_id);
    let name = cx.interner.intern("has_next");
    let mut fb = FunctionBuilder::new(
        FunctionId::new(u32::MAX),
        name,
        Some(class_id),
        &[self_ty],
        Idx::I1,
        FnAttrs::SYNTHETIC,
    );
    let entry = BlockId::new(0);

    let ret_bool = |fb: &mut FunctionBuilder, block: BlockId, value: i64| {
        let flag = fb.reg(Idx::I1);
        fb.push(block, Op::ConstInt { dst: flag, value });
        fb.terminate(block, Terminator::Ret { value: Some(flag) });
    };
    let load_self = |fb: &mut FunctionBuilder, block: BlockId| {
        let dst = fb.reg(self_ty);
        fb.push(block, Op::LoadLocal { dst, local: LocalId::new(0) });
        dst
    };

    // Finished machines have nothing left.
    let self0 = load_self(&mut fb, entry);
    let state = fb.reg(Idx::I32);
    fb.push(entry, Op::GetField { dst: state, object: self0, class: class_id, slot: STATE_SLOT });
    let done_const = fb.reg(Idx::I32);
    fb.push(entry, Op::ConstInt { dst: done_const, value: i64::from(DONE_STATE) });
    let is_done = fb.reg(Idx::I1);
    fb.push(entry, Op::ICmp { dst: is_done, cmp: Cmp::Eq, lhs: state, rhs: done_const });
    let no_block = fb.new_block();
    let check_peek = fb.new_block();
    fb.terminate(
        entry,
        Terminator::CondJump {
            cond: is_done,
            then_block: no_block,
            else_block: check_peek,
        },
    );
    ret_bool(&mut fb, no_block, 0);

    // An unconsumed element is already stashed.
    let self1 = load_self(&mut fb, check_peek);
    let peeked = fb.reg(Idx::I1);
    fb.push(
        check_peek,
        Op::GetField { dst: peeked, object: self1, class: class_id, slot: GEN_PEEKED_SLOT },
    );
    let yes_block = fb.new_block();
    let advance = fb.new_block();
    fb.terminate(
        check_peek,
        Terminator::CondJump {
            cond: peeked,
            then_block: yes_block,
            else_block: advance,
        },
    );
    ret_bool(&mut fb, yes_block, 1);

    // Advance: run the machine to its next yield or to completion.
    let self2 = load_self(&mut fb, advance);
    let value = fb.reg(elem_ty);
    fb.push(
        advance,
        Op::CallVirtual {
            dst: value,
            receiver: self2,
            class: class_id,
            slot: resume_slot,
            args: Args::new(),
        },
    );
    let self3 = load_self(&mut fb, advance);
    let state2 = fb.reg(Idx::I32);
    fb.push(advance, Op::GetField { dst: state2, object: self3, class: class_id, slot: STATE_SLOT });
    let done_const2 = fb.reg(Idx::I32);
    fb.push(advance, Op::ConstInt { dst: done_const2, value: i64::from(DONE_STATE) });
    let finished = fb.reg(Idx::I1);
    fb.push(advance, Op::ICmp { dst: finished, cmp: Cmp::Eq, lhs: state2, rhs: done_const2 });
    let exhausted = fb.new_block();
    let stash = fb.new_block();
    fb.terminate(
        advance,
        Terminator::CondJump {
            cond: finished,
            then_block: exhausted,
            else_block: stash,
        },
    );
    ret_bool(&mut fb, exhausted, 0);

    let self4 = load_self(&mut fb, stash);
    fb.push(
        stash,
        Op::SetField {
            object: self4,
            class: class_id,
            slot: GEN_PENDING_SLOT,
            value,
        },
    );
    let self5 = load_self(&mut fb, stash);
    let truth = fb.reg(Idx::I1);
    fb.push(stash, Op::ConstInt { dst: truth, value: 1 });
    fb.push(
        stash,
        Op::SetField {
            object: self5,
            class: class_id,
            slot: GEN_PEEKED_SLOT,
            value: truth,
        },
    );
    ret_bool(&mut fb, stash, 1);

    cx.add_synth(fb.finish())
}

/// `next()`: return the stashed element, or advance the machine.
fn build_next(cx: &mut Cx<'_>, class_id: ClassId, elem_ty: Idx, resume_slot: u32) -> FunctionId {
    let self_ty = cx.pool.class(class_id);
    let name = cx.interner.intern("next");
    let mut fb = FunctionBuilder::new(
        FunctionId::new(u32::MAX),
        name,
        Some(class_id),
        &[self_ty],
        elem_ty,
        FnAttrs::SYNTHETIC,
    );
    let entry = BlockId::new(0);

    let self0 = fb.reg(self_ty);
    fb.push(entry, Op::LoadLocal { dst: self0, local: LocalId::new(0) });
    let peeked = fb.reg(Idx::I1);
    fb.push(
        entry,
        Op::GetField { dst: peeked, object: self0, class: class_id, slot: GEN_PEEKED_SLOT },
    );
    let pop = fb.new_block();
    let advance = fb.new_block();
    fb.terminate(
        entry,
        Terminator::CondJump {
            cond: peeked,
            then_block: pop,
            else_block: advance,
        },
    );

    // Consume the stash.
    let self1 = fb.reg(self_ty);
    fb.push(pop, Op::LoadLocal { dst: self1, local: LocalId::new(0) });
    let falsity = fb.reg(Idx::I1);
    fb.push(pop, Op::ConstInt { dst: falsity, value: 0 });
    fb.push(
        pop,
        Op::SetField {
            object: self1,
            class: class_id,
            slot: GEN_PEEKED_SLOT,
            value: falsity,
        },
    );
    let self2 = fb.reg(self_ty);
    fb.push(pop, Op::LoadLocal { dst: self2, local: LocalId::new(0) });
    let pending = fb.reg(elem_ty);
    fb.push(
        pop,
        Op::GetField {
            dst: pending,
            object: self2,
            class: class_id,
            slot: GEN_PENDING_SLOT,
        },
    );
    fb.terminate(pop, Terminator::Ret { value: Some(pending) });

    // Nothing stashed: run the machine directly.
    let self3 = fb.reg(self_ty);
    fb.push(advance, Op::LoadLocal { dst: self3, local: LocalId::new(0) });
    let value = fb.reg(elem_ty);
    fb.push(
        advance,
        Op::CallVirtual {
            dst: value,
            receiver: self3,
            class: class_id,
            slot: resume_slot,
            args: Args::new(),
        },
    );
    fb.terminate(advance, Terminator::Ret { value: Some(value) });

    cx.add_synth(fb.finish())
}

/// The callable wrapper that sits at the AST function id: allocate the
/// machine, install the arguments, and (for async) create the future and
/// run to the first suspension.
#[allow(
    clippy::too_many_arguments,
    reason = "one-shot construction helper threading module context"
)]
fn build_wrapper(
    cx: &mut Cx<'_>,
    fid: FunctionId,
    def: &FunctionDef,
    class_id: ClassId,
    is_async: bool,
    inner_ty: Idx,
    first_local_slot: u32,
    resume_slot: u32,
) -> ember_anvil::AnvilFunction {
    let params: Vec<Idx> = def
        .params()
        .iter()
        .map(|p| Idx::from_type_id(p.ty))
        .collect();
    let ret = if is_async {
        cx.pool.future(inner_ty)
    } else {
        cx.object_ty()
    };
    let mut fb = FunctionBuilder::new(fid, def.name, def.owner, &params, ret, FnAttrs::empty());
    let entry = BlockId::new(0);
    let sm_ty = cx.pool.class(class_id);

    let sm = fb.reg(sm_ty);
    fb.push(entry, Op::New { dst: sm, class: class_id, args: Args::new() });
    let zero = fb.reg(Idx::I32);
    fb.push(entry, Op::ConstInt { dst: zero, value: 0 });
    fb.push(
        entry,
        Op::SetField {
            object: sm,
            class: class_id,
            slot: STATE_SLOT,
            value: zero,
        },
    );
    if !is_async {
        let falsity = fb.reg(Idx::I1);
        fb.push(entry, Op::ConstInt { dst: falsity, value: 0 });
        fb.push(
            entry,
            Op::SetField {
                object: sm,
                class: class_id,
                slot: GEN_PEEKED_SLOT,
                value: falsity,
            },
        );
    }

    // Arguments land in the local-mirror fields the entry dispatch
    // reloads from.
    for (i, &param_ty) in params.iter().enumerate() {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "parameter counts are bounded by source arity"
        )]
        let local = LocalId::new(i as u32);
        let value = fb.reg(param_ty);
        fb.push(entry, Op::LoadLocal { dst: value, local });
        #[allow(
            clippy::cast_possible_truncation,
            reason = "parameter counts are bounded by source arity"
        )]
        fb.push(
            entry,
            Op::SetField {
                object: sm,
                class: class_id,
                slot: first_local_slot + i as u32,
                value,
            },
        );
    }

    if is_async {
        let future_ty = cx.pool.future(inner_ty);
        let fut = fb.reg(future_ty);
        fb.push(entry, Op::FutureNew { dst: fut, state_machine: sm });
        fb.push(
            entry,
            Op::SetField {
                object: sm,
                class: class_id,
                slot: ASYNC_FUTURE_SLOT,
                value: fut,
            },
        );
        // Run synchronously to the first await.
        let ignored = fb.reg(Idx::NIL);
        fb.push(
            entry,
            Op::CallVirtual {
                dst: ignored,
                receiver: sm,
                class: class_id,
                slot: resume_slot,
                args: Args::new(),
            },
        );
        fb.terminate(entry, Terminator::Ret { value: Some(fut) });
    } else {
        fb.terminate(entry, Terminator::Ret { value: Some(sm) });
    }

    fb.finish()
}
