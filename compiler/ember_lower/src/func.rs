//! Per-function lowering state.
//!
//! One [`FunctionLowerer`] exists per Anvil body being built: a lowered
//! AST function, a closure `call` method, or a coroutine resume body.
//! It owns the [`FunctionBuilder`], the scope stack used for finally
//! duplication, and the binding map from AST local slots to Anvil local
//! slots (plain or capture-cell).

use ember_anvil::{
    AnvilFunction, BlockId, FnAttrs, FunctionBuilder, Op, Reg, Terminator, TryRegionId,
};
use ember_ir::ast::{FunctionDef, LayoutKind};
use ember_ir::{ClassId, ExprId, FunctionId, LocalId, Name, Span, StmtRange};
use ember_resolve::FieldSlot;
use ember_types::{layout, Idx};
use rustc_hash::FxHashMap;

use crate::{Cx, LowerError};

/// Where an AST local lives in the Anvil function being built.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Binding {
    /// Plain slot holding the value.
    Slot(LocalId),
    /// Slot holding a capture cell; `ty` is the value type inside.
    Cell { slot: LocalId, ty: Idx },
}

/// One entry of the structured-exit stack.
///
/// `return`/`break`/`continue` cannot jump straight out: every enclosing
/// finally body and `using` dispose must run first, so the exits replay
/// them innermost-out.
#[derive(Copy, Clone)]
pub(crate) enum Scope {
    Loop {
        break_to: BlockId,
        continue_to: BlockId,
    },
    Finally {
        body: StmtRange,
    },
    Dispose {
        local: LocalId,
    },
}

/// Extra state for generator/async resume bodies.
pub(crate) struct CoroCtx {
    pub class: ClassId,
    pub state_slot: u32,
    /// Async: field slot of the backing future. Generators: unused.
    pub future_slot: u32,
    pub is_async: bool,
    pub resume_points: Vec<BlockId>,
    /// The done state stored when the body runs off its end.
    pub done_state: i32,
    /// The resume body's return type (the yield element for generators,
    /// nil for async bodies).
    pub ret_ty: Idx,
}

pub(crate) struct FunctionLowerer<'m, 'a> {
    pub cx: &'m mut Cx<'a>,
    /// The AST function whose local table names this body's variables.
    pub func: &'a FunctionDef,
    /// Id of the AST function (for capture-cell flags).
    pub ast_id: FunctionId,
    pub fb: FunctionBuilder,
    pub scopes: Vec<Scope>,
    pub regions: Vec<TryRegionId>,
    pub bindings: FxHashMap<LocalId, Binding>,
    pub coro: Option<CoroCtx>,
}

impl<'m, 'a> FunctionLowerer<'m, 'a> {
    /// Set up a lowerer for a plain AST function body.
    pub fn for_ast_function(
        cx: &'m mut Cx<'a>,
        fid: FunctionId,
        def: &'a FunctionDef,
        attrs: FnAttrs,
    ) -> Self {
        let params: Vec<Idx> = def
            .params()
            .iter()
            .map(|p| Idx::from_type_id(p.ty))
            .collect();
        let fb = FunctionBuilder::new(
            fid,
            def.name,
            def.owner,
            &params,
            Idx::from_type_id(def.ret),
            attrs,
        );
        let mut lowerer = Self {
            cx,
            func: def,
            ast_id: fid,
            fb,
            scopes: Vec::new(),
            regions: Vec::new(),
            bindings: FxHashMap::default(),
            coro: None,
        };
        // Parameters bind to their own slots up front.
        for i in 0..def.arity {
            lowerer.bindings.insert(LocalId::new(i), Binding::Slot(LocalId::new(i)));
        }
        lowerer
    }

    // ── Shared lookups ──────────────────────────────────────────

    /// Canonical type of an expression (the input contract).
    pub fn expr_ty(&mut self, expr: ExprId) -> Idx {
        let ty = self.cx.ast.arena.ty(expr);
        if ty.is_none() {
            let span = self.cx.ast.arena.span(expr);
            self.cx.error(LowerError::ContractViolation {
                detail: "expression node carries no type".into(),
                span,
            });
            return Idx::NIL;
        }
        Idx::from_type_id(ty)
    }

    pub fn span(&self, expr: ExprId) -> Span {
        self.cx.ast.arena.span(expr)
    }

    /// Whether `local` must live in a capture cell.
    fn is_cell(&self, local: LocalId) -> bool {
        self.cx
            .resolution
            .function(self.ast_id)
            .cells
            .get(local.index())
            .copied()
            .unwrap_or(false)
    }

    /// Binding for an AST local, created on first touch.
    pub fn binding_for(&mut self, local: LocalId) -> Binding {
        if let Some(&binding) = self.bindings.get(&local) {
            return binding;
        }
        let ty = Idx::from_type_id(self.func.locals[local.index()].ty);
        let binding = if self.is_cell(local) {
            let boxed = self.cx.boxed_ty();
            Binding::Cell {
                slot: self.fb.add_local(boxed),
                ty,
            }
        } else {
            Binding::Slot(self.fb.add_local(ty))
        };
        self.bindings.insert(local, binding);
        binding
    }

    /// Rebind an AST local explicitly (closure/coroutine mirrors).
    pub fn bind(&mut self, local: LocalId, binding: Binding) {
        self.bindings.insert(local, binding);
    }

    /// Read an AST local into a register.
    pub fn local_read(&mut self, block: BlockId, local: LocalId) -> Reg {
        match self.binding_for(local) {
            Binding::Slot(slot) => {
                let dst = self.fb.reg(self.fb.local_type(slot));
                self.fb.push(block, Op::LoadLocal { dst, local: slot });
                dst
            }
            Binding::Cell { slot, ty } => {
                let cell = self.fb.reg(self.fb.local_type(slot));
                self.fb.push(block, Op::LoadLocal { dst: cell, local: slot });
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::CellGet { dst, cell });
                dst
            }
        }
    }

    /// Write a register into an AST local.
    pub fn local_write(&mut self, block: BlockId, local: LocalId, value: Reg) {
        match self.binding_for(local) {
            Binding::Slot(slot) => {
                self.fb.push(block, Op::StoreLocal { local: slot, src: value });
            }
            Binding::Cell { slot, .. } => {
                let cell = self.fb.reg(self.fb.local_type(slot));
                self.fb.push(block, Op::LoadLocal { dst: cell, local: slot });
                self.fb.push(block, Op::CellSet { cell, value });
            }
        }
    }

    /// Initialize an AST local with a first value (`let`, loop bindings,
    /// catch bindings). Cells are allocated here.
    pub fn local_init(&mut self, block: BlockId, local: LocalId, value: Reg) {
        match self.binding_for(local) {
            Binding::Slot(slot) => {
                self.fb.push(block, Op::StoreLocal { local: slot, src: value });
            }
            Binding::Cell { slot, .. } => {
                let boxed = self.cx.boxed_ty();
                let cell = self.fb.reg(boxed);
                self.fb.push(block, Op::CellNew { dst: cell, value });
                self.fb.push(block, Op::StoreLocal { local: slot, src: cell });
            }
        }
    }

    /// Frame-entry work: move cell-captured parameters into fresh cells.
    pub fn emit_param_cells(&mut self, block: BlockId) {
        for i in 0..self.func.arity {
            let local = LocalId::new(i);
            if !self.is_cell(local) {
                continue;
            }
            let ty = Idx::from_type_id(self.func.locals[local.index()].ty);
            let boxed = self.cx.boxed_ty();
            let shadow = self.fb.add_local(boxed);
            // Reads of the parameter now go through the cell.
            let value = self.fb.reg(ty);
            self.fb.push(block, Op::LoadLocal { dst: value, local });
            let cell = self.fb.reg(boxed);
            self.fb.push(block, Op::CellNew { dst: cell, value });
            self.fb.push(block, Op::StoreLocal { local: shadow, src: cell });
            self.bind(local, Binding::Cell { slot: shadow, ty });
        }
    }

    // ── Structured exits ────────────────────────────────────────

    /// Innermost enclosing try-region, for nesting new ones.
    pub fn current_region(&self) -> Option<TryRegionId> {
        self.regions.last().copied()
    }

    /// Replay finally bodies and disposes from the top of the scope
    /// stack down to (not including) `depth`. Returns the block to
    /// continue in.
    pub fn unwind_scopes(&mut self, mut block: BlockId, depth: usize) -> BlockId {
        for index in (depth..self.scopes.len()).rev() {
            match self.scopes[index] {
                Scope::Loop { .. } => {}
                Scope::Finally { body } => {
                    // The duplicated finally runs with only the scopes
                    // outside it in effect.
                    let saved = self.scopes.split_off(index);
                    block = self.lower_stmts(block, body);
                    self.scopes.extend(saved);
                    if self.fb.is_terminated(block) {
                        return block;
                    }
                }
                Scope::Dispose { local } => {
                    block = self.emit_dispose(block, local);
                }
            }
        }
        block
    }

    /// Call `dispose()` on the resource bound to `local`.
    pub fn emit_dispose(&mut self, block: BlockId, local: LocalId) -> BlockId {
        let receiver = self.local_read(block, local);
        let receiver_ty = self.fb.reg_type(receiver);
        let dispose = self.cx.interner.intern("dispose");
        self.emit_method_by_name(block, receiver, receiver_ty, dispose, &[], Idx::NIL);
        block
    }

    /// Emit the innermost-dispatch call form for (receiver, name, args).
    ///
    /// Chooses `call_static` / `call_virtual` / `call_native` when the
    /// receiver's static class owns the method, `call_interface_like`
    /// otherwise.
    pub fn emit_method_by_name(
        &mut self,
        block: BlockId,
        receiver: Reg,
        receiver_ty: Idx,
        name: Name,
        args: &[Reg],
        result_ty: Idx,
    ) -> Reg {
        use ember_resolve::DispatchMode;
        use ember_types::Tag;

        let dst = self.fb.reg(result_ty);
        let class_like = matches!(
            self.cx.pool.tag(receiver_ty),
            Tag::Class | Tag::GenericInstance
        );
        #[allow(
            clippy::cast_possible_truncation,
            reason = "argument counts are bounded by source arity"
        )]
        let handle = if class_like {
            let class = self.cx.pool.class_id(receiver_ty);
            self.cx.class(class).method(name, args.len() as u32).cloned()
        } else {
            None
        };

        match handle {
            Some(handle) => match handle.dispatch {
                DispatchMode::Static => {
                    self.fb.push(
                        block,
                        Op::CallStatic {
                            dst,
                            function: handle.function,
                            args: args.into(),
                        },
                    );
                }
                DispatchMode::Native => {
                    self.fb.push(
                        block,
                        Op::CallNative {
                            dst,
                            function: handle.function,
                            args: args.into(),
                        },
                    );
                }
                // Virtual, generator, and async methods all dispatch
                // through their v-table slot.
                _ => match handle.vtable_slot {
                    Some(slot) => {
                        let class = self.cx.pool.class_id(receiver_ty);
                        self.fb.push(block, Op::NullCheck { object: receiver });
                        self.fb.push(
                            block,
                            Op::CallVirtual {
                                dst,
                                receiver,
                                class,
                                slot,
                                args: args.into(),
                            },
                        );
                    }
                    None => {
                        self.fb.push(
                            block,
                            Op::CallInterface {
                                dst,
                                receiver,
                                name,
                                args: args.into(),
                            },
                        );
                    }
                },
            },
            None => {
                self.fb.push(
                    block,
                    Op::CallInterface {
                        dst,
                        receiver,
                        name,
                        args: args.into(),
                    },
                );
            }
        }
        dst
    }

    /// A zero value of `ty` (generator tail returns, error recovery).
    pub fn emit_default(&mut self, block: BlockId, ty: Idx) -> Reg {
        use ember_types::Tag;
        let dst = self.fb.reg(ty);
        match self.cx.pool.tag(ty) {
            Tag::I1 | Tag::I8 | Tag::I32 | Tag::I64 | Tag::IntPtr => {
                self.fb.push(block, Op::ConstInt { dst, value: 0 });
            }
            Tag::F32 => {
                self.fb.push(block, Op::ConstFloat { dst, bits: 0 });
            }
            Tag::F64 => {
                self.fb.push(block, Op::ConstDouble { dst, bits: 0 });
            }
            _ => {
                self.fb.push(block, Op::ConstNil { dst });
            }
        }
        dst
    }
}

/// Lower one plain AST function body.
pub(crate) fn lower_function<'a>(
    cx: &mut Cx<'a>,
    fid: FunctionId,
    def: &'a FunctionDef,
) -> AnvilFunction {
    let _span = tracing::trace_span!("lower_function", name = cx.interner.lookup(def.name))
        .entered();

    let mut lowerer = FunctionLowerer::for_ast_function(cx, fid, def, FnAttrs::empty());
    let entry = BlockId::new(0);
    lowerer.emit_param_cells(entry);

    let block = lowerer.emit_dispose_guard(entry);
    let block = lowerer.lower_stmts(block, def.body);
    if !lowerer.fb.is_terminated(block) {
        // Implicit nil return at the end of the body.
        lowerer.fb.terminate(block, Terminator::Ret { value: None });
    }
    lowerer.fb.finish()
}

impl FunctionLowerer<'_, '_> {
    /// Prologue of a user-written `dispose` method: make the second call
    /// a no-op through the per-instance disposed flag.
    pub(crate) fn emit_dispose_guard(&mut self, block: BlockId) -> BlockId {
        let Some(owner) = self.func.owner else {
            return block;
        };
        let dispose = self.cx.interner.intern("dispose");
        if self.func.name != dispose || self.func.is_static {
            return block;
        }
        let Some(flag_slot) = disposed_flag_slot(self.cx, owner) else {
            return block;
        };

        let receiver_ty = self.cx.pool.class(owner);
        let receiver = self.fb.reg(receiver_ty);
        self.fb.push(block, Op::LoadLocal { dst: receiver, local: LocalId::new(0) });
        let flag = self.fb.reg(Idx::I1);
        self.fb.push(
            block,
            Op::GetField {
                dst: flag,
                object: receiver,
                class: owner,
                slot: flag_slot,
            },
        );
        let done = self.fb.new_block();
        let body = self.fb.new_block();
        self.fb.terminate(
            block,
            Terminator::CondJump {
                cond: flag,
                then_block: done,
                else_block: body,
            },
        );
        self.fb.terminate(done, Terminator::Ret { value: None });

        let receiver2 = self.fb.reg(receiver_ty);
        self.fb.push(body, Op::LoadLocal { dst: receiver2, local: LocalId::new(0) });
        let truth = self.fb.reg(Idx::I1);
        self.fb.push(body, Op::ConstInt { dst: truth, value: 1 });
        self.fb.push(
            body,
            Op::SetField {
                object: receiver2,
                class: owner,
                slot: flag_slot,
                value: truth,
            },
        );
        body
    }
}

/// Slot of the hidden `$disposed` flag on `class`, if it has one.
pub(crate) fn disposed_flag_slot(cx: &Cx<'_>, class: ClassId) -> Option<u32> {
    let flag = cx.interner.get("$disposed")?;
    cx.class(class).fields.iter().find(|f| f.name == flag).map(|f| f.slot)
}

/// Append the hidden `$disposed: i1` field to every class defining a
/// `dispose` method, and refresh the affected layouts.
pub(crate) fn add_dispose_flags(cx: &mut Cx<'_>) {
    let dispose = cx.interner.intern("dispose");
    let flag = cx.interner.intern("$disposed");

    for class_index in 0..cx.classes.len() {
        let descriptor = &cx.classes[class_index];
        let owns_dispose = descriptor
            .method(dispose, 0)
            .is_some_and(|m| m.owner == descriptor.id);
        if !owns_dispose || descriptor.fields.iter().any(|f| f.name == flag) {
            continue;
        }

        let id = descriptor.id;
        let layout_kind = descriptor.layout_kind;
        #[allow(
            clippy::cast_possible_truncation,
            reason = "field count is bounded by u32 slot indices"
        )]
        let slot = descriptor.fields.len() as u32;
        cx.classes[class_index].fields.push(FieldSlot {
            name: flag,
            ty: Idx::I1,
            slot,
            offset: 0,
            declared_in: id,
            json_key: None,
        });

        let field_types: Vec<Idx> = cx.classes[class_index].fields.iter().map(|f| f.ty).collect();
        let new_layout = layout::compute(cx.pool, layout_kind, &field_types);
        for (field, placed) in cx.classes[class_index]
            .fields
            .iter_mut()
            .zip(&new_layout.fields)
        {
            field.offset = placed.offset;
        }
        cx.pool.set_layout(id, new_layout);
    }
}

/// Synthesized class descriptor scaffold (closures, state machines).
pub(crate) fn synthetic_class(
    cx: &mut Cx<'_>,
    name: String,
    parent: ClassId,
) -> ember_resolve::ClassDescriptor {
    ember_resolve::ClassDescriptor {
        id: ClassId::new(0), // reassigned by add_class
        name: cx.interner.intern(&name),
        parent: Some(parent),
        layout_kind: LayoutKind::Object,
        serialization: ember_ir::ast::SerializationPolicy::None,
        native: None,
        type_param_count: 0,
        fields: Vec::new(),
        methods: FxHashMap::default(),
        vtable: cx.class(parent).vtable.clone(),
    }
}
