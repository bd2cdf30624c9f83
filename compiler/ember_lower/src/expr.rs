//! Expression lowering.
//!
//! Every expression lowers to a typed register. Short-circuit logic and
//! `await` introduce control flow, so lowering returns the block it ended
//! in along with the result register.

use ember_anvil::{Args, BlockId, Cmp, Op, Reg, Terminator};
use ember_ir::ast::{BinaryOp, ExprKind, LogicOp, UnaryOp};
use ember_ir::{ClassId, ExprId, Name};
use ember_types::{Idx, Tag, TypeFlags};

use crate::func::FunctionLowerer;
use crate::LowerError;

impl FunctionLowerer<'_, '_> {
    /// Lower one expression; returns the block lowering ended in and the
    /// result register.
    #[allow(
        clippy::too_many_lines,
        reason = "one arm per expression kind keeps the dispatch in one place"
    )]
    pub(crate) fn lower_expr(&mut self, block: BlockId, expr: ExprId) -> (BlockId, Reg) {
        let ast = self.cx.ast;
        let ty = self.expr_ty(expr);
        let span = self.span(expr);

        match *ast.arena.kind(expr) {
            ExprKind::Int(value) => {
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::ConstInt { dst, value });
                (block, dst)
            }
            ExprKind::Float(bits) => {
                let dst = self.fb.reg(ty);
                if self.cx.pool.tag(ty) == Tag::F32 {
                    #[allow(
                        clippy::cast_possible_truncation,
                        reason = "explicit f64-to-f32 literal narrowing"
                    )]
                    let narrow = (f64::from_bits(bits) as f32).to_bits();
                    self.fb.push(block, Op::ConstFloat { dst, bits: narrow });
                } else {
                    self.fb.push(block, Op::ConstDouble { dst, bits });
                }
                (block, dst)
            }
            ExprKind::Bool(value) => {
                let dst = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::ConstInt { dst, value: i64::from(value) });
                (block, dst)
            }
            ExprKind::Str(name) => {
                let contents = self.cx.interner.lookup(name);
                let id = self.cx.strings.intern(contents);
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::ConstString { dst, value: id });
                (block, dst)
            }
            ExprKind::Nil => {
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::ConstNil { dst });
                (block, dst)
            }

            ExprKind::Local(local) => {
                let dst = self.local_read(block, local);
                (block, dst)
            }

            ExprKind::Unary { op, operand } => {
                let (block, src) = self.lower_expr(block, operand);
                let dst = self.fb.reg(ty);
                match op {
                    UnaryOp::Neg => {
                        if self.cx.pool.tag(ty) == Tag::F32 || self.cx.pool.tag(ty) == Tag::F64 {
                            self.fb.push(block, Op::FNeg { dst, src });
                        } else {
                            self.fb.push(block, Op::INeg { dst, src });
                        }
                    }
                    UnaryOp::Not => {
                        self.fb.push(block, Op::Not { dst, src });
                    }
                    UnaryOp::BitNot => {
                        let ones = self.fb.reg(ty);
                        self.fb.push(block, Op::ConstInt { dst: ones, value: -1 });
                        self.fb.push(block, Op::BitXor { dst, lhs: src, rhs: ones });
                    }
                }
                (block, dst)
            }

            ExprKind::Binary { op, lhs, rhs } => {
                let (block, l) = self.lower_expr(block, lhs);
                let (block, r) = self.lower_expr(block, rhs);
                let dst = self.emit_binary(block, op, l, r, ty, span);
                (block, dst)
            }

            ExprKind::Logic { op, lhs, rhs } => self.lower_logic(block, op, lhs, rhs),

            ExprKind::Cast { operand } => {
                let (block, src) = self.lower_expr(block, operand);
                let dst = self.emit_cast(block, src, ty, span);
                (block, dst)
            }

            ExprKind::New { class, args } => {
                let (block, arg_regs) = self.lower_new_args(block, class, args);
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::New { dst, class, args: arg_regs });
                (block, dst)
            }

            ExprKind::FieldGet {
                object,
                class,
                field,
            } => {
                let (block, obj) = self.lower_expr(block, object);
                self.fb.push(block, Op::NullCheck { object: obj });
                let dst = self.emit_field_load(block, obj, class, field, ty);
                (block, dst)
            }

            ExprKind::MethodCall {
                receiver,
                name,
                args,
            } => self.lower_method_call(block, receiver, name, args, ty),

            ExprKind::StaticCall { function, args } => {
                let (block, arg_regs) = self.lower_args(block, args);
                let dst = self.fb.reg(ty);
                self.fb.push(
                    block,
                    Op::CallStatic {
                        dst,
                        function,
                        args: arg_regs,
                    },
                );
                (block, dst)
            }

            ExprKind::ClassCall { class, name, args } => {
                self.lower_class_call(block, class, name, args, ty, span)
            }

            ExprKind::BlockCall { callee, args } => {
                let (block, callee_reg) = self.lower_expr(block, callee);
                let (block, arg_regs) = self.lower_args(block, args);
                let callee_ty = self.fb.reg_type(callee_reg);
                let call = self.cx.interner.intern("call");
                let arg_slice: Vec<Reg> = arg_regs.to_vec();
                let dst =
                    self.emit_method_by_name(block, callee_reg, callee_ty, call, &arg_slice, ty);
                (block, dst)
            }

            ExprKind::ArrayLit { elems } => {
                let elem_ty = self.cx.pool.elem(ty);
                let count = ast.arena.exprs(elems).len();
                let len = self.fb.reg(Idx::I64);
                #[allow(
                    clippy::cast_possible_wrap,
                    reason = "literal lengths are far below i64::MAX"
                )]
                self.fb.push(block, Op::ConstInt { dst: len, value: count as i64 });
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::ArrayNew { dst, elem: elem_ty, len });

                let mut block = block;
                for (i, &elem) in ast.arena.exprs(elems).iter().enumerate() {
                    let (next, v) = self.lower_expr(block, elem);
                    block = next;
                    let v = self.box_for_slot(block, v, elem_ty);
                    let index = self.fb.reg(Idx::I64);
                    #[allow(
                        clippy::cast_possible_wrap,
                        reason = "literal lengths are far below i64::MAX"
                    )]
                    self.fb.push(block, Op::ConstInt { dst: index, value: i as i64 });
                    self.fb.push(block, Op::ArraySet { array: dst, index, value: v });
                }
                (block, dst)
            }

            ExprKind::HashLit { entries } => {
                let key_ty = self.cx.pool.hash_key(ty);
                let val_ty = self.cx.pool.hash_value(ty);
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::HashNew { dst, key: key_ty, value: val_ty });

                let mut block = block;
                for &entry in ast.arena.entries(entries) {
                    let (next, k) = self.lower_expr(block, entry.key);
                    let (next, v) = self.lower_expr(next, entry.value);
                    block = next;
                    let k = self.box_for_slot(block, k, key_ty);
                    let v = self.box_for_slot(block, v, val_ty);
                    self.fb.push(block, Op::HashSet { hash: dst, key: k, value: v });
                }
                (block, dst)
            }

            ExprKind::RangeLit { start, end } => {
                let (block, s) = self.lower_expr(block, start);
                let (block, e) = self.lower_expr(block, end);
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::RangeNew { dst, start: s, end: e });
                (block, dst)
            }

            ExprKind::TupleLit { elems } => {
                let (block, elem_regs) = self.lower_args(block, elems);
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::TupleNew { dst, elems: elem_regs });
                (block, dst)
            }

            ExprKind::TupleGet { tuple, index } => {
                let (block, t) = self.lower_expr(block, tuple);
                let tuple_ty = self.fb.reg_type(t);
                let elem_ty = self
                    .cx
                    .pool
                    .tuple_elems(tuple_ty)
                    .get(index as usize)
                    .copied()
                    .unwrap_or(Idx::NIL);
                let dst = self.emit_reinterpret_read(block, elem_ty, ty, |fb, dst| {
                    fb.push(block, Op::TupleGet { dst, tuple: t, index });
                });
                (block, dst)
            }

            ExprKind::Index { object, index } => {
                let (block, obj) = self.lower_expr(block, object);
                let (block, idx) = self.lower_expr(block, index);
                let obj_ty = self.fb.reg_type(obj);
                match self.cx.pool.tag(obj_ty) {
                    Tag::Array => {
                        let elem_ty = self.cx.pool.elem(obj_ty);
                        let dst = self.emit_array_get(block, obj, idx, elem_ty, ty);
                        (block, dst)
                    }
                    Tag::Hash => {
                        let val_ty = self.cx.pool.hash_value(obj_ty);
                        let dst = self.emit_reinterpret_read(block, val_ty, ty, |fb, dst| {
                            fb.push(block, Op::HashGet { dst, hash: obj, key: idx });
                        });
                        (block, dst)
                    }
                    _ => {
                        self.cx.error(LowerError::ContractViolation {
                            detail: "indexing a non-collection".into(),
                            span,
                        });
                        let dst = self.emit_default(block, ty);
                        (block, dst)
                    }
                }
            }

            ExprKind::Length { object } => {
                let (block, obj) = self.lower_expr(block, object);
                let obj_ty = self.fb.reg_type(obj);
                let dst = self.fb.reg(Idx::I64);
                match self.cx.pool.tag(obj_ty) {
                    Tag::Array => self.fb.push(block, Op::ArrayLen { dst, array: obj }),
                    Tag::Hash => self.fb.push(block, Op::HashLen { dst, hash: obj }),
                    _ => {
                        self.cx.error(LowerError::ContractViolation {
                            detail: "length of a non-collection".into(),
                            span,
                        });
                        self.fb.push(block, Op::ConstInt { dst, value: 0 });
                    }
                }
                (block, dst)
            }

            ExprKind::Block { params, body } => self.lower_block_literal(block, expr, params, body),

            ExprKind::Await { operand } => self.lower_await(block, operand, ty, span),

            ExprKind::ChannelNew { capacity } => {
                let (block, cap) = self.lower_expr(block, capacity);
                let dst = self.fb.reg(ty);
                self.fb.push(block, Op::ChannelNew { dst, capacity: cap });
                (block, dst)
            }

            ExprKind::ThreadSpawn { closure } => {
                let (block, c) = self.lower_expr(block, closure);
                self.fb.push(block, Op::ThreadSpawn { closure: c });
                let dst = self.fb.reg(Idx::NIL);
                self.fb.push(block, Op::ConstNil { dst });
                (block, dst)
            }

            ExprKind::Interp { parts } => self.lower_interp(block, parts, ty),

            ExprKind::Error => {
                self.cx.error(LowerError::ContractViolation {
                    detail: "error placeholder expression".into(),
                    span,
                });
                let dst = self.emit_default(block, ty);
                (block, dst)
            }
        }
    }

    /// Lower an argument list left to right.
    pub(crate) fn lower_args(
        &mut self,
        mut block: BlockId,
        args: ember_ir::ExprRange,
    ) -> (BlockId, Args) {
        let ast = self.cx.ast;
        let mut regs = Args::new();
        for &arg in ast.arena.exprs(args) {
            let (next, reg) = self.lower_expr(block, arg);
            block = next;
            regs.push(reg);
        }
        (block, regs)
    }

    /// Lower `new` arguments, boxing primitives bound to erased
    /// initializer parameters.
    fn lower_new_args(
        &mut self,
        block: BlockId,
        class: ClassId,
        args: ember_ir::ExprRange,
    ) -> (BlockId, Args) {
        let initialize = self.cx.interner.intern("initialize");
        let (block, mut regs) = self.lower_args(block, args);
        #[allow(
            clippy::cast_possible_truncation,
            reason = "argument counts are bounded by source arity"
        )]
        let param_types: Option<Vec<Idx>> = self
            .cx
            .class(class)
            .method(initialize, regs.len() as u32)
            .map(|handle| self.cx.pool.function_params(handle.signature));
        if let Some(param_types) = param_types {
            for (reg, &slot_ty) in regs.iter_mut().zip(&param_types) {
                *reg = self.box_for_slot_reg(block, *reg, slot_ty);
            }
        }
        (block, regs)
    }

    fn emit_binary(
        &mut self,
        block: BlockId,
        op: BinaryOp,
        lhs: Reg,
        rhs: Reg,
        ty: Idx,
        span: ember_ir::Span,
    ) -> Reg {
        let operand_ty = self.fb.reg_type(lhs);
        let is_float = matches!(self.cx.pool.tag(operand_ty), Tag::F32 | Tag::F64);
        let is_string = self.cx.pool.tag(operand_ty) == Tag::Class
            && self.cx.pool.class_id(operand_ty) == self.cx.resolution.well_known.string;

        if op.is_comparison() {
            let cmp = comparison(op);
            let dst = self.fb.reg(Idx::I1);
            if is_float {
                self.fb.push(block, Op::FCmp { dst, cmp, lhs, rhs });
            } else {
                self.fb.push(block, Op::ICmp { dst, cmp, lhs, rhs });
            }
            return dst;
        }

        let dst = self.fb.reg(ty);
        match op {
            BinaryOp::Add if is_string => self.fb.push(block, Op::StringConcat { dst, lhs, rhs }),
            BinaryOp::Add if is_float => self.fb.push(block, Op::FAdd { dst, lhs, rhs }),
            BinaryOp::Add => self.fb.push(block, Op::IAdd { dst, lhs, rhs }),
            BinaryOp::Sub if is_float => self.fb.push(block, Op::FSub { dst, lhs, rhs }),
            BinaryOp::Sub => self.fb.push(block, Op::ISub { dst, lhs, rhs }),
            BinaryOp::Mul if is_float => self.fb.push(block, Op::FMul { dst, lhs, rhs }),
            BinaryOp::Mul => self.fb.push(block, Op::IMul { dst, lhs, rhs }),
            BinaryOp::Div if is_float => self.fb.push(block, Op::FDiv { dst, lhs, rhs }),
            BinaryOp::Div => self.fb.push(block, Op::IDiv { dst, lhs, rhs }),
            BinaryOp::Mod if is_float => self.fb.push(block, Op::FMod { dst, lhs, rhs }),
            BinaryOp::Mod => self.fb.push(block, Op::IMod { dst, lhs, rhs }),
            BinaryOp::BitAnd => self.fb.push(block, Op::BitAnd { dst, lhs, rhs }),
            BinaryOp::BitOr => self.fb.push(block, Op::BitOr { dst, lhs, rhs }),
            BinaryOp::BitXor => self.fb.push(block, Op::BitXor { dst, lhs, rhs }),
            BinaryOp::Shl => self.fb.push(block, Op::Shl { dst, lhs, rhs }),
            BinaryOp::Shr => self.fb.push(block, Op::Shr { dst, lhs, rhs }),
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge => {
                // Handled above; reaching here means the front end sent a
                // comparison with a non-i1 result type.
                self.cx.error(LowerError::ContractViolation {
                    detail: "comparison with non-boolean result".into(),
                    span,
                });
            }
        }
        dst
    }

    /// Short-circuit `and`/`or` via a join block with one i1 parameter.
    fn lower_logic(
        &mut self,
        block: BlockId,
        op: LogicOp,
        lhs: ExprId,
        rhs: ExprId,
    ) -> (BlockId, Reg) {
        let (block, l) = self.lower_expr(block, lhs);
        let rhs_block = self.fb.new_block();
        let short_block = self.fb.new_block();
        let join = self.fb.new_block();
        let result = self.fb.block_param(join, Idx::I1);

        match op {
            LogicOp::And => self.fb.terminate(
                block,
                Terminator::CondJump {
                    cond: l,
                    then_block: rhs_block,
                    else_block: short_block,
                },
            ),
            LogicOp::Or => self.fb.terminate(
                block,
                Terminator::CondJump {
                    cond: l,
                    then_block: short_block,
                    else_block: rhs_block,
                },
            ),
        }

        // Short-circuit edge carries the deciding constant.
        let short_value = self.fb.reg(Idx::I1);
        let value = i64::from(matches!(op, LogicOp::Or));
        self.fb.push(short_block, Op::ConstInt { dst: short_value, value });
        self.fb.terminate(
            short_block,
            Terminator::Jump {
                target: join,
                args: Args::from_slice(&[short_value]),
            },
        );

        let (rhs_end, r) = self.lower_expr(rhs_block, rhs);
        self.fb.terminate(
            rhs_end,
            Terminator::Jump {
                target: join,
                args: Args::from_slice(&[r]),
            },
        );

        (join, result)
    }

    /// Explicit conversions; boxing and unboxing included.
    fn emit_cast(&mut self, block: BlockId, src: Reg, target: Idx, span: ember_ir::Span) -> Reg {
        let source = self.fb.reg_type(src);
        if source == target {
            return src;
        }

        let src_tag = self.cx.pool.tag(source);
        let dst_tag = self.cx.pool.tag(target);
        let dst = self.fb.reg(target);

        match (src_tag, dst_tag) {
            (Tag::I8 | Tag::I32 | Tag::I64 | Tag::IntPtr, Tag::F32 | Tag::F64) => {
                self.fb.push(block, Op::IntToFloat { dst, src });
            }
            (Tag::F32 | Tag::F64, Tag::I8 | Tag::I32 | Tag::I64 | Tag::IntPtr) => {
                self.fb.push(block, Op::FloatToInt { dst, src });
            }
            (Tag::I8 | Tag::I32, Tag::I32 | Tag::I64) => {
                self.fb.push(block, Op::SignExtend { dst, src });
            }
            (Tag::F32, Tag::F64) => {
                self.fb.push(block, Op::FloatPromote { dst, src });
            }
            _ if self.cx.pool.flags(source).contains(TypeFlags::IS_PRIMITIVE)
                && self.cx.pool.is_reference(target) =>
            {
                self.fb.push(block, Op::Box { dst, src });
            }
            _ if self.cx.pool.is_reference(source)
                && self.cx.pool.flags(target).contains(TypeFlags::IS_PRIMITIVE) =>
            {
                let boxed = self.cx.resolution.well_known.boxed;
                self.fb.push(block, Op::Unbox { dst, src, class: boxed });
            }
            _ if matches!(dst_tag, Tag::Class | Tag::GenericInstance)
                && self.cx.pool.is_reference(source) =>
            {
                let class = self.cx.pool.class_id(target);
                self.fb.push(block, Op::RefCast { dst, src, class });
            }
            _ => {
                self.cx.error(LowerError::Unsupported {
                    family: "conversion",
                    span,
                });
                self.fb.push(block, Op::ConstNil { dst });
            }
        }
        dst
    }

    fn lower_method_call(
        &mut self,
        block: BlockId,
        receiver: ExprId,
        name: Name,
        args: ember_ir::ExprRange,
        result_ty: Idx,
    ) -> (BlockId, Reg) {
        let (block, recv) = self.lower_expr(block, receiver);
        let (block, arg_regs) = self.lower_args(block, args);
        let recv_ty = self.fb.reg_type(recv);

        // Built-in receivers first.
        let send = self.cx.interner.intern("send");
        let receive = self.cx.interner.intern("receive");
        let value_name = self.cx.interner.intern("value");
        match self.cx.pool.tag(recv_ty) {
            Tag::Channel if name == send && arg_regs.len() == 1 => {
                let elem = self.cx.pool.elem(recv_ty);
                let v = self.box_for_slot_reg(block, arg_regs[0], elem);
                self.fb.push(block, Op::ChannelSend { channel: recv, value: v });
                let dst = self.fb.reg(Idx::NIL);
                self.fb.push(block, Op::ConstNil { dst });
                return (block, dst);
            }
            Tag::Channel if name == receive && arg_regs.is_empty() => {
                let elem = self.cx.pool.elem(recv_ty);
                let dst = self.emit_reinterpret_read(block, elem, result_ty, |fb, dst| {
                    fb.push(block, Op::ChannelReceive { dst, channel: recv });
                });
                return (block, dst);
            }
            Tag::Future if name == value_name && arg_regs.is_empty() => {
                let elem = self.cx.pool.elem(recv_ty);
                let dst = self.emit_reinterpret_read(block, elem, result_ty, |fb, dst| {
                    fb.push(block, Op::FutureValue { dst, future: recv });
                });
                return (block, dst);
            }
            _ => {}
        }

        let arg_slice: Vec<Reg> = arg_regs.to_vec();
        let dst = self.emit_method_by_name(block, recv, recv_ty, name, &arg_slice, result_ty);
        (block, dst)
    }

    fn lower_class_call(
        &mut self,
        block: BlockId,
        class: ClassId,
        name: Name,
        args: ember_ir::ExprRange,
        result_ty: Idx,
        span: ember_ir::Span,
    ) -> (BlockId, Reg) {
        use ember_resolve::DispatchMode;

        let (block, arg_regs) = self.lower_args(block, args);
        #[allow(
            clippy::cast_possible_truncation,
            reason = "argument counts are bounded by source arity"
        )]
        let handle = self.cx.class(class).method(name, arg_regs.len() as u32).cloned();
        let dst = self.fb.reg(result_ty);

        match handle {
            Some(handle) => match handle.dispatch {
                DispatchMode::Native => {
                    self.fb.push(
                        block,
                        Op::CallNative {
                            dst,
                            function: handle.function,
                            args: arg_regs,
                        },
                    );
                }
                // Static methods and static coroutine wrappers call
                // their bodies directly.
                _ => {
                    self.fb.push(
                        block,
                        Op::CallStatic {
                            dst,
                            function: handle.function,
                            args: arg_regs,
                        },
                    );
                }
            },
            None => {
                self.cx.error(LowerError::ContractViolation {
                    detail: "unresolved class-qualified call".into(),
                    span,
                });
                self.fb.push(block, Op::ConstNil { dst });
            }
        }
        (block, dst)
    }

    /// `await e` inside an async resume body.
    fn lower_await(
        &mut self,
        block: BlockId,
        operand: ExprId,
        result_ty: Idx,
        span: ember_ir::Span,
    ) -> (BlockId, Reg) {
        let (block, fut) = self.lower_expr(block, operand);
        let in_async = matches!(&self.coro, Some(c) if c.is_async);
        if !in_async {
            self.cx.error(LowerError::ContractViolation {
                detail: "await outside an async body".into(),
                span,
            });
            let dst = self.emit_default(block, result_ty);
            return (block, dst);
        }

        let fut_ty = self.fb.reg_type(fut);
        let fut_slot = self.fb.add_local(fut_ty);
        self.fb.push(block, Op::StoreLocal { local: fut_slot, src: fut });

        // Register the state machine as the continuation and suspend.
        let (class, _) = match &self.coro {
            Some(c) => (c.class, c.state_slot),
            None => return (block, self.emit_default(block, result_ty)),
        };
        let self_reg = self.load_self(block, class);
        self.fb.push(
            block,
            Op::FutureRegister {
                future: fut,
                continuation: self_reg,
            },
        );

        let resume = self.fb.new_block();
        if let Some(coro) = &mut self.coro {
            coro.resume_points.push(resume);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "resume point count is bounded by u32 states"
            )]
            let next_state = coro.resume_points.len() as u32;
            self.fb
                .terminate(block, Terminator::AwaitSuspend { future: fut, next_state });
        }

        // Resumed: the future has completed; `value` rethrows failures.
        let fut2 = self.fb.reg(fut_ty);
        self.fb.push(resume, Op::LoadLocal { dst: fut2, local: fut_slot });
        let elem = self.cx.pool.elem(fut_ty);
        let dst = self.emit_reinterpret_read(resume, elem, result_ty, |fb, dst| {
            fb.push(resume, Op::FutureValue { dst, future: fut2 });
        });
        (resume, dst)
    }

    /// String interpolation: convert each part, then concatenate left to
    /// right.
    fn lower_interp(
        &mut self,
        mut block: BlockId,
        parts: ember_ir::ExprRange,
        result_ty: Idx,
    ) -> (BlockId, Reg) {
        let ast = self.cx.ast;
        let to_string = self.cx.interner.intern("to_string");
        let mut acc: Option<Reg> = None;

        for &part in ast.arena.exprs(parts) {
            let (next, raw) = self.lower_expr(block, part);
            block = next;
            let raw_ty = self.fb.reg_type(raw);

            let piece = if raw_ty == result_ty {
                raw
            } else if self.cx.pool.flags(raw_ty).contains(TypeFlags::IS_PRIMITIVE) {
                let dst = self.fb.reg(result_ty);
                self.fb.push(block, Op::StringFromPrim { dst, src: raw });
                dst
            } else {
                self.emit_method_by_name(block, raw, raw_ty, to_string, &[], result_ty)
            };

            acc = Some(match acc {
                None => piece,
                Some(prefix) => {
                    let dst = self.fb.reg(result_ty);
                    self.fb.push(block, Op::StringConcat { dst, lhs: prefix, rhs: piece });
                    dst
                }
            });
        }

        let result = match acc {
            Some(reg) => reg,
            None => {
                let empty = self.cx.strings.intern("");
                let dst = self.fb.reg(result_ty);
                self.fb.push(block, Op::ConstString { dst, value: empty });
                dst
            }
        };
        (block, result)
    }

    // ── Erasure helpers ─────────────────────────────────────────

    /// Box `value` when it is a primitive headed for an erased slot.
    pub(crate) fn box_for_slot(&mut self, block: BlockId, value: Reg, slot_ty: Idx) -> Reg {
        self.box_for_slot_reg(block, value, slot_ty)
    }

    pub(crate) fn box_for_slot_reg(&mut self, block: BlockId, value: Reg, slot_ty: Idx) -> Reg {
        let erased = self
            .cx
            .pool
            .flags(slot_ty)
            .contains(TypeFlags::HAS_TYPE_PARAM);
        let primitive = self
            .cx
            .pool
            .flags(self.fb.reg_type(value))
            .contains(TypeFlags::IS_PRIMITIVE);
        if erased && primitive {
            let boxed_ty = self.cx.boxed_ty();
            let dst = self.fb.reg(boxed_ty);
            self.fb.push(block, Op::Box { dst, src: value });
            dst
        } else {
            value
        }
    }

    /// Read through a possibly-erased slot: the raw read produces the
    /// declared slot type; erased primitive sites unbox to the static
    /// type recorded at the site.
    pub(crate) fn emit_reinterpret_read(
        &mut self,
        block: BlockId,
        declared: Idx,
        static_ty: Idx,
        emit: impl FnOnce(&mut ember_anvil::FunctionBuilder, Reg),
    ) -> Reg {
        let erased = self
            .cx
            .pool
            .flags(declared)
            .contains(TypeFlags::HAS_TYPE_PARAM);
        let static_primitive = self
            .cx
            .pool
            .flags(static_ty)
            .contains(TypeFlags::IS_PRIMITIVE);

        if erased && static_primitive {
            let boxed_ty = self.cx.boxed_ty();
            let raw = self.fb.reg(boxed_ty);
            emit(&mut self.fb, raw);
            let boxed = self.cx.resolution.well_known.boxed;
            let dst = self.fb.reg(static_ty);
            self.fb.push(block, Op::Unbox { dst, src: raw, class: boxed });
            dst
        } else if erased {
            let dst = self.fb.reg(static_ty);
            emit(&mut self.fb, dst);
            dst
        } else {
            let dst = self.fb.reg(declared);
            emit(&mut self.fb, dst);
            dst
        }
    }

    /// Bounds-checked array read with erased-element handling.
    pub(crate) fn emit_array_get(
        &mut self,
        block: BlockId,
        array: Reg,
        index: Reg,
        elem_ty: Idx,
        static_ty: Idx,
    ) -> Reg {
        self.emit_reinterpret_read(block, elem_ty, static_ty, |fb, dst| {
            fb.push(block, Op::ArrayGet { dst, array, index });
        })
    }

    /// Field read with erased-slot handling.
    pub(crate) fn emit_field_load(
        &mut self,
        block: BlockId,
        object: Reg,
        class: ClassId,
        slot: u32,
        static_ty: Idx,
    ) -> Reg {
        let field_ty = self.cx.class(class).fields[slot as usize].ty;
        let erased = self
            .cx
            .pool
            .flags(field_ty)
            .contains(TypeFlags::HAS_TYPE_PARAM);

        if erased {
            let static_primitive = self
                .cx
                .pool
                .flags(static_ty)
                .contains(TypeFlags::IS_PRIMITIVE);
            if static_primitive {
                let boxed_ty = self.cx.boxed_ty();
                let raw = self.fb.reg(boxed_ty);
                self.fb.push(
                    block,
                    Op::LoadErased {
                        dst: raw,
                        object,
                        class,
                        slot,
                        static_ty: boxed_ty,
                    },
                );
                let boxed = self.cx.resolution.well_known.boxed;
                let dst = self.fb.reg(static_ty);
                self.fb.push(block, Op::Unbox { dst, src: raw, class: boxed });
                dst
            } else {
                let dst = self.fb.reg(static_ty);
                self.fb.push(
                    block,
                    Op::LoadErased {
                        dst,
                        object,
                        class,
                        slot,
                        static_ty,
                    },
                );
                dst
            }
        } else {
            let dst = self.fb.reg(field_ty);
            self.fb.push(block, Op::GetField { dst, object, class, slot });
            dst
        }
    }

    /// Field write with erased-slot handling and automatic boxing.
    pub(crate) fn emit_field_store(
        &mut self,
        block: BlockId,
        object: Reg,
        class: ClassId,
        slot: u32,
        value: Reg,
    ) {
        let field_ty = self.cx.class(class).fields[slot as usize].ty;
        let erased = self
            .cx
            .pool
            .flags(field_ty)
            .contains(TypeFlags::HAS_TYPE_PARAM);

        if erased {
            let value = self.box_for_slot_reg(block, value, field_ty);
            self.fb.push(block, Op::StoreErased { object, class, slot, value });
        } else {
            self.fb.push(block, Op::SetField { object, class, slot, value });
        }
    }

    /// Load the state-machine receiver (`self`, local 0).
    pub(crate) fn load_self(&mut self, block: BlockId, class: ClassId) -> Reg {
        let ty = self.cx.pool.class(class);
        let dst = self.fb.reg(ty);
        self.fb.push(
            block,
            Op::LoadLocal {
                dst,
                local: ember_ir::LocalId::new(0),
            },
        );
        dst
    }
}

/// Map an AST comparison operator to the opcode predicate.
fn comparison(op: BinaryOp) -> Cmp {
    match op {
        BinaryOp::Eq => Cmp::Eq,
        BinaryOp::Ne => Cmp::Ne,
        BinaryOp::Lt => Cmp::Lt,
        BinaryOp::Le => Cmp::Le,
        BinaryOp::Gt => Cmp::Gt,
        BinaryOp::Ge => Cmp::Ge,
        _ => Cmp::Eq,
    }
}
