//! Statement lowering.
//!
//! Statements thread the current block through; a statement that
//! terminates control flow (return, throw, break) leaves the block
//! sealed and lowering of the remaining statements in the body stops.

use ember_anvil::{Args, BlockId, Cmp, Op, Reg, Terminator};
use ember_ir::ast::{ExprKind, Stmt};
use ember_ir::{LocalId, StmtId, StmtRange};
use ember_types::{Idx, Tag};

use crate::func::{FunctionLowerer, Scope};
use crate::LowerError;

impl FunctionLowerer<'_, '_> {
    /// Lower a statement list, stopping at the first terminator.
    pub(crate) fn lower_stmts(&mut self, mut block: BlockId, range: StmtRange) -> BlockId {
        let ast = self.cx.ast;
        for &sid in ast.arena.stmt_ids(range) {
            if self.fb.is_terminated(block) {
                // Everything after an unconditional exit is dead.
                break;
            }
            block = self.lower_stmt(block, sid);
        }
        block
    }

    fn lower_stmt(&mut self, block: BlockId, sid: StmtId) -> BlockId {
        let ast = self.cx.ast;
        let span = ast.arena.stmt_span(sid);
        match *ast.arena.stmt(sid) {
            Stmt::Expr(e) => {
                let (block, _) = self.lower_expr(block, e);
                block
            }

            Stmt::Let { local, value } => {
                let (block, v) = self.lower_expr(block, value);
                self.local_init(block, local, v);
                block
            }

            Stmt::AssignLocal { local, value } => {
                let (block, v) = self.lower_expr(block, value);
                self.local_write(block, local, v);
                block
            }

            Stmt::AssignField {
                object,
                class,
                field,
                value,
            } => {
                let (block, obj) = self.lower_expr(block, object);
                let (block, v) = self.lower_expr(block, value);
                self.fb.push(block, Op::NullCheck { object: obj });
                self.emit_field_store(block, obj, class, field, v);
                block
            }

            Stmt::AssignIndex {
                object,
                index,
                value,
            } => {
                let (block, obj) = self.lower_expr(block, object);
                let (block, idx) = self.lower_expr(block, index);
                let (block, v) = self.lower_expr(block, value);
                let obj_ty = self.fb.reg_type(obj);
                match self.cx.pool.tag(obj_ty) {
                    Tag::Array => {
                        let elem = self.cx.pool.elem(obj_ty);
                        let v = self.box_for_slot(block, v, elem);
                        self.fb.push(block, Op::ArraySet { array: obj, index: idx, value: v });
                    }
                    Tag::Hash => {
                        let slot = self.cx.pool.hash_value(obj_ty);
                        let v = self.box_for_slot(block, v, slot);
                        self.fb.push(block, Op::HashSet { hash: obj, key: idx, value: v });
                    }
                    _ => self.cx.error(LowerError::ContractViolation {
                        detail: "indexed assignment on non-collection".into(),
                        span,
                    }),
                }
                block
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let (block, c) = self.lower_expr(block, cond);
                let then_block = self.fb.new_block();
                let else_block = self.fb.new_block();
                let join = self.fb.new_block();
                self.fb.terminate(
                    block,
                    Terminator::CondJump {
                        cond: c,
                        then_block,
                        else_block,
                    },
                );

                let mut reachable = false;
                let end = self.lower_stmts(then_block, then_body);
                if !self.fb.is_terminated(end) {
                    self.fb.terminate(end, Terminator::Jump { target: join, args: Args::new() });
                    reachable = true;
                }
                let end = self.lower_stmts(else_block, else_body);
                if !self.fb.is_terminated(end) {
                    self.fb.terminate(end, Terminator::Jump { target: join, args: Args::new() });
                    reachable = true;
                }
                if !reachable {
                    self.fb.terminate(join, Terminator::Unreachable);
                }
                join
            }

            Stmt::While { cond, body } => {
                let header = self.fb.new_block();
                self.fb.terminate(block, Terminator::Jump { target: header, args: Args::new() });

                let (cond_end, c) = self.lower_expr(header, cond);
                let body_block = self.fb.new_block();
                let exit = self.fb.new_block();
                self.fb.terminate(
                    cond_end,
                    Terminator::CondJump {
                        cond: c,
                        then_block: body_block,
                        else_block: exit,
                    },
                );

                self.scopes.push(Scope::Loop {
                    break_to: exit,
                    continue_to: header,
                });
                let end = self.lower_stmts(body_block, body);
                self.scopes.pop();
                if !self.fb.is_terminated(end) {
                    // Loop back-edge (safe point in codegen).
                    self.fb.terminate(end, Terminator::Jump { target: header, args: Args::new() });
                }
                exit
            }

            Stmt::For {
                binding,
                iterable,
                body,
            } => self.lower_for(block, binding, iterable, body),

            Stmt::Match { scrutinee, arms } => self.lower_match(block, scrutinee, arms),

            Stmt::Return { value } => {
                self.lower_return(block, value);
                block
            }

            Stmt::Break => {
                let Some(target) = self.innermost_loop() else {
                    self.cx.error(LowerError::ContractViolation {
                        detail: "break outside a loop".into(),
                        span,
                    });
                    return block;
                };
                let (depth, break_to, _) = target;
                let end = self.unwind_scopes(block, depth + 1);
                if !self.fb.is_terminated(end) {
                    self.fb.terminate(end, Terminator::Jump { target: break_to, args: Args::new() });
                }
                end
            }

            Stmt::Continue => {
                let Some(target) = self.innermost_loop() else {
                    self.cx.error(LowerError::ContractViolation {
                        detail: "continue outside a loop".into(),
                        span,
                    });
                    return block;
                };
                let (depth, _, continue_to) = target;
                let end = self.unwind_scopes(block, depth + 1);
                if !self.fb.is_terminated(end) {
                    self.fb.terminate(
                        end,
                        Terminator::Jump { target: continue_to, args: Args::new() },
                    );
                }
                end
            }

            Stmt::Throw { value } => {
                let (block, v) = self.lower_expr(block, value);
                self.fb.terminate(block, Terminator::Throw { value: v });
                block
            }

            Stmt::Try {
                body,
                catches,
                finally,
            } => self.lower_try(block, body, catches, finally),

            Stmt::Using { local, value, body } => self.lower_using(block, local, value, body),

            Stmt::Yield { value } => self.lower_yield(block, value, span),
        }
    }

    /// `(scope index, break target, continue target)` of the innermost
    /// loop.
    fn innermost_loop(&self) -> Option<(usize, BlockId, BlockId)> {
        self.scopes.iter().enumerate().rev().find_map(|(i, s)| match s {
            Scope::Loop {
                break_to,
                continue_to,
            } => Some((i, *break_to, *continue_to)),
            _ => None,
        })
    }

    fn lower_return(&mut self, block: BlockId, value: ember_ir::ExprId) {
        // The return value is materialized before the duplicated finally
        // bodies run; they cannot rebind it.
        let (block, result) = if value.is_valid() {
            let (after, v) = self.lower_expr(block, value);
            (after, Some(v))
        } else {
            (block, None)
        };

        let end = self.unwind_scopes(block, 0);
        if self.fb.is_terminated(end) {
            return;
        }

        if let Some(coro) = &self.coro {
            if coro.is_async {
                // Completed async bodies resolve their future.
                let (class, future_slot, state_slot, done) =
                    (coro.class, coro.future_slot, coro.state_slot, coro.done_state);
                self.set_state(end, class, state_slot, done);
                let self_reg = self.load_self(end, class);
                let future_ty = self.cx.class(class).fields[future_slot as usize].ty;
                let fut = self.fb.reg(future_ty);
                self.fb.push(
                    end,
                    Op::GetField {
                        dst: fut,
                        object: self_reg,
                        class,
                        slot: future_slot,
                    },
                );
                let v = match result {
                    Some(v) => v,
                    None => self.emit_default(end, Idx::NIL),
                };
                self.fb.push(end, Op::FutureComplete { future: fut, value: v });
                self.fb.terminate(end, Terminator::Ret { value: None });
            } else {
                // Returning from a generator ends the iteration.
                let (class, state_slot, done) = (coro.class, coro.state_slot, coro.done_state);
                self.set_state(end, class, state_slot, done);
                let ret_ty = self.coro_ret_ty();
                let v = self.emit_default(end, ret_ty);
                self.fb.terminate(end, Terminator::Ret { value: Some(v) });
            }
            return;
        }

        self.fb.terminate(end, Terminator::Ret { value: result });
    }

    fn lower_yield(
        &mut self,
        block: BlockId,
        value: ember_ir::ExprId,
        span: ember_ir::Span,
    ) -> BlockId {
        let (block, v) = self.lower_expr(block, value);
        let in_generator = matches!(&self.coro, Some(c) if !c.is_async);
        if !in_generator {
            self.cx.error(LowerError::ContractViolation {
                detail: "yield outside a generator".into(),
                span,
            });
            return block;
        }

        let resume = self.fb.new_block();
        if let Some(coro) = &mut self.coro {
            coro.resume_points.push(resume);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "resume point count is bounded by u32 states"
            )]
            let next_state = coro.resume_points.len() as u32;
            self.fb
                .terminate(block, Terminator::YieldSuspend { value: v, next_state });
        }
        resume
    }

    fn lower_try(
        &mut self,
        block: BlockId,
        body: StmtRange,
        catches: ember_ir::arena::CatchRange,
        finally: StmtRange,
    ) -> BlockId {
        let ast = self.cx.ast;
        let has_finally = !finally.is_empty();

        let body_entry = self.fb.new_block();
        self.fb.terminate(block, Terminator::Jump { target: body_entry, args: Args::new() });
        let region = self.fb.reserve_try_region(self.current_region(), body_entry);
        self.regions.push(region);

        if has_finally {
            self.scopes.push(Scope::Finally { body: finally });
        }
        let body_end = self.lower_stmts(body_entry, body);
        if has_finally {
            self.scopes.pop();
        }
        let region_last = self.fb.last_block();
        self.regions.pop();

        let exit = self.fb.new_block();

        // Normal exit: run the finally copy outside the protected span,
        // so an exception it raises unwinds past this region.
        if !self.fb.is_terminated(body_end) {
            let end = if has_finally {
                let finally_entry = self.fb.new_block();
                self.fb.terminate(
                    body_end,
                    Terminator::Jump { target: finally_entry, args: Args::new() },
                );
                self.lower_stmts(finally_entry, finally)
            } else {
                body_end
            };
            if !self.fb.is_terminated(end) {
                self.fb.terminate(end, Terminator::Jump { target: exit, args: Args::new() });
            }
        }

        // Catch handlers, in source order.
        let mut handler_list = Vec::new();
        for &clause in ast.arena.catches(catches) {
            let handler = self.fb.new_block();
            let caught_ty = self.cx.pool.class(clause.class);
            let caught = self.fb.reg(caught_ty);
            self.fb.push(handler, Op::CaughtException { dst: caught });
            self.local_init(handler, clause.binding, caught);

            if has_finally {
                self.scopes.push(Scope::Finally { body: finally });
            }
            let end = self.lower_stmts(handler, clause.body);
            if has_finally {
                self.scopes.pop();
            }

            if !self.fb.is_terminated(end) {
                let end = if has_finally {
                    self.lower_stmts(end, finally)
                } else {
                    end
                };
                if !self.fb.is_terminated(end) {
                    self.fb.terminate(end, Terminator::Jump { target: exit, args: Args::new() });
                }
            }
            handler_list.push((clause.class, handler));
        }

        // Throw exit: an unmatched exception still runs the finally copy
        // before unwinding on.
        if has_finally {
            let exception = self.cx.resolution.well_known.exception;
            let handler = self.fb.new_block();
            let caught_ty = self.cx.pool.class(exception);
            let caught = self.fb.reg(caught_ty);
            self.fb.push(handler, Op::CaughtException { dst: caught });
            let end = self.lower_stmts(handler, finally);
            if !self.fb.is_terminated(end) {
                self.fb.terminate(end, Terminator::Throw { value: caught });
            }
            handler_list.push((exception, handler));
        }

        self.fb.seal_try_region(region, region_last, handler_list);
        exit
    }

    fn lower_using(
        &mut self,
        block: BlockId,
        local: LocalId,
        value: ember_ir::ExprId,
        body: StmtRange,
    ) -> BlockId {
        let (block, v) = self.lower_expr(block, value);
        self.local_init(block, local, v);

        let body_entry = self.fb.new_block();
        self.fb.terminate(block, Terminator::Jump { target: body_entry, args: Args::new() });
        let region = self.fb.reserve_try_region(self.current_region(), body_entry);
        self.regions.push(region);

        self.scopes.push(Scope::Dispose { local });
        let body_end = self.lower_stmts(body_entry, body);
        self.scopes.pop();
        let region_last = self.fb.last_block();
        self.regions.pop();

        let exit = self.fb.new_block();
        if !self.fb.is_terminated(body_end) {
            // Dispose outside the protected span: a throwing dispose
            // unwinds past this region.
            let dispose_entry = self.fb.new_block();
            self.fb.terminate(
                body_end,
                Terminator::Jump { target: dispose_entry, args: Args::new() },
            );
            let end = self.emit_dispose(dispose_entry, local);
            self.fb.terminate(end, Terminator::Jump { target: exit, args: Args::new() });
        }

        // The throw exit disposes and re-raises.
        let exception = self.cx.resolution.well_known.exception;
        let handler = self.fb.new_block();
        let caught_ty = self.cx.pool.class(exception);
        let caught = self.fb.reg(caught_ty);
        self.fb.push(handler, Op::CaughtException { dst: caught });
        let end = self.emit_dispose(handler, local);
        self.fb.terminate(end, Terminator::Throw { value: caught });

        self.fb.seal_try_region(region, region_last, vec![(exception, handler)]);
        exit
    }

    fn lower_for(
        &mut self,
        block: BlockId,
        binding: LocalId,
        iterable: ember_ir::ExprId,
        body: StmtRange,
    ) -> BlockId {
        let ast = self.cx.ast;

        // Range literals iterate without materializing a range object.
        if let ExprKind::RangeLit { start, end } = *ast.arena.kind(iterable) {
            let (block, start_reg) = self.lower_expr(block, start);
            let (block, end_reg) = self.lower_expr(block, end);
            return self.counted_loop(block, binding, start_reg, end_reg, body);
        }

        let (block, iter) = self.lower_expr(block, iterable);
        let iter_ty = self.fb.reg_type(iter);
        match self.cx.pool.tag(iter_ty) {
            Tag::Array => self.array_loop(block, binding, iter, body),
            Tag::Range => {
                let start = self.fb.reg(Idx::I64);
                self.fb.push(block, Op::RangeStart { dst: start, range: iter });
                let end = self.fb.reg(Idx::I64);
                self.fb.push(block, Op::RangeEnd { dst: end, range: iter });
                self.counted_loop(block, binding, start, end, body)
            }
            // The iterator protocol: anything with has_next/next.
            _ => self.iterator_loop(block, binding, iter, body),
        }
    }

    /// `for x in start..end:` as a counted loop over i64.
    fn counted_loop(
        &mut self,
        block: BlockId,
        binding: LocalId,
        start: Reg,
        end: Reg,
        body: StmtRange,
    ) -> BlockId {
        let i_slot = self.fb.add_local(Idx::I64);
        let end_slot = self.fb.add_local(Idx::I64);
        self.fb.push(block, Op::StoreLocal { local: i_slot, src: start });
        self.fb.push(block, Op::StoreLocal { local: end_slot, src: end });

        let header = self.fb.new_block();
        self.fb.terminate(block, Terminator::Jump { target: header, args: Args::new() });

        let i = self.fb.reg(Idx::I64);
        self.fb.push(header, Op::LoadLocal { dst: i, local: i_slot });
        let limit = self.fb.reg(Idx::I64);
        self.fb.push(header, Op::LoadLocal { dst: limit, local: end_slot });
        let more = self.fb.reg(Idx::I1);
        self.fb.push(header, Op::ICmp { dst: more, cmp: Cmp::Lt, lhs: i, rhs: limit });

        let body_block = self.fb.new_block();
        let step = self.fb.new_block();
        let exit = self.fb.new_block();
        self.fb.terminate(
            header,
            Terminator::CondJump {
                cond: more,
                then_block: body_block,
                else_block: exit,
            },
        );

        let i2 = self.fb.reg(Idx::I64);
        self.fb.push(body_block, Op::LoadLocal { dst: i2, local: i_slot });
        self.local_init(body_block, binding, i2);

        self.scopes.push(Scope::Loop {
            break_to: exit,
            continue_to: step,
        });
        let end_block = self.lower_stmts(body_block, body);
        self.scopes.pop();
        if !self.fb.is_terminated(end_block) {
            self.fb.terminate(end_block, Terminator::Jump { target: step, args: Args::new() });
        }

        let i3 = self.fb.reg(Idx::I64);
        self.fb.push(step, Op::LoadLocal { dst: i3, local: i_slot });
        let one = self.fb.reg(Idx::I64);
        self.fb.push(step, Op::ConstInt { dst: one, value: 1 });
        let next = self.fb.reg(Idx::I64);
        self.fb.push(step, Op::IAdd { dst: next, lhs: i3, rhs: one });
        self.fb.push(step, Op::StoreLocal { local: i_slot, src: next });
        self.fb.terminate(step, Terminator::Jump { target: header, args: Args::new() });

        exit
    }

    /// `for x in array:` as an index loop with bounds-checked reads.
    fn array_loop(
        &mut self,
        block: BlockId,
        binding: LocalId,
        array: Reg,
        body: StmtRange,
    ) -> BlockId {
        let array_ty = self.fb.reg_type(array);
        let elem_ty = self.cx.pool.elem(array_ty);

        let array_slot = self.fb.add_local(array_ty);
        self.fb.push(block, Op::StoreLocal { local: array_slot, src: array });
        let len = self.fb.reg(Idx::I64);
        self.fb.push(block, Op::ArrayLen { dst: len, array });
        let zero = self.fb.reg(Idx::I64);
        self.fb.push(block, Op::ConstInt { dst: zero, value: 0 });

        let i_slot = self.fb.add_local(Idx::I64);
        let len_slot = self.fb.add_local(Idx::I64);
        self.fb.push(block, Op::StoreLocal { local: i_slot, src: zero });
        self.fb.push(block, Op::StoreLocal { local: len_slot, src: len });

        let header = self.fb.new_block();
        self.fb.terminate(block, Terminator::Jump { target: header, args: Args::new() });

        let i = self.fb.reg(Idx::I64);
        self.fb.push(header, Op::LoadLocal { dst: i, local: i_slot });
        let limit = self.fb.reg(Idx::I64);
        self.fb.push(header, Op::LoadLocal { dst: limit, local: len_slot });
        let more = self.fb.reg(Idx::I1);
        self.fb.push(header, Op::ICmp { dst: more, cmp: Cmp::Lt, lhs: i, rhs: limit });

        let body_block = self.fb.new_block();
        let step = self.fb.new_block();
        let exit = self.fb.new_block();
        self.fb.terminate(
            header,
            Terminator::CondJump {
                cond: more,
                then_block: body_block,
                else_block: exit,
            },
        );

        let arr = self.fb.reg(array_ty);
        self.fb.push(body_block, Op::LoadLocal { dst: arr, local: array_slot });
        let i2 = self.fb.reg(Idx::I64);
        self.fb.push(body_block, Op::LoadLocal { dst: i2, local: i_slot });
        let binding_ty = Idx::from_type_id(self.func.locals[binding.index()].ty);
        let elem = self.emit_array_get(body_block, arr, i2, elem_ty, binding_ty);
        self.local_init(body_block, binding, elem);

        self.scopes.push(Scope::Loop {
            break_to: exit,
            continue_to: step,
        });
        let end_block = self.lower_stmts(body_block, body);
        self.scopes.pop();
        if !self.fb.is_terminated(end_block) {
            self.fb.terminate(end_block, Terminator::Jump { target: step, args: Args::new() });
        }

        let i3 = self.fb.reg(Idx::I64);
        self.fb.push(step, Op::LoadLocal { dst: i3, local: i_slot });
        let one = self.fb.reg(Idx::I64);
        self.fb.push(step, Op::ConstInt { dst: one, value: 1 });
        let next = self.fb.reg(Idx::I64);
        self.fb.push(step, Op::IAdd { dst: next, lhs: i3, rhs: one });
        self.fb.push(step, Op::StoreLocal { local: i_slot, src: next });
        self.fb.terminate(step, Terminator::Jump { target: header, args: Args::new() });

        exit
    }

    /// `for x in it:` through `has_next` / `next`, checking before every
    /// element.
    fn iterator_loop(
        &mut self,
        block: BlockId,
        binding: LocalId,
        value: Reg,
        body: StmtRange,
    ) -> BlockId {
        let value_ty = self.fb.reg_type(value);
        let iterator_name = self.cx.interner.intern("iterator");
        let has_next_name = self.cx.interner.intern("has_next");
        let next_name = self.cx.interner.intern("next");

        // User classes may provide `iterator()`; otherwise the value is
        // its own iterator.
        let class_like = matches!(
            self.cx.pool.tag(value_ty),
            Tag::Class | Tag::GenericInstance
        );
        let provides_iterator = class_like && {
            let class = self.cx.pool.class_id(value_ty);
            self.cx.class(class).method(iterator_name, 0).is_some()
        };
        let (it, it_ty) = if provides_iterator {
            let object_ty = self.cx.object_ty();
            let it = self.emit_method_by_name(block, value, value_ty, iterator_name, &[], object_ty);
            (it, object_ty)
        } else {
            (value, value_ty)
        };
        let it_slot = self.fb.add_local(it_ty);
        self.fb.push(block, Op::StoreLocal { local: it_slot, src: it });

        let header = self.fb.new_block();
        self.fb.terminate(block, Terminator::Jump { target: header, args: Args::new() });

        let it1 = self.fb.reg(it_ty);
        self.fb.push(header, Op::LoadLocal { dst: it1, local: it_slot });
        let more = self.emit_method_by_name(header, it1, it_ty, has_next_name, &[], Idx::I1);

        let body_block = self.fb.new_block();
        let exit = self.fb.new_block();
        self.fb.terminate(
            header,
            Terminator::CondJump {
                cond: more,
                then_block: body_block,
                else_block: exit,
            },
        );

        let it2 = self.fb.reg(it_ty);
        self.fb.push(body_block, Op::LoadLocal { dst: it2, local: it_slot });
        let binding_ty = Idx::from_type_id(self.func.locals[binding.index()].ty);
        let elem = self.emit_method_by_name(body_block, it2, it_ty, next_name, &[], binding_ty);
        self.local_init(body_block, binding, elem);

        self.scopes.push(Scope::Loop {
            break_to: exit,
            continue_to: header,
        });
        let end_block = self.lower_stmts(body_block, body);
        self.scopes.pop();
        if !self.fb.is_terminated(end_block) {
            self.fb.terminate(end_block, Terminator::Jump { target: header, args: Args::new() });
        }

        exit
    }
}
