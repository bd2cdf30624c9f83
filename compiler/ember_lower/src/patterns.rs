//! Pattern-match lowering.
//!
//! Arms are tried in textual order. Runs of guard-free integer-literal
//! arms collapse into one `switch` over the scrutinee; every other
//! pattern becomes a guarding `cond_jump`. A match over an open type
//! without an irrefutable arm falls through to a `MatchError` trap.

use ember_anvil::{Args, BlockId, Cmp, Op, Reg, Terminator};
use ember_ir::arena::ArmRange;
use ember_ir::ast::{MatchArm, Pattern};
use ember_ir::ExprId;
use ember_types::{Idx, Tag};

use crate::func::FunctionLowerer;

impl FunctionLowerer<'_, '_> {
    pub(crate) fn lower_match(
        &mut self,
        block: BlockId,
        scrutinee: ExprId,
        arms: ArmRange,
    ) -> BlockId {
        let ast = self.cx.ast;
        let arm_list: Vec<MatchArm> = ast.arena.arms(arms).to_vec();

        let (block, scrut) = self.lower_expr(block, scrutinee);
        let scrut_ty = self.fb.reg_type(scrut);
        let scrut_is_int = matches!(
            self.cx.pool.tag(scrut_ty),
            Tag::I8 | Tag::I32 | Tag::I64 | Tag::IntPtr
        );

        let exit = self.fb.new_block();
        let mut any_exit = false;
        let mut test_block = block;
        let mut index = 0;
        let mut saw_irrefutable = false;

        while index < arm_list.len() {
            let arm = arm_list[index];

            // A run of guard-free integer arms becomes one switch.
            if scrut_is_int && Self::switchable(&arm) {
                let mut run = Vec::new();
                let mut j = index;
                while j < arm_list.len() && Self::switchable(&arm_list[j]) {
                    if let Pattern::Int(v) = arm_list[j].pattern {
                        run.push((v, arm_list[j]));
                    }
                    j += 1;
                }

                let default = self.fb.new_block();
                let mut cases = Vec::with_capacity(run.len());
                for (value, case_arm) in run {
                    let body = self.fb.new_block();
                    cases.push((value, body));
                    let end = self.lower_stmts(body, case_arm.body);
                    if !self.fb.is_terminated(end) {
                        self.fb.terminate(end, Terminator::Jump { target: exit, args: Args::new() });
                        any_exit = true;
                    }
                }
                self.fb.terminate(
                    test_block,
                    Terminator::Switch {
                        scrutinee: scrut,
                        cases,
                        default,
                    },
                );
                test_block = default;
                index = j;
                continue;
            }

            if arm.pattern.is_irrefutable() && !arm.guard.is_valid() {
                // Everything below this arm is unreachable by the
                // textual-order tie-break.
                if let Pattern::Binding { local } = arm.pattern {
                    self.local_init(test_block, local, scrut);
                }
                let end = self.lower_stmts(test_block, arm.body);
                if !self.fb.is_terminated(end) {
                    self.fb.terminate(end, Terminator::Jump { target: exit, args: Args::new() });
                    any_exit = true;
                }
                saw_irrefutable = true;
                break;
            }

            let next_test = self.fb.new_block();
            let body_entry = self.fb.new_block();
            self.emit_pattern_test(test_block, scrut, scrut_ty, &arm, body_entry, next_test);

            // Bindings are in scope for the guard.
            let guarded = self.bind_pattern(body_entry, scrut, &arm.pattern);
            let body_start = if arm.guard.is_valid() {
                let (guard_end, cond) = self.lower_expr(guarded, arm.guard);
                let body_real = self.fb.new_block();
                self.fb.terminate(
                    guard_end,
                    Terminator::CondJump {
                        cond,
                        then_block: body_real,
                        else_block: next_test,
                    },
                );
                body_real
            } else {
                guarded
            };

            let end = self.lower_stmts(body_start, arm.body);
            if !self.fb.is_terminated(end) {
                self.fb.terminate(end, Terminator::Jump { target: exit, args: Args::new() });
                any_exit = true;
            }

            test_block = next_test;
            index += 1;
        }

        if !saw_irrefutable && !self.fb.is_terminated(test_block) {
            // No arm matched: runtime MatchError.
            let match_error = self.cx.resolution.well_known.match_error;
            self.fb.terminate(test_block, Terminator::Trap { class: match_error });
        }

        if !any_exit {
            self.fb.terminate(exit, Terminator::Unreachable);
        }
        exit
    }

    fn switchable(arm: &MatchArm) -> bool {
        matches!(arm.pattern, Pattern::Int(_)) && !arm.guard.is_valid()
    }

    /// Branch to `matched` when the pattern holds, else `next_test`.
    fn emit_pattern_test(
        &mut self,
        block: BlockId,
        scrut: Reg,
        scrut_ty: Idx,
        arm: &MatchArm,
        matched: BlockId,
        next_test: BlockId,
    ) {
        let cond = match arm.pattern {
            Pattern::Wildcard | Pattern::Binding { .. } => {
                // Irrefutable with a guard: the test always passes.
                let t = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::ConstInt { dst: t, value: 1 });
                t
            }
            Pattern::Int(value) => {
                let lit = self.fb.reg(scrut_ty);
                self.fb.push(block, Op::ConstInt { dst: lit, value });
                let cond = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::ICmp { dst: cond, cmp: Cmp::Eq, lhs: scrut, rhs: lit });
                cond
            }
            Pattern::Bool(value) => {
                let lit = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::ConstInt { dst: lit, value: i64::from(value) });
                let cond = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::ICmp { dst: cond, cmp: Cmp::Eq, lhs: scrut, rhs: lit });
                cond
            }
            Pattern::Str(name) => {
                let contents = self.cx.interner.lookup(name);
                let id = self.cx.strings.intern(contents);
                let string_ty = self.cx.string_ty();
                let lit = self.fb.reg(string_ty);
                self.fb.push(block, Op::ConstString { dst: lit, value: id });
                let equals = self.cx.interner.intern("equals");
                self.emit_method_by_name(block, scrut, scrut_ty, equals, &[lit], Idx::I1)
            }
            Pattern::Nil => {
                let nil = self.fb.reg(scrut_ty);
                self.fb.push(block, Op::ConstNil { dst: nil });
                let cond = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::ICmp { dst: cond, cmp: Cmp::Eq, lhs: scrut, rhs: nil });
                cond
            }
            Pattern::Class { class, .. } => {
                let cond = self.fb.reg(Idx::I1);
                self.fb.push(block, Op::InstanceOf { dst: cond, object: scrut, class });
                cond
            }
        };
        self.fb.terminate(
            block,
            Terminator::CondJump {
                cond,
                then_block: matched,
                else_block: next_test,
            },
        );
    }

    /// Install pattern bindings at the head of the matched path.
    fn bind_pattern(&mut self, block: BlockId, scrut: Reg, pattern: &Pattern) -> BlockId {
        match *pattern {
            Pattern::Binding { local } => {
                self.local_init(block, local, scrut);
            }
            Pattern::Class { class, binding } => {
                let narrowed_ty = self.cx.pool.class(class);
                let narrowed = self.fb.reg(narrowed_ty);
                self.fb.push(block, Op::RefCast { dst: narrowed, src: scrut, class });
                self.local_init(block, binding, narrowed);
            }
            Pattern::Wildcard
            | Pattern::Int(_)
            | Pattern::Bool(_)
            | Pattern::Str(_)
            | Pattern::Nil => {}
        }
        block
    }
}
