//! The Anvil verifier.
//!
//! Runs over a whole module between lowering and codegen. Anything it
//! rejects after lowering is a middle-end bug, so errors carry the
//! function id and block label for the ICE report.
//!
//! Checks:
//! - typed SSA register discipline: single definition, every use reaches
//!   a definition on all paths, operand types match opcode signatures
//! - terminator well-formedness and in-range block targets
//! - try-regions form a properly nested forest with non-empty catch lists
//! - `await_suspend` / `yield_suspend` only inside async/generator bodies
//! - virtual calls go through a receiver whose class owns the slot
//! - native calls target only NativeLibrary methods

use ember_ir::FunctionId;
use ember_types::{Idx, Pool, Tag, TypeFlags};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::{AnvilFunction, AnvilModule, BlockId, FnAttrs, Op, Reg, Terminator};

/// A verifier rejection. Always a compiler bug when raised on the output
/// of the lowerer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{function:?} {block}: register {reg} defined more than once")]
    RedefinedRegister {
        function: FunctionId,
        block: BlockId,
        reg: Reg,
    },

    #[error("{function:?} {block}: use of {reg} does not reach a definition")]
    UseBeforeDef {
        function: FunctionId,
        block: BlockId,
        reg: Reg,
    },

    #[error("{function:?} {block}: {detail}")]
    TypeMismatch {
        function: FunctionId,
        block: BlockId,
        detail: String,
    },

    #[error("{function:?} {block}: jump target {target} out of range")]
    BadBlockTarget {
        function: FunctionId,
        block: BlockId,
        target: BlockId,
    },

    #[error("{function:?} {block}: jump arguments do not match target parameters")]
    BadJumpArgs { function: FunctionId, block: BlockId },

    #[error("{function:?}: try-region {region} has no catch clauses")]
    EmptyCatchList { function: FunctionId, region: usize },

    #[error("{function:?}: try-regions {a} and {b} overlap without nesting")]
    MalformedRegionNesting {
        function: FunctionId,
        a: usize,
        b: usize,
    },

    #[error("{function:?} {block}: suspension outside a generator/async body")]
    SuspendOutsideCoroutine {
        function: FunctionId,
        block: BlockId,
    },

    #[error("{function:?} {block}: virtual call receiver does not own slot {slot}")]
    BadVirtualReceiver {
        function: FunctionId,
        block: BlockId,
        slot: u32,
    },

    #[error("{function:?} {block}: native call target is not a NativeLibrary method")]
    BadNativeTarget {
        function: FunctionId,
        block: BlockId,
    },

    #[error("{function:?} {block}: caught_exception outside a handler block")]
    StrayCaughtException {
        function: FunctionId,
        block: BlockId,
    },
}

/// Verify a whole module. All functions are checked; errors accumulate.
pub fn verify_module(module: &AnvilModule, pool: &Pool) -> Result<(), Vec<VerifyError>> {
    let _span = tracing::debug_span!("verify", functions = module.functions.len()).entered();

    let mut errors = Vec::new();
    for function in &module.functions {
        verify_function(module, pool, function, &mut errors);
    }
    if errors.is_empty() {
        Ok(())
    } else {
        for error in &errors {
            tracing::error!(%error, "verifier rejection");
        }
        Err(errors)
    }
}

fn verify_function(
    module: &AnvilModule,
    pool: &Pool,
    func: &AnvilFunction,
    errors: &mut Vec<VerifyError>,
) {
    let checker = Checker {
        module,
        pool,
        func,
    };
    checker.check_targets(errors);
    checker.check_ssa(errors);
    checker.check_regions(errors);
    checker.check_ops(errors);
}

struct Checker<'a> {
    module: &'a AnvilModule,
    pool: &'a Pool,
    func: &'a AnvilFunction,
}

impl Checker<'_> {
    fn ty(&self, reg: Reg) -> Idx {
        self.func.reg_type(reg)
    }

    fn is_int(&self, idx: Idx) -> bool {
        matches!(
            self.pool.tag(idx),
            Tag::I8 | Tag::I32 | Tag::I64 | Tag::IntPtr
        )
    }

    fn is_float(&self, idx: Idx) -> bool {
        matches!(self.pool.tag(idx), Tag::F32 | Tag::F64)
    }

    fn is_class_like(&self, idx: Idx) -> bool {
        matches!(self.pool.tag(idx), Tag::Class | Tag::GenericInstance)
    }

    /// Block targets of every terminator must exist, and jump arguments
    /// must match the target's parameter list.
    fn check_targets(&self, errors: &mut Vec<VerifyError>) {
        let block_count = self.func.blocks.len();
        for block in &self.func.blocks {
            for target in block.terminator.successors() {
                if target.index() >= block_count {
                    errors.push(VerifyError::BadBlockTarget {
                        function: self.func.id,
                        block: block.id,
                        target,
                    });
                }
            }
            if let Terminator::Jump { target, args } = &block.terminator {
                if target.index() < block_count {
                    let params = &self.func.blocks[target.index()].params;
                    let compatible = args.len() == params.len()
                        && args.iter().zip(params).all(|(&a, &p)| {
                            self.pool.subtype_of(self.ty(a), self.ty(p))
                        });
                    if !compatible {
                        errors.push(VerifyError::BadJumpArgs {
                            function: self.func.id,
                            block: block.id,
                        });
                    }
                }
            }
        }
    }

    /// Single definition per register, and every use reaches a
    /// definition along all paths (forward must-reach dataflow).
    fn check_ssa(&self, errors: &mut Vec<VerifyError>) {
        // Single definition.
        let mut defined: FxHashSet<Reg> = FxHashSet::default();
        for block in &self.func.blocks {
            for &param in &block.params {
                if !defined.insert(param) {
                    errors.push(VerifyError::RedefinedRegister {
                        function: self.func.id,
                        block: block.id,
                        reg: param,
                    });
                }
            }
            for op in &block.ops {
                if let Some(dst) = op.defined_reg() {
                    if !defined.insert(dst) {
                        errors.push(VerifyError::RedefinedRegister {
                            function: self.func.id,
                            block: block.id,
                            reg: dst,
                        });
                    }
                }
            }
        }

        // Must-reach sets. Handler blocks are dataflow roots (reached by
        // unwinding, not by an edge), as is the entry block.
        let block_count = self.func.blocks.len();
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); block_count];
        for block in &self.func.blocks {
            for succ in block.terminator.successors() {
                if succ.index() < block_count {
                    preds[succ.index()].push(block.id);
                }
            }
        }
        let handler_blocks: FxHashSet<BlockId> = self
            .func
            .try_regions
            .iter()
            .flat_map(|r| r.catches.iter().map(|&(_, b)| b))
            .collect();

        let mut avail_out: Vec<Option<FxHashSet<Reg>>> = vec![None; block_count];
        let mut changed = true;
        while changed {
            changed = false;
            for block in &self.func.blocks {
                let is_root =
                    block.id == self.func.entry() || handler_blocks.contains(&block.id);
                let mut avail: FxHashSet<Reg> = if is_root {
                    FxHashSet::default()
                } else {
                    // Intersection over predecessors with known sets.
                    let known: Vec<&FxHashSet<Reg>> = preds[block.id.index()]
                        .iter()
                        .filter_map(|p| avail_out[p.index()].as_ref())
                        .collect();
                    match known.split_first() {
                        None => FxHashSet::default(),
                        Some((first, rest)) => {
                            let mut set = (*first).clone();
                            set.retain(|reg| rest.iter().all(|s| s.contains(reg)));
                            set
                        }
                    }
                };
                avail.extend(block.params.iter().copied());
                for op in &block.ops {
                    if let Some(dst) = op.defined_reg() {
                        avail.insert(dst);
                    }
                }
                if avail_out[block.id.index()].as_ref() != Some(&avail) {
                    avail_out[block.id.index()] = Some(avail);
                    changed = true;
                }
            }
        }

        // Check uses against what must be available at each point.
        for block in &self.func.blocks {
            let is_root = block.id == self.func.entry() || handler_blocks.contains(&block.id);
            let mut avail: FxHashSet<Reg> = if is_root {
                FxHashSet::default()
            } else {
                let known: Vec<&FxHashSet<Reg>> = preds[block.id.index()]
                    .iter()
                    .filter_map(|p| avail_out[p.index()].as_ref())
                    .collect();
                match known.split_first() {
                    None => FxHashSet::default(),
                    Some((first, rest)) => {
                        let mut set = (*first).clone();
                        set.retain(|reg| rest.iter().all(|s| s.contains(reg)));
                        set
                    }
                }
            };
            avail.extend(block.params.iter().copied());
            for op in &block.ops {
                for used in op.used_regs() {
                    if !avail.contains(&used) {
                        errors.push(VerifyError::UseBeforeDef {
                            function: self.func.id,
                            block: block.id,
                            reg: used,
                        });
                    }
                }
                if let Some(dst) = op.defined_reg() {
                    avail.insert(dst);
                }
            }
            for used in block.terminator.used_regs() {
                if !avail.contains(&used) {
                    errors.push(VerifyError::UseBeforeDef {
                        function: self.func.id,
                        block: block.id,
                        reg: used,
                    });
                }
            }
        }
    }

    /// Try-regions must form a properly nested forest with handlers.
    fn check_regions(&self, errors: &mut Vec<VerifyError>) {
        let regions = &self.func.try_regions;
        for (i, region) in regions.iter().enumerate() {
            if region.catches.is_empty() {
                errors.push(VerifyError::EmptyCatchList {
                    function: self.func.id,
                    region: i,
                });
            }
            for (j, other) in regions.iter().enumerate().skip(i + 1) {
                let disjoint = region.last < other.first || other.last < region.first;
                let nested = (region.first <= other.first && other.last <= region.last)
                    || (other.first <= region.first && region.last <= other.last);
                if !disjoint && !nested {
                    errors.push(VerifyError::MalformedRegionNesting {
                        function: self.func.id,
                        a: i,
                        b: j,
                    });
                }
            }
        }
    }

    /// Per-opcode and per-terminator signature checks.
    fn check_ops(&self, errors: &mut Vec<VerifyError>) {
        let handler_blocks: FxHashSet<BlockId> = self
            .func
            .try_regions
            .iter()
            .flat_map(|r| r.catches.iter().map(|&(_, b)| b))
            .collect();

        for block in &self.func.blocks {
            for (i, op) in block.ops.iter().enumerate() {
                self.check_op(block.id, i, op, &handler_blocks, errors);
            }
            self.check_terminator(block.id, &block.terminator, errors);
        }
    }

    fn mismatch(&self, block: BlockId, detail: String, errors: &mut Vec<VerifyError>) {
        errors.push(VerifyError::TypeMismatch {
            function: self.func.id,
            block,
            detail,
        });
    }

    #[allow(
        clippy::too_many_lines,
        reason = "one arm per opcode family keeps the signature table in one place"
    )]
    fn check_op(
        &self,
        block: BlockId,
        index: usize,
        op: &Op,
        handler_blocks: &FxHashSet<BlockId>,
        errors: &mut Vec<VerifyError>,
    ) {
        match *op {
            Op::LoadLocal { dst, local } => {
                if self.ty(dst) != self.func.local_type(local) {
                    self.mismatch(block, format!("load_local {local:?} type"), errors);
                }
            }
            Op::StoreLocal { local, src } => {
                if !self
                    .pool
                    .subtype_of(self.ty(src), self.func.local_type(local))
                {
                    self.mismatch(block, format!("store_local {local:?} type"), errors);
                }
            }
            Op::ConstInt { dst, .. } => {
                if !self.is_int(self.ty(dst)) && self.pool.tag(self.ty(dst)) != Tag::I1 {
                    self.mismatch(block, "const_int into non-integer register".into(), errors);
                }
            }
            Op::ConstFloat { dst, .. } => {
                if self.pool.tag(self.ty(dst)) != Tag::F32 {
                    self.mismatch(block, "const_float into non-f32 register".into(), errors);
                }
            }
            Op::ConstDouble { dst, .. } => {
                if self.pool.tag(self.ty(dst)) != Tag::F64 {
                    self.mismatch(block, "const_double into non-f64 register".into(), errors);
                }
            }
            Op::ConstString { dst, .. } | Op::ConstClass { dst, .. } | Op::ConstMethod { dst, .. } => {
                if !self.pool.is_reference(self.ty(dst)) && self.pool.tag(self.ty(dst)) != Tag::IntPtr
                {
                    self.mismatch(block, "constant handle into value register".into(), errors);
                }
            }
            Op::ConstNil { dst } => {
                if !self.pool.is_reference(self.ty(dst)) {
                    self.mismatch(block, "const_nil into non-reference register".into(), errors);
                }
            }

            Op::IAdd { dst, lhs, rhs }
            | Op::ISub { dst, lhs, rhs }
            | Op::IMul { dst, lhs, rhs }
            | Op::IDiv { dst, lhs, rhs }
            | Op::IMod { dst, lhs, rhs }
            | Op::BitAnd { dst, lhs, rhs }
            | Op::BitOr { dst, lhs, rhs }
            | Op::BitXor { dst, lhs, rhs }
            | Op::Shl { dst, lhs, rhs }
            | Op::Shr { dst, lhs, rhs } => {
                let t = self.ty(dst);
                if !self.is_int(t) || self.ty(lhs) != t || self.ty(rhs) != t {
                    self.mismatch(block, format!("integer op operand types at #{index}"), errors);
                }
            }
            Op::INeg { dst, src } => {
                if !self.is_int(self.ty(dst)) || self.ty(src) != self.ty(dst) {
                    self.mismatch(block, "ineg operand types".into(), errors);
                }
            }
            Op::ICmp { dst, cmp, lhs, rhs } => {
                // Eq/Ne double as reference identity (nil tests).
                let ref_identity = matches!(cmp, crate::Cmp::Eq | crate::Cmp::Ne)
                    && self.pool.is_reference(self.ty(lhs))
                    && self.pool.is_reference(self.ty(rhs));
                let int_compare = self.ty(lhs) == self.ty(rhs)
                    && (self.is_int(self.ty(lhs)) || self.pool.tag(self.ty(lhs)) == Tag::I1);
                if self.pool.tag(self.ty(dst)) != Tag::I1 || !(int_compare || ref_identity) {
                    self.mismatch(block, "icmp operand types".into(), errors);
                }
            }
            Op::FAdd { dst, lhs, rhs }
            | Op::FSub { dst, lhs, rhs }
            | Op::FMul { dst, lhs, rhs }
            | Op::FDiv { dst, lhs, rhs }
            | Op::FMod { dst, lhs, rhs } => {
                let t = self.ty(dst);
                if !self.is_float(t) || self.ty(lhs) != t || self.ty(rhs) != t {
                    self.mismatch(block, "float op operand types".into(), errors);
                }
            }
            Op::FNeg { dst, src } => {
                if !self.is_float(self.ty(dst)) || self.ty(src) != self.ty(dst) {
                    self.mismatch(block, "fneg operand types".into(), errors);
                }
            }
            Op::FCmp { dst, lhs, rhs, .. } => {
                if self.pool.tag(self.ty(dst)) != Tag::I1
                    || self.ty(lhs) != self.ty(rhs)
                    || !self.is_float(self.ty(lhs))
                {
                    self.mismatch(block, "fcmp operand types".into(), errors);
                }
            }
            Op::Not { dst, src } => {
                if self.pool.tag(self.ty(dst)) != Tag::I1 || self.pool.tag(self.ty(src)) != Tag::I1
                {
                    self.mismatch(block, "not on non-i1".into(), errors);
                }
            }

            Op::IntToFloat { dst, src } => {
                if !self.is_int(self.ty(src)) || !self.is_float(self.ty(dst)) {
                    self.mismatch(block, "i_to_f operand types".into(), errors);
                }
            }
            Op::FloatToInt { dst, src } => {
                if !self.is_float(self.ty(src)) || !self.is_int(self.ty(dst)) {
                    self.mismatch(block, "f_to_i operand types".into(), errors);
                }
            }
            Op::SignExtend { dst, src } => {
                if !self.is_int(self.ty(src)) || !self.is_int(self.ty(dst)) {
                    self.mismatch(block, "sext operand types".into(), errors);
                }
            }
            Op::FloatPromote { dst, src } => {
                if self.pool.tag(self.ty(src)) != Tag::F32
                    || self.pool.tag(self.ty(dst)) != Tag::F64
                {
                    self.mismatch(block, "fpromote operand types".into(), errors);
                }
            }
            Op::Box { dst, src } => {
                let src_flags = self.pool.flags(self.ty(src));
                if !src_flags.contains(TypeFlags::IS_PRIMITIVE)
                    || !self.pool.is_reference(self.ty(dst))
                {
                    self.mismatch(block, "box operand types".into(), errors);
                }
            }
            Op::Unbox { dst, src, .. } => {
                if !self.pool.is_reference(self.ty(src))
                    || !self.pool.flags(self.ty(dst)).contains(TypeFlags::IS_PRIMITIVE)
                {
                    self.mismatch(block, "unbox operand types".into(), errors);
                }
            }

            Op::New { dst, class, .. } => {
                if class.index() >= self.module.classes.len() {
                    self.mismatch(block, format!("new of unknown {class:?}"), errors);
                } else if !self.is_class_like(self.ty(dst))
                    || self.pool.class_id(self.ty(dst)) != class
                {
                    self.mismatch(block, "new result type does not name the class".into(), errors);
                }
            }
            Op::GetField {
                dst,
                object,
                class,
                slot,
            } => {
                if let Some(field_ty) = self.field_type(block, object, class, slot, errors) {
                    if self.pool.flags(field_ty).contains(TypeFlags::HAS_TYPE_PARAM) {
                        self.mismatch(
                            block,
                            "get_field on erased slot (use load_erased)".into(),
                            errors,
                        );
                    } else if self.ty(dst) != field_ty {
                        self.mismatch(block, "get_field result type".into(), errors);
                    }
                }
            }
            Op::SetField {
                object,
                class,
                slot,
                value,
            } => {
                if let Some(field_ty) = self.field_type(block, object, class, slot, errors) {
                    if self.pool.flags(field_ty).contains(TypeFlags::HAS_TYPE_PARAM) {
                        self.mismatch(
                            block,
                            "set_field on erased slot (use store_erased)".into(),
                            errors,
                        );
                    } else if !self.pool.subtype_of(self.ty(value), field_ty) {
                        self.mismatch(block, "set_field value type".into(), errors);
                    }
                }
            }
            Op::LoadErased {
                dst,
                object,
                class,
                slot,
                static_ty,
            } => {
                if self.field_type(block, object, class, slot, errors).is_some()
                    && self.ty(dst) != static_ty
                {
                    self.mismatch(block, "load_erased static type".into(), errors);
                }
            }
            Op::StoreErased {
                object,
                class,
                slot,
                value: _,
            } => {
                let _ = self.field_type(block, object, class, slot, errors);
            }

            Op::CallStatic {
                dst,
                function,
                ref args,
            } => {
                self.check_call(block, function, None, args, dst, errors);
            }
            Op::CallVirtual {
                dst,
                receiver,
                class,
                slot,
                ref args,
            } => {
                let receiver_ty = self.ty(receiver);
                let owns = self.is_class_like(receiver_ty)
                    && class.index() < self.module.classes.len()
                    && self
                        .pool
                        .class_subtype(self.pool.class_id(receiver_ty), class)
                    && (slot as usize) < self.module.class(class).vtable.len();
                if owns {
                    let callee = self.module.class(class).vtable[slot as usize];
                    self.check_call(block, callee, Some(receiver), args, dst, errors);
                } else {
                    errors.push(VerifyError::BadVirtualReceiver {
                        function: self.func.id,
                        block,
                        slot,
                    });
                }
            }
            Op::CallInterface { receiver, .. } => {
                if !self.pool.is_reference(self.ty(receiver)) {
                    self.mismatch(block, "interface call on value receiver".into(), errors);
                }
            }
            Op::CallNative {
                dst,
                function,
                ref args,
            } => {
                let native = function.index() < self.module.functions.len()
                    && self
                        .module
                        .function(function)
                        .owner
                        .is_some_and(|c| self.module.class(c).is_native_library());
                if native {
                    self.check_call(block, function, None, args, dst, errors);
                } else {
                    errors.push(VerifyError::BadNativeTarget {
                        function: self.func.id,
                        block,
                    });
                }
            }
            Op::InstanceOf { dst, object, .. } => {
                if self.pool.tag(self.ty(dst)) != Tag::I1
                    || !self.pool.is_reference(self.ty(object))
                {
                    self.mismatch(block, "instance_of operand types".into(), errors);
                }
            }
            Op::RefCast { dst, src, class } => {
                let ok = self.pool.is_reference(self.ty(src))
                    && self.is_class_like(self.ty(dst))
                    && self.pool.class_id(self.ty(dst)) == class;
                if !ok {
                    self.mismatch(block, "ref_cast operand types".into(), errors);
                }
            }
            Op::NullCheck { object } => {
                if !self.pool.is_reference(self.ty(object)) {
                    self.mismatch(block, "null_check on value register".into(), errors);
                }
            }
            // Capture cells are erased slots; there is no static shape
            // to check beyond SSA discipline.
            Op::CellNew { .. } | Op::CellGet { .. } | Op::CellSet { .. } => {}

            Op::ArrayNew { dst, elem, len } => {
                let ok = self.pool.tag(self.ty(dst)) == Tag::Array
                    && self.pool.elem(self.ty(dst)) == elem
                    && self.pool.tag(self.ty(len)) == Tag::I64;
                if !ok {
                    self.mismatch(block, "array_new operand types".into(), errors);
                }
            }
            Op::ArrayLen { dst, array } => {
                if self.pool.tag(self.ty(array)) != Tag::Array
                    || self.pool.tag(self.ty(dst)) != Tag::I64
                {
                    self.mismatch(block, "array_len operand types".into(), errors);
                }
            }
            Op::ArrayGet { dst, array, index } => {
                let ok = self.pool.tag(self.ty(array)) == Tag::Array
                    && self.pool.tag(self.ty(index)) == Tag::I64
                    && self.erased_match(self.pool.elem(self.ty(array)), self.ty(dst));
                if !ok {
                    self.mismatch(block, "array_get operand types".into(), errors);
                }
            }
            Op::ArraySet { array, index, value } => {
                let ok = self.pool.tag(self.ty(array)) == Tag::Array
                    && self.pool.tag(self.ty(index)) == Tag::I64
                    && self.erased_subtype(self.ty(value), self.pool.elem(self.ty(array)));
                if !ok {
                    self.mismatch(block, "array_set operand types".into(), errors);
                }
            }
            Op::HashNew { dst, key, value } => {
                let ok = self.pool.tag(self.ty(dst)) == Tag::Hash
                    && self.pool.hash_key(self.ty(dst)) == key
                    && self.pool.hash_value(self.ty(dst)) == value;
                if !ok {
                    self.mismatch(block, "hash_new result type".into(), errors);
                }
            }
            Op::HashLen { dst, hash } => {
                if self.pool.tag(self.ty(hash)) != Tag::Hash
                    || self.pool.tag(self.ty(dst)) != Tag::I64
                {
                    self.mismatch(block, "hash_len operand types".into(), errors);
                }
            }
            Op::HashGet { dst, hash, key } => {
                let hash_ty = self.ty(hash);
                let ok = self.pool.tag(hash_ty) == Tag::Hash
                    && self.erased_subtype(self.ty(key), self.pool.hash_key(hash_ty))
                    && self.erased_match(self.pool.hash_value(hash_ty), self.ty(dst));
                if !ok {
                    self.mismatch(block, "hash_get operand types".into(), errors);
                }
            }
            Op::HashSet { hash, key, value } => {
                let hash_ty = self.ty(hash);
                let ok = self.pool.tag(hash_ty) == Tag::Hash
                    && self.erased_subtype(self.ty(key), self.pool.hash_key(hash_ty))
                    && self.erased_subtype(self.ty(value), self.pool.hash_value(hash_ty));
                if !ok {
                    self.mismatch(block, "hash_set operand types".into(), errors);
                }
            }
            Op::RangeNew { dst, start, end } => {
                let ok = self.pool.tag(self.ty(dst)) == Tag::Range
                    && self.pool.tag(self.ty(start)) == Tag::I64
                    && self.pool.tag(self.ty(end)) == Tag::I64;
                if !ok {
                    self.mismatch(block, "range_new operand types".into(), errors);
                }
            }
            Op::RangeStart { dst, range } | Op::RangeEnd { dst, range } => {
                if self.pool.tag(self.ty(range)) != Tag::Range
                    || self.pool.tag(self.ty(dst)) != Tag::I64
                {
                    self.mismatch(block, "range bound operand types".into(), errors);
                }
            }
            Op::TupleNew { dst, ref elems } => {
                let ok = self.pool.tag(self.ty(dst)) == Tag::Tuple
                    && self.pool.tuple_elems(self.ty(dst)).len() == elems.len();
                if !ok {
                    self.mismatch(block, "tuple_new arity".into(), errors);
                }
            }
            Op::TupleGet { dst, tuple, index } => {
                let tuple_ty = self.ty(tuple);
                let ok = self.pool.tag(tuple_ty) == Tag::Tuple
                    && (index as usize) < self.pool.tuple_elems(tuple_ty).len()
                    && self.erased_match(
                        self.pool.tuple_elems(tuple_ty)[index as usize],
                        self.ty(dst),
                    );
                if !ok {
                    self.mismatch(block, "tuple_get operand types".into(), errors);
                }
            }

            Op::StringConcat { dst, lhs, rhs } => {
                let all_refs = self.pool.is_reference(self.ty(dst))
                    && self.pool.is_reference(self.ty(lhs))
                    && self.pool.is_reference(self.ty(rhs));
                if !all_refs {
                    self.mismatch(block, "string_concat operand types".into(), errors);
                }
            }
            Op::StringFromPrim { dst, src } => {
                if !self
                    .pool
                    .flags(self.ty(src))
                    .contains(TypeFlags::IS_PRIMITIVE)
                    || !self.pool.is_reference(self.ty(dst))
                {
                    self.mismatch(block, "string_from_prim operand types".into(), errors);
                }
            }
            Op::JsonParse { dst, src } => {
                if !self.pool.is_reference(self.ty(src)) || !self.pool.is_reference(self.ty(dst))
                {
                    self.mismatch(block, "json_parse operand types".into(), errors);
                }
            }
            Op::JsonField { json, .. } => {
                if !self.pool.is_reference(self.ty(json)) {
                    self.mismatch(block, "json_field on value register".into(), errors);
                }
            }

            Op::CaughtException { .. } => {
                let is_handler_entry =
                    index == 0 && handler_blocks.contains(&block);
                if !is_handler_entry {
                    errors.push(VerifyError::StrayCaughtException {
                        function: self.func.id,
                        block,
                    });
                }
            }

            Op::FutureNew { dst, .. } => {
                if self.pool.tag(self.ty(dst)) != Tag::Future {
                    self.mismatch(block, "future_new result type".into(), errors);
                }
            }
            Op::FutureComplete { future, .. }
            | Op::FutureFail { future, .. }
            | Op::FutureRegister { future, .. } => {
                if self.pool.tag(self.ty(future)) != Tag::Future {
                    self.mismatch(block, "future op on non-future".into(), errors);
                }
            }
            Op::FutureValue { dst, future } => {
                let ok = self.pool.tag(self.ty(future)) == Tag::Future
                    && self.erased_match(self.pool.elem(self.ty(future)), self.ty(dst));
                if !ok {
                    self.mismatch(block, "future_value operand types".into(), errors);
                }
            }

            Op::ChannelNew { dst, capacity } => {
                if self.pool.tag(self.ty(dst)) != Tag::Channel
                    || self.pool.tag(self.ty(capacity)) != Tag::I64
                {
                    self.mismatch(block, "channel_new operand types".into(), errors);
                }
            }
            Op::ChannelSend { channel, value } => {
                let ok = self.pool.tag(self.ty(channel)) == Tag::Channel
                    && self.erased_subtype(self.ty(value), self.pool.elem(self.ty(channel)));
                if !ok {
                    self.mismatch(block, "channel_send operand types".into(), errors);
                }
            }
            Op::ChannelReceive { dst, channel } => {
                let ok = self.pool.tag(self.ty(channel)) == Tag::Channel
                    && self.erased_match(self.pool.elem(self.ty(channel)), self.ty(dst));
                if !ok {
                    self.mismatch(block, "channel_receive operand types".into(), errors);
                }
            }
            Op::ThreadSpawn { closure } => {
                if !self.pool.is_reference(self.ty(closure)) {
                    self.mismatch(block, "thread_spawn on value register".into(), errors);
                }
            }
        }
    }

    /// Slot type lookup shared by the field opcodes; reports unknown
    /// classes and out-of-range slots.
    fn field_type(
        &self,
        block: BlockId,
        object: Reg,
        class: ember_ir::ClassId,
        slot: u32,
        errors: &mut Vec<VerifyError>,
    ) -> Option<Idx> {
        if !self.is_class_like(self.ty(object)) {
            self.mismatch(block, "field access on value register".into(), errors);
            return None;
        }
        if class.index() >= self.module.classes.len() {
            self.mismatch(block, format!("field access on unknown {class:?}"), errors);
            return None;
        }
        let descriptor = self.module.class(class);
        match descriptor.fields.get(slot as usize) {
            Some(field) => Some(field.ty),
            None => {
                self.mismatch(
                    block,
                    format!("field slot {slot} out of range for {class:?}"),
                    errors,
                );
                None
            }
        }
    }

    /// Check a call's argument and result types against the callee.
    fn check_call(
        &self,
        block: BlockId,
        callee: FunctionId,
        receiver: Option<Reg>,
        args: &[Reg],
        dst: Reg,
        errors: &mut Vec<VerifyError>,
    ) {
        if callee.index() >= self.module.functions.len() {
            self.mismatch(block, format!("call of unknown {callee:?}"), errors);
            return;
        }
        let target = self.module.function(callee);
        let expected = if receiver.is_some() {
            &target.params[1..]
        } else {
            &target.params[..]
        };
        if args.len() != expected.len() {
            self.mismatch(
                block,
                format!("call arity {} != {}", args.len(), expected.len()),
                errors,
            );
            return;
        }
        for (&arg, &expected_ty) in args.iter().zip(expected) {
            if !self.erased_subtype(self.ty(arg), expected_ty) {
                self.mismatch(block, "call argument type".into(), errors);
            }
        }
        // Async bodies return their future; generator construction
        // returns the state machine. Both are checked at the New site
        // instead, so only direct bodies are compared here.
        if !target.is_coroutine() && !self.erased_match(target.ret, self.ty(dst)) {
            self.mismatch(block, "call result type".into(), errors);
        }
    }

    /// Structural equality that treats erased slots as wildcards.
    fn erased_match(&self, declared: Idx, actual: Idx) -> bool {
        declared == actual
            || self
                .pool
                .flags(declared)
                .contains(TypeFlags::HAS_TYPE_PARAM)
    }

    /// Subtype check that treats erased slots as wildcards.
    fn erased_subtype(&self, value: Idx, declared: Idx) -> bool {
        self.pool.subtype_of(value, declared)
            || self
                .pool
                .flags(declared)
                .contains(TypeFlags::HAS_TYPE_PARAM)
    }

    fn check_terminator(
        &self,
        block: BlockId,
        terminator: &Terminator,
        errors: &mut Vec<VerifyError>,
    ) {
        match terminator {
            Terminator::Ret { value } => match value {
                Some(reg) => {
                    if !self.pool.subtype_of(self.ty(*reg), self.func.ret) {
                        self.mismatch(block, "ret value type".into(), errors);
                    }
                }
                None => {
                    if self.func.ret != Idx::NIL {
                        self.mismatch(block, "bare ret from non-nil function".into(), errors);
                    }
                }
            },
            Terminator::CondJump { cond, .. } => {
                if self.pool.tag(self.ty(*cond)) != Tag::I1 {
                    self.mismatch(block, "cond_jump on non-i1".into(), errors);
                }
            }
            Terminator::Switch { scrutinee, .. } => {
                if !self.is_int(self.ty(*scrutinee)) {
                    self.mismatch(block, "switch on non-integer".into(), errors);
                }
            }
            Terminator::Throw { value } => {
                if !self.pool.is_reference(self.ty(*value)) {
                    self.mismatch(block, "throw of value register".into(), errors);
                }
                // A protected throw must have somewhere to land.
                if let Some(region) = self.func.innermost_region(block) {
                    if self.func.try_regions[region.index()].catches.is_empty() {
                        errors.push(VerifyError::EmptyCatchList {
                            function: self.func.id,
                            region: region.index(),
                        });
                    }
                }
            }
            Terminator::AwaitSuspend { future, .. } => {
                if !self.func.attrs.contains(FnAttrs::ASYNC) {
                    errors.push(VerifyError::SuspendOutsideCoroutine {
                        function: self.func.id,
                        block,
                    });
                }
                if self.pool.tag(self.ty(*future)) != Tag::Future {
                    self.mismatch(block, "await_suspend on non-future".into(), errors);
                }
            }
            Terminator::YieldSuspend { .. } => {
                if !self.func.attrs.contains(FnAttrs::GENERATOR) {
                    errors.push(VerifyError::SuspendOutsideCoroutine {
                        function: self.func.id,
                        block,
                    });
                }
            }
            Terminator::Trap { class } => {
                if class.index() >= self.module.classes.len() {
                    self.mismatch(block, format!("trap with unknown {class:?}"), errors);
                }
            }
            Terminator::Jump { .. } | Terminator::Unreachable => {}
        }
    }
}
