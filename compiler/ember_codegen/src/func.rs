//! Opcode-directed translation of one Anvil function into LowIR.
//!
//! Anvil blocks map onto LowIR blocks one-for-one, except where inline
//! checks (division by zero, array bounds, null receivers) split a
//! block, and for the synthetic prologue: every function gets a low
//! block 0 that marks the prologue safe point, spills parameters to
//! stack slots, and — for coroutine resume bodies — reloads the live
//! locals from the state object and dispatches on the state index.

use ember_anvil::{AnvilFunction, AnvilModule, BlockId, Cmp, FnAttrs, Op, Terminator};
use ember_ir::{ClassId, StringInterner};
use ember_types::{Idx, Pool, Tag};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::classes::{ConstTable, DESCRIPTOR_VTABLE_OFFSET, HEADER_CLASS_PTR_OFFSET};
use crate::lowir::{
    BinOp, Callee, CmpOp, Convert, LandingPad, LowBlock, LowBlockId, LowFunction, LowInst,
    LowTerm, LowType, SafePointKind, Value,
};
use crate::runtime::RuntimeFn;
use crate::CodegenError;

/// Machine type of a pool type.
pub(crate) fn machine(pool: &Pool, idx: Idx) -> LowType {
    match pool.tag(idx) {
        Tag::I1 => LowType::I1,
        Tag::I8 => LowType::I8,
        Tag::I32 => LowType::I32,
        Tag::I64 => LowType::I64,
        Tag::F32 => LowType::F32,
        Tag::F64 => LowType::F64,
        // Raw integers the collector never scans.
        Tag::IntPtr => LowType::I64,
        _ => LowType::Ptr,
    }
}

/// Runtime element-kind tag used by array/hash/box entry points.
fn kind_tag(ty: LowType) -> i64 {
    match ty {
        LowType::I1 => 0,
        LowType::I8 => 1,
        LowType::I32 => 2,
        LowType::I64 => 3,
        LowType::F32 => 4,
        LowType::F64 => 5,
        LowType::Ptr => 6,
    }
}

struct PendingBlock {
    params: Vec<Value>,
    insts: Vec<LowInst>,
    term: Option<LowTerm>,
}

pub(crate) struct FnTranslator<'a> {
    module: &'a AnvilModule,
    pool: &'a Pool,
    interner: &'a StringInterner,
    consts: &'a ConstTable,
    func: &'a AnvilFunction,
    values: Vec<LowType>,
    slots: Vec<LowType>,
    blocks: Vec<PendingBlock>,
    /// Anvil register → low value (identity except for handler-block
    /// exception parameters).
    reg_map: Vec<Value>,
    /// Anvil block → its first low block.
    block_map: Vec<LowBlockId>,
    /// All low blocks produced from each Anvil block (splits included).
    spawned: Vec<Vec<LowBlockId>>,
    current: LowBlockId,
    ic_sites: &'a mut u32,
}

impl<'a> FnTranslator<'a> {
    pub fn new(
        module: &'a AnvilModule,
        pool: &'a Pool,
        interner: &'a StringInterner,
        consts: &'a ConstTable,
        func: &'a AnvilFunction,
        ic_sites: &'a mut u32,
    ) -> Self {
        Self {
            module,
            pool,
            interner,
            consts,
            func,
            values: Vec::new(),
            slots: Vec::new(),
            blocks: Vec::new(),
            reg_map: Vec::new(),
            block_map: Vec::new(),
            spawned: Vec::new(),
            current: LowBlockId::new(0),
            ic_sites,
        }
    }

    pub fn run(mut self) -> Result<LowFunction, CodegenError> {
        // Anvil registers become values 0..n with their machine types.
        for &ty in &self.func.reg_types {
            self.values.push(machine(self.pool, ty));
        }
        self.reg_map = (0..self.values.len())
            .map(|i| {
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "register counts are bounded by u32 ids"
                )]
                Value::new(i as u32)
            })
            .collect();
        self.slots = self
            .func
            .locals
            .iter()
            .map(|&ty| machine(self.pool, ty))
            .collect();

        if self.func.attrs.contains(FnAttrs::NATIVE_THUNK) {
            return self.run_thunk();
        }

        // Prologue + one low block per Anvil block.
        let prologue = self.new_block();
        debug_assert_eq!(prologue, LowBlockId::new(0));
        let handler_params = self.handler_exception_params();
        for block in &self.func.blocks {
            let low = self.new_block();
            self.block_map.push(low);
            self.spawned.push(vec![low]);
            // Handler blocks receive the exception as a leading param.
            if let Some(&exc_dst) = handler_params.get(&block.id) {
                let exc = self.reg_map[exc_dst.index()];
                self.blocks[low.index()].params.push(exc);
            }
            for &param in &block.params {
                let value = self.reg_map[param.index()];
                self.blocks[low.index()].params.push(value);
            }
        }

        self.emit_prologue();

        for block_index in 0..self.func.blocks.len() {
            let anvil_block = BlockId::new(
                u32::try_from(block_index).map_err(|_| CodegenError::Internal {
                    detail: "block count exceeds u32".into(),
                })?,
            );
            self.current = self.block_map[block_index];
            let ops = self.func.blocks[block_index].ops.clone();
            for op in &ops {
                self.translate_op(anvil_block, op)?;
            }
            let terminator = self.func.blocks[block_index].terminator.clone();
            self.translate_terminator(anvil_block, &terminator);
        }

        let landing_pads = self.emit_landing_pads();

        self.finish(landing_pads)
    }

    // ── Infrastructure ──────────────────────────────────────────

    #[allow(
        clippy::cast_possible_truncation,
        reason = "block counts are bounded by u32 ids"
    )]
    fn new_block(&mut self) -> LowBlockId {
        let id = LowBlockId::new(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            params: Vec::new(),
            insts: Vec::new(),
            term: None,
        });
        id
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "value counts are bounded by u32 ids"
    )]
    fn temp(&mut self, ty: LowType) -> Value {
        let value = Value::new(self.values.len() as u32);
        self.values.push(ty);
        value
    }

    fn push(&mut self, inst: LowInst) {
        self.blocks[self.current.index()].insts.push(inst);
    }

    fn terminate(&mut self, term: LowTerm) {
        let pending = &mut self.blocks[self.current.index()];
        debug_assert!(pending.term.is_none(), "low block terminated twice");
        pending.term = Some(term);
    }

    /// Split the current block: everything after continues in a fresh
    /// block recorded against `anvil_block`'s span.
    fn split(&mut self, anvil_block: BlockId) -> LowBlockId {
        let next = self.new_block();
        self.spawned[anvil_block.index()].push(next);
        next
    }

    fn value(&self, reg: ember_anvil::Reg) -> Value {
        self.reg_map[reg.index()]
    }

    /// Exception-destination register of every handler block.
    fn handler_exception_params(&self) -> FxHashMap<BlockId, ember_anvil::Reg> {
        let mut map = FxHashMap::default();
        for region in &self.func.try_regions {
            for &(_, handler) in &region.catches {
                if let Some(Op::CaughtException { dst }) =
                    self.func.blocks[handler.index()].ops.first()
                {
                    map.insert(handler, *dst);
                }
            }
        }
        map
    }

    fn call(&mut self, dst: Option<Value>, callee: Callee, args: &[Value]) {
        self.push(LowInst::SafePoint {
            kind: SafePointKind::CallSite,
        });
        self.push(LowInst::Call {
            dst,
            callee,
            args: SmallVec::from_slice(args),
        });
    }

    fn iconst(&mut self, ty: LowType, value: i64) -> Value {
        let dst = self.temp(ty);
        self.push(LowInst::IConst { dst, ty, value });
        dst
    }

    fn descriptor_addr(&mut self, class: ClassId) -> Value {
        let dst = self.temp(LowType::Ptr);
        self.push(LowInst::ConstAddr {
            dst,
            constant: self.consts.descriptor(class),
        });
        dst
    }

    /// Byte offset of a field slot.
    fn field_offset(&self, class: ClassId, slot: u32) -> Result<(u32, bool, LowType), CodegenError> {
        let layout = self
            .pool
            .layout_of(class)
            .ok_or_else(|| CodegenError::Internal {
                detail: format!("class {class:?} reached codegen without a layout"),
            })?;
        let field = layout
            .fields
            .get(slot as usize)
            .ok_or_else(|| CodegenError::Internal {
                detail: format!("field slot {slot} out of range for {class:?}"),
            })?;
        let descriptor = self.module.class(class);
        let ty = machine(self.pool, descriptor.fields[slot as usize].ty);
        Ok((field.offset, field.is_reference && layout.is_gc_managed(), ty))
    }

    fn store_field(
        &mut self,
        object: Value,
        class: ClassId,
        slot: u32,
        value: Value,
        erased: bool,
    ) -> Result<(), CodegenError> {
        let (offset, barrier, ty) = self.field_offset(class, slot)?;
        let ty = if erased { LowType::Ptr } else { ty };
        self.push(LowInst::Store {
            ty,
            base: object,
            offset,
            src: value,
        });
        if barrier {
            let off = self.iconst(LowType::I64, i64::from(offset));
            self.call(
                None,
                Callee::Runtime(RuntimeFn::GcWriteBarrier),
                &[object, off, value],
            );
        }
        Ok(())
    }

    /// Inline trap check: `cond == true` jumps to a runtime trap.
    fn trap_if(&mut self, anvil_block: BlockId, cond: Value, trap: RuntimeFn) {
        let trap_block = self.new_block();
        let cont = self.split(anvil_block);
        self.terminate(LowTerm::CondBr {
            cond,
            then_block: trap_block,
            else_block: cont,
        });

        self.current = trap_block;
        self.call(None, Callee::Runtime(trap), &[]);
        self.terminate(LowTerm::Unreachable);

        self.current = cont;
    }

    // ── Prologue ────────────────────────────────────────────────

    fn emit_prologue(&mut self) {
        self.current = LowBlockId::new(0);
        self.push(LowInst::SafePoint {
            kind: SafePointKind::Prologue,
        });

        // Incoming parameters are the entry block's parameters; spill
        // them into their slots.
        let param_types: Vec<LowType> = self
            .func
            .params
            .iter()
            .map(|&ty| machine(self.pool, ty))
            .collect();
        let mut param_values = Vec::with_capacity(param_types.len());
        for &ty in &param_types {
            let value = self.temp(ty);
            self.blocks[0].params.push(value);
            param_values.push(value);
        }
        for (i, &value) in param_values.iter().enumerate() {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "parameter counts are bounded by source arity"
            )]
            self.push(LowInst::SlotStore {
                slot: i as u32,
                src: value,
            });
        }

        let body_entry = self.block_map[0];
        let Some(info) = &self.func.coroutine else {
            self.terminate(LowTerm::Br {
                target: body_entry,
                args: SmallVec::new(),
            });
            return;
        };

        // Coroutine resume: reload live locals from the state object,
        // then dispatch on the state index.
        let info = info.clone();
        let self_value = param_values[0];
        let layout_fields: Vec<(u32, LowType)> = {
            let layout = match self.pool.layout_of(info.class) {
                Some(l) => l,
                None => return,
            };
            layout
                .fields
                .iter()
                .map(|f| (f.offset, LowType::Ptr))
                .collect()
        };
        for k in 1..self.slots.len() {
            let field_index = info.first_local_slot as usize + k - 1;
            let Some(&(offset, _)) = layout_fields.get(field_index) else {
                continue;
            };
            let ty = self.slots[k];
            let value = self.temp(ty);
            self.push(LowInst::Load {
                dst: value,
                ty,
                base: self_value,
                offset,
            });
            #[allow(
                clippy::cast_possible_truncation,
                reason = "local counts are bounded by u32 ids"
            )]
            self.push(LowInst::SlotStore {
                slot: k as u32,
                src: value,
            });
        }

        let state_offset = layout_fields
            .get(info.state_slot as usize)
            .map_or(0, |&(offset, _)| offset);
        let state = self.temp(LowType::I32);
        self.push(LowInst::Load {
            dst: state,
            ty: LowType::I32,
            base: self_value,
            offset: state_offset,
        });

        let dead = self.new_block();
        self.current = dead;
        self.terminate(LowTerm::Unreachable);
        self.current = LowBlockId::new(0);

        let mut cases = vec![(0, body_entry)];
        for (k, &resume) in info.resume_points.iter().enumerate() {
            #[allow(
                clippy::cast_possible_wrap,
                reason = "state counts are far below i64::MAX"
            )]
            cases.push((k as i64 + 1, self.block_map[resume.index()]));
        }
        self.terminate(LowTerm::Switch {
            scrutinee: state,
            cases,
            default: dead,
        });
    }

    // ── FFI thunks ──────────────────────────────────────────────

    /// A `@native` method body: load the resolved pointer from the
    /// binding slot and tail through it. Argument and return marshaling
    /// is the identity on the supported targets: every Ember machine
    /// type is already a C ABI type.
    fn run_thunk(mut self) -> Result<LowFunction, CodegenError> {
        let entry = self.new_block();
        debug_assert_eq!(entry, LowBlockId::new(0));
        self.current = entry;
        self.push(LowInst::SafePoint {
            kind: SafePointKind::Prologue,
        });

        let param_types: Vec<LowType> = self
            .func
            .params
            .iter()
            .map(|&ty| machine(self.pool, ty))
            .collect();
        let mut args = Vec::with_capacity(param_types.len());
        for &ty in &param_types {
            let value = self.temp(ty);
            self.blocks[0].params.push(value);
            args.push(value);
        }

        let slot = self
            .consts
            .ffi_slots
            .get(&self.func.id)
            .copied()
            .ok_or_else(|| CodegenError::Internal {
                detail: format!("native thunk {:?} has no binding slot", self.func.id),
            })?;
        let slot_addr = self.temp(LowType::Ptr);
        self.push(LowInst::ConstAddr {
            dst: slot_addr,
            constant: slot,
        });
        let fn_ptr = self.temp(LowType::Ptr);
        self.push(LowInst::Load {
            dst: fn_ptr,
            ty: LowType::Ptr,
            base: slot_addr,
            offset: 0,
        });

        let ret_ty = self.ret_type();
        let dst = ret_ty.map(|ty| self.temp(ty));
        self.call(dst, Callee::Indirect(fn_ptr), &args);
        self.terminate(LowTerm::Ret { value: dst });

        self.finish(Vec::new())
    }

    fn ret_type(&self) -> Option<LowType> {
        if self.func.ret == Idx::NIL {
            None
        } else {
            Some(machine(self.pool, self.func.ret))
        }
    }

    // ── Landing pads ────────────────────────────────────────────

    /// One dispatcher per try-region: compare the thrown object's class
    /// against each catch type in listed order, fall through to
    /// re-raise.
    fn emit_landing_pads(&mut self) -> Vec<LandingPad> {
        let regions = self.func.try_regions.clone();
        let mut pads = Vec::with_capacity(regions.len());

        for region in &regions {
            let dispatcher = self.new_block();
            self.current = dispatcher;
            let exc = self.temp(LowType::Ptr);
            self.push(LowInst::LandingPad { dst: exc });
            let exc_class = self.temp(LowType::Ptr);
            self.push(LowInst::Load {
                dst: exc_class,
                ty: LowType::Ptr,
                base: exc,
                offset: HEADER_CLASS_PTR_OFFSET,
            });

            for &(catch_class, handler) in &region.catches {
                let target_desc = self.descriptor_addr(catch_class);
                let matches = self.temp(LowType::I1);
                self.push(LowInst::SafePoint {
                    kind: SafePointKind::CallSite,
                });
                self.push(LowInst::Call {
                    dst: Some(matches),
                    callee: Callee::Runtime(RuntimeFn::ClassIsSubtype),
                    args: SmallVec::from_slice(&[exc_class, target_desc]),
                });

                let enter = self.new_block();
                let next = self.new_block();
                self.terminate(LowTerm::CondBr {
                    cond: matches,
                    then_block: enter,
                    else_block: next,
                });

                // The handler's leading parameter is the exception.
                self.current = enter;
                self.terminate(LowTerm::Br {
                    target: self.block_map[handler.index()],
                    args: SmallVec::from_slice(&[exc]),
                });

                self.current = next;
            }

            // No catch matched: keep unwinding.
            self.call(None, Callee::Runtime(RuntimeFn::Rethrow), &[]);
            self.terminate(LowTerm::Unreachable);

            let mut blocks = Vec::new();
            for anvil_index in region.first.index()..=region.last.index() {
                blocks.extend(self.spawned[anvil_index].iter().copied());
            }
            pads.push(LandingPad { blocks, dispatcher });
        }
        pads
    }

    fn finish(self, landing_pads: Vec<LandingPad>) -> Result<LowFunction, CodegenError> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (i, pending) in self.blocks.into_iter().enumerate() {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "block counts are bounded by u32 ids"
            )]
            let id = LowBlockId::new(i as u32);
            let term = pending.term.ok_or_else(|| CodegenError::Internal {
                detail: format!("low block {i} left unterminated"),
            })?;
            blocks.push(LowBlock {
                id,
                params: pending.params,
                insts: pending.insts,
                term,
            });
        }

        let ret = if self.func.ret == Idx::NIL {
            None
        } else {
            Some(machine(self.pool, self.func.ret))
        };

        Ok(LowFunction {
            id: self.func.id,
            name: self.func.name,
            symbol: format!(
                "ember_{}_{}",
                self.interner.lookup(self.func.name),
                self.func.id.raw()
            ),
            params: self
                .func
                .params
                .iter()
                .map(|&ty| machine(self.pool, ty))
                .collect(),
            ret,
            slots: self.slots,
            values: self.values,
            blocks,
            landing_pads,
        })
    }
}

// ── Per-opcode translation ──────────────────────────────────────────

impl FnTranslator<'_> {
    #[allow(
        clippy::too_many_lines,
        reason = "one arm per opcode keeps the translation table in one place"
    )]
    fn translate_op(&mut self, anvil_block: BlockId, op: &Op) -> Result<(), CodegenError> {
        match *op {
            Op::LoadLocal { dst, local } => {
                let dst = self.value(dst);
                self.push(LowInst::SlotLoad {
                    dst,
                    slot: local.raw(),
                });
            }
            Op::StoreLocal { local, src } => {
                let src = self.value(src);
                self.push(LowInst::SlotStore {
                    slot: local.raw(),
                    src,
                });
            }

            Op::ConstInt { dst, value } => {
                let ty = self.values[self.value(dst).index()];
                let dst = self.value(dst);
                self.push(LowInst::IConst { dst, ty, value });
            }
            Op::ConstFloat { dst, bits } => {
                let dst = self.value(dst);
                self.push(LowInst::FConst {
                    dst,
                    ty: LowType::F32,
                    bits: u64::from(bits),
                });
            }
            Op::ConstDouble { dst, bits } => {
                let dst = self.value(dst);
                self.push(LowInst::FConst {
                    dst,
                    ty: LowType::F64,
                    bits,
                });
            }
            Op::ConstString { dst, value } => {
                let dst = self.value(dst);
                self.push(LowInst::ConstAddr {
                    dst,
                    constant: self.consts.strings[value.index()],
                });
            }
            Op::ConstNil { dst } => {
                let dst = self.value(dst);
                self.push(LowInst::NullPtr { dst });
            }
            Op::ConstClass { dst, class } => {
                let dst = self.value(dst);
                self.push(LowInst::ConstAddr {
                    dst,
                    constant: self.consts.descriptor(class),
                });
            }
            Op::ConstMethod { dst, function } => {
                let dst = self.value(dst);
                self.push(LowInst::FuncAddr { dst, function });
            }

            // Wrapping integer arithmetic maps straight onto the
            // backend's two's-complement ops.
            Op::IAdd { dst, lhs, rhs } => self.binop(BinOp::Add, dst, lhs, rhs),
            Op::ISub { dst, lhs, rhs } => self.binop(BinOp::Sub, dst, lhs, rhs),
            Op::IMul { dst, lhs, rhs } => self.binop(BinOp::Mul, dst, lhs, rhs),
            Op::IDiv { dst, lhs, rhs } => {
                self.div_zero_check(anvil_block, rhs);
                self.binop(BinOp::Div, dst, lhs, rhs);
            }
            Op::IMod { dst, lhs, rhs } => {
                self.div_zero_check(anvil_block, rhs);
                self.binop(BinOp::Rem, dst, lhs, rhs);
            }
            Op::INeg { dst, src } => {
                let ty = self.values[self.value(dst).index()];
                let zero = self.iconst(ty, 0);
                let dst = self.value(dst);
                let src = self.value(src);
                self.push(LowInst::BinOp {
                    dst,
                    op: BinOp::Sub,
                    lhs: zero,
                    rhs: src,
                });
            }
            Op::BitAnd { dst, lhs, rhs } => self.binop(BinOp::And, dst, lhs, rhs),
            Op::BitOr { dst, lhs, rhs } => self.binop(BinOp::Or, dst, lhs, rhs),
            Op::BitXor { dst, lhs, rhs } => self.binop(BinOp::Xor, dst, lhs, rhs),
            Op::Shl { dst, lhs, rhs } => self.binop(BinOp::Shl, dst, lhs, rhs),
            Op::Shr { dst, lhs, rhs } => self.binop(BinOp::Shr, dst, lhs, rhs),
            Op::ICmp { dst, cmp, lhs, rhs } => {
                let dst = self.value(dst);
                let lhs = self.value(lhs);
                let rhs = self.value(rhs);
                self.push(LowInst::Cmp {
                    dst,
                    op: int_predicate(cmp),
                    lhs,
                    rhs,
                });
            }

            Op::FAdd { dst, lhs, rhs } => self.binop(BinOp::FAdd, dst, lhs, rhs),
            Op::FSub { dst, lhs, rhs } => self.binop(BinOp::FSub, dst, lhs, rhs),
            Op::FMul { dst, lhs, rhs } => self.binop(BinOp::FMul, dst, lhs, rhs),
            Op::FDiv { dst, lhs, rhs } => self.binop(BinOp::FDiv, dst, lhs, rhs),
            Op::FMod { dst, lhs, rhs } => self.binop(BinOp::FRem, dst, lhs, rhs),
            Op::FNeg { dst, src } => {
                let ty = self.values[self.value(dst).index()];
                let zero = self.temp(ty);
                self.push(LowInst::FConst { dst: zero, ty, bits: 0 });
                let dst = self.value(dst);
                let src = self.value(src);
                self.push(LowInst::BinOp {
                    dst,
                    op: BinOp::FSub,
                    lhs: zero,
                    rhs: src,
                });
            }
            Op::FCmp { dst, cmp, lhs, rhs } => {
                let dst = self.value(dst);
                let lhs = self.value(lhs);
                let rhs = self.value(rhs);
                self.push(LowInst::Cmp {
                    dst,
                    op: float_predicate(cmp),
                    lhs,
                    rhs,
                });
            }
            Op::Not { dst, src } => {
                let one = self.iconst(LowType::I1, 1);
                let dst = self.value(dst);
                let src = self.value(src);
                self.push(LowInst::BinOp {
                    dst,
                    op: BinOp::Xor,
                    lhs: src,
                    rhs: one,
                });
            }

            Op::IntToFloat { dst, src } => self.convert(Convert::SiToFp, dst, src),
            Op::FloatToInt { dst, src } => self.convert(Convert::FpToSi, dst, src),
            Op::SignExtend { dst, src } => self.convert(Convert::Sext, dst, src),
            Op::FloatPromote { dst, src } => self.convert(Convert::FpExt, dst, src),
            Op::Box { dst, src } => {
                let src_ty = self.values[self.value(src).index()];
                let kind = self.iconst(LowType::I64, kind_tag(src_ty));
                let dst = self.value(dst);
                let src = self.value(src);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::BoxNew), &[kind, src]);
            }
            Op::Unbox { dst, src, class: _ } => {
                let dst = self.value(dst);
                let src = self.value(src);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::BoxValue), &[src]);
            }

            Op::New { dst, class, ref args } => {
                let descriptor = self.descriptor_addr(class);
                let dst = self.value(dst);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::GcAlloc), &[descriptor]);
                // Run the initializer when the class declares one with
                // this arity.
                let initialize = self.interner.get("initialize");
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "argument counts are bounded by source arity"
                )]
                let handle = initialize.and_then(|name| {
                    self.module.class(class).method(name, args.len() as u32).cloned()
                });
                if let Some(handle) = handle {
                    let mut call_args = vec![dst];
                    call_args.extend(args.iter().map(|&a| self.value(a)));
                    let init_ret = self.module.function(handle.function).ret;
                    let init_dst = if init_ret == Idx::NIL {
                        None
                    } else {
                        Some(self.temp(machine(self.pool, init_ret)))
                    };
                    self.call(init_dst, Callee::Direct(handle.function), &call_args);
                }
            }

            Op::GetField {
                dst,
                object,
                class,
                slot,
            } => {
                let (offset, _, ty) = self.field_offset(class, slot)?;
                let dst = self.value(dst);
                let object = self.value(object);
                self.push(LowInst::Load {
                    dst,
                    ty,
                    base: object,
                    offset,
                });
            }
            Op::SetField {
                object,
                class,
                slot,
                value,
            } => {
                let object = self.value(object);
                let value = self.value(value);
                self.store_field(object, class, slot, value, false)?;
            }
            Op::LoadErased {
                dst,
                object,
                class,
                slot,
                static_ty: _,
            } => {
                // The reinterpretation is purely static: erased slots
                // are pointer-sized loads.
                let (offset, _, _) = self.field_offset(class, slot)?;
                let dst = self.value(dst);
                let object = self.value(object);
                self.push(LowInst::Load {
                    dst,
                    ty: LowType::Ptr,
                    base: object,
                    offset,
                });
            }
            Op::StoreErased {
                object,
                class,
                slot,
                value,
            } => {
                let object = self.value(object);
                let value = self.value(value);
                self.store_field(object, class, slot, value, true)?;
            }

            Op::CallStatic { dst, function, ref args } => {
                let args: Vec<Value> = args.iter().map(|&a| self.value(a)).collect();
                let dst = self.call_result(dst, function);
                self.call(dst, Callee::Direct(function), &args);
            }
            Op::CallVirtual {
                dst,
                receiver,
                class,
                slot,
                ref args,
            } => {
                let receiver = self.value(receiver);
                let descriptor = self.temp(LowType::Ptr);
                self.push(LowInst::Load {
                    dst: descriptor,
                    ty: LowType::Ptr,
                    base: receiver,
                    offset: HEADER_CLASS_PTR_OFFSET,
                });
                let vtable = self.temp(LowType::Ptr);
                self.push(LowInst::Load {
                    dst: vtable,
                    ty: LowType::Ptr,
                    base: descriptor,
                    offset: DESCRIPTOR_VTABLE_OFFSET,
                });
                let fn_ptr = self.temp(LowType::Ptr);
                self.push(LowInst::Load {
                    dst: fn_ptr,
                    ty: LowType::Ptr,
                    base: vtable,
                    offset: slot * 8,
                });
                let callee = self.module.class(class).vtable[slot as usize];
                let mut call_args = vec![receiver];
                call_args.extend(args.iter().map(|&a| self.value(a)));
                let dst = self.call_result(dst, callee);
                self.call(dst, Callee::Indirect(fn_ptr), &call_args);
            }
            Op::CallInterface {
                dst,
                receiver,
                name,
                ref args,
            } => {
                let receiver_value = self.value(receiver);
                let descriptor = self.temp(LowType::Ptr);
                self.push(LowInst::Load {
                    dst: descriptor,
                    ty: LowType::Ptr,
                    base: receiver_value,
                    offset: HEADER_CLASS_PTR_OFFSET,
                });
                let site = *self.ic_sites;
                *self.ic_sites += 1;
                let cache = self.temp(LowType::Ptr);
                self.push(LowInst::InlineCacheAddr { dst: cache, site });
                let name_const = self.intern_name(name)?;
                #[allow(
                    clippy::cast_possible_wrap,
                    reason = "arity is far below i64::MAX"
                )]
                let arity = self.iconst(LowType::I64, args.len() as i64);
                let fn_ptr = self.temp(LowType::Ptr);
                self.call(
                    Some(fn_ptr),
                    Callee::Runtime(RuntimeFn::InterfaceLookup),
                    &[descriptor, name_const, arity, cache],
                );
                let mut call_args = vec![receiver_value];
                call_args.extend(args.iter().map(|&a| self.value(a)));
                let dst = self.value(dst);
                self.call(Some(dst), Callee::Indirect(fn_ptr), &call_args);
            }
            Op::CallNative { dst, function, ref args } => {
                let args: Vec<Value> = args.iter().map(|&a| self.value(a)).collect();
                let dst = self.call_result(dst, function);
                self.call(dst, Callee::Direct(function), &args);
            }
            Op::InstanceOf { dst, object, class } => {
                let object = self.value(object);
                let actual = self.temp(LowType::Ptr);
                self.push(LowInst::Load {
                    dst: actual,
                    ty: LowType::Ptr,
                    base: object,
                    offset: HEADER_CLASS_PTR_OFFSET,
                });
                let target = self.descriptor_addr(class);
                let dst = self.value(dst);
                self.call(
                    Some(dst),
                    Callee::Runtime(RuntimeFn::ClassIsSubtype),
                    &[actual, target],
                );
            }
            Op::RefCast { dst, src, class: _ } => {
                let dst = self.value(dst);
                let src = self.value(src);
                self.push(LowInst::Convert {
                    dst,
                    kind: Convert::PtrCast,
                    src,
                });
            }
            Op::NullCheck { object } => {
                let object = self.value(object);
                let null = self.temp(LowType::Ptr);
                self.push(LowInst::NullPtr { dst: null });
                let is_null = self.temp(LowType::I1);
                self.push(LowInst::Cmp {
                    dst: is_null,
                    op: CmpOp::Eq,
                    lhs: object,
                    rhs: null,
                });
                self.trap_if(anvil_block, is_null, RuntimeFn::TrapNullReference);
            }
            Op::CellNew { dst, value } => {
                let value_ty = self.values[self.value(value).index()];
                let kind = self.iconst(LowType::I64, kind_tag(value_ty));
                let dst = self.value(dst);
                let value = self.value(value);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::CellNew), &[kind, value]);
            }
            Op::CellGet { dst, cell } => {
                let dst = self.value(dst);
                let cell = self.value(cell);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::CellGet), &[cell]);
            }
            Op::CellSet { cell, value } => {
                let cell = self.value(cell);
                let value = self.value(value);
                self.call(None, Callee::Runtime(RuntimeFn::CellSet), &[cell, value]);
            }

            Op::ArrayNew { dst, elem, len } => {
                let kind = self.iconst(LowType::I64, kind_tag(machine(self.pool, elem)));
                let dst = self.value(dst);
                let len = self.value(len);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::ArrayNew), &[kind, len]);
            }
            Op::ArrayLen { dst, array } => {
                let dst = self.value(dst);
                let array = self.value(array);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::ArrayLen), &[array]);
            }
            Op::ArrayGet { dst, array, index } => {
                let dst = self.value(dst);
                let array = self.value(array);
                let index = self.value(index);
                self.bounds_check(anvil_block, array, index);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::ArrayGet), &[array, index]);
            }
            Op::ArraySet { array, index, value } => {
                let array = self.value(array);
                let index = self.value(index);
                let value = self.value(value);
                self.bounds_check(anvil_block, array, index);
                self.call(
                    None,
                    Callee::Runtime(RuntimeFn::ArraySet),
                    &[array, index, value],
                );
            }
            Op::HashNew { dst, key, value } => {
                let key_kind = self.iconst(LowType::I64, kind_tag(machine(self.pool, key)));
                let value_kind = self.iconst(LowType::I64, kind_tag(machine(self.pool, value)));
                let dst = self.value(dst);
                self.call(
                    Some(dst),
                    Callee::Runtime(RuntimeFn::HashNew),
                    &[key_kind, value_kind],
                );
            }
            Op::HashLen { dst, hash } => {
                let dst = self.value(dst);
                let hash = self.value(hash);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::HashLen), &[hash]);
            }
            Op::HashGet { dst, hash, key } => {
                let dst = self.value(dst);
                let hash = self.value(hash);
                let key = self.value(key);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::HashGet), &[hash, key]);
            }
            Op::HashSet { hash, key, value } => {
                let hash = self.value(hash);
                let key = self.value(key);
                let value = self.value(value);
                self.call(None, Callee::Runtime(RuntimeFn::HashSet), &[hash, key, value]);
            }
            Op::RangeNew { dst, start, end } => {
                let dst = self.value(dst);
                let start = self.value(start);
                let end = self.value(end);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::RangeNew), &[start, end]);
            }
            Op::RangeStart { dst, range } => {
                let dst = self.value(dst);
                let range = self.value(range);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::RangeStart), &[range]);
            }
            Op::RangeEnd { dst, range } => {
                let dst = self.value(dst);
                let range = self.value(range);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::RangeEnd), &[range]);
            }
            Op::TupleNew { dst, ref elems } => {
                #[allow(
                    clippy::cast_possible_wrap,
                    reason = "tuple arity is far below i64::MAX"
                )]
                let arity = self.iconst(LowType::I64, elems.len() as i64);
                let mut args = vec![arity];
                args.extend(elems.iter().map(|&e| self.value(e)));
                let dst = self.value(dst);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::TupleNew), &args);
            }
            Op::TupleGet { dst, tuple, index } => {
                let idx = self.iconst(LowType::I64, i64::from(index));
                let dst = self.value(dst);
                let tuple = self.value(tuple);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::TupleGet), &[tuple, idx]);
            }

            Op::StringConcat { dst, lhs, rhs } => {
                let dst = self.value(dst);
                let lhs = self.value(lhs);
                let rhs = self.value(rhs);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::StringConcat), &[lhs, rhs]);
            }
            Op::StringFromPrim { dst, src } => {
                let src_ty = self.values[self.value(src).index()];
                let entry = match src_ty {
                    LowType::I1 => RuntimeFn::StringFromBool,
                    LowType::F32 | LowType::F64 => RuntimeFn::StringFromF64,
                    _ => RuntimeFn::StringFromI64,
                };
                let dst = self.value(dst);
                let src = self.value(src);
                self.call(Some(dst), Callee::Runtime(entry), &[src]);
            }

            Op::JsonParse { dst, src } => {
                let dst = self.value(dst);
                let src = self.value(src);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::JsonParse), &[src]);
            }
            Op::JsonField { dst, json, key } => {
                let entry = match self.values[self.value(dst).index()] {
                    LowType::I1 => RuntimeFn::JsonGetBool,
                    LowType::F32 | LowType::F64 => RuntimeFn::JsonGetF64,
                    LowType::Ptr => {
                        if self.is_string_reg(dst) {
                            RuntimeFn::JsonGetString
                        } else {
                            RuntimeFn::JsonGetObject
                        }
                    }
                    _ => RuntimeFn::JsonGetI64,
                };
                let key_const = self.temp(LowType::Ptr);
                self.push(LowInst::ConstAddr {
                    dst: key_const,
                    constant: self.consts.strings[key.index()],
                });
                let dst = self.value(dst);
                let json = self.value(json);
                self.call(Some(dst), Callee::Runtime(entry), &[json, key_const]);
            }

            // The dispatcher binds the exception to this block's leading
            // parameter; nothing to emit here.
            Op::CaughtException { .. } => {}

            Op::FutureNew { dst, state_machine } => {
                let dst = self.value(dst);
                let sm = self.value(state_machine);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::FutureNew), &[sm]);
            }
            Op::FutureComplete { future, value } => {
                let future = self.value(future);
                let value = self.value(value);
                self.call(
                    None,
                    Callee::Runtime(RuntimeFn::FutureComplete),
                    &[future, value],
                );
            }
            Op::FutureFail { future, error } => {
                let future = self.value(future);
                let error = self.value(error);
                self.call(None, Callee::Runtime(RuntimeFn::FutureFail), &[future, error]);
            }
            Op::FutureValue { dst, future } => {
                let dst = self.value(dst);
                let future = self.value(future);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::FutureValue), &[future]);
            }
            Op::FutureRegister {
                future,
                continuation,
            } => {
                let future = self.value(future);
                let continuation = self.value(continuation);
                self.call(
                    None,
                    Callee::Runtime(RuntimeFn::FutureRegisterContinuation),
                    &[future, continuation],
                );
            }

            Op::ChannelNew { dst, capacity } => {
                let dst = self.value(dst);
                let capacity = self.value(capacity);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::ChannelNew), &[capacity]);
            }
            Op::ChannelSend { channel, value } => {
                let channel = self.value(channel);
                let value = self.value(value);
                self.call(None, Callee::Runtime(RuntimeFn::ChannelSend), &[channel, value]);
            }
            Op::ChannelReceive { dst, channel } => {
                let dst = self.value(dst);
                let channel = self.value(channel);
                self.call(Some(dst), Callee::Runtime(RuntimeFn::ChannelReceive), &[channel]);
            }
            Op::ThreadSpawn { closure } => {
                let closure = self.value(closure);
                self.call(None, Callee::Runtime(RuntimeFn::ThreadSpawn), &[closure]);
            }
        }
        Ok(())
    }

    fn binop(&mut self, op: BinOp, dst: ember_anvil::Reg, lhs: ember_anvil::Reg, rhs: ember_anvil::Reg) {
        let dst = self.value(dst);
        let lhs = self.value(lhs);
        let rhs = self.value(rhs);
        self.push(LowInst::BinOp { dst, op, lhs, rhs });
    }

    fn convert(&mut self, kind: Convert, dst: ember_anvil::Reg, src: ember_anvil::Reg) {
        let dst = self.value(dst);
        let src = self.value(src);
        self.push(LowInst::Convert { dst, kind, src });
    }

    /// Zero-divisor check feeding `DivisionByZeroError`.
    fn div_zero_check(&mut self, anvil_block: BlockId, rhs: ember_anvil::Reg) {
        let ty = self.values[self.value(rhs).index()];
        let zero = self.iconst(ty, 0);
        let is_zero = self.temp(LowType::I1);
        let rhs = self.value(rhs);
        self.push(LowInst::Cmp {
            dst: is_zero,
            op: CmpOp::Eq,
            lhs: rhs,
            rhs: zero,
        });
        self.trap_if(anvil_block, is_zero, RuntimeFn::TrapDivisionByZero);
    }

    /// Array bounds check feeding `IndexOutOfBoundsError`: trap on
    /// `index < 0 || index >= len`.
    fn bounds_check(&mut self, anvil_block: BlockId, array: Value, index: Value) {
        let len = self.temp(LowType::I64);
        self.call(Some(len), Callee::Runtime(RuntimeFn::ArrayLen), &[array]);
        let zero = self.iconst(LowType::I64, 0);
        let negative = self.temp(LowType::I1);
        self.push(LowInst::Cmp {
            dst: negative,
            op: CmpOp::SLt,
            lhs: index,
            rhs: zero,
        });
        let past_end = self.temp(LowType::I1);
        self.push(LowInst::Cmp {
            dst: past_end,
            op: CmpOp::SGe,
            lhs: index,
            rhs: len,
        });
        let out_of_bounds = self.temp(LowType::I1);
        self.push(LowInst::BinOp {
            dst: out_of_bounds,
            op: BinOp::Or,
            lhs: negative,
            rhs: past_end,
        });
        self.trap_if(anvil_block, out_of_bounds, RuntimeFn::TrapIndexOutOfBounds);
    }

    /// Result value for a call, `None` when the callee returns nil.
    fn call_result(&mut self, dst: ember_anvil::Reg, callee: ember_ir::FunctionId) -> Option<Value> {
        if self.module.function(callee).ret == Idx::NIL {
            // The Anvil register still exists; give it a null value.
            let value = self.value(dst);
            self.defer_null(value);
            None
        } else {
            Some(self.value(dst))
        }
    }

    /// Bind a null to a register whose call produced no value.
    fn defer_null(&mut self, dst: Value) {
        self.push(LowInst::NullPtr { dst });
    }

    /// String constant for an interned identifier (interface lookup
    /// keys, pre-materialized with the other constants).
    fn intern_name(&mut self, name: ember_ir::Name) -> Result<Value, CodegenError> {
        let constant = self
            .consts
            .names
            .get(&name)
            .copied()
            .ok_or_else(|| CodegenError::Internal {
                detail: format!(
                    "interface lookup key {:?} missing from the constant pool",
                    self.interner.lookup(name)
                ),
            })?;
        let dst = self.temp(LowType::Ptr);
        self.push(LowInst::ConstAddr { dst, constant });
        Ok(dst)
    }

    /// Whether an Anvil register is statically string-typed.
    fn is_string_reg(&self, reg: ember_anvil::Reg) -> bool {
        let ty = self.func.reg_type(reg);
        if self.pool.tag(ty) != Tag::Class {
            return false;
        }
        self.pool
            .class_name(self.pool.class_id(ty))
            .is_some_and(|name| self.interner.lookup(name) == "String")
    }

    fn translate_terminator(&mut self, anvil_block: BlockId, terminator: &Terminator) {
        match terminator {
            Terminator::Ret { value } => {
                let value = value.map(|v| self.value(v));
                self.terminate(LowTerm::Ret { value });
            }
            Terminator::Jump { target, args } => {
                // Back-edges are safe points so long loops cannot starve
                // the collector.
                if target.raw() <= anvil_block.raw() {
                    self.push(LowInst::SafePoint {
                        kind: SafePointKind::LoopBackEdge,
                    });
                }
                let args = args.iter().map(|&a| self.value(a)).collect();
                self.terminate(LowTerm::Br {
                    target: self.block_map[target.index()],
                    args,
                });
            }
            Terminator::CondJump {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.value(*cond);
                self.terminate(LowTerm::CondBr {
                    cond,
                    then_block: self.block_map[then_block.index()],
                    else_block: self.block_map[else_block.index()],
                });
            }
            Terminator::Switch {
                scrutinee,
                cases,
                default,
            } => {
                let scrutinee = self.value(*scrutinee);
                let cases = cases
                    .iter()
                    .map(|&(v, b)| (v, self.block_map[b.index()]))
                    .collect();
                self.terminate(LowTerm::Switch {
                    scrutinee,
                    cases,
                    default: self.block_map[default.index()],
                });
            }
            Terminator::Throw { value } => {
                let value = self.value(*value);
                self.call(None, Callee::Runtime(RuntimeFn::Throw), &[value]);
                self.terminate(LowTerm::Unreachable);
            }
            Terminator::AwaitSuspend { next_state, .. } => {
                self.suspend(*next_state);
                self.terminate(LowTerm::Ret { value: None });
            }
            Terminator::YieldSuspend { value, next_state } => {
                let value = self.value(*value);
                self.suspend(*next_state);
                self.terminate(LowTerm::Ret { value: Some(value) });
            }
            Terminator::Trap { class } => {
                let descriptor = self.descriptor_addr(*class);
                let exception = self.temp(LowType::Ptr);
                self.call(
                    Some(exception),
                    Callee::Runtime(RuntimeFn::GcAlloc),
                    &[descriptor],
                );
                self.call(None, Callee::Runtime(RuntimeFn::Throw), &[exception]);
                self.terminate(LowTerm::Unreachable);
            }
            Terminator::Unreachable => self.terminate(LowTerm::Unreachable),
        }
    }

    /// Materialize live locals into the state object and store the next
    /// state index.
    fn suspend(&mut self, next_state: u32) {
        let Some(info) = self.func.coroutine.clone() else {
            return;
        };
        let Some(layout) = self.pool.layout_of(info.class) else {
            return;
        };
        let offsets: Vec<u32> = layout.fields.iter().map(|f| f.offset).collect();

        let self_value = self.temp(LowType::Ptr);
        self.push(LowInst::SlotLoad {
            dst: self_value,
            slot: 0,
        });
        for k in 1..self.slots.len() {
            let field_index = info.first_local_slot as usize + k - 1;
            let Some(&offset) = offsets.get(field_index) else {
                continue;
            };
            let ty = self.slots[k];
            let value = self.temp(ty);
            #[allow(
                clippy::cast_possible_truncation,
                reason = "local counts are bounded by u32 ids"
            )]
            self.push(LowInst::SlotLoad {
                dst: value,
                slot: k as u32,
            });
            self.push(LowInst::Store {
                ty,
                base: self_value,
                offset,
                src: value,
            });
        }

        let state_offset = offsets.get(info.state_slot as usize).copied().unwrap_or(0);
        let state = self.iconst(LowType::I32, i64::from(next_state));
        self.push(LowInst::Store {
            ty: LowType::I32,
            base: self_value,
            offset: state_offset,
            src: state,
        });
    }
}

/// Integer comparison predicate.
fn int_predicate(cmp: Cmp) -> CmpOp {
    match cmp {
        Cmp::Eq => CmpOp::Eq,
        Cmp::Ne => CmpOp::Ne,
        Cmp::Lt => CmpOp::SLt,
        Cmp::Le => CmpOp::SLe,
        Cmp::Gt => CmpOp::SGt,
        Cmp::Ge => CmpOp::SGe,
    }
}

/// Float comparison predicate.
fn float_predicate(cmp: Cmp) -> CmpOp {
    match cmp {
        Cmp::Eq => CmpOp::FEq,
        Cmp::Ne => CmpOp::FNe,
        Cmp::Lt => CmpOp::FLt,
        Cmp::Le => CmpOp::FLe,
        Cmp::Gt => CmpOp::FGt,
        Cmp::Ge => CmpOp::FGe,
    }
}
