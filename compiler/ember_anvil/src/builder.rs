//! Sequential construction of Anvil functions.
//!
//! The builder hands out fresh registers, blocks, and locals, and seals
//! each block with exactly one terminator. Misuse (double termination,
//! finishing with an open block) is a middle-end bug and panics.

use ember_ir::{ClassId, FunctionId, LocalId, Name};
use ember_types::Idx;

use crate::{
    AnvilFunction, Block, BlockId, FnAttrs, Op, Reg, Terminator, TryRegion, TryRegionId,
};

struct PendingBlock {
    params: Vec<Reg>,
    ops: Vec<Op>,
    terminator: Option<Terminator>,
}

/// Builds one [`AnvilFunction`].
pub struct FunctionBuilder {
    id: FunctionId,
    name: Name,
    owner: Option<ClassId>,
    params: Vec<Idx>,
    ret: Idx,
    attrs: FnAttrs,
    locals: Vec<Idx>,
    reg_types: Vec<Idx>,
    blocks: Vec<PendingBlock>,
    try_regions: Vec<TryRegion>,
}

impl FunctionBuilder {
    /// Start a function. Parameters become the leading local slots; the
    /// entry block (`bb0`) is created immediately.
    pub fn new(
        id: FunctionId,
        name: Name,
        owner: Option<ClassId>,
        params: &[Idx],
        ret: Idx,
        attrs: FnAttrs,
    ) -> Self {
        let mut builder = Self {
            id,
            name,
            owner,
            params: params.to_vec(),
            ret,
            attrs,
            locals: params.to_vec(),
            reg_types: Vec::new(),
            blocks: Vec::new(),
            try_regions: Vec::new(),
        };
        let entry = builder.new_block();
        debug_assert_eq!(entry, BlockId::new(0));
        builder
    }

    /// Allocate a fresh (empty, unterminated) block.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "block count is bounded by u32 ids"
    )]
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            params: Vec::new(),
            ops: Vec::new(),
            terminator: None,
        });
        id
    }

    /// Allocate a fresh register of type `ty`.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "register count is bounded by u32 ids"
    )]
    pub fn reg(&mut self, ty: Idx) -> Reg {
        let reg = Reg::new(self.reg_types.len() as u32);
        self.reg_types.push(ty);
        reg
    }

    /// Add a parameter register to `block` (phi position).
    pub fn block_param(&mut self, block: BlockId, ty: Idx) -> Reg {
        let reg = self.reg(ty);
        self.blocks[block.index()].params.push(reg);
        reg
    }

    /// Allocate an extra local slot (spill temps, loop iterators).
    #[allow(
        clippy::cast_possible_truncation,
        reason = "local count is bounded by u32 ids"
    )]
    pub fn add_local(&mut self, ty: Idx) -> LocalId {
        let id = LocalId::new(self.locals.len() as u32);
        self.locals.push(ty);
        id
    }

    /// Append an opcode to an open block.
    ///
    /// # Panics
    /// Panics if the block is already terminated.
    pub fn push(&mut self, block: BlockId, op: Op) {
        let pending = &mut self.blocks[block.index()];
        assert!(
            pending.terminator.is_none(),
            "opcode pushed to terminated block {block}"
        );
        pending.ops.push(op);
    }

    /// Seal a block with its terminator.
    ///
    /// # Panics
    /// Panics if the block is already terminated.
    pub fn terminate(&mut self, block: BlockId, terminator: Terminator) {
        let pending = &mut self.blocks[block.index()];
        assert!(
            pending.terminator.is_none(),
            "block {block} terminated twice"
        );
        pending.terminator = Some(terminator);
    }

    /// True once `block` has its terminator.
    pub fn is_terminated(&self, block: BlockId) -> bool {
        self.blocks[block.index()].terminator.is_some()
    }

    /// Number of blocks allocated so far.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The most recently allocated block.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "block count is bounded by u32 ids"
    )]
    pub fn last_block(&self) -> BlockId {
        debug_assert!(!self.blocks.is_empty());
        BlockId::new(self.blocks.len() as u32 - 1)
    }

    /// Record a try-region over the inclusive block span `[first, last]`.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "region count is bounded by u32 ids"
    )]
    pub fn add_try_region(
        &mut self,
        parent: Option<TryRegionId>,
        first: BlockId,
        last: BlockId,
        catches: Vec<(ClassId, BlockId)>,
    ) -> TryRegionId {
        let id = TryRegionId::new(self.try_regions.len() as u32);
        self.try_regions.push(TryRegion {
            parent,
            first,
            last,
            catches,
        });
        id
    }

    /// Open a try-region whose span and handlers are not yet known.
    ///
    /// The id is handed out up front so nested regions can name their
    /// parent; [`seal_try_region`](Self::seal_try_region) fills in the
    /// rest once the protected body is lowered.
    pub fn reserve_try_region(
        &mut self,
        parent: Option<TryRegionId>,
        first: BlockId,
    ) -> TryRegionId {
        self.add_try_region(parent, first, first, Vec::new())
    }

    /// Complete a reserved try-region.
    pub fn seal_try_region(
        &mut self,
        id: TryRegionId,
        last: BlockId,
        catches: Vec<(ClassId, BlockId)>,
    ) {
        let region = &mut self.try_regions[id.index()];
        region.last = last;
        region.catches = catches;
    }

    /// Type of an already-allocated register.
    #[inline]
    pub fn reg_type(&self, reg: Reg) -> Idx {
        self.reg_types[reg.index()]
    }

    /// Type of a local slot.
    #[inline]
    pub fn local_type(&self, local: LocalId) -> Idx {
        self.locals[local.index()]
    }

    /// Seal the function.
    ///
    /// # Panics
    /// Panics if any block is missing its terminator.
    pub fn finish(self) -> AnvilFunction {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, pending)| {
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "block count is bounded by u32 ids"
                )]
                let id = BlockId::new(i as u32);
                let terminator = pending
                    .terminator
                    .unwrap_or_else(|| panic!("block bb{i} left unterminated"));
                Block {
                    id,
                    params: pending.params,
                    ops: pending.ops,
                    terminator,
                }
            })
            .collect();

        AnvilFunction {
            id: self.id,
            name: self.name,
            owner: self.owner,
            params: self.params,
            ret: self.ret,
            attrs: self.attrs,
            locals: self.locals,
            reg_types: self.reg_types,
            blocks,
            try_regions: self.try_regions,
            coroutine: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> FunctionBuilder {
        FunctionBuilder::new(
            FunctionId::new(0),
            Name::EMPTY,
            None,
            &[Idx::I64],
            Idx::I64,
            FnAttrs::empty(),
        )
    }

    #[test]
    fn entry_block_is_zero() {
        let mut fb = builder();
        assert_eq!(fb.new_block(), BlockId::new(1));
    }

    #[test]
    fn registers_are_sequential_and_typed() {
        let mut fb = builder();
        let a = fb.reg(Idx::I64);
        let b = fb.reg(Idx::I1);
        assert_eq!(a, Reg::new(0));
        assert_eq!(b, Reg::new(1));
        assert_eq!(fb.reg_type(a), Idx::I64);
        assert_eq!(fb.reg_type(b), Idx::I1);
    }

    #[test]
    fn build_identity_function() {
        let mut fb = builder();
        let entry = BlockId::new(0);
        let value = fb.reg(Idx::I64);
        fb.push(
            entry,
            Op::LoadLocal {
                dst: value,
                local: LocalId::new(0),
            },
        );
        fb.terminate(entry, Terminator::Ret { value: Some(value) });
        let func = fb.finish();
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.locals, vec![Idx::I64]);
        assert_eq!(func.reg_type(value), Idx::I64);
    }

    #[test]
    #[should_panic(expected = "terminated twice")]
    fn double_termination_panics() {
        let mut fb = builder();
        let entry = BlockId::new(0);
        fb.terminate(entry, Terminator::Ret { value: None });
        fb.terminate(entry, Terminator::Ret { value: None });
    }

    #[test]
    #[should_panic(expected = "left unterminated")]
    fn finish_with_open_block_panics() {
        let mut fb = builder();
        let entry = BlockId::new(0);
        fb.terminate(entry, Terminator::Ret { value: None });
        let _open = fb.new_block();
        let _ = fb.finish();
    }
}
