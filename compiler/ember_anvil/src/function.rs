//! Anvil functions: typed registers, locals, basic blocks, try-regions.

use bitflags::bitflags;
use ember_ir::{ClassId, FunctionId, LocalId, Name};
use ember_types::Idx;

use crate::{BlockId, Op, Reg, Terminator};

bitflags! {
    /// Function attributes.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct FnAttrs: u8 {
        /// Body is a generator state-machine method.
        const GENERATOR = 1 << 0;
        /// Body is an async state-machine method.
        const ASYNC = 1 << 1;
        /// Synthesized by the middle end (thunks, `to_json`, closures).
        const SYNTHETIC = 1 << 2;
        /// FFI thunk of a NativeLibrary method.
        const NATIVE_THUNK = 1 << 3;
    }
}

/// A basic block: parameters, opcodes, one terminator.
///
/// Parameters play the role of phi nodes; predecessors bind them through
/// `jump` arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    /// Parameter registers with their types recorded in the function's
    /// register table.
    pub params: Vec<Reg>,
    pub ops: Vec<Op>,
    pub terminator: Terminator,
}

/// Identifier of a try-region within one function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TryRegionId(u32);

impl TryRegionId {
    /// Create from a raw index.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Index as `usize`.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A protected span of blocks with its ordered handler list.
///
/// Regions nest properly: a child region's span lies entirely inside its
/// parent's, and handlers are searched innermost-out at unwind time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TryRegion {
    /// Enclosing region, if any.
    pub parent: Option<TryRegionId>,
    /// First protected block (inclusive).
    pub first: BlockId,
    /// Last protected block (inclusive).
    pub last: BlockId,
    /// Ordered (catch class, handler block) pairs; the first matching
    /// class wins.
    pub catches: Vec<(ClassId, BlockId)>,
}

impl TryRegion {
    /// True when `block` lies in the protected span.
    #[inline]
    pub fn covers(&self, block: BlockId) -> bool {
        self.first <= block && block <= self.last
    }
}

/// State-machine metadata of a coroutine resume body.
///
/// The class mirrors the function's locals as fields so suspension can
/// materialize them: slot `state_slot` holds the `i32` state index and
/// slots `first_local_slot..` hold the locals in slot order. Codegen
/// builds the entry dispatch table from `resume_points`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoroutineInfo {
    /// The synthesized state-machine class.
    pub class: ClassId,
    /// Field slot of the `i32` state index.
    pub state_slot: u32,
    /// First field slot mirroring the function's locals.
    pub first_local_slot: u32,
    /// `resume_points[k]` is the block control re-enters at state `k + 1`
    /// (state 0 is the function entry; the done state is `-1`).
    pub resume_points: Vec<BlockId>,
}

/// A complete Anvil function.
#[derive(Clone, Debug)]
pub struct AnvilFunction {
    /// Shared id namespace with the typed AST's function list; synthetic
    /// bodies get fresh ids past it.
    pub id: FunctionId,
    pub name: Name,
    /// Owning class for methods.
    pub owner: Option<ClassId>,
    /// Parameter types; parameters occupy locals `0..params.len()`.
    pub params: Vec<Idx>,
    pub ret: Idx,
    pub attrs: FnAttrs,
    /// Ordered typed local slots (parameters first).
    pub locals: Vec<Idx>,
    /// Register types, indexed by `Reg`.
    pub reg_types: Vec<Idx>,
    /// Blocks in allocation order; `blocks[0]` is the entry.
    pub blocks: Vec<Block>,
    /// Try-regions, outermost first within each nest.
    pub try_regions: Vec<TryRegion>,
    /// Present on generator/async resume bodies.
    pub coroutine: Option<CoroutineInfo>,
}

impl AnvilFunction {
    /// The entry block id.
    #[inline]
    pub fn entry(&self) -> BlockId {
        BlockId::new(0)
    }

    /// Type of a register.
    ///
    /// # Panics
    /// Debug-panics when `reg` is out of bounds.
    #[inline]
    pub fn reg_type(&self, reg: Reg) -> Idx {
        debug_assert!(
            reg.index() < self.reg_types.len(),
            "register {reg} out of bounds ({} registers)",
            self.reg_types.len()
        );
        self.reg_types[reg.index()]
    }

    /// Type of a local slot.
    #[inline]
    pub fn local_type(&self, local: LocalId) -> Idx {
        self.locals[local.index()]
    }

    /// Look up a block.
    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// True for generator or async bodies.
    #[inline]
    pub fn is_coroutine(&self) -> bool {
        self.attrs
            .intersects(FnAttrs::GENERATOR | FnAttrs::ASYNC)
    }

    /// Innermost try-region covering `block`, if any.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "region count is bounded by u32 ids"
    )]
    pub fn innermost_region(&self, block: BlockId) -> Option<TryRegionId> {
        let mut best: Option<(TryRegionId, u32)> = None;
        for (i, region) in self.try_regions.iter().enumerate() {
            if !region.covers(block) {
                continue;
            }
            let depth = self.region_depth(TryRegionId::new(i as u32));
            if best.map_or(true, |(_, d)| depth > d) {
                best = Some((TryRegionId::new(i as u32), depth));
            }
        }
        best.map(|(id, _)| id)
    }

    fn region_depth(&self, id: TryRegionId) -> u32 {
        let mut depth = 0;
        let mut current = self.try_regions[id.index()].parent;
        while let Some(p) = current {
            depth += 1;
            current = self.try_regions[p.index()].parent;
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_region_coverage() {
        let region = TryRegion {
            parent: None,
            first: BlockId::new(1),
            last: BlockId::new(3),
            catches: vec![(ClassId::new(0), BlockId::new(4))],
        };
        assert!(!region.covers(BlockId::new(0)));
        assert!(region.covers(BlockId::new(1)));
        assert!(region.covers(BlockId::new(3)));
        assert!(!region.covers(BlockId::new(4)));
    }

    #[test]
    fn attrs_classify_coroutines() {
        let mut func = AnvilFunction {
            id: FunctionId::new(0),
            name: Name::EMPTY,
            owner: None,
            params: Vec::new(),
            ret: Idx::NIL,
            attrs: FnAttrs::empty(),
            locals: Vec::new(),
            reg_types: Vec::new(),
            blocks: Vec::new(),
            try_regions: Vec::new(),
            coroutine: None,
        };
        assert!(!func.is_coroutine());
        func.attrs = FnAttrs::GENERATOR | FnAttrs::SYNTHETIC;
        assert!(func.is_coroutine());
    }
}
