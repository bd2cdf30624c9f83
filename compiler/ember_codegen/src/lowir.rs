//! The low-level SSA IR handed to the external native backend.
//!
//! Machine-level types only: the object model is gone, replaced by
//! offsetted loads/stores, indirect calls, runtime-call placeholders, and
//! GC safe-point marks. The backend receives a [`LowModule`] in memory;
//! there is no on-disk format.

use ember_ir::{ClassId, FunctionId, Name};
use smallvec::SmallVec;

use crate::runtime::RuntimeFn;

/// Machine-level value types.
///
/// `Ptr` is the opaque GC-scanned object pointer; raw `intptr` values
/// lower to `I64` and are invisible to the collector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LowType {
    I1,
    I8,
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

impl LowType {
    /// Byte size on the supported 64-bit targets.
    pub fn size(self) -> u32 {
        match self {
            LowType::I1 | LowType::I8 => 1,
            LowType::I32 | LowType::F32 => 4,
            LowType::I64 | LowType::F64 | LowType::Ptr => 8,
        }
    }
}

/// An SSA value within one LowIR function.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Value(u32);

impl Value {
    /// Create from a raw index.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Index as `usize`.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A LowIR basic block id.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct LowBlockId(u32);

impl LowBlockId {
    /// Create from a raw index.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw index.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Index as `usize`.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Id of a module-level constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ConstId(u32);

impl ConstId {
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

/// Integer/float binary operations (two operands of one type).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Signed division; the zero check happened before this.
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// Comparison predicates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    SLt,
    SLe,
    SGt,
    SGe,
    FEq,
    FNe,
    FLt,
    FLe,
    FGt,
    FGe,
}

/// Value conversions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Convert {
    /// Sign-extend integer.
    Sext,
    /// Signed integer to float.
    SiToFp,
    /// Float to signed integer, truncating.
    FpToSi,
    /// `f32` → `f64`.
    FpExt,
    /// Bit-identity pointer reinterpretation.
    PtrCast,
}

/// Call targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callee {
    /// Another function in this module.
    Direct(FunctionId),
    /// A runtime entry point.
    Runtime(RuntimeFn),
    /// A computed function pointer (v-table entry, FFI binding).
    Indirect(Value),
}

/// Why a safe point exists at this position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SafePointKind {
    Prologue,
    LoopBackEdge,
    CallSite,
}

/// One LowIR instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LowInst {
    /// Integer constant.
    IConst { dst: Value, ty: LowType, value: i64 },
    /// Float constant (bit pattern, width from `ty`).
    FConst { dst: Value, ty: LowType, bits: u64 },
    /// Null object pointer.
    NullPtr { dst: Value },
    /// Address of a module constant (string, class descriptor, v-table).
    ConstAddr { dst: Value, constant: ConstId },
    /// Two-operand arithmetic.
    BinOp {
        dst: Value,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    },
    /// Comparison producing `i1`.
    Cmp {
        dst: Value,
        op: CmpOp,
        lhs: Value,
        rhs: Value,
    },
    /// Value conversion.
    Convert {
        dst: Value,
        kind: Convert,
        src: Value,
    },
    /// Read a stack slot.
    SlotLoad { dst: Value, slot: u32 },
    /// Write a stack slot.
    SlotStore { slot: u32, src: Value },
    /// `dst = *(base + offset)` with the given width.
    Load {
        dst: Value,
        ty: LowType,
        base: Value,
        offset: u32,
    },
    /// `*(base + offset) = src`.
    Store {
        ty: LowType,
        base: Value,
        offset: u32,
        src: Value,
    },
    /// Call; `dst` is absent for void calls.
    Call {
        dst: Option<Value>,
        callee: Callee,
        args: SmallVec<[Value; 4]>,
    },
    /// Address of another function in this module (method handle
    /// constants, thread entry closures).
    FuncAddr { dst: Value, function: FunctionId },
    /// The per-call-site monomorphic inline cache slot for an
    /// interface-like call (runtime-populated, monotonic).
    InlineCacheAddr { dst: Value, site: u32 },
    /// The thrown object at the head of a landing-pad dispatcher.
    LandingPad { dst: Value },
    /// GC may run here; the backend emits a stack map.
    SafePoint { kind: SafePointKind },
}

/// Block terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LowTerm {
    Ret { value: Option<Value> },
    Br {
        target: LowBlockId,
        args: SmallVec<[Value; 2]>,
    },
    CondBr {
        cond: Value,
        then_block: LowBlockId,
        else_block: LowBlockId,
    },
    Switch {
        scrutinee: Value,
        cases: Vec<(i64, LowBlockId)>,
        default: LowBlockId,
    },
    Unreachable,
}

/// A LowIR basic block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LowBlock {
    pub id: LowBlockId,
    /// Phi-position parameters bound by `Br` arguments.
    pub params: Vec<Value>,
    pub insts: Vec<LowInst>,
    pub term: LowTerm,
}

/// One lowered function.
#[derive(Clone, Debug)]
pub struct LowFunction {
    pub id: FunctionId,
    pub name: Name,
    /// Stable link name (used by the backend and the module initializer).
    pub symbol: String,
    pub params: Vec<LowType>,
    /// `None` encodes a void return.
    pub ret: Option<LowType>,
    /// Mutable stack slots (Anvil locals).
    pub slots: Vec<LowType>,
    /// SSA value types, indexed by `Value`.
    pub values: Vec<LowType>,
    pub blocks: Vec<LowBlock>,
    /// Landing-pad dispatcher per Anvil try-region, in region order.
    pub landing_pads: Vec<LandingPad>,
}

/// Landing-pad metadata for one try-region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LandingPad {
    /// The protected LowIR blocks (Anvil span plus any continuation
    /// blocks produced by inline checks).
    pub blocks: Vec<LowBlockId>,
    /// The dispatcher block holding the `LandingPad` instruction and the
    /// in-order class comparisons.
    pub dispatcher: LowBlockId,
}

/// A module-level constant with a stable address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constant {
    /// An interned string object, materialized at module load.
    Str(String),
    /// A class descriptor: identity, GC layout, v-table reference.
    ClassDescriptor {
        class: ClassId,
        name: String,
        parent: Option<ClassId>,
        /// Instance size in bytes (header included for object classes).
        size: u32,
        /// Byte offsets of GC-scanned reference slots.
        reference_offsets: Vec<u32>,
        vtable: ConstId,
    },
    /// A v-table: function ids in slot order.
    VTable { class: ClassId, slots: Vec<FunctionId> },
    /// A writable pointer slot the module initializer fills with the
    /// resolved foreign symbol of one `@native` method.
    FfiBindingSlot { function: FunctionId },
}

/// One NativeLibrary binding the module initializer resolves at load.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeLibrary {
    pub class: ClassId,
    /// Per-platform search paths, in listed order.
    pub paths: Vec<String>,
    /// (function, foreign symbol) pairs bound into the library's slots.
    pub symbols: Vec<(FunctionId, String)>,
}

/// The complete lowered module, handed to the backend in memory.
#[derive(Clone, Debug, Default)]
pub struct LowModule {
    pub functions: Vec<LowFunction>,
    pub constants: Vec<Constant>,
    pub native_libraries: Vec<NativeLibrary>,
    /// The executable entry function, when one exists.
    pub entry: Option<FunctionId>,
}

impl LowModule {
    /// Append a constant, returning its id.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "constant counts are bounded by u32 ids"
    )]
    pub fn add_constant(&mut self, constant: Constant) -> ConstId {
        let id = ConstId::new(self.constants.len() as u32);
        self.constants.push(constant);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_type_sizes() {
        assert_eq!(LowType::I1.size(), 1);
        assert_eq!(LowType::I32.size(), 4);
        assert_eq!(LowType::Ptr.size(), 8);
    }

    #[test]
    fn constants_get_sequential_ids() {
        let mut module = LowModule::default();
        let a = module.add_constant(Constant::Str("x".into()));
        let b = module.add_constant(Constant::Str("y".into()));
        assert_eq!(a, ConstId::new(0));
        assert_eq!(b, ConstId::new(1));
    }
}
