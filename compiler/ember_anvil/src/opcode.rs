//! The Anvil instruction set.
//!
//! Anvil is object-aware: dispatch, field access, generic erasure, boxing,
//! and suspension are first-class opcodes rather than runtime-call
//! patterns, so the verifier can check them and the LowIR lowering can
//! translate them mechanically.
//!
//! Opcodes read and write typed virtual registers ([`Reg`]); locals are a
//! separate mutable namespace accessed only through `load_local` /
//! `store_local`. Every block ends in exactly one [`Terminator`].

use ember_ir::{ClassId, FunctionId, LocalId, Name};
use ember_types::Idx;
use smallvec::SmallVec;

use crate::{BlockId, Reg, StrId};

/// Operand list for calls and constructors.
pub type Args = SmallVec<[Reg; 4]>;

/// Comparison predicate for `icmp` / `fcmp`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    /// Dump mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Cmp::Eq => "eq",
            Cmp::Ne => "ne",
            Cmp::Lt => "lt",
            Cmp::Le => "le",
            Cmp::Gt => "gt",
            Cmp::Ge => "ge",
        }
    }
}

/// A single Anvil opcode.
///
/// Integer arithmetic wraps on overflow; `idiv`/`imod` trap into a
/// throwable `DivisionByZeroError`. All conversions and boxing are
/// explicit — Anvil never performs implicit coercion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    // ── Locals & constants ──────────────────────────────────────
    /// `dst = local`
    LoadLocal { dst: Reg, local: LocalId },
    /// `local = src`
    StoreLocal { local: LocalId, src: Reg },
    /// Integer constant; the width comes from `dst`'s register type.
    ConstInt { dst: Reg, value: i64 },
    /// `f32` constant (bit pattern).
    ConstFloat { dst: Reg, bits: u32 },
    /// `f64` constant (bit pattern).
    ConstDouble { dst: Reg, bits: u64 },
    /// Interned string constant.
    ConstString { dst: Reg, value: StrId },
    /// The `nil` reference.
    ConstNil { dst: Reg },
    /// Class handle constant.
    ConstClass { dst: Reg, class: ClassId },
    /// Method handle constant.
    ConstMethod { dst: Reg, function: FunctionId },

    // ── Integer arithmetic (wrapping) ───────────────────────────
    IAdd { dst: Reg, lhs: Reg, rhs: Reg },
    ISub { dst: Reg, lhs: Reg, rhs: Reg },
    IMul { dst: Reg, lhs: Reg, rhs: Reg },
    /// Traps on zero divisor.
    IDiv { dst: Reg, lhs: Reg, rhs: Reg },
    /// Traps on zero divisor.
    IMod { dst: Reg, lhs: Reg, rhs: Reg },
    INeg { dst: Reg, src: Reg },
    BitAnd { dst: Reg, lhs: Reg, rhs: Reg },
    BitOr { dst: Reg, lhs: Reg, rhs: Reg },
    BitXor { dst: Reg, lhs: Reg, rhs: Reg },
    Shl { dst: Reg, lhs: Reg, rhs: Reg },
    Shr { dst: Reg, lhs: Reg, rhs: Reg },
    /// Integer compare; `dst` is `i1`.
    ICmp { dst: Reg, cmp: Cmp, lhs: Reg, rhs: Reg },

    // ── Float arithmetic ────────────────────────────────────────
    FAdd { dst: Reg, lhs: Reg, rhs: Reg },
    FSub { dst: Reg, lhs: Reg, rhs: Reg },
    FMul { dst: Reg, lhs: Reg, rhs: Reg },
    FDiv { dst: Reg, lhs: Reg, rhs: Reg },
    FMod { dst: Reg, lhs: Reg, rhs: Reg },
    FNeg { dst: Reg, src: Reg },
    /// Float compare; `dst` is `i1`.
    FCmp { dst: Reg, cmp: Cmp, lhs: Reg, rhs: Reg },

    /// Boolean negation (`i1`).
    Not { dst: Reg, src: Reg },

    // ── Conversions (always explicit) ───────────────────────────
    /// Integer to float; target width from `dst`.
    IntToFloat { dst: Reg, src: Reg },
    /// Float to integer, truncating.
    FloatToInt { dst: Reg, src: Reg },
    /// Sign-extending integer widen (`i8`→`i32`, `i32`→`i64`, …).
    SignExtend { dst: Reg, src: Reg },
    /// `f32` → `f64`.
    FloatPromote { dst: Reg, src: Reg },
    /// Box a primitive into the runtime wrapper object.
    Box { dst: Reg, src: Reg },
    /// Unbox `class` back into a primitive.
    Unbox { dst: Reg, src: Reg, class: ClassId },

    // ── Object model ────────────────────────────────────────────
    /// Allocate an instance and run its `initialize` method with `args`.
    New { dst: Reg, class: ClassId, args: Args },
    /// Read field `slot` of `class`.
    GetField { dst: Reg, object: Reg, class: ClassId, slot: u32 },
    /// Write field `slot` of `class` (write barrier for references).
    SetField { object: Reg, class: ClassId, slot: u32, value: Reg },
    /// Read an erased generic slot; `static_ty` is the reinterpretation
    /// recorded at this site.
    LoadErased { dst: Reg, object: Reg, class: ClassId, slot: u32, static_ty: Idx },
    /// Write an erased generic slot.
    StoreErased { object: Reg, class: ClassId, slot: u32, value: Reg },
    /// Direct call.
    CallStatic { dst: Reg, function: FunctionId, args: Args },
    /// Indexed v-table call; `class` is the receiver's static class.
    CallVirtual { dst: Reg, receiver: Reg, class: ClassId, slot: u32, args: Args },
    /// Dynamic (name, arity) lookup with a per-site inline cache.
    CallInterface { dst: Reg, receiver: Reg, name: Name, args: Args },
    /// Call through a NativeLibrary binding slot.
    CallNative { dst: Reg, function: FunctionId, args: Args },
    /// Runtime class test (used by `case Dog as d:` arms).
    InstanceOf { dst: Reg, object: Reg, class: ClassId },
    /// Reinterpret a reference as `class` after a successful class test.
    RefCast { dst: Reg, src: Reg, class: ClassId },
    /// Trap with `NullReferenceError` when `object` is nil.
    NullCheck { object: Reg },
    /// Allocate a mutable capture cell holding `value`.
    CellNew { dst: Reg, value: Reg },
    /// Read a capture cell; `dst`'s register type is the static type.
    CellGet { dst: Reg, cell: Reg },
    /// Write a capture cell.
    CellSet { cell: Reg, value: Reg },

    // ── Arrays, hashes, ranges, tuples ──────────────────────────
    /// Allocate an array of `len` elements of `elem`.
    ArrayNew { dst: Reg, elem: Idx, len: Reg },
    ArrayLen { dst: Reg, array: Reg },
    /// Bounds-checked read; traps with `IndexOutOfBoundsError`.
    ArrayGet { dst: Reg, array: Reg, index: Reg },
    /// Bounds-checked write.
    ArraySet { array: Reg, index: Reg, value: Reg },
    HashNew { dst: Reg, key: Idx, value: Idx },
    HashLen { dst: Reg, hash: Reg },
    HashGet { dst: Reg, hash: Reg, key: Reg },
    HashSet { hash: Reg, key: Reg, value: Reg },
    RangeNew { dst: Reg, start: Reg, end: Reg },
    RangeStart { dst: Reg, range: Reg },
    RangeEnd { dst: Reg, range: Reg },
    TupleNew { dst: Reg, elems: Args },
    TupleGet { dst: Reg, tuple: Reg, index: u32 },

    // ── Strings ─────────────────────────────────────────────────
    /// Concatenate two strings (left-to-right order preserved by the
    /// emission order).
    StringConcat { dst: Reg, lhs: Reg, rhs: Reg },
    /// Fast-path string conversion of a primitive.
    StringFromPrim { dst: Reg, src: Reg },

    // ── JSON (serialization synthesis) ──────────────────────────
    /// Parse a JSON document; traps with `SerializationError` on
    /// malformed input.
    JsonParse { dst: Reg, src: Reg },
    /// Extract a field from a parsed document by key; traps with
    /// `SerializationError` when the key is missing or the value does
    /// not match `dst`'s register type.
    JsonField { dst: Reg, json: Reg, key: StrId },

    // ── Exceptions ──────────────────────────────────────────────
    /// First opcode of a handler block: the in-flight exception object.
    CaughtException { dst: Reg },

    // ── Futures ─────────────────────────────────────────────────
    /// Wrap a state machine in a fresh future (async function entry).
    FutureNew { dst: Reg, state_machine: Reg },
    FutureComplete { future: Reg, value: Reg },
    FutureFail { future: Reg, error: Reg },
    /// Block on completion; rethrows if the future failed.
    FutureValue { dst: Reg, future: Reg },
    /// Register a continuation to run on completion.
    FutureRegister { future: Reg, continuation: Reg },

    // ── Channels & threads ──────────────────────────────────────
    ChannelNew { dst: Reg, capacity: Reg },
    ChannelSend { channel: Reg, value: Reg },
    ChannelReceive { dst: Reg, channel: Reg },
    /// Run a zero-argument closure on a new OS thread.
    ThreadSpawn { closure: Reg },
}

impl Op {
    /// The register defined (written) by this opcode, if any.
    pub fn defined_reg(&self) -> Option<Reg> {
        match *self {
            Op::LoadLocal { dst, .. }
            | Op::ConstInt { dst, .. }
            | Op::ConstFloat { dst, .. }
            | Op::ConstDouble { dst, .. }
            | Op::ConstString { dst, .. }
            | Op::ConstNil { dst }
            | Op::ConstClass { dst, .. }
            | Op::ConstMethod { dst, .. }
            | Op::IAdd { dst, .. }
            | Op::ISub { dst, .. }
            | Op::IMul { dst, .. }
            | Op::IDiv { dst, .. }
            | Op::IMod { dst, .. }
            | Op::INeg { dst, .. }
            | Op::BitAnd { dst, .. }
            | Op::BitOr { dst, .. }
            | Op::BitXor { dst, .. }
            | Op::Shl { dst, .. }
            | Op::Shr { dst, .. }
            | Op::ICmp { dst, .. }
            | Op::FAdd { dst, .. }
            | Op::FSub { dst, .. }
            | Op::FMul { dst, .. }
            | Op::FDiv { dst, .. }
            | Op::FMod { dst, .. }
            | Op::FNeg { dst, .. }
            | Op::FCmp { dst, .. }
            | Op::Not { dst, .. }
            | Op::IntToFloat { dst, .. }
            | Op::FloatToInt { dst, .. }
            | Op::SignExtend { dst, .. }
            | Op::FloatPromote { dst, .. }
            | Op::Box { dst, .. }
            | Op::Unbox { dst, .. }
            | Op::New { dst, .. }
            | Op::GetField { dst, .. }
            | Op::LoadErased { dst, .. }
            | Op::CallStatic { dst, .. }
            | Op::CallVirtual { dst, .. }
            | Op::CallInterface { dst, .. }
            | Op::CallNative { dst, .. }
            | Op::InstanceOf { dst, .. }
            | Op::RefCast { dst, .. }
            | Op::CellNew { dst, .. }
            | Op::CellGet { dst, .. }
            | Op::ArrayNew { dst, .. }
            | Op::ArrayLen { dst, .. }
            | Op::ArrayGet { dst, .. }
            | Op::HashNew { dst, .. }
            | Op::HashLen { dst, .. }
            | Op::HashGet { dst, .. }
            | Op::RangeNew { dst, .. }
            | Op::RangeStart { dst, .. }
            | Op::RangeEnd { dst, .. }
            | Op::JsonParse { dst, .. }
            | Op::JsonField { dst, .. }
            | Op::TupleNew { dst, .. }
            | Op::TupleGet { dst, .. }
            | Op::StringConcat { dst, .. }
            | Op::StringFromPrim { dst, .. }
            | Op::CaughtException { dst }
            | Op::FutureNew { dst, .. }
            | Op::FutureValue { dst, .. }
            | Op::ChannelNew { dst, .. }
            | Op::ChannelReceive { dst, .. } => Some(dst),

            Op::StoreLocal { .. }
            | Op::SetField { .. }
            | Op::StoreErased { .. }
            | Op::NullCheck { .. }
            | Op::CellSet { .. }
            | Op::ArraySet { .. }
            | Op::HashSet { .. }
            | Op::FutureComplete { .. }
            | Op::FutureFail { .. }
            | Op::FutureRegister { .. }
            | Op::ChannelSend { .. }
            | Op::ThreadSpawn { .. } => None,
        }
    }

    /// All registers read by this opcode (definitions excluded).
    pub fn used_regs(&self) -> Args {
        let mut used = Args::new();
        match self {
            Op::LoadLocal { .. }
            | Op::ConstInt { .. }
            | Op::ConstFloat { .. }
            | Op::ConstDouble { .. }
            | Op::ConstString { .. }
            | Op::ConstNil { .. }
            | Op::ConstClass { .. }
            | Op::ConstMethod { .. }
            | Op::CaughtException { .. } => {}

            Op::StoreLocal { src, .. } => used.push(*src),

            Op::IAdd { lhs, rhs, .. }
            | Op::ISub { lhs, rhs, .. }
            | Op::IMul { lhs, rhs, .. }
            | Op::IDiv { lhs, rhs, .. }
            | Op::IMod { lhs, rhs, .. }
            | Op::BitAnd { lhs, rhs, .. }
            | Op::BitOr { lhs, rhs, .. }
            | Op::BitXor { lhs, rhs, .. }
            | Op::Shl { lhs, rhs, .. }
            | Op::Shr { lhs, rhs, .. }
            | Op::ICmp { lhs, rhs, .. }
            | Op::FAdd { lhs, rhs, .. }
            | Op::FSub { lhs, rhs, .. }
            | Op::FMul { lhs, rhs, .. }
            | Op::FDiv { lhs, rhs, .. }
            | Op::FMod { lhs, rhs, .. }
            | Op::FCmp { lhs, rhs, .. }
            | Op::StringConcat { lhs, rhs, .. } => {
                used.push(*lhs);
                used.push(*rhs);
            }

            Op::INeg { src, .. }
            | Op::FNeg { src, .. }
            | Op::Not { src, .. }
            | Op::IntToFloat { src, .. }
            | Op::FloatToInt { src, .. }
            | Op::SignExtend { src, .. }
            | Op::FloatPromote { src, .. }
            | Op::Box { src, .. }
            | Op::Unbox { src, .. }
            | Op::RefCast { src, .. }
            | Op::StringFromPrim { src, .. }
            | Op::JsonParse { src, .. } => used.push(*src),

            Op::New { args, .. } | Op::CallStatic { args, .. } | Op::CallNative { args, .. } => {
                used.extend_from_slice(args);
            }

            Op::GetField { object, .. }
            | Op::LoadErased { object, .. }
            | Op::InstanceOf { object, .. }
            | Op::NullCheck { object } => used.push(*object),

            Op::SetField { object, value, .. } | Op::StoreErased { object, value, .. } => {
                used.push(*object);
                used.push(*value);
            }

            Op::CallVirtual { receiver, args, .. } | Op::CallInterface { receiver, args, .. } => {
                used.push(*receiver);
                used.extend_from_slice(args);
            }

            Op::CellNew { value, .. } => used.push(*value),
            Op::CellGet { cell, .. } => used.push(*cell),
            Op::CellSet { cell, value } => {
                used.push(*cell);
                used.push(*value);
            }

            Op::ArrayNew { len, .. } => used.push(*len),
            Op::ArrayLen { array, .. } => used.push(*array),
            Op::ArrayGet { array, index, .. } => {
                used.push(*array);
                used.push(*index);
            }
            Op::ArraySet { array, index, value } => {
                used.push(*array);
                used.push(*index);
                used.push(*value);
            }
            Op::HashNew { .. } => {}
            Op::HashLen { hash, .. } => used.push(*hash),
            Op::HashGet { hash, key, .. } => {
                used.push(*hash);
                used.push(*key);
            }
            Op::HashSet { hash, key, value } => {
                used.push(*hash);
                used.push(*key);
                used.push(*value);
            }
            Op::RangeNew { start, end, .. } => {
                used.push(*start);
                used.push(*end);
            }
            Op::RangeStart { range, .. } | Op::RangeEnd { range, .. } => used.push(*range),
            Op::JsonField { json, .. } => used.push(*json),
            Op::TupleNew { elems, .. } => used.extend_from_slice(elems),
            Op::TupleGet { tuple, .. } => used.push(*tuple),

            Op::FutureNew { state_machine, .. } => used.push(*state_machine),
            Op::FutureComplete { future, value } => {
                used.push(*future);
                used.push(*value);
            }
            Op::FutureFail { future, error } => {
                used.push(*future);
                used.push(*error);
            }
            Op::FutureValue { future, .. } => used.push(*future),
            Op::FutureRegister {
                future,
                continuation,
            } => {
                used.push(*future);
                used.push(*continuation);
            }

            Op::ChannelNew { capacity, .. } => used.push(*capacity),
            Op::ChannelSend { channel, value } => {
                used.push(*channel);
                used.push(*value);
            }
            Op::ChannelReceive { channel, .. } => used.push(*channel),
            Op::ThreadSpawn { closure } => used.push(*closure),
        }
        used
    }

    /// Dump mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::LoadLocal { .. } => "load_local",
            Op::StoreLocal { .. } => "store_local",
            Op::ConstInt { .. } => "const_int",
            Op::ConstFloat { .. } => "const_float",
            Op::ConstDouble { .. } => "const_double",
            Op::ConstString { .. } => "const_string",
            Op::ConstNil { .. } => "const_nil",
            Op::ConstClass { .. } => "const_class",
            Op::ConstMethod { .. } => "const_method",
            Op::IAdd { .. } => "iadd",
            Op::ISub { .. } => "isub",
            Op::IMul { .. } => "imul",
            Op::IDiv { .. } => "idiv",
            Op::IMod { .. } => "imod",
            Op::INeg { .. } => "ineg",
            Op::BitAnd { .. } => "band",
            Op::BitOr { .. } => "bor",
            Op::BitXor { .. } => "bxor",
            Op::Shl { .. } => "shl",
            Op::Shr { .. } => "shr",
            Op::ICmp { .. } => "icmp",
            Op::FAdd { .. } => "fadd",
            Op::FSub { .. } => "fsub",
            Op::FMul { .. } => "fmul",
            Op::FDiv { .. } => "fdiv",
            Op::FMod { .. } => "fmod",
            Op::FNeg { .. } => "fneg",
            Op::FCmp { .. } => "fcmp",
            Op::Not { .. } => "not",
            Op::IntToFloat { .. } => "i_to_f",
            Op::FloatToInt { .. } => "f_to_i",
            Op::SignExtend { .. } => "sext",
            Op::FloatPromote { .. } => "fpromote",
            Op::Box { .. } => "box",
            Op::Unbox { .. } => "unbox",
            Op::New { .. } => "new",
            Op::GetField { .. } => "get_field",
            Op::SetField { .. } => "set_field",
            Op::LoadErased { .. } => "load_erased",
            Op::StoreErased { .. } => "store_erased",
            Op::CallStatic { .. } => "call_static",
            Op::CallVirtual { .. } => "call_virtual",
            Op::CallInterface { .. } => "call_interface_like",
            Op::CallNative { .. } => "call_native",
            Op::InstanceOf { .. } => "instance_of",
            Op::RefCast { .. } => "ref_cast",
            Op::NullCheck { .. } => "null_check",
            Op::CellNew { .. } => "cell_new",
            Op::CellGet { .. } => "cell_get",
            Op::CellSet { .. } => "cell_set",
            Op::ArrayNew { .. } => "array_new",
            Op::ArrayLen { .. } => "array_len",
            Op::ArrayGet { .. } => "array_get",
            Op::ArraySet { .. } => "array_set",
            Op::HashNew { .. } => "hash_new",
            Op::HashLen { .. } => "hash_len",
            Op::HashGet { .. } => "hash_get",
            Op::HashSet { .. } => "hash_set",
            Op::RangeNew { .. } => "range_new",
            Op::RangeStart { .. } => "range_start",
            Op::RangeEnd { .. } => "range_end",
            Op::TupleNew { .. } => "tuple_new",
            Op::TupleGet { .. } => "tuple_get",
            Op::StringConcat { .. } => "string_concat",
            Op::StringFromPrim { .. } => "string_from_prim",
            Op::JsonParse { .. } => "json_parse",
            Op::JsonField { .. } => "json_field",
            Op::CaughtException { .. } => "caught_exception",
            Op::FutureNew { .. } => "future_new",
            Op::FutureComplete { .. } => "future_complete",
            Op::FutureFail { .. } => "future_fail",
            Op::FutureValue { .. } => "future_value",
            Op::FutureRegister { .. } => "future_register",
            Op::ChannelNew { .. } => "channel_new",
            Op::ChannelSend { .. } => "channel_send",
            Op::ChannelReceive { .. } => "channel_receive",
            Op::ThreadSpawn { .. } => "thread_spawn",
        }
    }
}

/// How control leaves a basic block. Every block ends with exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Terminator {
    /// Return from the function; `value` is `None` for nil-typed returns.
    Ret { value: Option<Reg> },
    /// Unconditional jump; `args` bind the target's block parameters.
    Jump { target: BlockId, args: Args },
    /// Two-way branch on an `i1` register.
    CondJump {
        cond: Reg,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Multi-way branch on an integer discriminant.
    Switch {
        scrutinee: Reg,
        cases: Vec<(i64, BlockId)>,
        default: BlockId,
    },
    /// Raise an exception object; unwinds to the innermost matching
    /// try-region handler.
    Throw { value: Reg },
    /// Async suspension: save live state, register with the executor,
    /// return. Resumption re-enters through the state dispatch at entry.
    AwaitSuspend { future: Reg, next_state: u32 },
    /// Generator suspension: save live state, return the yielded value.
    YieldSuspend { value: Reg, next_state: u32 },
    /// Throw a freshly allocated instance of `class` (runtime traps:
    /// `MatchError` on fall-through of a non-exhaustive match).
    Trap { class: ClassId },
    /// Control cannot reach the end of this block.
    Unreachable,
}

impl Terminator {
    /// All registers read by this terminator.
    pub fn used_regs(&self) -> Args {
        let mut used = Args::new();
        match self {
            Terminator::Ret { value } => used.extend(value.iter().copied()),
            Terminator::Jump { args, .. } => used.extend_from_slice(args),
            Terminator::CondJump { cond, .. } => used.push(*cond),
            Terminator::Switch { scrutinee, .. } => used.push(*scrutinee),
            Terminator::Throw { value } => used.push(*value),
            Terminator::AwaitSuspend { future, .. } => used.push(*future),
            Terminator::YieldSuspend { value, .. } => used.push(*value),
            Terminator::Trap { .. } | Terminator::Unreachable => {}
        }
        used
    }

    /// Successor blocks within the function body.
    ///
    /// Suspension terminators have no body successor: their resume block
    /// is reached through the state dispatch at function entry.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { target, .. } => vec![*target],
            Terminator::CondJump {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|&(_, b)| b).collect();
                out.push(*default);
                out
            }
            Terminator::Ret { .. }
            | Terminator::Throw { .. }
            | Terminator::AwaitSuspend { .. }
            | Terminator::YieldSuspend { .. }
            | Terminator::Trap { .. }
            | Terminator::Unreachable => Vec::new(),
        }
    }

    /// Dump mnemonic.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Terminator::Ret { .. } => "ret",
            Terminator::Jump { .. } => "jump",
            Terminator::CondJump { .. } => "cond_jump",
            Terminator::Switch { .. } => "switch",
            Terminator::Throw { .. } => "throw",
            Terminator::AwaitSuspend { .. } => "await_suspend",
            Terminator::YieldSuspend { .. } => "yield_suspend",
            Terminator::Trap { .. } => "trap",
            Terminator::Unreachable => "unreachable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_and_used_regs() {
        let add = Op::IAdd {
            dst: Reg::new(2),
            lhs: Reg::new(0),
            rhs: Reg::new(1),
        };
        assert_eq!(add.defined_reg(), Some(Reg::new(2)));
        assert_eq!(add.used_regs().as_slice(), &[Reg::new(0), Reg::new(1)]);

        let store = Op::StoreLocal {
            local: LocalId::new(0),
            src: Reg::new(5),
        };
        assert_eq!(store.defined_reg(), None);
        assert_eq!(store.used_regs().as_slice(), &[Reg::new(5)]);
    }

    #[test]
    fn call_uses_receiver_then_args() {
        let call = Op::CallVirtual {
            dst: Reg::new(9),
            receiver: Reg::new(1),
            class: ClassId::new(0),
            slot: 0,
            args: Args::from_slice(&[Reg::new(2), Reg::new(3)]),
        };
        assert_eq!(
            call.used_regs().as_slice(),
            &[Reg::new(1), Reg::new(2), Reg::new(3)]
        );
    }

    #[test]
    fn terminator_successors() {
        let switch = Terminator::Switch {
            scrutinee: Reg::new(0),
            cases: vec![(0, BlockId::new(1)), (1, BlockId::new(2))],
            default: BlockId::new(3),
        };
        assert_eq!(
            switch.successors(),
            vec![BlockId::new(1), BlockId::new(2), BlockId::new(3)]
        );
        assert!(Terminator::Unreachable.successors().is_empty());
        assert!(Terminator::AwaitSuspend {
            future: Reg::new(0),
            next_state: 1
        }
        .successors()
        .is_empty());
    }

    #[test]
    fn ret_uses_value_when_present() {
        assert!(Terminator::Ret { value: None }.used_regs().is_empty());
        assert_eq!(
            Terminator::Ret {
                value: Some(Reg::new(4))
            }
            .used_regs()
            .as_slice(),
            &[Reg::new(4)]
        );
    }
}
