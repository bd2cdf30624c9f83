//! The runtime ABI.
//!
//! Every service the lowered code needs from the runtime library is one
//! entry point here, with a stable `ember_rt_` link name and a
//! pointer-sized ABI. Codegen emits [`crate::Callee::Runtime`] calls;
//! the linker binds them against the runtime archive.

/// Runtime entry points referenced by LowIR.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    // ── Memory & GC ─────────────────────────────────────────────
    /// `gc_alloc(class_descriptor_ptr) -> obj`
    GcAlloc,
    /// `gc_write_barrier(obj, field_offset, value)`
    GcWriteBarrier,

    // ── Collections ─────────────────────────────────────────────
    /// `array_new(elem_kind, len) -> obj`
    ArrayNew,
    ArrayLen,
    /// Unchecked element read; codegen emits the bounds check inline.
    ArrayGet,
    /// Unchecked element write; codegen emits the bounds check inline.
    ArraySet,
    /// `hash_new(key_kind, value_kind) -> obj`
    HashNew,
    HashLen,
    HashGet,
    HashSet,
    RangeNew,
    RangeStart,
    RangeEnd,
    /// Fixed-arity tuple allocation.
    TupleNew,
    TupleGet,

    // ── Strings ─────────────────────────────────────────────────
    /// `string_new(bytes, len) -> obj`
    StringNew,
    StringConcat,
    StringEquals,
    StringFromI64,
    StringFromF64,
    StringFromBool,

    // ── Boxing & capture cells ──────────────────────────────────
    /// Box a primitive for an erased slot.
    BoxNew,
    /// Read a boxed primitive back out.
    BoxValue,
    /// Allocate a mutable capture cell.
    CellNew,
    CellGet,
    CellSet,

    // ── Exceptions ──────────────────────────────────────────────
    /// `throw(obj) -> !`
    Throw,
    /// Re-raise the in-flight exception from a dispatcher.
    Rethrow,
    /// Subclass test used by landing-pad dispatchers and
    /// `instance_of`.
    ClassIsSubtype,

    // ── Traps (allocate + throw the named runtime error) ────────
    TrapDivisionByZero,
    TrapIndexOutOfBounds,
    TrapNullReference,
    TrapMatchError,

    // ── Futures & async executor ────────────────────────────────
    FutureNew,
    FutureRegisterContinuation,
    FutureComplete,
    FutureFail,
    /// Blocks on completion; rethrows a failed future's error.
    FutureValue,

    // ── Channels & threads ──────────────────────────────────────
    ChannelNew,
    ChannelSend,
    ChannelReceive,
    ThreadSpawn,

    // ── Interface-like dispatch ─────────────────────────────────
    /// `(class_id, name, arity, cache_slot) -> fn_ptr`; fills the
    /// per-site monomorphic inline cache.
    InterfaceLookup,

    // ── FFI ─────────────────────────────────────────────────────
    FfiLoadLibrary,
    FfiResolve,

    // ── Reflection ──────────────────────────────────────────────
    ReflectFields,
    ReflectGet,

    // ── JSON ────────────────────────────────────────────────────
    JsonParse,
    JsonGetI64,
    JsonGetF64,
    JsonGetBool,
    JsonGetString,
    JsonGetObject,
}

impl RuntimeFn {
    /// The stable link symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            RuntimeFn::GcAlloc => "ember_rt_gc_alloc",
            RuntimeFn::GcWriteBarrier => "ember_rt_gc_write_barrier",
            RuntimeFn::ArrayNew => "ember_rt_array_new",
            RuntimeFn::ArrayLen => "ember_rt_array_len",
            RuntimeFn::ArrayGet => "ember_rt_array_get",
            RuntimeFn::ArraySet => "ember_rt_array_set",
            RuntimeFn::HashNew => "ember_rt_hash_new",
            RuntimeFn::HashLen => "ember_rt_hash_len",
            RuntimeFn::HashGet => "ember_rt_hash_get",
            RuntimeFn::HashSet => "ember_rt_hash_set",
            RuntimeFn::RangeNew => "ember_rt_range_new",
            RuntimeFn::RangeStart => "ember_rt_range_start",
            RuntimeFn::RangeEnd => "ember_rt_range_end",
            RuntimeFn::TupleNew => "ember_rt_tuple_new",
            RuntimeFn::TupleGet => "ember_rt_tuple_get",
            RuntimeFn::StringNew => "ember_rt_string_new",
            RuntimeFn::StringConcat => "ember_rt_string_concat",
            RuntimeFn::StringEquals => "ember_rt_string_equals",
            RuntimeFn::StringFromI64 => "ember_rt_string_from_i64",
            RuntimeFn::StringFromF64 => "ember_rt_string_from_f64",
            RuntimeFn::StringFromBool => "ember_rt_string_from_bool",
            RuntimeFn::BoxNew => "ember_rt_box_new",
            RuntimeFn::BoxValue => "ember_rt_box_value",
            RuntimeFn::CellNew => "ember_rt_cell_new",
            RuntimeFn::CellGet => "ember_rt_cell_get",
            RuntimeFn::CellSet => "ember_rt_cell_set",
            RuntimeFn::Throw => "ember_rt_throw",
            RuntimeFn::Rethrow => "ember_rt_rethrow",
            RuntimeFn::ClassIsSubtype => "ember_rt_class_is_subtype",
            RuntimeFn::TrapDivisionByZero => "ember_rt_trap_division_by_zero",
            RuntimeFn::TrapIndexOutOfBounds => "ember_rt_trap_index_out_of_bounds",
            RuntimeFn::TrapNullReference => "ember_rt_trap_null_reference",
            RuntimeFn::TrapMatchError => "ember_rt_trap_match_error",
            RuntimeFn::FutureNew => "ember_rt_future_new",
            RuntimeFn::FutureRegisterContinuation => "ember_rt_future_register_continuation",
            RuntimeFn::FutureComplete => "ember_rt_future_complete",
            RuntimeFn::FutureFail => "ember_rt_future_fail",
            RuntimeFn::FutureValue => "ember_rt_future_value",
            RuntimeFn::ChannelNew => "ember_rt_channel_new",
            RuntimeFn::ChannelSend => "ember_rt_channel_send",
            RuntimeFn::ChannelReceive => "ember_rt_channel_receive",
            RuntimeFn::ThreadSpawn => "ember_rt_thread_spawn",
            RuntimeFn::InterfaceLookup => "ember_rt_interface_lookup",
            RuntimeFn::FfiLoadLibrary => "ember_rt_ffi_load_library",
            RuntimeFn::FfiResolve => "ember_rt_ffi_resolve",
            RuntimeFn::ReflectFields => "ember_rt_reflect_fields",
            RuntimeFn::ReflectGet => "ember_rt_reflect_get",
            RuntimeFn::JsonParse => "ember_rt_json_parse",
            RuntimeFn::JsonGetI64 => "ember_rt_json_get_i64",
            RuntimeFn::JsonGetF64 => "ember_rt_json_get_f64",
            RuntimeFn::JsonGetBool => "ember_rt_json_get_bool",
            RuntimeFn::JsonGetString => "ember_rt_json_get_string",
            RuntimeFn::JsonGetObject => "ember_rt_json_get_object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_carry_the_runtime_prefix() {
        assert_eq!(RuntimeFn::GcAlloc.symbol(), "ember_rt_gc_alloc");
        assert_eq!(RuntimeFn::Throw.symbol(), "ember_rt_throw");
        assert_eq!(
            RuntimeFn::FutureRegisterContinuation.symbol(),
            "ember_rt_future_register_continuation"
        );
    }
}
