//! Module-level tests: a corpus of malformed functions the verifier must
//! reject, plus dump determinism.

use ember_ir::{ClassId, FunctionId, LocalId, Name, StringInterner};
use ember_resolve::{ClassDescriptor, DispatchMode, MethodHandle};
use ember_types::{Idx, Pool};
use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;

use crate::{
    dump_module, verify_module, AnvilModule, Args, BlockId, FnAttrs, FunctionBuilder, Op,
    Terminator, VerifyError,
};

fn test_class(id: u32, name: Name, vtable: Vec<FunctionId>) -> ClassDescriptor {
    ClassDescriptor {
        id: ClassId::new(id),
        name,
        parent: None,
        layout_kind: ember_ir::ast::LayoutKind::Object,
        serialization: ember_ir::ast::SerializationPolicy::None,
        native: None,
        type_param_count: 0,
        fields: Vec::new(),
        methods: FxHashMap::default(),
        vtable,
    }
}

/// `fn answer() -> i64 { ret 42 }` plus an `Exception` class for traps.
fn minimal_module() -> (AnvilModule, Pool, StringInterner) {
    let interner = StringInterner::new();
    let pool = Pool::new();
    let mut module = AnvilModule::default();
    module.classes.push(test_class(0, interner.intern("Exception"), Vec::new()));

    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        interner.intern("answer"),
        None,
        &[],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let value = fb.reg(Idx::I64);
    fb.push(entry, Op::ConstInt { dst: value, value: 42 });
    fb.terminate(entry, Terminator::Ret { value: Some(value) });
    module.functions.push(fb.finish());

    (module, pool, interner)
}

#[test]
fn well_formed_module_passes() {
    let (module, pool, _) = minimal_module();
    assert_eq!(verify_module(&module, &pool), Ok(()));
}

#[test]
fn use_before_def_is_rejected() {
    let (mut module, pool, interner) = minimal_module();

    // bb0 branches; only bb1 defines r1, but the join bb3 uses it.
    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("broken"),
        None,
        &[],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let bb1 = fb.new_block();
    let bb2 = fb.new_block();
    let bb3 = fb.new_block();
    let cond = fb.reg(Idx::I1);
    fb.push(entry, Op::ConstInt { dst: cond, value: 1 });
    fb.terminate(
        entry,
        Terminator::CondJump {
            cond,
            then_block: bb1,
            else_block: bb2,
        },
    );
    let only_then = fb.reg(Idx::I64);
    fb.push(bb1, Op::ConstInt { dst: only_then, value: 1 });
    fb.terminate(bb1, Terminator::Jump { target: bb3, args: Args::new() });
    fb.terminate(bb2, Terminator::Jump { target: bb3, args: Args::new() });
    fb.terminate(bb3, Terminator::Ret { value: Some(only_then) });
    module.functions.push(fb.finish());

    let errors = verify_module(&module, &pool).err().map(|errors| {
        errors
            .iter()
            .any(|e| matches!(e, VerifyError::UseBeforeDef { .. }))
    });
    assert_eq!(errors, Some(true));
}

#[test]
fn branch_local_defs_pass_through_params() {
    let (mut module, pool, interner) = minimal_module();

    // The fixed version: bb3 takes the value as a block parameter.
    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("joined"),
        None,
        &[],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let bb1 = fb.new_block();
    let bb2 = fb.new_block();
    let bb3 = fb.new_block();
    let phi = fb.block_param(bb3, Idx::I64);
    let cond = fb.reg(Idx::I1);
    fb.push(entry, Op::ConstInt { dst: cond, value: 0 });
    fb.terminate(
        entry,
        Terminator::CondJump {
            cond,
            then_block: bb1,
            else_block: bb2,
        },
    );
    let a = fb.reg(Idx::I64);
    fb.push(bb1, Op::ConstInt { dst: a, value: 1 });
    fb.terminate(bb1, Terminator::Jump { target: bb3, args: Args::from_slice(&[a]) });
    let b = fb.reg(Idx::I64);
    fb.push(bb2, Op::ConstInt { dst: b, value: 2 });
    fb.terminate(bb2, Terminator::Jump { target: bb3, args: Args::from_slice(&[b]) });
    fb.terminate(bb3, Terminator::Ret { value: Some(phi) });
    module.functions.push(fb.finish());

    assert_eq!(verify_module(&module, &pool), Ok(()));
}

#[test]
fn operand_type_mismatch_is_rejected() {
    let (mut module, pool, interner) = minimal_module();

    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("mixed"),
        None,
        &[],
        Idx::F64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let int = fb.reg(Idx::I64);
    let float = fb.reg(Idx::F64);
    let sum = fb.reg(Idx::F64);
    fb.push(entry, Op::ConstInt { dst: int, value: 1 });
    fb.push(entry, Op::ConstDouble { dst: float, bits: 0 });
    // iadd over mismatched operand types
    fb.push(entry, Op::IAdd { dst: sum, lhs: int, rhs: float });
    fb.terminate(entry, Terminator::Ret { value: Some(sum) });
    module.functions.push(fb.finish());

    let has_mismatch = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::TypeMismatch { .. }))
        });
    assert!(has_mismatch);
}

#[test]
fn suspension_outside_coroutine_is_rejected() {
    let (mut module, mut pool, interner) = minimal_module();

    let future_ty = pool.future(Idx::I64);
    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("not_async"),
        None,
        &[],
        Idx::NIL,
        FnAttrs::empty(), // not ASYNC
    );
    let entry = BlockId::new(0);
    let fut = fb.reg(future_ty);
    fb.push(entry, Op::ConstNil { dst: fut });
    fb.terminate(entry, Terminator::AwaitSuspend { future: fut, next_state: 1 });
    module.functions.push(fb.finish());

    let rejected = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::SuspendOutsideCoroutine { .. }))
        });
    assert!(rejected);
}

#[test]
fn empty_catch_list_is_rejected() {
    let (mut module, pool, interner) = minimal_module();

    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("empty_try"),
        None,
        &[],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let value = fb.reg(Idx::I64);
    fb.push(entry, Op::ConstInt { dst: value, value: 0 });
    fb.terminate(entry, Terminator::Ret { value: Some(value) });
    fb.add_try_region(None, entry, entry, Vec::new());
    module.functions.push(fb.finish());

    let rejected = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::EmptyCatchList { .. }))
        });
    assert!(rejected);
}

#[test]
fn overlapping_regions_are_rejected() {
    let (mut module, pool, interner) = minimal_module();
    let exception = ClassId::new(0);

    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("tangled"),
        None,
        &[],
        Idx::NIL,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let bb1 = fb.new_block();
    let bb2 = fb.new_block();
    let handler = fb.new_block();
    fb.terminate(entry, Terminator::Jump { target: bb1, args: Args::new() });
    fb.terminate(bb1, Terminator::Jump { target: bb2, args: Args::new() });
    fb.terminate(bb2, Terminator::Ret { value: None });
    let caught = fb.reg(Idx::NIL);
    fb.push(handler, Op::CaughtException { dst: caught });
    fb.terminate(handler, Terminator::Ret { value: None });
    // [bb0, bb1] and [bb1, bb2] overlap without nesting.
    fb.add_try_region(None, entry, bb1, vec![(exception, handler)]);
    fb.add_try_region(None, bb1, bb2, vec![(exception, handler)]);
    module.functions.push(fb.finish());

    let rejected = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::MalformedRegionNesting { .. }))
        });
    assert!(rejected);
}

#[test]
fn virtual_call_without_slot_is_rejected() {
    let (mut module, mut pool, interner) = minimal_module();

    // Class 1 has an empty v-table; calling slot 0 through it is invalid.
    let animal = interner.intern("Animal");
    module.classes.push(test_class(1, animal, Vec::new()));
    pool.register_class(ClassId::new(1), animal, None);
    let animal_ty = pool.class(ClassId::new(1));

    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("caller"),
        None,
        &[animal_ty],
        Idx::NIL,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let receiver = fb.reg(animal_ty);
    fb.push(entry, Op::LoadLocal { dst: receiver, local: LocalId::new(0) });
    let result = fb.reg(Idx::NIL);
    fb.push(
        entry,
        Op::CallVirtual {
            dst: result,
            receiver,
            class: ClassId::new(1),
            slot: 0,
            args: Args::new(),
        },
    );
    fb.terminate(entry, Terminator::Ret { value: None });
    module.functions.push(fb.finish());

    let rejected = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::BadVirtualReceiver { slot: 0, .. }))
        });
    assert!(rejected);
}

#[test]
fn native_call_into_plain_class_is_rejected() {
    let (mut module, mut pool, interner) = minimal_module();

    // `answer` (function 0) belongs to no NativeLibrary class.
    let plain = interner.intern("Plain");
    module.classes.push(test_class(1, plain, Vec::new()));
    pool.register_class(ClassId::new(1), plain, None);
    module.functions[0].owner = Some(ClassId::new(1));

    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("caller"),
        None,
        &[],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let result = fb.reg(Idx::I64);
    fb.push(
        entry,
        Op::CallNative {
            dst: result,
            function: FunctionId::new(0),
            args: Args::new(),
        },
    );
    fb.terminate(entry, Terminator::Ret { value: Some(result) });
    module.functions.push(fb.finish());

    let rejected = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::BadNativeTarget { .. }))
        });
    assert!(rejected);
}

#[test]
fn cond_jump_on_non_bool_is_rejected() {
    let (mut module, pool, interner) = minimal_module();

    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("intcond"),
        None,
        &[],
        Idx::NIL,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let exit = fb.new_block();
    let n = fb.reg(Idx::I64);
    fb.push(entry, Op::ConstInt { dst: n, value: 3 });
    fb.terminate(
        entry,
        Terminator::CondJump {
            cond: n,
            then_block: exit,
            else_block: exit,
        },
    );
    fb.terminate(exit, Terminator::Ret { value: None });
    module.functions.push(fb.finish());

    let rejected = verify_module(&module, &pool)
        .err()
        .is_some_and(|errors| {
            errors
                .iter()
                .any(|e| matches!(e, VerifyError::TypeMismatch { .. }))
        });
    assert!(rejected);
}

#[test]
fn dump_is_deterministic() {
    let interner = StringInterner::new();
    let pool = Pool::new();
    let mut module = AnvilModule::default();
    module
        .classes
        .push(test_class(0, interner.intern("Exception"), Vec::new()));

    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        interner.intern("greet"),
        None,
        &[],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let hello = module.strings.intern("Hello, World!");
    let s = fb.reg(Idx::NIL);
    fb.push(entry, Op::ConstString { dst: s, value: hello });
    let n = fb.reg(Idx::I64);
    fb.push(entry, Op::ConstInt { dst: n, value: 7 });
    fb.terminate(entry, Terminator::Ret { value: Some(n) });
    module.functions.push(fb.finish());

    let first = dump_module(&module, &pool, &interner);
    let second = dump_module(&module, &pool, &interner);
    assert_eq!(first, second);
    assert!(first.contains("fn @0 greet() -> i64 {"));
    assert!(first.contains("const_string str0 \"Hello, World!\""));
    assert!(first.contains("ret r1"));
}

#[test]
fn method_handle_dispatch_modes_cover_native() {
    // Descriptor-level sanity used by the verifier's native check.
    let handle = MethodHandle {
        owner: ClassId::new(0),
        name: Name::EMPTY,
        arity: 0,
        signature: Idx::NONE,
        function: FunctionId::new(0),
        dispatch: DispatchMode::Native,
        vtable_slot: None,
        throws: Vec::new(),
    };
    assert_eq!(handle.dispatch, DispatchMode::Native);
    assert!(handle.vtable_slot.is_none());
}
