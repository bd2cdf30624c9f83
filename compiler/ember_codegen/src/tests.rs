//! Codegen tests over hand-built Anvil modules.

use ember_anvil::{
    AnvilModule, Args, BlockId, FnAttrs, FunctionBuilder, Op, Terminator,
};
use ember_ir::ast::{LayoutKind, NativeBinding, Platform, SerializationPolicy};
use ember_ir::{ClassId, FunctionId, LocalId, Name, StringInterner};
use ember_resolve::{ClassDescriptor, DispatchMode, FieldSlot, MethodHandle};
use ember_types::{layout, Idx, Pool, OBJECT_HEADER_SIZE};
use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;

use crate::{
    emit, Callee, Constant, LowInst, LowTerm, LowType, RuntimeFn, SafePointKind,
};

/// A class with fields `[count: i64, next: Self]`, laid out in the pool.
fn node_class(pool: &mut Pool, interner: &StringInterner) -> ClassDescriptor {
    let id = ClassId::new(0);
    pool.register_class(id, interner.intern("Node"), None);
    let self_ty = pool.class(id);
    let fields = vec![
        FieldSlot {
            name: interner.intern("count"),
            ty: Idx::I64,
            slot: 0,
            offset: 0,
            declared_in: id,
            json_key: None,
        },
        FieldSlot {
            name: interner.intern("next"),
            ty: self_ty,
            slot: 1,
            offset: 0,
            declared_in: id,
            json_key: None,
        },
    ];
    let field_types: Vec<Idx> = fields.iter().map(|f| f.ty).collect();
    let computed = layout::compute(pool, LayoutKind::Object, &field_types);
    let mut fields = fields;
    for (field, placed) in fields.iter_mut().zip(&computed.fields) {
        field.offset = placed.offset;
    }
    pool.set_layout(id, computed);

    ClassDescriptor {
        id,
        name: interner.intern("Node"),
        parent: None,
        layout_kind: LayoutKind::Object,
        serialization: SerializationPolicy::None,
        native: None,
        type_param_count: 0,
        fields,
        methods: FxHashMap::default(),
        vtable: Vec::new(),
    }
}

#[test]
fn field_access_becomes_offsetted_loads_and_barriers() {
    let interner = StringInterner::new();
    let mut pool = Pool::new();
    let mut module = AnvilModule::default();
    module.classes.push(node_class(&mut pool, &interner));
    let node = ClassId::new(0);
    let node_ty = pool.class(node);

    // fn touch(n: Node): n.count ; n.next = n
    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        interner.intern("touch"),
        None,
        &[node_ty],
        Idx::NIL,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let n = fb.reg(node_ty);
    fb.push(entry, Op::LoadLocal { dst: n, local: LocalId::new(0) });
    let count = fb.reg(Idx::I64);
    fb.push(entry, Op::GetField { dst: count, object: n, class: node, slot: 0 });
    fb.push(entry, Op::SetField { object: n, class: node, slot: 1, value: n });
    fb.terminate(entry, Terminator::Ret { value: None });
    module.functions.push(fb.finish());

    let low = emit(&module, &pool, &interner).unwrap_or_else(|e| panic!("{e}"));
    let body = &low.functions[0];

    // The first field sits just past the object header.
    let has_load = body.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Load { ty: LowType::I64, offset, .. } if *offset == OBJECT_HEADER_SIZE
        )
    });
    assert!(has_load, "expected header-relative field load");

    // The reference store gets a write barrier.
    let has_barrier = body.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Runtime(RuntimeFn::GcWriteBarrier),
                ..
            }
        )
    });
    assert!(has_barrier, "expected write barrier after reference store");

    // Functions open with a prologue safe point.
    assert!(matches!(
        body.blocks[0].insts.first(),
        Some(LowInst::SafePoint {
            kind: SafePointKind::Prologue
        })
    ));
}

#[test]
fn division_gets_an_inline_zero_check() {
    let interner = StringInterner::new();
    let pool = Pool::new();
    let mut module = AnvilModule::default();

    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        interner.intern("divide"),
        None,
        &[Idx::I64, Idx::I64],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let a = fb.reg(Idx::I64);
    fb.push(entry, Op::LoadLocal { dst: a, local: LocalId::new(0) });
    let b = fb.reg(Idx::I64);
    fb.push(entry, Op::LoadLocal { dst: b, local: LocalId::new(1) });
    let q = fb.reg(Idx::I64);
    fb.push(entry, Op::IDiv { dst: q, lhs: a, rhs: b });
    fb.terminate(entry, Terminator::Ret { value: Some(q) });
    module.functions.push(fb.finish());

    let low = emit(&module, &pool, &interner).unwrap_or_else(|e| panic!("{e}"));
    let body = &low.functions[0];

    let traps = body.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Runtime(RuntimeFn::TrapDivisionByZero),
                ..
            }
        )
    });
    assert!(traps, "expected division-by-zero trap path");

    // The check splits the block: a CondBr guards the division.
    let guarded = body
        .blocks
        .iter()
        .any(|b| matches!(b.term, LowTerm::CondBr { .. }));
    assert!(guarded);
}

#[test]
fn array_access_gets_an_inline_bounds_check() {
    let interner = StringInterner::new();
    let mut pool = Pool::new();
    let array_i64 = pool.array(Idx::I64);
    let mut module = AnvilModule::default();

    // fn get(a: [i64], i: i64) -> i64: return a[i]
    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        interner.intern("get"),
        None,
        &[array_i64, Idx::I64],
        Idx::I64,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let a = fb.reg(array_i64);
    fb.push(entry, Op::LoadLocal { dst: a, local: LocalId::new(0) });
    let i = fb.reg(Idx::I64);
    fb.push(entry, Op::LoadLocal { dst: i, local: LocalId::new(1) });
    let elem = fb.reg(Idx::I64);
    fb.push(entry, Op::ArrayGet { dst: elem, array: a, index: i });
    fb.terminate(entry, Terminator::Ret { value: Some(elem) });
    module.functions.push(fb.finish());

    let low = emit(&module, &pool, &interner).unwrap_or_else(|e| panic!("{e}"));
    let body = &low.functions[0];

    // The check compares against the length and traps before the read.
    let traps = body.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Runtime(RuntimeFn::TrapIndexOutOfBounds),
                ..
            }
        )
    });
    assert!(traps, "expected index-out-of-bounds trap path");

    let all_insts: Vec<&LowInst> = body.blocks.iter().flat_map(|b| &b.insts).collect();
    let len_call = all_insts.iter().position(|inst| {
        matches!(
            inst,
            LowInst::Call { callee: Callee::Runtime(RuntimeFn::ArrayLen), .. }
        )
    });
    let get_call = all_insts.iter().position(|inst| {
        matches!(
            inst,
            LowInst::Call { callee: Callee::Runtime(RuntimeFn::ArrayGet), .. }
        )
    });
    assert!(len_call.is_some() && get_call.is_some());
    assert!(len_call < get_call, "bounds check precedes the element read");
}

#[test]
fn virtual_call_loads_descriptor_vtable_and_slot() {
    let interner = StringInterner::new();
    let mut pool = Pool::new();
    let mut module = AnvilModule::default();

    let mut descriptor = node_class(&mut pool, &interner);
    let speak = interner.intern("speak");
    descriptor.vtable.push(FunctionId::new(0));
    descriptor.methods.insert(
        (speak, 0),
        MethodHandle {
            owner: ClassId::new(0),
            name: speak,
            arity: 0,
            signature: Idx::NONE,
            function: FunctionId::new(0),
            dispatch: DispatchMode::Virtual,
            vtable_slot: Some(0),
            throws: Vec::new(),
        },
    );
    module.classes.push(descriptor);
    let node = ClassId::new(0);
    let node_ty = pool.class(node);

    // fn speak(self: Node) (the callee at v-table slot 0)
    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        speak,
        Some(node),
        &[node_ty],
        Idx::NIL,
        FnAttrs::empty(),
    );
    fb.terminate(BlockId::new(0), Terminator::Ret { value: None });
    module.functions.push(fb.finish());

    // fn caller(n: Node): n.speak()
    let mut fb = FunctionBuilder::new(
        FunctionId::new(1),
        interner.intern("caller"),
        None,
        &[node_ty],
        Idx::NIL,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let n = fb.reg(node_ty);
    fb.push(entry, Op::LoadLocal { dst: n, local: LocalId::new(0) });
    let result = fb.reg(Idx::NIL);
    fb.push(
        entry,
        Op::CallVirtual {
            dst: result,
            receiver: n,
            class: node,
            slot: 0,
            args: Args::new(),
        },
    );
    fb.terminate(entry, Terminator::Ret { value: None });
    module.functions.push(fb.finish());

    let low = emit(&module, &pool, &interner).unwrap_or_else(|e| panic!("{e}"));
    let caller = &low.functions[1];

    let loads = caller
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter(|inst| matches!(inst, LowInst::Load { ty: LowType::Ptr, .. }))
        .count();
    assert!(loads >= 3, "descriptor, v-table, and slot loads expected");

    let indirect = caller.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Indirect(_),
                ..
            }
        )
    });
    assert!(indirect, "virtual dispatch ends in an indirect call");
}

#[test]
fn back_edges_are_safe_points() {
    let interner = StringInterner::new();
    let pool = Pool::new();
    let mut module = AnvilModule::default();

    // A trivial self-loop.
    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        interner.intern("spin"),
        None,
        &[],
        Idx::NIL,
        FnAttrs::empty(),
    );
    let entry = BlockId::new(0);
    let header = fb.new_block();
    fb.terminate(entry, Terminator::Jump { target: header, args: Args::new() });
    fb.terminate(header, Terminator::Jump { target: header, args: Args::new() });
    module.functions.push(fb.finish());

    let low = emit(&module, &pool, &interner).unwrap_or_else(|e| panic!("{e}"));
    let body = &low.functions[0];
    let back_edge_marks = body
        .blocks
        .iter()
        .flat_map(|b| &b.insts)
        .filter(|inst| {
            matches!(
                inst,
                LowInst::SafePoint {
                    kind: SafePointKind::LoopBackEdge
                }
            )
        })
        .count();
    assert_eq!(back_edge_marks, 1);
}

#[test]
fn native_thunks_and_module_init_bind_symbols() {
    let interner = StringInterner::new();
    let mut pool = Pool::new();
    let mut module = AnvilModule::default();

    let io = ClassId::new(0);
    pool.register_class(io, interner.intern("IO"), None);
    let field_types: Vec<Idx> = Vec::new();
    pool.set_layout(io, layout::compute(&pool, LayoutKind::Object, &field_types));
    let print = interner.intern("print");
    let mut descriptor = ClassDescriptor {
        id: io,
        name: interner.intern("IO"),
        parent: None,
        layout_kind: LayoutKind::Object,
        serialization: SerializationPolicy::None,
        native: Some(NativeBinding {
            paths: vec![(Platform::Linux, interner.intern("libio.so"))],
        }),
        type_param_count: 0,
        fields: Vec::new(),
        methods: FxHashMap::default(),
        vtable: Vec::new(),
    };
    descriptor.methods.insert(
        (print, 1),
        MethodHandle {
            owner: io,
            name: print,
            arity: 1,
            signature: Idx::NONE,
            function: FunctionId::new(0),
            dispatch: DispatchMode::Native,
            vtable_slot: None,
            throws: Vec::new(),
        },
    );
    module.classes.push(descriptor);

    let mut fb = FunctionBuilder::new(
        FunctionId::new(0),
        print,
        Some(io),
        &[Idx::I64],
        Idx::NIL,
        FnAttrs::NATIVE_THUNK,
    );
    fb.terminate(BlockId::new(0), Terminator::Unreachable);
    module.functions.push(fb.finish());

    let low = emit(&module, &pool, &interner).unwrap_or_else(|e| panic!("{e}"));

    // The thunk loads the binding slot and calls through it.
    let thunk = &low.functions[0];
    let indirect = thunk.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Indirect(_),
                ..
            }
        )
    });
    assert!(indirect);

    // The initializer loads the library and resolves the symbol.
    let init = low
        .functions
        .iter()
        .find(|f| f.symbol == "ember_module_init")
        .unwrap_or_else(|| panic!("module initializer missing"));
    let loads_library = init.blocks[0].insts.iter().any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Runtime(RuntimeFn::FfiLoadLibrary),
                ..
            }
        )
    });
    let resolves = init.blocks[0].insts.iter().any(|inst| {
        matches!(
            inst,
            LowInst::Call {
                callee: Callee::Runtime(RuntimeFn::FfiResolve),
                ..
            }
        )
    });
    assert!(loads_library && resolves);

    // A binding slot constant exists for the thunk.
    let has_slot = low.constants.iter().any(|c| {
        matches!(
            c,
            Constant::FfiBindingSlot { function } if *function == FunctionId::new(0)
        )
    });
    assert!(has_slot);
}

#[test]
fn generic_instantiations_share_one_layout() {
    // Two instantiations of one erased class: the descriptor constant is
    // computed from the class body alone, so both share it.
    let interner = StringInterner::new();
    let mut pool = Pool::new();
    let boxy = ClassId::new(0);
    pool.register_class(boxy, interner.intern("Box"), None);
    let t = pool.type_param(0);
    let computed = layout::compute(&pool, LayoutKind::Object, &[t]);
    pool.set_layout(boxy, computed);

    let of_i64 = pool.generic_instance(boxy, &[Idx::I64]);
    let of_f64 = pool.generic_instance(boxy, &[Idx::F64]);
    assert_ne!(of_i64, of_f64);

    // Same class id, same layout, byte for byte.
    assert_eq!(pool.class_id(of_i64), pool.class_id(of_f64));
    let layout_a = pool.layout_of(pool.class_id(of_i64));
    let layout_b = pool.layout_of(pool.class_id(of_f64));
    assert_eq!(layout_a, layout_b);
}
