//! End-to-end middle-end scenarios: typed AST in, verified Anvil and
//! LowIR out.

mod common;

use common::Fixture;
use ember_anvil::{FnAttrs, Op, Terminator};
use ember_codegen::{Callee, Constant, LowInst, RuntimeFn};
use ember_ir::ast::{
    BinaryOp, CatchClause, ExprKind, FunctionKind, NativeBinding, Platform,
    SerializationPolicy, Stmt,
};
use ember_ir::{ClassId, ExprId, FunctionId, LocalId, Span};
use ember_types::Idx;
use pretty_assertions::assert_eq;

/// S1: `IO.print("Hello, World!")` — a class-qualified native call.
#[test]
fn hello_world_reaches_the_native_thunk() {
    let mut f = Fixture::new();
    let io = f.add_class("IO", Some(ClassId::new(0)));
    f.module.classes[io.index()].native = Some(NativeBinding {
        paths: vec![(Platform::Linux, f.interner.intern("libember_io.so"))],
    });

    let string_ty = f.string_ty();
    let print = FunctionId::new(0);
    let print_locals = vec![f.local("s", string_ty)];
    let symbol = f.interner.intern("ember_io_print");
    f.add_function(
        "print",
        FunctionKind::Native { symbol },
        1,
        Idx::NIL,
        print_locals,
        ember_ir::StmtRange::EMPTY,
    );
    f.module.functions[print.index()].owner = Some(io);
    f.module.classes[io.index()].methods.push(print);

    let hello = f.interner.intern("Hello, World!");
    let lit = f.expr(ExprKind::Str(hello), string_ty);
    let args = f.args(&[lit]);
    let print_name = f.interner.intern("print");
    let call = f.expr(ExprKind::ClassCall { class: io, name: print_name, args }, Idx::NIL);
    let call_stmt = f.stmt(Stmt::Expr(call));
    let body = f.body(&[call_stmt]);
    let main = f.add_function("main", FunctionKind::Normal, 0, Idx::NIL, vec![], body);
    f.module.entry = Some(main);

    let compiled = f.compile();

    // The literal reached the constant pool.
    assert!(compiled
        .unit
        .low
        .constants
        .iter()
        .any(|c| matches!(c, Constant::Str(s) if s == "Hello, World!")));

    // main calls the thunk directly; the thunk is marked.
    assert!(compiled.unit.anvil.function(print).attrs.contains(FnAttrs::NATIVE_THUNK));
    let dump = compiled.dump();
    assert!(dump.contains("call_native @0"));

    // The module initializer resolves the symbol at load.
    assert!(compiled
        .unit
        .low
        .functions
        .iter()
        .any(|f| f.symbol == "ember_module_init"));
    assert_eq!(compiled.unit.low.entry, Some(main));
}

/// S2: recursive fib plus a counted loop over `0..5`.
#[test]
fn fibonacci_compiles_with_switchless_recursion_and_counted_loop() {
    let mut f = Fixture::new();
    let fib = FunctionId::new(0);

    // fn fib(n): if n < 2: return n ; return fib(n-1) + fib(n-2)
    let n = LocalId::new(0);
    let n_read = f.expr(ExprKind::Local(n), Idx::I64);
    let two = f.expr(ExprKind::Int(2), Idx::I64);
    let cond = f.expr(ExprKind::Binary { op: BinaryOp::Lt, lhs: n_read, rhs: two }, Idx::I1);
    let n_base = f.expr(ExprKind::Local(n), Idx::I64);
    let base = f.stmt(Stmt::Return { value: n_base });
    let then_body = f.body(&[base]);

    let lhs = {
        let n1 = f.expr(ExprKind::Local(n), Idx::I64);
        let one = f.expr(ExprKind::Int(1), Idx::I64);
        let sub = f.expr(ExprKind::Binary { op: BinaryOp::Sub, lhs: n1, rhs: one }, Idx::I64);
        let args = f.args(&[sub]);
        f.expr(ExprKind::StaticCall { function: fib, args }, Idx::I64)
    };
    let rhs = {
        let n2 = f.expr(ExprKind::Local(n), Idx::I64);
        let two = f.expr(ExprKind::Int(2), Idx::I64);
        let sub = f.expr(ExprKind::Binary { op: BinaryOp::Sub, lhs: n2, rhs: two }, Idx::I64);
        let args = f.args(&[sub]);
        f.expr(ExprKind::StaticCall { function: fib, args }, Idx::I64)
    };
    let sum = f.expr(ExprKind::Binary { op: BinaryOp::Add, lhs, rhs }, Idx::I64);
    let branch = f.stmt(Stmt::If { cond, then_body, else_body: ember_ir::StmtRange::EMPTY });
    let ret = f.stmt(Stmt::Return { value: sum });
    let fib_body = f.body(&[branch, ret]);
    let fib_locals = vec![f.local("n", Idx::I64)];
    f.add_function("fib", FunctionKind::Normal, 1, Idx::I64, fib_locals, fib_body);

    // fn main(): for i in 0..5: fib(i)
    let i = LocalId::new(0);
    let range_ty = f.pool.range();
    let zero = f.expr(ExprKind::Int(0), Idx::I64);
    let five = f.expr(ExprKind::Int(5), Idx::I64);
    let range = f.expr(ExprKind::RangeLit { start: zero, end: five }, range_ty);
    let i_read = f.expr(ExprKind::Local(i), Idx::I64);
    let call_args = f.args(&[i_read]);
    let call = f.expr(ExprKind::StaticCall { function: fib, args: call_args }, Idx::I64);
    let call_stmt = f.stmt(Stmt::Expr(call));
    let loop_body = f.body(&[call_stmt]);
    let for_stmt = f.stmt(Stmt::For { binding: i, iterable: range, body: loop_body });
    let main_body = f.body(&[for_stmt]);
    let main_locals = vec![f.local("i", Idx::I64)];
    f.add_function("main", FunctionKind::Normal, 0, Idx::NIL, main_locals, main_body);

    let compiled = f.compile();
    let dump = compiled.dump();
    assert!(dump.contains("fn @0 fib(i64) -> i64 {"));
    assert!(dump.contains("icmp lt"));
    // The range literal iterates without a range object.
    assert!(!dump.contains("range_new"));

    // Codegen produced both bodies plus nothing unexpected.
    assert_eq!(compiled.unit.low.functions.len(), 2);
}

/// S3: `Dog.new("Rex").speak()` dispatches through the v-table slot that
/// `Animal` assigned.
#[test]
fn virtual_dispatch_is_stable_across_subclasses() {
    let mut f = Fixture::new();
    let string_ty = f.string_ty();

    let animal = f.add_class("Animal", Some(ClassId::new(0)));
    let dog = f.add_class("Dog", Some(animal));
    f.add_field(animal, "name", string_ty);

    // Animal.speak and Dog.speak (override).
    let ret = f.stmt(Stmt::Return { value: ExprId::NONE });
    let body = f.body(&[ret]);
    f.add_method(animal, "speak", &[], Idx::NIL, vec![], body);
    let ret = f.stmt(Stmt::Return { value: ExprId::NONE });
    let body = f.body(&[ret]);
    let dog_speak = f.add_method(dog, "speak", &[], Idx::NIL, vec![], body);

    // Dog.initialize(name) so Dog.new("Rex") has an initializer.
    let dog_ty = f.pool.class(dog);
    let self_read = f.expr(ExprKind::Local(LocalId::new(0)), dog_ty);
    let name_read = f.expr(ExprKind::Local(LocalId::new(1)), string_ty);
    let assign = f.stmt(Stmt::AssignField {
        object: self_read,
        class: dog,
        field: 0,
        value: name_read,
    });
    let init_body = f.body(&[assign]);
    f.add_method(dog, "initialize", &[("name", string_ty)], Idx::NIL, vec![], init_body);

    // fn main(): Dog.new("Rex").speak()
    let rex = f.interner.intern("Rex");
    let rex_lit = f.expr(ExprKind::Str(rex), string_ty);
    let new_args = f.args(&[rex_lit]);
    let new_dog = f.expr(ExprKind::New { class: dog, args: new_args }, dog_ty);
    let speak_name = f.interner.intern("speak");
    let no_args = f.args(&[]);
    let call = f.expr(
        ExprKind::MethodCall { receiver: new_dog, name: speak_name, args: no_args },
        Idx::NIL,
    );
    let call_stmt = f.stmt(Stmt::Expr(call));
    let main_body = f.body(&[call_stmt]);
    let main = f.add_function("main", FunctionKind::Normal, 0, Idx::NIL, vec![], main_body);

    let compiled = f.compile();

    // Dispatch stability: Animal's slot for speak is Dog's slot.
    let speak = compiled.name("speak");
    let animal_slot = compiled.unit.resolution.class(animal).method(speak, 0)
        .and_then(|m| m.vtable_slot);
    let dog_slot = compiled.unit.resolution.class(dog).method(speak, 0)
        .and_then(|m| m.vtable_slot);
    assert_eq!(animal_slot, dog_slot);
    assert!(animal_slot.is_some());

    // Dog's table routes the shared slot at Dog.speak.
    let slot = animal_slot.unwrap_or_default() as usize;
    assert_eq!(compiled.unit.anvil.class(dog).vtable[slot], dog_speak);

    // The call site went through the v-table.
    let main_fn = compiled.unit.anvil.function(main);
    assert!(main_fn.blocks.iter().flat_map(|b| &b.ops).any(|op| {
        matches!(op, Op::CallVirtual { class, .. } if *class == dog)
    }));
}

/// S4: try/catch/finally over a throwing division — catch matches,
/// finally runs on every exit, the LowIR region has a landing pad.
#[test]
fn exception_scenario_builds_regions_and_landing_pads() {
    let mut f = Fixture::new();
    let division_error = ClassId::new(3);

    // fn divide(a, b) -> i64: return a / b
    let a = f.expr(ExprKind::Local(LocalId::new(0)), Idx::I64);
    let b = f.expr(ExprKind::Local(LocalId::new(1)), Idx::I64);
    let quotient = f.expr(ExprKind::Binary { op: BinaryOp::Div, lhs: a, rhs: b }, Idx::I64);
    let ret = f.stmt(Stmt::Return { value: quotient });
    let divide_body = f.body(&[ret]);
    let divide_locals = vec![f.local("a", Idx::I64), f.local("b", Idx::I64)];
    let divide = f.add_function("divide", FunctionKind::Normal, 2, Idx::I64, divide_locals, divide_body);

    // fn main(): try: divide(10, 0) catch e: … finally: …
    let ten = f.expr(ExprKind::Int(10), Idx::I64);
    let zero = f.expr(ExprKind::Int(0), Idx::I64);
    let call_args = f.args(&[ten, zero]);
    let call = f.expr(ExprKind::StaticCall { function: divide, args: call_args }, Idx::I64);
    let call_stmt = f.stmt(Stmt::Expr(call));
    let try_body = f.body(&[call_stmt]);

    // Markers stand in for the IO.println calls of the scenario.
    let caught_marker = f.expr(ExprKind::Int(111), Idx::I64);
    let caught_stmt = f.stmt(Stmt::Expr(caught_marker));
    let catch_body = f.body(&[caught_stmt]);
    let catches = f.module.arena.alloc_catches(vec![CatchClause {
        class: division_error,
        binding: LocalId::new(0),
        body: catch_body,
        span: Span::DUMMY,
    }]);

    let done_marker = f.expr(ExprKind::Int(222), Idx::I64);
    let done_stmt = f.stmt(Stmt::Expr(done_marker));
    let finally = f.body(&[done_stmt]);

    let try_stmt = f.stmt(Stmt::Try { body: try_body, catches, finally });
    let main_body = f.body(&[try_stmt]);
    let err_ty = f.pool.class(division_error);
    let main_locals = vec![f.local("e", err_ty)];
    let main = f.add_function("main", FunctionKind::Normal, 0, Idx::NIL, main_locals, main_body);

    let compiled = f.compile();

    // The Anvil region lists the user catch first, then the finally
    // rethrow handler.
    let main_fn = compiled.unit.anvil.function(main);
    assert_eq!(main_fn.try_regions.len(), 1);
    assert_eq!(main_fn.try_regions[0].catches[0].0, division_error);

    // The finally marker is duplicated into every exit: normal, catch,
    // and rethrow.
    let markers = main_fn
        .blocks
        .iter()
        .flat_map(|b| &b.ops)
        .filter(|op| matches!(op, Op::ConstInt { value: 222, .. }))
        .count();
    assert_eq!(markers, 3);

    // LowIR carries one landing pad whose dispatcher compares classes.
    let low_main = compiled
        .unit
        .low
        .functions
        .iter()
        .find(|func| func.id == main)
        .unwrap_or_else(|| panic!("main missing from LowIR"));
    assert_eq!(low_main.landing_pads.len(), 1);
    let dispatcher = low_main.landing_pads[0].dispatcher;
    let dispatcher_block = &low_main.blocks[dispatcher.index()];
    assert!(matches!(dispatcher_block.insts.first(), Some(LowInst::LandingPad { .. })));
    assert!(dispatcher_block.insts.iter().any(|inst| {
        matches!(
            inst,
            LowInst::Call { callee: Callee::Runtime(RuntimeFn::ClassIsSubtype), .. }
        )
    }));

    // The division itself trapped through the zero check.
    let low_divide = compiled
        .unit
        .low
        .functions
        .iter()
        .find(|func| func.id == divide)
        .unwrap_or_else(|| panic!("divide missing from LowIR"));
    assert!(low_divide.blocks.iter().flat_map(|b| &b.insts).any(|inst| {
        matches!(
            inst,
            LowInst::Call { callee: Callee::Runtime(RuntimeFn::TrapDivisionByZero), .. }
        )
    }));
}

/// S5: an async function awaited through `value()` — the future is
/// created at entry and completed on return.
#[test]
fn async_pipeline_produces_future_wrapper_and_state_machine() {
    let mut f = Fixture::new();
    let future_i64 = f.pool.future(Idx::I64);

    // async fn compute(x: i64) -> i64: return x * 2
    let x = f.expr(ExprKind::Local(LocalId::new(0)), Idx::I64);
    let two = f.expr(ExprKind::Int(2), Idx::I64);
    let doubled = f.expr(ExprKind::Binary { op: BinaryOp::Mul, lhs: x, rhs: two }, Idx::I64);
    let ret = f.stmt(Stmt::Return { value: doubled });
    let compute_body = f.body(&[ret]);
    let compute_locals = vec![f.local("x", Idx::I64)];
    let compute = f.add_function(
        "compute",
        FunctionKind::Async,
        1,
        Idx::I64,
        compute_locals,
        compute_body,
    );

    // async fn pipeline(x: i64) -> i64: return (await compute(x)) + 10
    let x2 = f.expr(ExprKind::Local(LocalId::new(0)), Idx::I64);
    let call_args = f.args(&[x2]);
    let fut = f.expr(ExprKind::StaticCall { function: compute, args: call_args }, future_i64);
    let awaited = f.expr(ExprKind::Await { operand: fut }, Idx::I64);
    let ten = f.expr(ExprKind::Int(10), Idx::I64);
    let sum = f.expr(ExprKind::Binary { op: BinaryOp::Add, lhs: awaited, rhs: ten }, Idx::I64);
    let ret = f.stmt(Stmt::Return { value: sum });
    let pipeline_body = f.body(&[ret]);
    let pipeline_locals = vec![f.local("x", Idx::I64)];
    let pipeline = f.add_function(
        "pipeline",
        FunctionKind::Async,
        1,
        Idx::I64,
        pipeline_locals,
        pipeline_body,
    );

    let compiled = f.compile();

    // Both wrappers return futures created at entry.
    for wrapper_id in [compute, pipeline] {
        let wrapper = compiled.unit.anvil.function(wrapper_id);
        assert!(wrapper.blocks.iter().flat_map(|b| &b.ops).any(|op| {
            matches!(op, Op::FutureNew { .. })
        }));
    }

    // pipeline's resume body registers its continuation and suspends at
    // state 1; compute's resume completes without suspending.
    let resumes: Vec<_> = compiled
        .unit
        .anvil
        .functions
        .iter()
        .filter(|func| func.attrs.contains(FnAttrs::ASYNC))
        .collect();
    assert_eq!(resumes.len(), 2);
    let suspending = resumes.iter().filter(|func| {
        func.blocks.iter().any(|b| {
            matches!(b.terminator, Terminator::AwaitSuspend { next_state: 1, .. })
        })
    });
    assert_eq!(suspending.count(), 1);
    for resume in &resumes {
        assert!(resume.blocks.iter().flat_map(|b| &b.ops).any(|op| {
            matches!(op, Op::FutureComplete { .. })
        }));
    }
}

/// S6: serialization round-trip surface — `to_json` renders fields in
/// declaration order; `from_json` parses and populates by key.
#[test]
fn serialization_round_trip_surface() {
    let mut f = Fixture::new();
    let point = f.add_class("Point", Some(ClassId::new(0)));
    f.module.classes[point.index()].serialization = SerializationPolicy::Json;
    f.add_field(point, "x", Idx::F64);
    f.add_field(point, "y", Idx::F64);

    let compiled = f.compile();

    let to_json = compiled.name("to_json");
    let from_json = compiled.name("from_json");
    let descriptor = compiled.unit.anvil.class(point);
    assert!(descriptor.method(to_json, 0).is_some());
    assert!(descriptor.method(from_json, 1).is_some());

    // `{"x":…,"y":…}` in declaration order.
    let to_json_fn = compiled
        .unit
        .anvil
        .functions
        .iter()
        .find(|func| func.name == to_json)
        .unwrap_or_else(|| panic!("to_json missing"));
    let keys: Vec<&str> = to_json_fn
        .blocks
        .iter()
        .flat_map(|b| &b.ops)
        .filter_map(|op| match op {
            Op::ConstString { value, .. } => Some(compiled.unit.anvil.strings.get(*value)),
            _ => None,
        })
        .collect();
    assert_eq!(keys, vec!["{", "\"x\":", ",\"y\":", "}"]);

    let from_json_fn = compiled
        .unit
        .anvil
        .functions
        .iter()
        .find(|func| func.name == from_json)
        .unwrap_or_else(|| panic!("from_json missing"));
    assert!(from_json_fn.blocks.iter().flat_map(|b| &b.ops).any(|op| {
        matches!(op, Op::JsonParse { .. })
    }));
}

/// The Anvil dump is deterministic across identical compilations.
#[test]
fn dump_is_stable_across_runs() {
    let build = || {
        let mut f = Fixture::new();
        let n = f.expr(ExprKind::Int(41), Idx::I64);
        let one = f.expr(ExprKind::Int(1), Idx::I64);
        let sum = f.expr(ExprKind::Binary { op: BinaryOp::Add, lhs: n, rhs: one }, Idx::I64);
        let ret = f.stmt(Stmt::Return { value: sum });
        let body = f.body(&[ret]);
        f.add_function("answer", FunctionKind::Normal, 0, Idx::I64, vec![], body);
        f.compile().dump()
    };
    assert_eq!(build(), build());
}

/// Resolution failures surface as rendered diagnostics with stable
/// codes.
#[test]
fn duplicate_field_reports_a_diagnostic() {
    let mut f = Fixture::new();
    let animal = f.add_class("Animal", Some(ClassId::new(0)));
    f.add_field(animal, "name", Idx::I64);
    let dog = f.add_class("Dog", Some(animal));
    f.add_field(dog, "name", Idx::I64);

    let diagnostics = f.compile_err();
    assert!(diagnostics.iter().any(|d| d.code == ember_diagnostic::ErrorCode::E0201));
    let rendered = ember_diagnostic::render_all(&diagnostics);
    assert!(rendered.contains("error[E0201] (resolve)"));
}
