//! Deterministic textual listing of an Anvil module.
//!
//! One header line per function with its signature, one line per basic
//! block with its label, indented opcode lines with typed operands. The
//! output is stable across runs of the same input: ids are dense and
//! allocation-ordered, and nothing iterates a hash map.

use std::fmt::Write as _;

use ember_ir::StringInterner;
use ember_types::Pool;

use crate::{AnvilFunction, AnvilModule, Op, Terminator};

/// Render a whole module.
pub fn dump_module(module: &AnvilModule, pool: &Pool, interner: &StringInterner) -> String {
    let mut out = String::new();
    for function in &module.functions {
        dump_function(module, function, pool, interner, &mut out);
        out.push('\n');
    }
    out
}

/// Render one function into `out`.
pub fn dump_function(
    module: &AnvilModule,
    func: &AnvilFunction,
    pool: &Pool,
    interner: &StringInterner,
    out: &mut String,
) {
    let params = func
        .params
        .iter()
        .map(|&p| pool.format(p, interner))
        .collect::<Vec<_>>()
        .join(", ");
    let mut attrs = String::new();
    if func.attrs.contains(crate::FnAttrs::GENERATOR) {
        attrs.push_str(" generator");
    }
    if func.attrs.contains(crate::FnAttrs::ASYNC) {
        attrs.push_str(" async");
    }
    if func.attrs.contains(crate::FnAttrs::NATIVE_THUNK) {
        attrs.push_str(" native_thunk");
    }
    let _ = writeln!(
        out,
        "fn @{} {}({}) -> {}{} {{",
        func.id.raw(),
        interner.lookup(func.name),
        params,
        pool.format(func.ret, interner),
        attrs
    );

    for block in &func.blocks {
        if block.params.is_empty() {
            let _ = writeln!(out, "{}:", block.id);
        } else {
            let params = block
                .params
                .iter()
                .map(|&r| format!("{}: {}", r, pool.format(func.reg_type(r), interner)))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "{}({}):", block.id, params);
        }
        for op in &block.ops {
            let _ = writeln!(out, "  {}", render_op(module, func, op, pool, interner));
        }
        let _ = writeln!(out, "  {}", render_terminator(&block.terminator));
    }

    for region in &func.try_regions {
        let catches = region
            .catches
            .iter()
            .map(|&(class, handler)| {
                let name = pool
                    .class_name(class)
                    .map_or_else(|| format!("class#{}", class.raw()), |n| {
                        interner.lookup(n).to_owned()
                    });
                format!("{name} -> {handler}")
            })
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(out, "  try {}..{} catch {}", region.first, region.last, catches);
    }

    out.push('}');
    out.push('\n');
}

/// `dst = mnemonic operands : type`, or `mnemonic operands` for ops with
/// no result.
fn render_op(
    module: &AnvilModule,
    func: &AnvilFunction,
    op: &Op,
    pool: &Pool,
    interner: &StringInterner,
) -> String {
    let operands = render_operands(module, op, interner);
    match op.defined_reg() {
        Some(dst) => {
            let ty = pool.format(func.reg_type(dst), interner);
            if operands.is_empty() {
                format!("{dst} = {} : {ty}", op.mnemonic())
            } else {
                format!("{dst} = {} {operands} : {ty}", op.mnemonic())
            }
        }
        None => {
            if operands.is_empty() {
                op.mnemonic().to_owned()
            } else {
                format!("{} {operands}", op.mnemonic())
            }
        }
    }
}

/// Distinctive operand text per opcode (registers, immediates, handles).
fn render_operands(module: &AnvilModule, op: &Op, interner: &StringInterner) -> String {
    let regs = |rs: &[crate::Reg]| {
        rs.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    };

    match op {
        Op::LoadLocal { local, .. } => format!("local{}", local.raw()),
        Op::StoreLocal { local, src } => format!("local{}, {src}", local.raw()),
        Op::ConstInt { value, .. } => value.to_string(),
        Op::ConstFloat { bits, .. } => format!("{}", f32::from_bits(*bits)),
        Op::ConstDouble { bits, .. } => format!("{}", f64::from_bits(*bits)),
        Op::ConstString { value, .. } => format!("{value} {:?}", module.strings.get(*value)),
        Op::ConstNil { .. } => String::new(),
        Op::ConstClass { class, .. } => format!("class#{}", class.raw()),
        Op::ConstMethod { function, .. } => format!("@{}", function.raw()),

        Op::ICmp { cmp, lhs, rhs, .. } | Op::FCmp { cmp, lhs, rhs, .. } => {
            format!("{} {lhs}, {rhs}", cmp.mnemonic())
        }

        Op::New { class, args, .. } => {
            if args.is_empty() {
                format!("class#{}", class.raw())
            } else {
                format!("class#{}, {}", class.raw(), regs(args))
            }
        }
        Op::GetField { object, class, slot, .. } => {
            format!("{object}, class#{}.{slot}", class.raw())
        }
        Op::SetField {
            object,
            class,
            slot,
            value,
        } => format!("{object}, class#{}.{slot}, {value}", class.raw()),
        Op::LoadErased {
            object, class, slot, ..
        } => format!("{object}, class#{}.{slot}", class.raw()),
        Op::StoreErased {
            object,
            class,
            slot,
            value,
        } => format!("{object}, class#{}.{slot}, {value}", class.raw()),
        Op::CallStatic { function, args, .. } => {
            if args.is_empty() {
                format!("@{}", function.raw())
            } else {
                format!("@{}, {}", function.raw(), regs(args))
            }
        }
        Op::CallVirtual {
            receiver,
            class,
            slot,
            args,
            ..
        } => {
            let mut s = format!("{receiver}, class#{}[{slot}]", class.raw());
            if !args.is_empty() {
                let _ = write!(s, ", {}", regs(args));
            }
            s
        }
        Op::CallInterface {
            receiver,
            name,
            args,
            ..
        } => {
            let mut s = format!("{receiver}, {:?}/{}", interner.lookup(*name), args.len());
            if !args.is_empty() {
                let _ = write!(s, ", {}", regs(args));
            }
            s
        }
        Op::CallNative { function, args, .. } => {
            if args.is_empty() {
                format!("@{}", function.raw())
            } else {
                format!("@{}, {}", function.raw(), regs(args))
            }
        }
        Op::InstanceOf { object, class, .. } | Op::RefCast { src: object, class, .. } => {
            format!("{object}, class#{}", class.raw())
        }
        Op::Unbox { src, class, .. } => format!("{src}, class#{}", class.raw()),
        Op::JsonField { json, key, .. } => {
            format!("{json}, {key} {:?}", module.strings.get(*key))
        }
        Op::TupleGet { tuple, index, .. } => format!("{tuple}.{index}"),
        Op::ArrayNew { len, .. } => format!("len {len}"),
        Op::HashNew { .. } => String::new(),

        // Everything else renders its used registers in order.
        _ => regs(&op.used_regs()),
    }
}

fn render_terminator(terminator: &Terminator) -> String {
    match terminator {
        Terminator::Ret { value: Some(v) } => format!("ret {v}"),
        Terminator::Ret { value: None } => "ret".to_owned(),
        Terminator::Jump { target, args } => {
            if args.is_empty() {
                format!("jump {target}")
            } else {
                let args = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("jump {target}({args})")
            }
        }
        Terminator::CondJump {
            cond,
            then_block,
            else_block,
        } => format!("cond_jump {cond}, {then_block}, {else_block}"),
        Terminator::Switch {
            scrutinee,
            cases,
            default,
        } => {
            let cases = cases
                .iter()
                .map(|(v, b)| format!("{v} -> {b}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("switch {scrutinee} [{cases}] default {default}")
        }
        Terminator::Throw { value } => format!("throw {value}"),
        Terminator::AwaitSuspend { future, next_state } => {
            format!("await_suspend {future}, state {next_state}")
        }
        Terminator::YieldSuspend { value, next_state } => {
            format!("yield_suspend {value}, state {next_state}")
        }
        Terminator::Trap { class } => format!("trap class#{}", class.raw()),
        Terminator::Unreachable => "unreachable".to_owned(),
    }
}
