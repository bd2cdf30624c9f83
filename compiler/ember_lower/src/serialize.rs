//! Serialization synthesis.
//!
//! Classes with the `serializable: json` policy get two methods:
//!
//! - `to_json(self) -> String` walks the field list in declaration order
//!   (inherited slots first), honoring `@json(name: …)` key overrides and
//!   delegating nested objects through their own `to_json`.
//! - `from_json(s) -> Self` parses the document and populates fields by
//!   key; missing keys and type mismatches trap with
//!   `SerializationError` at the `json_field` site.
//!
//! Both are registered in the class's method table before user bodies
//! lower, so `p.to_json()` and `Point.from_json(s)` resolve like any
//! other method.

use ember_anvil::{Args, BlockId, FnAttrs, FunctionBuilder, Op, Reg, Terminator};
use ember_ir::ast::SerializationPolicy;
use ember_ir::{ClassId, FunctionId, Name};
use ember_resolve::{DispatchMode, FieldSlot, MethodHandle};
use ember_types::{FnEffects, Idx, Tag, TypeFlags};

use crate::{Cx, LowerError};

/// Synthesize serialization methods for every `serializable: json` class.
pub(crate) fn synthesize(cx: &mut Cx<'_>) {
    for class_index in 0..cx.classes.len() {
        if cx.classes[class_index].serialization != SerializationPolicy::Json {
            continue;
        }
        let class_id = cx.classes[class_index].id;

        if cx.classes[class_index].type_param_count > 0 {
            let span = cx
                .ast
                .classes
                .get(class_index)
                .map_or(ember_ir::Span::DUMMY, |c| c.span);
            cx.error(LowerError::Unsupported {
                family: "serialization of generic classes",
                span,
            });
            continue;
        }

        let to_json_fid = build_to_json(cx, class_id);
        let from_json_fid = build_from_json(cx, class_id);
        register(cx, class_id, to_json_fid, from_json_fid);
    }
}

fn register(cx: &mut Cx<'_>, class_id: ClassId, to_json_fid: FunctionId, from_json_fid: FunctionId) {
    let string_ty = cx.string_ty();
    let class_ty = cx.pool.class(class_id);
    let to_json = cx.interner.intern("to_json");
    let from_json = cx.interner.intern("from_json");
    let to_sig = cx.pool.function(&[], string_ty, FnEffects::default());
    let from_sig = cx.pool.function(
        &[string_ty],
        class_ty,
        FnEffects {
            throws: true,
            is_async: false,
        },
    );

    let descriptor = &mut cx.classes[class_id.index()];
    #[allow(
        clippy::cast_possible_truncation,
        reason = "v-table size is bounded by u32 slot indices"
    )]
    let slot = descriptor.vtable.len() as u32;
    descriptor.vtable.push(to_json_fid);
    descriptor.methods.insert(
        (to_json, 0),
        MethodHandle {
            owner: class_id,
            name: to_json,
            arity: 0,
            signature: to_sig,
            function: to_json_fid,
            dispatch: DispatchMode::Virtual,
            vtable_slot: Some(slot),
            throws: Vec::new(),
        },
    );
    let serialization_error = cx.resolution.well_known.serialization_error;
    descriptor.methods.insert(
        (from_json, 1),
        MethodHandle {
            owner: class_id,
            name: from_json,
            arity: 1,
            signature: from_sig,
            function: from_json_fid,
            dispatch: DispatchMode::Static,
            vtable_slot: None,
            throws: vec![serialization_error],
        },
    );
}

/// JSON key for one field: the `@json(name: …)` override or the field
/// name.
fn json_key(cx: &Cx<'_>, field: &FieldSlot) -> Name {
    field.json_key.unwrap_or(field.name)
}

/// `to_json`: concatenate `{"k":v,…}` left to right.
fn build_to_json(cx: &mut Cx<'_>, class_id: ClassId) -> FunctionId {
    let self_ty = cx.pool.class(class_id);
    let string_ty = cx.string_ty();
    let name = cx.interner.intern("to_json");
    let mut fb = FunctionBuilder::new(
        FunctionId::new(u32::MAX),
        name,
        Some(class_id),
        &[self_ty],
        string_ty,
        FnAttrs::SYNTHETIC,
    );
    let entry = BlockId::new(0);

    let fields = cx.classes[class_id.index()].fields.clone();
    let literal = |fb: &mut FunctionBuilder, cx: &mut Cx<'_>, text: &str| -> Reg {
        let id = cx.strings.intern(text);
        let dst = fb.reg(string_ty);
        fb.push(entry, Op::ConstString { dst, value: id });
        dst
    };
    let concat = |fb: &mut FunctionBuilder, lhs: Reg, rhs: Reg| -> Reg {
        let dst = fb.reg(string_ty);
        fb.push(entry, Op::StringConcat { dst, lhs, rhs });
        dst
    };

    let mut acc = literal(&mut fb, cx, "{");
    let mut first = true;
    for field in &fields {
        // Hidden middle-end fields carry no serializable state.
        if cx.interner.lookup(field.name).starts_with('$') {
            continue;
        }
        let key = cx.interner.lookup(json_key(cx, field)).to_owned();
        let prefix = if first {
            format!("\"{key}\":")
        } else {
            format!(",\"{key}\":")
        };
        first = false;
        let prefix_reg = literal(&mut fb, cx, &prefix);
        acc = concat(&mut fb, acc, prefix_reg);

        let self_reg = fb.reg(self_ty);
        fb.push(entry, Op::LoadLocal { dst: self_reg, local: ember_ir::LocalId::new(0) });
        let value = fb.reg(field.ty);
        fb.push(
            entry,
            Op::GetField {
                dst: value,
                object: self_reg,
                class: class_id,
                slot: field.slot,
            },
        );

        let rendered = if cx.pool.flags(field.ty).contains(TypeFlags::IS_PRIMITIVE) {
            let dst = fb.reg(string_ty);
            fb.push(entry, Op::StringFromPrim { dst, src: value });
            dst
        } else if field.ty == string_ty {
            // Strings are quoted verbatim.
            let quote = literal(&mut fb, cx, "\"");
            let quoted = concat(&mut fb, quote, value);
            let close = literal(&mut fb, cx, "\"");
            concat(&mut fb, quoted, close)
        } else if matches!(cx.pool.tag(field.ty), Tag::Class | Tag::GenericInstance) {
            // Nested objects serialize through their own to_json,
            // looked up dynamically so declaration order is irrelevant.
            let to_json = cx.interner.intern("to_json");
            let dst = fb.reg(string_ty);
            fb.push(
                entry,
                Op::CallInterface {
                    dst,
                    receiver: value,
                    name: to_json,
                    args: Args::new(),
                },
            );
            dst
        } else {
            let dst = fb.reg(string_ty);
            let null = cx.strings.intern("null");
            fb.push(entry, Op::ConstString { dst, value: null });
            dst
        };
        acc = concat(&mut fb, acc, rendered);
    }

    let close = literal(&mut fb, cx, "}");
    let result = concat(&mut fb, acc, close);
    fb.terminate(entry, Terminator::Ret { value: Some(result) });
    cx.add_synth(fb.finish())
}

/// `from_json`: parse, allocate, populate by key.
fn build_from_json(cx: &mut Cx<'_>, class_id: ClassId) -> FunctionId {
    let self_ty = cx.pool.class(class_id);
    let string_ty = cx.string_ty();
    let name = cx.interner.intern("from_json");
    let mut fb = FunctionBuilder::new(
        FunctionId::new(u32::MAX),
        name,
        Some(class_id),
        &[string_ty],
        self_ty,
        FnAttrs::SYNTHETIC,
    );
    let entry = BlockId::new(0);

    let source = fb.reg(string_ty);
    fb.push(entry, Op::LoadLocal { dst: source, local: ember_ir::LocalId::new(0) });
    let object_ty = cx.object_ty();
    let doc = fb.reg(object_ty);
    fb.push(entry, Op::JsonParse { dst: doc, src: source });

    let obj = fb.reg(self_ty);
    fb.push(entry, Op::New { dst: obj, class: class_id, args: Args::new() });

    let fields = cx.classes[class_id.index()].fields.clone();
    for field in &fields {
        if cx.interner.lookup(field.name).starts_with('$') {
            continue;
        }
        let key = cx.interner.lookup(json_key(cx, field)).to_owned();
        let key_id = cx.strings.intern(&key);
        let value = fb.reg(field.ty);
        fb.push(entry, Op::JsonField { dst: value, json: doc, key: key_id });
        fb.push(
            entry,
            Op::SetField {
                object: obj,
                class: class_id,
                slot: field.slot,
                value,
            },
        );
    }

    fb.terminate(entry, Terminator::Ret { value: Some(obj) });
    cx.add_synth(fb.finish())
}
