//! Typed AST → Anvil lowering.
//!
//! Lowering proceeds function by function. Expression lowering returns an
//! Anvil register and the current block; statements thread the current
//! block through. Everything the object model needs — dispatch choice,
//! erased generic access with automatic boxing, closure classes,
//! generator/async state machines, finally duplication, FFI thunks,
//! serialization methods — is decided here, so the Anvil → LowIR step
//! stays mechanical.

mod closures;
mod coroutine;
mod error;
mod expr;
mod ffi;
mod func;
mod patterns;
mod serialize;
mod stmt;

pub use error::LowerError;

use ember_anvil::{AnvilFunction, AnvilModule, StringPool};
use ember_ir::ast::{FunctionKind, Module};
use ember_ir::{ClassId, FunctionId, StringInterner};
use ember_resolve::{ClassDescriptor, Resolution};
use ember_types::{Idx, Pool};

/// Module-level lowering context, shared by every function lowerer.
///
/// Owns the growing class table (resolver classes plus synthesized
/// closure/state-machine classes), the string pool, and the synthesized
/// function list.
pub(crate) struct Cx<'a> {
    pub ast: &'a Module,
    pub resolution: &'a Resolution,
    pub pool: &'a mut Pool,
    pub interner: &'a StringInterner,
    pub classes: Vec<ClassDescriptor>,
    pub strings: StringPool,
    pub synth: Vec<AnvilFunction>,
    pub ast_count: u32,
    pub errors: Vec<LowerError>,
}

impl<'a> Cx<'a> {
    /// The id the next synthesized function will occupy.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "function count is bounded by u32 ids"
    )]
    pub fn next_synth_id(&self) -> FunctionId {
        FunctionId::new(self.ast_count + self.synth.len() as u32)
    }

    /// Append a synthesized function, assigning its final id.
    pub fn add_synth(&mut self, mut function: AnvilFunction) -> FunctionId {
        let id = self.next_synth_id();
        function.id = id;
        self.synth.push(function);
        id
    }

    /// Append a synthesized class, registering it in the pool.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "class count is bounded by u32 ids"
    )]
    pub fn add_class(&mut self, mut descriptor: ClassDescriptor) -> ClassId {
        let id = ClassId::new(self.classes.len() as u32);
        descriptor.id = id;
        self.pool
            .register_class(id, descriptor.name, descriptor.parent);
        self.classes.push(descriptor);
        id
    }

    pub fn class(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id.index()]
    }

    pub fn error(&mut self, error: LowerError) {
        self.errors.push(error);
    }

    /// The interned type of the runtime string class.
    pub fn string_ty(&mut self) -> Idx {
        let string = self.resolution.well_known.string;
        self.pool.class(string)
    }

    /// The interned type of the root object class.
    pub fn object_ty(&mut self) -> Idx {
        let object = self.resolution.well_known.object;
        self.pool.class(object)
    }

    /// The interned type of the boxed-primitive wrapper class.
    pub fn boxed_ty(&mut self) -> Idx {
        let boxed = self.resolution.well_known.boxed;
        self.pool.class(boxed)
    }
}

/// Lower a resolved module into a fresh Anvil module.
///
/// The source module and resolution are immutable for the duration; the
/// pool gains interned types for synthesized classes. Errors accumulate
/// across functions.
pub fn lower_module(
    ast: &Module,
    resolution: &Resolution,
    pool: &mut Pool,
    interner: &StringInterner,
) -> Result<AnvilModule, Vec<LowerError>> {
    let _span = tracing::debug_span!("lower", functions = ast.functions.len()).entered();

    #[allow(
        clippy::cast_possible_truncation,
        reason = "function count is bounded by u32 ids"
    )]
    let mut cx = Cx {
        ast,
        resolution,
        pool,
        interner,
        classes: resolution.classes.clone(),
        strings: StringPool::new(),
        synth: Vec::new(),
        ast_count: ast.functions.len() as u32,
        errors: Vec::new(),
    };

    // Classes that define `dispose` get the idempotence flag field.
    func::add_dispose_flags(&mut cx);

    // Serialization methods are synthesized first so user bodies can
    // resolve `to_json` / `from_json` through the method tables.
    serialize::synthesize(&mut cx);

    let mut lowered: Vec<Option<AnvilFunction>> = Vec::with_capacity(ast.functions.len());
    for (index, def) in ast.functions.iter().enumerate() {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "function count is bounded by u32 ids"
        )]
        let fid = FunctionId::new(index as u32);
        let function = match &def.kind {
            FunctionKind::Normal => func::lower_function(&mut cx, fid, def),
            FunctionKind::Native { .. } => ffi::lower_thunk(&mut cx, fid, def),
            FunctionKind::Generator | FunctionKind::Async => {
                coroutine::lower_coroutine(&mut cx, fid, def)
            }
        };
        lowered.push(Some(function));
    }

    if !cx.errors.is_empty() {
        return Err(cx.errors);
    }

    let mut functions: Vec<AnvilFunction> = lowered.into_iter().flatten().collect();
    functions.extend(cx.synth);

    Ok(AnvilModule {
        functions,
        classes: cx.classes,
        strings: cx.strings,
        entry: ast.entry,
    })
}
