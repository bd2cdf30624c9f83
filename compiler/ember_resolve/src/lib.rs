//! Symbol resolution for the Ember middle end.
//!
//! Walks the typed AST top-down and produces, per class, a finalized
//! [`ClassDescriptor`] (inherited fields, method table, v-table, layout)
//! and, per function, capture sets for its block literals. The type pool
//! is populated with class names, parent links, and layouts as a side
//! effect; descriptors are immutable once returned.

mod captures;
mod classes;
mod descriptor;
mod error;
mod well_known;

pub use captures::{Capture, CaptureMode, CaptureSet, FunctionInfo};
pub use descriptor::{ClassDescriptor, DispatchMode, FieldSlot, MethodHandle};
pub use error::ResolveError;
pub use well_known::{WellKnown, PRELUDE_CLASS_NAMES};

use ember_ir::ast::Module;
use ember_ir::{ClassId, ExprId, FunctionId, StringInterner};
use ember_types::Pool;
use rustc_hash::FxHashMap;

/// Everything the resolver learned about one compilation unit.
#[derive(Debug)]
pub struct Resolution {
    /// Finalized descriptors, indexed by [`ClassId`].
    pub classes: Vec<ClassDescriptor>,
    /// Per-function slot info, indexed by [`FunctionId`].
    pub functions: Vec<FunctionInfo>,
    /// Capture set for every block literal in the unit.
    pub captures: FxHashMap<ExprId, CaptureSet>,
    /// Handles to the runtime prelude classes.
    pub well_known: WellKnown,
}

impl Resolution {
    /// Look up a class descriptor.
    #[inline]
    pub fn class(&self, id: ClassId) -> &ClassDescriptor {
        &self.classes[id.index()]
    }

    /// Look up per-function info.
    #[inline]
    pub fn function(&self, id: FunctionId) -> &FunctionInfo {
        &self.functions[id.index()]
    }
}

/// Resolve a typed module.
///
/// Populates `pool` with nominal class information and layouts. Errors
/// are accumulated: a failed class does not hide errors in its siblings.
pub fn resolve(
    module: &Module,
    pool: &mut Pool,
    interner: &StringInterner,
) -> Result<Resolution, Vec<ResolveError>> {
    let _span = tracing::debug_span!("resolve", classes = module.classes.len()).entered();

    let well_known = WellKnown::locate(module, interner)?;

    let classes = classes::ClassBuilder::new(module, pool, interner).build_all()?;

    // The root object class anchors common_super for unrelated classes.
    let root_idx = pool.class(well_known.object);
    pool.set_root_class(root_idx);

    let mut captures = FxHashMap::default();
    let functions = module
        .functions
        .iter()
        .map(|func| captures::analyze_function(module, pool, func, &mut captures))
        .collect();

    Ok(Resolution {
        classes,
        functions,
        captures,
        well_known,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_ir::arena::LocalRange;
    use ember_ir::ast::{
        ClassDef, ExprKind, FieldDef, FunctionDef, FunctionKind, LayoutKind, LocalDef,
        SerializationPolicy, Stmt,
    };
    use ember_ir::{Name, Span, StmtRange, TypeId};
    use ember_types::Idx;
    use pretty_assertions::assert_eq;

    /// A module seeded with the runtime prelude classes.
    struct TestModule {
        module: Module,
        interner: StringInterner,
    }

    impl TestModule {
        fn new() -> Self {
            let interner = StringInterner::new();
            let mut module = Module::default();
            for name in PRELUDE_CLASS_NAMES {
                let parent = match *name {
                    "Object" => None,
                    // Exception subclasses chain off Exception (index 2).
                    n if n.ends_with("Error") => Some(ClassId::new(2)),
                    _ => Some(ClassId::new(0)),
                };
                module.classes.push(ClassDef {
                    name: interner.intern(name),
                    parent,
                    type_params: Vec::new(),
                    layout: LayoutKind::Object,
                    serialization: SerializationPolicy::None,
                    native: None,
                    fields: Vec::new(),
                    methods: Vec::new(),
                    span: Span::DUMMY,
                });
            }
            Self { module, interner }
        }

        fn add_class(&mut self, name: &str, parent: Option<ClassId>) -> ClassId {
            let id = ClassId::new(u32::try_from(self.module.classes.len()).unwrap_or(0));
            self.module.classes.push(ClassDef {
                name: self.interner.intern(name),
                parent,
                type_params: Vec::new(),
                layout: LayoutKind::Object,
                serialization: SerializationPolicy::None,
                native: None,
                fields: Vec::new(),
                methods: Vec::new(),
                span: Span::DUMMY,
            });
            id
        }

        fn add_field(&mut self, class: ClassId, name: &str, ty: TypeId) {
            let name = self.interner.intern(name);
            self.module.classes[class.index()].fields.push(FieldDef {
                name,
                ty,
                json_key: None,
                span: Span::DUMMY,
            });
        }

        /// Add an instance method with no parameters beyond the receiver.
        fn add_method(&mut self, class: ClassId, name: &str, ret: TypeId) -> FunctionId {
            let fid = FunctionId::new(u32::try_from(self.module.functions.len()).unwrap_or(0));
            let receiver = LocalDef {
                name: self.interner.intern("self"),
                ty: TypeId::NONE,
                mutable: false,
                span: Span::DUMMY,
            };
            self.module.functions.push(FunctionDef {
                name: self.interner.intern(name),
                owner: Some(class),
                is_static: false,
                kind: FunctionKind::Normal,
                arity: 1,
                ret,
                throws: Vec::new(),
                locals: vec![receiver],
                body: StmtRange::EMPTY,
                span: Span::DUMMY,
            });
            self.module.classes[class.index()].methods.push(fid);
            fid
        }

        fn resolve(&self) -> Result<Resolution, Vec<ResolveError>> {
            let mut pool = Pool::new();
            resolve(&self.module, &mut pool, &self.interner)
        }
    }

    #[test]
    fn prelude_classes_are_located() {
        let t = TestModule::new();
        let resolution = t.resolve().unwrap_or_else(|e| panic!("{e:?}"));
        assert_eq!(resolution.well_known.object, ClassId::new(0));
        assert_eq!(resolution.well_known.string, ClassId::new(1));
        assert_eq!(resolution.well_known.exception, ClassId::new(2));
    }

    #[test]
    fn missing_prelude_class_is_fatal() {
        let interner = StringInterner::new();
        let module = Module::default();
        let mut pool = Pool::new();
        let err = resolve(&module, &mut pool, &interner);
        assert!(matches!(
            err,
            Err(ref errors) if errors
                .iter()
                .any(|e| matches!(e, ResolveError::MissingRuntimeClass { name: "Object" }))
        ));
    }

    #[test]
    fn fields_inherit_parent_slots_first() {
        let mut t = TestModule::new();
        let animal = t.add_class("Animal", Some(ClassId::new(0)));
        t.add_field(animal, "name", Idx::I64.type_id());
        let dog = t.add_class("Dog", Some(animal));
        t.add_field(dog, "breed", Idx::I64.type_id());

        let resolution = t.resolve().unwrap_or_else(|e| panic!("{e:?}"));
        let dog_desc = resolution.class(dog);
        assert_eq!(dog_desc.fields.len(), 2);
        assert_eq!(dog_desc.fields[0].slot, 0);
        assert_eq!(dog_desc.fields[0].declared_in, animal);
        assert_eq!(dog_desc.fields[1].slot, 1);
        assert_eq!(dog_desc.fields[1].declared_in, dog);
    }

    #[test]
    fn duplicate_field_is_fatal() {
        let mut t = TestModule::new();
        let animal = t.add_class("Animal", Some(ClassId::new(0)));
        t.add_field(animal, "name", Idx::I64.type_id());
        let dog = t.add_class("Dog", Some(animal));
        t.add_field(dog, "name", Idx::I64.type_id());

        let err = t.resolve();
        assert!(matches!(
            err,
            Err(ref errors) if errors
                .iter()
                .any(|e| matches!(e, ResolveError::DuplicateField { .. }))
        ));
    }

    #[test]
    fn overrides_reuse_vtable_slot() {
        let mut t = TestModule::new();
        let animal = t.add_class("Animal", Some(ClassId::new(0)));
        let animal_speak = t.add_method(animal, "speak", Idx::NIL.type_id());
        let dog = t.add_class("Dog", Some(animal));
        let dog_speak = t.add_method(dog, "speak", Idx::NIL.type_id());
        let cat = t.add_class("Cat", Some(animal));

        let resolution = t.resolve().unwrap_or_else(|e| panic!("{e:?}"));
        let speak = t.interner.get("speak").unwrap_or_default();

        let animal_slot = resolution.class(animal).method(speak, 0).and_then(|m| m.vtable_slot);
        let dog_slot = resolution.class(dog).method(speak, 0).and_then(|m| m.vtable_slot);
        let cat_slot = resolution.class(cat).method(speak, 0).and_then(|m| m.vtable_slot);

        // Dispatch stability: the slot is identical in every subclass.
        assert_eq!(animal_slot, dog_slot);
        assert_eq!(animal_slot, cat_slot);

        // The tables point at the right bodies.
        let slot = animal_slot.unwrap_or_default() as usize;
        assert_eq!(resolution.class(animal).vtable[slot], animal_speak);
        assert_eq!(resolution.class(dog).vtable[slot], dog_speak);
        assert_eq!(resolution.class(cat).vtable[slot], animal_speak);
    }

    #[test]
    fn new_virtual_methods_append() {
        let mut t = TestModule::new();
        let animal = t.add_class("Animal", Some(ClassId::new(0)));
        t.add_method(animal, "speak", Idx::NIL.type_id());
        let dog = t.add_class("Dog", Some(animal));
        t.add_method(dog, "fetch", Idx::NIL.type_id());

        let resolution = t.resolve().unwrap_or_else(|e| panic!("{e:?}"));
        let fetch = t.interner.get("fetch").unwrap_or_default();
        let handle = resolution.class(dog).method(fetch, 0);
        assert_eq!(handle.and_then(|m| m.vtable_slot), Some(1));
        assert_eq!(resolution.class(animal).vtable.len(), 1);
        assert_eq!(resolution.class(dog).vtable.len(), 2);
    }

    #[test]
    fn ambiguous_method_is_fatal() {
        let mut t = TestModule::new();
        let animal = t.add_class("Animal", Some(ClassId::new(0)));
        t.add_method(animal, "speak", Idx::NIL.type_id());
        t.add_method(animal, "speak", Idx::I64.type_id());

        let err = t.resolve();
        assert!(matches!(
            err,
            Err(ref errors) if errors
                .iter()
                .any(|e| matches!(e, ResolveError::AmbiguousMethod { .. }))
        ));
    }

    #[test]
    fn inheritance_cycle_is_fatal() {
        let mut t = TestModule::new();
        let a = t.add_class("A", None);
        let b = t.add_class("B", Some(a));
        t.module.classes[a.index()].parent = Some(b);

        let err = t.resolve();
        assert!(matches!(
            err,
            Err(ref errors) if errors
                .iter()
                .any(|e| matches!(e, ResolveError::InheritanceCycle { .. }))
        ));
    }

    #[test]
    fn captures_classify_copy_and_cell() {
        let mut t = TestModule::new();

        // fn outer():
        //   let a: i64 (immutable)       -> by-copy
        //   let b: i64 (mutable)         -> by-cell
        //   let block = do || : a + b
        let arena = &mut t.module.arena;
        let a = LocalDef {
            name: t.interner.intern("a"),
            ty: Idx::I64.type_id(),
            mutable: false,
            span: Span::DUMMY,
        };
        let b = LocalDef {
            name: t.interner.intern("b"),
            ty: Idx::I64.type_id(),
            mutable: true,
            span: Span::DUMMY,
        };
        let a_id = ember_ir::LocalId::new(0);
        let b_id = ember_ir::LocalId::new(1);

        let read_a = arena.push_expr(ExprKind::Local(a_id), Idx::I64.type_id(), Span::DUMMY);
        let read_b = arena.push_expr(ExprKind::Local(b_id), Idx::I64.type_id(), Span::DUMMY);
        let sum = arena.push_expr(
            ExprKind::Binary {
                op: ember_ir::ast::BinaryOp::Add,
                lhs: read_a,
                rhs: read_b,
            },
            Idx::I64.type_id(),
            Span::DUMMY,
        );
        let ret = arena.push_stmt(Stmt::Return { value: sum }, Span::DUMMY);
        let block_body = arena.alloc_stmt_list(&[ret]);
        let block = arena.push_expr(
            ExprKind::Block {
                params: LocalRange::EMPTY,
                body: block_body,
            },
            TypeId::NONE,
            Span::DUMMY,
        );
        let block_stmt = arena.push_stmt(Stmt::Expr(block), Span::DUMMY);
        let body = arena.alloc_stmt_list(&[block_stmt]);

        t.module.functions.push(FunctionDef {
            name: t.interner.intern("outer"),
            owner: None,
            is_static: true,
            kind: FunctionKind::Normal,
            arity: 0,
            ret: Idx::NIL.type_id(),
            throws: Vec::new(),
            locals: vec![a, b],
            body,
            span: Span::DUMMY,
        });

        let resolution = t.resolve().unwrap_or_else(|e| panic!("{e:?}"));
        let set = &resolution.captures[&block];
        assert_eq!(
            set.as_slice(),
            &[
                Capture {
                    local: a_id,
                    mode: CaptureMode::ByCopy
                },
                Capture {
                    local: b_id,
                    mode: CaptureMode::ByCell
                },
            ]
        );

        // Only the by-cell local needs a frame cell.
        let info = resolution.function(FunctionId::new(0));
        assert_eq!(info.cells, vec![false, true]);
    }
}
