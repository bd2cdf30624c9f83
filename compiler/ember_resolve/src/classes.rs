//! Class descriptor construction.
//!
//! Walks the class list parents-first (memoized recursion), building for
//! each class its inherited-first field list, its (name, arity) method
//! table, and its v-table. Overrides reuse the parent slot; new virtual
//! methods append. Layouts are computed here and stored in the pool.

use ember_ir::ast::{ClassDef, FunctionKind, Module};
use ember_ir::{ClassId, StringInterner};
use ember_types::{layout, FnEffects, Idx, Pool};
use rustc_hash::FxHashMap;

use crate::{ClassDescriptor, DispatchMode, FieldSlot, MethodHandle, ResolveError};

pub(crate) struct ClassBuilder<'a> {
    module: &'a Module,
    pool: &'a mut Pool,
    interner: &'a StringInterner,
    built: Vec<Option<ClassDescriptor>>,
    in_progress: Vec<bool>,
    errors: Vec<ResolveError>,
}

impl<'a> ClassBuilder<'a> {
    pub(crate) fn new(
        module: &'a Module,
        pool: &'a mut Pool,
        interner: &'a StringInterner,
    ) -> Self {
        Self {
            module,
            pool,
            interner,
            built: vec![None; module.classes.len()],
            in_progress: vec![false; module.classes.len()],
            errors: Vec::new(),
        }
    }

    /// Build every descriptor, accumulating errors.
    pub(crate) fn build_all(mut self) -> Result<Vec<ClassDescriptor>, Vec<ResolveError>> {
        // Register nominal info up front so layout/subtype queries during
        // descriptor construction see the whole hierarchy.
        for (i, class) in self.module.classes.iter().enumerate() {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "class count is bounded by u32 ids"
            )]
            let id = ClassId::new(i as u32);
            self.pool.register_class(id, class.name, class.parent);
        }

        for i in 0..self.module.classes.len() {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "class count is bounded by u32 ids"
            )]
            let id = ClassId::new(i as u32);
            self.build(id);
        }

        if self.errors.is_empty() {
            // Every slot is filled once build() has run for every id.
            Ok(self.built.into_iter().flatten().collect())
        } else {
            Err(self.errors)
        }
    }

    /// Ensure the descriptor for `id` exists; parents are built first.
    fn build(&mut self, id: ClassId) -> bool {
        if self.built[id.index()].is_some() {
            return true;
        }
        if self.in_progress[id.index()] {
            let class = self.module.class(id);
            self.errors.push(ResolveError::InheritanceCycle {
                class: class.name,
                span: class.span,
            });
            return false;
        }
        self.in_progress[id.index()] = true;

        let class = self.module.class(id);
        if let Some(parent) = class.parent {
            if !self.build(parent) {
                self.in_progress[id.index()] = false;
                return false;
            }
        }

        let descriptor = self.build_descriptor(id, class);
        self.in_progress[id.index()] = false;
        match descriptor {
            Some(d) => {
                self.built[id.index()] = Some(d);
                true
            }
            None => false,
        }
    }

    /// Build one descriptor; parent (if any) is already built.
    fn build_descriptor(&mut self, id: ClassId, class: &ClassDef) -> Option<ClassDescriptor> {
        let error_count = self.errors.len();

        let (mut fields, mut methods, mut vtable) = match class.parent {
            Some(parent) => {
                let parent_desc = self.built[parent.index()]
                    .as_ref()
                    .unwrap_or_else(|| panic!("parent {parent:?} built before child"));
                (
                    parent_desc.fields.clone(),
                    parent_desc.methods.clone(),
                    parent_desc.vtable.clone(),
                )
            }
            None => (Vec::new(), FxHashMap::default(), Vec::new()),
        };

        self.append_fields(id, class, &mut fields);
        self.append_methods(id, class, &mut methods, &mut vtable);

        if self.errors.len() > error_count {
            return None;
        }

        // Finalize the byte layout and stamp field offsets.
        let field_types: Vec<Idx> = fields.iter().map(|f| f.ty).collect();
        let descriptor_layout = layout::compute(self.pool, class.layout, &field_types);
        for (slot, placed) in fields.iter_mut().zip(&descriptor_layout.fields) {
            slot.offset = placed.offset;
        }
        self.pool.set_layout(id, descriptor_layout);

        tracing::debug!(
            class = self.interner.lookup(class.name),
            fields = fields.len(),
            vtable = vtable.len(),
            "resolved class"
        );

        #[allow(
            clippy::cast_possible_truncation,
            reason = "generic parameter counts are bounded by source arity"
        )]
        Some(ClassDescriptor {
            id,
            name: class.name,
            parent: class.parent,
            layout_kind: class.layout,
            serialization: class.serialization,
            native: class.native.clone(),
            type_param_count: class.type_params.len() as u32,
            fields,
            methods,
            vtable,
        })
    }

    /// Append own fields, reslotting and checking for duplicates.
    fn append_fields(&mut self, id: ClassId, class: &ClassDef, fields: &mut Vec<FieldSlot>) {
        for field in &class.fields {
            if fields.iter().any(|f| f.name == field.name) {
                self.errors.push(ResolveError::DuplicateField {
                    class: class.name,
                    field: field.name,
                    span: field.span,
                });
                continue;
            }
            #[allow(
                clippy::cast_possible_truncation,
                reason = "field count is bounded by u32 slot indices"
            )]
            fields.push(FieldSlot {
                name: field.name,
                ty: Idx::from_type_id(field.ty),
                slot: fields.len() as u32,
                offset: 0, // stamped after layout
                declared_in: id,
                json_key: field.json_key,
            });
        }
    }

    /// Append own methods: overrides reuse the parent v-table slot, new
    /// virtual methods append.
    fn append_methods(
        &mut self,
        id: ClassId,
        class: &ClassDef,
        methods: &mut FxHashMap<(ember_ir::Name, u32), MethodHandle>,
        vtable: &mut Vec<ember_ir::FunctionId>,
    ) {
        let mut own_seen: FxHashMap<(ember_ir::Name, u32), ()> = FxHashMap::default();

        for &fid in &class.methods {
            let func = self.module.function(fid);
            let arity = if func.is_static {
                func.arity
            } else {
                func.arity.saturating_sub(1)
            };

            if own_seen.insert((func.name, arity), ()).is_some() {
                self.errors.push(ResolveError::AmbiguousMethod {
                    class: class.name,
                    method: func.name,
                    span: func.span,
                });
                continue;
            }

            let dispatch = match &func.kind {
                FunctionKind::Native { .. } => DispatchMode::Native,
                FunctionKind::Generator => DispatchMode::Generator,
                FunctionKind::Async => DispatchMode::Async,
                FunctionKind::Normal if func.is_static => DispatchMode::Static,
                FunctionKind::Normal => DispatchMode::Virtual,
            };

            let param_types: Vec<Idx> = func
                .params()
                .iter()
                .skip(usize::from(!func.is_static))
                .map(|p| Idx::from_type_id(p.ty))
                .collect();
            let ret = Idx::from_type_id(func.ret);
            let effects = FnEffects {
                throws: !func.throws.is_empty(),
                is_async: matches!(func.kind, FunctionKind::Async),
            };
            let signature = self.pool.function(&param_types, ret, effects);

            let takes_vtable_slot = !func.is_static && !matches!(dispatch, DispatchMode::Native);
            let vtable_slot = if takes_vtable_slot {
                match methods.get(&(func.name, arity)).and_then(|m| m.vtable_slot) {
                    Some(slot) => {
                        // Override: the signature must stay compatible.
                        let parent = &methods[&(func.name, arity)];
                        if !self.override_compatible(parent.signature, signature) {
                            self.errors.push(ResolveError::IncompatibleOverride {
                                class: class.name,
                                method: func.name,
                                span: func.span,
                            });
                            continue;
                        }
                        vtable[slot as usize] = fid;
                        Some(slot)
                    }
                    None => {
                        #[allow(
                            clippy::cast_possible_truncation,
                            reason = "v-table size is bounded by u32 slot indices"
                        )]
                        let slot = vtable.len() as u32;
                        vtable.push(fid);
                        Some(slot)
                    }
                }
            } else {
                None
            };

            methods.insert(
                (func.name, arity),
                MethodHandle {
                    owner: id,
                    name: func.name,
                    arity,
                    signature,
                    function: fid,
                    dispatch,
                    vtable_slot,
                    throws: func.throws.clone(),
                },
            );
        }
    }

    /// An override is compatible when parameter types match exactly and
    /// the return type is the parent's or a subtype of it.
    fn override_compatible(&self, parent_sig: Idx, child_sig: Idx) -> bool {
        let parent_params = self.pool.function_params(parent_sig);
        let child_params = self.pool.function_params(child_sig);
        if parent_params != child_params {
            return false;
        }
        let parent_ret = self.pool.function_return(parent_sig);
        let child_ret = self.pool.function_return(child_sig);
        self.pool.subtype_of(child_ret, parent_ret)
    }
}
