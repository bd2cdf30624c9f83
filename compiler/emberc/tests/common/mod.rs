//! Typed-AST construction helpers for pipeline tests.
//!
//! The middle end's input normally comes from the front end; tests build
//! the same structures by hand, seeded with the runtime prelude classes
//! every compilation unit carries.

#![allow(dead_code)] // each scenario file uses a subset of the helpers

use ember_ir::ast::{
    ClassDef, ExprKind, FieldDef, FunctionDef, FunctionKind, LayoutKind, LocalDef, Module,
    SerializationPolicy, Stmt,
};
use ember_ir::{
    ClassId, ExprId, ExprRange, FunctionId, Span, StmtId, StmtRange, StringInterner,
};
use ember_resolve::PRELUDE_CLASS_NAMES;
use ember_types::{Idx, Pool};

pub struct Fixture {
    pub module: Module,
    pub interner: StringInterner,
    pub pool: Pool,
}

impl Fixture {
    pub fn new() -> Self {
        let interner = StringInterner::new();
        let mut module = Module::default();
        for name in PRELUDE_CLASS_NAMES {
            let parent = match *name {
                "Object" => None,
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
        Self {
            module,
            interner,
            pool: Pool::new(),
        }
    }

    pub fn string_ty(&mut self) -> Idx {
        self.pool.class(ClassId::new(1))
    }

    pub fn add_class(&mut self, name: &str, parent: Option<ClassId>) -> ClassId {
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

    pub fn add_field(&mut self, class: ClassId, name: &str, ty: Idx) {
        let name = self.interner.intern(name);
        self.module.classes[class.index()].fields.push(FieldDef {
            name,
            ty: ty.type_id(),
            json_key: None,
            span: Span::DUMMY,
        });
    }

    pub fn expr(&mut self, kind: ExprKind, ty: Idx) -> ExprId {
        self.module.arena.push_expr(kind, ty.type_id(), Span::DUMMY)
    }

    pub fn stmt(&mut self, stmt: Stmt) -> StmtId {
        self.module.arena.push_stmt(stmt, Span::DUMMY)
    }

    pub fn body(&mut self, stmts: &[StmtId]) -> StmtRange {
        self.module.arena.alloc_stmt_list(stmts)
    }

    pub fn args(&mut self, exprs: &[ExprId]) -> ExprRange {
        self.module.arena.alloc_expr_list(exprs)
    }

    pub fn local(&self, name: &str, ty: Idx) -> LocalDef {
        LocalDef {
            name: self.interner.intern(name),
            ty: ty.type_id(),
            mutable: false,
            span: Span::DUMMY,
        }
    }

    pub fn add_function(
        &mut self,
        name: &str,
        kind: FunctionKind,
        arity: u32,
        ret: Idx,
        locals: Vec<LocalDef>,
        body: StmtRange,
    ) -> FunctionId {
        let id = FunctionId::new(u32::try_from(self.module.functions.len()).unwrap_or(0));
        self.module.functions.push(FunctionDef {
            name: self.interner.intern(name),
            owner: None,
            is_static: true,
            kind,
            arity,
            ret: ret.type_id(),
            throws: Vec::new(),
            locals,
            body,
            span: Span::DUMMY,
        });
        id
    }

    /// Add an instance method; the receiver slot is typed to the class.
    pub fn add_method(
        &mut self,
        class: ClassId,
        name: &str,
        extra_params: &[(&str, Idx)],
        ret: Idx,
        extra_locals: Vec<LocalDef>,
        body: StmtRange,
    ) -> FunctionId {
        let id = FunctionId::new(u32::try_from(self.module.functions.len()).unwrap_or(0));
        let receiver_ty = self.pool.class(class);
        let mut locals = vec![LocalDef {
            name: self.interner.intern("self"),
            ty: receiver_ty.type_id(),
            mutable: false,
            span: Span::DUMMY,
        }];
        for (pname, pty) in extra_params {
            locals.push(self.local(pname, *pty));
        }
        locals.extend(extra_locals);

        self.module.functions.push(FunctionDef {
            name: self.interner.intern(name),
            owner: Some(class),
            is_static: false,
            kind: FunctionKind::Normal,
            arity: 1 + u32::try_from(extra_params.len()).unwrap_or(0),
            ret: ret.type_id(),
            throws: Vec::new(),
            locals,
            body,
            span: Span::DUMMY,
        });
        self.module.classes[class.index()].methods.push(id);
        id
    }

    /// Run the whole middle end; panic with rendered diagnostics on
    /// failure.
    pub fn compile(mut self) -> Compiled {
        let result = emberc::compile_module(&self.module, &mut self.pool, &self.interner);
        match result {
            Ok(unit) => Compiled {
                unit,
                pool: self.pool,
                interner: self.interner,
            },
            Err(diagnostics) => {
                panic!("{}", ember_diagnostic::render_all(&diagnostics))
            }
        }
    }

    /// Run the middle end expecting failure.
    pub fn compile_err(mut self) -> Vec<ember_diagnostic::Diagnostic> {
        match emberc::compile_module(&self.module, &mut self.pool, &self.interner) {
            Ok(_) => panic!("expected compilation to fail"),
            Err(diagnostics) => diagnostics,
        }
    }
}

pub struct Compiled {
    pub unit: emberc::CompiledUnit,
    pub pool: Pool,
    pub interner: StringInterner,
}

impl Compiled {
    pub fn dump(&self) -> String {
        emberc::dump_anvil(&self.unit, &self.pool, &self.interner)
    }

    pub fn name(&self, text: &str) -> ember_ir::Name {
        self.interner.get(text).unwrap_or_default()
    }
}

