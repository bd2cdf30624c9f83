//! Closure capture analysis.
//!
//! For every block expression in a function body, compute its free
//! variables and classify each one:
//!
//! - *by-copy*: immutable primitive locals; the closure stores the value.
//! - *by-cell*: mutable locals and reference-typed locals; the closure
//!   stores a heap cell shared with the enclosing frame, so mutation
//!   after closure creation stays visible.
//!
//! Locals captured by-cell are flagged on the enclosing function: they
//! must live in their cell from frame entry onward.

use ember_ir::ast::{ExprKind, FunctionDef, Module, Stmt};
use ember_ir::{ExprId, LocalId, StmtRange};
use ember_types::{Idx, Pool};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// How one free variable is captured.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    /// Value copied into the capture class at creation.
    ByCopy,
    /// Heap cell shared between frame and closure.
    ByCell,
}

/// One captured variable of a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capture {
    pub local: LocalId,
    pub mode: CaptureMode,
}

/// Captured variables of one block, ordered by local id for determinism.
pub type CaptureSet = SmallVec<[Capture; 4]>;

/// Per-function slot information.
#[derive(Clone, Debug, Default)]
pub struct FunctionInfo {
    /// `cells[local]` is true when the local is captured by-cell by some
    /// block and must be allocated as a heap cell at frame entry.
    pub cells: Vec<bool>,
}

/// Analyze one function, recording capture sets for every block literal
/// it contains.
pub(crate) fn analyze_function(
    module: &Module,
    pool: &Pool,
    func: &FunctionDef,
    captures: &mut FxHashMap<ExprId, CaptureSet>,
) -> FunctionInfo {
    let mut info = FunctionInfo {
        cells: vec![false; func.locals.len()],
    };
    let mut finder = BlockFinder {
        module,
        pool,
        func,
        captures,
        info: &mut info,
    };
    finder.walk_stmts(func.body);
    info
}

/// Walks a body looking for block literals.
struct BlockFinder<'a> {
    module: &'a Module,
    pool: &'a Pool,
    func: &'a FunctionDef,
    captures: &'a mut FxHashMap<ExprId, CaptureSet>,
    info: &'a mut FunctionInfo,
}

impl BlockFinder<'_> {
    fn walk_stmts(&mut self, range: StmtRange) {
        let arena = &self.module.arena;
        for &sid in arena.stmt_ids(range) {
            match *arena.stmt(sid) {
                Stmt::Expr(e)
                | Stmt::Let { value: e, .. }
                | Stmt::AssignLocal { value: e, .. }
                | Stmt::Throw { value: e }
                | Stmt::Yield { value: e } => self.walk_expr(e),
                Stmt::Return { value } => {
                    if value.is_valid() {
                        self.walk_expr(value);
                    }
                }
                Stmt::AssignField { object, value, .. }
                | Stmt::AssignIndex {
                    object,
                    index: _,
                    value,
                } => {
                    self.walk_expr(object);
                    self.walk_expr(value);
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.walk_expr(cond);
                    self.walk_stmts(then_body);
                    self.walk_stmts(else_body);
                }
                Stmt::While { cond, body } => {
                    self.walk_expr(cond);
                    self.walk_stmts(body);
                }
                Stmt::For {
                    iterable, body, ..
                } => {
                    self.walk_expr(iterable);
                    self.walk_stmts(body);
                }
                Stmt::Match { scrutinee, arms } => {
                    self.walk_expr(scrutinee);
                    for &arm in arena.arms(arms) {
                        if arm.guard.is_valid() {
                            self.walk_expr(arm.guard);
                        }
                        self.walk_stmts(arm.body);
                    }
                }
                Stmt::Try {
                    body,
                    catches,
                    finally,
                } => {
                    self.walk_stmts(body);
                    for &clause in arena.catches(catches) {
                        self.walk_stmts(clause.body);
                    }
                    self.walk_stmts(finally);
                }
                Stmt::Using { value, body, .. } => {
                    self.walk_expr(value);
                    self.walk_stmts(body);
                }
                Stmt::Break | Stmt::Continue => {}
            }
        }
    }

    fn walk_expr(&mut self, expr: ExprId) {
        let arena = &self.module.arena;
        match *arena.kind(expr) {
            ExprKind::Block { params, body } => {
                let set = self.collect_captures(params, body);
                for capture in &set {
                    if capture.mode == CaptureMode::ByCell {
                        self.info.cells[capture.local.index()] = true;
                    }
                }
                self.captures.insert(expr, set);
                // Nested blocks get their own (inner-relative) sets.
                self.walk_stmts(body);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Cast { operand }
            | ExprKind::Await { operand }
            | ExprKind::ChannelNew { capacity: operand }
            | ExprKind::ThreadSpawn { closure: operand } => self.walk_expr(operand),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logic { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            ExprKind::FieldGet { object, .. }
            | ExprKind::Length { object }
            | ExprKind::TupleGet { tuple: object, .. } => self.walk_expr(object),
            ExprKind::Index { object, index } => {
                self.walk_expr(object);
                self.walk_expr(index);
            }
            ExprKind::RangeLit { start, end } => {
                self.walk_expr(start);
                self.walk_expr(end);
            }
            ExprKind::New { args, .. }
            | ExprKind::StaticCall { args, .. }
            | ExprKind::ClassCall { args, .. }
            | ExprKind::ArrayLit { elems: args }
            | ExprKind::TupleLit { elems: args }
            | ExprKind::Interp { parts: args } => {
                for &arg in arena.exprs(args) {
                    self.walk_expr(arg);
                }
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.walk_expr(receiver);
                for &arg in arena.exprs(args) {
                    self.walk_expr(arg);
                }
            }
            ExprKind::BlockCall { callee, args } => {
                self.walk_expr(callee);
                for &arg in arena.exprs(args) {
                    self.walk_expr(arg);
                }
            }
            ExprKind::HashLit { entries } => {
                for &entry in arena.entries(entries) {
                    self.walk_expr(entry.key);
                    self.walk_expr(entry.value);
                }
            }
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Str(_)
            | ExprKind::Nil
            | ExprKind::Local(_)
            | ExprKind::Error => {}
        }
    }

    /// Free variables of one block: locals used in the body minus locals
    /// bound within it (parameters, `let`s, loop/catch bindings).
    fn collect_captures(
        &self,
        params: ember_ir::arena::LocalRange,
        body: StmtRange,
    ) -> CaptureSet {
        let mut used = FxHashSet::default();
        let mut bound: FxHashSet<LocalId> = params.iter().collect();
        let mut scan = CaptureScan {
            module: self.module,
            used: &mut used,
            bound: &mut bound,
        };
        scan.scan_stmts(body);

        let mut free: Vec<LocalId> = used.difference(&bound).copied().collect();
        free.sort_unstable();

        free.into_iter()
            .map(|local| {
                let def = &self.func.locals[local.index()];
                let ty = Idx::from_type_id(def.ty);
                let mode = if def.mutable || self.pool.is_reference(ty) {
                    CaptureMode::ByCell
                } else {
                    CaptureMode::ByCopy
                };
                Capture { local, mode }
            })
            .collect()
    }
}

/// Collects used and bound locals inside one block body.
struct CaptureScan<'a> {
    module: &'a Module,
    used: &'a mut FxHashSet<LocalId>,
    bound: &'a mut FxHashSet<LocalId>,
}

impl CaptureScan<'_> {
    fn scan_stmts(&mut self, range: StmtRange) {
        let arena = &self.module.arena;
        for &sid in arena.stmt_ids(range) {
            match *arena.stmt(sid) {
                Stmt::Expr(e) | Stmt::Throw { value: e } | Stmt::Yield { value: e } => {
                    self.scan_expr(e);
                }
                Stmt::Let { local, value } => {
                    self.scan_expr(value);
                    self.bound.insert(local);
                }
                Stmt::AssignLocal { local, value } => {
                    self.scan_expr(value);
                    self.used.insert(local);
                }
                Stmt::Return { value } => {
                    if value.is_valid() {
                        self.scan_expr(value);
                    }
                }
                Stmt::AssignField { object, value, .. } => {
                    self.scan_expr(object);
                    self.scan_expr(value);
                }
                Stmt::AssignIndex {
                    object,
                    index,
                    value,
                } => {
                    self.scan_expr(object);
                    self.scan_expr(index);
                    self.scan_expr(value);
                }
                Stmt::If {
                    cond,
                    then_body,
                    else_body,
                } => {
                    self.scan_expr(cond);
                    self.scan_stmts(then_body);
                    self.scan_stmts(else_body);
                }
                Stmt::While { cond, body } => {
                    self.scan_expr(cond);
                    self.scan_stmts(body);
                }
                Stmt::For {
                    binding,
                    iterable,
                    body,
                } => {
                    self.scan_expr(iterable);
                    self.bound.insert(binding);
                    self.scan_stmts(body);
                }
                Stmt::Match { scrutinee, arms } => {
                    self.scan_expr(scrutinee);
                    for &arm in arena.arms(arms) {
                        self.bind_pattern(&arm.pattern);
                        if arm.guard.is_valid() {
                            self.scan_expr(arm.guard);
                        }
                        self.scan_stmts(arm.body);
                    }
                }
                Stmt::Try {
                    body,
                    catches,
                    finally,
                } => {
                    self.scan_stmts(body);
                    for &clause in arena.catches(catches) {
                        self.bound.insert(clause.binding);
                        self.scan_stmts(clause.body);
                    }
                    self.scan_stmts(finally);
                }
                Stmt::Using { local, value, body } => {
                    self.scan_expr(value);
                    self.bound.insert(local);
                    self.scan_stmts(body);
                }
                Stmt::Break | Stmt::Continue => {}
            }
        }
    }

    fn bind_pattern(&mut self, pattern: &ember_ir::ast::Pattern) {
        use ember_ir::ast::Pattern;
        match pattern {
            Pattern::Binding { local } | Pattern::Class { binding: local, .. } => {
                self.bound.insert(*local);
            }
            Pattern::Wildcard
            | Pattern::Int(_)
            | Pattern::Bool(_)
            | Pattern::Str(_)
            | Pattern::Nil => {}
        }
    }

    fn scan_expr(&mut self, expr: ember_ir::ExprId) {
        let arena = &self.module.arena;
        match *arena.kind(expr) {
            ExprKind::Local(local) => {
                self.used.insert(local);
            }
            ExprKind::Block { params, body } => {
                // Inner block params are bound relative to us as well.
                for p in params.iter() {
                    self.bound.insert(p);
                }
                self.scan_stmts(body);
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Cast { operand }
            | ExprKind::Await { operand }
            | ExprKind::ChannelNew { capacity: operand }
            | ExprKind::ThreadSpawn { closure: operand } => self.scan_expr(operand),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logic { lhs, rhs, .. } => {
                self.scan_expr(lhs);
                self.scan_expr(rhs);
            }
            ExprKind::FieldGet { object, .. }
            | ExprKind::Length { object }
            | ExprKind::TupleGet { tuple: object, .. } => self.scan_expr(object),
            ExprKind::Index { object, index } => {
                self.scan_expr(object);
                self.scan_expr(index);
            }
            ExprKind::RangeLit { start, end } => {
                self.scan_expr(start);
                self.scan_expr(end);
            }
            ExprKind::New { args, .. }
            | ExprKind::StaticCall { args, .. }
            | ExprKind::ClassCall { args, .. }
            | ExprKind::ArrayLit { elems: args }
            | ExprKind::TupleLit { elems: args }
            | ExprKind::Interp { parts: args } => {
                for &arg in arena.exprs(args) {
                    self.scan_expr(arg);
                }
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                self.scan_expr(receiver);
                for &arg in arena.exprs(args) {
                    self.scan_expr(arg);
                }
            }
            ExprKind::BlockCall { callee, args } => {
                self.scan_expr(callee);
                for &arg in arena.exprs(args) {
                    self.scan_expr(arg);
                }
            }
            ExprKind::HashLit { entries } => {
                for &entry in arena.entries(entries) {
                    self.scan_expr(entry.key);
                    self.scan_expr(entry.value);
                }
            }
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Str(_)
            | ExprKind::Nil
            | ExprKind::Error => {}
        }
    }
}
