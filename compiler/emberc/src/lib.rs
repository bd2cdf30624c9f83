//! The Ember middle-end pipeline.
//!
//! One entry point drives the phases over a typed AST:
//!
//! ```text
//! typed AST ──resolve──▶ descriptors ──lower──▶ Anvil ──verify──▶ LowIR
//! ```
//!
//! The verifier runs unconditionally between lowering and codegen: a
//! rejection there is by definition a compiler bug, and surfaces as an
//! internal-compiler-error diagnostic rather than a user error. The CLI
//! driver, linker invocation, and platform detection live outside this
//! workspace; embedders call [`compile_module`] and hand the returned
//! LowIR to the native backend.

mod report;
pub mod tracing_setup;

use ember_anvil::AnvilModule;
use ember_codegen::LowModule;
use ember_diagnostic::Diagnostic;
use ember_ir::ast::Module;
use ember_ir::StringInterner;
use ember_resolve::Resolution;
use ember_types::Pool;

/// Everything the middle end produces for one compilation unit.
#[derive(Debug)]
pub struct CompiledUnit {
    pub resolution: Resolution,
    pub anvil: AnvilModule,
    pub low: LowModule,
}

/// Drive the full middle end over one typed module.
///
/// The module and interner are the front end's output; the pool is the
/// shared type universe both sides intern into. All diagnostics of a
/// failing phase are reported together.
pub fn compile_module(
    module: &Module,
    pool: &mut Pool,
    interner: &StringInterner,
) -> Result<CompiledUnit, Vec<Diagnostic>> {
    let _span = tracing::info_span!("compile_module", functions = module.functions.len())
        .entered();

    let resolution = ember_resolve::resolve(module, pool, interner)
        .map_err(|errors| errors.iter().map(report::resolve_diagnostic).collect::<Vec<_>>())?;

    let anvil = ember_lower::lower_module(module, &resolution, pool, interner)
        .map_err(|errors| errors.iter().map(report::lower_diagnostic).collect::<Vec<_>>())?;

    ember_anvil::verify_module(&anvil, pool)
        .map_err(|errors| errors.iter().map(report::verify_diagnostic).collect::<Vec<_>>())?;

    let low = ember_codegen::emit(&anvil, pool, interner)
        .map_err(|error| vec![report::codegen_diagnostic(&error)])?;

    Ok(CompiledUnit {
        resolution,
        anvil,
        low,
    })
}

/// The deterministic textual Anvil listing of a compiled unit.
pub fn dump_anvil(unit: &CompiledUnit, pool: &Pool, interner: &StringInterner) -> String {
    ember_anvil::dump_module(&unit.anvil, pool, interner)
}
