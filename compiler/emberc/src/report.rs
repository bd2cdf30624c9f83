//! Mapping phase errors into diagnostics.

use ember_codegen::CodegenError;
use ember_diagnostic::{Diagnostic, ErrorCode, Phase};
use ember_lower::LowerError;
use ember_resolve::ResolveError;

pub(crate) fn resolve_diagnostic(error: &ResolveError) -> Diagnostic {
    let code = match error {
        ResolveError::DuplicateField { .. } => ErrorCode::E0201,
        ResolveError::IncompatibleOverride { .. } => ErrorCode::E0202,
        ResolveError::AmbiguousMethod { .. } => ErrorCode::E0203,
        ResolveError::InheritanceCycle { .. } => ErrorCode::E0204,
        ResolveError::MissingRuntimeClass { .. } => ErrorCode::E0205,
    };
    let diagnostic = Diagnostic::error(Phase::Resolve, code, error.to_string());
    match error.span() {
        Some(span) => diagnostic.with_span(span),
        None => diagnostic,
    }
}

pub(crate) fn lower_diagnostic(error: &LowerError) -> Diagnostic {
    let code = match error {
        LowerError::ContractViolation { .. } => ErrorCode::E0301,
        LowerError::Unsupported { .. } => ErrorCode::E0302,
    };
    Diagnostic::error(Phase::Lower, code, error.to_string()).with_span(error.span())
}

pub(crate) fn verify_diagnostic(error: &ember_anvil::VerifyError) -> Diagnostic {
    Diagnostic::bug(Phase::Verify, ErrorCode::E0901, error.to_string())
        .with_note("the lowered module failed verification; this is a compiler bug")
}

pub(crate) fn codegen_diagnostic(error: &CodegenError) -> Diagnostic {
    Diagnostic::bug(Phase::Codegen, ErrorCode::E0902, error.to_string())
}
