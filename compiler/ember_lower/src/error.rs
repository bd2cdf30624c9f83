//! Lowering errors. All fatal for the compilation unit.

use ember_ir::Span;
use thiserror::Error;

/// A fatal error produced while lowering the typed AST to Anvil.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    /// The input AST violates the middle-end contract (missing type on an
    /// expression node, error placeholder node, receiver of impossible
    /// type).
    #[error("ill-typed AST: {detail}")]
    ContractViolation { detail: String, span: Span },

    /// A valid construct the middle end cannot lower yet, reported with
    /// its opcode family.
    #[error("not yet implemented: {family}")]
    Unsupported { family: &'static str, span: Span },
}

impl LowerError {
    /// Source span the error points at.
    pub fn span(&self) -> Span {
        match self {
            LowerError::ContractViolation { span, .. } | LowerError::Unsupported { span, .. } => {
                *span
            }
        }
    }
}
