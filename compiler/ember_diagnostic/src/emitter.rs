//! Terminal rendering of diagnostics.
//!
//! Output is line-oriented and deterministic:
//!
//! ```text
//! error[E0201] (resolve): duplicate field `name` in class `Dog` at 120..124
//!   note: first declared in class `Animal`
//! ```

use std::fmt::Write as _;

use crate::Diagnostic;

/// Render one diagnostic to its stable line form.
pub fn render(diagnostic: &Diagnostic) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "{}[{}] ({}): {}",
        diagnostic.severity.label(),
        diagnostic.code,
        diagnostic.phase.label(),
        diagnostic.message
    );
    if let Some(span) = diagnostic.span {
        let _ = write!(out, " at {}..{}", span.start, span.end);
    }
    for note in &diagnostic.notes {
        let _ = write!(out, "\n  note: {note}");
    }
    out
}

/// Render a batch, one diagnostic per paragraph, fatal count last.
pub fn render_all(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    for diagnostic in diagnostics {
        out.push_str(&render(diagnostic));
        out.push('\n');
    }
    let fatal = diagnostics.iter().filter(|d| d.is_fatal()).count();
    if fatal > 0 {
        let _ = write!(out, "compilation failed: {fatal} error(s)");
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorCode, Phase};
    use ember_ir::Span;

    #[test]
    fn renders_code_phase_and_span() {
        let d = Diagnostic::error(Phase::Resolve, ErrorCode::E0201, "duplicate field `name`")
            .with_span(Span::new(120, 124))
            .with_note("first declared in class `Animal`");
        assert_eq!(
            render(&d),
            "error[E0201] (resolve): duplicate field `name` at 120..124\n  note: first declared in class `Animal`"
        );
    }

    #[test]
    fn batch_rendering_counts_fatal() {
        let batch = vec![
            Diagnostic::error(Phase::Lower, ErrorCode::E0301, "a"),
            Diagnostic::bug(Phase::Verify, ErrorCode::E0901, "b"),
        ];
        let text = render_all(&batch);
        assert!(text.ends_with("compilation failed: 2 error(s)\n"));
    }
}
