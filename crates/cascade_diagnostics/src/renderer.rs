//! Plain-text rendering of diagnostics against their source fragment.

use crate::diagnostic::Diagnostic;

/// Renders a diagnostic as a single line of text.
///
/// If the originating source fragment is still available, the span is
/// resolved to a line/column pair; otherwise only the message is printed.
pub fn render(diag: &Diagnostic, source: Option<&str>) -> String {
    match (diag.span, source) {
        (Some(span), Some(text)) => {
            let (line, col) = span.line_col(text);
            let mut out = format!("{}: {} (line {line}, col {col})", diag.severity, diag.message);
            for note in &diag.notes {
                out.push_str(&format!("\n  note: {note}"));
            }
            out
        }
        _ => {
            let mut out = format!("{}: {}", diag.severity, diag.message);
            for note in &diag.notes {
                out.push_str(&format!("\n  note: {note}"));
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn renders_without_source() {
        let d = Diagnostic::error("undeclared identifier x");
        assert_eq!(render(&d, None), "error: undeclared identifier x");
    }

    #[test]
    fn renders_with_location() {
        let d = Diagnostic::error("unexpected token").with_span(Span::new(10, 11));
        let src = "module m;\nwire ?;\nendmodule";
        let out = render(&d, Some(src));
        assert!(out.contains("line 2"));
    }

    #[test]
    fn renders_notes() {
        let d = Diagnostic::warning("w").with_note("extra context");
        let out = render(&d, None);
        assert!(out.contains("note: extra context"));
    }
}
