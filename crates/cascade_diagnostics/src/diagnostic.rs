//! Structured diagnostic messages.

use crate::severity::Severity;
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// A single diagnostic message with severity, text, and optional location.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level of this diagnostic.
    pub severity: Severity,
    /// The main diagnostic message.
    pub message: String,
    /// The source span in the offending fragment, if one exists.
    pub span: Option<Span>,
    /// Explanatory footnotes.
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Creates a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Creates a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Creates a new informational note.
    pub fn note(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Note,
            message: message.into(),
            span: None,
            notes: Vec::new(),
        }
    }

    /// Attaches a source span to this diagnostic.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Adds a footnote to this diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_error() {
        let d = Diagnostic::error("duplicate declaration of f");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.message, "duplicate declaration of f");
        assert!(d.span.is_none());
    }

    #[test]
    fn builder_methods() {
        let d = Diagnostic::warning("implicit width truncation")
            .with_span(Span::new(3, 9))
            .with_note("the declared width is 4 bits");
        assert_eq!(d.span, Some(Span::new(3, 9)));
        assert_eq!(d.notes.len(), 1);
    }

    #[test]
    fn serde_roundtrip() {
        let d = Diagnostic::error("oops").with_span(Span::new(1, 2));
        let json = serde_json::to_string(&d).unwrap();
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back.message, "oops");
        assert_eq!(back.span, Some(Span::new(1, 2)));
    }
}
