//! Diagnostic reporting for the Cascade runtime.
//!
//! Parse, declaration, elaboration, and compilation problems are reported as
//! [`Diagnostic`]s accumulated in a thread-safe [`DiagnosticSink`]. An eval
//! transaction with error-severity diagnostics in its sink at commit time is
//! rolled back; warnings and notes are surfaced but do not abort.

#![warn(missing_docs)]

pub mod diagnostic;
pub mod renderer;
pub mod severity;
pub mod sink;
pub mod span;

pub use diagnostic::Diagnostic;
pub use renderer::render;
pub use severity::Severity;
pub use sink::DiagnosticSink;
pub use span::Span;
