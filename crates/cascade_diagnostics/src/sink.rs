//! Thread-safe diagnostic accumulator shared between the runtime and compilers.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A thread-safe accumulator for diagnostics emitted during an eval
/// transaction or a backend compile.
///
/// Multiple threads can emit diagnostics concurrently via [`emit`](Self::emit).
/// The error count is tracked atomically so the hot `has_errors` check in the
/// eval loop does not take the lock.
pub struct DiagnosticSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    error_count: AtomicUsize,
}

impl DiagnosticSink {
    /// Creates a new empty diagnostic sink.
    pub fn new() -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            error_count: AtomicUsize::new(0),
        }
    }

    /// Emits a diagnostic into the sink.
    pub fn emit(&self, diag: Diagnostic) {
        if diag.severity == Severity::Error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        let mut diagnostics = self.diagnostics.lock().unwrap();
        diagnostics.push(diag);
    }

    /// Emits an error with the given message.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(Diagnostic::error(message));
    }

    /// Emits a warning with the given message.
    pub fn warning(&self, message: impl Into<String>) {
        self.emit(Diagnostic::warning(message));
    }

    /// Returns `true` if any error-severity diagnostics have been emitted
    /// since the last [`clear`](Self::clear).
    pub fn has_errors(&self) -> bool {
        self.error_count.load(Ordering::Relaxed) > 0
    }

    /// Takes all accumulated diagnostics, leaving the sink empty and
    /// resetting the error count.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        let mut diagnostics = self.diagnostics.lock().unwrap();
        self.error_count.store(0, Ordering::Relaxed);
        std::mem::take(&mut *diagnostics)
    }

    /// Discards all accumulated diagnostics and resets the error count.
    ///
    /// Called at the start of each eval transaction.
    pub fn clear(&self) {
        let mut diagnostics = self.diagnostics.lock().unwrap();
        diagnostics.clear();
        self.error_count.store(0, Ordering::Relaxed);
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sink() {
        let sink = DiagnosticSink::new();
        assert!(!sink.has_errors());
        assert!(sink.take_all().is_empty());
    }

    #[test]
    fn emit_error_sets_flag() {
        let sink = DiagnosticSink::new();
        sink.error("bad");
        assert!(sink.has_errors());
    }

    #[test]
    fn warnings_do_not_set_error_flag() {
        let sink = DiagnosticSink::new();
        sink.warning("meh");
        assert!(!sink.has_errors());
        assert_eq!(sink.take_all().len(), 1);
    }

    #[test]
    fn take_all_resets() {
        let sink = DiagnosticSink::new();
        sink.error("one");
        sink.warning("two");
        assert_eq!(sink.take_all().len(), 2);
        assert!(!sink.has_errors());
        assert!(sink.take_all().is_empty());
    }

    #[test]
    fn clear_resets() {
        let sink = DiagnosticSink::new();
        sink.error("one");
        sink.clear();
        assert!(!sink.has_errors());
        assert!(sink.take_all().is_empty());
    }

    #[test]
    fn thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let sink = Arc::new(DiagnosticSink::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let sink = Arc::clone(&sink);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    sink.error("boom");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.take_all().len(), 800);
    }
}
