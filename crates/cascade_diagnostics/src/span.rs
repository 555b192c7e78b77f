//! Byte-offset spans into an evaluated source fragment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open byte range into the source fragment currently being evaluated.
///
/// Cascade evaluates transient REPL fragments rather than a fixed set of
/// files, so spans carry only offsets; the renderer resolves them against
/// the fragment text when it is still available.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of the first character.
    pub start: u32,
    /// Byte offset one past the last character.
    pub end: u32,
}

impl Span {
    /// A span used for synthesized nodes with no source location.
    pub const DUMMY: Span = Span { start: 0, end: 0 };

    /// Creates a new span.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Returns the smallest span covering both `self` and `other`.
    pub fn join(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Returns the 1-indexed line and column of the span start in `text`.
    pub fn line_col(self, text: &str) -> (u32, u32) {
        let mut line = 1;
        let mut col = 1;
        for (i, c) in text.char_indices() {
            if i as u32 >= self.start {
                break;
            }
            if c == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        (line, col)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_covers_both() {
        let a = Span::new(4, 8);
        let b = Span::new(2, 6);
        assert_eq!(a.join(b), Span::new(2, 8));
    }

    #[test]
    fn line_col_counts_newlines() {
        let text = "module m;\n  wire x;\nendmodule\n";
        let span = Span::new(12, 16);
        assert_eq!(span.line_col(text), (2, 3));
    }

    #[test]
    fn line_col_at_start() {
        assert_eq!(Span::new(0, 1).line_col("abc"), (1, 1));
    }
}
