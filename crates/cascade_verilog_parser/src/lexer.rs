//! Lexical analyzer for the accepted Verilog-2005 subset.
//!
//! Converts source text into a sequence of [`Token`]s, handling
//! case-sensitive keywords, sized/based literals (`4'b1010`), real literals,
//! string literals with C-style escapes, line and block comments, system
//! identifiers, and `(* ... *)` attribute delimiters. Errors are reported to
//! the [`DiagnosticSink`] and produce [`TokenKind::Error`] tokens.

use crate::token::{lookup_keyword, Token, TokenKind};
use cascade_diagnostics::{Diagnostic, DiagnosticSink, Span};

/// Lexes the given source text into a vector of tokens.
///
/// Whitespace and comments are skipped. The returned vector always ends with
/// a [`TokenKind::Eof`] token.
pub fn lex(source: &str, sink: &DiagnosticSink) -> Vec<Token> {
    let mut lexer = Lexer {
        source: source.as_bytes(),
        pos: 0,
        sink,
    };
    lexer.lex_all()
}

struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    sink: &'a DiagnosticSink,
}

impl Lexer<'_> {
    fn lex_all(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.pos >= self.source.len() {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span: Span::new(self.pos as u32, self.pos as u32),
                });
                break;
            }
            tokens.push(self.next_token());
        }
        tokens
    }

    fn peek(&self) -> u8 {
        if self.pos < self.source.len() {
            self.source[self.pos]
        } else {
            0
        }
    }

    fn peek_at(&self, offset: usize) -> u8 {
        let idx = self.pos + offset;
        if idx < self.source.len() {
            self.source[idx]
        } else {
            0
        }
    }

    fn advance(&mut self) -> u8 {
        let b = self.source[self.pos];
        self.pos += 1;
        b
    }

    fn span_from(&self, start: usize) -> Span {
        Span::new(start as u32, self.pos as u32)
    }

    fn error(&self, msg: &str, span: Span) {
        self.sink.emit(Diagnostic::error(msg).with_span(span));
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() && self.peek().is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'/' {
                while self.pos < self.source.len() && self.peek() != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'*' {
                let start = self.pos;
                self.pos += 2;
                loop {
                    if self.pos >= self.source.len() {
                        self.error("unterminated block comment", self.span_from(start));
                        break;
                    }
                    if self.peek() == b'*' && self.peek_at(1) == b'/' {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn next_token(&mut self) -> Token {
        let start = self.pos;
        let b = self.peek();

        if b.is_ascii_alphabetic() || b == b'_' {
            return self.lex_word(start);
        }
        if b.is_ascii_digit() || (b == b'\'' && self.peek_at(1).is_ascii_alphanumeric()) {
            return self.lex_number(start);
        }
        if b == b'"' {
            return self.lex_string(start);
        }
        if b == b'$' {
            self.advance();
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                self.advance();
            }
            return Token {
                kind: TokenKind::SysIdent,
                span: self.span_from(start),
            };
        }

        self.advance();
        let kind = match b {
            b'(' => {
                if self.peek() == b'*' && self.peek_at(1) != b')' {
                    self.advance();
                    TokenKind::AttrOpen
                } else {
                    TokenKind::LParen
                }
            }
            b')' => TokenKind::RParen,
            b'[' => TokenKind::LBracket,
            b']' => TokenKind::RBracket,
            b'{' => TokenKind::LBrace,
            b'}' => TokenKind::RBrace,
            b';' => TokenKind::Semi,
            b':' => TokenKind::Colon,
            b',' => TokenKind::Comma,
            b'.' => TokenKind::Dot,
            b'#' => TokenKind::Hash,
            b'@' => TokenKind::At,
            b'?' => TokenKind::Question,
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'*' => {
                if self.peek() == b'*' {
                    self.advance();
                    TokenKind::StarStar
                } else if self.peek() == b')' {
                    self.advance();
                    TokenKind::AttrClose
                } else {
                    TokenKind::Star
                }
            }
            b'&' => {
                if self.peek() == b'&' {
                    self.advance();
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            b'|' => {
                if self.peek() == b'|' {
                    self.advance();
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            b'^' => {
                if self.peek() == b'~' {
                    self.advance();
                    TokenKind::TildeCaret
                } else {
                    TokenKind::Caret
                }
            }
            b'~' => match self.peek() {
                b'^' => {
                    self.advance();
                    TokenKind::TildeCaret
                }
                b'&' => {
                    self.advance();
                    TokenKind::TildeAmp
                }
                b'|' => {
                    self.advance();
                    TokenKind::TildePipe
                }
                _ => TokenKind::Tilde,
            },
            b'!' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            b'=' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::EqEq
                } else {
                    TokenKind::Eq
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::LtEq
                } else if self.peek() == b'<' {
                    self.advance();
                    if self.peek() == b'<' {
                        self.advance();
                        TokenKind::Sal
                    } else {
                        TokenKind::Shl
                    }
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.advance();
                    TokenKind::GtEq
                } else if self.peek() == b'>' {
                    self.advance();
                    if self.peek() == b'>' {
                        self.advance();
                        TokenKind::Sar
                    } else {
                        TokenKind::Shr
                    }
                } else {
                    TokenKind::Gt
                }
            }
            _ => {
                let span = self.span_from(start);
                self.error(&format!("unexpected character '{}'", b as char), span);
                TokenKind::Error
            }
        };
        Token {
            kind,
            span: self.span_from(start),
        }
    }

    fn lex_word(&mut self, start: usize) -> Token {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' || self.peek() == b'$' {
            self.advance();
        }
        let text = std::str::from_utf8(&self.source[start..self.pos]).unwrap_or("");
        let kind = lookup_keyword(text).unwrap_or(TokenKind::Identifier);
        Token {
            kind,
            span: self.span_from(start),
        }
    }

    /// Lexes decimal, based (`4'b1010`), and real (`1.5`, `2e3`) literals as
    /// a single token; the parser interprets the text.
    fn lex_number(&mut self, start: usize) -> Token {
        while self.peek().is_ascii_digit() || self.peek() == b'_' {
            self.advance();
        }
        if self.peek() == b'\'' {
            self.advance();
            if self.peek() == b's' || self.peek() == b'S' {
                self.advance();
            }
            match self.peek() {
                b'b' | b'B' | b'o' | b'O' | b'd' | b'D' | b'h' | b'H' => {
                    self.advance();
                }
                _ => {
                    let span = self.span_from(start);
                    self.error("malformed based literal", span);
                    return Token {
                        kind: TokenKind::Error,
                        span,
                    };
                }
            }
            while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
                self.advance();
            }
        } else if self.peek() == b'.' && self.peek_at(1).is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() || self.peek() == b'_' {
                self.advance();
            }
            if self.peek() == b'e' || self.peek() == b'E' {
                self.advance();
                if self.peek() == b'+' || self.peek() == b'-' {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }
        Token {
            kind: TokenKind::Number,
            span: self.span_from(start),
        }
    }

    fn lex_string(&mut self, start: usize) -> Token {
        self.advance();
        loop {
            if self.pos >= self.source.len() || self.peek() == b'\n' {
                let span = self.span_from(start);
                self.error("unterminated string literal", span);
                return Token {
                    kind: TokenKind::Error,
                    span,
                };
            }
            let b = self.advance();
            if b == b'\\' && self.pos < self.source.len() {
                self.advance();
            } else if b == b'"' {
                break;
            }
        }
        Token {
            kind: TokenKind::StringLit,
            span: self.span_from(start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let sink = DiagnosticSink::new();
        lex(src, &sink).iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_module_header() {
        assert_eq!(
            kinds("module m(a);"),
            vec![
                TokenKind::Module,
                TokenKind::Identifier,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_based_literal_as_one_token() {
        assert_eq!(kinds("4'b1010"), vec![TokenKind::Number, TokenKind::Eof]);
        assert_eq!(kinds("8'shFF"), vec![TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn lexes_real_literal() {
        assert_eq!(kinds("3.25"), vec![TokenKind::Number, TokenKind::Eof]);
    }

    #[test]
    fn distinguishes_shift_depth() {
        assert_eq!(
            kinds("a << b <<< c"),
            vec![
                TokenKind::Identifier,
                TokenKind::Shl,
                TokenKind::Identifier,
                TokenKind::Sal,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_attribute_delimiters() {
        assert_eq!(
            kinds("(*__std = \"clock\"*)"),
            vec![
                TokenKind::AttrOpen,
                TokenKind::Identifier,
                TokenKind::Eq,
                TokenKind::StringLit,
                TokenKind::AttrClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        assert_eq!(
            kinds("a // line\n/* block */ b"),
            vec![TokenKind::Identifier, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn sys_idents() {
        assert_eq!(
            kinds("$display $finish"),
            vec![TokenKind::SysIdent, TokenKind::SysIdent, TokenKind::Eof]
        );
    }

    #[test]
    fn nonblocking_lexes_as_lteq() {
        assert_eq!(
            kinds("r <= 1"),
            vec![
                TokenKind::Identifier,
                TokenKind::LtEq,
                TokenKind::Number,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn unterminated_string_reports_error() {
        let sink = DiagnosticSink::new();
        let toks = lex("\"abc", &sink);
        assert_eq!(toks[0].kind, TokenKind::Error);
        assert!(sink.has_errors());
    }

    #[test]
    fn unsupported_keyword() {
        assert_eq!(kinds("function"), vec![TokenKind::Unsupported, TokenKind::Eof]);
    }
}
