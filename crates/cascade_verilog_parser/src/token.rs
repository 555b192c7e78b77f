//! Token types for the Verilog-2005 subset lexer.
//!
//! Defines the [`TokenKind`] enum covering the keywords, operators,
//! punctuation, and literals Cascade accepts, plus the [`Token`] struct
//! pairing a token kind with its source [`Span`]. Literal values are not
//! stored in the token; they are retrieved from the source text using the
//! token's span.

use cascade_diagnostics::Span;
use serde::{Deserialize, Serialize};

/// A token kind in the accepted Verilog-2005 subset.
///
/// Keywords are case-sensitive and must appear in lowercase. Constructs the
/// runtime rejects during type checking (tasks, functions, UDPs) lex to
/// [`TokenKind::Unsupported`] so the parser can produce a targeted error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum TokenKind {
    // === Keywords ===
    /// `always`
    Always,
    /// `assign`
    Assign,
    /// `begin`
    Begin,
    /// `case`
    Case,
    /// `casex`
    Casex,
    /// `casez`
    Casez,
    /// `default`
    Default,
    /// `else`
    Else,
    /// `end`
    End,
    /// `endcase`
    Endcase,
    /// `endgenerate`
    Endgenerate,
    /// `endmodule`
    Endmodule,
    /// `for`
    For,
    /// `forever`
    Forever,
    /// `generate`
    Generate,
    /// `genvar`
    Genvar,
    /// `if`
    If,
    /// `include`
    Include,
    /// `initial`
    Initial,
    /// `inout`
    Inout,
    /// `input`
    Input,
    /// `integer`
    Integer,
    /// `localparam`
    Localparam,
    /// `module`
    Module,
    /// `negedge`
    Negedge,
    /// `or`
    Or,
    /// `output`
    Output,
    /// `parameter`
    Parameter,
    /// `posedge`
    Posedge,
    /// `reg`
    Reg,
    /// `repeat`
    Repeat,
    /// `signed`
    Signed,
    /// `while`
    While,
    /// `wire`
    Wire,
    /// A keyword outside the accepted subset (`function`, `task`, `fork`, ...).
    Unsupported,

    // === Punctuation ===
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `;`
    Semi,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `#`
    Hash,
    /// `@`
    At,
    /// `?`
    Question,
    /// `=`
    Eq,
    /// `(*`
    AttrOpen,
    /// `*)`
    AttrClose,

    // === Operators ===
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `**`
    StarStar,
    /// `&`
    Amp,
    /// `&&`
    AmpAmp,
    /// `|`
    Pipe,
    /// `||`
    PipePipe,
    /// `^`
    Caret,
    /// `~^` or `^~`
    TildeCaret,
    /// `~`
    Tilde,
    /// `~&`
    TildeAmp,
    /// `~|`
    TildePipe,
    /// `!`
    Bang,
    /// `==`
    EqEq,
    /// `!=`
    BangEq,
    /// `<`
    Lt,
    /// `<=` — relational or nonblocking assign, by context
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `<<`
    Shl,
    /// `<<<`
    Sal,
    /// `>>`
    Shr,
    /// `>>>`
    Sar,

    // === Literals and names ===
    /// A decimal, based, or real number literal.
    Number,
    /// A double-quoted string literal.
    StringLit,
    /// An identifier.
    Identifier,
    /// A `$name` system task/function identifier.
    SysIdent,

    /// A lexer error.
    Error,
    /// End of input.
    Eof,
}

/// A token with its source span.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Token {
    /// The token kind.
    pub kind: TokenKind,
    /// The byte range in the source fragment.
    pub span: Span,
}

/// Maps an identifier's text to its keyword token, if it is one.
pub fn lookup_keyword(text: &str) -> Option<TokenKind> {
    let kind = match text {
        "always" => TokenKind::Always,
        "assign" => TokenKind::Assign,
        "begin" => TokenKind::Begin,
        "case" => TokenKind::Case,
        "casex" => TokenKind::Casex,
        "casez" => TokenKind::Casez,
        "default" => TokenKind::Default,
        "else" => TokenKind::Else,
        "end" => TokenKind::End,
        "endcase" => TokenKind::Endcase,
        "endgenerate" => TokenKind::Endgenerate,
        "endmodule" => TokenKind::Endmodule,
        "for" => TokenKind::For,
        "forever" => TokenKind::Forever,
        "generate" => TokenKind::Generate,
        "genvar" => TokenKind::Genvar,
        "if" => TokenKind::If,
        "include" => TokenKind::Include,
        "initial" => TokenKind::Initial,
        "inout" => TokenKind::Inout,
        "input" => TokenKind::Input,
        "integer" => TokenKind::Integer,
        "localparam" => TokenKind::Localparam,
        "module" => TokenKind::Module,
        "negedge" => TokenKind::Negedge,
        "or" => TokenKind::Or,
        "output" => TokenKind::Output,
        "parameter" => TokenKind::Parameter,
        "posedge" => TokenKind::Posedge,
        "reg" => TokenKind::Reg,
        "repeat" => TokenKind::Repeat,
        "signed" => TokenKind::Signed,
        "while" => TokenKind::While,
        "wire" => TokenKind::Wire,
        "function" | "endfunction" | "task" | "endtask" | "fork" | "join" | "defparam"
        | "primitive" | "endprimitive" | "specify" | "endspecify" | "real" | "time" | "wait"
        | "deassign" | "force" | "release" | "event" | "wand" | "wor" | "tri" | "supply0"
        | "supply1" | "automatic" => TokenKind::Unsupported,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_resolve() {
        assert_eq!(lookup_keyword("module"), Some(TokenKind::Module));
        assert_eq!(lookup_keyword("endmodule"), Some(TokenKind::Endmodule));
        assert_eq!(lookup_keyword("posedge"), Some(TokenKind::Posedge));
    }

    #[test]
    fn unsupported_keywords_flagged() {
        assert_eq!(lookup_keyword("function"), Some(TokenKind::Unsupported));
        assert_eq!(lookup_keyword("fork"), Some(TokenKind::Unsupported));
    }

    #[test]
    fn identifiers_pass_through() {
        assert_eq!(lookup_keyword("clock"), None);
        assert_eq!(lookup_keyword("Module"), None);
    }
}
