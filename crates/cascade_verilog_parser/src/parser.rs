//! Core parser infrastructure and top-level parsing rules.
//!
//! The [`Parser`] struct provides primitive operations (advance, expect,
//! eat) and error recovery, while the top-level methods parse evaluated
//! fragments: module declarations, `include` directives, and module items.
//! Nodes are built directly into the caller's [`Ast`] arena, bottom-up.

use crate::lexer::lex;
use crate::token::{Token, TokenKind};
use cascade_ast::{Ast, Attr, IdPart, Node, NodeId, PortDir};
use cascade_common::Ident;
use cascade_diagnostics::{Diagnostic, DiagnosticSink, Span};

/// One successfully parsed top-level fragment.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// A module declaration.
    Decl(NodeId),
    /// A module item to be appended to the root instance.
    Item(NodeId),
    /// An `include "path";` directive.
    Include(String),
}

/// Parses a source fragment into the given AST, returning the fragments in
/// order. Parse errors are emitted to the sink; fragments following an
/// unrecoverable error are dropped.
pub fn parse(source: &str, ast: &mut Ast, sink: &DiagnosticSink) -> Vec<Fragment> {
    let tokens = lex(source, sink);
    let mut parser = Parser {
        tokens,
        pos: 0,
        source,
        ast,
        sink,
    };
    parser.parse_fragments()
}

pub(crate) struct Parser<'a> {
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
    pub(crate) source: &'a str,
    pub(crate) ast: &'a mut Ast,
    pub(crate) sink: &'a DiagnosticSink,
}

impl<'a> Parser<'a> {
    // ========================================================================
    // Primitive operations
    // ========================================================================

    pub(crate) fn current(&self) -> TokenKind {
        self.tokens[self.pos].kind
    }

    pub(crate) fn current_span(&self) -> Span {
        self.tokens[self.pos].span
    }

    pub(crate) fn current_text(&self) -> &'a str {
        let span = self.current_span();
        &self.source[span.start as usize..span.end as usize]
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.current() == kind
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.current() == TokenKind::Eof
    }

    pub(crate) fn advance(&mut self) {
        if !self.at_eof() {
            self.pos += 1;
        }
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, what: &str) -> bool {
        if self.eat(kind) {
            true
        } else {
            self.error_here(&format!("expected {what}"));
            false
        }
    }

    pub(crate) fn error_here(&self, msg: &str) {
        self.sink
            .emit(Diagnostic::error(msg).with_span(self.current_span()));
    }

    /// Expects an identifier token and returns its interned name.
    pub(crate) fn expect_name(&mut self) -> Option<Ident> {
        if self.at(TokenKind::Identifier) {
            let name = self.ast.interner().get_or_intern(self.current_text());
            self.advance();
            Some(name)
        } else {
            self.error_here("expected an identifier");
            None
        }
    }

    /// Expects a plain single-segment identifier and allocates its node.
    pub(crate) fn expect_plain_ident(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let name = self.expect_name()?;
        Some(self.ast.alloc(
            Node::Identifier {
                path: vec![IdPart::plain(name)],
                dims: Vec::new(),
            },
            span,
        ))
    }

    /// Skips ahead to a plausible top-level synchronization point.
    fn sync_top(&mut self) {
        while !self.at_eof() {
            match self.current() {
                TokenKind::Semi => {
                    self.advance();
                    return;
                }
                TokenKind::Endmodule | TokenKind::Module => return,
                _ => self.advance(),
            }
        }
    }

    // ========================================================================
    // Top level
    // ========================================================================

    fn parse_fragments(&mut self) -> Vec<Fragment> {
        let mut frags = Vec::new();
        while !self.at_eof() {
            let attrs = self.parse_attrs();
            match self.current() {
                TokenKind::Module => match self.parse_module(attrs) {
                    Some(md) => frags.push(Fragment::Decl(md)),
                    None => self.sync_top(),
                },
                TokenKind::Include => match self.parse_include() {
                    Some(path) => frags.push(Fragment::Include(path)),
                    None => self.sync_top(),
                },
                _ => match self.parse_item(attrs) {
                    Some(items) => frags.extend(items.into_iter().map(Fragment::Item)),
                    None => self.sync_top(),
                },
            }
        }
        frags
    }

    fn parse_include(&mut self) -> Option<String> {
        self.expect(TokenKind::Include, "`include`");
        if !self.at(TokenKind::StringLit) {
            self.error_here("expected a string path after include");
            return None;
        }
        let path = self.string_value();
        self.advance();
        self.expect(TokenKind::Semi, "';'");
        Some(path)
    }

    /// Returns the unescaped value of the current string-literal token.
    pub(crate) fn string_value(&self) -> String {
        let raw = self.current_text();
        let inner = &raw[1..raw.len().saturating_sub(1)];
        let mut out = String::new();
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(other) => out.push(other),
                    None => {}
                }
            } else {
                out.push(c);
            }
        }
        out
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub(crate) fn parse_attrs(&mut self) -> Vec<Attr> {
        let mut attrs = Vec::new();
        while self.at(TokenKind::AttrOpen) {
            self.advance();
            loop {
                if !self.at(TokenKind::Identifier) {
                    self.error_here("expected an attribute name");
                    break;
                }
                let name = self.current_text().to_string();
                self.advance();
                let value = if self.eat(TokenKind::Eq) {
                    if self.at(TokenKind::StringLit) {
                        let v = self.string_value();
                        self.advance();
                        Some(v)
                    } else if self.at(TokenKind::Number) {
                        let v = self.current_text().to_string();
                        self.advance();
                        Some(v)
                    } else {
                        self.error_here("expected an attribute value");
                        None
                    }
                } else {
                    None
                };
                attrs.push(Attr { name, value });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::AttrClose, "'*)'");
        }
        attrs
    }

    // ========================================================================
    // Module declarations
    // ========================================================================

    fn parse_module(&mut self, attrs: Vec<Attr>) -> Option<NodeId> {
        let start = self.current_span();
        self.expect(TokenKind::Module, "`module`");
        let name = self.expect_plain_ident()?;
        let mut ports = Vec::new();
        if self.eat(TokenKind::LParen) {
            if !self.at(TokenKind::RParen) {
                loop {
                    ports.push(self.expect_plain_ident()?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.expect(TokenKind::RParen, "')'");
        }
        self.expect(TokenKind::Semi, "';'");
        let mut items = Vec::new();
        while !self.at(TokenKind::Endmodule) {
            if self.at_eof() {
                self.error_here("unterminated module declaration");
                return None;
            }
            let attrs = self.parse_attrs();
            match self.parse_item(attrs) {
                Some(parsed) => items.extend(parsed),
                None => self.sync_top(),
            }
        }
        let end = self.current_span();
        self.expect(TokenKind::Endmodule, "`endmodule`");
        Some(self.ast.alloc(
            Node::ModuleDecl {
                attrs,
                name,
                ports,
                items,
            },
            start.join(end),
        ))
    }

    // ========================================================================
    // Module items
    // ========================================================================

    /// Parses one module item. A single source item may expand to several
    /// nodes (comma-separated declarator lists, spliced generate regions).
    pub(crate) fn parse_item(&mut self, attrs: Vec<Attr>) -> Option<Vec<NodeId>> {
        match self.current() {
            TokenKind::Input => self.parse_port_decl(PortDir::Input),
            TokenKind::Output => self.parse_port_decl(PortDir::Output),
            TokenKind::Inout => self.parse_port_decl(PortDir::Inout),
            TokenKind::Wire => self.parse_net_decl(),
            TokenKind::Reg => self.parse_reg_decl(),
            TokenKind::Integer => self.parse_integer_decl(),
            TokenKind::Genvar => self.parse_genvar_decl(),
            TokenKind::Parameter => self.parse_param_decl(false),
            TokenKind::Localparam => self.parse_param_decl(true),
            TokenKind::Assign => self.parse_cont_assign().map(|n| vec![n]),
            TokenKind::Initial => {
                let span = self.current_span();
                self.advance();
                let stmt = self.parse_stmt()?;
                Some(vec![self.ast.alloc(Node::Initial { stmt }, span)])
            }
            TokenKind::Always => {
                let span = self.current_span();
                self.advance();
                let stmt = self.parse_stmt()?;
                Some(vec![self.ast.alloc(Node::Always { stmt }, span)])
            }
            TokenKind::Generate => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(TokenKind::Endgenerate) {
                    if self.at_eof() {
                        self.error_here("unterminated generate region");
                        return None;
                    }
                    let attrs = self.parse_attrs();
                    items.extend(self.parse_item(attrs)?);
                }
                self.expect(TokenKind::Endgenerate, "`endgenerate`");
                Some(items)
            }
            TokenKind::If => self.parse_if_generate().map(|n| vec![n]),
            TokenKind::Case => self.parse_case_generate().map(|n| vec![n]),
            TokenKind::For => self.parse_loop_generate().map(|n| vec![n]),
            TokenKind::Identifier => self.parse_instantiation(attrs).map(|n| vec![n]),
            TokenKind::Unsupported => {
                self.error_here(&format!(
                    "`{}` is outside the accepted Verilog subset",
                    self.current_text()
                ));
                None
            }
            _ => {
                self.error_here("expected a module item");
                None
            }
        }
    }

    fn parse_range_opt(&mut self) -> Option<Option<NodeId>> {
        if !self.at(TokenKind::LBracket) {
            return Some(None);
        }
        self.parse_range().map(Some)
    }

    pub(crate) fn parse_range(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::LBracket, "'['");
        let msb = self.parse_expr()?;
        self.expect(TokenKind::Colon, "':'");
        let lsb = self.parse_expr()?;
        self.expect(TokenKind::RBracket, "']'");
        Some(self.ast.alloc(Node::Range { msb, lsb }, span))
    }

    fn parse_port_decl(&mut self, dir: PortDir) -> Option<Vec<NodeId>> {
        let span = self.current_span();
        self.advance();
        let is_reg = if self.eat(TokenKind::Wire) {
            false
        } else {
            self.eat(TokenKind::Reg)
        };
        let signed = self.eat(TokenKind::Signed);
        let range = self.parse_range_opt()?;
        let mut out = Vec::new();
        let mut first = true;
        loop {
            // Each declarator in a comma list owns its own copy of the range.
            let range = if first {
                range
            } else {
                range.map(|r| self.ast.deep_clone(r))
            };
            first = false;
            let name = self.expect_plain_ident()?;
            let init = if self.eat(TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            let decl = if is_reg {
                self.ast.alloc(
                    Node::RegDecl {
                        name,
                        signed,
                        range,
                        arrays: Vec::new(),
                        init,
                    },
                    span,
                )
            } else {
                self.ast.alloc(
                    Node::NetDecl {
                        name,
                        signed,
                        range,
                        init,
                    },
                    span,
                )
            };
            out.push(self.ast.alloc(Node::PortDecl { dir, decl }, span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "';'");
        Some(out)
    }

    fn parse_net_decl(&mut self) -> Option<Vec<NodeId>> {
        let span = self.current_span();
        self.advance();
        let signed = self.eat(TokenKind::Signed);
        let range = self.parse_range_opt()?;
        let mut out = Vec::new();
        let mut first = true;
        loop {
            let range = if first {
                range
            } else {
                range.map(|r| self.ast.deep_clone(r))
            };
            first = false;
            let name = self.expect_plain_ident()?;
            let init = if self.eat(TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            out.push(self.ast.alloc(
                Node::NetDecl {
                    name,
                    signed,
                    range,
                    init,
                },
                span,
            ));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "';'");
        Some(out)
    }

    pub(crate) fn parse_reg_decl(&mut self) -> Option<Vec<NodeId>> {
        let span = self.current_span();
        self.advance();
        let signed = self.eat(TokenKind::Signed);
        let range = self.parse_range_opt()?;
        let mut out = Vec::new();
        let mut first = true;
        loop {
            let range = if first {
                range
            } else {
                range.map(|r| self.ast.deep_clone(r))
            };
            first = false;
            let name = self.expect_plain_ident()?;
            let mut arrays = Vec::new();
            while self.at(TokenKind::LBracket) {
                arrays.push(self.parse_range()?);
            }
            let init = if self.eat(TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            out.push(self.ast.alloc(
                Node::RegDecl {
                    name,
                    signed,
                    range,
                    arrays,
                    init,
                },
                span,
            ));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "';'");
        Some(out)
    }

    pub(crate) fn parse_integer_decl(&mut self) -> Option<Vec<NodeId>> {
        let span = self.current_span();
        self.advance();
        let mut out = Vec::new();
        loop {
            let name = self.expect_plain_ident()?;
            let init = if self.eat(TokenKind::Eq) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            out.push(self.ast.alloc(Node::IntegerDecl { name, init }, span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "';'");
        Some(out)
    }

    fn parse_genvar_decl(&mut self) -> Option<Vec<NodeId>> {
        let span = self.current_span();
        self.advance();
        let mut out = Vec::new();
        loop {
            let name = self.expect_plain_ident()?;
            out.push(self.ast.alloc(Node::GenvarDecl { name }, span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "';'");
        Some(out)
    }

    fn parse_param_decl(&mut self, local: bool) -> Option<Vec<NodeId>> {
        let span = self.current_span();
        self.advance();
        let signed = self.eat(TokenKind::Signed);
        let range = self.parse_range_opt()?;
        let mut out = Vec::new();
        let mut first = true;
        loop {
            let range = if first {
                range
            } else {
                range.map(|r| self.ast.deep_clone(r))
            };
            first = false;
            let name = self.expect_plain_ident()?;
            self.expect(TokenKind::Eq, "'='");
            let init = self.parse_expr()?;
            let node = if local {
                Node::LocalparamDecl {
                    name,
                    signed,
                    range,
                    init,
                }
            } else {
                Node::ParamDecl {
                    name,
                    signed,
                    range,
                    init,
                }
            };
            out.push(self.ast.alloc(node, span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::Semi, "';'");
        Some(out)
    }

    fn parse_cont_assign(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::Assign, "`assign`");
        let lhs = self.parse_lvalue()?;
        self.expect(TokenKind::Eq, "'='");
        let rhs = self.parse_expr()?;
        self.expect(TokenKind::Semi, "';'");
        Some(self.ast.alloc(Node::ContAssign { lhs, rhs }, span))
    }

    fn parse_instantiation(&mut self, attrs: Vec<Attr>) -> Option<NodeId> {
        let span = self.current_span();
        let module = self.expect_plain_ident()?;
        let mut params = Vec::new();
        if self.eat(TokenKind::Hash) {
            self.expect(TokenKind::LParen, "'('");
            params = self.parse_arg_assigns()?;
            self.expect(TokenKind::RParen, "')'");
        }
        let name = self.expect_plain_ident()?;
        self.expect(TokenKind::LParen, "'('");
        let ports = self.parse_arg_assigns()?;
        self.expect(TokenKind::RParen, "')'");
        self.expect(TokenKind::Semi, "';'");
        Some(self.ast.alloc(
            Node::ModuleInst {
                attrs,
                module,
                name,
                params,
                ports,
            },
            span,
        ))
    }

    /// Parses a comma-separated list of named (`.port(expr)`) or positional
    /// bindings. Empty positional slots are preserved.
    fn parse_arg_assigns(&mut self) -> Option<Vec<NodeId>> {
        let mut out = Vec::new();
        if self.at(TokenKind::RParen) {
            return Some(out);
        }
        loop {
            let span = self.current_span();
            let arg = if self.eat(TokenKind::Dot) {
                let port = self.expect_plain_ident()?;
                self.expect(TokenKind::LParen, "'('");
                let expr = if self.at(TokenKind::RParen) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::RParen, "')'");
                Node::ArgAssign {
                    port: Some(port),
                    expr,
                }
            } else if self.at(TokenKind::Comma) || self.at(TokenKind::RParen) {
                Node::ArgAssign {
                    port: None,
                    expr: None,
                }
            } else {
                let expr = self.parse_expr()?;
                Node::ArgAssign {
                    port: None,
                    expr: Some(expr),
                }
            };
            out.push(self.ast.alloc(arg, span));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Some(out)
    }

    // ========================================================================
    // Generate constructs
    // ========================================================================

    fn parse_if_generate(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let mut clauses = Vec::new();
        let mut else_block = None;
        loop {
            self.expect(TokenKind::If, "`if`");
            let cspan = self.current_span();
            self.expect(TokenKind::LParen, "'('");
            let cond = self.parse_expr()?;
            self.expect(TokenKind::RParen, "')'");
            let block = self.parse_gen_block()?;
            clauses.push(self.ast.alloc(Node::IfGenClause { cond, block }, cspan));
            if self.eat(TokenKind::Else) {
                if self.at(TokenKind::If) {
                    continue;
                }
                else_block = Some(self.parse_gen_block()?);
            }
            break;
        }
        Some(self.ast.alloc(
            Node::IfGenerate {
                clauses,
                else_block,
            },
            span,
        ))
    }

    fn parse_case_generate(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::Case, "`case`");
        self.expect(TokenKind::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')'");
        let mut arms = Vec::new();
        while !self.at(TokenKind::Endcase) {
            if self.at_eof() {
                self.error_here("unterminated case generate");
                return None;
            }
            let aspan = self.current_span();
            let labels = if self.eat(TokenKind::Default) {
                self.eat(TokenKind::Colon);
                Vec::new()
            } else {
                let mut labels = vec![self.parse_expr()?];
                while self.eat(TokenKind::Comma) {
                    labels.push(self.parse_expr()?);
                }
                self.expect(TokenKind::Colon, "':'");
                labels
            };
            let block = self.parse_gen_block()?;
            arms.push(self.ast.alloc(Node::CaseGenArm { labels, block }, aspan));
        }
        self.expect(TokenKind::Endcase, "`endcase`");
        Some(self.ast.alloc(Node::CaseGenerate { cond, arms }, span))
    }

    fn parse_loop_generate(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::For, "`for`");
        self.expect(TokenKind::LParen, "'('");
        let init = self.parse_bare_assign()?;
        self.expect(TokenKind::Semi, "';'");
        let cond = self.parse_expr()?;
        self.expect(TokenKind::Semi, "';'");
        let update = self.parse_bare_assign()?;
        self.expect(TokenKind::RParen, "')'");
        let block = self.parse_gen_block()?;
        Some(self.ast.alloc(
            Node::LoopGenerate {
                init,
                cond,
                update,
                block,
            },
            span,
        ))
    }

    /// Parses `lhs = rhs` with no trailing semicolon (loop headers).
    pub(crate) fn parse_bare_assign(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let lhs = self.parse_lvalue()?;
        self.expect(TokenKind::Eq, "'='");
        let rhs = self.parse_expr()?;
        Some(self.ast.alloc(Node::BlockingAssign { lhs, rhs }, span))
    }

    /// Parses a generate block: either a `begin [: name] ... end` region or
    /// a single item wrapped in an anonymous block.
    fn parse_gen_block(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        if self.eat(TokenKind::Begin) {
            let name = if self.eat(TokenKind::Colon) {
                Some(self.expect_plain_ident()?)
            } else {
                None
            };
            let mut items = Vec::new();
            while !self.at(TokenKind::End) {
                if self.at_eof() {
                    self.error_here("unterminated generate block");
                    return None;
                }
                let attrs = self.parse_attrs();
                items.extend(self.parse_item(attrs)?);
            }
            self.expect(TokenKind::End, "`end`");
            Some(self.ast.alloc(Node::GenBlock { name, items }, span))
        } else {
            let items = self.parse_item(Vec::new())?;
            Some(self.ast.alloc(Node::GenBlock { name: None, items }, span))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::Interner;
    use std::sync::Arc;

    fn parse_ok(src: &str) -> (Ast, Vec<Fragment>) {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(src, &mut ast, &sink);
        assert!(
            !sink.has_errors(),
            "unexpected errors: {:?}",
            sink.take_all()
        );
        (ast, frags)
    }

    #[test]
    fn parses_empty_module() {
        let (ast, frags) = parse_ok("module m(); endmodule");
        assert_eq!(frags.len(), 1);
        match &frags[0] {
            Fragment::Decl(md) => {
                assert_eq!(
                    ast.module_name(*md),
                    Some(ast.interner().get_or_intern("m"))
                );
            }
            other => panic!("expected a declaration, got {other:?}"),
        }
    }

    #[test]
    fn parses_port_decls() {
        let (ast, frags) = parse_ok("module m(x, y); input wire [7:0] x; output reg y; endmodule");
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        let items = ast.items(md);
        assert_eq!(items.len(), 2);
        assert!(matches!(ast.node(items[0]), Node::PortDecl { dir: PortDir::Input, .. }));
        assert!(matches!(ast.node(items[1]), Node::PortDecl { dir: PortDir::Output, .. }));
    }

    #[test]
    fn parses_item_fragment() {
        let (_ast, frags) = parse_ok("initial $finish;");
        assert!(matches!(frags[0], Fragment::Item(_)));
    }

    #[test]
    fn parses_instantiation_with_bindings() {
        let (ast, frags) = parse_ok("foo #(4) f(.clk(clock.val), x, );");
        let Fragment::Item(item) = frags[0] else {
            panic!()
        };
        let Node::ModuleInst { params, ports, .. } = ast.node(item) else {
            panic!()
        };
        assert_eq!(params.len(), 1);
        assert_eq!(ports.len(), 3);
        assert!(matches!(
            ast.node(ports[2]),
            Node::ArgAssign {
                port: None,
                expr: None
            }
        ));
    }

    #[test]
    fn parses_generate_region() {
        let (ast, frags) = parse_ok(
            "module m(); generate if (1) begin : g wire x; end endgenerate endmodule",
        );
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        let items = ast.items(md);
        assert_eq!(items.len(), 1);
        assert!(matches!(ast.node(items[0]), Node::IfGenerate { .. }));
    }

    #[test]
    fn parses_loop_generate() {
        let (ast, frags) =
            parse_ok("module m(); genvar i; for (i = 0; i < 4; i = i + 1) begin : b wire w; end endmodule");
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        assert!(matches!(ast.node(ast.items(md)[1]), Node::LoopGenerate { .. }));
    }

    #[test]
    fn parses_include() {
        let (_ast, frags) = parse_ok("include \"lib.v\";");
        assert!(matches!(&frags[0], Fragment::Include(p) if p == "lib.v"));
    }

    #[test]
    fn parses_module_attrs() {
        let (ast, frags) = parse_ok("(*__std = \"clock\"*) module Clock(val); output reg val; endmodule");
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        assert_eq!(ast.attr_value(md, "__std"), Some("clock"));
    }

    #[test]
    fn rejects_unsupported_keyword() {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        parse("module m(); task t; endtask endmodule", &mut ast, &sink);
        assert!(sink.has_errors());
    }

    #[test]
    fn comma_declarator_list_expands() {
        let (ast, frags) = parse_ok("module m(); wire a, b, c; endmodule");
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        assert_eq!(ast.items(md).len(), 3);
    }
}
