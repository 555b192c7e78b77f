//! Expression parsing: precedence climbing, literals, and hierarchical
//! identifiers.

use crate::parser::Parser;
use crate::token::TokenKind;
use cascade_ast::{BinaryOp, IdPart, Node, NodeId, UnaryOp};
use cascade_common::bits::Kind;
use cascade_common::Bits;

/// Left binding powers; `**` is right-associative and handled specially.
fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let entry = match kind {
        TokenKind::PipePipe => (BinaryOp::LogicalOr, 1),
        TokenKind::AmpAmp => (BinaryOp::LogicalAnd, 2),
        TokenKind::Pipe => (BinaryOp::Or, 3),
        TokenKind::Caret => (BinaryOp::Xor, 4),
        TokenKind::TildeCaret => (BinaryOp::Xnor, 4),
        TokenKind::Amp => (BinaryOp::And, 5),
        TokenKind::EqEq => (BinaryOp::Eq, 6),
        TokenKind::BangEq => (BinaryOp::Ne, 6),
        TokenKind::Lt => (BinaryOp::Lt, 7),
        TokenKind::LtEq => (BinaryOp::Le, 7),
        TokenKind::Gt => (BinaryOp::Gt, 7),
        TokenKind::GtEq => (BinaryOp::Ge, 7),
        TokenKind::Shl => (BinaryOp::Sll, 8),
        TokenKind::Sal => (BinaryOp::Sal, 8),
        TokenKind::Shr => (BinaryOp::Slr, 8),
        TokenKind::Sar => (BinaryOp::Sar, 8),
        TokenKind::Plus => (BinaryOp::Add, 9),
        TokenKind::Minus => (BinaryOp::Sub, 9),
        TokenKind::Star => (BinaryOp::Mul, 10),
        TokenKind::Slash => (BinaryOp::Div, 10),
        TokenKind::Percent => (BinaryOp::Mod, 10),
        TokenKind::StarStar => (BinaryOp::Pow, 11),
        _ => return None,
    };
    Some(entry)
}

impl Parser<'_> {
    /// Parses a full expression (ternary precedence level).
    pub(crate) fn parse_expr(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let cond = self.parse_binary(1)?;
        if self.eat(TokenKind::Question) {
            let then_val = self.parse_expr()?;
            self.expect(TokenKind::Colon, "':'");
            let else_val = self.parse_expr()?;
            return Some(self.ast.alloc(
                Node::Conditional {
                    cond,
                    then_val,
                    else_val,
                },
                span,
            ));
        }
        Some(cond)
    }

    fn parse_binary(&mut self, min_bp: u8) -> Option<NodeId> {
        let span = self.current_span();
        let mut lhs = self.parse_unary()?;
        while let Some((op, bp)) = binary_op(self.current()) {
            if bp < min_bp {
                break;
            }
            self.advance();
            // Right-associative exponentiation; everything else binds left.
            let next_bp = if op == BinaryOp::Pow { bp } else { bp + 1 };
            let rhs = self.parse_binary(next_bp)?;
            lhs = self.ast.alloc(Node::Binary { op, lhs, rhs }, span);
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let op = match self.current() {
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Bang => Some(UnaryOp::LogicalNot),
            TokenKind::Tilde => Some(UnaryOp::BitwiseNot),
            TokenKind::Amp => Some(UnaryOp::ReduceAnd),
            TokenKind::TildeAmp => Some(UnaryOp::ReduceNand),
            TokenKind::Pipe => Some(UnaryOp::ReduceOr),
            TokenKind::TildePipe => Some(UnaryOp::ReduceNor),
            TokenKind::Caret => Some(UnaryOp::ReduceXor),
            TokenKind::TildeCaret => Some(UnaryOp::ReduceXnor),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.parse_unary()?;
            return Some(self.ast.alloc(Node::Unary { op, arg }, span));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        match self.current() {
            TokenKind::Number => self.parse_number(),
            TokenKind::StringLit => {
                let val = self.string_value();
                self.advance();
                Some(self.ast.alloc(Node::StringLit { val }, span))
            }
            TokenKind::Identifier => self.parse_hier_ident(),
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'");
                Some(inner)
            }
            TokenKind::LBrace => self.parse_concat(),
            TokenKind::SysIdent => {
                let text = self.current_text();
                match text {
                    "$fopen" => {
                        self.advance();
                        self.expect(TokenKind::LParen, "'('");
                        let path = self.parse_expr()?;
                        self.expect(TokenKind::RParen, "')'");
                        Some(self.ast.alloc(Node::Fopen { path }, span))
                    }
                    "$feof" => {
                        self.advance();
                        self.expect(TokenKind::LParen, "'('");
                        let fd = self.parse_expr()?;
                        self.expect(TokenKind::RParen, "')'");
                        Some(self.ast.alloc(Node::Feof { fd }, span))
                    }
                    other => {
                        self.error_here(&format!(
                            "system function {other} is not supported in expressions"
                        ));
                        None
                    }
                }
            }
            _ => {
                self.error_here("expected an expression");
                None
            }
        }
    }

    fn parse_concat(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::LBrace, "'{'");
        let first = self.parse_expr()?;
        if self.at(TokenKind::LBrace) {
            // Replication: {count{a, b, ...}}
            let value = self.parse_concat()?;
            self.expect(TokenKind::RBrace, "'}'");
            return Some(self.ast.alloc(
                Node::Replicate {
                    count: first,
                    value,
                },
                span,
            ));
        }
        let mut parts = vec![first];
        while self.eat(TokenKind::Comma) {
            parts.push(self.parse_expr()?);
        }
        self.expect(TokenKind::RBrace, "'}'");
        Some(self.ast.alloc(Node::Concat { parts }, span))
    }

    /// Parses a hierarchical identifier with per-segment subscripts and
    /// trailing bit/part selects on the final segment.
    pub(crate) fn parse_hier_ident(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let mut path = Vec::new();
        let (dims, _) = loop {
            let name = self.expect_name()?;
            let mut subs = Vec::new();
            let mut has_range = false;
            while self.at(TokenKind::LBracket) {
                self.advance();
                let sspan = self.current_span();
                let first = self.parse_expr()?;
                if self.eat(TokenKind::Colon) {
                    let lsb = self.parse_expr()?;
                    has_range = true;
                    subs.push(self.ast.alloc(Node::Range { msb: first, lsb }, sspan));
                } else {
                    subs.push(first);
                }
                self.expect(TokenKind::RBracket, "']'");
            }
            if self.eat(TokenKind::Dot) {
                if has_range || subs.len() > 1 {
                    self.error_here("a hierarchical path segment takes at most one subscript");
                    return None;
                }
                path.push(IdPart {
                    name,
                    index: subs.first().copied(),
                });
            } else {
                path.push(IdPart { name, index: None });
                break (subs, name);
            }
        };
        Some(self.ast.alloc(Node::Identifier { path, dims }, span))
    }

    /// Parses an assignment target: a hierarchical identifier or a
    /// concatenation of targets.
    pub(crate) fn parse_lvalue(&mut self) -> Option<NodeId> {
        if self.at(TokenKind::LBrace) {
            let span = self.current_span();
            self.advance();
            let mut parts = vec![self.parse_hier_ident()?];
            while self.eat(TokenKind::Comma) {
                parts.push(self.parse_hier_ident()?);
            }
            self.expect(TokenKind::RBrace, "'}'");
            return Some(self.ast.alloc(Node::Concat { parts }, span));
        }
        self.parse_hier_ident()
    }

    /// Interprets a number token: decimal, based, or real.
    fn parse_number(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let text = self.current_text().to_string();
        self.advance();
        let val = if let Some(tick) = text.find('\'') {
            let size_str: String = text[..tick].chars().filter(|c| *c != '_').collect();
            let mut rest = text[tick + 1..].chars();
            let mut base_ch = rest.next().unwrap_or('d');
            let signed = base_ch == 's' || base_ch == 'S';
            if signed {
                base_ch = rest.next().unwrap_or('d');
            }
            let radix = match base_ch.to_ascii_lowercase() {
                'b' => 2,
                'o' => 8,
                'd' => 10,
                'h' => 16,
                _ => {
                    self.error_here("malformed based literal");
                    return None;
                }
            };
            let digits: String = rest.collect();
            let parsed = match Bits::parse_radix(&digits, radix) {
                Ok(v) => v,
                Err(e) => {
                    self.error_here(&format!("bad literal: {e}"));
                    return None;
                }
            };
            let width = if size_str.is_empty() {
                parsed.width().max(32)
            } else {
                match size_str.parse::<u32>() {
                    Ok(w) if w > 0 => w,
                    _ => {
                        self.error_here("illegal literal size");
                        return None;
                    }
                }
            };
            let kind = if signed { Kind::Signed } else { Kind::Unsigned };
            parsed.resize(width).with_kind(kind)
        } else if text.contains('.') || text.contains('e') || text.contains('E') {
            match text.replace('_', "").parse::<f64>() {
                Ok(v) => Bits::real(v),
                Err(_) => {
                    self.error_here("malformed real literal");
                    return None;
                }
            }
        } else {
            match Bits::parse_radix(&text, 10) {
                Ok(v) => {
                    let w = v.width().max(32);
                    v.resize(w).with_kind(Kind::Signed)
                }
                Err(e) => {
                    self.error_here(&format!("bad literal: {e}"));
                    return None;
                }
            }
        };
        Some(self.ast.alloc(Node::Number { val }, span))
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse, Fragment};
    use cascade_ast::{Ast, BinaryOp, Node};
    use cascade_common::bits::Kind;
    use cascade_common::Interner;
    use cascade_diagnostics::DiagnosticSink;
    use std::sync::Arc;

    fn parse_rhs(expr: &str) -> (Ast, cascade_ast::NodeId) {
        let src = format!("assign x = {expr};");
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(&src, &mut ast, &sink);
        assert!(!sink.has_errors(), "errors: {:?}", sink.take_all());
        let Fragment::Item(item) = frags[0] else {
            panic!()
        };
        let Node::ContAssign { rhs, .. } = ast.node(item) else {
            panic!()
        };
        let rhs = *rhs;
        (ast, rhs)
    }

    #[test]
    fn precedence_mul_over_add() {
        let (ast, rhs) = parse_rhs("a + b * c");
        let Node::Binary { op, rhs: r, .. } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            ast.node(*r),
            Node::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn sized_literal() {
        let (ast, rhs) = parse_rhs("4'b1010");
        let Node::Number { val } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(val.width(), 4);
        assert_eq!(val.to_u64(), 0b1010);
    }

    #[test]
    fn signed_literal() {
        let (ast, rhs) = parse_rhs("8'shFF");
        let Node::Number { val } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(val.kind(), Kind::Signed);
        assert_eq!(val.to_i64(), -1);
    }

    #[test]
    fn unsized_decimal_is_32_bit_signed() {
        let (ast, rhs) = parse_rhs("9");
        let Node::Number { val } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(val.width(), 32);
        assert_eq!(val.kind(), Kind::Signed);
        assert_eq!(val.to_u64(), 9);
    }

    #[test]
    fn hierarchical_identifier_with_selects() {
        let (ast, rhs) = parse_rhs("clock.val");
        let Node::Identifier { path, dims } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(path.len(), 2);
        assert!(dims.is_empty());

        let (ast, rhs) = parse_rhs("mem[3][7:0]");
        let Node::Identifier { path, dims } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(path.len(), 1);
        assert_eq!(dims.len(), 2);
        assert!(matches!(ast.node(dims[1]), Node::Range { .. }));
    }

    #[test]
    fn concat_and_replicate() {
        let (ast, rhs) = parse_rhs("{a, b}");
        assert!(matches!(ast.node(rhs), Node::Concat { parts } if parts.len() == 2));
        let (ast, rhs) = parse_rhs("{4{a}}");
        assert!(matches!(ast.node(rhs), Node::Replicate { .. }));
    }

    #[test]
    fn ternary() {
        let (ast, rhs) = parse_rhs("a ? b : c");
        assert!(matches!(ast.node(rhs), Node::Conditional { .. }));
    }

    #[test]
    fn power_is_right_associative() {
        let (ast, rhs) = parse_rhs("a ** b ** c");
        let Node::Binary { op, rhs: r, .. } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert!(matches!(
            ast.node(*r),
            Node::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn real_literal() {
        let (ast, rhs) = parse_rhs("2.5");
        let Node::Number { val } = ast.node(rhs) else {
            panic!()
        };
        assert_eq!(val.kind(), Kind::Real);
        assert_eq!(val.to_double(), 2.5);
    }
}
