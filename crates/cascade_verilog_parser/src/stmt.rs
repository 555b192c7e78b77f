//! Statement parsing: blocks, conditionals, loops, timing controls, and
//! system tasks.

use crate::parser::Parser;
use crate::token::TokenKind;
use cascade_ast::{CaseKind, Edge, Node, NodeId};

impl Parser<'_> {
    /// Parses one statement.
    pub(crate) fn parse_stmt(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        match self.current() {
            TokenKind::Begin => self.parse_seq_block(),
            TokenKind::If => {
                self.advance();
                self.expect(TokenKind::LParen, "'('");
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'");
                let then_stmt = self.parse_stmt()?;
                let else_stmt = if self.eat(TokenKind::Else) {
                    Some(self.parse_stmt()?)
                } else {
                    None
                };
                Some(self.ast.alloc(
                    Node::If {
                        cond,
                        then_stmt,
                        else_stmt,
                    },
                    span,
                ))
            }
            TokenKind::Case | TokenKind::Casex | TokenKind::Casez => self.parse_case_stmt(),
            TokenKind::For => {
                self.advance();
                self.expect(TokenKind::LParen, "'('");
                let init = self.parse_bare_assign()?;
                self.expect(TokenKind::Semi, "';'");
                let cond = self.parse_expr()?;
                self.expect(TokenKind::Semi, "';'");
                let update = self.parse_bare_assign()?;
                self.expect(TokenKind::RParen, "')'");
                let body = self.parse_stmt()?;
                Some(self.ast.alloc(
                    Node::For {
                        init,
                        cond,
                        update,
                        body,
                    },
                    span,
                ))
            }
            TokenKind::While => {
                self.advance();
                self.expect(TokenKind::LParen, "'('");
                let cond = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'");
                let body = self.parse_stmt()?;
                Some(self.ast.alloc(Node::While { cond, body }, span))
            }
            TokenKind::Repeat => {
                self.advance();
                self.expect(TokenKind::LParen, "'('");
                let count = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'");
                let body = self.parse_stmt()?;
                Some(self.ast.alloc(Node::RepeatStmt { count, body }, span))
            }
            TokenKind::Forever => {
                self.advance();
                let body = self.parse_stmt()?;
                Some(self.ast.alloc(Node::Forever { body }, span))
            }
            TokenKind::At => {
                let ctrl = self.parse_event_control()?;
                let stmt = self.parse_stmt()?;
                Some(self.ast.alloc(Node::Timing { ctrl, stmt }, span))
            }
            TokenKind::Hash => {
                self.advance();
                let delay = self.parse_expr()?;
                let ctrl = self.ast.alloc(Node::DelayControl { delay }, span);
                let stmt = self.parse_stmt()?;
                Some(self.ast.alloc(Node::Timing { ctrl, stmt }, span))
            }
            TokenKind::SysIdent => self.parse_sys_task(),
            TokenKind::Semi => {
                self.advance();
                Some(self.ast.alloc(
                    Node::SeqBlock {
                        name: None,
                        stmts: Vec::new(),
                    },
                    span,
                ))
            }
            TokenKind::Unsupported => {
                self.error_here(&format!(
                    "`{}` is outside the accepted Verilog subset",
                    self.current_text()
                ));
                None
            }
            _ => {
                let lhs = self.parse_lvalue()?;
                let node = if self.eat(TokenKind::Eq) {
                    let rhs = self.parse_expr()?;
                    Node::BlockingAssign { lhs, rhs }
                } else if self.eat(TokenKind::LtEq) {
                    let rhs = self.parse_expr()?;
                    Node::NonblockingAssign { lhs, rhs }
                } else {
                    self.error_here("expected '=' or '<=' in assignment");
                    return None;
                };
                self.expect(TokenKind::Semi, "';'");
                Some(self.ast.alloc(node, span))
            }
        }
    }

    fn parse_seq_block(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::Begin, "`begin`");
        let name = if self.eat(TokenKind::Colon) {
            Some(self.expect_plain_ident()?)
        } else {
            None
        };
        let mut stmts = Vec::new();
        while !self.at(TokenKind::End) {
            if self.at_eof() {
                self.error_here("unterminated begin/end block");
                return None;
            }
            // Block-local declarations (named blocks only; the type checker
            // enforces the naming rule).
            match self.current() {
                TokenKind::Reg => stmts.extend(self.parse_reg_decl()?),
                TokenKind::Integer => stmts.extend(self.parse_integer_decl()?),
                _ => stmts.push(self.parse_stmt()?),
            }
        }
        self.expect(TokenKind::End, "`end`");
        Some(self.ast.alloc(Node::SeqBlock { name, stmts }, span))
    }

    fn parse_case_stmt(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let kind = match self.current() {
            TokenKind::Casex => CaseKind::Casex,
            TokenKind::Casez => CaseKind::Casez,
            _ => CaseKind::Case,
        };
        self.advance();
        self.expect(TokenKind::LParen, "'('");
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen, "')'");
        let mut arms = Vec::new();
        while !self.at(TokenKind::Endcase) {
            if self.at_eof() {
                self.error_here("unterminated case statement");
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
            let stmt = self.parse_stmt()?;
            arms.push(self.ast.alloc(Node::CaseArm { labels, stmt }, aspan));
        }
        self.expect(TokenKind::Endcase, "`endcase`");
        Some(self.ast.alloc(Node::CaseStmt { kind, cond, arms }, span))
    }

    /// Parses `@*`, `@(*)`, or `@(event or event, ...)`.
    fn parse_event_control(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        self.expect(TokenKind::At, "'@'");
        if self.eat(TokenKind::Star) {
            return Some(self.ast.alloc(Node::EventControl { events: Vec::new() }, span));
        }
        self.expect(TokenKind::LParen, "'('");
        // `@(*)` lexes the trailing `*)` as a single attribute-close token.
        if self.eat(TokenKind::AttrClose) {
            return Some(self.ast.alloc(Node::EventControl { events: Vec::new() }, span));
        }
        if self.eat(TokenKind::Star) {
            self.expect(TokenKind::RParen, "')'");
            return Some(self.ast.alloc(Node::EventControl { events: Vec::new() }, span));
        }
        let mut events = Vec::new();
        loop {
            let espan = self.current_span();
            let edge = if self.eat(TokenKind::Posedge) {
                Edge::Pos
            } else if self.eat(TokenKind::Negedge) {
                Edge::Neg
            } else {
                Edge::Any
            };
            let expr = self.parse_expr()?;
            events.push(self.ast.alloc(Node::Event { edge, expr }, espan));
            if self.eat(TokenKind::Or) || self.eat(TokenKind::Comma) {
                continue;
            }
            break;
        }
        self.expect(TokenKind::RParen, "')'");
        Some(self.ast.alloc(Node::EventControl { events }, span))
    }

    fn parse_sys_task(&mut self) -> Option<NodeId> {
        let span = self.current_span();
        let name = self.current_text().to_string();
        self.advance();
        let node = match name.as_str() {
            "$display" | "$write" | "$error" | "$warning" | "$info" => {
                let mut args = Vec::new();
                if self.eat(TokenKind::LParen) {
                    if !self.at(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "')'");
                }
                match name.as_str() {
                    "$display" => Node::Display { args },
                    "$write" => Node::Write { args },
                    "$error" => Node::ErrorTask { args },
                    "$warning" => Node::WarningTask { args },
                    _ => Node::InfoTask { args },
                }
            }
            "$finish" => {
                let code = if self.eat(TokenKind::LParen) {
                    let c = self.parse_expr()?;
                    self.expect(TokenKind::RParen, "')'");
                    Some(c)
                } else {
                    None
                };
                Node::Finish { code }
            }
            "$restart" | "$save" | "$retarget" => {
                self.expect(TokenKind::LParen, "'('");
                let arg = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'");
                match name.as_str() {
                    "$restart" => Node::Restart { path: arg },
                    "$save" => Node::Save { path: arg },
                    _ => Node::Retarget { target: arg },
                }
            }
            "$get" => {
                self.expect(TokenKind::LParen, "'('");
                let fd = self.parse_expr()?;
                self.expect(TokenKind::Comma, "','");
                let target = self.parse_hier_ident()?;
                self.expect(TokenKind::RParen, "')'");
                Node::Get { fd, target }
            }
            "$put" => {
                self.expect(TokenKind::LParen, "'('");
                let fd = self.parse_expr()?;
                self.expect(TokenKind::Comma, "','");
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen, "')'");
                Node::Put { fd, expr }
            }
            other => {
                self.error_here(&format!("unknown system task {other}"));
                return None;
            }
        };
        self.expect(TokenKind::Semi, "';'");
        Some(self.ast.alloc(node, span))
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse, Fragment};
    use cascade_ast::{Ast, Edge, Node, NodeId};
    use cascade_common::Interner;
    use cascade_diagnostics::DiagnosticSink;
    use std::sync::Arc;

    fn parse_initial(body: &str) -> (Ast, NodeId) {
        let src = format!("initial {body}");
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(&src, &mut ast, &sink);
        assert!(!sink.has_errors(), "errors: {:?}", sink.take_all());
        let Fragment::Item(item) = frags[0] else {
            panic!()
        };
        let Node::Initial { stmt } = ast.node(item) else {
            panic!()
        };
        let stmt = *stmt;
        (ast, stmt)
    }

    #[test]
    fn parses_display_task() {
        let (ast, stmt) = parse_initial("$display(\"Hello World\");");
        let Node::Display { args } = ast.node(stmt) else {
            panic!()
        };
        assert_eq!(args.len(), 1);
        assert!(matches!(ast.node(args[0]), Node::StringLit { val } if val == "Hello World"));
    }

    #[test]
    fn parses_finish() {
        let (ast, stmt) = parse_initial("$finish;");
        assert!(matches!(ast.node(stmt), Node::Finish { code: None }));
        let (ast, stmt) = parse_initial("$finish(2);");
        assert!(matches!(ast.node(stmt), Node::Finish { code: Some(_) }));
    }

    #[test]
    fn parses_event_guarded_block() {
        let (ast, stmt) = parse_initial("@(posedge clock.val) begin r <= r + 1; end");
        let Node::Timing { ctrl, stmt: body } = ast.node(stmt) else {
            panic!()
        };
        let Node::EventControl { events } = ast.node(*ctrl) else {
            panic!()
        };
        assert_eq!(events.len(), 1);
        assert!(matches!(ast.node(events[0]), Node::Event { edge: Edge::Pos, .. }));
        let Node::SeqBlock { stmts, .. } = ast.node(*body) else {
            panic!()
        };
        assert!(matches!(ast.node(stmts[0]), Node::NonblockingAssign { .. }));
    }

    #[test]
    fn parses_star_event() {
        let (ast, stmt) = parse_initial("@* x = 1;");
        let Node::Timing { ctrl, .. } = ast.node(stmt) else {
            panic!()
        };
        assert!(matches!(ast.node(*ctrl), Node::EventControl { events } if events.is_empty()));
    }

    #[test]
    fn parses_case_with_default() {
        let (ast, stmt) = parse_initial("case (x) 0: y = 1; 1, 2: y = 2; default: y = 3; endcase");
        let Node::CaseStmt { arms, .. } = ast.node(stmt) else {
            panic!()
        };
        assert_eq!(arms.len(), 3);
        let Node::CaseArm { labels, .. } = ast.node(arms[2]) else {
            panic!()
        };
        assert!(labels.is_empty());
    }

    #[test]
    fn parses_delay_control() {
        let (ast, stmt) = parse_initial("#10 x = 1;");
        let Node::Timing { ctrl, .. } = ast.node(stmt) else {
            panic!()
        };
        assert!(matches!(ast.node(*ctrl), Node::DelayControl { .. }));
    }

    #[test]
    fn parses_named_block_with_decl() {
        let (ast, stmt) = parse_initial("begin : b reg t; t = 1; end");
        let Node::SeqBlock { name, stmts } = ast.node(stmt) else {
            panic!()
        };
        assert!(name.is_some());
        assert_eq!(stmts.len(), 2);
        assert!(matches!(ast.node(stmts[0]), Node::RegDecl { .. }));
    }

    #[test]
    fn parses_get_and_put() {
        let (ast, stmt) = parse_initial("begin $get(fd, x); $put(fd, x + 1); end");
        let Node::SeqBlock { stmts, .. } = ast.node(stmt) else {
            panic!()
        };
        assert!(matches!(ast.node(stmts[0]), Node::Get { .. }));
        assert!(matches!(ast.node(stmts[1]), Node::Put { .. }));
    }

    #[test]
    fn nonblocking_vs_relational() {
        // Statement context: `<=` after an lvalue is a nonblocking assign;
        // inside the rhs expression it is relational.
        let (ast, stmt) = parse_initial("r <= a <= b;");
        let Node::NonblockingAssign { rhs, .. } = ast.node(stmt) else {
            panic!()
        };
        assert!(matches!(
            ast.node(*rhs),
            Node::Binary {
                op: cascade_ast::BinaryOp::Le,
                ..
            }
        ));
    }
}
