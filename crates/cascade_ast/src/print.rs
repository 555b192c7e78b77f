//! Verilog source emission.
//!
//! The proxy compiler ships module declarations to worker runtimes as source
//! text, and diagnostics quote offending constructs; both go through this
//! printer. Output is parseable by the Cascade front-end but makes no
//! attempt to preserve the original formatting.

use crate::ast::Ast;
use crate::ids::NodeId;
use crate::node::{Attr, BinaryOp, CaseKind, Edge, Node, PortDir, UnaryOp};
use std::fmt::Write;

/// Renders the subtree rooted at `id` as Verilog source text.
pub fn emit(ast: &Ast, id: NodeId) -> String {
    let mut p = Printer {
        ast,
        out: String::new(),
        indent: 0,
    };
    p.node(id);
    p.out
}

struct Printer<'a> {
    ast: &'a Ast,
    out: String,
    indent: usize,
}

impl Printer<'_> {
    fn pad(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }

    fn attrs(&mut self, attrs: &[Attr]) {
        if attrs.is_empty() {
            return;
        }
        self.out.push_str("(*");
        for (i, a) in attrs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push_str(&a.name);
            if let Some(v) = &a.value {
                let _ = write!(self.out, " = \"{v}\"");
            }
        }
        self.out.push_str("*) ");
    }

    fn node(&mut self, id: NodeId) {
        match self.ast.node(id).clone() {
            Node::Number { val } => {
                if val.kind() == cascade_common::bits::Kind::Real {
                    let text = format!("{}", val.to_double());
                    // Reals must reparse as reals.
                    if text.contains('.') || text.contains('e') {
                        self.out.push_str(&text);
                    } else {
                        let _ = write!(self.out, "{text}.0");
                    }
                } else {
                    let _ = write!(
                        self.out,
                        "{}'{}h{}",
                        val.width(),
                        if val.kind() == cascade_common::bits::Kind::Signed {
                            "s"
                        } else {
                            ""
                        },
                        val.format_radix(16).unwrap_or_default()
                    );
                }
            }
            Node::StringLit { val } => {
                let escaped = val.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n");
                let _ = write!(self.out, "\"{escaped}\"");
            }
            Node::Identifier { path, dims } => {
                for (i, part) in path.iter().enumerate() {
                    if i > 0 {
                        self.out.push('.');
                    }
                    self.out.push_str(self.ast.interner().resolve(part.name));
                    if let Some(sel) = part.index {
                        self.out.push('[');
                        self.node(sel);
                        self.out.push(']');
                    }
                }
                for d in dims {
                    self.out.push('[');
                    self.node(d);
                    self.out.push(']');
                }
            }
            Node::Unary { op, arg } => {
                self.out.push_str(unary_str(op));
                self.out.push('(');
                self.node(arg);
                self.out.push(')');
            }
            Node::Binary { op, lhs, rhs } => {
                self.out.push('(');
                self.node(lhs);
                let _ = write!(self.out, " {} ", binary_str(op));
                self.node(rhs);
                self.out.push(')');
            }
            Node::Conditional {
                cond,
                then_val,
                else_val,
            } => {
                self.out.push('(');
                self.node(cond);
                self.out.push_str(" ? ");
                self.node(then_val);
                self.out.push_str(" : ");
                self.node(else_val);
                self.out.push(')');
            }
            Node::Concat { parts } => {
                self.out.push('{');
                self.comma_list(&parts);
                self.out.push('}');
            }
            Node::Replicate { count, value } => {
                self.out.push('{');
                self.node(count);
                self.node(value);
                self.out.push('}');
            }
            Node::Range { msb, lsb } => {
                self.node(msb);
                self.out.push(':');
                self.node(lsb);
            }
            Node::Fopen { path } => {
                self.out.push_str("$fopen(");
                self.node(path);
                self.out.push(')');
            }
            Node::Feof { fd } => {
                self.out.push_str("$feof(");
                self.node(fd);
                self.out.push(')');
            }
            Node::NetDecl {
                name,
                signed,
                range,
                init,
            } => {
                self.out.push_str("wire ");
                if signed {
                    self.out.push_str("signed ");
                }
                self.range_opt(range);
                self.node(name);
                if let Some(init) = init {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                self.out.push(';');
            }
            Node::RegDecl {
                name,
                signed,
                range,
                arrays,
                init,
            } => {
                self.out.push_str("reg ");
                if signed {
                    self.out.push_str("signed ");
                }
                self.range_opt(range);
                self.node(name);
                for a in arrays {
                    self.out.push('[');
                    self.node(a);
                    self.out.push(']');
                }
                if let Some(init) = init {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                self.out.push(';');
            }
            Node::IntegerDecl { name, init } => {
                self.out.push_str("integer ");
                self.node(name);
                if let Some(init) = init {
                    self.out.push_str(" = ");
                    self.node(init);
                }
                self.out.push(';');
            }
            Node::GenvarDecl { name } => {
                self.out.push_str("genvar ");
                self.node(name);
                self.out.push(';');
            }
            Node::ParamDecl {
                name,
                signed,
                range,
                init,
            } => {
                self.out.push_str("parameter ");
                if signed {
                    self.out.push_str("signed ");
                }
                self.range_opt(range);
                self.node(name);
                self.out.push_str(" = ");
                self.node(init);
                self.out.push(';');
            }
            Node::LocalparamDecl {
                name,
                signed,
                range,
                init,
            } => {
                self.out.push_str("localparam ");
                if signed {
                    self.out.push_str("signed ");
                }
                self.range_opt(range);
                self.node(name);
                self.out.push_str(" = ");
                self.node(init);
                self.out.push(';');
            }
            Node::PortDecl { dir, decl } => {
                self.out.push_str(match dir {
                    PortDir::Input => "input ",
                    PortDir::Output => "output ",
                    PortDir::Inout => "inout ",
                });
                self.node(decl);
            }
            Node::ModuleDecl {
                attrs,
                name,
                ports,
                items,
            } => {
                self.attrs(&attrs);
                self.out.push_str("module ");
                self.node(name);
                self.out.push('(');
                self.comma_list(&ports);
                self.out.push_str(");\n");
                self.indent += 1;
                for item in items {
                    self.pad();
                    self.node(item);
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.out.push_str("endmodule");
            }
            Node::ModuleInst {
                attrs,
                module,
                name,
                params,
                ports,
            } => {
                self.attrs(&attrs);
                self.node(module);
                if !params.is_empty() {
                    self.out.push_str(" #(");
                    self.comma_list(&params);
                    self.out.push(')');
                }
                self.out.push(' ');
                self.node(name);
                self.out.push('(');
                self.comma_list(&ports);
                self.out.push_str(");");
            }
            Node::ArgAssign { port, expr } => {
                if let Some(port) = port {
                    self.out.push('.');
                    self.node(port);
                    self.out.push('(');
                    if let Some(expr) = expr {
                        self.node(expr);
                    }
                    self.out.push(')');
                } else if let Some(expr) = expr {
                    self.node(expr);
                }
            }
            Node::ContAssign { lhs, rhs } => {
                self.out.push_str("assign ");
                self.node(lhs);
                self.out.push_str(" = ");
                self.node(rhs);
                self.out.push(';');
            }
            Node::Always { stmt } => {
                self.out.push_str("always ");
                self.node(stmt);
            }
            Node::Initial { stmt } => {
                self.out.push_str("initial ");
                self.node(stmt);
            }
            Node::IfGenerate {
                clauses,
                else_block,
            } => {
                for (i, clause) in clauses.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(" else ");
                    }
                    self.node(*clause);
                }
                if let Some(eb) = else_block {
                    self.out.push_str(" else ");
                    self.node(eb);
                }
            }
            Node::IfGenClause { cond, block } => {
                self.out.push_str("if (");
                self.node(cond);
                self.out.push_str(") ");
                self.node(block);
            }
            Node::CaseGenerate { cond, arms } => {
                self.out.push_str("case (");
                self.node(cond);
                self.out.push_str(")\n");
                self.indent += 1;
                for arm in arms {
                    self.pad();
                    self.node(arm);
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.pad();
                self.out.push_str("endcase");
            }
            Node::CaseGenArm { labels, block } => {
                if labels.is_empty() {
                    self.out.push_str("default");
                } else {
                    self.comma_list(&labels);
                }
                self.out.push_str(": ");
                self.node(block);
            }
            Node::LoopGenerate {
                init,
                cond,
                update,
                block,
            } => {
                self.out.push_str("for (");
                self.assign_bare(init);
                self.out.push_str("; ");
                self.node(cond);
                self.out.push_str("; ");
                self.assign_bare(update);
                self.out.push_str(") ");
                self.node(block);
            }
            Node::GenBlock { name, items } => {
                self.out.push_str("begin");
                if let Some(name) = name {
                    self.out.push_str(" : ");
                    self.node(name);
                }
                self.out.push('\n');
                self.indent += 1;
                for item in items {
                    self.pad();
                    self.node(item);
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.pad();
                self.out.push_str("end");
            }
            Node::SeqBlock { name, stmts } => {
                self.out.push_str("begin");
                if let Some(name) = name {
                    self.out.push_str(" : ");
                    self.node(name);
                }
                self.out.push('\n');
                self.indent += 1;
                for stmt in stmts {
                    self.pad();
                    self.node(stmt);
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.pad();
                self.out.push_str("end");
            }
            Node::BlockingAssign { .. } => {
                self.assign_bare(id);
                self.out.push(';');
            }
            Node::NonblockingAssign { lhs, rhs } => {
                self.node(lhs);
                self.out.push_str(" <= ");
                self.node(rhs);
                self.out.push(';');
            }
            Node::If {
                cond,
                then_stmt,
                else_stmt,
            } => {
                self.out.push_str("if (");
                self.node(cond);
                self.out.push_str(") ");
                self.node(then_stmt);
                if let Some(es) = else_stmt {
                    self.out.push_str(" else ");
                    self.node(es);
                }
            }
            Node::CaseStmt { kind, cond, arms } => {
                self.out.push_str(match kind {
                    CaseKind::Case => "case (",
                    CaseKind::Casex => "casex (",
                    CaseKind::Casez => "casez (",
                });
                self.node(cond);
                self.out.push_str(")\n");
                self.indent += 1;
                for arm in arms {
                    self.pad();
                    self.node(arm);
                    self.out.push('\n');
                }
                self.indent -= 1;
                self.pad();
                self.out.push_str("endcase");
            }
            Node::CaseArm { labels, stmt } => {
                if labels.is_empty() {
                    self.out.push_str("default");
                } else {
                    self.comma_list(&labels);
                }
                self.out.push_str(": ");
                self.node(stmt);
            }
            Node::For {
                init,
                cond,
                update,
                body,
            } => {
                self.out.push_str("for (");
                self.assign_bare(init);
                self.out.push_str("; ");
                self.node(cond);
                self.out.push_str("; ");
                self.assign_bare(update);
                self.out.push_str(") ");
                self.node(body);
            }
            Node::While { cond, body } => {
                self.out.push_str("while (");
                self.node(cond);
                self.out.push_str(") ");
                self.node(body);
            }
            Node::RepeatStmt { count, body } => {
                self.out.push_str("repeat (");
                self.node(count);
                self.out.push_str(") ");
                self.node(body);
            }
            Node::Forever { body } => {
                self.out.push_str("forever ");
                self.node(body);
            }
            Node::Timing { ctrl, stmt } => {
                self.node(ctrl);
                self.out.push(' ');
                self.node(stmt);
            }
            Node::EventControl { events } => {
                if events.is_empty() {
                    self.out.push_str("@*");
                } else {
                    self.out.push_str("@(");
                    for (i, e) in events.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(" or ");
                        }
                        self.node(*e);
                    }
                    self.out.push(')');
                }
            }
            Node::Event { edge, expr } => {
                match edge {
                    Edge::Pos => self.out.push_str("posedge "),
                    Edge::Neg => self.out.push_str("negedge "),
                    Edge::Any => {}
                }
                self.node(expr);
            }
            Node::DelayControl { delay } => {
                self.out.push('#');
                self.node(delay);
            }
            Node::Display { args } => self.task("$display", &args),
            Node::Write { args } => self.task("$write", &args),
            Node::ErrorTask { args } => self.task("$error", &args),
            Node::WarningTask { args } => self.task("$warning", &args),
            Node::InfoTask { args } => self.task("$info", &args),
            Node::Finish { code } => {
                self.out.push_str("$finish");
                if let Some(code) = code {
                    self.out.push('(');
                    self.node(code);
                    self.out.push(')');
                }
                self.out.push(';');
            }
            Node::Restart { path } => self.task("$restart", &[path]),
            Node::Retarget { target } => self.task("$retarget", &[target]),
            Node::Save { path } => self.task("$save", &[path]),
            Node::Get { fd, target } => self.task("$get", &[fd, target]),
            Node::Put { fd, expr } => self.task("$put", &[fd, expr]),
        }
    }

    fn task(&mut self, name: &str, args: &[NodeId]) {
        self.out.push_str(name);
        self.out.push('(');
        self.comma_list(args);
        self.out.push_str(");");
    }

    fn assign_bare(&mut self, id: NodeId) {
        if let Node::BlockingAssign { lhs, rhs } = self.ast.node(id).clone() {
            self.node(lhs);
            self.out.push_str(" = ");
            self.node(rhs);
        } else {
            self.node(id);
        }
    }

    fn comma_list(&mut self, ids: &[NodeId]) {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.node(*id);
        }
    }

    fn range_opt(&mut self, range: Option<NodeId>) {
        if let Some(r) = range {
            self.out.push('[');
            self.node(r);
            self.out.push_str("] ");
        }
    }
}

fn unary_str(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Plus => "+",
        UnaryOp::Minus => "-",
        UnaryOp::LogicalNot => "!",
        UnaryOp::BitwiseNot => "~",
        UnaryOp::ReduceAnd => "&",
        UnaryOp::ReduceNand => "~&",
        UnaryOp::ReduceOr => "|",
        UnaryOp::ReduceNor => "~|",
        UnaryOp::ReduceXor => "^",
        UnaryOp::ReduceXnor => "~^",
    }
}

fn binary_str(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
        BinaryOp::Xor => "^",
        BinaryOp::Xnor => "~^",
        BinaryOp::Sll => "<<",
        BinaryOp::Sal => "<<<",
        BinaryOp::Slr => ">>",
        BinaryOp::Sar => ">>>",
        BinaryOp::LogicalAnd => "&&",
        BinaryOp::LogicalOr => "||",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::{Bits, Interner};
    use cascade_diagnostics::Span;
    use std::sync::Arc;

    #[test]
    fn emits_simple_module() {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let lhs = ast.new_ident("y");
        let rhs = ast.new_ident("x");
        let assign = ast.alloc(Node::ContAssign { lhs, rhs }, Span::DUMMY);
        let name = ast.new_ident("m");
        let md = ast.alloc(
            Node::ModuleDecl {
                attrs: Vec::new(),
                name,
                ports: Vec::new(),
                items: vec![assign],
            },
            Span::DUMMY,
        );
        let text = emit(&ast, md);
        assert!(text.starts_with("module m();"));
        assert!(text.contains("assign y = x;"));
        assert!(text.ends_with("endmodule"));
    }

    #[test]
    fn emits_attributes() {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let name = ast.new_ident("Clock");
        let md = ast.alloc(
            Node::ModuleDecl {
                attrs: vec![Attr {
                    name: "__std".into(),
                    value: Some("clock".into()),
                }],
                name,
                ports: Vec::new(),
                items: Vec::new(),
            },
            Span::DUMMY,
        );
        let text = emit(&ast, md);
        assert!(text.starts_with("(*__std = \"clock\"*) module Clock"));
    }

    #[test]
    fn emits_number_as_sized_hex() {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let n = ast.alloc(
            Node::Number {
                val: Bits::new(8, 0xA5),
            },
            Span::DUMMY,
        );
        assert_eq!(emit(&ast, n), "8'ha5");
    }
}
