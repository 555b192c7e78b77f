//! Expression evaluation over [`Bits`] with Verilog width and sign rules.
//!
//! One walker serves two callers: constant evaluation during elaboration and
//! type checking (no variable source; anything that is not a parameter is an
//! error), and the software interpreter (which supplies runtime variable
//! values through [`VarRead`]). Elaboration additionally threads genvar
//! values through the `overrides` table while unrolling loops.

use crate::resolve::Resolve;
use cascade_ast::{Ast, BinaryOp, Node, NodeId, UnaryOp};
use cascade_common::bits::Kind;
use cascade_common::Bits;
use std::collections::HashMap;

/// Errors produced by expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// A constant was required but the expression references runtime state.
    #[error("expression is not constant")]
    NonConstant,
    /// An identifier did not resolve to any declaration.
    #[error("unresolved identifier '{0}'")]
    Unresolved(String),
    /// A range or subscript was malformed (reversed, out of bounds).
    #[error("illegal range or subscript")]
    BadSubscript,
    /// A replication count evaluated to zero.
    #[error("replication count must be positive")]
    ZeroReplication,
    /// The expression form is not evaluable.
    #[error("unsupported expression: {0}")]
    Unsupported(String),
}

/// A source of runtime variable values for the evaluator.
pub trait VarRead {
    /// Returns the value of a variable (or an array element addressed by
    /// `indices`), or `None` if the declaration is not a runtime variable
    /// this source knows.
    fn read_var(&self, decl: NodeId, indices: &[i64]) -> Option<Bits>;

    /// `$feof` probe. The default source knows no streams.
    fn feof(&self, fd: &Bits) -> Option<bool> {
        let _ = fd;
        None
    }

    /// `$fopen` evaluation. Only the interpreter's declaration-initializer
    /// path supplies this.
    fn fopen(&self, path: &str) -> Option<Bits> {
        let _ = path;
        None
    }
}

/// Evaluates `expr` as a constant.
pub fn const_eval(ast: &mut Ast, expr: NodeId) -> Result<Bits, EvalError> {
    Evaluate::new(ast).eval(expr)
}

/// The expression evaluator.
pub struct Evaluate<'a> {
    ast: &'a mut Ast,
    vars: Option<&'a dyn VarRead>,
    overrides: Option<&'a HashMap<NodeId, Bits>>,
}

impl<'a> Evaluate<'a> {
    /// A constant-only evaluator.
    pub fn new(ast: &'a mut Ast) -> Self {
        Self {
            ast,
            vars: None,
            overrides: None,
        }
    }

    /// An evaluator backed by runtime variable values.
    pub fn with_vars(ast: &'a mut Ast, vars: &'a dyn VarRead) -> Self {
        Self {
            ast,
            vars: Some(vars),
            overrides: None,
        }
    }

    /// A constant evaluator with per-declaration value overrides (genvars
    /// during loop unrolling).
    pub fn with_overrides(ast: &'a mut Ast, overrides: &'a HashMap<NodeId, Bits>) -> Self {
        Self {
            ast,
            vars: None,
            overrides: Some(overrides),
        }
    }

    /// Evaluates an expression node.
    pub fn eval(&mut self, expr: NodeId) -> Result<Bits, EvalError> {
        match self.ast.node(expr).clone() {
            Node::Number { val } => Ok(val),
            Node::StringLit { val } => Ok(pack_string(&val)),
            Node::Identifier { .. } => self.eval_identifier(expr),
            Node::Unary { op, arg } => {
                let v = self.eval(arg)?;
                Ok(apply_unary(op, v))
            }
            Node::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                Ok(apply_binary(op, l, r))
            }
            Node::Conditional {
                cond,
                then_val,
                else_val,
            } => {
                let c = self.eval(cond)?;
                if c.to_bool() {
                    self.eval(then_val)
                } else {
                    self.eval(else_val)
                }
            }
            Node::Concat { parts } => {
                let mut iter = parts.into_iter();
                let first = iter
                    .next()
                    .ok_or_else(|| EvalError::Unsupported("empty concatenation".into()))?;
                let mut acc = self.eval(first)?.with_kind(Kind::Unsigned);
                for part in iter {
                    let v = self.eval(part)?;
                    acc.concat(&v);
                }
                Ok(acc)
            }
            Node::Replicate { count, value } => {
                let n = self.eval(count)?.to_u64();
                if n == 0 {
                    return Err(EvalError::ZeroReplication);
                }
                let v = self.eval(value)?.with_kind(Kind::Unsigned);
                let mut acc = v.clone();
                for _ in 1..n {
                    acc.concat(&v);
                }
                Ok(acc)
            }
            Node::Feof { fd } => {
                let fd = self.eval(fd)?;
                let vars = self.vars.ok_or(EvalError::NonConstant)?;
                let eof = vars.feof(&fd).ok_or(EvalError::NonConstant)?;
                Ok(Bits::from_bool(eof))
            }
            Node::Fopen { path } => {
                let Node::StringLit { val } = self.ast.node(path).clone() else {
                    return Err(EvalError::Unsupported("$fopen takes a string path".into()));
                };
                let vars = self.vars.ok_or(EvalError::NonConstant)?;
                vars.fopen(&val).ok_or(EvalError::NonConstant)
            }
            other => Err(EvalError::Unsupported(format!("{other:?}"))),
        }
    }

    fn eval_identifier(&mut self, id: NodeId) -> Result<Bits, EvalError> {
        let decl = Resolve::new(self.ast)
            .get_resolution(id)
            .ok_or_else(|| EvalError::Unresolved(self.ident_text(id)))?;
        if let Some(overrides) = self.overrides {
            if let Some(v) = overrides.get(&decl) {
                return Ok(v.clone());
            }
        }
        match self.ast.node(decl).clone() {
            Node::ParamDecl { init, .. } | Node::LocalparamDecl { init, .. } => {
                let v = self.eval(init)?;
                let v = self.shape_to_decl(decl, v)?;
                self.apply_dims(id, decl, v)
            }
            Node::GenvarDecl { .. } => Err(EvalError::NonConstant),
            _ => {
                let vars = self.vars.ok_or(EvalError::NonConstant)?;
                let arity = array_arity(self.ast, decl);
                let Node::Identifier { dims, .. } = self.ast.node(id).clone() else {
                    return Err(EvalError::NonConstant);
                };
                let mut indices = Vec::new();
                for dim in dims.iter().take(arity) {
                    if matches!(self.ast.node(*dim), Node::Range { .. }) {
                        return Err(EvalError::BadSubscript);
                    }
                    indices.push(self.eval(*dim)?.to_i64());
                }
                let v = vars
                    .read_var(decl, &indices)
                    .ok_or(EvalError::NonConstant)?;
                self.apply_dims(id, decl, v)
            }
        }
    }

    /// Resizes and re-signs a value to match its declaration's shape.
    fn shape_to_decl(&mut self, decl: NodeId, v: Bits) -> Result<Bits, EvalError> {
        let width = self.decl_width(decl)?;
        let kind = if decl_signed(self.ast, decl) {
            Kind::Signed
        } else {
            Kind::Unsigned
        };
        if v.kind() == Kind::Real {
            return Ok(v);
        }
        Ok(v.resize(width).with_kind(kind))
    }

    /// Applies the identifier's bit/part selects beyond the array arity.
    fn apply_dims(&mut self, id: NodeId, decl: NodeId, v: Bits) -> Result<Bits, EvalError> {
        let Node::Identifier { dims, .. } = self.ast.node(id).clone() else {
            return Ok(v);
        };
        let arity = array_arity(self.ast, decl);
        let mut v = v;
        let mut offset = self.decl_range_lsb(decl)?;
        for dim in dims.into_iter().skip(arity) {
            match self.ast.node(dim).clone() {
                Node::Range { msb, lsb } => {
                    let m = self.eval(msb)?.to_i64() - offset;
                    let l = self.eval(lsb)?.to_i64() - offset;
                    if m < l || l < 0 || m >= v.width() as i64 {
                        return Err(EvalError::BadSubscript);
                    }
                    v = v.slice(m as u32, l as u32);
                }
                _ => {
                    let i = self.eval(dim)?.to_i64() - offset;
                    // Out-of-range selects read as zero in two-valued logic.
                    v = if i >= 0 && (i as u64) < v.width() as u64 {
                        Bits::from_bool(v.get(i as u32))
                    } else {
                        Bits::from_bool(false)
                    };
                }
            }
            offset = 0;
        }
        Ok(v)
    }

    fn ident_text(&self, id: NodeId) -> String {
        match self.ast.node(id) {
            Node::Identifier { path, .. } => path
                .iter()
                .map(|p| self.ast.interner().resolve(p.name))
                .collect::<Vec<_>>()
                .join("."),
            _ => String::from("<expr>"),
        }
    }

    // ========================================================================
    // Declaration shapes
    // ========================================================================

    /// The declared bit width: `[m:l]` gives `m - l + 1`, `integer` is 32,
    /// an unranged parameter takes the width of its value.
    pub fn decl_width(&mut self, decl: NodeId) -> Result<u32, EvalError> {
        match self.ast.node(decl).clone() {
            Node::PortDecl { decl, .. } => self.decl_width(decl),
            Node::NetDecl { range, .. } | Node::RegDecl { range, .. } => match range {
                Some(r) => self.range_width(r),
                None => Ok(1),
            },
            Node::IntegerDecl { .. } | Node::GenvarDecl { .. } => Ok(32),
            Node::ParamDecl { range, init, .. } | Node::LocalparamDecl { range, init, .. } => {
                match range {
                    Some(r) => self.range_width(r),
                    None => Ok(self.eval(init)?.width()),
                }
            }
            _ => Err(EvalError::Unsupported("not a declaration".into())),
        }
    }

    fn range_width(&mut self, range: NodeId) -> Result<u32, EvalError> {
        let Node::Range { msb, lsb } = self.ast.node(range).clone() else {
            return Err(EvalError::BadSubscript);
        };
        let m = self.eval(msb)?.to_i64();
        let l = self.eval(lsb)?.to_i64();
        if m < l {
            return Err(EvalError::BadSubscript);
        }
        Ok((m - l + 1) as u32)
    }

    /// The declared range's least significant index (`[m:l]` gives `l`),
    /// zero when no range is declared.
    pub fn decl_range_lsb(&mut self, decl: NodeId) -> Result<i64, EvalError> {
        let range = match self.ast.node(decl).clone() {
            Node::PortDecl { decl, .. } => return self.decl_range_lsb(decl),
            Node::NetDecl { range, .. } | Node::RegDecl { range, .. } => range,
            Node::ParamDecl { range, .. } | Node::LocalparamDecl { range, .. } => range,
            _ => None,
        };
        match range {
            Some(r) => {
                let Node::Range { lsb, .. } = self.ast.node(r).clone() else {
                    return Ok(0);
                };
                Ok(self.eval(lsb)?.to_i64())
            }
            None => Ok(0),
        }
    }

    /// The unpacked array dimensions of a declaration as `(msb, lsb)` pairs.
    pub fn decl_array_dims(&mut self, decl: NodeId) -> Result<Vec<(i64, i64)>, EvalError> {
        let arrays = match self.ast.node(decl).clone() {
            Node::PortDecl { decl, .. } => return self.decl_array_dims(decl),
            Node::RegDecl { arrays, .. } => arrays,
            _ => Vec::new(),
        };
        let mut out = Vec::new();
        for a in arrays {
            let Node::Range { msb, lsb } = self.ast.node(a).clone() else {
                return Err(EvalError::BadSubscript);
            };
            let m = self.eval(msb)?.to_i64();
            let l = self.eval(lsb)?.to_i64();
            if m < l {
                return Err(EvalError::BadSubscript);
            }
            out.push((m, l));
        }
        Ok(out)
    }

    /// The all-zero value of a declaration's shape.
    pub fn decl_default(&mut self, decl: NodeId) -> Result<Bits, EvalError> {
        let width = self.decl_width(decl)?;
        let kind = if decl_signed(self.ast, decl) {
            Kind::Signed
        } else {
            Kind::Unsigned
        };
        Ok(Bits::zero(width).with_kind(kind))
    }
}

/// Returns the number of unpacked array dimensions of a declaration.
pub fn array_arity(ast: &Ast, decl: NodeId) -> usize {
    match ast.node(decl) {
        Node::RegDecl { arrays, .. } => arrays.len(),
        Node::PortDecl { decl, .. } => array_arity(ast, *decl),
        _ => 0,
    }
}

/// Returns whether a declaration is signed.
pub fn decl_signed(ast: &Ast, decl: NodeId) -> bool {
    match ast.node(decl) {
        Node::PortDecl { decl, .. } => decl_signed(ast, *decl),
        Node::NetDecl { signed, .. }
        | Node::RegDecl { signed, .. }
        | Node::ParamDecl { signed, .. }
        | Node::LocalparamDecl { signed, .. } => *signed,
        Node::IntegerDecl { .. } | Node::GenvarDecl { .. } => true,
        _ => false,
    }
}

/// Packs a string literal into bits, last character in the low byte.
fn pack_string(s: &str) -> Bits {
    let width = (s.len() as u32 * 8).max(8);
    let mut v = Bits::zero(width);
    for (i, b) in s.bytes().rev().enumerate() {
        v.write_word::<u8>(i, b);
    }
    v
}

/// Applies a unary operator.
pub fn apply_unary(op: UnaryOp, v: Bits) -> Bits {
    match op {
        UnaryOp::Plus => v,
        UnaryOp::Minus => v.negated(),
        UnaryOp::LogicalNot => Bits::from_bool(!v.to_bool()),
        UnaryOp::BitwiseNot => !&v,
        UnaryOp::ReduceAnd => Bits::from_bool(v.reduce_and()),
        UnaryOp::ReduceNand => Bits::from_bool(v.reduce_nand()),
        UnaryOp::ReduceOr => Bits::from_bool(v.reduce_or()),
        UnaryOp::ReduceNor => Bits::from_bool(v.reduce_nor()),
        UnaryOp::ReduceXor => Bits::from_bool(v.reduce_xor()),
        UnaryOp::ReduceXnor => Bits::from_bool(v.reduce_xnor()),
    }
}

/// Applies a binary operator with Verilog width alignment: operands of
/// arithmetic and bitwise operators extend to the wider width (sign
/// extension only when both are signed), shifts take the left operand's
/// width, and comparisons produce a single bit.
pub fn apply_binary(op: BinaryOp, l: Bits, r: Bits) -> Bits {
    use BinaryOp::*;
    if l.kind() == Kind::Real || r.kind() == Kind::Real {
        return apply_binary_real(op, l, r);
    }
    match op {
        Add | Sub | Mul | Div | Mod | And | Or | Xor | Xnor => {
            let (l, r) = align(l, r);
            match op {
                Add => &l + &r,
                Sub => &l - &r,
                Mul => &l * &r,
                Div => l.div(&r),
                Mod => l.rem(&r),
                And => &l & &r,
                Or => &l | &r,
                Xor => &l ^ &r,
                _ => l.xnor(&r),
            }
        }
        Pow => l.pow(&r),
        Sll | Sal => l.shl(r.to_u64() as usize),
        Slr => l.shr(r.to_u64() as usize),
        Sar => l.sar(r.to_u64() as usize),
        LogicalAnd => Bits::from_bool(l.to_bool() && r.to_bool()),
        LogicalOr => Bits::from_bool(l.to_bool() || r.to_bool()),
        Eq => Bits::from_bool(l.logical_eq(&r)),
        Ne => Bits::from_bool(!l.logical_eq(&r)),
        Lt => Bits::from_bool(l.compare(&r) == std::cmp::Ordering::Less),
        Le => Bits::from_bool(l.compare(&r) != std::cmp::Ordering::Greater),
        Gt => Bits::from_bool(l.compare(&r) == std::cmp::Ordering::Greater),
        Ge => Bits::from_bool(l.compare(&r) != std::cmp::Ordering::Less),
    }
}

fn apply_binary_real(op: BinaryOp, l: Bits, r: Bits) -> Bits {
    use BinaryOp::*;
    let (a, b) = (l.to_double(), r.to_double());
    match op {
        Add => Bits::real(a + b),
        Sub => Bits::real(a - b),
        Mul => Bits::real(a * b),
        Div => Bits::real(a / b),
        Mod => Bits::real(a % b),
        Pow => Bits::real(a.powf(b)),
        LogicalAnd => Bits::from_bool(a != 0.0 && b != 0.0),
        LogicalOr => Bits::from_bool(a != 0.0 || b != 0.0),
        Eq => Bits::from_bool(a == b),
        Ne => Bits::from_bool(a != b),
        Lt => Bits::from_bool(a < b),
        Le => Bits::from_bool(a <= b),
        Gt => Bits::from_bool(a > b),
        Ge => Bits::from_bool(a >= b),
        _ => Bits::real(a),
    }
}

/// Extends both operands to the wider width. Sign extension applies only
/// when both operands are signed.
fn align(l: Bits, r: Bits) -> (Bits, Bits) {
    let signed = l.kind() == Kind::Signed && r.kind() == Kind::Signed;
    let (l, r) = if signed {
        (l, r)
    } else {
        (l.with_kind(Kind::Unsigned), r.with_kind(Kind::Unsigned))
    };
    let w = l.width().max(r.width());
    (l.resize(w), r.resize(w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::Interner;
    use cascade_diagnostics::DiagnosticSink;
    use cascade_verilog_parser::{parse, Fragment};
    use std::sync::Arc;

    fn eval_in_module(src: &str, expr_of: &str) -> Result<Bits, EvalError> {
        let full = format!("module m(); {src} localparam probe = {expr_of}; endmodule");
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(&full, &mut ast, &sink);
        assert!(!sink.has_errors(), "{:?}", sink.take_all());
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        let probe = *ast.items(md).last().unwrap();
        let Node::LocalparamDecl { init, .. } = ast.node(probe).clone() else {
            panic!()
        };
        const_eval(&mut ast, init)
    }

    #[test]
    fn folds_arithmetic() {
        assert_eq!(eval_in_module("", "2 + 3 * 4").unwrap().to_u64(), 14);
    }

    #[test]
    fn resolves_parameters() {
        let v = eval_in_module("parameter W = 8;", "W - 1").unwrap();
        assert_eq!(v.to_u64(), 7);
    }

    #[test]
    fn parameter_shape_applies() {
        let v = eval_in_module("parameter [3:0] W = 255;", "W").unwrap();
        assert_eq!(v.width(), 4);
        assert_eq!(v.to_u64(), 0xF);
    }

    #[test]
    fn slices_constants() {
        let v = eval_in_module("localparam [7:0] X = 8'hA5;", "X[7:4]").unwrap();
        assert_eq!(v.to_u64(), 0xA);
        let b = eval_in_module("localparam [7:0] X = 8'hA5;", "X[0]").unwrap();
        assert_eq!(b.width(), 1);
        assert_eq!(b.to_u64(), 1);
    }

    #[test]
    fn respects_declared_lsb_offset() {
        let v = eval_in_module("localparam [11:4] X = 8'hA5;", "X[4]").unwrap();
        assert_eq!(v.to_u64(), 1);
    }

    #[test]
    fn concat_and_replicate() {
        let v = eval_in_module("", "{4'hA, 4'h5}").unwrap();
        assert_eq!(v.width(), 8);
        assert_eq!(v.to_u64(), 0xA5);
        let r = eval_in_module("", "{3{2'b01}}").unwrap();
        assert_eq!(r.width(), 6);
        assert_eq!(r.to_u64(), 0b010101);
    }

    #[test]
    fn conditional_picks_branch() {
        assert_eq!(eval_in_module("", "1 ? 7 : 9").unwrap().to_u64(), 7);
        assert_eq!(eval_in_module("", "0 ? 7 : 9").unwrap().to_u64(), 9);
    }

    #[test]
    fn signed_comparison() {
        let v = eval_in_module("", "4'sb1000 < 4'sd0").unwrap();
        assert_eq!(v.to_u64(), 1);
    }

    #[test]
    fn runtime_reference_is_not_constant() {
        let err = eval_in_module("reg r;", "r + 1").unwrap_err();
        assert!(matches!(err, EvalError::NonConstant));
    }

    #[test]
    fn unresolved_reference_errors() {
        let err = eval_in_module("", "ghost").unwrap_err();
        assert!(matches!(err, EvalError::Unresolved(_)));
    }

    #[test]
    fn reversed_range_is_bad_subscript() {
        let err = eval_in_module("localparam [7:0] X = 1;", "X[0:7]").unwrap_err();
        assert!(matches!(err, EvalError::BadSubscript));
    }
}
