//! Elaboration of generate constructs and module instantiations.
//!
//! Each elaboration memoizes its result on the construct node, so repeated
//! calls return the same cached subtree and add nothing to the scope.
//! Instantiations clone the target declaration and substitute parameter
//! values; if/case generates install one clause's block; loop generates
//! unroll, naming each iteration's block with the loop variable's value and
//! prepending a `localparam` that shadows it.

use crate::eval::{const_eval, EvalError, Evaluate};
use crate::navigate::enclosing_scope;
use crate::resolve::Resolve;
use cascade_ast::{Ast, Elaboration, IdPart, Node, NodeId};
use cascade_common::Bits;
use cascade_diagnostics::Span;
use std::collections::HashMap;

/// Upper bound on loop-generate unrolling.
const MAX_LOOP_ITERATIONS: usize = 1 << 16;

/// The elaboration analysis.
pub struct Elaborate<'a> {
    ast: &'a mut Ast,
}

impl<'a> Elaborate<'a> {
    /// Creates an elaborator over the given AST.
    pub fn new(ast: &'a mut Ast) -> Self {
        Self { ast }
    }

    /// Queries the elaboration memo.
    pub fn is_elaborated(&self, construct: NodeId) -> bool {
        self.ast.decor.elabs.contains_key(&construct)
    }

    /// Clones `decl` under the instantiation and substitutes parameter
    /// bindings (named or positional), evaluated in the caller's scope.
    pub fn elaborate_instantiation(
        &mut self,
        mi: NodeId,
        decl: NodeId,
    ) -> Result<NodeId, EvalError> {
        if let Some(Elaboration::Instance(e)) = self.ast.decor.elabs.get(&mi) {
            return Ok(*e);
        }
        let Node::ModuleInst { params, .. } = self.ast.node(mi).clone() else {
            return Err(EvalError::Unsupported("not an instantiation".into()));
        };
        // Bindings evaluate in the caller's scope, before the clone exists.
        let mut named: Vec<(cascade_common::Ident, Bits)> = Vec::new();
        let mut ordered: Vec<Option<Bits>> = Vec::new();
        let any_named = params.iter().any(|&p| {
            matches!(self.ast.node(p), Node::ArgAssign { port: Some(_), .. })
        });
        for &arg in &params {
            let Node::ArgAssign { port, expr } = self.ast.node(arg).clone() else {
                continue;
            };
            let Some(expr) = expr else {
                ordered.push(None);
                continue;
            };
            let val = const_eval(self.ast, expr)?;
            if any_named {
                if let Some(port) = port {
                    if let Some(name) = self.ast.simple_name(port) {
                        named.push((name, val));
                    }
                }
            } else {
                ordered.push(Some(val));
            }
        }

        let clone = self.ast.deep_clone(decl);
        self.ast.set_parent(clone, Some(mi));

        let clone_params: Vec<NodeId> = self
            .ast
            .items(clone)
            .iter()
            .copied()
            .filter(|&i| matches!(self.ast.node(i), Node::ParamDecl { .. }))
            .collect();
        if any_named {
            for (name, val) in named {
                let target = clone_params
                    .iter()
                    .copied()
                    .find(|&p| self.ast.decl_name_ident(p) == Some(name));
                if let Some(p) = target {
                    self.substitute_param(p, val);
                }
            }
        } else {
            for (i, val) in ordered.into_iter().enumerate() {
                if let (Some(val), Some(&p)) = (val, clone_params.get(i)) {
                    self.substitute_param(p, val);
                }
            }
        }

        self.ast
            .decor
            .elabs
            .insert(mi, Elaboration::Instance(clone));
        Ok(clone)
    }

    fn substitute_param(&mut self, param: NodeId, val: Bits) {
        let num = self.ast.alloc(Node::Number { val }, Span::DUMMY);
        if let Node::ParamDecl { init, .. } = self.ast.node_mut(param) {
            *init = num;
        }
        self.ast.set_parent(num, Some(param));
    }

    /// Evaluates the conditions in order and installs the first taken
    /// clause's block (or the else block) as the elaboration.
    pub fn elaborate_if(&mut self, gen: NodeId) -> Result<Option<NodeId>, EvalError> {
        if let Some(Elaboration::Block(b)) = self.ast.decor.elabs.get(&gen) {
            return Ok(*b);
        }
        let Node::IfGenerate {
            clauses,
            else_block,
        } = self.ast.node(gen).clone()
        else {
            return Err(EvalError::Unsupported("not an if-generate".into()));
        };
        let mut chosen = else_block;
        for clause in clauses {
            let Node::IfGenClause { cond, block } = self.ast.node(clause).clone() else {
                continue;
            };
            if const_eval(self.ast, cond)?.to_bool() {
                chosen = Some(block);
                break;
            }
        }
        if let Some(block) = chosen {
            self.synthesize_name(gen, block);
        }
        self.ast.decor.elabs.insert(gen, Elaboration::Block(chosen));
        Ok(chosen)
    }

    /// Chooses the first case arm with a matching label, falling back to the
    /// default arm.
    pub fn elaborate_case(&mut self, gen: NodeId) -> Result<Option<NodeId>, EvalError> {
        if let Some(Elaboration::Block(b)) = self.ast.decor.elabs.get(&gen) {
            return Ok(*b);
        }
        let Node::CaseGenerate { cond, arms } = self.ast.node(gen).clone() else {
            return Err(EvalError::Unsupported("not a case-generate".into()));
        };
        let sel = const_eval(self.ast, cond)?;
        let mut chosen = None;
        let mut default = None;
        'arms: for arm in arms {
            let Node::CaseGenArm { labels, block } = self.ast.node(arm).clone() else {
                continue;
            };
            if labels.is_empty() {
                default.get_or_insert(block);
                continue;
            }
            for label in labels {
                if const_eval(self.ast, label)?.logical_eq(&sel) {
                    chosen = Some(block);
                    break 'arms;
                }
            }
        }
        let chosen = chosen.or(default);
        if let Some(block) = chosen {
            self.synthesize_name(gen, block);
        }
        self.ast.decor.elabs.insert(gen, Elaboration::Block(chosen));
        Ok(chosen)
    }

    /// Unrolls the loop, producing one named block per iteration with a
    /// `localparam` shadowing the loop variable.
    pub fn elaborate_loop(&mut self, gen: NodeId) -> Result<Vec<NodeId>, EvalError> {
        if let Some(Elaboration::Blocks(b)) = self.ast.decor.elabs.get(&gen) {
            return Ok(b.clone());
        }
        let Node::LoopGenerate {
            init,
            cond,
            update,
            block,
        } = self.ast.node(gen).clone()
        else {
            return Err(EvalError::Unsupported("not a loop-generate".into()));
        };
        let Node::BlockingAssign {
            lhs: var_ident,
            rhs: init_rhs,
        } = self.ast.node(init).clone()
        else {
            return Err(EvalError::Unsupported("malformed loop initializer".into()));
        };
        let Node::BlockingAssign { rhs: update_rhs, .. } = self.ast.node(update).clone() else {
            return Err(EvalError::Unsupported("malformed loop update".into()));
        };
        let var_decl = Resolve::new(self.ast)
            .get_resolution(var_ident)
            .ok_or_else(|| EvalError::Unresolved("loop variable".into()))?;
        let var_name = self
            .ast
            .decl_name_ident(var_decl)
            .ok_or_else(|| EvalError::Unresolved("loop variable".into()))?;

        // The base name for iteration blocks: the block's own name, or a
        // synthesized one.
        let base = match self.block_name(block) {
            Some(name) => name,
            None => self.next_genblk_ident(gen),
        };

        let mut val = const_eval(self.ast, init_rhs)?;
        let mut blocks = Vec::new();
        for _ in 0..MAX_LOOP_ITERATIONS {
            let mut overrides = HashMap::new();
            overrides.insert(var_decl, val.clone());
            let take = Evaluate::with_overrides(self.ast, &overrides)
                .eval(cond)?
                .to_bool();
            if !take {
                break;
            }
            let iter_block = self.ast.deep_clone(block);
            // Name the iteration `base[value]`.
            let sel = self.ast.alloc(Node::Number { val: val.clone() }, Span::DUMMY);
            let name_node = self.ast.alloc(
                Node::Identifier {
                    path: vec![IdPart {
                        name: base,
                        index: Some(sel),
                    }],
                    dims: Vec::new(),
                },
                Span::DUMMY,
            );
            // Shadow the loop variable with its value for this iteration.
            let lp_name = self.ast.new_ident_from(var_name);
            let lp_val = self.ast.alloc(Node::Number { val: val.clone() }, Span::DUMMY);
            let lp = self.ast.alloc(
                Node::LocalparamDecl {
                    name: lp_name,
                    signed: true,
                    range: None,
                    init: lp_val,
                },
                Span::DUMMY,
            );
            if let Node::GenBlock { name, items } = self.ast.node_mut(iter_block) {
                *name = Some(name_node);
                items.insert(0, lp);
            }
            self.ast.set_parent(name_node, Some(iter_block));
            self.ast.set_parent(lp, Some(iter_block));
            self.ast.set_parent(iter_block, Some(gen));
            blocks.push(iter_block);

            let mut overrides = HashMap::new();
            overrides.insert(var_decl, val.clone());
            val = Evaluate::with_overrides(self.ast, &overrides).eval(update_rhs)?;
        }
        self.ast
            .decor
            .elabs
            .insert(gen, Elaboration::Blocks(blocks.clone()));
        Ok(blocks)
    }

    fn block_name(&self, block: NodeId) -> Option<cascade_common::Ident> {
        match self.ast.node(block) {
            Node::GenBlock { name: Some(n), .. } => self.ast.simple_name(*n),
            _ => None,
        }
    }

    /// Gives an unnamed chosen block a synthesized `genblkN` name.
    fn synthesize_name(&mut self, construct: NodeId, block: NodeId) {
        if self.block_name(block).is_some() {
            return;
        }
        let base = self.next_genblk_ident(construct);
        let name_node = self.ast.new_ident_from(base);
        if let Node::GenBlock { name, .. } = self.ast.node_mut(block) {
            *name = Some(name_node);
        }
        self.ast.set_parent(name_node, Some(block));
    }

    /// Synthesizes the `genblkN` name for a construct: N is its 1-based
    /// position among the boundary-introducing constructs encountered during
    /// a pre-order walk of the enclosing scope.
    fn next_genblk_ident(&mut self, construct: NodeId) -> cascade_common::Ident {
        let index = self.genblk_index(construct).unwrap_or(1);
        self.ast.interner().get_or_intern(&format!("genblk{index}"))
    }

    fn genblk_index(&self, construct: NodeId) -> Option<usize> {
        let scope = enclosing_scope(self.ast, construct)?;
        let items = match self.ast.node(scope) {
            Node::ModuleDecl { items, .. } | Node::GenBlock { items, .. } => items.clone(),
            _ => return None,
        };
        let mut count = 0;
        for item in items {
            if let Some(idx) = self.count_pre_order(item, construct, &mut count) {
                return Some(idx);
            }
        }
        None
    }

    fn count_pre_order(
        &self,
        item: NodeId,
        target: NodeId,
        count: &mut usize,
    ) -> Option<usize> {
        match self.ast.node(item) {
            Node::IfGenerate { .. } | Node::CaseGenerate { .. } | Node::LoopGenerate { .. } => {
                *count += 1;
                if item == target {
                    return Some(*count);
                }
            }
            Node::GenBlock {
                name: Some(_), ..
            } => {
                *count += 1;
            }
            Node::GenBlock { name: None, items } => {
                for &i in items.clone().iter() {
                    if let Some(idx) = self.count_pre_order(i, target, count) {
                        return Some(idx);
                    }
                }
            }
            _ => {}
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::Interner;
    use cascade_diagnostics::DiagnosticSink;
    use cascade_verilog_parser::{parse, Fragment};
    use std::sync::Arc;

    fn setup(src: &str) -> (Ast, Vec<NodeId>) {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(src, &mut ast, &sink);
        assert!(!sink.has_errors(), "{:?}", sink.take_all());
        let mds = frags
            .into_iter()
            .map(|f| match f {
                Fragment::Decl(md) => md,
                Fragment::Item(i) => i,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        (ast, mds)
    }

    #[test]
    fn if_generate_picks_true_clause() {
        let (mut ast, nodes) =
            setup("module m(); if (1) begin : a wire x; end else begin : b wire y; end endmodule");
        let gen = ast.items(nodes[0])[0];
        let chosen = Elaborate::new(&mut ast).elaborate_if(gen).unwrap().unwrap();
        let Node::GenBlock { name, .. } = ast.node(chosen) else {
            panic!()
        };
        assert_eq!(
            ast.simple_name(name.unwrap()),
            Some(ast.interner().get_or_intern("a"))
        );
    }

    #[test]
    fn if_generate_false_without_else_elaborates_to_nothing() {
        let (mut ast, nodes) = setup("module m(); if (0) wire x; endmodule");
        let gen = ast.items(nodes[0])[0];
        let chosen = Elaborate::new(&mut ast).elaborate_if(gen).unwrap();
        assert!(chosen.is_none());
        assert!(Elaborate::new(&mut ast).is_elaborated(gen));
    }

    #[test]
    fn elaboration_is_idempotent() {
        let (mut ast, nodes) = setup("module m(); if (1) begin wire x; end endmodule");
        let gen = ast.items(nodes[0])[0];
        let before = ast.len();
        let first = Elaborate::new(&mut ast).elaborate_if(gen).unwrap();
        let after_first = ast.len();
        let second = Elaborate::new(&mut ast).elaborate_if(gen).unwrap();
        assert_eq!(first, second);
        assert_eq!(ast.len(), after_first);
        assert!(ast.len() >= before);
    }

    #[test]
    fn unnamed_chosen_block_gets_genblk_name() {
        let (mut ast, nodes) = setup("module m(); if (1) wire x; endmodule");
        let gen = ast.items(nodes[0])[0];
        let chosen = Elaborate::new(&mut ast).elaborate_if(gen).unwrap().unwrap();
        let Node::GenBlock { name, .. } = ast.node(chosen) else {
            panic!()
        };
        assert_eq!(
            ast.simple_name(name.unwrap()),
            Some(ast.interner().get_or_intern("genblk1"))
        );
    }

    #[test]
    fn loop_generate_unrolls_and_shadows() {
        let (mut ast, nodes) = setup(
            "module m(); genvar i; for (i = 0; i < 3; i = i + 1) begin : blk wire w; end endmodule",
        );
        let gen = ast.items(nodes[0])[1];
        let blocks = Elaborate::new(&mut ast).elaborate_loop(gen).unwrap();
        assert_eq!(blocks.len(), 3);
        // Each block is named blk[i] and starts with the shadowing localparam.
        let Node::GenBlock { name, items } = ast.node(blocks[2]).clone() else {
            panic!()
        };
        let Node::Identifier { path, .. } = ast.node(name.unwrap()) else {
            panic!()
        };
        assert_eq!(path[0].name, ast.interner().get_or_intern("blk"));
        let sel = path[0].index.unwrap();
        let Node::Number { val } = ast.node(sel) else {
            panic!()
        };
        assert_eq!(val.to_i64(), 2);
        assert!(matches!(ast.node(items[0]), Node::LocalparamDecl { .. }));
        let Node::LocalparamDecl { init, .. } = ast.node(items[0]) else {
            panic!()
        };
        let Node::Number { val } = ast.node(*init) else {
            panic!()
        };
        assert_eq!(val.to_i64(), 2);
    }

    #[test]
    fn case_generate_falls_back_to_default() {
        let (mut ast, nodes) = setup(
            "module m(); case (5) 0: begin : z wire a; end default: begin : d wire b; end endcase endmodule",
        );
        let gen = ast.items(nodes[0])[0];
        let chosen = Elaborate::new(&mut ast)
            .elaborate_case(gen)
            .unwrap()
            .unwrap();
        let Node::GenBlock { name, .. } = ast.node(chosen) else {
            panic!()
        };
        assert_eq!(
            ast.simple_name(name.unwrap()),
            Some(ast.interner().get_or_intern("d"))
        );
    }

    #[test]
    fn instantiation_substitutes_parameters() {
        let (mut ast, nodes) = setup(
            "module child(); parameter W = 1; wire [W-1:0] x; endmodule\nmodule top(); child #(8) c(); endmodule",
        );
        let child = nodes[0];
        let top = nodes[1];
        let mi = ast.items(top)[0];
        let clone = Elaborate::new(&mut ast)
            .elaborate_instantiation(mi, child)
            .unwrap();
        assert_ne!(clone, child);
        assert_eq!(ast.parent(clone), Some(mi));
        let param = ast.items(clone)[0];
        let Node::ParamDecl { init, .. } = ast.node(param) else {
            panic!()
        };
        let Node::Number { val } = ast.node(*init) else {
            panic!()
        };
        assert_eq!(val.to_u64(), 8);
        // The original declaration is untouched.
        let orig_param = ast.items(child)[0];
        let Node::ParamDecl { init, .. } = ast.node(orig_param) else {
            panic!()
        };
        assert!(!matches!(ast.node(*init), Node::Number { val } if val.to_u64() == 8));
    }
}
