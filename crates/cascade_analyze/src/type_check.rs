//! Type checking for declarations, instantiations, and elaborated code.
//!
//! Checks are split the way the program evaluates: a declaration-only pass
//! when a module is declared (local resolution, no instantiation expansion),
//! a pre-elaboration pass on each worklist construct (constants constant,
//! arities aligned, names free, hierarchy acyclic), and a post-elaboration
//! pass over the freshly expanded subtree (every reference resolves).
//! Problems are emitted to the [`DiagnosticSink`]; a non-empty error log
//! aborts the surrounding eval transaction.

use crate::eval::{const_eval, EvalError, Evaluate};
use crate::module_info::port_decls;
use crate::navigate::{enclosing_scope, Navigate};
use crate::resolve::{is_use_position, Resolve};
use crate::walk_deep;
use cascade_ast::{Ast, Node, NodeId};
use cascade_common::Ident;
use cascade_diagnostics::{Diagnostic, DiagnosticSink};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use std::collections::HashMap;

/// The type checker. Holds the current declaration table for instantiation
/// and recursion checks.
pub struct TypeCheck<'a> {
    ast: &'a mut Ast,
    sink: &'a DiagnosticSink,
    decls: &'a HashMap<Ident, NodeId>,
}

impl<'a> TypeCheck<'a> {
    /// Creates a checker over the given AST and declaration table.
    pub fn new(
        ast: &'a mut Ast,
        sink: &'a DiagnosticSink,
        decls: &'a HashMap<Ident, NodeId>,
    ) -> Self {
        Self { ast, sink, decls }
    }

    fn error(&self, node: NodeId, msg: String) {
        self.sink
            .emit(Diagnostic::error(msg).with_span(self.ast.span(node)));
    }

    // ========================================================================
    // Declaration-only mode
    // ========================================================================

    /// Checks a module declaration in declaration-only mode: local name
    /// resolution, constant shapes, duplicate detection, and no recursive
    /// hierarchy through the declaration table.
    pub fn check_decl(&mut self, md: NodeId) {
        let name = match self.ast.module_name(md) {
            Some(n) => n,
            None => {
                self.error(md, "malformed module declaration".into());
                return;
            }
        };
        if self.decls.contains_key(&name) {
            self.error(
                md,
                format!(
                    "duplicate declaration of module {}",
                    self.ast.interner().resolve(name)
                ),
            );
        }
        self.check_names_and_shapes(md, true);
        if self.would_cycle(name, md) {
            self.error(md, "recursive module hierarchy".into());
        }
    }

    // ========================================================================
    // Pre-elaboration checks
    // ========================================================================

    /// Checks an instantiation before it is expanded.
    pub fn check_instantiation(&mut self, mi: NodeId) {
        let Node::ModuleInst {
            module,
            name,
            params,
            ports,
            ..
        } = self.ast.node(mi).clone()
        else {
            return;
        };
        let Some(mod_name) = self.ast.simple_name(module) else {
            self.error(mi, "malformed instantiation".into());
            return;
        };
        let Some(&decl) = self.decls.get(&mod_name) else {
            self.error(
                mi,
                format!(
                    "instantiation of undeclared module {}",
                    self.ast.interner().resolve(mod_name)
                ),
            );
            return;
        };

        // The instance name must be free in the enclosing scope.
        if let Some(inst_name) = self.ast.simple_name(name) {
            if let Some(scope) = enclosing_scope(self.ast, mi) {
                let mut nav = Navigate::at(self.ast, scope);
                let clash = nav.find_name(inst_name).is_some()
                    || nav.find_child_ignore_subscripts(inst_name).is_some();
                if clash {
                    self.error(
                        mi,
                        format!(
                            "duplicate declaration of {}",
                            self.ast.interner().resolve(inst_name)
                        ),
                    );
                }
            }
        }

        self.check_bindings(mi, &params, self.param_names(decl), "parameter");
        self.check_bindings(mi, &ports, self.port_names(decl), "port");

        if self.would_cycle(mod_name, decl) {
            self.error(mi, "instantiation would create a cyclic hierarchy".into());
        }
    }

    fn param_names(&self, decl: NodeId) -> Vec<Ident> {
        self.ast
            .items(decl)
            .iter()
            .filter(|&&i| matches!(self.ast.node(i), Node::ParamDecl { .. }))
            .filter_map(|&i| self.ast.decl_name_ident(i))
            .collect()
    }

    fn port_names(&self, decl: NodeId) -> Vec<Ident> {
        port_decls(self.ast, decl)
            .iter()
            .filter_map(|&p| self.ast.decl_name_ident(p))
            .collect()
    }

    fn check_bindings(&mut self, mi: NodeId, args: &[NodeId], formals: Vec<Ident>, what: &str) {
        let mut any_named = false;
        let mut any_positional = false;
        for &arg in args {
            let Node::ArgAssign { port, expr } = self.ast.node(arg).clone() else {
                continue;
            };
            match port {
                Some(port) => {
                    any_named = true;
                    match self.ast.simple_name(port) {
                        Some(n) if formals.contains(&n) => {}
                        Some(n) => self.error(
                            arg,
                            format!(
                                "no {what} named {} on the instantiated module",
                                self.ast.interner().resolve(n)
                            ),
                        ),
                        None => self.error(arg, format!("malformed named {what} binding")),
                    }
                }
                None => {
                    if expr.is_some() {
                        any_positional = true;
                    }
                }
            }
        }
        if any_named && any_positional {
            self.error(mi, format!("mixed named and positional {what} bindings"));
        }
        if !any_named && args.len() > formals.len() {
            self.error(
                mi,
                format!(
                    "{} {what} bindings for a module with {}",
                    args.len(),
                    formals.len()
                ),
            );
        }
    }

    /// Checks a generate construct's controlling expressions before
    /// elaboration: they must be constant.
    pub fn check_generate(&mut self, gen: NodeId) {
        match self.ast.node(gen).clone() {
            Node::IfGenerate { clauses, .. } => {
                for clause in clauses {
                    if let Node::IfGenClause { cond, .. } = self.ast.node(clause).clone() {
                        self.require_constant(cond);
                    }
                }
            }
            Node::CaseGenerate { cond, arms } => {
                self.require_constant(cond);
                for arm in arms {
                    if let Node::CaseGenArm { labels, .. } = self.ast.node(arm).clone() {
                        for label in labels {
                            self.require_constant(label);
                        }
                    }
                }
            }
            Node::LoopGenerate { init, .. } => {
                let Node::BlockingAssign { lhs, rhs } = self.ast.node(init).clone() else {
                    self.error(gen, "malformed generate loop initializer".into());
                    return;
                };
                self.require_constant(rhs);
                let resolved = Resolve::new(self.ast).get_resolution(lhs);
                match resolved {
                    Some(d) if matches!(self.ast.node(d), Node::GenvarDecl { .. }) => {}
                    Some(_) => self.error(init, "generate loops must iterate a genvar".into()),
                    None => self.error(init, "undeclared generate loop variable".into()),
                }
            }
            _ => {}
        }
    }

    fn require_constant(&mut self, expr: NodeId) {
        match const_eval(self.ast, expr) {
            Ok(_) => {}
            Err(EvalError::Unresolved(name)) => {
                self.error(expr, format!("undeclared identifier {name}"));
            }
            Err(e) => self.error(expr, format!("constant expression required: {e}")),
        }
    }

    // ========================================================================
    // Post-elaboration checks
    // ========================================================================

    /// Checks a freshly elaborated subtree: every reference must resolve.
    pub fn check_elaborated(&mut self, root: NodeId) {
        let mut idents = Vec::new();
        walk_deep(self.ast, root, &mut |ast, node| {
            if matches!(ast.node(node), Node::Identifier { path, .. } if !path.is_empty())
                && is_use_position(ast, node)
            {
                idents.push(node);
            }
        });
        for id in idents {
            if Resolve::new(self.ast).get_resolution(id).is_none() {
                let text = ident_text(self.ast, id);
                self.error(id, format!("undeclared identifier {text}"));
            }
        }
    }

    // ========================================================================
    // Shared structural checks
    // ========================================================================

    /// Duplicate names, constant shapes, synthesized-name collisions, and
    /// unsupported statements inside one module. With `local_only`, only
    /// unqualified references are required to resolve.
    pub fn check_names_and_shapes(&mut self, md: NodeId, local_only: bool) {
        let mut decls = Vec::new();
        let mut idents = Vec::new();
        let mut block_names = Vec::new();
        let mut forevers = Vec::new();
        walk_deep(self.ast, md, &mut |ast, node| match ast.node(node) {
            n if n.is_decl() => decls.push(node),
            Node::Identifier { .. } if is_use_position(ast, node) => idents.push(node),
            Node::GenBlock { name: Some(n), .. } | Node::SeqBlock { name: Some(n), .. } => {
                block_names.push(*n)
            }
            Node::Forever { .. } => forevers.push(node),
            _ => {}
        });

        for node in forevers {
            self.error(
                node,
                "forever loops are not supported (delays are not honored)".into(),
            );
        }

        for decl in decls {
            // Skip the inner half of a port wrapper.
            if let Some(parent) = self.ast.parent(decl) {
                if matches!(self.ast.node(parent), Node::PortDecl { .. }) {
                    continue;
                }
            }
            let Some(name) = self.ast.decl_name_ident(decl) else {
                self.error(decl, "malformed declaration".into());
                continue;
            };
            self.check_synthesized_collision(decl, name);
            let mut nav = Navigate::new(self.ast, decl);
            if nav.find_duplicate_name(name, decl).is_some() {
                self.error(
                    decl,
                    format!(
                        "duplicate declaration of {}",
                        self.ast.interner().resolve(name)
                    ),
                );
            }
            self.check_decl_shape(decl);
        }

        for name_node in block_names {
            if let Some(name) = self.ast.simple_name(name_node) {
                self.check_synthesized_collision(name_node, name);
            }
        }

        for id in idents {
            let Node::Identifier { path, .. } = self.ast.node(id).clone() else {
                continue;
            };
            if local_only && path.len() > 1 {
                // Hierarchical references are deferred to elaboration.
                continue;
            }
            if path.len() == 1 && Resolve::new(self.ast).get_resolution(id).is_none() {
                self.error(
                    id,
                    format!("undeclared identifier {}", ident_text(self.ast, id)),
                );
            }
        }
    }

    /// User names may not collide with the `genblkN` synthesizer.
    fn check_synthesized_collision(&mut self, node: NodeId, name: Ident) {
        let text = self.ast.interner().resolve(name);
        if let Some(rest) = text.strip_prefix("genblk") {
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                self.error(
                    node,
                    format!("{text} collides with synthesized generate block names"),
                );
            }
        }
    }

    fn check_decl_shape(&mut self, decl: NodeId) {
        let ranges: Vec<NodeId> = match self.ast.node(decl).clone() {
            Node::PortDecl { decl: inner, .. } => {
                self.check_decl_shape(inner);
                return;
            }
            Node::NetDecl { range, .. } => range.into_iter().collect(),
            Node::RegDecl { range, arrays, .. } => {
                range.into_iter().chain(arrays).collect()
            }
            Node::ParamDecl { range, .. } | Node::LocalparamDecl { range, .. } => {
                range.into_iter().collect()
            }
            _ => return,
        };
        for r in ranges {
            let Node::Range { msb, lsb } = self.ast.node(r).clone() else {
                continue;
            };
            let m = const_eval(self.ast, msb);
            let l = const_eval(self.ast, lsb);
            match (m, l) {
                (Ok(m), Ok(l)) => {
                    if m.to_i64() < l.to_i64() {
                        self.error(r, "illegal range: msb is below lsb".into());
                    }
                }
                _ => self.error(r, "range bounds must be constant".into()),
            }
        }
    }

    // ========================================================================
    // Recursion detection
    // ========================================================================

    /// Returns `true` if the declaration table plus `(name, md)` contains an
    /// instantiation cycle.
    fn would_cycle(&self, name: Ident, md: NodeId) -> bool {
        let mut graph: DiGraph<Ident, ()> = DiGraph::new();
        let mut index = HashMap::new();
        let mut nodes: Vec<(Ident, NodeId)> =
            self.decls.iter().map(|(&n, &d)| (n, d)).collect();
        nodes.push((name, md));
        for &(n, _) in &nodes {
            index.entry(n).or_insert_with(|| graph.add_node(n));
        }
        for &(n, d) in &nodes {
            for target in instantiated_modules(self.ast, d) {
                if let Some(&t) = index.get(&target) {
                    graph.add_edge(index[&n], t, ());
                }
            }
        }
        is_cyclic_directed(&graph)
    }
}

/// The module names instantiated (syntactically) inside a declaration.
fn instantiated_modules(ast: &Ast, md: NodeId) -> Vec<Ident> {
    let mut out = Vec::new();
    walk_deep(ast, md, &mut |ast, node| {
        if let Node::ModuleInst { module, .. } = ast.node(node) {
            if let Some(name) = ast.simple_name(*module) {
                out.push(name);
            }
        }
    });
    out
}

fn ident_text(ast: &Ast, id: NodeId) -> String {
    match ast.node(id) {
        Node::Identifier { path, .. } => path
            .iter()
            .map(|p| ast.interner().resolve(p.name))
            .collect::<Vec<_>>()
            .join("."),
        _ => "<expr>".into(),
    }
}

/// Widths are checked lazily during evaluation; this free function exists
/// for callers that want an eager width probe with diagnostics.
pub fn probe_decl_width(
    ast: &mut Ast,
    sink: &DiagnosticSink,
    decl: NodeId,
) -> Option<u32> {
    match Evaluate::new(ast).decl_width(decl) {
        Ok(w) => Some(w),
        Err(e) => {
            sink.emit(Diagnostic::error(format!("illegal declaration shape: {e}")));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::Interner;
    use cascade_verilog_parser::{parse, Fragment};
    use std::sync::Arc;

    fn check_module(src: &str) -> Vec<String> {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(src, &mut ast, &sink);
        assert!(!sink.has_errors(), "parse errors: {:?}", sink.take_all());
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        let decls = HashMap::new();
        TypeCheck::new(&mut ast, &sink, &decls).check_decl(md);
        sink.take_all()
            .into_iter()
            .filter(|d| d.severity.is_error())
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn clean_module_passes() {
        assert!(check_module("module m(); wire x; assign x = 1; endmodule").is_empty());
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let errs = check_module("module m(); wire x; reg x; endmodule");
        assert!(errs.iter().any(|e| e.contains("duplicate declaration")));
    }

    #[test]
    fn undeclared_identifier_rejected() {
        let errs = check_module("module m(); assign ghost = 1; endmodule");
        assert!(errs.iter().any(|e| e.contains("undeclared identifier")));
    }

    #[test]
    fn hierarchical_refs_deferred_in_decl_mode() {
        assert!(check_module(
            "module m(); always @(posedge clock.val) $finish; endmodule"
        )
        .is_empty());
    }

    #[test]
    fn reversed_range_rejected() {
        let errs = check_module("module m(); wire [0:7] x; endmodule");
        assert!(errs.iter().any(|e| e.contains("msb is below lsb")));
    }

    #[test]
    fn nonconstant_range_rejected() {
        let errs = check_module("module m(); reg r; wire [r:0] x; endmodule");
        assert!(errs.iter().any(|e| e.contains("constant")));
    }

    #[test]
    fn forever_rejected() {
        let errs = check_module("module m(); initial forever x = 1; endmodule");
        assert!(errs.iter().any(|e| e.contains("forever")));
    }

    #[test]
    fn genblk_collision_rejected() {
        let errs = check_module("module m(); wire genblk1; endmodule");
        assert!(errs.iter().any(|e| e.contains("genblk1")));
    }

    #[test]
    fn self_instantiation_rejected() {
        let errs = check_module("module m(); m inner(); endmodule");
        assert!(errs.iter().any(|e| e.contains("recursive")));
    }

    #[test]
    fn instantiation_of_unknown_module_rejected() {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse("ghost g();", &mut ast, &sink);
        let Fragment::Item(mi) = frags[0] else {
            panic!()
        };
        let decls = HashMap::new();
        TypeCheck::new(&mut ast, &sink, &decls).check_instantiation(mi);
        assert!(sink.has_errors());
    }

    #[test]
    fn named_binding_to_missing_port_rejected() {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(
            "module child(a); input wire a; endmodule\nchild c(.nope(1));",
            &mut ast,
            &sink,
        );
        let Fragment::Decl(child) = frags[0] else {
            panic!()
        };
        let Fragment::Item(mi) = frags[1] else {
            panic!()
        };
        let mut decls = HashMap::new();
        decls.insert(ast.interner().get_or_intern("child"), child);
        TypeCheck::new(&mut ast, &sink, &decls).check_instantiation(mi);
        assert!(sink
            .take_all()
            .iter()
            .any(|d| d.message.contains("no port named nope")));
    }
}
