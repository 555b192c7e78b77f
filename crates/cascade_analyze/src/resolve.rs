//! Name resolution with memoized resolution pointers and use-site tracking.
//!
//! Resolution follows the standard Verilog rule: an unqualified name walks
//! up scope boundaries until a declaration matches; a qualified name walks
//! up until the first segment matches a child scope, then descends along the
//! remaining segments. The first resolved query memoizes a pointer on the
//! identifier and marks the target declaration as resolving to itself.

use crate::eval::const_eval;
use crate::navigate::{enclosing_scope, Navigate};
use crate::walk_deep;
use cascade_ast::{Ast, Node, NodeId};
use cascade_common::Ident;

/// The name-resolution analysis.
pub struct Resolve<'a> {
    ast: &'a mut Ast,
}

impl<'a> Resolve<'a> {
    /// Creates a resolver over the given AST.
    pub fn new(ast: &'a mut Ast) -> Self {
        Self { ast }
    }

    /// Returns the declaration `id` resolves to, or `None` if unresolved.
    ///
    /// Declarations resolve to themselves.
    pub fn get_resolution(&mut self, id: NodeId) -> Option<NodeId> {
        if self.ast.node(id).is_decl() {
            return Some(id);
        }
        if let Some(&r) = self.ast.decor.resolutions.get(&id) {
            return Some(r);
        }
        let Node::Identifier { path, .. } = self.ast.node(id).clone() else {
            return None;
        };
        let res = if path.len() == 1 {
            self.resolve_simple(id, path[0].name)
        } else {
            self.resolve_hierarchical(id)
        };
        if let Some(decl) = res {
            self.ast.decor.resolutions.insert(id, decl);
            self.ast.decor.resolutions.insert(decl, decl);
        }
        res
    }

    fn resolve_simple(&mut self, id: NodeId, name: Ident) -> Option<NodeId> {
        let mut nav = Navigate::new(self.ast, id);
        loop {
            if let Some(decl) = nav.find_name(name) {
                return Some(decl);
            }
            if !nav.up() {
                return None;
            }
        }
    }

    fn resolve_hierarchical(&mut self, id: NodeId) -> Option<NodeId> {
        // Evaluate segment subscripts up front; symbolic subscripts that do
        // not fold to constants cannot address a scope.
        let Node::Identifier { path, .. } = self.ast.node(id).clone() else {
            return None;
        };
        let mut segs = Vec::with_capacity(path.len());
        for part in &path {
            let sel = match part.index {
                Some(expr) => Some(const_eval(self.ast, expr).ok()?.to_i64()),
                None => None,
            };
            segs.push((part.name, sel));
        }
        let (first_name, first_sel) = segs[0];
        let mut nav = Navigate::new(self.ast, id);
        loop {
            if nav.find_child(first_name, first_sel).is_some() {
                break;
            }
            if !nav.up() {
                return None;
            }
        }
        nav.down(first_name, first_sel);
        for &(name, sel) in &segs[1..segs.len() - 1] {
            if !nav.down(name, sel) {
                return None;
            }
        }
        nav.find_name(segs[segs.len() - 1].0)
    }

    /// Returns the fully qualified name of the declaration `id` resolves to,
    /// as `(name, subscript)` segments from the hierarchy root down.
    pub fn get_full_id(&mut self, id: NodeId) -> Option<Vec<(Ident, Option<i64>)>> {
        let decl = self.get_resolution(id)?;
        let mut segs: Vec<(Ident, Option<i64>)> = Vec::new();
        segs.push((self.ast.decl_name_ident(decl)?, None));
        let mut cur = decl;
        loop {
            let Some(scope) = enclosing_scope(self.ast, cur) else {
                break;
            };
            match self.ast.node(scope).clone() {
                Node::ModuleDecl { .. } => match self.ast.parent(scope) {
                    Some(inst) if matches!(self.ast.node(inst), Node::ModuleInst { .. }) => {
                        let Node::ModuleInst { name, .. } = self.ast.node(inst).clone() else {
                            unreachable!()
                        };
                        segs.push((self.ast.simple_name(name)?, None));
                        cur = inst;
                    }
                    _ => {
                        // An unelaborated declaration: qualify by module name.
                        segs.push((self.ast.module_name(scope)?, None));
                        break;
                    }
                },
                Node::GenBlock { name, .. } | Node::SeqBlock { name, stmts: _ } => {
                    let name = name?;
                    let Node::Identifier { path, .. } = self.ast.node(name).clone() else {
                        return None;
                    };
                    let part = path.first()?;
                    let sel = match part.index {
                        Some(e) => Some(const_eval(self.ast, e).ok()?.to_i64()),
                        None => None,
                    };
                    segs.push((part.name, sel));
                    cur = scope;
                }
                _ => break,
            }
        }
        segs.reverse();
        Some(segs)
    }

    /// Renders a fully qualified name as a dotted string (`root.f.x`,
    /// `root.blk[2].w`).
    pub fn full_name(&mut self, id: NodeId) -> Option<String> {
        let segs = self.get_full_id(id)?;
        let mut out = String::new();
        for (i, (name, sel)) in segs.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            out.push_str(self.ast.interner().resolve(*name));
            if let Some(sel) = sel {
                out.push_str(&format!("[{sel}]"));
            }
        }
        Some(out)
    }

    /// Returns `true` iff the identifier subscripts more dimensions than its
    /// declaration has.
    pub fn is_slice(&mut self, id: NodeId) -> bool {
        let Some(decl) = self.get_resolution(id) else {
            return false;
        };
        let Node::Identifier { dims, .. } = self.ast.node(id) else {
            return false;
        };
        let dims = dims.len();
        let arity = match self.ast.node(decl) {
            Node::RegDecl { arrays, .. } => arrays.len(),
            Node::PortDecl { decl, .. } => match self.ast.node(*decl) {
                Node::RegDecl { arrays, .. } => arrays.len(),
                _ => 0,
            },
            _ => 0,
        };
        dims > arity
    }

    /// Returns every identifier occurrence anywhere in the program that
    /// resolves to the given declaration.
    ///
    /// The use-site tables are populated by a single global pass over the
    /// hierarchy containing the declaration the first time any declaration
    /// is queried, and are dropped whenever any scope changes.
    pub fn uses(&mut self, decl: NodeId) -> Vec<NodeId> {
        if !self.ast.decor.uses_valid {
            self.build_uses(decl);
        }
        self.ast.decor.uses.get(&decl).cloned().unwrap_or_default()
    }

    fn build_uses(&mut self, anchor: NodeId) {
        let mut root = anchor;
        while let Some(p) = self.ast.parent(root) {
            root = p;
        }
        let mut idents = Vec::new();
        walk_deep(self.ast, root, &mut |ast, node| {
            if matches!(ast.node(node), Node::Identifier { .. }) && is_use_position(ast, node) {
                idents.push(node);
            }
        });
        for id in idents {
            if let Some(decl) = self.get_resolution(id) {
                self.ast.decor.uses.entry(decl).or_default().push(id);
            }
        }
        self.ast.decor.uses_valid = true;
    }
}

/// Returns `true` if `node` is an identifier in expression position rather
/// than an introducing occurrence (a declared name, an instance name, a
/// block label, or the formal side of a named binding).
pub fn is_use_position(ast: &Ast, node: NodeId) -> bool {
    let Some(parent) = ast.parent(node) else {
        return false;
    };
    match ast.node(parent) {
        p if p.is_decl() => ast.decl_name(parent) != Some(node),
        Node::ModuleDecl { .. } => false,
        Node::ModuleInst { module, name, .. } => node != *module && node != *name,
        Node::GenBlock { name, .. } | Node::SeqBlock { name, .. } => Some(node) != *name,
        Node::ArgAssign { port, .. } => Some(node) != *port,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::Interner;
    use cascade_diagnostics::DiagnosticSink;
    use cascade_verilog_parser::{parse, Fragment};
    use std::sync::Arc;

    fn module_of(src: &str) -> (Ast, NodeId) {
        let mut ast = Ast::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let frags = parse(src, &mut ast, &sink);
        assert!(!sink.has_errors(), "{:?}", sink.take_all());
        let Fragment::Decl(md) = frags[0] else {
            panic!()
        };
        (ast, md)
    }

    /// Finds the first identifier with the given simple name in a subtree.
    fn find_use(ast: &Ast, root: NodeId, name: &str) -> Option<NodeId> {
        let target = ast.interner().get(name)?;
        let mut found = None;
        walk_deep(ast, root, &mut |ast, node| {
            if found.is_some() {
                return;
            }
            if let Node::Identifier { path, .. } = ast.node(node) {
                if path.len() == 1 && path[0].name == target && ast.parent(node).is_some() {
                    // Skip declaration name nodes.
                    if let Some(parent) = ast.parent(node) {
                        if ast.decl_name(parent) != Some(node) {
                            found = Some(node);
                        }
                    }
                }
            }
        });
        found
    }

    #[test]
    fn resolves_local_reference() {
        let (mut ast, md) = module_of("module m(); wire x; assign x = 1; endmodule");
        let use_site = find_use(&ast, md, "x").unwrap();
        let mut resolve = Resolve::new(&mut ast);
        let decl = resolve.get_resolution(use_site).unwrap();
        assert!(matches!(ast.node(decl), Node::NetDecl { .. }));
        // The declaration resolves to itself.
        let mut resolve = Resolve::new(&mut ast);
        assert_eq!(resolve.get_resolution(decl), Some(decl));
    }

    #[test]
    fn resolution_is_memoized() {
        let (mut ast, md) = module_of("module m(); wire x; assign x = 1; endmodule");
        let use_site = find_use(&ast, md, "x").unwrap();
        let mut resolve = Resolve::new(&mut ast);
        let decl = resolve.get_resolution(use_site).unwrap();
        assert_eq!(ast.decor.resolutions.get(&use_site), Some(&decl));
    }

    #[test]
    fn resolves_from_nested_block_outward() {
        let (mut ast, md) = module_of(
            "module m(); reg r; initial begin : b reg t; t = r; end endmodule",
        );
        let use_site = find_use(&ast, md, "r").unwrap();
        let mut resolve = Resolve::new(&mut ast);
        let decl = resolve.get_resolution(use_site).unwrap();
        assert_eq!(ast.decl_name_ident(decl), Some(ast.interner().get_or_intern("r")));
    }

    #[test]
    fn unresolved_returns_none() {
        let (mut ast, md) = module_of("module m(); assign x = ghost; endmodule");
        let use_site = find_use(&ast, md, "ghost").unwrap();
        let mut resolve = Resolve::new(&mut ast);
        assert_eq!(resolve.get_resolution(use_site), None);
    }

    #[test]
    fn is_slice_counts_extra_dims() {
        let (mut ast, md) = module_of(
            "module m(); reg [7:0] mem [3:0]; wire w; assign w = mem[2][1]; endmodule",
        );
        let use_site = find_use(&ast, md, "mem").unwrap();
        let mut resolve = Resolve::new(&mut ast);
        assert!(resolve.is_slice(use_site));
    }

    #[test]
    fn uses_lists_every_occurrence() {
        let (mut ast, md) =
            module_of("module m(); wire x; assign x = 1; wire y; assign y = x; endmodule");
        let use_site = find_use(&ast, md, "x").unwrap();
        let mut resolve = Resolve::new(&mut ast);
        let decl = resolve.get_resolution(use_site).unwrap();
        let uses = resolve.uses(decl);
        // The lhs of the first assign and the rhs of the second.
        assert_eq!(uses.len(), 2);
    }
}
