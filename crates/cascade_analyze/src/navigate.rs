//! Scope-hierarchy navigation with lazy per-scope name indexing.
//!
//! [`Navigate`] positions a cursor at the nearest enclosing scope boundary
//! (module declaration, named generate block, or named sequential block) and
//! supports walking up, descending into named child scopes, and one-level
//! name lookup. Each scope's index is built lazily and advanced by the
//! `next_item` refresh counter, so items appended to a scope after its first
//! indexing are absorbed incrementally; removals must invalidate the scope.

use cascade_ast::{Ast, Elaboration, Node, NodeId};
use cascade_common::Ident;

/// Returns the nearest enclosing scope boundary of `node`, or `None` for
/// unlinked roots.
///
/// Special case: the formal name on the left of an explicit `.port(expr)`
/// binding attaches to the elaborated callee's declaration scope, not to the
/// caller's.
pub fn enclosing_scope(ast: &Ast, node: NodeId) -> Option<NodeId> {
    if let Some(arg) = ast.parent(node) {
        if let Node::ArgAssign {
            port: Some(port), ..
        } = ast.node(arg)
        {
            if *port == node {
                if let Some(inst) = ast.parent(arg) {
                    if let Node::ModuleInst { ports, .. } = ast.node(inst) {
                        if ports.contains(&arg) {
                            if let Some(Elaboration::Instance(decl)) = ast.decor.elabs.get(&inst)
                            {
                                return Some(*decl);
                            }
                        }
                    }
                }
            }
        }
    }
    let mut cur = node;
    loop {
        if ast.is_scope_boundary(cur) && cur != node {
            return Some(cur);
        }
        // A boundary queried on itself is its own scope.
        if cur == node && ast.is_scope_boundary(cur) && matches!(ast.node(cur), Node::ModuleDecl { .. })
        {
            return Some(cur);
        }
        cur = ast.parent(cur)?;
    }
}

/// The current item list of a scope boundary.
fn scope_items(ast: &Ast, scope: NodeId) -> Vec<NodeId> {
    match ast.node(scope) {
        Node::ModuleDecl { items, .. } | Node::GenBlock { items, .. } => items.clone(),
        Node::SeqBlock { stmts, .. } => stmts.clone(),
        _ => Vec::new(),
    }
}

/// A cursor over the scope hierarchy.
pub struct Navigate<'a> {
    ast: &'a mut Ast,
    here: Option<NodeId>,
}

impl<'a> Navigate<'a> {
    /// Creates a cursor positioned at the scope enclosing `node`.
    pub fn new(ast: &'a mut Ast, node: NodeId) -> Self {
        let here = enclosing_scope(ast, node);
        Self { ast, here }
    }

    /// Creates a cursor positioned exactly at the boundary `scope`.
    pub fn at(ast: &'a mut Ast, scope: NodeId) -> Self {
        debug_assert!(ast.is_scope_boundary(scope));
        Self {
            ast,
            here: Some(scope),
        }
    }

    /// The boundary node the cursor rests on.
    pub fn here(&self) -> Option<NodeId> {
        self.here
    }

    /// Moves to the next enclosing boundary. Returns `false` at the top.
    pub fn up(&mut self) -> bool {
        let Some(here) = self.here else {
            return false;
        };
        // The parent of an elaborated instance clone is its instantiation.
        let Some(parent) = self.ast.parent(here) else {
            self.here = None;
            return false;
        };
        self.here = enclosing_scope(self.ast, parent);
        self.here.is_some()
    }

    /// Descends into the child scope with the given name and optional
    /// subscript. Returns `false` if no such child exists.
    pub fn down(&mut self, name: Ident, sel: Option<i64>) -> bool {
        match self.find_child(name, sel) {
            Some(child) => {
                self.here = Some(child);
                true
            }
            None => false,
        }
    }

    /// One-level name lookup in the current scope.
    pub fn find_name(&mut self, name: Ident) -> Option<NodeId> {
        let here = self.here?;
        self.refresh(here);
        self.ast
            .decor
            .scopes
            .get(&here)
            .and_then(|s| s.names.get(&name))
            .map(|(first, _)| *first)
    }

    /// Returns a declaration with the given name that is different from
    /// `not`, if one exists. Used for duplicate detection.
    pub fn find_duplicate_name(&mut self, name: Ident, not: NodeId) -> Option<NodeId> {
        let here = self.here?;
        self.refresh(here);
        let (first, second) = *self.ast.decor.scopes.get(&here)?.names.get(&name)?;
        if first != not {
            Some(first)
        } else {
            second.filter(|&s| s != not)
        }
    }

    /// Nested scope lookup by name and optional subscript. A lookup without
    /// a subscript matches an unsubscripted child.
    pub fn find_child(&mut self, name: Ident, sel: Option<i64>) -> Option<NodeId> {
        let here = self.here?;
        self.refresh(here);
        self.ast
            .decor
            .scopes
            .get(&here)?
            .children
            .get(&name)?
            .iter()
            .find(|(s, _)| *s == sel)
            .map(|(_, c)| *c)
    }

    /// Nested scope lookup comparing only the string component of the name.
    pub fn find_child_ignore_subscripts(&mut self, name: Ident) -> Option<NodeId> {
        let here = self.here?;
        self.refresh(here);
        self.ast
            .decor
            .scopes
            .get(&here)?
            .children
            .get(&name)?
            .first()
            .map(|(_, c)| *c)
    }

    /// All declared names in the current scope.
    pub fn names(&mut self) -> Vec<(Ident, NodeId)> {
        let Some(here) = self.here else {
            return Vec::new();
        };
        self.refresh(here);
        self.ast
            .decor
            .scopes
            .get(&here)
            .map(|s| s.names.iter().map(|(n, (d, _))| (*n, *d)).collect())
            .unwrap_or_default()
    }

    /// All child scopes of the current scope.
    pub fn children(&mut self) -> Vec<NodeId> {
        let Some(here) = self.here else {
            return Vec::new();
        };
        self.refresh(here);
        self.ast
            .decor
            .scopes
            .get(&here)
            .map(|s| {
                s.children
                    .values()
                    .flat_map(|v| v.iter().map(|(_, c)| *c))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ========================================================================
    // Lazy indexing
    // ========================================================================

    /// Brings the scope's index up to date with its current item list.
    fn refresh(&mut self, scope: NodeId) {
        let items = scope_items(self.ast, scope);
        let done = self
            .ast
            .decor
            .scopes
            .get(&scope)
            .map(|s| s.next_item)
            .unwrap_or(0);
        if done >= items.len() && self.ast.decor.scopes.contains_key(&scope) {
            return;
        }
        self.ast.decor.scopes.entry(scope).or_default();
        for item in items.iter().skip(done).copied().collect::<Vec<_>>() {
            self.index_item(scope, item);
        }
        let len = items.len();
        if let Some(s) = self.ast.decor.scopes.get_mut(&scope) {
            s.next_item = len;
        }
    }

    fn index_item(&mut self, scope: NodeId, item: NodeId) {
        match self.ast.node(item).clone() {
            n if n.is_decl() => {
                if let Some(name) = self.ast.decl_name_ident(item) {
                    self.index_name(scope, name, item);
                }
            }
            Node::ModuleInst { name, .. } => {
                if let Some(Elaboration::Instance(decl)) = self.ast.decor.elabs.get(&item).cloned()
                {
                    if let Some(n) = self.ast.simple_name(name) {
                        self.index_child(scope, n, None, decl);
                    }
                }
            }
            Node::IfGenerate { .. } | Node::CaseGenerate { .. } => {
                match self.ast.decor.elabs.get(&item).cloned() {
                    Some(Elaboration::Block(Some(block))) => self.index_block(scope, block),
                    _ => {}
                }
            }
            Node::LoopGenerate { .. } => {
                if let Some(Elaboration::Blocks(blocks)) = self.ast.decor.elabs.get(&item).cloned()
                {
                    for block in blocks {
                        self.index_block(scope, block);
                    }
                }
            }
            Node::GenBlock { .. } => self.index_block(scope, item),
            Node::Always { stmt } | Node::Initial { stmt } => self.index_stmt(scope, stmt),
            Node::SeqBlock { .. } => self.index_stmt(scope, item),
            _ => {}
        }
    }

    /// Indexes a generate block: named blocks become child scopes, unnamed
    /// blocks are transparent and their items land in the enclosing scope.
    fn index_block(&mut self, scope: NodeId, block: NodeId) {
        let Node::GenBlock { name, items } = self.ast.node(block).clone() else {
            return;
        };
        match name.and_then(|n| self.name_and_sel(n)) {
            Some((n, sel)) => self.index_child(scope, n, sel, block),
            None => {
                for item in items {
                    self.index_item(scope, item);
                }
            }
        }
    }

    /// Walks statement trees looking for named blocks (child scopes) and,
    /// in unnamed blocks, declarations that leak into the enclosing scope.
    fn index_stmt(&mut self, scope: NodeId, stmt: NodeId) {
        match self.ast.node(stmt).clone() {
            Node::SeqBlock { name, stmts } => {
                match name.and_then(|n| self.name_and_sel(n)) {
                    Some((n, sel)) => self.index_child(scope, n, sel, stmt),
                    None => {
                        for s in stmts {
                            self.index_stmt(scope, s);
                        }
                    }
                }
            }
            n if n.is_decl() => {
                if let Some(name) = self.ast.decl_name_ident(stmt) {
                    self.index_name(scope, name, stmt);
                }
            }
            Node::If {
                then_stmt,
                else_stmt,
                ..
            } => {
                self.index_stmt(scope, then_stmt);
                if let Some(es) = else_stmt {
                    self.index_stmt(scope, es);
                }
            }
            Node::CaseStmt { arms, .. } => {
                for arm in arms {
                    if let Node::CaseArm { stmt, .. } = self.ast.node(arm).clone() {
                        self.index_stmt(scope, stmt);
                    }
                }
            }
            Node::For { body, .. }
            | Node::While { body, .. }
            | Node::RepeatStmt { body, .. }
            | Node::Forever { body } => self.index_stmt(scope, body),
            Node::Timing { stmt, .. } => self.index_stmt(scope, stmt),
            _ => {}
        }
    }

    fn name_and_sel(&self, ident: NodeId) -> Option<(Ident, Option<i64>)> {
        let Node::Identifier { path, .. } = self.ast.node(ident) else {
            return None;
        };
        let part = path.first()?;
        let sel = part.index.and_then(|i| match self.ast.node(i) {
            Node::Number { val } => Some(val.to_i64()),
            _ => None,
        });
        Some((part.name, sel))
    }

    fn index_name(&mut self, scope: NodeId, name: Ident, decl: NodeId) {
        let entry = self
            .ast
            .decor
            .scopes
            .get_mut(&scope)
            .expect("scope record exists during refresh")
            .names
            .entry(name)
            .or_insert((decl, None));
        if entry.0 != decl && entry.1.is_none() {
            entry.1 = Some(decl);
        }
    }

    fn index_child(&mut self, scope: NodeId, name: Ident, sel: Option<i64>, child: NodeId) {
        let children = self
            .ast
            .decor
            .scopes
            .get_mut(&scope)
            .expect("scope record exists during refresh")
            .children
            .entry(name)
            .or_default();
        if !children.iter().any(|(s, c)| *s == sel && *c == child) {
            children.push((sel, child));
        }
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
            panic!("expected a declaration")
        };
        (ast, md)
    }

    #[test]
    fn finds_module_level_names() {
        let (mut ast, md) = module_of("module m(); wire a; reg [3:0] b; endmodule");
        let a = ast.interner().get_or_intern("a");
        let b = ast.interner().get_or_intern("b");
        let missing = ast.interner().get_or_intern("zzz");
        let mut nav = Navigate::at(&mut ast, md);
        assert!(nav.find_name(a).is_some());
        assert!(nav.find_name(b).is_some());
        assert!(nav.find_name(missing).is_none());
    }

    #[test]
    fn detects_duplicates() {
        let (mut ast, md) = module_of("module m(); wire x; reg x; endmodule");
        let x = ast.interner().get_or_intern("x");
        let mut nav = Navigate::at(&mut ast, md);
        let first = nav.find_name(x).unwrap();
        assert!(nav.find_duplicate_name(x, first).is_some());
    }

    #[test]
    fn refresh_absorbs_appended_items() {
        let (mut ast, md) = module_of("module m(); wire a; endmodule");
        let a = ast.interner().get_or_intern("a");
        {
            let mut nav = Navigate::at(&mut ast, md);
            assert!(nav.find_name(a).is_some());
        }
        // Append a new declaration after the first indexing.
        let sink = DiagnosticSink::new();
        let frags = parse("reg late;", &mut ast, &sink);
        let Fragment::Item(item) = frags[0] else {
            panic!()
        };
        ast.add_item(md, item);
        let late = ast.interner().get_or_intern("late");
        let mut nav = Navigate::at(&mut ast, md);
        assert!(nav.find_name(late).is_some());
    }

    #[test]
    fn named_statement_blocks_are_children() {
        let (mut ast, md) =
            module_of("module m(); initial begin : blk reg t; t = 1; end endmodule");
        let blk = ast.interner().get_or_intern("blk");
        let t = ast.interner().get_or_intern("t");
        let mut nav = Navigate::at(&mut ast, md);
        assert!(nav.find_name(t).is_none());
        assert!(nav.down(blk, None));
        assert!(nav.find_name(t).is_some());
        assert!(nav.up());
        assert_eq!(nav.here(), Some(md));
    }

    #[test]
    fn unnamed_blocks_are_transparent() {
        let (mut ast, md) = module_of("module m(); if (1) wire w; endmodule");
        // Elaborate by hand: record the clause block as the chosen result.
        let items = ast.items(md).to_vec();
        let Node::IfGenerate { clauses, .. } = ast.node(items[0]).clone() else {
            panic!()
        };
        let Node::IfGenClause { block, .. } = ast.node(clauses[0]).clone() else {
            panic!()
        };
        ast.decor
            .elabs
            .insert(items[0], Elaboration::Block(Some(block)));
        let w = ast.interner().get_or_intern("w");
        let mut nav = Navigate::at(&mut ast, md);
        assert!(nav.find_name(w).is_some());
    }
}
