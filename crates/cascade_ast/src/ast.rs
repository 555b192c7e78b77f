//! The arena-backed AST container.
//!
//! An [`Ast`] owns the node arena, the parallel parent/span side vectors,
//! and the lazy [`Decorations`]. The parent edge is a handle, not an owning
//! reference; unlinking a subtree makes it unreachable without moving nodes.

use crate::arena::Arena;
use crate::decor::Decorations;
use crate::ids::NodeId;
use crate::node::{IdPart, Node};
use cascade_common::{Ident, Interner};
use cascade_diagnostics::Span;
use std::sync::Arc;

/// The arena-backed AST with parent links, spans, and decorations.
pub struct Ast {
    interner: Arc<Interner>,
    nodes: Arena<NodeId, Node>,
    parents: Vec<Option<NodeId>>,
    spans: Vec<Span>,
    /// Lazy analysis caches keyed by handle.
    pub decor: Decorations,
}

impl Ast {
    /// Creates an empty AST sharing the given interner.
    pub fn new(interner: Arc<Interner>) -> Self {
        Self {
            interner,
            nodes: Arena::new(),
            parents: Vec::new(),
            spans: Vec::new(),
            decor: Decorations::default(),
        }
    }

    /// Returns the shared interner.
    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Returns a cloneable handle to the shared interner.
    pub fn interner_arc(&self) -> Arc<Interner> {
        Arc::clone(&self.interner)
    }

    /// Allocates a node, recording the parent link of each of its children.
    ///
    /// Children must be allocated before their parent; construction is
    /// strictly bottom-up.
    pub fn alloc(&mut self, node: Node, span: Span) -> NodeId {
        let id = self.nodes.alloc(node);
        self.parents.push(None);
        self.spans.push(span);
        let mut children = Vec::new();
        self.nodes[id].for_each_child(&mut |c| children.push(c));
        for c in children {
            self.parents[c.as_raw() as usize] = Some(id);
        }
        id
    }

    /// Returns the node for a handle.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Returns a mutable reference to a node.
    ///
    /// Callers that change child handles must fix the affected parent links
    /// themselves via [`set_parent`](Self::set_parent).
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Returns the parent handle, or `None` for roots and unlinked subtrees.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents[id.as_raw() as usize]
    }

    /// Sets (or clears) the parent link of `child`.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) {
        self.parents[child.as_raw() as usize] = parent;
    }

    /// Returns the span recorded for a node.
    pub fn span(&self, id: NodeId) -> Span {
        self.spans[id.as_raw() as usize]
    }

    /// Returns the number of nodes ever allocated.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no nodes have been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Collects the direct children of a node in syntactic order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.nodes[id].for_each_child(&mut |c| out.push(c));
        out
    }

    /// Recursively clones the subtree rooted at `id` into this arena,
    /// returning the new root. The clone carries no parent link and no
    /// decorations.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let span = self.span(id);
        let node = self.nodes[id].clone();
        let new_node = node.map_children(&mut |c| self.deep_clone(c));
        self.alloc(new_node, span)
    }

    /// Copies the subtree rooted at `root` into a fresh `Ast` sharing the
    /// same interner. Used to hand backend compilers their own clone.
    pub fn extract(&self, root: NodeId) -> (Ast, NodeId) {
        let (ast, root, _) = self.extract_mapped(root);
        (ast, root)
    }

    /// Like [`extract`](Self::extract), additionally returning the mapping
    /// from source handles to destination handles so callers can rewrite
    /// specific nodes in the copy.
    pub fn extract_mapped(
        &self,
        root: NodeId,
    ) -> (Ast, NodeId, std::collections::HashMap<NodeId, NodeId>) {
        let mut dst = Ast::new(Arc::clone(&self.interner));
        let mut map = std::collections::HashMap::new();
        let new_root = self.copy_into(root, &mut dst, &mut map);
        (dst, new_root, map)
    }

    fn copy_into(
        &self,
        id: NodeId,
        dst: &mut Ast,
        map: &mut std::collections::HashMap<NodeId, NodeId>,
    ) -> NodeId {
        let node = self.nodes[id].clone();
        let new_node = node.map_children(&mut |c| self.copy_into(c, dst, map));
        let new_id = dst.alloc(new_node, self.span(id));
        map.insert(id, new_id);
        // Elaboration results travel with their construct: chosen generate
        // blocks are ordinary children (already mapped), but instance clones
        // and unrolled loop blocks are reachable only through the memo.
        if let Some(elab) = self.decor.elabs.get(&id) {
            let copied = match elab {
                crate::decor::Elaboration::Block(b) => {
                    crate::decor::Elaboration::Block(b.map(|b| map[&b]))
                }
                crate::decor::Elaboration::Instance(decl) => {
                    let new_decl = self.copy_into(*decl, dst, map);
                    dst.set_parent(new_decl, Some(new_id));
                    crate::decor::Elaboration::Instance(new_decl)
                }
                crate::decor::Elaboration::Blocks(blocks) => {
                    let new_blocks: Vec<NodeId> = blocks
                        .iter()
                        .map(|&b| {
                            let nb = self.copy_into(b, dst, map);
                            dst.set_parent(nb, Some(new_id));
                            nb
                        })
                        .collect();
                    crate::decor::Elaboration::Blocks(new_blocks)
                }
            };
            dst.decor.elabs.insert(new_id, copied);
        }
        new_id
    }

    // ========================================================================
    // Structure edits
    // ========================================================================

    /// Appends an item to a `ModuleDecl` or `GenBlock`, linking its parent.
    ///
    /// # Panics
    ///
    /// Panics if `scope` is not an item container.
    pub fn add_item(&mut self, scope: NodeId, item: NodeId) {
        match &mut self.nodes[scope] {
            Node::ModuleDecl { items, .. } | Node::GenBlock { items, .. } => items.push(item),
            n => panic!("add_item on non-container node {n:?}"),
        }
        self.set_parent(item, Some(scope));
    }

    /// Removes an item from a `ModuleDecl` or `GenBlock`, unlinking it.
    /// Returns `false` if the item was not present.
    pub fn remove_item(&mut self, scope: NodeId, item: NodeId) -> bool {
        let removed = match &mut self.nodes[scope] {
            Node::ModuleDecl { items, .. } | Node::GenBlock { items, .. } => {
                match items.iter().position(|&i| i == item) {
                    Some(pos) => {
                        items.remove(pos);
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        if removed {
            self.set_parent(item, None);
        }
        removed
    }

    /// Replaces an item of a `ModuleDecl` or `GenBlock` in place, preserving
    /// its position. Returns `false` if `old` was not present.
    pub fn replace_item(&mut self, scope: NodeId, old: NodeId, new: NodeId) -> bool {
        let replaced = match &mut self.nodes[scope] {
            Node::ModuleDecl { items, .. } | Node::GenBlock { items, .. } => {
                match items.iter().position(|&i| i == old) {
                    Some(pos) => {
                        items[pos] = new;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        if replaced {
            self.set_parent(old, None);
            self.set_parent(new, Some(scope));
        }
        replaced
    }

    /// Returns the items of a `ModuleDecl` or `GenBlock`.
    pub fn items(&self, scope: NodeId) -> &[NodeId] {
        match &self.nodes[scope] {
            Node::ModuleDecl { items, .. } | Node::GenBlock { items, .. } => items,
            _ => &[],
        }
    }

    // ========================================================================
    // Identifier helpers
    // ========================================================================

    /// Allocates a plain single-segment `Identifier` node for `name`.
    pub fn new_ident(&mut self, name: &str) -> NodeId {
        let ident = self.interner.get_or_intern(name);
        self.new_ident_from(ident)
    }

    /// Allocates a plain single-segment `Identifier` node for an interned name.
    pub fn new_ident_from(&mut self, name: Ident) -> NodeId {
        self.alloc(
            Node::Identifier {
                path: vec![IdPart::plain(name)],
                dims: Vec::new(),
            },
            Span::DUMMY,
        )
    }

    /// For a single-segment identifier node, returns its interned name.
    pub fn simple_name(&self, id: NodeId) -> Option<Ident> {
        match &self.nodes[id] {
            Node::Identifier { path, .. } if path.len() == 1 => Some(path[0].name),
            _ => None,
        }
    }

    /// Returns the name node of a declaration, looking through `PortDecl`.
    pub fn decl_name(&self, decl: NodeId) -> Option<NodeId> {
        match &self.nodes[decl] {
            Node::NetDecl { name, .. }
            | Node::RegDecl { name, .. }
            | Node::IntegerDecl { name, .. }
            | Node::GenvarDecl { name }
            | Node::ParamDecl { name, .. }
            | Node::LocalparamDecl { name, .. } => Some(*name),
            Node::PortDecl { decl, .. } => self.decl_name(*decl),
            _ => None,
        }
    }

    /// Returns the interned name of a declaration.
    pub fn decl_name_ident(&self, decl: NodeId) -> Option<Ident> {
        self.decl_name(decl).and_then(|n| self.simple_name(n))
    }

    /// Returns the interned name of a `ModuleDecl`.
    pub fn module_name(&self, md: NodeId) -> Option<Ident> {
        match &self.nodes[md] {
            Node::ModuleDecl { name, .. } => self.simple_name(*name),
            _ => None,
        }
    }

    /// Returns an attribute value on a `ModuleDecl` or `ModuleInst`.
    pub fn attr_value(&self, id: NodeId, name: &str) -> Option<&str> {
        self.nodes[id].attr(name).and_then(|a| a.value.as_deref())
    }

    /// Returns `true` if `id` opens a new name space: a module declaration,
    /// a named generate block, or a named sequential block.
    pub fn is_scope_boundary(&self, id: NodeId) -> bool {
        match &self.nodes[id] {
            Node::ModuleDecl { .. } => true,
            Node::GenBlock { name, .. } | Node::SeqBlock { name, .. } => name.is_some(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Attr;
    use cascade_common::Bits;

    fn test_ast() -> Ast {
        Ast::new(Arc::new(Interner::new()))
    }

    #[test]
    fn alloc_sets_parent_links() {
        let mut ast = test_ast();
        let num = ast.alloc(
            Node::Number {
                val: Bits::new(4, 3),
            },
            Span::DUMMY,
        );
        let name = ast.new_ident("x");
        let decl = ast.alloc(
            Node::RegDecl {
                name,
                signed: false,
                range: None,
                arrays: Vec::new(),
                init: Some(num),
            },
            Span::DUMMY,
        );
        assert_eq!(ast.parent(num), Some(decl));
        assert_eq!(ast.parent(name), Some(decl));
        assert_eq!(ast.parent(decl), None);
    }

    #[test]
    fn deep_clone_is_structural() {
        let mut ast = test_ast();
        let lhs = ast.new_ident("a");
        let rhs = ast.alloc(
            Node::Number {
                val: Bits::new(1, 1),
            },
            Span::DUMMY,
        );
        let assign = ast.alloc(Node::ContAssign { lhs, rhs }, Span::DUMMY);
        let copy = ast.deep_clone(assign);
        assert_ne!(copy, assign);
        let kids = ast.children(copy);
        assert_eq!(kids.len(), 2);
        assert_ne!(kids[0], lhs);
        assert_eq!(ast.simple_name(kids[0]), ast.simple_name(lhs));
    }

    #[test]
    fn extract_builds_independent_tree() {
        let mut ast = test_ast();
        let name = ast.new_ident("m");
        let md = ast.alloc(
            Node::ModuleDecl {
                attrs: vec![Attr {
                    name: "__std".into(),
                    value: Some("logic".into()),
                }],
                name,
                ports: Vec::new(),
                items: Vec::new(),
            },
            Span::DUMMY,
        );
        let (copy, root) = ast.extract(md);
        assert_eq!(copy.module_name(root), ast.module_name(md));
        assert_eq!(copy.attr_value(root, "__std"), Some("logic"));
    }

    #[test]
    fn add_and_remove_item() {
        let mut ast = test_ast();
        let name = ast.new_ident("m");
        let md = ast.alloc(
            Node::ModuleDecl {
                attrs: Vec::new(),
                name,
                ports: Vec::new(),
                items: Vec::new(),
            },
            Span::DUMMY,
        );
        let stmt = ast.alloc(Node::Display { args: Vec::new() }, Span::DUMMY);
        let item = ast.alloc(Node::Initial { stmt }, Span::DUMMY);
        ast.add_item(md, item);
        assert_eq!(ast.items(md), &[item]);
        assert_eq!(ast.parent(item), Some(md));
        assert!(ast.remove_item(md, item));
        assert!(ast.items(md).is_empty());
        assert_eq!(ast.parent(item), None);
        assert!(!ast.remove_item(md, item));
    }

    #[test]
    fn scope_boundaries() {
        let mut ast = test_ast();
        let name = ast.new_ident("m");
        let md = ast.alloc(
            Node::ModuleDecl {
                attrs: Vec::new(),
                name,
                ports: Vec::new(),
                items: Vec::new(),
            },
            Span::DUMMY,
        );
        assert!(ast.is_scope_boundary(md));
        let anon = ast.alloc(
            Node::SeqBlock {
                name: None,
                stmts: Vec::new(),
            },
            Span::DUMMY,
        );
        assert!(!ast.is_scope_boundary(anon));
        let bname = ast.new_ident("blk");
        let named = ast.alloc(
            Node::SeqBlock {
                name: Some(bname),
                stmts: Vec::new(),
            },
            Span::DUMMY,
        );
        assert!(ast.is_scope_boundary(named));
    }
}
