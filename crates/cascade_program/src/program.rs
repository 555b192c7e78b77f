//! The incrementally-grown elaborated program.
//!
//! A [`Program`] owns the AST, the declaration table (module declarations,
//! first is the root type), and the elaborated-instance table. `declare`
//! type-checks a declaration in declaration-only mode; `eval_item` appends
//! an item to the root instance (or, for the very first item, creates the
//! root) and drives the elaboration worklist until both pending queues
//! drain. A transaction with errors rolls back every table entry, cache,
//! and tree edit it made.

use crate::checkpoint::CheckpointMap;
use cascade_analyze::navigate::enclosing_scope;
use cascade_analyze::{Elaborate, TypeCheck};
use cascade_ast::{Ast, Elaboration, Node, NodeId};
use cascade_common::{Ident, Interner};
use cascade_diagnostics::DiagnosticSink;
use std::collections::VecDeque;
use std::sync::Arc;

/// One newly elaborated module instance, reported to the runtime so it can
/// compile an engine for it.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// The fully qualified instance name (`root`, `root.clock`, ...).
    pub name: String,
    /// The instantiation item.
    pub inst: NodeId,
    /// The elaborated declaration clone.
    pub decl: NodeId,
}

/// The program: declaration table, elaborated hierarchy, and their AST.
pub struct Program {
    /// The arena holding every declaration and elaborated instance.
    pub ast: Ast,
    decls: CheckpointMap<Ident, NodeId>,
    elabs: CheckpointMap<String, NodeId>,
    root_inst: Option<NodeId>,
}

impl Program {
    /// Creates an empty program sharing the given interner.
    pub fn new(interner: Arc<Interner>) -> Self {
        Self {
            ast: Ast::new(interner),
            decls: CheckpointMap::new(),
            elabs: CheckpointMap::new(),
            root_inst: None,
        }
    }

    /// The declaration table, insertion ordered.
    pub fn decls(&self) -> impl Iterator<Item = (Ident, NodeId)> + '_ {
        self.decls.iter().map(|(k, v)| (*k, *v))
    }

    /// Looks up a declaration by module name.
    pub fn decl(&self, name: Ident) -> Option<NodeId> {
        self.decls.get(&name).copied()
    }

    /// The elaborated-instance table, insertion ordered.
    pub fn elabs(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.elabs.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Looks up an elaborated instance by fully qualified name.
    pub fn elab(&self, name: &str) -> Option<NodeId> {
        self.elabs.get(&name.to_string()).copied()
    }

    /// The root instantiation, once the first eval has created it.
    pub fn root_inst(&self) -> Option<NodeId> {
        self.root_inst
    }

    /// The elaborated root declaration.
    pub fn root_decl(&self) -> Option<NodeId> {
        let inst = self.root_inst?;
        match self.ast.decor.elabs.get(&inst) {
            Some(Elaboration::Instance(decl)) => Some(*decl),
            _ => None,
        }
    }

    /// Type-checks `md` in declaration-only mode and, if clean, inserts it
    /// into the declaration table. Returns `true` on success.
    pub fn declare(&mut self, md: NodeId, sink: &DiagnosticSink) -> bool {
        TypeCheck::new(&mut self.ast, sink, self.decls.map()).check_decl(md);
        if sink.has_errors() {
            return false;
        }
        let name = self
            .ast
            .module_name(md)
            .expect("checked module declarations are named");
        self.decls.insert(name, md)
    }

    /// Evaluates a module item.
    ///
    /// With no root yet, the item must be an instantiation of the
    /// first-declared module; otherwise it is appended to the root's items.
    /// Elaboration then drives the pending-construct worklist to empty. On
    /// any error the declaration and elaboration tables roll back and the
    /// item is unlinked. Returns the newly elaborated instances.
    pub fn eval_item(
        &mut self,
        item: NodeId,
        sink: &DiagnosticSink,
    ) -> Result<Vec<NewInstance>, ()> {
        let decl_cp = self.decls.checkpoint();
        let elab_cp = self.elabs.checkpoint();
        let mut touched: Vec<NodeId> = Vec::new();

        let installed_root = if self.root_inst.is_none() {
            let first = self.decls.first().copied();
            let target = match self.ast.node(item) {
                Node::ModuleInst { module, .. } => self.ast.simple_name(*module),
                _ => None,
            };
            match (first, target) {
                (Some(f), Some(t)) if f == t => {
                    self.root_inst = Some(item);
                    true
                }
                (Some(f), _) => {
                    sink.error(format!(
                        "the first evaluation must instantiate {}",
                        self.ast.interner().resolve(f)
                    ));
                    return Err(());
                }
                (None, _) => {
                    sink.error("no module has been declared yet");
                    return Err(());
                }
            }
        } else {
            let root = self.root_decl().expect("root exists after first eval");
            self.ast.add_item(root, item);
            self.ast.decor.invalidate_bindings();
            false
        };

        // Pre-elaboration checks on the user's text: duplicates against the
        // existing scope, declaration shapes, and reserved generate names.
        // This runs before elaboration so synthesized `genblkN` blocks are
        // never mistaken for user collisions.
        TypeCheck::new(&mut self.ast, sink, self.decls.map()).check_names_and_shapes(item, true);

        let mut new_instances = Vec::new();
        if !sink.has_errors() {
            self.elaborate_all(item, sink, &mut new_instances, &mut touched);
        }

        if !sink.has_errors() {
            // The freshly expanded code must resolve completely.
            let mut check = TypeCheck::new(&mut self.ast, sink, self.decls.map());
            check.check_elaborated(item);
            for ni in &new_instances {
                let mut check = TypeCheck::new(&mut self.ast, sink, self.decls.map());
                check.check_elaborated(ni.decl);
            }
        }

        if sink.has_errors() {
            self.decls.undo(decl_cp);
            self.elabs.undo(elab_cp);
            for construct in touched {
                self.ast.decor.elabs.remove(&construct);
            }
            if installed_root {
                self.root_inst = None;
            } else if let Some(root) = self.root_decl() {
                self.ast.remove_item(root, item);
                self.ast.decor.invalidate_scope(root);
            }
            self.ast.decor.invalidate_bindings();
            return Err(());
        }
        Ok(new_instances)
    }

    /// Drives the elaboration worklist: pending instantiations and pending
    /// generate constructs, each pre-checked, elaborated, registered, and
    /// followed by a navigation-cache invalidation of its enclosing scope.
    fn elaborate_all(
        &mut self,
        item: NodeId,
        sink: &DiagnosticSink,
        new_instances: &mut Vec<NewInstance>,
        touched: &mut Vec<NodeId>,
    ) {
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        collect_pending(&self.ast, item, &mut queue);

        while let Some(construct) = queue.pop_front() {
            if sink.has_errors() {
                return;
            }
            match self.ast.node(construct).clone() {
                Node::ModuleInst { module, .. } => {
                    TypeCheck::new(&mut self.ast, sink, self.decls.map())
                        .check_instantiation(construct);
                    if sink.has_errors() {
                        return;
                    }
                    let decl = self
                        .ast
                        .simple_name(module)
                        .and_then(|n| self.decls.get(&n).copied())
                        .expect("checked instantiations name a declared module");
                    match Elaborate::new(&mut self.ast).elaborate_instantiation(construct, decl)
                    {
                        Ok(clone) => {
                            touched.push(construct);
                            let name = instance_full_name(&self.ast, construct);
                            if !self.elabs.insert(name.clone(), clone) {
                                sink.error(format!("duplicate declaration of {name}"));
                                return;
                            }
                            new_instances.push(NewInstance {
                                name,
                                inst: construct,
                                decl: clone,
                            });
                            self.invalidate_around(construct);
                            collect_pending(&self.ast, clone, &mut queue);
                        }
                        Err(e) => sink.error(format!("elaboration failed: {e}")),
                    }
                }
                Node::IfGenerate { .. } | Node::CaseGenerate { .. } => {
                    TypeCheck::new(&mut self.ast, sink, self.decls.map())
                        .check_generate(construct);
                    if sink.has_errors() {
                        return;
                    }
                    let result = if matches!(self.ast.node(construct), Node::IfGenerate { .. }) {
                        Elaborate::new(&mut self.ast).elaborate_if(construct)
                    } else {
                        Elaborate::new(&mut self.ast).elaborate_case(construct)
                    };
                    match result {
                        Ok(chosen) => {
                            touched.push(construct);
                            self.invalidate_around(construct);
                            if let Some(block) = chosen {
                                collect_pending(&self.ast, block, &mut queue);
                            }
                        }
                        Err(e) => sink.error(format!("elaboration failed: {e}")),
                    }
                }
                Node::LoopGenerate { .. } => {
                    TypeCheck::new(&mut self.ast, sink, self.decls.map())
                        .check_generate(construct);
                    if sink.has_errors() {
                        return;
                    }
                    match Elaborate::new(&mut self.ast).elaborate_loop(construct) {
                        Ok(blocks) => {
                            touched.push(construct);
                            self.invalidate_around(construct);
                            for block in blocks {
                                collect_pending(&self.ast, block, &mut queue);
                            }
                        }
                        Err(e) => sink.error(format!("elaboration failed: {e}")),
                    }
                }
                _ => {}
            }
        }
    }

    /// Drops the navigation cache of the scope enclosing a freshly
    /// elaborated construct: its index may have consumed the construct
    /// before the elaboration existed.
    fn invalidate_around(&mut self, construct: NodeId) {
        if let Some(scope) = enclosing_scope(&self.ast, construct) {
            self.ast.decor.invalidate_scope(scope);
        } else {
            self.ast.decor.invalidate_bindings();
        }
    }
}

/// Collects the unelaborated constructs in a subtree, without descending
/// into the bodies of still-unelaborated generate constructs (their content
/// only matters once a branch is chosen).
fn collect_pending(ast: &Ast, root: NodeId, out: &mut VecDeque<NodeId>) {
    match ast.node(root) {
        Node::ModuleInst { .. }
        | Node::IfGenerate { .. }
        | Node::CaseGenerate { .. }
        | Node::LoopGenerate { .. } => {
            if !ast.decor.elabs.contains_key(&root) {
                out.push_back(root);
            }
            return;
        }
        _ => {}
    }
    for child in ast.children(root) {
        collect_pending(ast, child, out);
    }
}

/// The fully qualified name of an instantiation: enclosing instance names
/// and named blocks from the root down, dot separated.
pub fn instance_full_name(ast: &Ast, mi: NodeId) -> String {
    let mut segs: Vec<String> = Vec::new();
    if let Node::ModuleInst { name, .. } = ast.node(mi) {
        if let Some(n) = ast.simple_name(*name) {
            segs.push(ast.interner().resolve(n).to_string());
        }
    }
    let mut cur = mi;
    while let Some(scope) = enclosing_scope(ast, cur) {
        match ast.node(scope) {
            Node::ModuleDecl { .. } => match ast.parent(scope) {
                Some(parent_mi) if matches!(ast.node(parent_mi), Node::ModuleInst { .. }) => {
                    if let Node::ModuleInst { name, .. } = ast.node(parent_mi) {
                        if let Some(n) = ast.simple_name(*name) {
                            segs.push(ast.interner().resolve(n).to_string());
                        }
                    }
                    cur = parent_mi;
                }
                _ => break,
            },
            Node::GenBlock { name, .. } | Node::SeqBlock { name, .. } => {
                if let Some(name) = name {
                    if let Node::Identifier { path, .. } = ast.node(*name) {
                        if let Some(part) = path.first() {
                            let base = ast.interner().resolve(part.name).to_string();
                            let seg = match part.index.map(|i| ast.node(i)) {
                                Some(Node::Number { val }) => format!("{base}[{val}]"),
                                _ => base,
                            };
                            segs.push(seg);
                        }
                    }
                }
                cur = scope;
            }
            _ => break,
        }
    }
    segs.reverse();
    segs.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_verilog_parser::{parse, Fragment};

    fn program() -> (Program, DiagnosticSink) {
        (
            Program::new(Arc::new(Interner::new())),
            DiagnosticSink::new(),
        )
    }

    fn feed(p: &mut Program, sink: &DiagnosticSink, src: &str) -> Vec<Fragment> {
        sink.clear();
        parse(src, &mut p.ast, sink)
    }

    fn declare_src(p: &mut Program, sink: &DiagnosticSink, src: &str) -> bool {
        for frag in feed(p, sink, src) {
            match frag {
                Fragment::Decl(md) => {
                    if !p.declare(md, sink) {
                        return false;
                    }
                }
                other => panic!("expected a declaration, got {other:?}"),
            }
        }
        true
    }

    fn eval_src(
        p: &mut Program,
        sink: &DiagnosticSink,
        src: &str,
    ) -> Result<Vec<NewInstance>, ()> {
        let mut all = Vec::new();
        for frag in feed(p, sink, src) {
            match frag {
                Fragment::Item(item) => all.extend(p.eval_item(item, sink)?),
                other => panic!("expected an item, got {other:?}"),
            }
        }
        Ok(all)
    }

    #[test]
    fn declares_and_instantiates_root() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        let new = eval_src(&mut p, &sink, "Root root();").unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].name, "root");
        assert!(p.root_decl().is_some());
        assert!(p.elab("root").is_some());
    }

    #[test]
    fn first_eval_must_instantiate_first_decl() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        assert!(declare_src(&mut p, &sink, "module Other(); endmodule"));
        assert!(eval_src(&mut p, &sink, "Other o();").is_err());
        assert!(p.root_inst().is_none());
        // A clean retry still works.
        sink.clear();
        assert!(eval_src(&mut p, &sink, "Root root();").is_ok());
    }

    #[test]
    fn duplicate_module_declaration_fails() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module m(); endmodule"));
        sink.clear();
        assert!(!declare_src(&mut p, &sink, "module m(); wire w; endmodule"));
    }

    #[test]
    fn items_append_to_root() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        eval_src(&mut p, &sink, "Root root();").unwrap();
        eval_src(&mut p, &sink, "wire x; assign x = 1;").unwrap();
        let root = p.root_decl().unwrap();
        assert_eq!(p.ast.items(root).len(), 2);
    }

    #[test]
    fn child_instantiation_registers_elab() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        assert!(declare_src(
            &mut p,
            &sink,
            "module foo(); wire w; endmodule"
        ));
        eval_src(&mut p, &sink, "Root root();").unwrap();
        let new = eval_src(&mut p, &sink, "foo f();").unwrap();
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].name, "root.f");
        assert!(p.elab("root.f").is_some());
    }

    #[test]
    fn double_instantiation_is_rejected_and_rolled_back() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        assert!(declare_src(&mut p, &sink, "module foo(); endmodule"));
        eval_src(&mut p, &sink, "Root root();").unwrap();
        eval_src(&mut p, &sink, "foo f();").unwrap();
        let elabs_before = p.elabs().count();
        let items_before = p.ast.items(p.root_decl().unwrap()).len();
        assert!(eval_src(&mut p, &sink, "foo f();").is_err());
        assert!(sink.has_errors());
        sink.clear();
        assert_eq!(p.elabs().count(), elabs_before);
        assert_eq!(p.ast.items(p.root_decl().unwrap()).len(), items_before);
    }

    #[test]
    fn failed_eval_unlinks_item() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        eval_src(&mut p, &sink, "Root root();").unwrap();
        assert!(eval_src(&mut p, &sink, "assign ghost = 1;").is_err());
        sink.clear();
        assert!(p.ast.items(p.root_decl().unwrap()).is_empty());
        // The program still accepts good code afterwards.
        eval_src(&mut p, &sink, "wire ok;").unwrap();
    }

    #[test]
    fn generate_constructs_elaborate_during_eval() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        eval_src(&mut p, &sink, "Root root();").unwrap();
        eval_src(
            &mut p,
            &sink,
            "genvar i; for (i = 0; i < 2; i = i + 1) begin : g wire w; end",
        )
        .unwrap();
        let root = p.root_decl().unwrap();
        let gen = *p.ast.items(root).last().unwrap();
        assert!(p.ast.decor.elabs.contains_key(&gen));
    }

    #[test]
    fn nested_instantiations_elaborate_transitively() {
        let (mut p, sink) = program();
        assert!(declare_src(&mut p, &sink, "module Root(); endmodule"));
        assert!(declare_src(
            &mut p,
            &sink,
            "module leaf(); wire w; endmodule"
        ));
        assert!(declare_src(
            &mut p,
            &sink,
            "module mid(); leaf l(); endmodule"
        ));
        eval_src(&mut p, &sink, "Root root();").unwrap();
        let new = eval_src(&mut p, &sink, "mid m();").unwrap();
        let names: Vec<_> = new.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"root.m"));
        assert!(names.contains(&"root.m.l"));
    }
}
