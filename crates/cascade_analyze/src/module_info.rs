//! Per-module I/O and connectivity summaries.
//!
//! A single pass over an elaborated module's items classifies every declared
//! identifier into the [`ModuleInfo`] sets: locals, inputs, outputs,
//! stateful variables, streams, externals, reads, writes, and children,
//! plus ordered/named parameter and port lists and per-child connection
//! maps. Results are memoized on the declaration and dropped by the binding
//! invalidation discipline.

use crate::resolve::{is_use_position, Resolve};
use cascade_ast::{Ast, Elaboration, ModuleInfo, Node, NodeId, PortDir};
use cascade_common::Ident;
use std::collections::HashMap;

/// How an identifier occurrence writes its target, if it does.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AssignKind {
    /// The left side of a continuous assignment.
    Continuous,
    /// The left side of a blocking procedural assignment.
    Blocking,
    /// The left side of a nonblocking assignment.
    Nonblocking,
    /// The target of a `$get` system task.
    Get,
}

/// Classifies an identifier occurrence as a write target.
pub fn assign_kind(ast: &Ast, id: NodeId) -> Option<AssignKind> {
    let mut cur = id;
    let mut parent = ast.parent(cur)?;
    if matches!(ast.node(parent), Node::Concat { .. }) {
        cur = parent;
        parent = ast.parent(cur)?;
    }
    match ast.node(parent) {
        Node::ContAssign { lhs, .. } if *lhs == cur => Some(AssignKind::Continuous),
        Node::BlockingAssign { lhs, .. } if *lhs == cur => Some(AssignKind::Blocking),
        Node::NonblockingAssign { lhs, .. } if *lhs == cur => Some(AssignKind::Nonblocking),
        Node::Get { target, .. } if *target == cur => Some(AssignKind::Get),
        _ => None,
    }
}

/// Returns the module declaration enclosing `node`, if any.
pub fn enclosing_module(ast: &Ast, node: NodeId) -> Option<NodeId> {
    let mut cur = node;
    loop {
        if matches!(ast.node(cur), Node::ModuleDecl { .. }) {
            return Some(cur);
        }
        cur = ast.parent(cur)?;
    }
}

/// Walks one module's elaborated content: generate constructs contribute
/// only their chosen blocks, and child instantiations contribute their
/// binding expressions but not their elaborated bodies.
pub fn walk_module(ast: &Ast, node: NodeId, f: &mut impl FnMut(&Ast, NodeId)) {
    f(ast, node);
    match ast.node(node) {
        Node::IfGenerate { .. } | Node::CaseGenerate { .. } => {
            if let Some(Elaboration::Block(Some(block))) = ast.decor.elabs.get(&node) {
                walk_module(ast, *block, f);
            }
        }
        Node::LoopGenerate { .. } => {
            if let Some(Elaboration::Blocks(blocks)) = ast.decor.elabs.get(&node) {
                for block in blocks.clone() {
                    walk_module(ast, block, f);
                }
            }
        }
        _ => {
            for child in ast.children(node) {
                walk_module(ast, child, f);
            }
        }
    }
}

/// Computes (or returns the memoized) summary of an elaborated module.
pub fn module_info(ast: &mut Ast, md: NodeId) -> ModuleInfo {
    if let Some(info) = ast.decor.infos.get(&md) {
        return info.clone();
    }
    let info = compute(ast, md);
    ast.decor.infos.insert(md, info.clone());
    info
}

fn compute(ast: &mut Ast, md: NodeId) -> ModuleInfo {
    let mut info = ModuleInfo::default();

    // One pass over the module's own content.
    let mut decls = Vec::new();
    let mut refs = Vec::new();
    walk_module(ast, md, &mut |ast, node| {
        if node == md {
            return;
        }
        match ast.node(node) {
            n if n.is_decl() => decls.push(node),
            Node::ModuleInst { .. } => info.children.push(node),
            Node::Identifier { .. } if is_use_position(ast, node) => refs.push(node),
            _ => {}
        }
    });

    let mut by_name: HashMap<Ident, NodeId> = HashMap::new();
    for decl in decls {
        // Port wrappers summarize as the wrapper; the inner declaration is
        // skipped to avoid double counting.
        if let Some(parent) = ast.parent(decl) {
            if matches!(ast.node(parent), Node::PortDecl { .. }) {
                continue;
            }
        }
        info.locals.insert(decl);
        if let Some(name) = ast.decl_name_ident(decl) {
            by_name.insert(name, decl);
        }
        // Ports and parameters count only at module-item level; a port
        // wrapper nested inside an inlined block acts as a plain local.
        let direct = ast.parent(decl) == Some(md);
        match ast.node(decl).clone() {
            Node::PortDecl { dir, .. } if direct => {
                match dir {
                    PortDir::Input => {
                        info.inputs.insert(decl);
                    }
                    PortDir::Output => {
                        info.outputs.insert(decl);
                    }
                    PortDir::Inout => {
                        info.inputs.insert(decl);
                        info.outputs.insert(decl);
                    }
                }
                if let Some(name) = ast.decl_name_ident(decl) {
                    info.named_ports.insert(name, decl);
                }
            }
            Node::ParamDecl { .. } if direct => {
                info.ordered_params.push(decl);
                if let Some(name) = ast.decl_name_ident(decl) {
                    info.named_params.insert(name, decl);
                }
            }
            Node::NetDecl { init, .. } | Node::RegDecl { init, .. } | Node::IntegerDecl { init, .. } => {
                if let Some(init) = init {
                    if matches!(ast.node(init), Node::Fopen { .. }) {
                        info.streams.insert(decl);
                        info.stateful.insert(decl);
                    }
                }
            }
            _ => {}
        }
    }

    // Header order for ports.
    if let Node::ModuleDecl { ports, .. } = ast.node(md).clone() {
        for port in ports {
            if let Some(name) = ast.simple_name(port) {
                if let Some(&decl) = by_name.get(&name) {
                    info.ordered_ports.push(decl);
                }
            }
        }
    }

    // References made by this module.
    for r in refs {
        let Some(decl) = Resolve::new(ast).get_resolution(r) else {
            continue;
        };
        let local = enclosing_module(ast, decl) == Some(md);
        if !local {
            info.externals.insert(decl);
        }
        match assign_kind(ast, r) {
            Some(kind) => {
                info.writes.insert(decl);
                if local
                    && matches!(kind, AssignKind::Nonblocking | AssignKind::Get)
                {
                    info.stateful.insert(decl);
                }
            }
            None => {
                info.reads.insert(decl);
            }
        }
    }

    // Hierarchical references made by other modules into this one.
    let locals: Vec<NodeId> = info.locals.iter().copied().collect();
    for decl in locals {
        let uses = Resolve::new(ast).uses(decl);
        for u in uses {
            if enclosing_module(ast, u) == Some(md) {
                continue;
            }
            match assign_kind(ast, u) {
                Some(kind) => {
                    info.writes.insert(decl);
                    if matches!(kind, AssignKind::Nonblocking | AssignKind::Get) {
                        info.stateful.insert(decl);
                    }
                }
                None => {
                    info.reads.insert(decl);
                }
            }
        }
    }

    // Per-child connection maps.
    for mi in info.children.clone() {
        let Some(Elaboration::Instance(child)) = ast.decor.elabs.get(&mi).cloned() else {
            continue;
        };
        let child_ports = port_decls(ast, child);
        let Node::ModuleInst { ports: args, .. } = ast.node(mi).clone() else {
            continue;
        };
        let named = args
            .iter()
            .any(|&a| matches!(ast.node(a), Node::ArgAssign { port: Some(_), .. }));
        let mut conns = Vec::new();
        if named {
            for &arg in &args {
                let Node::ArgAssign {
                    port: Some(port),
                    expr: Some(expr),
                } = ast.node(arg).clone()
                else {
                    continue;
                };
                let Some(pname) = ast.simple_name(port) else {
                    continue;
                };
                if let Some(&pd) = child_ports
                    .iter()
                    .find(|&&p| ast.decl_name_ident(p) == Some(pname))
                {
                    conns.push((pd, expr));
                }
            }
        } else {
            for (i, &arg) in args.iter().enumerate() {
                let Node::ArgAssign {
                    expr: Some(expr), ..
                } = ast.node(arg).clone()
                else {
                    continue;
                };
                if let Some(&pd) = child_ports.get(i) {
                    conns.push((pd, expr));
                }
            }
        }
        info.connections.insert(mi, conns);
    }

    info
}

/// The port declarations of a module in header order.
pub fn port_decls(ast: &Ast, md: NodeId) -> Vec<NodeId> {
    let Node::ModuleDecl { ports, items, .. } = ast.node(md).clone() else {
        return Vec::new();
    };
    let mut by_name: HashMap<Ident, NodeId> = HashMap::new();
    for item in items {
        if matches!(ast.node(item), Node::PortDecl { .. }) {
            if let Some(name) = ast.decl_name_ident(item) {
                by_name.insert(name, item);
            }
        }
    }
    ports
        .iter()
        .filter_map(|&p| ast.simple_name(p))
        .filter_map(|n| by_name.get(&n).copied())
        .collect()
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
        let nodes = frags
            .into_iter()
            .map(|f| match f {
                Fragment::Decl(md) => md,
                Fragment::Item(i) => i,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        (ast, nodes)
    }

    #[test]
    fn classifies_ports_and_locals() {
        let (mut ast, nodes) = setup(
            "module m(a, b); input wire a; output reg b; wire c; endmodule",
        );
        let info = module_info(&mut ast, nodes[0]);
        assert_eq!(info.inputs.len(), 1);
        assert_eq!(info.outputs.len(), 1);
        assert_eq!(info.locals.len(), 3);
        assert_eq!(info.ordered_ports.len(), 2);
    }

    #[test]
    fn nonblocking_targets_are_stateful() {
        let (mut ast, nodes) = setup(
            "module m(); reg r; wire w; always @* begin r <= w; end endmodule",
        );
        let info = module_info(&mut ast, nodes[0]);
        assert_eq!(info.stateful.len(), 1);
        let decl = *info.stateful.iter().next().unwrap();
        assert_eq!(
            ast.decl_name_ident(decl),
            Some(ast.interner().get_or_intern("r"))
        );
        assert!(info.writes.contains(&decl));
    }

    #[test]
    fn blocking_targets_are_written_not_stateful() {
        let (mut ast, nodes) = setup("module m(); reg r; always @* r = 1; endmodule");
        let info = module_info(&mut ast, nodes[0]);
        assert!(info.stateful.is_empty());
        assert_eq!(info.writes.len(), 1);
    }

    #[test]
    fn fopen_results_are_streams() {
        let (mut ast, nodes) = setup("module m(); integer fd = $fopen(\"data.txt\"); endmodule");
        let info = module_info(&mut ast, nodes[0]);
        assert_eq!(info.streams.len(), 1);
        assert_eq!(info.stateful.len(), 1);
    }

    #[test]
    fn reads_track_rvalue_references() {
        let (mut ast, nodes) = setup("module m(); wire a; wire b; assign b = a; endmodule");
        let info = module_info(&mut ast, nodes[0]);
        assert_eq!(info.reads.len(), 1);
        assert_eq!(info.writes.len(), 1);
    }

    #[test]
    fn params_are_ordered_and_named() {
        let (mut ast, nodes) =
            setup("module m(); parameter A = 1; parameter B = 2; endmodule");
        let info = module_info(&mut ast, nodes[0]);
        assert_eq!(info.ordered_params.len(), 2);
        assert!(info
            .named_params
            .contains_key(&ast.interner().get_or_intern("A")));
    }

    #[test]
    fn result_is_memoized() {
        let (mut ast, nodes) = setup("module m(); wire w; endmodule");
        let _ = module_info(&mut ast, nodes[0]);
        assert!(ast.decor.infos.contains_key(&nodes[0]));
    }
}
