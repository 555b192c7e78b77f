//! Structural inlining of `logic`-annotated module instances.
//!
//! Inlining replaces a child instantiation with an always-true if-generate
//! whose block carries the child's items — ports keep their direction
//! wrappers but act as plain declarations at generate depth — followed by
//! continuous assignments connecting caller-side expressions to callee-side
//! names. The block takes the instance's name, so hierarchical references
//! keep resolving. Outlining reverses the transformation exactly; the
//! original instantiation and the gutted declaration clone are retained in
//! an [`InlineMemo`] while inlined.

use crate::program::Program;
use cascade_analyze::module_info::port_decls;
use cascade_analyze::walk_module;
use cascade_ast::{Ast, Elaboration, InlineMemo, Node, NodeId, PortDir};
use cascade_common::Bits;
use cascade_diagnostics::Span;

/// Recursively inlines every `logic`-annotated instance below the root.
pub fn inline_all(program: &mut Program) {
    if let Some(root) = program.root_decl() {
        inline_module(&mut program.ast, root);
    }
}

/// Recursively reverses [`inline_all`].
pub fn outline_all(program: &mut Program) {
    if let Some(root) = program.root_decl() {
        outline_module(&mut program.ast, root);
    }
}

fn is_inlinable(ast: &Ast, child: NodeId) -> bool {
    if ast.attr_value(child, "__std") != Some("logic") {
        return false;
    }
    matches!(ast.attr_value(child, "__loc"), None | Some("local"))
}

fn inline_module(ast: &mut Ast, md: NodeId) {
    loop {
        let mut target = None;
        walk_module(ast, md, &mut |ast, node| {
            if target.is_some() {
                return;
            }
            if matches!(ast.node(node), Node::ModuleInst { .. }) {
                if let Some(Elaboration::Instance(child)) = ast.decor.elabs.get(&node) {
                    if is_inlinable(ast, *child) {
                        target = Some((node, *child));
                    }
                }
            }
        });
        let Some((mi, child)) = target else {
            break;
        };
        // Leaves first, so the moved items already contain any inlined
        // grandchildren.
        inline_module(ast, child);
        inline_one(ast, md, mi, child);
    }
}

fn inline_one(ast: &mut Ast, md: NodeId, mi: NodeId, child: NodeId) {
    let container = ast.parent(mi).unwrap_or(md);
    let conns = connections_for(ast, mi, child);

    let mut items = match ast.node_mut(child) {
        Node::ModuleDecl { items, .. } => std::mem::take(items),
        _ => return,
    };

    let mut n_conns = 0;
    for (port, expr) in conns {
        let dir = match ast.node(port) {
            Node::PortDecl { dir, .. } => *dir,
            _ => continue,
        };
        let Some(pname) = ast.decl_name_ident(port) else {
            continue;
        };
        let port_ref = ast.new_ident_from(pname);
        let expr_clone = ast.deep_clone(expr);
        let assign = match dir {
            PortDir::Input => Node::ContAssign {
                lhs: port_ref,
                rhs: expr_clone,
            },
            PortDir::Output => Node::ContAssign {
                lhs: expr_clone,
                rhs: port_ref,
            },
            PortDir::Inout => continue,
        };
        items.push(ast.alloc(assign, Span::DUMMY));
        n_conns += 1;
    }

    let inst_name = match ast.node(mi) {
        Node::ModuleInst { name, .. } => *name,
        _ => return,
    };
    let block_name = ast.deep_clone(inst_name);
    let block = ast.alloc(
        Node::GenBlock {
            name: Some(block_name),
            items,
        },
        Span::DUMMY,
    );
    let one = ast.alloc(
        Node::Number {
            val: Bits::new(1, 1),
        },
        Span::DUMMY,
    );
    let clause = ast.alloc(Node::IfGenClause { cond: one, block }, Span::DUMMY);
    let ifgen = ast.alloc(
        Node::IfGenerate {
            clauses: vec![clause],
            else_block: None,
        },
        Span::DUMMY,
    );

    ast.replace_item(container, mi, ifgen);
    ast.decor.elabs.insert(ifgen, Elaboration::Block(Some(block)));
    ast.decor.inlines.insert(
        ifgen,
        InlineMemo {
            inst: mi,
            child,
            conns: n_conns,
        },
    );
    ast.decor.invalidate_scope(container);
    ast.decor.invalidate_scope(md);
}

fn outline_module(ast: &mut Ast, md: NodeId) {
    loop {
        let mut target = None;
        walk_module(ast, md, &mut |ast, node| {
            if target.is_none() && ast.decor.inlines.contains_key(&node) {
                target = Some(node);
            }
        });
        let Some(ifgen) = target else {
            break;
        };
        if let Some(child) = outline_one(ast, md, ifgen) {
            outline_module(ast, child);
        }
    }
}

fn outline_one(ast: &mut Ast, md: NodeId, ifgen: NodeId) -> Option<NodeId> {
    let memo = ast.decor.inlines.remove(&ifgen)?;
    let container = ast.parent(ifgen).unwrap_or(md);
    let Some(Elaboration::Block(Some(block))) = ast.decor.elabs.remove(&ifgen) else {
        return None;
    };
    let mut items = match ast.node_mut(block) {
        Node::GenBlock { items, .. } => std::mem::take(items),
        _ => return None,
    };
    for dropped in items.split_off(items.len().saturating_sub(memo.conns)) {
        ast.set_parent(dropped, None);
    }
    for &item in &items {
        ast.set_parent(item, Some(memo.child));
    }
    if let Node::ModuleDecl {
        items: child_items, ..
    } = ast.node_mut(memo.child)
    {
        *child_items = items;
    }
    ast.replace_item(container, ifgen, memo.inst);
    ast.decor.invalidate_scope(container);
    ast.decor.invalidate_scope(md);
    Some(memo.child)
}

/// The caller-side binding of each child port, in child port order for
/// positional instantiations and by formal name for named ones.
fn connections_for(ast: &Ast, mi: NodeId, child: NodeId) -> Vec<(NodeId, NodeId)> {
    let child_ports = port_decls(ast, child);
    let Node::ModuleInst { ports: args, .. } = ast.node(mi).clone() else {
        return Vec::new();
    };
    let named = args
        .iter()
        .any(|&a| matches!(ast.node(a), Node::ArgAssign { port: Some(_), .. }));
    let mut out = Vec::new();
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
                out.push((pd, expr));
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
                out.push((pd, expr));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_common::Interner;
    use cascade_diagnostics::DiagnosticSink;
    use cascade_verilog_parser::{parse, Fragment};
    use std::sync::Arc;

    fn build() -> (Program, DiagnosticSink) {
        let mut p = Program::new(Arc::new(Interner::new()));
        let sink = DiagnosticSink::new();
        let srcs = [
            "(*__std = \"logic\"*) module Root(); endmodule",
            "(*__std = \"logic\"*) module blinker(x); input wire x; wire y; assign y = x; endmodule",
        ];
        for src in srcs {
            for frag in parse(src, &mut p.ast, &sink) {
                let Fragment::Decl(md) = frag else { panic!() };
                assert!(p.declare(md, &sink), "{:?}", sink.take_all());
            }
        }
        for src in ["Root root();", "wire w; blinker b(w);"] {
            for frag in parse(src, &mut p.ast, &sink) {
                let Fragment::Item(item) = frag else { panic!() };
                p.eval_item(item, &sink).expect("eval");
            }
        }
        (p, sink)
    }

    #[test]
    fn inline_replaces_instantiation() {
        let (mut p, _sink) = build();
        let root = p.root_decl().unwrap();
        let before = p.ast.items(root).len();
        inline_all(&mut p);
        let items = p.ast.items(root).to_vec();
        assert_eq!(items.len(), before);
        assert!(items
            .iter()
            .all(|&i| !matches!(p.ast.node(i), Node::ModuleInst { .. })));
        assert!(items
            .iter()
            .any(|&i| matches!(p.ast.node(i), Node::IfGenerate { .. })));
    }

    #[test]
    fn inline_block_carries_child_items_and_connections() {
        let (mut p, _sink) = build();
        inline_all(&mut p);
        let root = p.root_decl().unwrap();
        let ifgen = p
            .ast
            .items(root)
            .iter()
            .copied()
            .find(|&i| matches!(p.ast.node(i), Node::IfGenerate { .. }))
            .unwrap();
        let memo = p.ast.decor.inlines[&ifgen];
        assert_eq!(memo.conns, 1);
        let Some(Elaboration::Block(Some(block))) = p.ast.decor.elabs.get(&ifgen) else {
            panic!()
        };
        let items = p.ast.items(*block);
        // Port decl, local wire, assign, plus the input connection.
        assert_eq!(items.len(), 4);
        assert!(matches!(
            p.ast.node(*items.last().unwrap()),
            Node::ContAssign { .. }
        ));
    }

    #[test]
    fn outline_restores_structure() {
        let (mut p, _sink) = build();
        let root = p.root_decl().unwrap();
        let child = p.elab("root.b").unwrap();
        let child_items_before = p.ast.items(child).len();
        let root_items_before = p.ast.items(root).len();

        inline_all(&mut p);
        outline_all(&mut p);

        assert_eq!(p.ast.items(root).len(), root_items_before);
        assert_eq!(p.ast.items(child).len(), child_items_before);
        let mi = *p.ast.items(root).last().unwrap();
        assert!(matches!(p.ast.node(mi), Node::ModuleInst { .. }));
        assert!(matches!(
            p.ast.decor.elabs.get(&mi),
            Some(Elaboration::Instance(c)) if *c == child
        ));
        assert!(p.ast.decor.inlines.is_empty());
    }

    #[test]
    fn module_info_matches_after_roundtrip() {
        let (mut p, _sink) = build();
        let child = p.elab("root.b").unwrap();
        let before = cascade_analyze::module_info(&mut p.ast, child);
        inline_all(&mut p);
        outline_all(&mut p);
        let after = cascade_analyze::module_info(&mut p.ast, child);
        assert_eq!(before.locals, after.locals);
        assert_eq!(before.inputs, after.inputs);
        assert_eq!(before.outputs, after.outputs);
        assert_eq!(before.stateful, after.stateful);
    }
}
