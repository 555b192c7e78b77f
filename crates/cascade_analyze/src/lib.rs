//! The analysis set: scope navigation, name resolution, elaboration,
//! module summaries, expression evaluation, and type checking.
//!
//! All analyses share one caching discipline: results live in the AST's
//! decoration side tables and are refreshed lazily on query. Queries first
//! absorb newly appended items via each scope's refresh counter; callers
//! that mutate the tree invalidate the enclosing scope or the binding
//! caches.

#![warn(missing_docs)]

pub mod elaborate;
pub mod eval;
pub mod module_info;
pub mod navigate;
pub mod resolve;
pub mod type_check;

pub use elaborate::Elaborate;
pub use eval::{apply_binary, apply_unary, const_eval, EvalError, Evaluate, VarRead};
pub use module_info::{module_info, walk_module, AssignKind};
pub use navigate::Navigate;
pub use resolve::Resolve;
pub use type_check::TypeCheck;

use cascade_ast::{Ast, Elaboration, Node, NodeId};

/// Walks a subtree in pre-order, descending through elaboration results:
/// instantiated module clones and unrolled loop blocks are visited even
/// though they are reachable only through the decoration tables.
pub fn walk_deep(ast: &Ast, root: NodeId, f: &mut impl FnMut(&Ast, NodeId)) {
    f(ast, root);
    for child in ast.children(root) {
        walk_deep(ast, child, f);
    }
    match ast.node(root) {
        Node::ModuleInst { .. } => {
            if let Some(Elaboration::Instance(decl)) = ast.decor.elabs.get(&root) {
                walk_deep(ast, *decl, f);
            }
        }
        Node::LoopGenerate { .. } => {
            if let Some(Elaboration::Blocks(blocks)) = ast.decor.elabs.get(&root) {
                for block in blocks.clone() {
                    walk_deep(ast, block, f);
                }
            }
        }
        _ => {}
    }
}
