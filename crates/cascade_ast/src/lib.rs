//! Arena-backed typed AST with lazy per-node decorations.
//!
//! Nodes live in an append-only arena and refer to each other by [`NodeId`]
//! handle. Parent links, spans, and the analysis caches (scopes, name
//! resolutions, use sites, elaboration memos, module summaries) are side
//! tables keyed by handle, so incremental edits invalidate by dropping
//! entries rather than touching nodes.

#![warn(missing_docs)]

pub mod arena;
pub mod ast;
pub mod decor;
pub mod ids;
pub mod node;
pub mod print;

pub use arena::{Arena, ArenaId};
pub use ast::Ast;
pub use decor::{Decorations, Elaboration, InlineMemo, ModuleInfo, Scope};
pub use ids::NodeId;
pub use node::{Attr, BinaryOp, CaseKind, Edge, IdPart, Node, PortDir, UnaryOp};
pub use print::emit;
