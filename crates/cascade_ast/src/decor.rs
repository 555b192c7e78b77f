//! Lazy per-node decorations: scopes, resolutions, use sites, elaborations,
//! and module summaries.
//!
//! Decorations are side tables keyed by [`NodeId`] rather than fields on the
//! nodes themselves. A missing entry means "not yet computed"; invalidation
//! is removal. The [`Scope`] record additionally carries a monotonically
//! advancing `next_item` index so that items appended to a scope after its
//! first indexing are picked up incrementally on the next query.

use crate::ids::NodeId;
use cascade_common::Ident;
use std::collections::{BTreeSet, HashMap};

/// The cached name index of one scope boundary.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    /// How many of the scope's items have been indexed so far. Queries
    /// advance this to the current item count before answering.
    pub next_item: usize,
    /// Declarations by name. The second slot records an arbitrary other
    /// declaration with the same name, for duplicate detection.
    pub names: HashMap<Ident, (NodeId, Option<NodeId>)>,
    /// Nested scopes by name. Loop-generate iterations share a name and
    /// differ in the constant selector.
    pub children: HashMap<Ident, Vec<(Option<i64>, NodeId)>>,
}

/// The memoized result of elaborating a construct.
#[derive(Debug, Clone)]
pub enum Elaboration {
    /// A `ModuleInst` elaborated to a parameter-substituted declaration clone.
    Instance(NodeId),
    /// An if/case generate elaborated to its chosen block, or to nothing.
    Block(Option<NodeId>),
    /// A loop generate elaborated to one block per iteration.
    Blocks(Vec<NodeId>),
}

/// The I/O and connectivity summary of one elaborated module declaration.
#[derive(Debug, Default, Clone)]
pub struct ModuleInfo {
    /// Declarations local to this module.
    pub locals: BTreeSet<NodeId>,
    /// Input port declarations.
    pub inputs: BTreeSet<NodeId>,
    /// Output port declarations.
    pub outputs: BTreeSet<NodeId>,
    /// Variables that hold state across logical steps: nonblocking targets,
    /// `$get` targets, and `$fopen` results.
    pub stateful: BTreeSet<NodeId>,
    /// Variables initialized by `$fopen`.
    pub streams: BTreeSet<NodeId>,
    /// Declarations outside this module that it references.
    pub externals: BTreeSet<NodeId>,
    /// Variables read by this module (local and external).
    pub reads: BTreeSet<NodeId>,
    /// Variables written by this module (local and hierarchical).
    pub writes: BTreeSet<NodeId>,
    /// Child instantiation items, in declaration order.
    pub children: Vec<NodeId>,
    /// Parameter declarations in order.
    pub ordered_params: Vec<NodeId>,
    /// Parameter declarations by name.
    pub named_params: HashMap<Ident, NodeId>,
    /// Port declarations in header order.
    pub ordered_ports: Vec<NodeId>,
    /// Port declarations by name.
    pub named_ports: HashMap<Ident, NodeId>,
    /// Per-child connection map: instantiation item to pairs of (child port
    /// declaration, bound caller-side expression).
    pub connections: HashMap<NodeId, Vec<(NodeId, NodeId)>>,
}

/// Bookkeeping for one inlined instantiation, kept so the transformation
/// can be reversed structurally.
#[derive(Debug, Clone, Copy)]
pub struct InlineMemo {
    /// The original instantiation item (unlinked while inlined).
    pub inst: NodeId,
    /// The child's elaborated declaration (gutted while inlined).
    pub child: NodeId,
    /// How many connection assignments trail the moved child items.
    pub conns: usize,
}

/// The full decoration store of an [`Ast`](crate::Ast).
#[derive(Debug, Default)]
pub struct Decorations {
    /// Scope records for boundary nodes.
    pub scopes: HashMap<NodeId, Scope>,
    /// Memoized identifier resolutions. A declaration resolves to itself.
    pub resolutions: HashMap<NodeId, NodeId>,
    /// Use-site lists: declaration to every identifier occurrence that
    /// resolves to it, populated by a single global pass.
    pub uses: HashMap<NodeId, Vec<NodeId>>,
    /// Whether the use-site tables reflect the current program.
    pub uses_valid: bool,
    /// Memoized elaboration results.
    pub elabs: HashMap<NodeId, Elaboration>,
    /// Memoized module summaries.
    pub infos: HashMap<NodeId, ModuleInfo>,
    /// Active inline transformations, keyed by the replacing if-generate.
    pub inlines: HashMap<NodeId, InlineMemo>,
}

impl Decorations {
    /// Drops every cache that depends on name binding: resolutions, use
    /// sites, and module summaries. Scope records survive because their
    /// `next_item` counter absorbs appends; removals must call
    /// [`invalidate_scope`](Self::invalidate_scope) as well.
    pub fn invalidate_bindings(&mut self) {
        self.resolutions.clear();
        self.uses.clear();
        self.uses_valid = false;
        self.infos.clear();
    }

    /// Drops the scope record of `node` (forcing a full re-index on the next
    /// query) along with every binding-dependent cache.
    pub fn invalidate_scope(&mut self, node: NodeId) {
        self.scopes.remove(&node);
        self.invalidate_bindings();
    }
}
