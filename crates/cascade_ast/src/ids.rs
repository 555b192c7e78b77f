//! Opaque node handles.

use crate::arena::ArenaId;
use serde::{Deserialize, Serialize};

/// Opaque, copyable handle for a node in an [`Ast`](crate::Ast) arena.
///
/// Handles are stable for the lifetime of the arena; parent links, scope
/// records, resolutions, and all other decorations are keyed by `NodeId`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a handle from a raw `u32` index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

impl ArenaId for NodeId {
    fn from_raw(index: u32) -> Self {
        Self(index)
    }

    fn as_raw(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn roundtrip() {
        let id = NodeId::from_raw(17);
        assert_eq!(id.as_raw(), 17);
    }

    #[test]
    fn hash_in_set() {
        let mut set = HashSet::new();
        set.insert(NodeId::from_raw(1));
        set.insert(NodeId::from_raw(1));
        set.insert(NodeId::from_raw(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ordered() {
        assert!(NodeId::from_raw(1) < NodeId::from_raw(2));
    }
}
