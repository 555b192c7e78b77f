//! Insertion-ordered maps with checkpoint/undo.
//!
//! The program's declaration and elaboration tables both need rollback: an
//! eval transaction that fails type checking must drop every entry it
//! added. A checkpoint is just the insertion count; undoing truncates the
//! insertion log and removes the dropped keys.

use std::collections::HashMap;
use std::hash::Hash;

/// An insertion-ordered map supporting checkpoint/undo.
#[derive(Debug, Clone)]
pub struct CheckpointMap<K: Eq + Hash + Clone, V: Clone> {
    map: HashMap<K, V>,
    order: Vec<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> CheckpointMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Inserts a new entry. Returns `false` (without inserting) if the key
    /// is already present.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key.clone(), value);
        self.order.push(key);
        true
    }

    /// Looks up a key.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    /// Returns `true` if the key is present.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// The first-inserted key, if any.
    pub fn first(&self) -> Option<&K> {
        self.order.first()
    }

    /// The number of entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.order.iter().map(move |k| (k, &self.map[k]))
    }

    /// A borrowed view of the underlying hash map.
    pub fn map(&self) -> &HashMap<K, V> {
        &self.map
    }

    /// Takes a checkpoint of the current insertion count.
    pub fn checkpoint(&self) -> usize {
        self.order.len()
    }

    /// Removes every entry inserted after the checkpoint.
    pub fn undo(&mut self, checkpoint: usize) {
        while self.order.len() > checkpoint {
            let key = self.order.pop().expect("non-empty past checkpoint");
            self.map.remove(&key);
        }
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for CheckpointMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut m = CheckpointMap::new();
        assert!(m.insert("a", 1));
        assert_eq!(m.get(&"a"), Some(&1));
        assert!(!m.insert("a", 2));
        assert_eq!(m.get(&"a"), Some(&1));
    }

    #[test]
    fn preserves_insertion_order() {
        let mut m = CheckpointMap::new();
        m.insert("b", 2);
        m.insert("a", 1);
        m.insert("c", 3);
        let keys: Vec<_> = m.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(m.first(), Some(&"b"));
    }

    #[test]
    fn undo_drops_entries_after_checkpoint() {
        let mut m = CheckpointMap::new();
        m.insert("keep", 1);
        let cp = m.checkpoint();
        m.insert("drop1", 2);
        m.insert("drop2", 3);
        m.undo(cp);
        assert_eq!(m.len(), 1);
        assert!(m.contains(&"keep"));
        assert!(!m.contains(&"drop1"));
        assert!(!m.contains(&"drop2"));
    }

    #[test]
    fn undo_to_zero_empties() {
        let mut m = CheckpointMap::new();
        m.insert("x", 1);
        m.undo(0);
        assert!(m.is_empty());
    }
}
