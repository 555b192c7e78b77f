//! Value fan-out from writer engines to reader engines, keyed by variable id.
//!
//! The dataplane owns the per-id reader/writer registrations and the
//! last-written value buffer used for write deduplication. The kernel
//! performs the actual `read` calls on reader engines (it owns them); the
//! dataplane's job is to answer "did this write change anything, and who
//! cares".

use crate::ids::{EngineId, VId};
use cascade_common::Bits;

/// The dataplane: registration lists and dedup buffers indexed by [`VId`].
#[derive(Debug, Default)]
pub struct DataPlane {
    readers: Vec<Vec<EngineId>>,
    writers: Vec<Vec<EngineId>>,
    buffers: Vec<Option<Bits>>,
}

impl DataPlane {
    /// Creates an empty dataplane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures the tables cover `id`.
    pub fn register_id(&mut self, id: VId) {
        let n = id.0 as usize + 1;
        if n > self.readers.len() {
            self.readers.resize(n, Vec::new());
            self.writers.resize(n, Vec::new());
            self.buffers.resize(n, None);
        }
    }

    /// Registers an engine as a reader of `id`. Idempotent.
    pub fn register_reader(&mut self, engine: EngineId, id: VId) {
        self.register_id(id);
        let list = &mut self.readers[id.0 as usize];
        if !list.contains(&engine) {
            list.push(engine);
        }
    }

    /// Unregisters a reader. Tolerates missing entries.
    pub fn unregister_reader(&mut self, engine: EngineId, id: VId) {
        if let Some(list) = self.readers.get_mut(id.0 as usize) {
            list.retain(|&e| e != engine);
        }
    }

    /// Registers an engine as a writer of `id`. Idempotent.
    pub fn register_writer(&mut self, engine: EngineId, id: VId) {
        self.register_id(id);
        let list = &mut self.writers[id.0 as usize];
        if !list.contains(&engine) {
            list.push(engine);
        }
    }

    /// Unregisters a writer. Tolerates missing entries.
    pub fn unregister_writer(&mut self, engine: EngineId, id: VId) {
        if let Some(list) = self.writers.get_mut(id.0 as usize) {
            list.retain(|&e| e != engine);
        }
    }

    /// Removes an engine from every registration list.
    pub fn deregister_engine(&mut self, engine: EngineId) {
        for list in self.readers.iter_mut().chain(self.writers.iter_mut()) {
            list.retain(|&e| e != engine);
        }
    }

    /// The readers of `id`.
    pub fn readers(&self, id: VId) -> &[EngineId] {
        self.readers
            .get(id.0 as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// The writers of `id`.
    pub fn writers(&self, id: VId) -> &[EngineId] {
        self.writers
            .get(id.0 as usize)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Applies a write to the dedup buffer. Returns `true` if the value
    /// changed and must be delivered to the readers; a repeated equal value
    /// is suppressed.
    pub fn buffer_bits(&mut self, id: VId, bits: &Bits) -> bool {
        self.register_id(id);
        let slot = &mut self.buffers[id.0 as usize];
        match slot {
            Some(cur) if cur == bits => false,
            _ => {
                *slot = Some(bits.clone());
                true
            }
        }
    }

    /// The single-bit fast path: flips the low bit of the buffer when the
    /// boolean differs from the buffered value.
    pub fn buffer_bool(&mut self, id: VId, val: bool) -> bool {
        self.register_id(id);
        let slot = &mut self.buffers[id.0 as usize];
        match slot {
            Some(cur) => {
                if cur.to_bool() == val {
                    false
                } else {
                    cur.flip(0);
                    true
                }
            }
            None => {
                *slot = Some(Bits::from_bool(val));
                true
            }
        }
    }

    /// The buffered value of `id`, if anything has been written.
    pub fn buffered(&self, id: VId) -> Option<&Bits> {
        self.buffers.get(id.0 as usize).and_then(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_delivers() {
        let mut dp = DataPlane::new();
        assert!(dp.buffer_bits(VId(3), &Bits::new(4, 5)));
        assert_eq!(dp.buffered(VId(3)), Some(&Bits::new(4, 5)));
    }

    #[test]
    fn equal_write_is_suppressed() {
        let mut dp = DataPlane::new();
        assert!(dp.buffer_bits(VId(1), &Bits::new(4, 5)));
        assert!(!dp.buffer_bits(VId(1), &Bits::new(4, 5)));
        assert!(dp.buffer_bits(VId(1), &Bits::new(4, 6)));
    }

    #[test]
    fn bool_fast_path_flips_low_bit() {
        let mut dp = DataPlane::new();
        assert!(dp.buffer_bool(VId(1), true));
        assert!(!dp.buffer_bool(VId(1), true));
        assert!(dp.buffer_bool(VId(1), false));
        assert_eq!(dp.buffered(VId(1)).unwrap().to_u64(), 0);
    }

    #[test]
    fn reader_registration_is_idempotent() {
        let mut dp = DataPlane::new();
        dp.register_reader(EngineId(0), VId(2));
        dp.register_reader(EngineId(0), VId(2));
        dp.register_reader(EngineId(1), VId(2));
        assert_eq!(dp.readers(VId(2)), &[EngineId(0), EngineId(1)]);
    }

    #[test]
    fn unregister_tolerates_missing() {
        let mut dp = DataPlane::new();
        dp.unregister_reader(EngineId(5), VId(9));
        dp.register_writer(EngineId(2), VId(1));
        dp.unregister_writer(EngineId(2), VId(1));
        assert!(dp.writers(VId(1)).is_empty());
    }

    #[test]
    fn deregister_engine_clears_everywhere() {
        let mut dp = DataPlane::new();
        dp.register_reader(EngineId(0), VId(1));
        dp.register_reader(EngineId(0), VId(2));
        dp.register_writer(EngineId(0), VId(3));
        dp.deregister_engine(EngineId(0));
        assert!(dp.readers(VId(1)).is_empty());
        assert!(dp.readers(VId(2)).is_empty());
        assert!(dp.writers(VId(3)).is_empty());
    }
}
