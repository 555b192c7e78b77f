//! The software clock core.
//!
//! A clock has no inputs and one single-bit output. It raises an update at
//! the end of every logical step; servicing the update toggles the output
//! and writes it into the dataplane, which is what drives edge-triggered
//! logic forward one step at a time.

use cascade_common::Bits;
use cascade_runtime::{Core, Interface, VarMap, VId};
use std::sync::Arc;

/// The toggling clock core.
pub struct SwClock {
    interface: Arc<dyn Interface>,
    vid: VId,
    val: bool,
    updates: bool,
}

impl SwClock {
    /// Creates a clock driving the given output id, starting low with an
    /// update pending so the first step produces a rising edge.
    pub fn new(interface: Arc<dyn Interface>, vid: VId) -> Self {
        Self {
            interface,
            vid,
            val: false,
            updates: true,
        }
    }
}

impl Core for SwClock {
    fn get_state(&self) -> VarMap {
        let mut m = VarMap::new();
        m.insert(self.vid, Bits::from_bool(self.val));
        m
    }

    fn set_state(&mut self, state: &VarMap) {
        if let Some(v) = state.get(&self.vid) {
            self.val = v.to_bool();
        }
    }

    fn get_input(&self) -> VarMap {
        VarMap::new()
    }

    fn set_input(&mut self, _input: &VarMap) {}

    fn read(&mut self, _id: VId, _bits: &Bits) {}

    fn evaluate(&mut self) {}

    fn there_are_updates(&self) -> bool {
        self.updates
    }

    fn update(&mut self) {
        self.val = !self.val;
        self.interface.write_bool(self.vid, self.val);
        self.updates = false;
    }

    fn there_were_tasks(&self) -> bool {
        false
    }

    fn overrides_done_step(&self) -> bool {
        true
    }

    fn done_step(&mut self) {
        self.updates = true;
    }

    fn is_clock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_runtime::StubInterface;

    #[test]
    fn toggles_on_update_and_rearms_on_done_step() {
        let mut clk = SwClock::new(Arc::new(StubInterface), VId(1));
        assert!(clk.there_are_updates());
        clk.update();
        assert!(clk.get_state()[&VId(1)].to_bool());
        assert!(!clk.there_are_updates());
        clk.done_step();
        assert!(clk.there_are_updates());
        clk.update();
        assert!(!clk.get_state()[&VId(1)].to_bool());
    }

    #[test]
    fn state_roundtrip() {
        let mut clk = SwClock::new(Arc::new(StubInterface), VId(3));
        let mut s = VarMap::new();
        s.insert(VId(3), Bits::from_bool(true));
        clk.set_state(&s);
        assert_eq!(clk.get_state(), s);
    }
}
