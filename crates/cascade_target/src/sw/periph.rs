//! Software peripheral cores: led, gpio, pad, and reset.
//!
//! The input peripherals (led, gpio) latch the value driven at them and
//! report changes on the info stream. The output peripherals (pad, reset)
//! hold a value the user can poke through `set_state`; pokes propagate into
//! the dataplane on the next update phase.

use cascade_common::Bits;
use cascade_runtime::{Core, Interface, VarMap, VId};
use std::sync::Arc;

/// An input latch peripheral (`led`, `gpio`).
pub struct SwInputPeripheral {
    interface: Arc<dyn Interface>,
    label: &'static str,
    vid: VId,
    val: Bits,
}

impl SwInputPeripheral {
    /// Creates a latch of the given width.
    pub fn new(interface: Arc<dyn Interface>, label: &'static str, vid: VId, width: u32) -> Self {
        Self {
            interface,
            label,
            vid,
            val: Bits::zero(width),
        }
    }
}

impl Core for SwInputPeripheral {
    fn get_state(&self) -> VarMap {
        VarMap::new()
    }

    fn set_state(&mut self, _state: &VarMap) {}

    fn get_input(&self) -> VarMap {
        let mut m = VarMap::new();
        m.insert(self.vid, self.val.clone());
        m
    }

    fn set_input(&mut self, input: &VarMap) {
        if let Some(v) = input.get(&self.vid) {
            self.val = v.resize(self.val.width());
        }
    }

    fn read(&mut self, _id: VId, bits: &Bits) {
        self.val = bits.resize(self.val.width());
    }

    fn evaluate(&mut self) {
        let rendered = self
            .val
            .format_radix(2)
            .unwrap_or_default();
        self.interface
            .info(&format!("{}: {rendered}", self.label));
    }

    fn there_are_updates(&self) -> bool {
        false
    }

    fn update(&mut self) {}

    fn there_were_tasks(&self) -> bool {
        false
    }
}

/// An output peripheral (`pad`, `reset`).
pub struct SwOutputPeripheral {
    interface: Arc<dyn Interface>,
    vid: VId,
    val: Bits,
    updates: bool,
}

impl SwOutputPeripheral {
    /// Creates an output source of the given width, initially zero. The
    /// first update phase publishes the initial value.
    pub fn new(interface: Arc<dyn Interface>, vid: VId, width: u32) -> Self {
        Self {
            interface,
            vid,
            val: Bits::zero(width),
            updates: true,
        }
    }
}

impl Core for SwOutputPeripheral {
    fn get_state(&self) -> VarMap {
        let mut m = VarMap::new();
        m.insert(self.vid, self.val.clone());
        m
    }

    fn set_state(&mut self, state: &VarMap) {
        if let Some(v) = state.get(&self.vid) {
            self.val = v.resize(self.val.width());
            self.updates = true;
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
        self.interface.write_bits(self.vid, &self.val);
        self.updates = false;
    }

    fn there_were_tasks(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_runtime::StubInterface;

    #[test]
    fn input_peripheral_latches() {
        let mut led = SwInputPeripheral::new(Arc::new(StubInterface), "led", VId(1), 8);
        led.read(VId(1), &Bits::new(8, 0xA5));
        assert_eq!(led.get_input()[&VId(1)].to_u64(), 0xA5);
    }

    #[test]
    fn output_peripheral_propagates_pokes() {
        let mut pad = SwOutputPeripheral::new(Arc::new(StubInterface), VId(2), 4);
        pad.update();
        assert!(!pad.there_are_updates());
        let mut s = VarMap::new();
        s.insert(VId(2), Bits::new(4, 0x3));
        pad.set_state(&s);
        assert!(pad.there_are_updates());
        pad.update();
        assert_eq!(pad.get_state()[&VId(2)].to_u64(), 0x3);
    }
}
