//! The engine layer: a per-instance pairing of a compute core with a
//! side-effect interface.
//!
//! A [`Core`] computes outputs from inputs and state; an [`Interface`]
//! routes output writes and system tasks back to the runtime. The
//! [`Engine`] pair carries the `there_are_reads` bit the scheduler polls,
//! and supports the state-transferring [`replace_with`](Engine::replace_with)
//! swap the JIT uses to install faster backends without perturbing the
//! simulation.

use crate::ids::{SId, VId};
use crate::state::VarMap;
use cascade_common::Bits;
use std::sync::Arc;

/// The computation half of an engine.
///
/// Methods are invoked only from the runtime thread; `read` must be cheap
/// and perform no computation.
pub trait Core: Send {
    /// Snapshots the stateful variables by id.
    fn get_state(&self) -> VarMap;
    /// Restores stateful variables from a snapshot; unknown ids are ignored.
    fn set_state(&mut self, state: &VarMap);
    /// Snapshots the current input values by id.
    fn get_input(&self) -> VarMap;
    /// Restores input values from a snapshot; unknown ids are ignored.
    fn set_input(&mut self, input: &VarMap);
    /// Called once after `set_state`/`set_input` during engine replacement.
    fn resync(&mut self) {}
    /// Delivers a new value on an input.
    fn read(&mut self, id: VId, bits: &Bits);
    /// Propagates inputs to outputs, emitting writes and combinational
    /// system tasks through the interface.
    fn evaluate(&mut self);
    /// Whether nonblocking assignments are pending.
    fn there_are_updates(&self) -> bool;
    /// Services pending nonblocking assignments.
    fn update(&mut self);
    /// Whether the most recent `evaluate` or `update` produced system-task
    /// side effects.
    fn there_were_tasks(&self) -> bool;
    /// `if there_are_updates then update; true else false`. Remote cores
    /// override this with a single round trip.
    fn conditional_update(&mut self) -> bool {
        if self.there_are_updates() {
            self.update();
            true
        } else {
            false
        }
    }
    /// Whether this core participates in end-of-step processing.
    fn overrides_done_step(&self) -> bool {
        false
    }
    /// End-of-step hook; clocks flip their output here.
    fn done_step(&mut self) {}
    /// Whether this core participates in end-of-simulation processing.
    fn overrides_done_simulation(&self) -> bool {
        false
    }
    /// End-of-simulation hook.
    fn done_simulation(&mut self) {}
    /// The open-loop fast path: toggle `clk` internally for up to `itrs`
    /// iterations or until a system task fires; returns iterations consumed.
    /// Only fully inlined cores whose sole input is the clock override this.
    fn open_loop(&mut self, clk: VId, val: bool, itrs: u64) -> u64 {
        let _ = (clk, val, itrs);
        0
    }
    /// Whether this is a clock core.
    fn is_clock(&self) -> bool {
        false
    }
    /// Whether this is a logic core eligible for the open-loop fast path.
    fn is_logic(&self) -> bool {
        false
    }
    /// Whether this is the degenerate stub core.
    fn is_stub(&self) -> bool {
        false
    }
}

/// The reverse channel from a core back to the runtime.
///
/// Interfaces are shared (`Arc`) between the engine and its core and are
/// internally synchronized; all calls happen on the runtime thread except
/// none — backends never call interfaces from compile threads.
pub trait Interface: Send + Sync {
    /// Writes a value into the dataplane.
    fn write_bits(&self, id: VId, bits: &Bits);
    /// Single-bit dataplane write.
    fn write_bool(&self, id: VId, val: bool);
    /// `$display`: text plus newline, between this and the next step.
    fn display(&self, text: &str);
    /// `$write`: text without newline.
    fn write_text(&self, text: &str);
    /// `$finish`.
    fn finish(&self, code: u32);
    /// `$error`.
    fn error(&self, text: &str);
    /// `$warning`.
    fn warning(&self, text: &str);
    /// `$info`.
    fn info(&self, text: &str);
    /// `$restart`.
    fn restart(&self, path: &str);
    /// `$retarget`.
    fn retarget(&self, target: &str);
    /// `$save`.
    fn save(&self, path: &str);
    /// Opens (or creates) a file stream; returns its id.
    fn fopen(&self, path: &str) -> SId;
    /// Reads and consumes one byte; -1 at end of stream.
    fn sbumpc(&self, id: SId) -> i32;
    /// Reads without consuming one byte; -1 at end of stream.
    fn sgetc(&self, id: SId) -> i32;
    /// Reads up to `n` bytes.
    fn sgetn(&self, id: SId, n: usize) -> Vec<u8>;
    /// Writes one byte.
    fn sputc(&self, id: SId, c: u8);
    /// Writes a byte run.
    fn sputn(&self, id: SId, data: &[u8]);
    /// Moves the read (`read = true`) or write pointer by an offset; returns
    /// the new position or -1.
    fn pubseekoff(&self, id: SId, off: i64, read: bool) -> i64;
    /// Moves the read or write pointer to an absolute position.
    fn pubseekpos(&self, id: SId, pos: i64, read: bool) -> i64;
    /// Flushes the stream; returns 0 on success, -1 otherwise.
    fn pubsync(&self, id: SId) -> i32;
    /// An estimate of the bytes remaining before end of stream; -1 at end.
    fn in_avail(&self, id: SId) -> i64;
}

/// The no-op interface used by stub engines.
pub struct StubInterface;

impl Interface for StubInterface {
    fn write_bits(&self, _id: VId, _bits: &Bits) {}
    fn write_bool(&self, _id: VId, _val: bool) {}
    fn display(&self, _text: &str) {}
    fn write_text(&self, _text: &str) {}
    fn finish(&self, _code: u32) {}
    fn error(&self, _text: &str) {}
    fn warning(&self, _text: &str) {}
    fn info(&self, _text: &str) {}
    fn restart(&self, _path: &str) {}
    fn retarget(&self, _target: &str) {}
    fn save(&self, _path: &str) {}
    fn fopen(&self, _path: &str) -> SId {
        SId(0)
    }
    fn sbumpc(&self, _id: SId) -> i32 {
        -1
    }
    fn sgetc(&self, _id: SId) -> i32 {
        -1
    }
    fn sgetn(&self, _id: SId, _n: usize) -> Vec<u8> {
        Vec::new()
    }
    fn sputc(&self, _id: SId, _c: u8) {}
    fn sputn(&self, _id: SId, _data: &[u8]) {}
    fn pubseekoff(&self, _id: SId, _off: i64, _read: bool) -> i64 {
        -1
    }
    fn pubseekpos(&self, _id: SId, _pos: i64, _read: bool) -> i64 {
        -1
    }
    fn pubsync(&self, _id: SId) -> i32 {
        -1
    }
    fn in_avail(&self, _id: SId) -> i64 {
        -1
    }
}

/// The degenerate core for modules with no I/O and no side effects.
pub struct StubCore;

impl Core for StubCore {
    fn get_state(&self) -> VarMap {
        VarMap::new()
    }
    fn set_state(&mut self, _state: &VarMap) {}
    fn get_input(&self) -> VarMap {
        VarMap::new()
    }
    fn set_input(&mut self, _input: &VarMap) {}
    fn read(&mut self, _id: VId, _bits: &Bits) {}
    fn evaluate(&mut self) {}
    fn there_are_updates(&self) -> bool {
        false
    }
    fn update(&mut self) {}
    fn there_were_tasks(&self) -> bool {
        false
    }
    fn is_stub(&self) -> bool {
        true
    }
}

/// A per-instance execution object: core, interface, and the pending-reads
/// bit.
pub struct Engine {
    core: Box<dyn Core>,
    interface: Arc<dyn Interface>,
    there_are_reads: bool,
}

impl Engine {
    /// Creates an engine from a compiled core and its interface.
    pub fn new(core: Box<dyn Core>, interface: Arc<dyn Interface>) -> Self {
        Self {
            core,
            interface,
            there_are_reads: false,
        }
    }

    /// Creates a stub engine.
    pub fn stub() -> Self {
        Self::new(Box::new(StubCore), Arc::new(StubInterface))
    }

    /// The engine's interface handle.
    pub fn interface(&self) -> &Arc<dyn Interface> {
        &self.interface
    }

    /// Whether this engine wraps a clock core.
    pub fn is_clock(&self) -> bool {
        self.core.is_clock()
    }

    /// Whether this engine wraps an open-loop-capable logic core.
    pub fn is_logic(&self) -> bool {
        self.core.is_logic()
    }

    /// Whether this engine is a stub.
    pub fn is_stub(&self) -> bool {
        self.core.is_stub()
    }

    /// Whether inputs were delivered since the last evaluate/update.
    pub fn there_are_reads(&self) -> bool {
        self.there_are_reads
    }

    /// Whether the core has pending nonblocking updates.
    pub fn there_are_updates(&self) -> bool {
        self.core.there_are_updates()
    }

    /// Whether the core's last evaluate/update ran system tasks.
    pub fn there_were_tasks(&self) -> bool {
        self.core.there_were_tasks()
    }

    /// Delivers an input value; sets the pending-reads bit.
    pub fn read(&mut self, id: VId, bits: &Bits) {
        self.core.read(id, bits);
        self.there_are_reads = true;
    }

    /// Evaluates the core and clears the pending-reads bit.
    pub fn evaluate(&mut self) {
        self.core.evaluate();
        self.there_are_reads = false;
    }

    /// Evaluates only if reads are pending. Returns whether it evaluated.
    pub fn conditional_evaluate(&mut self) -> bool {
        if self.there_are_reads {
            self.evaluate();
            true
        } else {
            false
        }
    }

    /// Services pending updates; update handlers may consume fresh inputs,
    /// so the pending-reads bit clears here as well.
    pub fn update(&mut self) {
        self.core.update();
        self.there_are_reads = false;
    }

    /// Updates only if updates are pending. Returns whether it updated.
    pub fn conditional_update(&mut self) -> bool {
        let updated = self.core.conditional_update();
        if updated {
            self.there_are_reads = false;
        }
        updated
    }

    /// Whether the core participates in end-of-step processing.
    pub fn overrides_done_step(&self) -> bool {
        self.core.overrides_done_step()
    }

    /// Runs the end-of-step hook.
    pub fn done_step(&mut self) {
        self.core.done_step();
    }

    /// Whether the core participates in end-of-simulation processing.
    pub fn overrides_done_simulation(&self) -> bool {
        self.core.overrides_done_simulation()
    }

    /// Runs the end-of-simulation hook.
    pub fn done_simulation(&mut self) {
        self.core.done_simulation();
    }

    /// Runs the open-loop fast path.
    pub fn open_loop(&mut self, clk: VId, val: bool, itrs: u64) -> u64 {
        self.core.open_loop(clk, val, itrs)
    }

    /// Snapshots state.
    pub fn get_state(&self) -> VarMap {
        self.core.get_state()
    }

    /// Restores state.
    pub fn set_state(&mut self, state: &VarMap) {
        self.core.set_state(state);
    }

    /// Snapshots inputs.
    pub fn get_input(&self) -> VarMap {
        self.core.get_input()
    }

    /// Restores inputs.
    pub fn set_input(&mut self, input: &VarMap) {
        self.core.set_input(input);
    }

    /// Resynchronizes after a state/input restore.
    pub fn resync(&mut self) {
        self.core.resync();
    }

    /// Reads a single-bit state variable (the open-loop scheduler's view of
    /// the clock).
    pub fn get_bit(&self, id: VId) -> bool {
        self.get_state().get(&id).map(|b| b.to_bool()).unwrap_or(false)
    }

    /// Writes a single-bit state variable.
    pub fn set_bit(&mut self, id: VId, val: bool) {
        let mut s = VarMap::new();
        s.insert(id, Bits::from_bool(val));
        self.set_state(&s);
    }

    /// Atomically adopts a newly compiled engine: live state and inputs are
    /// copied into the new core, it is resynced, and then it replaces the
    /// old core and interface in place. The caller guarantees no simulation
    /// step interleaves (the swap runs as a state-safe interrupt).
    pub fn replace_with(&mut self, mut new: Engine) {
        let state = self.core.get_state();
        new.core.set_state(&state);
        let input = self.core.get_input();
        new.core.set_input(&input);
        new.core.resync();
        self.core = new.core;
        self.interface = new.interface;
        self.there_are_reads = new.there_are_reads;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A toy core that latches one input and counts evaluations.
    struct Latch {
        val: Bits,
        evals: u32,
        pending: bool,
    }

    impl Core for Latch {
        fn get_state(&self) -> VarMap {
            let mut m = VarMap::new();
            m.insert(VId(1), self.val.clone());
            m
        }
        fn set_state(&mut self, state: &VarMap) {
            if let Some(v) = state.get(&VId(1)) {
                self.val = v.clone();
            }
        }
        fn get_input(&self) -> VarMap {
            VarMap::new()
        }
        fn set_input(&mut self, _input: &VarMap) {}
        fn read(&mut self, _id: VId, bits: &Bits) {
            self.val = bits.clone();
        }
        fn evaluate(&mut self) {
            self.evals += 1;
        }
        fn there_are_updates(&self) -> bool {
            self.pending
        }
        fn update(&mut self) {
            self.pending = false;
        }
        fn there_were_tasks(&self) -> bool {
            false
        }
    }

    fn latch(pending: bool) -> Engine {
        Engine::new(
            Box::new(Latch {
                val: Bits::new(4, 0),
                evals: 0,
                pending,
            }),
            Arc::new(StubInterface),
        )
    }

    #[test]
    fn read_raises_and_evaluate_clears() {
        let mut e = latch(false);
        assert!(!e.there_are_reads());
        e.read(VId(1), &Bits::new(4, 9));
        assert!(e.there_are_reads());
        assert!(e.conditional_evaluate());
        assert!(!e.there_are_reads());
        assert!(!e.conditional_evaluate());
    }

    #[test]
    fn conditional_update_consumes_pending() {
        let mut e = latch(true);
        assert!(e.conditional_update());
        assert!(!e.conditional_update());
    }

    #[test]
    fn replace_with_preserves_state() {
        let mut live = latch(false);
        live.read(VId(1), &Bits::new(4, 0xC));
        let replacement = latch(false);
        live.replace_with(replacement);
        assert_eq!(live.get_state().get(&VId(1)), Some(&Bits::new(4, 0xC)));
        // The pending-reads bit came from the replacement engine.
        assert!(!live.there_are_reads());
    }

    #[test]
    fn get_and_set_bit() {
        let mut e = latch(false);
        e.set_bit(VId(1), true);
        assert!(e.get_bit(VId(1)));
        assert!(!e.get_bit(VId(99)));
    }

    #[test]
    fn stub_engine_is_inert() {
        let mut e = Engine::stub();
        assert!(e.is_stub());
        assert!(!e.there_are_updates());
        e.evaluate();
        assert!(e.get_state().is_empty());
    }
}
