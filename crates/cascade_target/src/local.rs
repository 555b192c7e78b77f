//! The local interface: routes core side effects into the runtime that
//! owns the engine.
//!
//! Dataplane writes go into the handle's synchronous write buffer (the
//! kernel flushes it after the emitting engine call returns); system tasks
//! become state-safe interrupts run between simulation steps; stream I/O is
//! serviced immediately against the handle's stream table.

use cascade_common::Bits;
use cascade_runtime::{DataWrite, Interface, RuntimeHandle, SId, VId};
use std::sync::Arc;

/// The interface given to every locally executing core.
pub struct LocalInterface {
    handle: Arc<RuntimeHandle>,
}

impl LocalInterface {
    /// Creates an interface bound to a runtime handle.
    pub fn new(handle: Arc<RuntimeHandle>) -> Self {
        Self { handle }
    }
}

impl Interface for LocalInterface {
    fn write_bits(&self, id: VId, bits: &Bits) {
        self.handle.push_write(DataWrite::Bits(id, bits.clone()));
    }

    fn write_bool(&self, id: VId, val: bool) {
        self.handle.push_write(DataWrite::Bool(id, val));
    }

    fn display(&self, text: &str) {
        let line = format!("{text}\n");
        let handle = Arc::clone(&self.handle);
        self.handle
            .schedule_interrupt(Box::new(move |_| handle.print_out(&line)));
    }

    fn write_text(&self, text: &str) {
        let text = text.to_string();
        let handle = Arc::clone(&self.handle);
        self.handle
            .schedule_interrupt(Box::new(move |_| handle.print_out(&text)));
    }

    fn finish(&self, code: u32) {
        self.handle
            .schedule_interrupt(Box::new(move |k| k.finish(code)));
    }

    fn error(&self, text: &str) {
        let line = format!("{text}\n");
        let handle = Arc::clone(&self.handle);
        self.handle
            .schedule_interrupt(Box::new(move |_| handle.print_err(&line)));
    }

    fn warning(&self, text: &str) {
        let line = format!("{text}\n");
        let handle = Arc::clone(&self.handle);
        self.handle
            .schedule_interrupt(Box::new(move |_| handle.print_warn(&line)));
    }

    fn info(&self, text: &str) {
        let line = format!("{text}\n");
        let handle = Arc::clone(&self.handle);
        self.handle
            .schedule_interrupt(Box::new(move |_| handle.print_info(&line)));
    }

    fn restart(&self, path: &str) {
        let path = path.to_string();
        self.handle
            .schedule_interrupt(Box::new(move |k| k.restart(&path)));
    }

    fn retarget(&self, target: &str) {
        let target = target.to_string();
        self.handle
            .schedule_interrupt(Box::new(move |k| k.retarget(&target)));
    }

    fn save(&self, path: &str) {
        let path = path.to_string();
        self.handle
            .schedule_interrupt(Box::new(move |k| k.save(&path)));
    }

    fn fopen(&self, path: &str) -> SId {
        self.handle.fopen(path)
    }

    fn sbumpc(&self, id: SId) -> i32 {
        self.handle.sbumpc(id)
    }

    fn sgetc(&self, id: SId) -> i32 {
        self.handle.sgetc(id)
    }

    fn sgetn(&self, id: SId, n: usize) -> Vec<u8> {
        self.handle.sgetn(id, n)
    }

    fn sputc(&self, id: SId, c: u8) {
        self.handle.sputc(id, c);
    }

    fn sputn(&self, id: SId, data: &[u8]) {
        self.handle.sputn(id, data);
    }

    fn pubseekoff(&self, id: SId, off: i64, read: bool) -> i64 {
        self.handle.pubseekoff(id, off, read)
    }

    fn pubseekpos(&self, id: SId, pos: i64, read: bool) -> i64 {
        self.handle.pubseekpos(id, pos, read)
    }

    fn pubsync(&self, id: SId) -> i32 {
        self.handle.pubsync(id)
    }

    fn in_avail(&self, id: SId) -> i64 {
        self.handle.in_avail(id)
    }
}
