//! The shared runtime handle: interrupt queue, buffered dataplane writes,
//! the stream table, logical time, and output stream bindings.
//!
//! The handle is the only object shared across threads. The REPL thread and
//! backend compile threads communicate with the runtime thread exclusively
//! by enqueueing interrupts here; engine interfaces buffer dataplane writes
//! here for the kernel to flush synchronously after each engine call.
//! Stream I/O is the exception: it is serviced immediately, regardless of
//! the simulation's execution state.

use crate::ids::SId;
use crate::kernel::Kernel;
use crate::state::DataWrite;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A thunk run between simulation steps on the runtime thread.
pub type Interrupt = Box<dyn FnOnce(&mut Kernel) + Send>;

/// The shared half of the runtime.
pub struct RuntimeHandle {
    interrupts: Mutex<VecDeque<Interrupt>>,
    interrupt_cv: Condvar,
    data_writes: Mutex<Vec<DataWrite>>,
    streams: Mutex<StreamTable>,
    logical_time: AtomicU64,
    stop_requested: AtomicBool,
    enable_info: AtomicBool,
    disable_warning: AtomicBool,
    disable_error: AtomicBool,
    stdout: Mutex<Box<dyn Write + Send>>,
    stderr: Mutex<Box<dyn Write + Send>>,
    stdwarn: Mutex<Box<dyn Write + Send>>,
    stdinfo: Mutex<Box<dyn Write + Send>>,
    stdlog: Mutex<Box<dyn Write + Send>>,
}

impl RuntimeHandle {
    /// Creates a handle with the process's standard streams bound.
    pub fn new() -> Self {
        Self {
            interrupts: Mutex::new(VecDeque::new()),
            interrupt_cv: Condvar::new(),
            data_writes: Mutex::new(Vec::new()),
            streams: Mutex::new(StreamTable::new()),
            logical_time: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            enable_info: AtomicBool::new(false),
            disable_warning: AtomicBool::new(false),
            disable_error: AtomicBool::new(false),
            stdout: Mutex::new(Box::new(io::stdout())),
            stderr: Mutex::new(Box::new(io::stderr())),
            stdwarn: Mutex::new(Box::new(io::stderr())),
            stdinfo: Mutex::new(Box::new(io::stderr())),
            stdlog: Mutex::new(Box::new(io::sink())),
        }
    }

    // ========================================================================
    // Interrupts
    // ========================================================================

    /// Enqueues an interrupt for the next inter-step drain.
    pub fn schedule_interrupt(&self, int: Interrupt) {
        let mut q = self.interrupts.lock().unwrap();
        q.push_back(int);
        self.interrupt_cv.notify_all();
    }

    /// Takes the currently queued interrupts. Handlers run without the lock
    /// held, so an interrupt scheduling further interrupts re-enters the
    /// queue and is picked up by the same drain loop.
    pub(crate) fn take_interrupts(&self) -> VecDeque<Interrupt> {
        std::mem::take(&mut *self.interrupts.lock().unwrap())
    }

    /// Whether interrupts are waiting.
    pub fn has_interrupts(&self) -> bool {
        !self.interrupts.lock().unwrap().is_empty()
    }

    /// Blocks until an interrupt arrives, a stop is requested, or the
    /// timeout elapses. Used when the simulation is idle.
    pub(crate) fn wait_for_interrupt(&self, timeout: Duration) {
        let q = self.interrupts.lock().unwrap();
        if q.is_empty() && !self.stop_requested() {
            let _ = self.interrupt_cv.wait_timeout(q, timeout);
        }
    }

    // ========================================================================
    // Dataplane write buffer
    // ========================================================================

    /// Buffers a dataplane write for the kernel to flush after the current
    /// engine call returns.
    pub fn push_write(&self, write: DataWrite) {
        self.data_writes.lock().unwrap().push(write);
    }

    /// Drains the buffered writes in order.
    pub(crate) fn take_writes(&self) -> Vec<DataWrite> {
        std::mem::take(&mut *self.data_writes.lock().unwrap())
    }

    // ========================================================================
    // Time and stop
    // ========================================================================

    /// The logical simulation time. Thread-safe.
    pub fn time(&self) -> u64 {
        self.logical_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_time(&self, t: u64) {
        self.logical_time.store(t, Ordering::Relaxed);
    }

    /// Requests a stop at the next step boundary. Idempotent.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.interrupt_cv.notify_all();
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Output streams and logging configuration
    // ========================================================================

    /// Rebinds standard output.
    pub fn set_stdout(&self, w: Box<dyn Write + Send>) {
        *self.stdout.lock().unwrap() = w;
    }

    /// Rebinds standard error.
    pub fn set_stderr(&self, w: Box<dyn Write + Send>) {
        *self.stderr.lock().unwrap() = w;
    }

    /// Rebinds the warning stream.
    pub fn set_stdwarn(&self, w: Box<dyn Write + Send>) {
        *self.stdwarn.lock().unwrap() = w;
    }

    /// Rebinds the info stream.
    pub fn set_stdinfo(&self, w: Box<dyn Write + Send>) {
        *self.stdinfo.lock().unwrap() = w;
    }

    /// Rebinds the log stream.
    pub fn set_stdlog(&self, w: Box<dyn Write + Send>) {
        *self.stdlog.lock().unwrap() = w;
    }

    /// Enables `$info` output (disabled by default).
    pub fn set_enable_info(&self, on: bool) {
        self.enable_info.store(on, Ordering::Relaxed);
    }

    /// Suppresses `$warning` output.
    pub fn set_disable_warning(&self, on: bool) {
        self.disable_warning.store(on, Ordering::Relaxed);
    }

    /// Suppresses `$error` output.
    pub fn set_disable_error(&self, on: bool) {
        self.disable_error.store(on, Ordering::Relaxed);
    }

    /// Writes to standard output.
    pub fn print_out(&self, text: &str) {
        let mut w = self.stdout.lock().unwrap();
        let _ = w.write_all(text.as_bytes());
        let _ = w.flush();
    }

    /// Writes to standard error unless errors are disabled.
    pub fn print_err(&self, text: &str) {
        if self.disable_error.load(Ordering::Relaxed) {
            return;
        }
        let mut w = self.stderr.lock().unwrap();
        let _ = w.write_all(text.as_bytes());
        let _ = w.flush();
    }

    /// Writes to the warning stream unless warnings are disabled.
    pub fn print_warn(&self, text: &str) {
        if self.disable_warning.load(Ordering::Relaxed) {
            return;
        }
        let mut w = self.stdwarn.lock().unwrap();
        let _ = w.write_all(text.as_bytes());
        let _ = w.flush();
    }

    /// Writes to the info stream when info output is enabled.
    pub fn print_info(&self, text: &str) {
        if !self.enable_info.load(Ordering::Relaxed) {
            return;
        }
        let mut w = self.stdinfo.lock().unwrap();
        let _ = w.write_all(text.as_bytes());
        let _ = w.flush();
    }

    /// Writes to the log stream.
    pub fn print_log(&self, text: &str) {
        let mut w = self.stdlog.lock().unwrap();
        let _ = w.write_all(text.as_bytes());
        let _ = w.flush();
    }

    // ========================================================================
    // Stream table
    // ========================================================================

    /// Opens (or creates) a file stream in read/write mode.
    pub fn fopen(&self, path: &str) -> SId {
        self.streams.lock().unwrap().open_file(path)
    }

    /// Registers an arbitrary reader as a stream.
    pub fn fopen_reader(&self, reader: Box<dyn Read + Send>) -> SId {
        self.streams.lock().unwrap().add_reader(reader)
    }

    /// Closes a stream. Does nothing for unknown ids.
    pub fn fclose(&self, id: SId) {
        self.streams.lock().unwrap().close(id);
    }

    /// See [`Interface::sbumpc`](crate::engine::Interface::sbumpc).
    pub fn sbumpc(&self, id: SId) -> i32 {
        self.streams.lock().unwrap().sbumpc(id)
    }

    /// See [`Interface::sgetc`](crate::engine::Interface::sgetc).
    pub fn sgetc(&self, id: SId) -> i32 {
        self.streams.lock().unwrap().sgetc(id)
    }

    /// See [`Interface::sgetn`](crate::engine::Interface::sgetn).
    pub fn sgetn(&self, id: SId, n: usize) -> Vec<u8> {
        self.streams.lock().unwrap().sgetn(id, n)
    }

    /// See [`Interface::sputc`](crate::engine::Interface::sputc).
    pub fn sputc(&self, id: SId, c: u8) {
        self.streams.lock().unwrap().sputn(id, &[c]);
    }

    /// See [`Interface::sputn`](crate::engine::Interface::sputn).
    pub fn sputn(&self, id: SId, data: &[u8]) {
        self.streams.lock().unwrap().sputn(id, data);
    }

    /// See [`Interface::pubseekoff`](crate::engine::Interface::pubseekoff).
    pub fn pubseekoff(&self, id: SId, off: i64, read: bool) -> i64 {
        self.streams.lock().unwrap().seekoff(id, off, read)
    }

    /// See [`Interface::pubseekpos`](crate::engine::Interface::pubseekpos).
    pub fn pubseekpos(&self, id: SId, pos: i64, read: bool) -> i64 {
        self.streams.lock().unwrap().seekpos(id, pos, read)
    }

    /// See [`Interface::pubsync`](crate::engine::Interface::pubsync).
    pub fn pubsync(&self, id: SId) -> i32 {
        self.streams.lock().unwrap().sync(id)
    }

    /// See [`Interface::in_avail`](crate::engine::Interface::in_avail).
    pub fn in_avail(&self, id: SId) -> i64 {
        self.streams.lock().unwrap().in_avail(id)
    }
}

impl Default for RuntimeHandle {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Stream table
// ============================================================================

enum StreamKind {
    File {
        file: std::fs::File,
        read_pos: u64,
        write_pos: u64,
    },
    Reader(Box<dyn Read + Send>),
}

struct StreamEntry {
    kind: StreamKind,
    peeked: Option<u8>,
}

/// The runtime's open streams. Stream ids are dense, starting at 1.
struct StreamTable {
    entries: Vec<Option<StreamEntry>>,
}

impl StreamTable {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add(&mut self, kind: StreamKind) -> SId {
        self.entries.push(Some(StreamEntry { kind, peeked: None }));
        SId(self.entries.len() as u32)
    }

    fn open_file(&mut self, path: &str) -> SId {
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
        {
            Ok(file) => {
                let write_pos = file.metadata().map(|m| m.len()).unwrap_or(0);
                self.add(StreamKind::File {
                    file,
                    read_pos: 0,
                    write_pos,
                })
            }
            Err(_) => SId(0),
        }
    }

    fn add_reader(&mut self, reader: Box<dyn Read + Send>) -> SId {
        self.add(StreamKind::Reader(reader))
    }

    fn close(&mut self, id: SId) {
        if id.0 >= 1 {
            if let Some(slot) = self.entries.get_mut(id.0 as usize - 1) {
                *slot = None;
            }
        }
    }

    fn entry(&mut self, id: SId) -> Option<&mut StreamEntry> {
        if id.0 == 0 {
            return None;
        }
        self.entries.get_mut(id.0 as usize - 1)?.as_mut()
    }

    fn read_byte(entry: &mut StreamEntry) -> Option<u8> {
        match &mut entry.kind {
            StreamKind::File {
                file, read_pos, ..
            } => {
                if file.seek(SeekFrom::Start(*read_pos)).is_err() {
                    return None;
                }
                let mut b = [0u8; 1];
                match file.read(&mut b) {
                    Ok(1) => {
                        *read_pos += 1;
                        Some(b[0])
                    }
                    _ => None,
                }
            }
            StreamKind::Reader(r) => {
                let mut b = [0u8; 1];
                match r.read(&mut b) {
                    Ok(1) => Some(b[0]),
                    _ => None,
                }
            }
        }
    }

    fn sbumpc(&mut self, id: SId) -> i32 {
        let Some(entry) = self.entry(id) else {
            return -1;
        };
        if let Some(b) = entry.peeked.take() {
            return b as i32;
        }
        Self::read_byte(entry).map(|b| b as i32).unwrap_or(-1)
    }

    fn sgetc(&mut self, id: SId) -> i32 {
        let Some(entry) = self.entry(id) else {
            return -1;
        };
        if let Some(b) = entry.peeked {
            return b as i32;
        }
        match Self::read_byte(entry) {
            Some(b) => {
                entry.peeked = Some(b);
                b as i32
            }
            None => -1,
        }
    }

    fn sgetn(&mut self, id: SId, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let c = self.sbumpc(id);
            if c < 0 {
                break;
            }
            out.push(c as u8);
        }
        out
    }

    fn sputn(&mut self, id: SId, data: &[u8]) {
        let Some(entry) = self.entry(id) else {
            return;
        };
        if let StreamKind::File {
            file, write_pos, ..
        } = &mut entry.kind
        {
            if file.seek(SeekFrom::Start(*write_pos)).is_ok() && file.write_all(data).is_ok() {
                *write_pos += data.len() as u64;
            }
        }
    }

    fn stream_len(file: &std::fs::File) -> u64 {
        file.metadata().map(|m| m.len()).unwrap_or(0)
    }

    fn seekoff(&mut self, id: SId, off: i64, read: bool) -> i64 {
        let Some(entry) = self.entry(id) else {
            return -1;
        };
        entry.peeked = None;
        if let StreamKind::File {
            file,
            read_pos,
            write_pos,
        } = &mut entry.kind
        {
            let len = Self::stream_len(file) as i64;
            let pos = if read { read_pos } else { write_pos };
            let new = (*pos as i64 + off).clamp(0, len);
            *pos = new as u64;
            new
        } else {
            -1
        }
    }

    fn seekpos(&mut self, id: SId, target: i64, read: bool) -> i64 {
        let Some(entry) = self.entry(id) else {
            return -1;
        };
        entry.peeked = None;
        if let StreamKind::File {
            file,
            read_pos,
            write_pos,
        } = &mut entry.kind
        {
            let len = Self::stream_len(file) as i64;
            let new = target.clamp(0, len);
            if read {
                *read_pos = new as u64;
            } else {
                *write_pos = new as u64;
            }
            new
        } else {
            -1
        }
    }

    fn sync(&mut self, id: SId) -> i32 {
        let Some(entry) = self.entry(id) else {
            return -1;
        };
        match &mut entry.kind {
            StreamKind::File { file, .. } => {
                if file.flush().is_ok() {
                    0
                } else {
                    -1
                }
            }
            StreamKind::Reader(_) => 0,
        }
    }

    fn in_avail(&mut self, id: SId) -> i64 {
        let Some(entry) = self.entry(id) else {
            return -1;
        };
        let pending = entry.peeked.is_some() as i64;
        match &entry.kind {
            StreamKind::File { file, read_pos, .. } => {
                let len = Self::stream_len(file) as i64;
                let rest = len - *read_pos as i64 + pending;
                if rest <= 0 {
                    -1
                } else {
                    rest
                }
            }
            StreamKind::Reader(_) => pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn interrupts_queue_in_fifo_order() {
        let handle = RuntimeHandle::new();
        handle.schedule_interrupt(Box::new(|_| {}));
        handle.schedule_interrupt(Box::new(|_| {}));
        assert!(handle.has_interrupts());
        assert_eq!(handle.take_interrupts().len(), 2);
        assert!(!handle.has_interrupts());
    }

    #[test]
    fn reader_stream_bumps_and_peeks() {
        let handle = RuntimeHandle::new();
        let id = handle.fopen_reader(Box::new(Cursor::new(b"ab".to_vec())));
        assert_eq!(handle.sgetc(id), b'a' as i32);
        assert_eq!(handle.sgetc(id), b'a' as i32);
        assert_eq!(handle.sbumpc(id), b'a' as i32);
        assert_eq!(handle.sbumpc(id), b'b' as i32);
        assert_eq!(handle.sbumpc(id), -1);
    }

    #[test]
    fn file_stream_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.txt");
        let path = path.to_str().unwrap();
        let handle = RuntimeHandle::new();
        let id = handle.fopen(path);
        assert_ne!(id, SId(0));
        handle.sputn(id, b"42 7");
        assert_eq!(handle.sgetn(id, 2), b"42".to_vec());
        assert_eq!(handle.in_avail(id), 2);
        assert_eq!(handle.pubseekpos(id, 0, true), 0);
        assert_eq!(handle.sgetn(id, 4), b"42 7".to_vec());
        assert_eq!(handle.in_avail(id), -1);
    }

    #[test]
    fn unknown_stream_is_tolerated() {
        let handle = RuntimeHandle::new();
        assert_eq!(handle.sbumpc(SId(42)), -1);
        assert_eq!(handle.in_avail(SId(42)), -1);
        handle.sputn(SId(42), b"x");
        handle.fclose(SId(42));
    }

    #[test]
    fn stop_request_is_idempotent() {
        let handle = RuntimeHandle::new();
        assert!(!handle.stop_requested());
        handle.request_stop();
        handle.request_stop();
        assert!(handle.stop_requested());
    }
}
