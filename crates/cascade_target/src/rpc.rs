//! The coordinator/worker wire protocol.
//!
//! A message is a `(type: u8, id: u32 LE)` header followed by a
//! type-specific payload. Engine evaluate/update responses are framed as
//! zero or more interface callbacks followed by an [`OKAY`] sentinel
//! carrying the same id as the request. Bit-vectors travel in their
//! standard binary form; state maps reuse the saved-state codec.

use cascade_common::{Bits, BitsError};
use cascade_runtime::state::{save_state, StateError, VarMap};
use std::io::{self, Read, Write};

/// Message type codes.
pub mod msg {
    /// Compile a module on the worker.
    pub const COMPILE: u8 = 1;
    /// Abort an in-flight compile.
    pub const ABORT: u8 = 2;
    /// Success sentinel; terminates callback streams.
    pub const OKAY: u8 = 3;
    /// Failure sentinel, with an error string.
    pub const FAIL: u8 = 4;
    /// Open a connection and receive its id.
    pub const REGISTER_CONNECTION: u8 = 5;
    /// Close a connection.
    pub const TEARDOWN_CONNECTION: u8 = 6;
    /// Destroy a remote engine.
    pub const TEARDOWN_ENGINE: u8 = 7;
    /// Snapshot a remote engine's state.
    pub const GET_STATE: u8 = 8;
    /// Restore a remote engine's state.
    pub const SET_STATE: u8 = 9;
    /// Snapshot a remote engine's inputs.
    pub const GET_INPUT: u8 = 10;
    /// Restore a remote engine's inputs.
    pub const SET_INPUT: u8 = 11;
    /// Resync after a state/input restore.
    pub const FINALIZE: u8 = 12;
    /// Query the done-step override.
    pub const OVERRIDES_DONE_STEP: u8 = 13;
    /// Run the done-step hook.
    pub const DONE_STEP: u8 = 14;
    /// Query the done-simulation override.
    pub const OVERRIDES_DONE_SIMULATION: u8 = 15;
    /// Run the done-simulation hook.
    pub const DONE_SIMULATION: u8 = 16;
    /// Deliver an input value.
    pub const READ: u8 = 17;
    /// Evaluate.
    pub const EVALUATE: u8 = 18;
    /// Query pending updates.
    pub const THERE_ARE_UPDATES: u8 = 19;
    /// Service pending updates.
    pub const UPDATE: u8 = 20;
    /// Query task side effects.
    pub const THERE_WERE_TASKS: u8 = 21;
    /// Update only if updates are pending.
    pub const CONDITIONAL_UPDATE: u8 = 22;
    /// Run the open-loop fast path.
    pub const OPEN_LOOP: u8 = 23;
    /// Callback: dataplane write.
    pub const WRITE_BITS: u8 = 24;
    /// Callback: single-bit dataplane write.
    pub const WRITE_BOOL: u8 = 25;
    /// Callback: text output (display/write/error/warning/info).
    pub const DEBUG: u8 = 26;
    /// Callback: `$finish`.
    pub const FINISH: u8 = 27;
    /// Callback: `$restart`.
    pub const RESTART: u8 = 28;
    /// Callback: `$retarget`.
    pub const RETARGET: u8 = 29;
    /// Callback: `$save`.
    pub const SAVE: u8 = 30;
    /// Stream open (worker to coordinator, answered inline).
    pub const FOPEN: u8 = 31;
    /// Stream bytes-available probe.
    pub const IN_AVAIL: u8 = 32;
    /// Stream relative seek.
    pub const PUBSEEKOFF: u8 = 33;
    /// Stream absolute seek.
    pub const PUBSEEKPOS: u8 = 34;
    /// Stream flush.
    pub const PUBSYNC: u8 = 35;
    /// Stream read-and-consume.
    pub const SBUMPC: u8 = 36;
    /// Stream peek.
    pub const SGETC: u8 = 37;
    /// Stream block read.
    pub const SGETN: u8 = 38;
    /// Stream single-byte write.
    pub const SPUTC: u8 = 39;
    /// Stream block write.
    pub const SPUTN: u8 = 40;
}

/// Text-callback sub-kinds carried by [`msg::DEBUG`].
pub mod debug_kind {
    /// `$display` (newline appended by the receiver).
    pub const DISPLAY: u8 = 0;
    /// `$write`.
    pub const WRITE: u8 = 1;
    /// `$error`.
    pub const ERROR: u8 = 2;
    /// `$warning`.
    pub const WARNING: u8 = 3;
    /// `$info`.
    pub const INFO: u8 = 4;
}

/// Errors raised while speaking the wire protocol.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The peer sent something outside the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A bit-vector payload failed to decode.
    #[error("bad bit-vector payload: {0}")]
    Bits(#[from] BitsError),
    /// A state-map payload failed to decode.
    #[error("bad state payload: {0}")]
    State(#[from] StateError),
    /// The underlying socket failed.
    #[error("connection error: {0}")]
    Io(#[from] io::Error),
}

/// A message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The message type code.
    pub ty: u8,
    /// The engine/connection/request id.
    pub id: u32,
}

/// Writes a message header.
pub fn write_header<W: Write + ?Sized>(w: &mut W, ty: u8, id: u32) -> io::Result<()> {
    w.write_all(&[ty])?;
    w.write_all(&id.to_le_bytes())
}

/// Reads a message header.
pub fn read_header<R: Read + ?Sized>(r: &mut R) -> io::Result<Header> {
    let mut ty = [0u8; 1];
    r.read_exact(&mut ty)?;
    let mut id = [0u8; 4];
    r.read_exact(&mut id)?;
    Ok(Header {
        ty: ty[0],
        id: u32::from_le_bytes(id),
    })
}

/// Writes a `u8`.
pub fn write_u8<W: Write + ?Sized>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

/// Reads a `u8`.
pub fn read_u8<R: Read + ?Sized>(r: &mut R) -> io::Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

/// Writes a little-endian `u32`.
pub fn write_u32<W: Write + ?Sized>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Reads a little-endian `u32`.
pub fn read_u32<R: Read + ?Sized>(r: &mut R) -> io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Writes a little-endian `u64`.
pub fn write_u64<W: Write + ?Sized>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Reads a little-endian `u64`.
pub fn read_u64<R: Read + ?Sized>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// Writes a little-endian `i64`.
pub fn write_i64<W: Write + ?Sized>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

/// Reads a little-endian `i64`.
pub fn read_i64<R: Read + ?Sized>(r: &mut R) -> io::Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_le_bytes(b))
}

/// Writes a length-prefixed byte run.
pub fn write_bytes<W: Write + ?Sized>(w: &mut W, data: &[u8]) -> io::Result<()> {
    write_u32(w, data.len() as u32)?;
    w.write_all(data)
}

/// Reads a length-prefixed byte run.
pub fn read_bytes<R: Read + ?Sized>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    let mut data = vec![0u8; len];
    r.read_exact(&mut data)?;
    Ok(data)
}

/// Writes a length-prefixed UTF-8 string.
pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &str) -> io::Result<()> {
    write_bytes(w, s.as_bytes())
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<String, RpcError> {
    let data = read_bytes(r)?;
    String::from_utf8(data).map_err(|_| RpcError::Protocol("non-utf8 string".into()))
}

/// Writes a bit-vector in its standard binary form.
pub fn write_bits<W: Write + ?Sized>(w: &mut W, bits: &Bits) -> io::Result<()> {
    bits.serialize(w)
}

/// Reads a bit-vector.
pub fn read_bits<R: Read + ?Sized>(r: &mut R) -> Result<Bits, RpcError> {
    Ok(Bits::deserialize(r)?)
}

/// Writes a state map in the saved-state format.
pub fn write_varmap<W: Write + ?Sized>(w: &mut W, map: &VarMap) -> io::Result<()> {
    save_state(w, map)
}

/// Reads a state map.
///
/// Unlike file loading, a wire payload is followed by more protocol bytes,
/// so only the terminator is consumed.
pub fn read_varmap<R: Read + ?Sized>(r: &mut R) -> Result<VarMap, RpcError> {
    use cascade_runtime::VId;
    let mut out = VarMap::new();
    loop {
        let vid = read_u32(r)?;
        if vid == 0 {
            break;
        }
        out.insert(VId(vid), Bits::deserialize(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_runtime::VId;

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        write_header(&mut buf, msg::EVALUATE, 7).unwrap();
        assert_eq!(buf.len(), 5);
        let h = read_header(&mut buf.as_slice()).unwrap();
        assert_eq!(h, Header {
            ty: msg::EVALUATE,
            id: 7
        });
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = Vec::new();
        write_string(&mut buf, "module m(); endmodule").unwrap();
        let s = read_string(&mut buf.as_slice()).unwrap();
        assert_eq!(s, "module m(); endmodule");
    }

    #[test]
    fn varmap_roundtrip_leaves_trailing_bytes() {
        let mut map = VarMap::new();
        map.insert(VId(3), Bits::new(8, 0xAB));
        let mut buf = Vec::new();
        write_varmap(&mut buf, &map).unwrap();
        write_u8(&mut buf, 0xEE).unwrap();
        let mut cursor = buf.as_slice();
        let back = read_varmap(&mut cursor).unwrap();
        assert_eq!(back, map);
        assert_eq!(read_u8(&mut cursor).unwrap(), 0xEE);
    }

    #[test]
    fn bits_roundtrip() {
        let b = Bits::new(12, 0x5A5);
        let mut buf = Vec::new();
        write_bits(&mut buf, &b).unwrap();
        assert_eq!(read_bits(&mut buf.as_slice()).unwrap(), b);
    }
}
