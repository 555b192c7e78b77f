//! Engine state snapshots and the saved-state stream codec.
//!
//! A snapshot is a map from variable id to value. The serialized form is a
//! stream of `(vid: u32 LE, bit-vector)` pairs terminated by a zero vid;
//! trailing bytes after the terminator are surfaced as an error.

use crate::ids::VId;
use cascade_common::{Bits, BitsError};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// A snapshot of variable values, ordered by id for deterministic output.
pub type VarMap = BTreeMap<VId, Bits>;

/// A dataplane write buffered by an engine interface for the kernel to
/// flush after the emitting engine call returns.
#[derive(Debug, Clone)]
pub enum DataWrite {
    /// A full-value write.
    Bits(VId, Bits),
    /// The single-bit fast path.
    Bool(VId, bool),
}

/// Errors decoding a saved-state stream.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A bit-vector payload failed to decode.
    #[error("bad saved state: {0}")]
    Bits(#[from] BitsError),
    /// The stream ended before the zero-id terminator.
    #[error("saved state is truncated")]
    Truncated,
    /// Bytes followed the terminator.
    #[error("trailing garbage after saved state terminator")]
    TrailingGarbage,
    /// An underlying I/O error.
    #[error("saved state I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Writes a snapshot followed by the zero-id terminator.
pub fn save_state<W: Write + ?Sized>(w: &mut W, state: &VarMap) -> io::Result<()> {
    for (vid, bits) in state {
        w.write_all(&vid.0.to_le_bytes())?;
        bits.serialize(w)?;
    }
    w.write_all(&0u32.to_le_bytes())?;
    Ok(())
}

/// Reads a snapshot up to the zero-id terminator, rejecting trailing bytes.
pub fn load_state<R: Read + ?Sized>(r: &mut R) -> Result<VarMap, StateError> {
    let mut out = VarMap::new();
    loop {
        let mut vid = [0u8; 4];
        match r.read_exact(&mut vid) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(StateError::Truncated)
            }
            Err(e) => return Err(StateError::Io(e)),
        }
        let vid = u32::from_le_bytes(vid);
        if vid == 0 {
            break;
        }
        let bits = Bits::deserialize(r)?;
        out.insert(VId(vid), bits);
    }
    let mut probe = [0u8; 1];
    match r.read(&mut probe) {
        Ok(0) => Ok(out),
        Ok(_) => Err(StateError::TrailingGarbage),
        Err(e) => Err(StateError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut state = VarMap::new();
        state.insert(VId(1), Bits::new(4, 0xA));
        state.insert(VId(9), Bits::new(64, u64::MAX));
        let mut buf = Vec::new();
        save_state(&mut buf, &state).unwrap();
        let back = load_state(&mut buf.as_slice()).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn empty_snapshot_is_just_terminator() {
        let mut buf = Vec::new();
        save_state(&mut buf, &VarMap::new()).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);
        assert!(load_state(&mut buf.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn trailing_garbage_is_an_error() {
        let mut buf = Vec::new();
        save_state(&mut buf, &VarMap::new()).unwrap();
        buf.push(0xFF);
        assert!(matches!(
            load_state(&mut buf.as_slice()),
            Err(StateError::TrailingGarbage)
        ));
    }

    #[test]
    fn missing_terminator_is_truncated() {
        let mut state = VarMap::new();
        state.insert(VId(1), Bits::new(8, 5));
        let mut buf = Vec::new();
        save_state(&mut buf, &state).unwrap();
        buf.truncate(buf.len() - 4);
        assert!(matches!(
            load_state(&mut buf.as_slice()),
            Err(StateError::Truncated)
        ));
    }
}
