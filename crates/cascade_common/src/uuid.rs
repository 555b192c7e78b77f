//! Random identifiers for compilation requests.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit random identifier.
///
/// Every JIT compilation request carries a `Uuid` so that abort requests and
/// out-of-order second-pass completions can be matched to the engine slot
/// they belong to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uuid([u8; 16]);

impl Uuid {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Creates an identifier from raw bytes (used by the wire protocol).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_unique_enough() {
        let a = Uuid::generate();
        let b = Uuid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn display_is_32_hex_chars() {
        let u = Uuid::from_bytes([0xAB; 16]);
        let s = format!("{u}");
        assert_eq!(s.len(), 32);
        assert_eq!(&s[..2], "ab");
    }

    #[test]
    fn bytes_roundtrip() {
        let u = Uuid::generate();
        let v = Uuid::from_bytes(*u.as_bytes());
        assert_eq!(u, v);
    }
}
