//! Runtime identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A global variable id, assigned at compile time by the
/// [`Isolate`](crate::isolate::Isolate). Id 0 is reserved as the saved-state
/// stream terminator.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct VId(pub u32);

impl VId {
    /// The reserved null id terminating saved-state streams.
    pub const NULL: VId = VId(0);
}

impl fmt::Display for VId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A stream id handed out by the runtime's stream table. Ids 1-3 are
/// pre-bound to the standard streams.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct SId(pub u32);

impl fmt::Display for SId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// A stable handle for one engine slot in the kernel's module list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct EngineId(pub u32);

impl EngineId {
    /// Returns the raw index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_vid_is_zero() {
        assert_eq!(VId::NULL, VId(0));
    }

    #[test]
    fn display() {
        assert_eq!(VId(7).to_string(), "v7");
        assert_eq!(SId(2).to_string(), "s2");
    }
}
