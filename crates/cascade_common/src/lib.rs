//! Shared foundational types used across the Cascade JIT runtime.
//!
//! This crate provides core types including the arbitrary-width [`Bits`]
//! vector with Verilog operator semantics, interned identifiers, frequency
//! values for throughput reporting, compile-request UUIDs, and common result
//! types.

#![warn(missing_docs)]

pub mod bits;
pub mod frequency;
pub mod ident;
pub mod result;
pub mod uuid;

pub use bits::{Bits, BitsError, Kind};
pub use frequency::Frequency;
pub use ident::{Ident, Interner};
pub use result::{CascadeResult, InternalError};
pub use uuid::Uuid;
