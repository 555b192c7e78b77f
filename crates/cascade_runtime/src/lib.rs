//! The Cascade runtime: engine layer, dataplane, two-phase scheduler, and
//! the JIT compile-and-replace plumbing.
//!
//! One runtime thread owns the [`Kernel`] and every engine method; other
//! threads communicate through the [`RuntimeHandle`]'s interrupt queue.
//! Backend compilers live in a separate crate and plug in through the
//! [`EngineCompiler`] trait.

#![warn(missing_docs)]

pub mod dataplane;
pub mod engine;
pub mod handle;
pub mod ids;
pub mod isolate;
pub mod kernel;
pub mod runtime;
pub mod state;

pub use dataplane::DataPlane;
pub use engine::{Core, Engine, Interface, StubCore, StubInterface};
pub use handle::{Interrupt, RuntimeHandle};
pub use ids::{EngineId, SId, VId};
pub use isolate::Isolate;
pub use kernel::{
    CompileRequest, EngineCompiler, Kernel, KernelOptions, March, RuntimeModule, VarSpec,
};
pub use runtime::Runtime;
pub use state::{load_state, save_state, DataWrite, StateError, VarMap};
