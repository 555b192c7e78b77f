//! Backend compilers and cores for the Cascade JIT.
//!
//! The [`Compiler`] coordinator implements the runtime's `EngineCompiler`
//! trait, dispatching on module annotations to the software backend (an AST
//! interpreter plus clock and peripheral cores) or, for remote locations,
//! to the proxy backend that ships modules to a [`Worker`] runtime over the
//! wire protocol.

#![warn(missing_docs)]

pub mod compiler;
pub mod local;
pub mod proxy;
pub mod rpc;
pub mod sw;
pub mod worker;

pub use compiler::{AbortHandle, Compiler, CoreCompiler};
pub use local::LocalInterface;
pub use proxy::{ProxyCompiler, ProxyCore};
pub use worker::Worker;
