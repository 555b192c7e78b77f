//! Software backend: interpreter logic core, clock, and peripherals.

pub mod clock;
pub mod logic;
pub mod periph;

pub use clock::SwClock;
pub use logic::SwLogic;
pub use periph::{SwInputPeripheral, SwOutputPeripheral};

use crate::compiler::{AbortHandle, CoreCompiler};
use cascade_runtime::{CompileRequest, Core, Interface};
use std::sync::Arc;

/// Compiles `logic`-annotated modules to the AST interpreter.
pub struct SwCompiler;

impl CoreCompiler for SwCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        Some(Box::new(SwLogic::new(req, interface)))
    }
}

/// Compiles `clock`-annotated modules to the toggling clock core.
pub struct SwClockCompiler;

impl CoreCompiler for SwClockCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        let out = req.outputs.first()?;
        Some(Box::new(SwClock::new(interface, out.vid)))
    }
}

/// Compiles `led`-annotated modules to an input latch.
pub struct SwLedCompiler;

impl CoreCompiler for SwLedCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        let input = req.inputs.first()?;
        Some(Box::new(SwInputPeripheral::new(
            interface,
            "led",
            input.vid,
            input.width,
        )))
    }
}

/// Compiles `gpio`-annotated modules to an input latch.
pub struct SwGpioCompiler;

impl CoreCompiler for SwGpioCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        let input = req.inputs.first()?;
        Some(Box::new(SwInputPeripheral::new(
            interface,
            "gpio",
            input.vid,
            input.width,
        )))
    }
}

/// Compiles `pad`-annotated modules to a pokeable output source.
pub struct SwPadCompiler;

impl CoreCompiler for SwPadCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        let out = req.outputs.first()?;
        Some(Box::new(SwOutputPeripheral::new(
            interface,
            out.vid,
            out.width,
        )))
    }
}

/// Compiles `reset`-annotated modules to a single-bit output source.
pub struct SwResetCompiler;

impl CoreCompiler for SwResetCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        let out = req.outputs.first()?;
        Some(Box::new(SwOutputPeripheral::new(
            interface,
            out.vid,
            out.width,
        )))
    }
}
