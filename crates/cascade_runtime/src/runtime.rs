//! The runtime object: a dedicated simulation thread plus the thread-safe
//! control surface.
//!
//! All major state lives in the [`Kernel`], which the runtime thread owns
//! exclusively once started. Front-ends interact through this wrapper:
//! `eval` enqueues source text as an interrupt, the stream setters rebind
//! output targets, and `request_stop`/`wait_for_stop`/`stop_now` manage the
//! thread's lifetime.

use crate::handle::RuntimeHandle;
use crate::ids::SId;
use crate::kernel::{EngineCompiler, Kernel, KernelOptions};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A running (or runnable) Cascade simulation.
pub struct Runtime {
    handle: Arc<RuntimeHandle>,
    kernel: Option<Kernel>,
    thread: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Creates a runtime with the given compiler coordinator and options.
    /// The march prelude is evaluated immediately, on the calling thread.
    pub fn new(compiler: Arc<dyn EngineCompiler>, opts: KernelOptions) -> Self {
        let handle = Arc::new(RuntimeHandle::new());
        let kernel = Kernel::new(Arc::clone(&handle), compiler, opts);
        Self {
            handle,
            kernel: Some(kernel),
            thread: None,
        }
    }

    /// The shared handle, for interfaces and tests.
    pub fn handle(&self) -> Arc<RuntimeHandle> {
        Arc::clone(&self.handle)
    }

    // ========================================================================
    // Eval interface
    // ========================================================================

    /// Evaluates source text in the gap between this and the next timestep.
    /// Returns immediately; successfully eval'ed code begins execution at
    /// the following step.
    pub fn eval(&self, text: impl Into<String>) {
        let text = text.into();
        self.handle.schedule_interrupt(Box::new(move |k| {
            k.eval_text(&text);
        }));
    }

    /// Reads a stream to end and evaluates its contents between steps.
    pub fn eval_reader(&self, mut reader: Box<dyn Read + Send>) {
        self.handle.schedule_interrupt(Box::new(move |k| {
            let mut text = String::new();
            if reader.read_to_string(&mut text).is_ok() {
                k.eval_text(&text);
            } else {
                k.handle().print_err("error: could not read eval stream\n");
            }
        }));
    }

    /// Synchronously evaluates source text. Only valid before [`run`](Self::run);
    /// used by tests and batch front-ends that need eval results in order.
    pub fn eval_now(&mut self, text: &str) -> bool {
        let kernel = self
            .kernel
            .as_mut()
            .expect("eval_now is only available before run()");
        kernel.eval_text(text)
    }

    /// Registers an arbitrary reader as a runtime stream; the returned id is
    /// usable with `$get`/`$feof`.
    pub fn fopen(&self, reader: Box<dyn Read + Send>) -> SId {
        self.handle.fopen_reader(reader)
    }

    // ========================================================================
    // Stream bindings
    // ========================================================================

    /// Rebinds standard output (`$display`/`$write` text).
    pub fn set_stdout(&self, w: Box<dyn Write + Send>) {
        self.handle.set_stdout(w);
    }

    /// Rebinds standard error (`$error`, eval diagnostics).
    pub fn set_stderr(&self, w: Box<dyn Write + Send>) {
        self.handle.set_stderr(w);
    }

    /// Rebinds the warning stream.
    pub fn set_stdwarn(&self, w: Box<dyn Write + Send>) {
        self.handle.set_stdwarn(w);
    }

    /// Rebinds the info stream.
    pub fn set_stdinfo(&self, w: Box<dyn Write + Send>) {
        self.handle.set_stdinfo(w);
    }

    /// Rebinds the log stream.
    pub fn set_stdlog(&self, w: Box<dyn Write + Send>) {
        self.handle.set_stdlog(w);
    }

    // ========================================================================
    // Thread control
    // ========================================================================

    /// Starts the simulation loop on its own thread.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn run(&mut self) {
        let mut kernel = self.kernel.take().expect("run() may only be called once");
        self.thread = Some(
            std::thread::Builder::new()
                .name("cascade-runtime".into())
                .spawn(move || kernel.run())
                .expect("spawning the runtime thread"),
        );
    }

    /// Requests a stop at the next step boundary. Idempotent.
    pub fn request_stop(&self) {
        self.handle.request_stop();
    }

    /// Blocks until the runtime thread exits.
    pub fn wait_for_stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    /// Requests a stop and joins.
    pub fn stop_now(&mut self) {
        self.request_stop();
        self.wait_for_stop();
    }

    /// The logical simulation time. Thread-safe.
    pub fn time(&self) -> u64 {
        self.handle.time()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.request_stop();
        self.wait_for_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::ids::EngineId;
    use crate::kernel::CompileRequest;
    use cascade_common::Uuid;

    struct StubCompiler;

    impl EngineCompiler for StubCompiler {
        fn compile_and_replace(
            &self,
            kernel: &mut Kernel,
            slot: EngineId,
            _req: CompileRequest,
        ) -> bool {
            if let Some(e) = kernel.engine_mut(slot) {
                e.replace_with(Engine::stub());
            }
            true
        }
        fn stop_compile(&self, _uuid: &Uuid) {}
        fn shutdown(&self) {}
    }

    #[test]
    fn starts_and_stops_cleanly() {
        let mut rt = Runtime::new(Arc::new(StubCompiler), KernelOptions::default());
        rt.run();
        rt.stop_now();
    }

    #[test]
    fn eval_now_before_run() {
        let mut rt = Runtime::new(Arc::new(StubCompiler), KernelOptions::default());
        assert!(rt.eval_now("module foo(); endmodule"));
        assert!(!rt.eval_now("module foo(); endmodule"));
    }

    #[test]
    fn queued_eval_runs_after_start() {
        let mut rt = Runtime::new(Arc::new(StubCompiler), KernelOptions::default());
        rt.eval("module late(); endmodule");
        rt.run();
        // Give the runtime a moment to drain the eval interrupt.
        std::thread::sleep(std::time::Duration::from_millis(50));
        rt.stop_now();
    }
}
