//! The compiler coordinator.
//!
//! Dispatches compile requests on the module's `__std` annotation to a
//! registered core compiler (or to the proxy when the `__loc` annotation
//! names a remote location), short-circuits stub modules, and implements
//! the two-pass compile-and-replace protocol: a synchronous first pass
//! swaps a software engine in immediately; when the march target asks for a
//! second pass, it runs on a thread pool and posts a state-safe replacement
//! interrupt, with out-of-order completions discarded by version.

use crate::local::LocalInterface;
use cascade_ast::Node;
use cascade_common::Uuid;
use cascade_runtime::{
    CompileRequest, Core, Engine, EngineCompiler, EngineId, Interface, Kernel, RuntimeHandle,
    VarSpec,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A cancellation flag polled by in-flight compiles.
#[derive(Clone)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the compile should give up.
    pub fn aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A backend that turns one compile request into a core.
pub trait CoreCompiler: Send + Sync {
    /// Compiles a core, or `None` on abort or if the module is unsupported.
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>>;
}

struct Inner {
    cores: Mutex<HashMap<String, Arc<dyn CoreCompiler>>>,
    aborts: Mutex<HashMap<Uuid, AbortHandle>>,
    shutdown: AtomicBool,
    pending: Mutex<usize>,
    pending_cv: Condvar,
    pool: rayon::ThreadPool,
}

impl Inner {
    fn register_abort(&self, uuid: Uuid) -> AbortHandle {
        let handle = AbortHandle::new();
        self.aborts.lock().unwrap().insert(uuid, handle.clone());
        handle
    }

    fn clear_abort(&self, uuid: &Uuid) {
        self.aborts.lock().unwrap().remove(uuid);
    }

    fn add_pending(&self) {
        *self.pending.lock().unwrap() += 1;
    }

    fn done_pending(&self) {
        let mut n = self.pending.lock().unwrap();
        *n -= 1;
        self.pending_cv.notify_all();
    }

    /// Runs one compile to an engine. Stub modules short-circuit; otherwise
    /// the request dispatches on its annotations.
    fn compile(
        &self,
        req: CompileRequest,
        handle: &Arc<RuntimeHandle>,
        abort: &AbortHandle,
    ) -> Option<Engine> {
        if self.shutdown.load(Ordering::SeqCst) || abort.aborted() {
            return None;
        }
        if is_stub(&req) {
            return Some(Engine::stub());
        }
        let key = dispatch_key(&req);
        let compiler = self.cores.lock().unwrap().get(&key).cloned()?;
        let interface: Arc<dyn Interface> = Arc::new(LocalInterface::new(Arc::clone(handle)));
        let core = compiler.compile(req, Arc::clone(&interface), abort)?;
        Some(Engine::new(core, interface))
    }
}

/// The compiler coordinator; cheap to clone through its shared inner state.
pub struct Compiler {
    inner: Arc<Inner>,
}

impl Compiler {
    /// Creates a coordinator with an empty backend registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cores: Mutex::new(HashMap::new()),
                aborts: Mutex::new(HashMap::new()),
                shutdown: AtomicBool::new(false),
                pending: Mutex::new(0),
                pending_cv: Condvar::new(),
                pool: rayon::ThreadPoolBuilder::new()
                    .num_threads(2)
                    .thread_name(|i| format!("cascade-compile-{i}"))
                    .build()
                    .expect("building the compile pool"),
            }),
        }
    }

    /// Registers a core compiler for a `__std` annotation value.
    ///
    /// Registration after the first compile, or over an existing entry, is
    /// undefined; callers configure the coordinator once, up front.
    pub fn set_core_compiler(&self, std: impl Into<String>, c: Arc<dyn CoreCompiler>) -> &Self {
        self.inner.cores.lock().unwrap().insert(std.into(), c);
        self
    }

    /// Returns a registered core compiler.
    pub fn get_core_compiler(&self, std: &str) -> Option<Arc<dyn CoreCompiler>> {
        self.inner.cores.lock().unwrap().get(std).cloned()
    }

    /// Registers the full software backend set.
    pub fn with_sw_backends(self) -> Self {
        self.set_core_compiler("logic", Arc::new(crate::sw::SwCompiler));
        self.set_core_compiler("clock", Arc::new(crate::sw::SwClockCompiler));
        self.set_core_compiler("led", Arc::new(crate::sw::SwLedCompiler));
        self.set_core_compiler("gpio", Arc::new(crate::sw::SwGpioCompiler));
        self.set_core_compiler("pad", Arc::new(crate::sw::SwPadCompiler));
        self.set_core_compiler("reset", Arc::new(crate::sw::SwResetCompiler));
        self
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCompiler for Compiler {
    fn compile_and_replace(
        &self,
        kernel: &mut Kernel,
        slot: EngineId,
        req: CompileRequest,
    ) -> bool {
        let handle = Arc::clone(kernel.handle());
        let uuid = req.uuid;
        let version = req.version;
        let abort = self.inner.register_abort(uuid);
        let second = second_pass_target(&req.target).map(|t| duplicate_request(&req, t));

        let Some(engine) = self.inner.compile(req, &handle, &abort) else {
            self.inner.clear_abort(&uuid);
            return false;
        };
        if let Some(e) = kernel.engine_mut(slot) {
            e.replace_with(engine);
        }

        match second {
            Some(req2) => {
                // The slow pass; its replacement runs between steps.
                let inner = Arc::clone(&self.inner);
                let pool = Arc::clone(&self.inner);
                inner.add_pending();
                pool.pool.spawn(move || {
                    let abort = inner
                        .aborts
                        .lock()
                        .unwrap()
                        .get(&uuid)
                        .cloned()
                        .unwrap_or_else(AbortHandle::new);
                    if let Some(engine) = inner.compile(req2, &handle, &abort) {
                        handle.schedule_interrupt(Box::new(move |k| {
                            k.replace_engine(slot, engine, version);
                        }));
                    }
                    inner.clear_abort(&uuid);
                    inner.done_pending();
                });
            }
            None => self.inner.clear_abort(&uuid),
        }
        true
    }

    fn stop_compile(&self, uuid: &Uuid) {
        if let Some(abort) = self.inner.aborts.lock().unwrap().get(uuid) {
            abort.set();
        }
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for abort in self.inner.aborts.lock().unwrap().values() {
            abort.set();
        }
        // Bounded wait for background passes to drain.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut pending = self.inner.pending.lock().unwrap();
        while *pending > 0 && std::time::Instant::now() < deadline {
            let (guard, _) = self
                .inner
                .pending_cv
                .wait_timeout(pending, Duration::from_millis(50))
                .unwrap();
            pending = guard;
        }
    }
}

/// The registry key a request dispatches to: remote locations go through
/// the proxy, everything else by its `__std` annotation.
fn dispatch_key(req: &CompileRequest) -> String {
    match req.loc.as_str() {
        "local" | "runtime" => req.std.clone(),
        _ => "proxy".to_string(),
    }
}

/// The second-pass target, when the march string is `first;second`.
fn second_pass_target(target: &str) -> Option<String> {
    let (_, second) = target.split_once(';')?;
    if second.is_empty() {
        None
    } else {
        Some(second.to_string())
    }
}

/// Rebuilds a request for a second pass: a fresh AST clone with the var
/// specs remapped into it.
fn duplicate_request(req: &CompileRequest, target: String) -> CompileRequest {
    let (ast, md, map) = req.ast.extract_mapped(req.md);
    let remap = |specs: &[VarSpec]| {
        specs
            .iter()
            .map(|s| VarSpec {
                decl: map[&s.decl],
                vid: s.vid,
                width: s.width,
            })
            .collect::<Vec<_>>()
    };
    CompileRequest {
        uuid: req.uuid,
        version: req.version,
        inputs: remap(&req.inputs),
        outputs: remap(&req.outputs),
        state: remap(&req.state),
        ast,
        md,
        inst_name: req.inst_name.clone(),
        std: req.std.clone(),
        loc: req.loc.clone(),
        target,
        init_vid: req.init_vid,
    }
}

/// A module with no inputs, no outputs, and no observable side effects
/// compiles to a stub.
fn is_stub(req: &CompileRequest) -> bool {
    if !req.inputs.is_empty() || !req.outputs.is_empty() {
        return false;
    }
    if req.std != "logic" {
        return false;
    }
    let mut effects = false;
    cascade_analyze::walk_module(&req.ast, req.md, &mut |ast, node| {
        if effects {
            return;
        }
        effects |= matches!(
            ast.node(node),
            Node::Display { .. }
                | Node::Write { .. }
                | Node::Finish { .. }
                | Node::ErrorTask { .. }
                | Node::WarningTask { .. }
                | Node::InfoTask { .. }
                | Node::Restart { .. }
                | Node::Retarget { .. }
                | Node::Save { .. }
                | Node::Get { .. }
                | Node::Put { .. }
                | Node::Fopen { .. }
        );
    });
    !effects
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_pass_targets() {
        assert_eq!(second_pass_target("sw"), None);
        assert_eq!(second_pass_target("sw;"), None);
        assert_eq!(second_pass_target("sw;sw"), Some("sw".to_string()));
    }

    #[test]
    fn abort_handle_flags() {
        let a = AbortHandle::new();
        assert!(!a.aborted());
        a.set();
        assert!(a.aborted());
    }

    #[test]
    fn registry_roundtrip() {
        let c = Compiler::new().with_sw_backends();
        assert!(c.get_core_compiler("logic").is_some());
        assert!(c.get_core_compiler("clock").is_some());
        assert!(c.get_core_compiler("verilator").is_none());
    }
}
