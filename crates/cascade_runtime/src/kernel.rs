//! The simulation kernel: two-phase event loop, engine slots, dataplane
//! fan-out, rebuild-and-recompile orchestration, and control operations.
//!
//! One dedicated runtime thread owns the kernel and every engine method.
//! Each logical step drains the active queue (evaluates), drains nonblocking
//! updates, runs end-of-step hooks, services interrupts, and advances
//! logical time. When the live program collapses to one clock and one
//! fully inlined logic engine, the whole step is replaced by a single
//! `open_loop` call with an adaptively tuned iteration target.

use crate::dataplane::DataPlane;
use crate::engine::Engine;
use crate::handle::RuntimeHandle;
use crate::ids::{EngineId, VId};
use crate::isolate::Isolate;
use crate::state::{load_state, save_state, DataWrite, VarMap};
use cascade_analyze::module_info::{assign_kind, enclosing_module};
use cascade_analyze::resolve::is_use_position;
use cascade_analyze::{module_info, walk_module, Evaluate, Resolve};
use cascade_ast::{Ast, Elaboration, IdPart, Node, NodeId};
use cascade_common::{Frequency, Uuid};
use cascade_diagnostics::{render, Severity};
use cascade_program::{inline_all, instance_full_name, Program};
use cascade_verilog_parser::{parse, Fragment};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One variable binding in a compile request: a declaration handle in the
/// request's AST clone, its global id, and its width.
#[derive(Debug, Clone, Copy)]
pub struct VarSpec {
    /// The declaration in the request's own AST.
    pub decl: NodeId,
    /// The global variable id.
    pub vid: VId,
    /// The declared width in bits.
    pub width: u32,
}

/// Everything a backend needs to compile one module instance.
pub struct CompileRequest {
    /// Request identity; abort requests are keyed by it.
    pub uuid: Uuid,
    /// Monotonic compile version; stale second-pass results are discarded.
    pub version: u64,
    /// A self-contained clone of the module, externals rewritten to
    /// synthetic `__vN` locals.
    pub ast: Ast,
    /// The module declaration root in `ast`.
    pub md: NodeId,
    /// The fully qualified instance name.
    pub inst_name: String,
    /// The `__std` annotation (`logic` when absent).
    pub std: String,
    /// The `__loc` annotation (`local` when absent).
    pub loc: String,
    /// The current march target.
    pub target: String,
    /// Input variables: delivered through `Core::read`.
    pub inputs: Vec<VarSpec>,
    /// Output variables: written through the interface on change.
    pub outputs: Vec<VarSpec>,
    /// Stateful variables: the get/set-state payload.
    pub state: Vec<VarSpec>,
    /// The reserved id of the initials-ran flag, carried as state so engine
    /// replacement and save/restart never re-run `initial` blocks.
    pub init_vid: VId,
}

/// The compiler coordinator as seen from the runtime.
///
/// Implemented by `cascade_target`; the indirection keeps the crate graph
/// acyclic while letting the runtime drive compilation.
pub trait EngineCompiler: Send + Sync {
    /// Synchronously compiles a first-pass engine and swaps it into the
    /// slot via `replace_with`; schedules a background second pass when the
    /// request's annotations ask for one. Returns `false` if no backend
    /// accepted the module (the slot keeps its stub).
    fn compile_and_replace(
        &self,
        kernel: &mut Kernel,
        slot: EngineId,
        req: CompileRequest,
    ) -> bool;

    /// Asks any in-flight compile for the given request id to give up.
    fn stop_compile(&self, uuid: &Uuid);

    /// Aborts everything and joins background passes.
    fn shutdown(&self);
}

/// One live engine slot.
pub struct RuntimeModule {
    /// The fully qualified instance name.
    pub name: String,
    /// The instantiation item in the program AST.
    pub inst: NodeId,
    /// The elaborated declaration in the program AST.
    pub decl: NodeId,
    /// The executing engine.
    pub engine: Engine,
    /// Input ids this engine is registered to read.
    pub inputs: Vec<VId>,
    /// Output ids this engine is registered to write.
    pub outputs: Vec<VId>,
    /// The clock output id, for clock engines.
    pub clock_vid: Option<VId>,
    /// The most recent compile request id for this slot.
    pub uuid: Uuid,
    /// The version of the engine currently installed.
    pub version: u64,
}

/// The standard-library march targets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum March {
    /// Root and clock only.
    Minimal,
    /// Root, clock, and the software led/pad/reset/gpio peripherals.
    Sw,
}

impl March {
    /// Parses a march name.
    pub fn from_name(name: &str) -> Option<March> {
        match name {
            "minimal" => Some(March::Minimal),
            "sw" => Some(March::Sw),
            _ => None,
        }
    }

    fn prelude(self) -> &'static str {
        match self {
            March::Minimal => MINIMAL_PRELUDE,
            March::Sw => SW_PRELUDE,
        }
    }
}

const MINIMAL_PRELUDE: &str = r#"
(*__std = "logic", __loc = "runtime"*) module Root(); endmodule
(*__std = "clock", __loc = "runtime"*) module Clock(val); output reg val; endmodule
Root root();
Clock clock();
"#;

const SW_PRELUDE: &str = r#"
(*__std = "logic", __loc = "runtime"*) module Root(); endmodule
(*__std = "clock", __loc = "runtime"*) module Clock(val); output reg val; endmodule
(*__std = "led", __loc = "runtime"*) module Led(val); input wire [7:0] val; endmodule
(*__std = "pad", __loc = "runtime"*) module Pad(val); output wire [3:0] val; endmodule
(*__std = "reset", __loc = "runtime"*) module Reset(val); output wire val; endmodule
(*__std = "gpio", __loc = "runtime"*) module Gpio(val); input wire [7:0] val; endmodule
Root root();
Clock clock();
Led led();
Pad pad();
Reset reset();
Gpio gpio();
"#;

/// Kernel construction options.
pub struct KernelOptions {
    /// The standard-library march.
    pub march: March,
    /// Include-directive search path.
    pub include_dirs: Vec<PathBuf>,
    /// Whether `logic` modules are inlined into their parents.
    pub enable_inlining: bool,
    /// The wall-clock goal for one open-loop batch.
    pub open_loop_target: Duration,
}

impl Default for KernelOptions {
    fn default() -> Self {
        Self {
            march: March::Minimal,
            include_dirs: Vec::new(),
            enable_inlining: true,
            open_loop_target: Duration::from_secs(1),
        }
    }
}

/// The simulation kernel.
pub struct Kernel {
    handle: Arc<RuntimeHandle>,
    compiler: Arc<dyn EngineCompiler>,
    program: Program,
    isolate: Isolate,
    dataplane: DataPlane,
    modules: Vec<Option<RuntimeModule>>,
    by_name: HashMap<String, EngineId>,
    sink: cascade_diagnostics::DiagnosticSink,
    include_dirs: Vec<PathBuf>,
    enable_inlining: bool,
    target: String,
    schedule_all: bool,
    finished: bool,
    cleanup_initials: bool,
    next_version: u64,
    open_loop_itrs: u64,
    open_loop_target: Duration,
    logical_time: u64,
    begin_time: Instant,
    last_time: Instant,
    last_logical_time: u64,
}

impl Kernel {
    /// Creates a kernel and evaluates the march prelude.
    pub fn new(
        handle: Arc<RuntimeHandle>,
        compiler: Arc<dyn EngineCompiler>,
        opts: KernelOptions,
    ) -> Self {
        let interner = Arc::new(cascade_common::Interner::new());
        let mut kernel = Self {
            handle,
            compiler,
            program: Program::new(interner),
            isolate: Isolate::new(),
            dataplane: DataPlane::new(),
            modules: Vec::new(),
            by_name: HashMap::new(),
            sink: cascade_diagnostics::DiagnosticSink::new(),
            include_dirs: opts.include_dirs,
            enable_inlining: opts.enable_inlining,
            target: String::from("sw"),
            schedule_all: false,
            finished: false,
            cleanup_initials: false,
            next_version: 0,
            open_loop_itrs: 1024,
            open_loop_target: opts.open_loop_target,
            logical_time: 0,
            begin_time: Instant::now(),
            last_time: Instant::now(),
            last_logical_time: 0,
        };
        kernel.eval_text(opts.march.prelude());
        kernel
    }

    /// The shared handle.
    pub fn handle(&self) -> &Arc<RuntimeHandle> {
        &self.handle
    }

    /// The program under simulation.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The logical simulation time.
    pub fn time(&self) -> u64 {
        self.logical_time
    }

    /// Whether `$finish` has been observed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The engine in a slot, for replacement interrupts.
    pub fn engine_mut(&mut self, slot: EngineId) -> Option<&mut Engine> {
        self.modules
            .get_mut(slot.index())?
            .as_mut()
            .map(|m| &mut m.engine)
    }

    /// Installs a second-pass engine if its version is still current.
    pub fn replace_engine(&mut self, slot: EngineId, engine: Engine, version: u64) {
        let Some(Some(module)) = self.modules.get_mut(slot.index()) else {
            return;
        };
        if version < module.version {
            // An out-of-order completion; a newer engine is already in.
            return;
        }
        module.engine.replace_with(engine);
        module.version = version;
        self.schedule_all = true;
    }

    // ========================================================================
    // Eval
    // ========================================================================

    /// Parses and evaluates a source fragment. Fragments following a failed
    /// eval are dropped; diagnostics render to the bound error streams. The
    /// engine set rebuilds only when the elaborated program changed.
    pub fn eval_text(&mut self, text: &str) -> bool {
        self.sink.clear();
        let frags = parse(text, &mut self.program.ast, &self.sink);
        let mut ok = !self.sink.has_errors();
        let mut changed = false;
        self.report(Some(text));
        if ok {
            for frag in frags {
                self.sink.clear();
                match frag {
                    Fragment::Decl(md) => {
                        ok = self.program.declare(md, &self.sink);
                    }
                    Fragment::Item(item) => {
                        ok = self.program.eval_item(item, &self.sink).is_ok();
                        changed |= ok;
                    }
                    Fragment::Include(path) => {
                        // Nested evals rebuild on their own when they change
                        // the program.
                        ok = self.eval_include(&path);
                    }
                }
                self.report(Some(text));
                if !ok {
                    break;
                }
            }
        }
        if changed {
            self.rebuild();
        }
        ok
    }

    fn eval_include(&mut self, path: &str) -> bool {
        let mut candidates = vec![PathBuf::from(path)];
        for dir in &self.include_dirs {
            candidates.push(dir.join(path));
        }
        for candidate in candidates {
            if let Ok(text) = std::fs::read_to_string(&candidate) {
                return self.eval_text(&text);
            }
        }
        self.handle
            .print_err(&format!("error: could not open include file {path}\n"));
        false
    }

    fn report(&self, source: Option<&str>) {
        for diag in self.sink.take_all() {
            let line = format!("{}\n", render(&diag, source));
            match diag.severity {
                Severity::Error => self.handle.print_err(&line),
                Severity::Warning => self.handle.print_warn(&line),
                Severity::Note => self.handle.print_info(&line),
            }
        }
    }

    // ========================================================================
    // Rebuild
    // ========================================================================

    /// Rebuilds the engine set: inlines `logic` modules, tears down dead
    /// slots, and (re)compiles an engine for every live instance.
    pub fn rebuild(&mut self) {
        if self.program.root_inst().is_none() {
            return;
        }
        if self.enable_inlining {
            inline_all(&mut self.program);
        }
        let live = self.live_instances();
        let live_names: HashSet<&str> = live.iter().map(|(n, _, _)| n.as_str()).collect();

        // Tear down engines whose instances were inlined away.
        for idx in 0..self.modules.len() {
            let dead = match &self.modules[idx] {
                Some(m) => !live_names.contains(m.name.as_str()),
                None => false,
            };
            if dead {
                self.dataplane.deregister_engine(EngineId(idx as u32));
                let m = self.modules[idx].take().expect("slot checked above");
                self.by_name.remove(&m.name);
            }
        }

        for (name, inst, decl) in live {
            let slot = match self.by_name.get(&name) {
                Some(&slot) => {
                    // A newer compile supersedes any in-flight one.
                    if let Some(Some(m)) = self.modules.get(slot.index()) {
                        self.compiler.stop_compile(&m.uuid);
                    }
                    slot
                }
                None => {
                    let slot = EngineId(self.modules.len() as u32);
                    self.modules.push(Some(RuntimeModule {
                        name: name.clone(),
                        inst,
                        decl,
                        engine: Engine::stub(),
                        inputs: Vec::new(),
                        outputs: Vec::new(),
                        clock_vid: None,
                        uuid: Uuid::generate(),
                        version: 0,
                    }));
                    self.by_name.insert(name.clone(), slot);
                    slot
                }
            };

            let req = self.prepare_compile(inst, decl, &name);
            self.rebind(slot, &req, inst, decl);
            let compiler = Arc::clone(&self.compiler);
            if !compiler.compile_and_replace(self, slot, req) {
                self.handle.print_err(&format!(
                    "error: no backend accepted {name}; the instance remains a stub\n"
                ));
            }
        }
        self.schedule_all = true;
        self.cleanup_initials = true;
    }

    /// Re-registers a slot's dataplane ids and bookkeeping for a request.
    fn rebind(&mut self, slot: EngineId, req: &CompileRequest, inst: NodeId, decl: NodeId) {
        let module = self.modules[slot.index()]
            .as_mut()
            .expect("rebind targets a live slot");
        for &vid in module.inputs.iter() {
            self.dataplane.unregister_reader(slot, vid);
        }
        for &vid in module.outputs.iter() {
            self.dataplane.unregister_writer(slot, vid);
        }
        module.inputs = req.inputs.iter().map(|v| v.vid).collect();
        module.outputs = req.outputs.iter().map(|v| v.vid).collect();
        module.clock_vid = if req.std == "clock" {
            req.outputs.first().map(|v| v.vid)
        } else {
            None
        };
        module.uuid = req.uuid;
        module.version = req.version;
        module.inst = inst;
        module.decl = decl;
        for vid in module.inputs.clone() {
            self.dataplane.register_reader(slot, vid);
        }
        for vid in module.outputs.clone() {
            self.dataplane.register_writer(slot, vid);
        }
    }

    /// The live instance list: the root plus every non-inlined child,
    /// depth first.
    fn live_instances(&self) -> Vec<(String, NodeId, NodeId)> {
        let mut out = Vec::new();
        let Some(root_inst) = self.program.root_inst() else {
            return out;
        };
        let mut stack = vec![root_inst];
        while let Some(inst) = stack.pop() {
            let Some(Elaboration::Instance(decl)) =
                self.program.ast.decor.elabs.get(&inst).cloned()
            else {
                continue;
            };
            out.push((instance_full_name(&self.program.ast, inst), inst, decl));
            let mut children = Vec::new();
            walk_module(&self.program.ast, decl, &mut |ast, node| {
                if node != inst
                    && matches!(ast.node(node), Node::ModuleInst { .. })
                    && ast.decor.elabs.contains_key(&node)
                {
                    children.push(node);
                }
            });
            stack.extend(children);
        }
        out
    }

    // ========================================================================
    // Compile request preparation
    // ========================================================================

    /// Builds a self-contained compile request for one instance: a clone of
    /// its declaration with every cross-module reference rewritten to a
    /// synthetic `__vN` local, plus the input/output/state id maps.
    fn prepare_compile(&mut self, inst: NodeId, decl: NodeId, name: &str) -> CompileRequest {
        self.next_version += 1;
        let version = self.next_version;
        let ast = &mut self.program.ast;
        let info = module_info(ast, decl);

        // (identifier, vid, width, engine-writes-it) for external references.
        let mut rewrites: Vec<(NodeId, VId, u32, bool)> = Vec::new();
        let mut refs = Vec::new();
        walk_module(ast, decl, &mut |ast, node| {
            if matches!(ast.node(node), Node::Identifier { .. }) && is_use_position(ast, node) {
                refs.push(node);
            }
        });
        for r in refs {
            let Some(target) = Resolve::new(ast).get_resolution(r) else {
                continue;
            };
            if enclosing_module(ast, target) == Some(decl) {
                continue;
            }
            let vid = vid_of(ast, &mut self.isolate, target);
            let width = Evaluate::new(ast).decl_width(target).unwrap_or(1);
            let writes = assign_kind(ast, r).is_some();
            rewrites.push((r, vid, width, writes));
        }

        // Ports.
        let mut inputs: Vec<(NodeId, VId, u32)> = Vec::new();
        let mut outputs: Vec<(NodeId, VId, u32)> = Vec::new();
        let mut state: Vec<(NodeId, VId, u32)> = Vec::new();
        for &p in &info.inputs {
            let vid = vid_of(ast, &mut self.isolate, p);
            let width = Evaluate::new(ast).decl_width(p).unwrap_or(1);
            inputs.push((p, vid, width));
        }
        for &p in &info.outputs {
            let vid = vid_of(ast, &mut self.isolate, p);
            let width = Evaluate::new(ast).decl_width(p).unwrap_or(1);
            outputs.push((p, vid, width));
        }
        for &s in &info.stateful {
            let vid = vid_of(ast, &mut self.isolate, s);
            let width = Evaluate::new(ast).decl_width(s).unwrap_or(1);
            state.push((s, vid, width));
        }

        // Locals referenced hierarchically by other modules.
        for &d in &info.locals {
            if info.inputs.contains(&d) || info.outputs.contains(&d) {
                continue;
            }
            let uses = Resolve::new(ast).uses(d);
            let mut read_elsewhere = false;
            let mut written_elsewhere = false;
            for u in uses {
                if enclosing_module(ast, u) == Some(decl) {
                    continue;
                }
                if assign_kind(ast, u).is_some() {
                    written_elsewhere = true;
                } else {
                    read_elsewhere = true;
                }
            }
            if read_elsewhere || written_elsewhere {
                let vid = vid_of(ast, &mut self.isolate, d);
                let width = Evaluate::new(ast).decl_width(d).unwrap_or(1);
                if read_elsewhere {
                    outputs.push((d, vid, width));
                }
                if written_elsewhere {
                    inputs.push((d, vid, width));
                }
            }
        }

        // Child port plumbing: the parent drives child inputs with the bound
        // expressions and adopts child outputs into the bound targets.
        // (vid, width, caller expr, child-input?)
        let mut plumbing: Vec<(VId, u32, NodeId, bool)> = Vec::new();
        for (&mi, conns) in &info.connections.clone() {
            let _ = mi;
            for &(port, expr) in conns {
                let vid = vid_of(ast, &mut self.isolate, port);
                let width = Evaluate::new(ast).decl_width(port).unwrap_or(1);
                let is_input = matches!(
                    ast.node(port),
                    Node::PortDecl {
                        dir: cascade_ast::PortDir::Input,
                        ..
                    }
                );
                plumbing.push((vid, width, expr, is_input));
            }
        }

        // Clone the declaration and rewrite in the clone.
        let (mut ast2, md2, map) = ast.extract_mapped(decl);
        let mut synth: HashMap<VId, (u32, bool, bool)> = HashMap::new(); // width, in, out
        for &(ident, vid, width, writes) in &rewrites {
            let new_ident = map[&ident];
            let name = ast2.interner().get_or_intern(&format!("__v{}", vid.0));
            if let Node::Identifier { path, .. } = ast2.node_mut(new_ident) {
                *path = vec![IdPart::plain(name)];
            }
            let entry = synth.entry(vid).or_insert((width, false, false));
            if writes {
                entry.2 = true;
            } else {
                entry.1 = true;
            }
        }
        for &(vid, width, expr, is_input) in &plumbing {
            let var = synth_ident(&mut ast2, vid);
            let expr2 = {
                let mapped = map[&expr];
                ast2.deep_clone(mapped)
            };
            let assign = if is_input {
                Node::ContAssign {
                    lhs: var,
                    rhs: expr2,
                }
            } else {
                Node::ContAssign {
                    lhs: expr2,
                    rhs: var,
                }
            };
            let item = ast2.alloc(assign, cascade_diagnostics::Span::DUMMY);
            ast2.add_item(md2, item);
            let entry = synth.entry(vid).or_insert((width, false, false));
            if is_input {
                entry.2 = true; // the parent writes the child's input
            } else {
                entry.1 = true; // the parent reads the child's output
            }
        }

        let mut req_inputs: Vec<VarSpec> = inputs
            .iter()
            .map(|&(d, vid, width)| VarSpec {
                decl: map[&d],
                vid,
                width,
            })
            .collect();
        let mut req_outputs: Vec<VarSpec> = outputs
            .iter()
            .map(|&(d, vid, width)| VarSpec {
                decl: map[&d],
                vid,
                width,
            })
            .collect();
        let req_state: Vec<VarSpec> = state
            .iter()
            .map(|&(d, vid, width)| VarSpec {
                decl: map[&d],
                vid,
                width,
            })
            .collect();

        // Materialize the synthetic declarations.
        let mut synth_sorted: Vec<(VId, (u32, bool, bool))> = synth.into_iter().collect();
        synth_sorted.sort_by_key(|(vid, _)| *vid);
        for (vid, (width, is_in, is_out)) in synth_sorted {
            let decl2 = synth_decl(&mut ast2, md2, vid, width);
            if is_in {
                req_inputs.push(VarSpec {
                    decl: decl2,
                    vid,
                    width,
                });
            }
            if is_out {
                req_outputs.push(VarSpec {
                    decl: decl2,
                    vid,
                    width,
                });
            }
        }

        // The ran-initials flag is keyed per compile version: it transfers
        // between same-source engines (first pass to second pass) but never
        // suppresses initials introduced by a later eval.
        let init_vid = self
            .isolate
            .vid(&format!("{name}.__ran_initial_v{version}"));
        CompileRequest {
            uuid: Uuid::generate(),
            version,
            std: ast2
                .attr_value(md2, "__std")
                .unwrap_or("logic")
                .to_string(),
            loc: ast2.attr_value(md2, "__loc").unwrap_or("local").to_string(),
            target: ast2
                .attr_value(md2, "__target")
                .unwrap_or(&self.target)
                .to_string(),
            ast: ast2,
            md: md2,
            inst_name: name.to_string(),
            inputs: req_inputs,
            outputs: req_outputs,
            state: req_state,
            init_vid,
        }
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Runs one logical simulation step (reference or open loop), then
    /// drains interrupts and advances time.
    pub fn step(&mut self) {
        if self.can_open_loop() {
            self.open_loop_scheduler();
        } else {
            self.reference_scheduler();
            self.logical_time += 1;
        }
        self.handle.set_time(self.logical_time);
        if self.cleanup_initials {
            // Every engine evaluated during this step, so every `initial`
            // currently in the program has executed; delete them so later
            // recompiles do not carry them.
            self.cleanup_initials = false;
            self.delete_executed_initials();
        }
        self.drain_interrupts();
    }

    /// Removes executed `initial` constructs from the elaborated program.
    fn delete_executed_initials(&mut self) {
        for (_, _, decl) in self.live_instances() {
            let mut doomed = Vec::new();
            walk_module(&self.program.ast, decl, &mut |ast, node| {
                if matches!(ast.node(node), Node::Initial { .. }) {
                    if let Some(container) = ast.parent(node) {
                        doomed.push((container, node));
                    }
                }
            });
            for (container, item) in doomed {
                self.program.ast.remove_item(container, item);
                self.program.ast.decor.invalidate_scope(container);
            }
        }
    }

    fn reference_scheduler(&mut self) {
        self.drain_active();
        while self.drain_updates() {
            self.drain_active();
        }
        self.done_step();
    }

    /// Repeatedly evaluates engines with pending reads until no engine has
    /// reads pending. Writes emitted by an evaluation are delivered before
    /// the next engine runs, so fan-out within a step is synchronous.
    fn drain_active(&mut self) {
        loop {
            let mut any = false;
            for idx in 0..self.modules.len() {
                let fire = match &self.modules[idx] {
                    Some(m) => m.engine.there_are_reads() || self.schedule_all,
                    None => false,
                };
                if fire {
                    if let Some(m) = self.modules[idx].as_mut() {
                        m.engine.evaluate();
                    }
                    any = true;
                    self.flush_writes();
                }
            }
            self.schedule_all = false;
            if !any {
                break;
            }
        }
    }

    /// Repeatedly services nonblocking updates until a full pass produces
    /// no work; returns whether any update re-raised reads.
    fn drain_updates(&mut self) -> bool {
        loop {
            let mut any = false;
            for idx in 0..self.modules.len() {
                let updated = match self.modules[idx].as_mut() {
                    Some(m) => m.engine.conditional_update(),
                    None => false,
                };
                if updated {
                    any = true;
                    self.flush_writes();
                }
            }
            if !any {
                break;
            }
        }
        self.modules
            .iter()
            .flatten()
            .any(|m| m.engine.there_are_reads())
    }

    fn done_step(&mut self) {
        for idx in 0..self.modules.len() {
            if let Some(m) = self.modules[idx].as_mut() {
                if m.engine.overrides_done_step() {
                    m.engine.done_step();
                }
            }
        }
        self.flush_writes();
    }

    fn done_simulation(&mut self) {
        for idx in 0..self.modules.len() {
            if let Some(m) = self.modules[idx].as_mut() {
                if m.engine.overrides_done_simulation() {
                    m.engine.done_simulation();
                }
            }
        }
    }

    /// Flushes buffered interface writes through the dataplane: deduped
    /// values fan out to every registered reader, in write order.
    fn flush_writes(&mut self) {
        for write in self.handle.take_writes() {
            let (id, deliver) = match write {
                DataWrite::Bits(id, bits) => (id, self.dataplane.buffer_bits(id, &bits)),
                DataWrite::Bool(id, val) => (id, self.dataplane.buffer_bool(id, val)),
            };
            if deliver {
                let bits = self
                    .dataplane
                    .buffered(id)
                    .cloned()
                    .expect("buffered after a delivering write");
                for reader in self.dataplane.readers(id).to_vec() {
                    if let Some(m) = self.modules[reader.index()].as_mut() {
                        m.engine.read(id, &bits);
                    }
                }
            }
        }
    }

    /// Pops and runs every queued interrupt; handlers scheduling further
    /// interrupts extend the same drain.
    pub fn drain_interrupts(&mut self) {
        loop {
            let batch = self.handle.take_interrupts();
            if batch.is_empty() {
                break;
            }
            for int in batch {
                int(self);
            }
        }
    }

    // ========================================================================
    // Open-loop fast path
    // ========================================================================

    fn open_loop_pair(&self) -> Option<(EngineId, EngineId)> {
        let mut clock = None;
        let mut logic = None;
        let mut others = 0;
        for (idx, m) in self.modules.iter().enumerate() {
            let Some(m) = m else { continue };
            if m.engine.is_stub() {
                continue;
            }
            if m.engine.is_clock() && m.clock_vid.is_some() {
                if clock.replace(EngineId(idx as u32)).is_some() {
                    return None;
                }
            } else if m.engine.is_logic() {
                if logic.replace(EngineId(idx as u32)).is_some() {
                    return None;
                }
            } else {
                others += 1;
            }
        }
        if others > 0 {
            return None;
        }
        Some((clock?, logic?))
    }

    fn can_open_loop(&self) -> bool {
        if self.open_loop_target.is_zero() {
            return false;
        }
        !self.schedule_all && !self.handle.has_interrupts() && self.open_loop_pair().is_some()
    }

    fn open_loop_scheduler(&mut self) {
        let Some((clock, logic)) = self.open_loop_pair() else {
            return;
        };
        let vid = self.modules[clock.index()]
            .as_ref()
            .and_then(|m| m.clock_vid)
            .expect("open-loop clock has an output id");
        let val = self.modules[clock.index()]
            .as_ref()
            .map(|m| m.engine.get_bit(vid))
            .unwrap_or(false);
        let budget = self.open_loop_itrs;
        let started = Instant::now();
        let itrs = match self.modules[logic.index()].as_mut() {
            Some(m) => m.engine.open_loop(vid, val, budget),
            None => 0,
        };
        if itrs == 0 {
            // The core declined; fall back to the reference schedule.
            self.reference_scheduler();
            self.logical_time += 1;
            return;
        }
        // Keep the clock's state and the dataplane's dedup buffer consistent
        // with the iterations consumed; the logic engine saw every toggle
        // internally, so nothing is delivered.
        let final_val = val ^ (itrs % 2 == 1);
        if let Some(m) = self.modules[clock.index()].as_mut() {
            m.engine.set_bit(vid, final_val);
        }
        self.dataplane
            .buffer_bits(vid, &cascade_common::Bits::from_bool(final_val));
        self.flush_writes();
        self.logical_time += itrs;

        // Tune the batch size toward the wall-clock goal.
        let elapsed = started.elapsed();
        if itrs == budget && elapsed < self.open_loop_target {
            self.open_loop_itrs = self.open_loop_itrs.saturating_mul(2);
        } else if elapsed > self.open_loop_target {
            self.open_loop_itrs = (self.open_loop_itrs / 2).max(1);
        }
    }

    // ========================================================================
    // Control operations (run as state-safe interrupts)
    // ========================================================================

    /// `$finish`: requests a clean shutdown; a nonzero code also reports
    /// simulation statistics.
    pub fn finish(&mut self, code: u32) {
        if code > 0 {
            let line = format!(
                "simulation finished after {} steps at {}\n",
                self.logical_time,
                self.overall_frequency()
            );
            self.handle.print_info(&line);
        }
        self.finished = true;
        self.handle.request_stop();
    }

    /// An in-memory snapshot of every live engine's state.
    pub fn state_snapshot(&self) -> VarMap {
        let mut all = VarMap::new();
        for m in self.modules.iter().flatten() {
            all.extend(m.engine.get_state());
        }
        all
    }

    /// `$save`: snapshots every live engine's state to a file.
    pub fn save(&mut self, path: &str) {
        let all = self.state_snapshot();
        match File::create(path) {
            Ok(mut f) => {
                if let Err(e) = save_state(&mut f, &all) {
                    self.handle.print_err(&format!("error: save failed: {e}\n"));
                }
            }
            Err(e) => self
                .handle
                .print_err(&format!("error: could not create {path}: {e}\n")),
        }
    }

    /// `$restart`: reloads a snapshot, resyncs every engine, and reruns
    /// evaluation from the restored state.
    pub fn restart(&mut self, path: &str) {
        let state = match File::open(path) {
            Ok(mut f) => match load_state(&mut f) {
                Ok(s) => s,
                Err(e) => {
                    self.handle
                        .print_err(&format!("error: bad saved state: {e}\n"));
                    return;
                }
            },
            Err(e) => {
                self.handle
                    .print_err(&format!("error: could not open {path}: {e}\n"));
                return;
            }
        };
        for idx in 0..self.modules.len() {
            if let Some(m) = self.modules[idx].as_mut() {
                m.engine.set_state(&state);
                m.engine.resync();
            }
        }
        self.schedule_all = true;
    }

    /// `$retarget`: switches the march target and recompiles every engine
    /// through the standard compile-and-replace path.
    pub fn retarget(&mut self, target: &str) {
        self.target = target.to_string();
        self.rebuild();
    }

    // ========================================================================
    // Run loop and profiling
    // ========================================================================

    /// Runs the simulation loop until a stop is requested, then completes
    /// pending interrupts and end-of-simulation hooks.
    pub fn run(&mut self) {
        self.begin_time = Instant::now();
        self.last_time = self.begin_time;
        self.last_logical_time = self.logical_time;
        while !self.handle.stop_requested() {
            if self.idle() {
                self.handle.wait_for_interrupt(Duration::from_millis(10));
                self.drain_interrupts();
                continue;
            }
            self.step();
        }
        self.drain_interrupts();
        self.done_simulation();
        // Join background compiles; any late replacement interrupts they
        // posted are disposed of by one final drain.
        let compiler = Arc::clone(&self.compiler);
        compiler.shutdown();
        self.drain_interrupts();
    }

    fn idle(&self) -> bool {
        if self.schedule_all || self.handle.has_interrupts() {
            return false;
        }
        self.modules.iter().flatten().all(|m| {
            !m.engine.there_are_reads()
                && !m.engine.there_are_updates()
                && !m.engine.overrides_done_step()
        })
    }

    /// The rate of the simulation loop since the last sample.
    pub fn current_frequency(&mut self) -> Frequency {
        let now = Instant::now();
        let steps = self.logical_time - self.last_logical_time;
        let secs = now.duration_since(self.last_time).as_secs_f64();
        self.last_time = now;
        self.last_logical_time = self.logical_time;
        Frequency::from_rate(steps, secs)
    }

    /// The overall rate of the simulation loop.
    pub fn overall_frequency(&self) -> Frequency {
        let secs = self.begin_time.elapsed().as_secs_f64();
        Frequency::from_rate(self.logical_time, secs)
    }
}

/// The global id of a declaration, from its fully qualified name.
fn vid_of(ast: &mut Ast, isolate: &mut Isolate, decl: NodeId) -> VId {
    let full = Resolve::new(ast)
        .full_name(decl)
        .unwrap_or_else(|| format!("__anon{}", decl.as_raw()));
    isolate.vid(&full)
}

fn synth_ident(ast: &mut Ast, vid: VId) -> NodeId {
    ast.new_ident(&format!("__v{}", vid.0))
}

/// Adds a synthetic `reg [w-1:0] __vN;` backing an external reference.
fn synth_decl(ast: &mut Ast, md: NodeId, vid: VId, width: u32) -> NodeId {
    use cascade_common::Bits;
    use cascade_diagnostics::Span;
    let name = synth_ident(ast, vid);
    let range = if width > 1 {
        let msb = ast.alloc(
            Node::Number {
                val: Bits::new(32, (width - 1) as u64),
            },
            Span::DUMMY,
        );
        let lsb = ast.alloc(
            Node::Number {
                val: Bits::new(32, 0),
            },
            Span::DUMMY,
        );
        Some(ast.alloc(Node::Range { msb, lsb }, Span::DUMMY))
    } else {
        None
    };
    let decl = ast.alloc(
        Node::RegDecl {
            name,
            signed: false,
            range,
            arrays: Vec::new(),
            init: None,
        },
        Span::DUMMY,
    );
    ast.add_item(md, decl);
    decl
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A coordinator that installs stubs for everything; kernel plumbing can
    /// be exercised without the real backends.
    struct StubCompiler;

    impl EngineCompiler for StubCompiler {
        fn compile_and_replace(
            &self,
            kernel: &mut Kernel,
            slot: EngineId,
            req: CompileRequest,
        ) -> bool {
            let _ = req;
            if let Some(e) = kernel.engine_mut(slot) {
                e.replace_with(Engine::stub());
            }
            true
        }
        fn stop_compile(&self, _uuid: &Uuid) {}
        fn shutdown(&self) {}
    }

    fn kernel() -> Kernel {
        Kernel::new(
            Arc::new(RuntimeHandle::new()),
            Arc::new(StubCompiler),
            KernelOptions::default(),
        )
    }

    #[test]
    fn prelude_declares_root_and_clock() {
        let k = kernel();
        assert!(k.program.elab("root").is_some());
        assert!(k.program.elab("root.clock").is_some());
    }

    #[test]
    fn eval_failure_reports_and_recovers() {
        let mut k = kernel();
        assert!(!k.eval_text("wire w = ghost;"));
        assert!(k.eval_text("wire w = 1;"));
    }

    #[test]
    fn declare_then_instantiate_then_duplicate() {
        let mut k = kernel();
        assert!(k.eval_text("module foo(); wire w; endmodule"));
        assert!(k.eval_text("foo f();"));
        assert!(!k.eval_text("foo f();"));
    }

    #[test]
    fn interrupts_drain_in_fifo_order() {
        let mut k = kernel();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            k.handle
                .schedule_interrupt(Box::new(move |_| log.lock().unwrap().push(i)));
        }
        k.drain_interrupts();
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn interrupt_scheduling_interrupt_runs_in_same_drain() {
        let mut k = kernel();
        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let hit2 = Arc::clone(&hit);
        let handle = Arc::clone(&k.handle);
        k.handle.schedule_interrupt(Box::new(move |_| {
            handle.schedule_interrupt(Box::new(move |_| {
                hit2.store(true, std::sync::atomic::Ordering::SeqCst);
            }));
        }));
        k.drain_interrupts();
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn step_advances_logical_time() {
        let mut k = kernel();
        let t0 = k.time();
        k.step();
        assert_eq!(k.time(), t0 + 1);
    }

    #[test]
    fn finish_requests_stop() {
        let mut k = kernel();
        k.finish(0);
        assert!(k.is_finished());
        assert!(k.handle.stop_requested());
    }
}
