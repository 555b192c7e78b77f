//! The worker runtime: serves the wire protocol for a coordinating runtime.
//!
//! A worker listens on TCP, registers connections, compiles COMPILE
//! payloads (Verilog source text plus variable-id bindings) with its own
//! software backends, and services engine RPCs against the results. Core
//! side effects stream back to the coordinator as interface callbacks
//! terminated by `OKAY`; stream system tasks block on inline replies so
//! remote file I/O shares the coordinator's stream table.

use crate::rpc::{self, debug_kind, msg, RpcError};
use crate::sw::{SwClock, SwInputPeripheral, SwLogic, SwOutputPeripheral};
use cascade_analyze::{Elaborate, Navigate};
use cascade_ast::{Ast, Node, NodeId};
use cascade_common::{Bits, Interner, Uuid};
use cascade_diagnostics::DiagnosticSink;
use cascade_runtime::{CompileRequest, Engine, Interface, SId, VarSpec, VId};
use cascade_verilog_parser::{parse, Fragment};
use std::collections::HashMap;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

/// A worker runtime bound to an address.
pub struct Worker {
    addr: String,
}

impl Worker {
    /// Creates a worker that will listen on `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Binds and serves connections until the listener fails. Each
    /// connection runs on its own thread.
    pub fn run(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.addr)?;
        Self::serve_listener(listener)
    }

    /// Serves an already-bound listener (tests bind to an ephemeral port).
    pub fn serve_listener(listener: TcpListener) -> std::io::Result<()> {
        for stream in listener.incoming() {
            let stream = stream?;
            std::thread::Builder::new()
                .name("cascade-worker-conn".into())
                .spawn(move || {
                    let _ = serve(stream);
                })?;
        }
        Ok(())
    }
}

fn serve(stream: TcpStream) -> Result<(), RpcError> {
    let stream = Arc::new(Mutex::new(stream));
    let mut engines: HashMap<u32, Engine> = HashMap::new();
    let mut next_engine = 1u32;

    loop {
        let header = {
            let mut s = stream.lock().unwrap();
            rpc::read_header(&mut *s)?
        };
        match header.ty {
            msg::REGISTER_CONNECTION => {
                reply_okay(&stream, 1)?;
            }
            msg::TEARDOWN_CONNECTION => {
                reply_okay(&stream, header.id)?;
                return Ok(());
            }
            msg::ABORT => {
                let mut s = stream.lock().unwrap();
                let mut uuid = [0u8; 16];
                use std::io::Read;
                s.read_exact(&mut uuid)?;
                rpc::write_header(&mut *s, msg::OKAY, header.id)?;
                s.flush()?;
            }
            msg::COMPILE => {
                let eid = next_engine;
                match compile_remote(&stream, eid) {
                    Ok(engine) => {
                        engines.insert(eid, engine);
                        next_engine += 1;
                        reply_okay(&stream, eid)?;
                    }
                    Err(why) => {
                        let mut s = stream.lock().unwrap();
                        rpc::write_header(&mut *s, msg::FAIL, 0)?;
                        rpc::write_string(&mut *s, &why)?;
                        s.flush()?;
                    }
                }
            }
            msg::TEARDOWN_ENGINE => {
                engines.remove(&header.id);
                reply_okay(&stream, header.id)?;
            }
            msg::GET_STATE => {
                let state = engines
                    .get(&header.id)
                    .map(|e| e.get_state())
                    .unwrap_or_default();
                let mut s = stream.lock().unwrap();
                rpc::write_header(&mut *s, msg::OKAY, header.id)?;
                rpc::write_varmap(&mut *s, &state)?;
                s.flush()?;
            }
            msg::SET_STATE => {
                let state = {
                    let mut s = stream.lock().unwrap();
                    rpc::read_varmap(&mut *s)?
                };
                if let Some(e) = engines.get_mut(&header.id) {
                    e.set_state(&state);
                }
                reply_okay(&stream, header.id)?;
            }
            msg::GET_INPUT => {
                let input = engines
                    .get(&header.id)
                    .map(|e| e.get_input())
                    .unwrap_or_default();
                let mut s = stream.lock().unwrap();
                rpc::write_header(&mut *s, msg::OKAY, header.id)?;
                rpc::write_varmap(&mut *s, &input)?;
                s.flush()?;
            }
            msg::SET_INPUT => {
                let input = {
                    let mut s = stream.lock().unwrap();
                    rpc::read_varmap(&mut *s)?
                };
                if let Some(e) = engines.get_mut(&header.id) {
                    e.set_input(&input);
                }
                reply_okay(&stream, header.id)?;
            }
            msg::FINALIZE => {
                if let Some(e) = engines.get_mut(&header.id) {
                    e.resync();
                }
                reply_okay(&stream, header.id)?;
            }
            msg::OVERRIDES_DONE_STEP => {
                let flag = engines
                    .get(&header.id)
                    .map(|e| e.overrides_done_step())
                    .unwrap_or(false);
                reply_flag(&stream, header.id, flag)?;
            }
            msg::DONE_STEP => {
                if let Some(e) = engines.get_mut(&header.id) {
                    e.done_step();
                }
                reply_okay(&stream, header.id)?;
            }
            msg::OVERRIDES_DONE_SIMULATION => {
                let flag = engines
                    .get(&header.id)
                    .map(|e| e.overrides_done_simulation())
                    .unwrap_or(false);
                reply_flag(&stream, header.id, flag)?;
            }
            msg::DONE_SIMULATION => {
                if let Some(e) = engines.get_mut(&header.id) {
                    e.done_simulation();
                }
                reply_okay(&stream, header.id)?;
            }
            msg::READ => {
                let (vid, bits) = {
                    let mut s = stream.lock().unwrap();
                    let vid = VId(rpc::read_u32(&mut *s)?);
                    let bits = rpc::read_bits(&mut *s)?;
                    (vid, bits)
                };
                if let Some(e) = engines.get_mut(&header.id) {
                    e.read(vid, &bits);
                }
            }
            msg::EVALUATE => {
                if let Some(e) = engines.get_mut(&header.id) {
                    e.evaluate();
                }
                reply_okay(&stream, header.id)?;
            }
            msg::THERE_ARE_UPDATES => {
                let flag = engines
                    .get(&header.id)
                    .map(|e| e.there_are_updates())
                    .unwrap_or(false);
                reply_flag(&stream, header.id, flag)?;
            }
            msg::UPDATE => {
                if let Some(e) = engines.get_mut(&header.id) {
                    e.update();
                }
                reply_okay(&stream, header.id)?;
            }
            msg::THERE_WERE_TASKS => {
                let flag = engines
                    .get(&header.id)
                    .map(|e| e.there_were_tasks())
                    .unwrap_or(false);
                reply_flag(&stream, header.id, flag)?;
            }
            msg::CONDITIONAL_UPDATE => {
                let did = engines
                    .get_mut(&header.id)
                    .map(|e| e.conditional_update())
                    .unwrap_or(false);
                reply_flag(&stream, header.id, did)?;
            }
            msg::OPEN_LOOP => {
                let (clk, val, itrs) = {
                    let mut s = stream.lock().unwrap();
                    let clk = VId(rpc::read_u32(&mut *s)?);
                    let val = rpc::read_u8(&mut *s)? != 0;
                    let itrs = rpc::read_u64(&mut *s)?;
                    (clk, val, itrs)
                };
                let consumed = engines
                    .get_mut(&header.id)
                    .map(|e| e.open_loop(clk, val, itrs))
                    .unwrap_or(0);
                let mut s = stream.lock().unwrap();
                rpc::write_header(&mut *s, msg::OKAY, header.id)?;
                rpc::write_u64(&mut *s, consumed)?;
                s.flush()?;
            }
            other => {
                let mut s = stream.lock().unwrap();
                rpc::write_header(&mut *s, msg::FAIL, header.id)?;
                rpc::write_string(&mut *s, &format!("unknown request type {other}"))?;
                s.flush()?;
            }
        }
    }
}

fn reply_okay(stream: &Arc<Mutex<TcpStream>>, id: u32) -> Result<(), RpcError> {
    let mut s = stream.lock().unwrap();
    rpc::write_header(&mut *s, msg::OKAY, id)?;
    s.flush()?;
    Ok(())
}

fn reply_flag(stream: &Arc<Mutex<TcpStream>>, id: u32, flag: bool) -> Result<(), RpcError> {
    let mut s = stream.lock().unwrap();
    rpc::write_header(&mut *s, msg::OKAY, id)?;
    rpc::write_u8(&mut *s, flag as u8)?;
    s.flush()?;
    Ok(())
}

/// Reads a COMPILE payload and builds a local engine for it.
fn compile_remote(stream: &Arc<Mutex<TcpStream>>, eid: u32) -> Result<Engine, String> {
    let (version, inst_name, std, target, init_vid, source, var_specs) = {
        let mut s = stream.lock().unwrap();
        let r = &mut *s;
        (|| -> Result<_, RpcError> {
            let version = rpc::read_u64(r)?;
            let inst_name = rpc::read_string(r)?;
            let std = rpc::read_string(r)?;
            let target = rpc::read_string(r)?;
            let init_vid = VId(rpc::read_u32(r)?);
            let source = rpc::read_string(r)?;
            let mut groups = Vec::new();
            for _ in 0..3 {
                let n = rpc::read_u32(r)?;
                let mut specs = Vec::new();
                for _ in 0..n {
                    let name = rpc::read_string(r)?;
                    let vid = VId(rpc::read_u32(r)?);
                    let width = rpc::read_u32(r)?;
                    specs.push((name, vid, width));
                }
                groups.push(specs);
            }
            Ok((version, inst_name, std, target, init_vid, source, groups))
        })()
        .map_err(|e| e.to_string())?
    };

    let interner = Arc::new(Interner::new());
    let mut ast = Ast::new(Arc::clone(&interner));
    let sink = DiagnosticSink::new();
    let frags = parse(&source, &mut ast, &sink);
    if sink.has_errors() {
        let why: Vec<String> = sink.take_all().into_iter().map(|d| d.message).collect();
        return Err(format!("parse failed: {}", why.join("; ")));
    }
    let Some(Fragment::Decl(md)) = frags.into_iter().next() else {
        return Err("expected a module declaration".into());
    };
    elaborate_generates(&mut ast, md)?;

    let mut resolve_specs = |specs: &[(String, VId, u32)]| -> Result<Vec<VarSpec>, String> {
        specs
            .iter()
            .map(|(name, vid, width)| {
                let decl = resolve_path(&mut ast, md, name)
                    .ok_or_else(|| format!("no declaration named {name}"))?;
                Ok(VarSpec {
                    decl,
                    vid: *vid,
                    width: *width,
                })
            })
            .collect()
    };
    let inputs = resolve_specs(&var_specs[0])?;
    let outputs = resolve_specs(&var_specs[1])?;
    let state = resolve_specs(&var_specs[2])?;

    let iface: Arc<dyn Interface> = Arc::new(RemoteInterface {
        stream: Arc::clone(stream),
        eid,
    });
    let req = CompileRequest {
        uuid: Uuid::generate(),
        version,
        ast,
        md,
        inst_name,
        std: std.clone(),
        loc: "local".into(),
        target,
        inputs,
        outputs,
        state,
        init_vid,
    };
    let core: Box<dyn cascade_runtime::Core> = match std.as_str() {
        "clock" => {
            let out = req.outputs.first().ok_or("clock without an output")?;
            Box::new(SwClock::new(Arc::clone(&iface), out.vid))
        }
        "led" | "gpio" => {
            let input = req.inputs.first().ok_or("peripheral without an input")?;
            let label = if std == "led" { "led" } else { "gpio" };
            Box::new(SwInputPeripheral::new(
                Arc::clone(&iface),
                label,
                input.vid,
                input.width,
            ))
        }
        "pad" | "reset" => {
            let out = req.outputs.first().ok_or("peripheral without an output")?;
            Box::new(SwOutputPeripheral::new(
                Arc::clone(&iface),
                out.vid,
                out.width,
            ))
        }
        _ => Box::new(SwLogic::new(req, Arc::clone(&iface))),
    };
    Ok(Engine::new(core, iface))
}

/// Re-expands the generate constructs in a freshly parsed module; the
/// shipped source was printed from an elaborated clone, so every condition
/// is constant.
fn elaborate_generates(ast: &mut Ast, md: NodeId) -> Result<(), String> {
    let mut queue = Vec::new();
    collect_generates(ast, md, &mut queue);
    while let Some(gen) = queue.pop() {
        let produced: Vec<NodeId> = match ast.node(gen).clone() {
            Node::IfGenerate { .. } => Elaborate::new(ast)
                .elaborate_if(gen)
                .map_err(|e| e.to_string())?
                .into_iter()
                .collect(),
            Node::CaseGenerate { .. } => Elaborate::new(ast)
                .elaborate_case(gen)
                .map_err(|e| e.to_string())?
                .into_iter()
                .collect(),
            Node::LoopGenerate { .. } => Elaborate::new(ast)
                .elaborate_loop(gen)
                .map_err(|e| e.to_string())?,
            _ => Vec::new(),
        };
        for block in produced {
            collect_generates(ast, block, &mut queue);
        }
    }
    Ok(())
}

fn collect_generates(ast: &Ast, root: NodeId, out: &mut Vec<NodeId>) {
    match ast.node(root) {
        Node::IfGenerate { .. } | Node::CaseGenerate { .. } | Node::LoopGenerate { .. } => {
            if !ast.decor.elabs.contains_key(&root) {
                out.push(root);
            }
        }
        _ => {
            for child in ast.children(root) {
                collect_generates(ast, child, out);
            }
        }
    }
}

/// Resolves a dotted, possibly subscripted path (`blk[2].t`) relative to a
/// module scope.
fn resolve_path(ast: &mut Ast, md: NodeId, path: &str) -> Option<NodeId> {
    let segs: Vec<(cascade_common::Ident, Option<i64>)> = path
        .split('.')
        .map(|seg| {
            let (name, sel) = split_subscript(seg)?;
            Some((ast.interner().get_or_intern(&name), sel))
        })
        .collect::<Option<Vec<_>>>()?;
    if segs.is_empty() {
        return None;
    }
    let mut nav = Navigate::at(ast, md);
    for &(name, sel) in &segs[..segs.len() - 1] {
        if !nav.down(name, sel) {
            return None;
        }
    }
    nav.find_name(segs[segs.len() - 1].0)
}

fn split_subscript(seg: &str) -> Option<(String, Option<i64>)> {
    match seg.split_once('[') {
        Some((name, rest)) => {
            let idx = rest.strip_suffix(']')?.parse::<i64>().ok()?;
            Some((name.to_string(), Some(idx)))
        }
        None => Some((seg.to_string(), None)),
    }
}

/// The worker-side interface: forwards side effects to the coordinator as
/// callbacks on the connection's socket.
struct RemoteInterface {
    stream: Arc<Mutex<TcpStream>>,
    eid: u32,
}

impl RemoteInterface {
    fn send(&self, f: impl FnOnce(&mut TcpStream) -> Result<(), RpcError>) {
        let mut s = self.stream.lock().unwrap();
        let _ = f(&mut s).and_then(|()| Ok(s.flush()?));
    }

    fn send_debug(&self, kind: u8, text: &str) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, msg::DEBUG, eid)?;
            rpc::write_u8(s, kind)?;
            rpc::write_string(s, text)?;
            Ok(())
        });
    }

    fn send_path(&self, ty: u8, path: &str) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, ty, eid)?;
            rpc::write_string(s, path)?;
            Ok(())
        });
    }

    /// A stream request with an inline `OKAY + i64` reply.
    fn stream_query(&self, f: impl FnOnce(&mut TcpStream) -> Result<(), RpcError>) -> i64 {
        let mut s = self.stream.lock().unwrap();
        let out = (|| -> Result<i64, RpcError> {
            f(&mut s)?;
            s.flush()?;
            let header = rpc::read_header(&mut *s)?;
            if header.ty != msg::OKAY {
                return Err(RpcError::Protocol("expected OKAY".into()));
            }
            Ok(rpc::read_i64(&mut *s)?)
        })();
        out.unwrap_or(-1)
    }
}

impl Interface for RemoteInterface {
    fn write_bits(&self, id: VId, bits: &Bits) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, msg::WRITE_BITS, eid)?;
            rpc::write_u32(s, id.0)?;
            rpc::write_bits(s, bits)?;
            Ok(())
        });
    }

    fn write_bool(&self, id: VId, val: bool) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, msg::WRITE_BOOL, eid)?;
            rpc::write_u32(s, id.0)?;
            rpc::write_u8(s, val as u8)?;
            Ok(())
        });
    }

    fn display(&self, text: &str) {
        self.send_debug(debug_kind::DISPLAY, text);
    }

    fn write_text(&self, text: &str) {
        self.send_debug(debug_kind::WRITE, text);
    }

    fn finish(&self, code: u32) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, msg::FINISH, eid)?;
            rpc::write_u32(s, code)?;
            Ok(())
        });
    }

    fn error(&self, text: &str) {
        self.send_debug(debug_kind::ERROR, text);
    }

    fn warning(&self, text: &str) {
        self.send_debug(debug_kind::WARNING, text);
    }

    fn info(&self, text: &str) {
        self.send_debug(debug_kind::INFO, text);
    }

    fn restart(&self, path: &str) {
        self.send_path(msg::RESTART, path);
    }

    fn retarget(&self, target: &str) {
        self.send_path(msg::RETARGET, target);
    }

    fn save(&self, path: &str) {
        self.send_path(msg::SAVE, path);
    }

    fn fopen(&self, path: &str) -> SId {
        let mut s = self.stream.lock().unwrap();
        let out = (|| -> Result<u32, RpcError> {
            rpc::write_header(&mut *s, msg::FOPEN, self.eid)?;
            rpc::write_string(&mut *s, path)?;
            s.flush()?;
            let header = rpc::read_header(&mut *s)?;
            if header.ty != msg::OKAY {
                return Err(RpcError::Protocol("expected OKAY".into()));
            }
            Ok(header.id)
        })();
        SId(out.unwrap_or(0))
    }

    fn sbumpc(&self, id: SId) -> i32 {
        let eid = self.eid;
        self.stream_query(move |s| {
            rpc::write_header(s, msg::SBUMPC, eid)?;
            rpc::write_u32(s, id.0)?;
            Ok(())
        }) as i32
    }

    fn sgetc(&self, id: SId) -> i32 {
        let eid = self.eid;
        self.stream_query(move |s| {
            rpc::write_header(s, msg::SGETC, eid)?;
            rpc::write_u32(s, id.0)?;
            Ok(())
        }) as i32
    }

    fn sgetn(&self, id: SId, n: usize) -> Vec<u8> {
        let mut s = self.stream.lock().unwrap();
        let out = (|| -> Result<Vec<u8>, RpcError> {
            rpc::write_header(&mut *s, msg::SGETN, self.eid)?;
            rpc::write_u32(&mut *s, id.0)?;
            rpc::write_u32(&mut *s, n as u32)?;
            s.flush()?;
            let header = rpc::read_header(&mut *s)?;
            if header.ty != msg::OKAY {
                return Err(RpcError::Protocol("expected OKAY".into()));
            }
            Ok(rpc::read_bytes(&mut *s)?)
        })();
        out.unwrap_or_default()
    }

    fn sputc(&self, id: SId, c: u8) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, msg::SPUTC, eid)?;
            rpc::write_u32(s, id.0)?;
            rpc::write_u8(s, c)?;
            Ok(())
        });
    }

    fn sputn(&self, id: SId, data: &[u8]) {
        let eid = self.eid;
        self.send(|s| {
            rpc::write_header(s, msg::SPUTN, eid)?;
            rpc::write_u32(s, id.0)?;
            rpc::write_bytes(s, data)?;
            Ok(())
        });
    }

    fn pubseekoff(&self, id: SId, off: i64, read: bool) -> i64 {
        let eid = self.eid;
        self.stream_query(move |s| {
            rpc::write_header(s, msg::PUBSEEKOFF, eid)?;
            rpc::write_u32(s, id.0)?;
            rpc::write_i64(s, off)?;
            rpc::write_u8(s, read as u8)?;
            Ok(())
        })
    }

    fn pubseekpos(&self, id: SId, pos: i64, read: bool) -> i64 {
        let eid = self.eid;
        self.stream_query(move |s| {
            rpc::write_header(s, msg::PUBSEEKPOS, eid)?;
            rpc::write_u32(s, id.0)?;
            rpc::write_i64(s, pos)?;
            rpc::write_u8(s, read as u8)?;
            Ok(())
        })
    }

    fn pubsync(&self, id: SId) -> i32 {
        let eid = self.eid;
        self.stream_query(move |s| {
            rpc::write_header(s, msg::PUBSYNC, eid)?;
            rpc::write_u32(s, id.0)?;
            Ok(())
        }) as i32
    }

    fn in_avail(&self, id: SId) -> i64 {
        let eid = self.eid;
        self.stream_query(move |s| {
            rpc::write_header(s, msg::IN_AVAIL, eid)?;
            rpc::write_u32(s, id.0)?;
            Ok(())
        })
    }
}
