//! The proxy backend: cores whose computation runs in a worker runtime.
//!
//! A [`ProxyCompiler`] keeps one registered connection per worker location
//! and ships module source text over the wire; the resulting [`ProxyCore`]
//! forwards every core method as an RPC, replaying the streamed interface
//! callbacks into the local interface until the `OKAY` sentinel. Stream
//! system tasks running on the worker are answered inline from the
//! coordinator's stream table, so remote `$get`/`$put` behave exactly like
//! local ones.

use crate::compiler::{AbortHandle, CoreCompiler};
use crate::rpc::{self, msg};
use cascade_analyze::Resolve;
use cascade_ast::{emit, Ast, NodeId};
use cascade_common::Bits;
use cascade_runtime::{CompileRequest, Core, Interface, SId, VarMap, VId};
use std::collections::HashMap;
use std::io::Write;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

/// One registered worker connection.
pub struct Connection {
    stream: Mutex<TcpStream>,
    #[allow(dead_code)]
    id: u32,
}

/// Compiles modules whose `__loc` names a worker address.
pub struct ProxyCompiler {
    default_addr: String,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ProxyCompiler {
    /// Creates a proxy compiler; `default_addr` serves modules whose
    /// location is the bare word `remote`.
    pub fn new(default_addr: impl Into<String>) -> Self {
        Self {
            default_addr: default_addr.into(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn addr_of(&self, loc: &str) -> String {
        if loc == "remote" {
            self.default_addr.clone()
        } else {
            loc.to_string()
        }
    }

    fn connection(&self, loc: &str) -> Option<Arc<Connection>> {
        let addr = self.addr_of(loc);
        let mut connections = self.connections.lock().unwrap();
        if let Some(conn) = connections.get(&addr) {
            return Some(Arc::clone(conn));
        }
        let mut stream = TcpStream::connect(&addr).ok()?;
        rpc::write_header(&mut stream, msg::REGISTER_CONNECTION, 0).ok()?;
        stream.flush().ok()?;
        let header = rpc::read_header(&mut stream).ok()?;
        if header.ty != msg::OKAY {
            return None;
        }
        let conn = Arc::new(Connection {
            stream: Mutex::new(stream),
            id: header.id,
        });
        connections.insert(addr, Arc::clone(&conn));
        Some(conn)
    }
}

impl CoreCompiler for ProxyCompiler {
    fn compile(
        &self,
        req: CompileRequest,
        interface: Arc<dyn Interface>,
        abort: &AbortHandle,
    ) -> Option<Box<dyn Core>> {
        if abort.aborted() {
            return None;
        }
        let conn = self.connection(&req.loc)?;
        let CompileRequest {
            mut ast,
            md,
            version,
            inst_name,
            std,
            target,
            inputs,
            outputs,
            state,
            init_vid,
            ..
        } = req;
        let source = emit(&ast, md);

        let mut stream = conn.stream.lock().unwrap();
        let send = (|| -> Result<(), rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::COMPILE, 0)?;
            rpc::write_u64(&mut *stream, version)?;
            rpc::write_string(&mut *stream, &inst_name)?;
            rpc::write_string(&mut *stream, &std)?;
            rpc::write_string(&mut *stream, &target)?;
            rpc::write_u32(&mut *stream, init_vid.0)?;
            rpc::write_string(&mut *stream, &source)?;
            for specs in [&inputs, &outputs, &state] {
                rpc::write_u32(&mut *stream, specs.len() as u32)?;
                for spec in specs.iter() {
                    rpc::write_string(&mut *stream, &relative_name(&mut ast, spec.decl))?;
                    rpc::write_u32(&mut *stream, spec.vid.0)?;
                    rpc::write_u32(&mut *stream, spec.width)?;
                }
            }
            stream.flush()?;
            Ok(())
        })();
        send.ok()?;

        let header = rpc::read_header(&mut *stream).ok()?;
        let eid = match header.ty {
            msg::OKAY => header.id,
            msg::FAIL => {
                let why = rpc::read_string(&mut *stream).unwrap_or_default();
                interface.error(&format!("remote compile failed: {why}"));
                return None;
            }
            _ => return None,
        };
        // The override bits never change; fetch them once.
        let overrides_step = query_flag(&mut stream, msg::OVERRIDES_DONE_STEP, eid)?;
        let overrides_sim = query_flag(&mut stream, msg::OVERRIDES_DONE_SIMULATION, eid)?;
        drop(stream);

        Some(Box::new(ProxyCore {
            conn,
            eid,
            iface: interface,
            overrides_step,
            overrides_sim,
        }))
    }
}

fn query_flag(
    stream: &mut std::sync::MutexGuard<'_, TcpStream>,
    ty: u8,
    eid: u32,
) -> Option<bool> {
    rpc::write_header(&mut **stream, ty, eid).ok()?;
    stream.flush().ok()?;
    let header = rpc::read_header(&mut **stream).ok()?;
    if header.ty != msg::OKAY {
        return None;
    }
    rpc::read_u8(&mut **stream).ok().map(|b| b != 0)
}

/// The declaration's dotted path relative to its module root (`x`,
/// `blk.t`), used to rebind variable ids on the worker.
fn relative_name(ast: &mut Ast, decl: NodeId) -> String {
    let full = Resolve::new(ast).full_name(decl).unwrap_or_default();
    match full.split_once('.') {
        Some((_, rest)) => rest.to_string(),
        None => full,
    }
}

/// A core executing in a worker runtime.
pub struct ProxyCore {
    conn: Arc<Connection>,
    eid: u32,
    iface: Arc<dyn Interface>,
    overrides_step: bool,
    overrides_sim: bool,
}

impl ProxyCore {
    /// Sends a bare request and pumps callbacks until `OKAY`.
    fn round_trip(&self, ty: u8) {
        let mut stream = self.conn.stream.lock().unwrap();
        let _ = (|| -> Result<(), rpc::RpcError> {
            rpc::write_header(&mut *stream, ty, self.eid)?;
            stream.flush()?;
            self.pump(&mut stream)
        })();
    }

    /// Replays interface callbacks until the `OKAY` sentinel; stream-task
    /// requests from the worker are answered inline.
    fn pump(&self, stream: &mut TcpStream) -> Result<(), rpc::RpcError> {
        loop {
            let header = rpc::read_header(&mut *stream)?;
            match header.ty {
                msg::OKAY => return Ok(()),
                msg::FAIL => {
                    let why = rpc::read_string(&mut *stream)?;
                    return Err(rpc::RpcError::Protocol(why));
                }
                msg::WRITE_BITS => {
                    let vid = VId(rpc::read_u32(&mut *stream)?);
                    let bits = rpc::read_bits(&mut *stream)?;
                    self.iface.write_bits(vid, &bits);
                }
                msg::WRITE_BOOL => {
                    let vid = VId(rpc::read_u32(&mut *stream)?);
                    let val = rpc::read_u8(&mut *stream)? != 0;
                    self.iface.write_bool(vid, val);
                }
                msg::DEBUG => {
                    let kind = rpc::read_u8(&mut *stream)?;
                    let text = rpc::read_string(&mut *stream)?;
                    match kind {
                        rpc::debug_kind::DISPLAY => self.iface.display(&text),
                        rpc::debug_kind::WRITE => self.iface.write_text(&text),
                        rpc::debug_kind::ERROR => self.iface.error(&text),
                        rpc::debug_kind::WARNING => self.iface.warning(&text),
                        _ => self.iface.info(&text),
                    }
                }
                msg::FINISH => {
                    let code = rpc::read_u32(&mut *stream)?;
                    self.iface.finish(code);
                }
                msg::RESTART => {
                    let path = rpc::read_string(&mut *stream)?;
                    self.iface.restart(&path);
                }
                msg::RETARGET => {
                    let target = rpc::read_string(&mut *stream)?;
                    self.iface.retarget(&target);
                }
                msg::SAVE => {
                    let path = rpc::read_string(&mut *stream)?;
                    self.iface.save(&path);
                }
                msg::FOPEN => {
                    let path = rpc::read_string(&mut *stream)?;
                    let sid = self.iface.fopen(&path);
                    rpc::write_header(&mut *stream, msg::OKAY, sid.0)?;
                    stream.flush()?;
                }
                msg::SBUMPC => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let c = self.iface.sbumpc(sid);
                    rpc::write_header(&mut *stream, msg::OKAY, self.eid)?;
                    rpc::write_i64(&mut *stream, c as i64)?;
                    stream.flush()?;
                }
                msg::SGETC => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let c = self.iface.sgetc(sid);
                    rpc::write_header(&mut *stream, msg::OKAY, self.eid)?;
                    rpc::write_i64(&mut *stream, c as i64)?;
                    stream.flush()?;
                }
                msg::SGETN => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let n = rpc::read_u32(&mut *stream)? as usize;
                    let data = self.iface.sgetn(sid, n);
                    rpc::write_header(&mut *stream, msg::OKAY, self.eid)?;
                    rpc::write_bytes(&mut *stream, &data)?;
                    stream.flush()?;
                }
                msg::SPUTC => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let c = rpc::read_u8(&mut *stream)?;
                    self.iface.sputc(sid, c);
                }
                msg::SPUTN => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let data = rpc::read_bytes(&mut *stream)?;
                    self.iface.sputn(sid, &data);
                }
                msg::IN_AVAIL => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let n = self.iface.in_avail(sid);
                    rpc::write_header(&mut *stream, msg::OKAY, self.eid)?;
                    rpc::write_i64(&mut *stream, n)?;
                    stream.flush()?;
                }
                msg::PUBSEEKOFF | msg::PUBSEEKPOS => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let pos = rpc::read_i64(&mut *stream)?;
                    let read = rpc::read_u8(&mut *stream)? != 0;
                    let out = if header.ty == msg::PUBSEEKOFF {
                        self.iface.pubseekoff(sid, pos, read)
                    } else {
                        self.iface.pubseekpos(sid, pos, read)
                    };
                    rpc::write_header(&mut *stream, msg::OKAY, self.eid)?;
                    rpc::write_i64(&mut *stream, out)?;
                    stream.flush()?;
                }
                msg::PUBSYNC => {
                    let sid = SId(rpc::read_u32(&mut *stream)?);
                    let out = self.iface.pubsync(sid);
                    rpc::write_header(&mut *stream, msg::OKAY, self.eid)?;
                    rpc::write_i64(&mut *stream, out as i64)?;
                    stream.flush()?;
                }
                other => {
                    return Err(rpc::RpcError::Protocol(format!(
                        "unexpected callback type {other}"
                    )))
                }
            }
        }
    }
}

impl Core for ProxyCore {
    fn get_state(&self) -> VarMap {
        let mut stream = self.conn.stream.lock().unwrap();
        (|| -> Result<VarMap, rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::GET_STATE, self.eid)?;
            stream.flush()?;
            self.pump(&mut stream)?;
            rpc::read_varmap(&mut *stream)
        })()
        .unwrap_or_default()
    }

    fn set_state(&mut self, state: &VarMap) {
        let mut stream = self.conn.stream.lock().unwrap();
        let _ = (|| -> Result<(), rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::SET_STATE, self.eid)?;
            rpc::write_varmap(&mut *stream, state)?;
            stream.flush()?;
            self.pump(&mut stream)
        })();
    }

    fn get_input(&self) -> VarMap {
        let mut stream = self.conn.stream.lock().unwrap();
        (|| -> Result<VarMap, rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::GET_INPUT, self.eid)?;
            stream.flush()?;
            self.pump(&mut stream)?;
            rpc::read_varmap(&mut *stream)
        })()
        .unwrap_or_default()
    }

    fn set_input(&mut self, input: &VarMap) {
        let mut stream = self.conn.stream.lock().unwrap();
        let _ = (|| -> Result<(), rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::SET_INPUT, self.eid)?;
            rpc::write_varmap(&mut *stream, input)?;
            stream.flush()?;
            self.pump(&mut stream)
        })();
    }

    fn resync(&mut self) {
        self.round_trip(msg::FINALIZE);
    }

    fn read(&mut self, id: VId, bits: &Bits) {
        let mut stream = self.conn.stream.lock().unwrap();
        let _ = (|| -> Result<(), rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::READ, self.eid)?;
            rpc::write_u32(&mut *stream, id.0)?;
            rpc::write_bits(&mut *stream, bits)?;
            stream.flush()?;
            Ok(())
        })();
    }

    fn evaluate(&mut self) {
        self.round_trip(msg::EVALUATE);
    }

    fn there_are_updates(&self) -> bool {
        let mut stream = self.conn.stream.lock().unwrap();
        (|| -> Result<bool, rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::THERE_ARE_UPDATES, self.eid)?;
            stream.flush()?;
            self.pump(&mut stream)?;
            Ok(rpc::read_u8(&mut *stream)? != 0)
        })()
        .unwrap_or(false)
    }

    fn update(&mut self) {
        self.round_trip(msg::UPDATE);
    }

    fn conditional_update(&mut self) -> bool {
        let mut stream = self.conn.stream.lock().unwrap();
        (|| -> Result<bool, rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::CONDITIONAL_UPDATE, self.eid)?;
            stream.flush()?;
            self.pump(&mut stream)?;
            Ok(rpc::read_u8(&mut *stream)? != 0)
        })()
        .unwrap_or(false)
    }

    fn there_were_tasks(&self) -> bool {
        let mut stream = self.conn.stream.lock().unwrap();
        (|| -> Result<bool, rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::THERE_WERE_TASKS, self.eid)?;
            stream.flush()?;
            self.pump(&mut stream)?;
            Ok(rpc::read_u8(&mut *stream)? != 0)
        })()
        .unwrap_or(false)
    }

    fn overrides_done_step(&self) -> bool {
        self.overrides_step
    }

    fn done_step(&mut self) {
        self.round_trip(msg::DONE_STEP);
    }

    fn overrides_done_simulation(&self) -> bool {
        self.overrides_sim
    }

    fn done_simulation(&mut self) {
        self.round_trip(msg::DONE_SIMULATION);
    }

    fn open_loop(&mut self, clk: VId, val: bool, itrs: u64) -> u64 {
        let mut stream = self.conn.stream.lock().unwrap();
        (|| -> Result<u64, rpc::RpcError> {
            rpc::write_header(&mut *stream, msg::OPEN_LOOP, self.eid)?;
            rpc::write_u32(&mut *stream, clk.0)?;
            rpc::write_u8(&mut *stream, val as u8)?;
            rpc::write_u64(&mut *stream, itrs)?;
            stream.flush()?;
            self.pump(&mut stream)?;
            Ok(rpc::read_u64(&mut *stream)?)
        })()
        .unwrap_or(0)
    }
}

impl Drop for ProxyCore {
    fn drop(&mut self) {
        let mut stream = self.conn.stream.lock().unwrap();
        let _ = rpc::write_header(&mut *stream, msg::TEARDOWN_ENGINE, self.eid);
        let _ = stream.flush();
        if let Ok(header) = rpc::read_header(&mut *stream) {
            debug_assert_eq!(header.ty, msg::OKAY);
        }
    }
}
