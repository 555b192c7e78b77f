//! End-to-end scenarios driving the full eval/compile/schedule pipeline
//! with the software backends.

use cascade_runtime::{Kernel, KernelOptions, March, RuntimeHandle};
use cascade_target::{Compiler, ProxyCompiler, Worker};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    fn take(&self) -> String {
        let mut buf = self.0.lock().unwrap();
        let out = String::from_utf8_lossy(&buf).into_owned();
        buf.clear();
        out
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct Sim {
    kernel: Kernel,
    out: SharedBuf,
    err: SharedBuf,
    info: SharedBuf,
}

fn sim(march: March) -> Sim {
    sim_with(march, |c| c)
}

fn sim_with(march: March, configure: impl FnOnce(Compiler) -> Compiler) -> Sim {
    let out = SharedBuf::default();
    let err = SharedBuf::default();
    let info = SharedBuf::default();
    let handle = Arc::new(RuntimeHandle::new());
    handle.set_stdout(Box::new(out.clone()));
    handle.set_stderr(Box::new(err.clone()));
    handle.set_stdwarn(Box::new(err.clone()));
    handle.set_stdinfo(Box::new(info.clone()));
    handle.set_enable_info(true);
    let compiler = configure(Compiler::new().with_sw_backends());
    let kernel = Kernel::new(
        handle,
        Arc::new(compiler),
        KernelOptions {
            march,
            include_dirs: Vec::new(),
            enable_inlining: true,
            // Deterministic reference scheduling unless a test re-enables it.
            open_loop_target: Duration::ZERO,
        },
    );
    Sim {
        kernel,
        out,
        err,
        info,
    }
}

fn run_until_finished(sim: &mut Sim, cap: usize) {
    for _ in 0..cap {
        if sim.kernel.is_finished() {
            return;
        }
        sim.kernel.step();
    }
    assert!(sim.kernel.is_finished(), "simulation did not finish");
}

#[test]
fn hello_world() {
    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text("initial $display(\"Hello World\");"));
    assert!(sim.kernel.eval_text("initial $finish;"));
    run_until_finished(&mut sim, 10);
    assert_eq!(sim.out.contents(), "Hello World\n");
    assert_eq!(sim.err.contents(), "");
}

#[test]
fn counting_pipeline() {
    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text(
        "reg [3:0] r = 0;\n\
         always @(posedge clock.val) begin\n\
           r <= r + 1;\n\
           $write(r);\n\
           if (r == 9) $finish;\n\
         end",
    ));
    run_until_finished(&mut sim, 100);
    assert_eq!(sim.out.contents(), "0123456789");
}

#[test]
fn declare_before_instantiate_and_duplicate() {
    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text(
        "module foo(o); output wire [3:0] o; assign o = 9; always @* $display(o); endmodule",
    ));
    // Declaring alone produces no output.
    sim.kernel.step();
    assert_eq!(sim.out.take(), "");

    assert!(sim.kernel.eval_text("foo f();"));
    sim.kernel.step();
    assert_eq!(sim.out.take(), "9\n");

    // Repeating the instantiation is a duplicate-declaration error and does
    // not double-instantiate.
    assert!(!sim.kernel.eval_text("foo f();"));
    assert!(sim.err.contents().contains("duplicate declaration"));
    let before = sim.out.take();
    sim.kernel.step();
    assert_eq!(sim.out.take(), before);
}

#[test]
fn failed_eval_rolls_back_and_recovers() {
    let mut sim = sim(March::Minimal);
    assert!(!sim.kernel.eval_text("assign ghost = 1;"));
    assert!(sim.err.take().contains("undeclared identifier"));
    assert!(sim.kernel.eval_text("initial $display(\"ok\"); initial $finish;"));
    run_until_finished(&mut sim, 10);
    assert_eq!(sim.out.contents(), "ok\n");
}

#[test]
fn generate_constructs_execute() {
    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text(
        "genvar i;\n\
         wire [3:0] bits;\n\
         for (i = 0; i < 4; i = i + 1) begin : g\n\
           assign bits[i] = 1;\n\
         end\n\
         initial begin $display(bits); $finish; end",
    ));
    run_until_finished(&mut sim, 10);
    assert_eq!(sim.out.contents(), "15\n");
}

#[test]
fn save_then_restart_continues_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    let path = path.to_str().unwrap().to_string();

    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text(
        "reg [7:0] r = 0;\n\
         always @(posedge clock.val) begin r <= r + 1; $write(r); end",
    ));
    for _ in 0..6 {
        sim.kernel.step();
    }
    sim.kernel.save(&path);
    sim.out.take();

    for _ in 0..4 {
        sim.kernel.step();
    }
    let after_save = sim.out.take();
    assert!(!after_save.is_empty());

    sim.kernel.restart(&path);
    for _ in 0..4 {
        sim.kernel.step();
    }
    let after_restart = sim.out.take();
    assert_eq!(after_save, after_restart);
}

#[test]
fn restart_rejects_trailing_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.bin");
    let path = path.to_str().unwrap().to_string();

    let mut sim = sim(March::Minimal);
    sim.kernel.save(&path);
    {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        f.write_all(&[0xAB]).unwrap();
    }
    sim.kernel.restart(&path);
    assert!(sim.err.contents().contains("trailing garbage"));
}

#[test]
fn open_loop_matches_reference_schedule() {
    let src = "reg [7:0] r = 0; always @(posedge clock.val) r <= r + 1;";

    let mut reference = sim(March::Minimal);
    assert!(reference.kernel.eval_text(src));
    for _ in 0..1025 {
        reference.kernel.step();
    }

    let out = SharedBuf::default();
    let handle = Arc::new(RuntimeHandle::new());
    handle.set_stdout(Box::new(out));
    let mut fast = Kernel::new(
        handle,
        Arc::new(Compiler::new().with_sw_backends()),
        KernelOptions::default(),
    );
    assert!(fast.eval_text(src));
    let mut guard = 0;
    while fast.time() < 1025 {
        fast.step();
        guard += 1;
        assert!(guard < 50, "open loop failed to advance time");
    }
    assert_eq!(fast.time(), 1025);
    assert_eq!(reference.kernel.state_snapshot(), fast.state_snapshot());
}

#[test]
fn hierarchical_write_reaches_peripheral() {
    let mut sim = sim(March::Sw);
    assert!(sim.kernel.eval_text("assign led.val = 8'hA5;"));
    for _ in 0..3 {
        sim.kernel.step();
    }
    assert!(sim.info.contents().contains("led: 10100101"));
}

#[test]
fn stream_tasks_roundtrip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    std::fs::write(&path, "41 ").unwrap();
    let path = path.to_str().unwrap().to_string();

    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text(&format!(
        "integer fd = $fopen(\"{path}\");\n\
         reg [7:0] x = 0;\n\
         initial begin $get(fd, x); $put(fd, x + 1); $finish; end",
    )));
    run_until_finished(&mut sim, 10);
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "41 42");
}

#[test]
fn retarget_swaps_engines_without_losing_state() {
    let mut sim = sim(March::Minimal);
    assert!(sim.kernel.eval_text(
        "reg [3:0] r = 0;\n\
         always @(posedge clock.val) begin\n\
           r <= r + 1;\n\
           $write(r);\n\
           if (r == 9) $finish;\n\
         end",
    ));
    for _ in 0..8 {
        sim.kernel.step();
    }
    // Schedule a second-pass recompile mid-count; the swap must preserve r.
    sim.kernel.retarget("sw;sw");
    for _ in 0..200 {
        if sim.kernel.is_finished() {
            break;
        }
        sim.kernel.step();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(sim.kernel.is_finished());
    assert_eq!(sim.out.contents(), "0123456789");
}

#[test]
fn remote_module_runs_on_worker() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    std::thread::spawn(move || {
        let _ = Worker::serve_listener(listener);
    });

    let proxy_addr = addr.clone();
    let mut sim = sim_with(March::Minimal, move |c| {
        c.set_core_compiler("proxy", Arc::new(ProxyCompiler::new(proxy_addr)));
        c
    });
    assert!(sim.kernel.eval_text(&format!(
        "(*__std = \"logic\", __loc = \"{addr}\"*) module rem();\n\
           initial $display(\"from afar\");\n\
         endmodule",
    )));
    assert!(sim.kernel.eval_text("rem r();"));
    for _ in 0..5 {
        sim.kernel.step();
    }
    assert!(sim.out.contents().contains("from afar\n"));
}

#[test]
fn bit_vector_spec_examples() {
    use cascade_common::bits::Kind;
    use cascade_common::Bits;
    let sum = &Bits::new(4, 0xF) + &Bits::new(4, 0x1);
    assert_eq!(sum.to_u64(), 0x0);
    assert_eq!(sum.width(), 4);

    let neg = Bits::new(4, 0x8).with_kind(Kind::Signed);
    let zero = Bits::new(4, 0x0).with_kind(Kind::Signed);
    assert_eq!(neg.compare(&zero), std::cmp::Ordering::Less);
}
