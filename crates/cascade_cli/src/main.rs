//! The `cascade` binary: a JIT Verilog REPL.
//!
//! Starts a runtime with the software backends, evaluates any `-e` files,
//! and then feeds stdin to the runtime one balanced fragment at a time.
//! `$finish` (or end of input) shuts the runtime down cleanly.

use cascade_runtime::{KernelOptions, March, Runtime};
use cascade_target::{Compiler, ProxyCompiler};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cascade", about = "A JIT compiler and runtime for Verilog", version)]
struct Args {
    /// Standard-library march target (minimal, sw).
    #[arg(long, default_value = "minimal")]
    march: String,

    /// Directories searched by include directives.
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// Files evaluated before the REPL starts.
    #[arg(short = 'e', long = "eval")]
    eval: Vec<PathBuf>,

    /// Enable $info output.
    #[arg(long)]
    enable_info: bool,

    /// Suppress $warning output.
    #[arg(long)]
    disable_warning: bool,

    /// Suppress $error output.
    #[arg(long)]
    disable_error: bool,

    /// Keep every module in its own engine instead of inlining logic.
    #[arg(long)]
    disable_inlining: bool,

    /// Wall-clock seconds per open-loop batch; 0 disables the fast path.
    #[arg(long, default_value_t = 1.0)]
    open_loop_target: f64,

    /// Worker address used by modules located "remote".
    #[arg(long, default_value = "127.0.0.1:8800")]
    worker: String,

    /// Exit after the eval files finish instead of reading stdin.
    #[arg(long)]
    batch: bool,
}

fn main() {
    let args = Args::parse();
    let Some(march) = March::from_name(&args.march) else {
        eprintln!("error: unknown march {}", args.march);
        std::process::exit(1);
    };

    let compiler = Compiler::new().with_sw_backends();
    compiler.set_core_compiler("proxy", Arc::new(ProxyCompiler::new(args.worker.clone())));

    let mut runtime = Runtime::new(
        Arc::new(compiler),
        KernelOptions {
            march,
            include_dirs: args.include.clone(),
            enable_inlining: !args.disable_inlining,
            open_loop_target: Duration::from_secs_f64(args.open_loop_target.max(0.0)),
        },
    );
    let handle = runtime.handle();
    handle.set_enable_info(args.enable_info);
    handle.set_disable_warning(args.disable_warning);
    handle.set_disable_error(args.disable_error);

    for path in &args.eval {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                runtime.eval_now(&text);
            }
            Err(e) => {
                eprintln!("error: could not read {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    runtime.run();

    if args.batch {
        while !handle.stop_requested() {
            std::thread::sleep(Duration::from_millis(10));
        }
        runtime.wait_for_stop();
        return;
    }

    // The REPL: accumulate lines until the fragment is balanced, then eval.
    let stdin = std::io::stdin();
    let mut buffer = String::new();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        buffer.push_str(&line);
        buffer.push('\n');
        if handle.stop_requested() {
            break;
        }
        if fragment_complete(&buffer) {
            runtime.eval(std::mem::take(&mut buffer));
        }
    }
    if !buffer.trim().is_empty() {
        runtime.eval(buffer);
    }
    runtime.stop_now();
}

/// A crude balance check: a fragment is ready to eval once every
/// module/begin/case opener is closed and it ends with a semicolon or an
/// `endmodule`.
fn fragment_complete(text: &str) -> bool {
    let mut depth = 0i64;
    for token in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        match token {
            "module" | "begin" | "case" | "casex" | "casez" => depth += 1,
            "endmodule" | "end" | "endcase" => depth -= 1,
            _ => {}
        }
    }
    if depth > 0 {
        return false;
    }
    let trimmed = text.trim_end();
    trimmed.ends_with(';') || trimmed.ends_with("endmodule")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_fragments() {
        assert!(fragment_complete("wire x;\n"));
        assert!(fragment_complete("module m(); wire x; endmodule\n"));
        assert!(!fragment_complete("module m(); wire x;\n"));
        assert!(!fragment_complete("initial begin x = 1;\n"));
        assert!(fragment_complete("initial begin x = 1; end\nwire y;\n"));
    }
}
