//! The `cascade-worker` binary: serves compile and engine RPCs for a
//! coordinating runtime.

use cascade_target::Worker;
use clap::Parser;

#[derive(Parser)]
#[command(
    name = "cascade-worker",
    about = "A Cascade worker runtime",
    version
)]
struct Args {
    /// The address to listen on.
    #[arg(long, default_value = "127.0.0.1:8800")]
    listen: String,
}

fn main() {
    let args = Args::parse();
    eprintln!("cascade-worker listening on {}", args.listen);
    if let Err(e) = Worker::new(&args.listen).run() {
        eprintln!("error: worker failed: {e}");
        std::process::exit(1);
    }
}
