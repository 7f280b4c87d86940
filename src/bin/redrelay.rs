/*!
 * Redrelay Server Main Entry Point
 *
 * Parses the command line, initializes logging, builds the shared
 * dictionary and the optional traffic log, and runs the server event
 * loop until the operator types `bye`, `quit`, or `exit` on stdin.
 */

use anyhow::{bail, Result};
use clap::Parser;
use redrelay::logger::spawn_traffic_log;
use redrelay::net::{run_server, Mode, ServerOptions};
use redrelay::storage::Dict;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "redrelay")]
#[command(version, about = "Redis-protocol server, proxy, and monitor", long_about = None)]
struct Args {
    /// Listen port (use 3010 when monitoring a Redis on 6379)
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Backend mode: local, proxy, or monitor
    #[arg(short, long, default_value = "local")]
    mode: String,

    /// Upstream Redis address (proxy and monitor modes)
    #[arg(long, default_value = redrelay::DEFAULT_UPSTREAM)]
    upstream: String,

    /// Traffic log file; omit to disable exchange logging
    #[arg(long)]
    log_file: Option<String>,

    /// Directory holding console replay scripts (test.txt, logfile1.txt, ...)
    #[arg(long, default_value = ".")]
    script_dir: PathBuf,
}

fn main() -> Result<()> {
    // Respects the RUST_LOG environment variable,
    // e.g. RUST_LOG=debug cargo run --release
    env_logger::init();

    let args = Args::parse();

    let mode = match args.mode.as_str() {
        "local" => Mode::Local,
        "proxy" => Mode::Proxy,
        "monitor" => Mode::Monitor,
        other => bail!("unknown mode '{}' (expected local, proxy, or monitor)", other),
    };

    let addr = format!("{}:{}", args.bind, args.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve bind address"))?;
    let upstream = args
        .upstream
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| anyhow::anyhow!("could not resolve upstream address"))?;

    let log = match &args.log_file {
        Some(path) => Some(spawn_traffic_log(path)?),
        None => None,
    };

    let dict = Arc::new(Dict::new());

    println!("redrelay running on {} ({:?} mode)", addr, mode);
    println!("Type 'bye', 'quit', or 'exit' to stop the server.");

    // Blocks until the operator asks for shutdown; exit code 0.
    run_server(ServerOptions {
        addr,
        mode,
        upstream,
        script_dir: args.script_dir,
        log,
        dict,
    })
}
