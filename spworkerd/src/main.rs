//! spworkerd - simulation worker daemon
//!
//! Serves one controller at a time over TCP. Each frame is a tagged request
//! (handshake, evaluate, execute) run against a pool of self-play simulations;
//! an empty frame stops the worker.
//!
//! Usage:
//!   spworkerd [--host H] [--max-frame-mb N] [--env KIND [--count N]] [--options FILE.json] <port>

use spworker::Dispatcher;
use tokio::net::TcpListener;
use tracing::{info, warn};

mod config;
mod server;

use config::{ConfigError, DaemonConfig};

fn usage() {
    eprintln!("spworkerd: batched simulation worker");
    eprintln!();
    eprintln!("Usage: spworkerd [options] <port>");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --host H            Address to bind (default {})", config::DEFAULT_HOST);
    eprintln!(
        "  --max-frame-mb N    Largest accepted request in MiB (default {})",
        config::DEFAULT_MAX_FRAME_MB
    );
    eprintln!("  --env KIND          Build a pool of KIND before serving");
    eprintln!("  --count N           Pool size for --env (default 1)");
    eprintln!("  --options FILE      JSON file with simulation options for --env");
}

// ═══════════════════════════════════════════════════════════════════════════
// Main
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = match DaemonConfig::from_args(std::env::args().skip(1)) {
        Ok(cfg) => cfg,
        Err(ConfigError::Help) => {
            usage();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {e}\n");
            usage();
            std::process::exit(2);
        }
    };

    let host = cfg.build_host()?;
    if let Some((kind, count)) = cfg.preload {
        info!("Preloaded pool: {} x {}", count, kind);
    }
    let mut dispatcher = Dispatcher::new(host);

    let listener = TcpListener::bind(cfg.addr()).await?;
    info!("spworkerd listening on {}", listener.local_addr()?);

    tokio::select! {
        served = server::serve(listener, &mut dispatcher, cfg.max_frame_len) => served?,
        Ok(()) = tokio::signal::ctrl_c() => warn!("Ctrl-C: stopping"),
    }

    let (served, failed) = dispatcher.counts();
    info!(served, failed, "spworkerd stopped");
    Ok(())
}
