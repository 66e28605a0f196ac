//! CLI client for the `spworkerd` daemon.
//!
//! Examples:
//!   spworker-cli ping
//!   spworker-cli exec 'init("SPMountainCar", 4, {nminds = 2})'
//!   spworker-cli eval 'reset()'
//!   spworker-cli eval 'get_stat()'
//!   spworker-cli shutdown
//!
//! By default it talks to 127.0.0.1:5555; override with `--addr host:port`.

use std::net::TcpStream;
use std::process;
use std::time::Duration;

use spworker::dispatch::{TAG_EVALUATE, TAG_EXECUTE, TAG_HANDSHAKE};
use spworker::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_LEN};
use spworker::wire;

fn usage() -> ! {
    eprintln!("spworker-cli (talks to spworkerd @ 127.0.0.1:5555 by default)");
    eprintln!("Usage: spworker-cli [--addr host:port] <command> [args]\n");
    eprintln!("Commands:");
    eprintln!("  ping                  Handshake with the worker");
    eprintln!("  eval <expr>           Evaluate an expression and print the reply");
    eprintln!("  exec <statements>     Run statements for their side effects");
    eprintln!("  kinds                 List the simulation kinds the worker knows");
    eprintln!("  shutdown              Stop the worker");
    process::exit(1);
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }

    let mut addr = "127.0.0.1:5555".to_string();
    if args.len() >= 2 && args[0] == "--addr" {
        addr = args[1].clone();
        args.drain(0..2);
    }

    if args.is_empty() {
        usage();
    }

    (addr, args)
}

fn tagged(tag: u8, text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(text.len() + 1);
    payload.push(tag);
    payload.extend_from_slice(text.as_bytes());
    payload
}

/// Send one frame and wait for the reply (`None` for a shutdown request).
fn send_request(addr: &str, payload: &[u8]) -> Result<Option<Vec<u8>>, String> {
    let mut stream = TcpStream::connect(addr).map_err(|e| format!("connect: {e}"))?;
    stream
        .set_read_timeout(Some(Duration::from_secs(30)))
        .map_err(|e| format!("set_read_timeout: {e}"))?;

    write_frame(&mut stream, payload).map_err(|e| format!("send: {e}"))?;
    if payload.is_empty() {
        return Ok(None);
    }
    read_frame(&mut stream, DEFAULT_MAX_FRAME_LEN)
        .map_err(|e| format!("recv: {e}"))?
        .map(Some)
        .ok_or_else(|| "worker closed the connection".to_string())
}

fn main() {
    let (addr, args) = parse_args();
    let cmd = &args[0];

    let text_arg = || -> String {
        if args.len() < 2 {
            usage();
        }
        args[1..].join(" ")
    };

    let payload = match cmd.as_str() {
        "ping" => vec![TAG_HANDSHAKE],
        "eval" => tagged(TAG_EVALUATE, &text_arg()),
        "exec" => tagged(TAG_EXECUTE, &text_arg()),
        "kinds" => tagged(TAG_EVALUATE, "kinds()"),
        "shutdown" => Vec::new(),
        _ => usage(),
    };

    match send_request(&addr, &payload) {
        Ok(None) => println!("shutdown requested"),
        Ok(Some(reply)) if cmd == "ping" => println!("{}", String::from_utf8_lossy(&reply)),
        Ok(Some(reply)) => match wire::decode_value(&reply) {
            Ok(value) => println!("{value}"),
            Err(e) => {
                eprintln!("Error: undecodable reply ({e})");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("Failed: {e}");
            process::exit(1);
        }
    }
}
