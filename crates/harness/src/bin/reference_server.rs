//! Minimal RESP server used as a known-good (and deliberately broken)
//! submission in integration tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Store = Arc<Mutex<HashMap<String, String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Conformant,
    /// Accept and read, never reply.
    Silent,
    /// Reply `-ERR` to everything.
    Wrong,
    /// Empty bulk string instead of null for missing keys.
    NoNull,
    /// Never answer a GET for a missing key.
    HangMissing,
    /// Print to stderr and exit before binding.
    Exit,
    /// Fork a long-lived helper into the same process group.
    Fork,
    /// Keep running after SIGTERM.
    IgnoreTerm,
}

#[derive(Parser)]
#[command(name = "reference-server")]
struct Args {
    #[arg(long, default_value_t = 6379)]
    port: u16,

    #[arg(long, value_enum, default_value_t = Mode::Conformant)]
    mode: Mode,

    /// Where fork mode writes the helper's pid.
    #[arg(long)]
    pid_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.mode == Mode::Exit {
        eprintln!("OSError: [Errno 98] Address already in use");
        std::process::exit(1);
    }

    #[cfg(unix)]
    let _sigterm = if args.mode == Mode::IgnoreTerm {
        // Holding the stream replaces the default SIGTERM action.
        Some(tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        )?)
    } else {
        None
    };

    let _helper = if args.mode == Mode::Fork {
        let helper = std::process::Command::new("sleep").arg("300").spawn()?;
        if let Some(path) = &args.pid_file {
            tokio::fs::write(path, helper.id().to_string()).await?;
        }
        Some(helper)
    } else {
        None
    };

    let listener = TcpListener::bind(("127.0.0.1", args.port)).await?;
    tracing::info!(mode = ?args.mode, "Listening on {}", listener.local_addr()?);

    let store: Store = Arc::new(Mutex::new(HashMap::new()));
    loop {
        let (socket, _) = listener.accept().await?;
        let store = store.clone();
        let mode = args.mode;
        tokio::spawn(async move {
            if let Err(e) = serve(socket, store, mode).await {
                tracing::debug!(error = %e, "Connection ended");
            }
        });
    }
}

async fn serve(mut socket: TcpStream, store: Store, mode: Mode) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.extend_from_slice(&chunk[..n]);

        while let Some((args, consumed)) = parse_command(&buffer) {
            buffer.drain(..consumed);
            if let Some(reply) = respond(&args, &store, mode) {
                socket.write_all(&reply).await?;
            }
        }
    }
}

/// The reply to one command, or `None` when the mode withholds it.
fn respond(args: &[String], store: &Store, mode: Mode) -> Option<Vec<u8>> {
    match mode {
        Mode::Silent => return None,
        Mode::Wrong => return Some(b"-ERR unknown command\r\n".to_vec()),
        _ => {}
    }

    let Some(name) = args.first() else {
        return Some(b"-ERR empty command\r\n".to_vec());
    };
    let reply = match (name.to_ascii_uppercase().as_str(), &args[1..]) {
        ("PING", _) => b"+PONG\r\n".to_vec(),
        ("ECHO", [message]) => bulk(message),
        ("SET", [key, value, ..]) => {
            if let Ok(mut store) = store.lock() {
                store.insert(key.clone(), value.clone());
            }
            b"+OK\r\n".to_vec()
        }
        ("GET", [key]) => {
            let value = store.lock().ok().and_then(|s| s.get(key).cloned());
            match value {
                Some(value) => bulk(&value),
                None if mode == Mode::HangMissing => return None,
                None if mode == Mode::NoNull => b"$0\r\n\r\n".to_vec(),
                None => b"$-1\r\n".to_vec(),
            }
        }
        _ => format!("-ERR unknown command '{}'\r\n", name).into_bytes(),
    };
    Some(reply)
}

fn bulk(value: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", value.len(), value).into_bytes()
}

/// Parse one array-of-bulk-strings frame from the front of `buf`.
/// Returns the arguments and the number of bytes consumed, or `None` while
/// the frame is incomplete.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let (count, mut pos) = parse_header(buf, 0, b'*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, start) = parse_header(buf, pos, b'$')?;
        let end = start + len;
        if buf.len() < end + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        pos = end + 2;
    }
    Some((args, pos))
}

fn parse_header(buf: &[u8], pos: usize, marker: u8) -> Option<(usize, usize)> {
    if buf.get(pos) != Some(&marker) {
        return None;
    }
    let line_end = buf[pos..].windows(2).position(|w| w == b"\r\n")? + pos;
    let value = std::str::from_utf8(&buf[pos + 1..line_end]).ok()?.parse().ok()?;
    Some((value, line_end + 2))
}
