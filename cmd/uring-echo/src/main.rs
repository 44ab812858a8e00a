//! uring-echo
//!
//! Single-threaded TCP echo server. Every accept, read and write goes
//! through one `uring-engine` ring; the only blocking call is `wait()`.
//!
//! Usage:
//!     cargo build --release -p uring-echo
//!     ./target/release/uring-echo [port] [max_conns]
//!
//! Test with:
//!     echo "hello" | nc localhost 9999
//!
//! Logging: `RUST_LOG=uring_engine=trace,uring_echo=debug`.
//! Engine sizing: `URING_RING_ENTRIES`, `URING_MAX_OPS`.

use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use uring_engine::{Engine, EngineConfig, EngineError, Event, RingHandle};

const BUF_SIZE: usize = 4096;

/// Context echoed back in every event.
#[derive(Debug, Clone, Copy)]
enum Op {
    Accept,
    Recv(usize),
    Send(usize),
}

// ── Per-connection state ──

struct Conn {
    fd: OwnedFd,
    /// Boxed so the kernel-visible address never moves.
    buf: Box<[u8; BUF_SIZE]>,
    /// Bytes received and not yet echoed back.
    pending: usize,
    /// Bytes of `pending` already sent.
    sent: usize,
}

struct ConnSlab {
    slots: Vec<Option<Conn>>,
    free: Vec<usize>,
}

impl ConnSlab {
    fn new(max: usize) -> Self {
        Self {
            slots: (0..max).map(|_| None).collect(),
            free: (0..max).rev().collect(),
        }
    }

    fn alloc(&mut self, fd: OwnedFd) -> Option<usize> {
        let idx = self.free.pop()?;
        self.slots[idx] = Some(Conn {
            fd,
            buf: Box::new([0u8; BUF_SIZE]),
            pending: 0,
            sent: 0,
        });
        Some(idx)
    }

    fn get_mut(&mut self, idx: usize) -> Option<&mut Conn> {
        self.slots.get_mut(idx)?.as_mut()
    }

    /// Drop the connection, closing its fd.
    fn free(&mut self, idx: usize) {
        if self.slots[idx].take().is_some() {
            self.free.push(idx);
        }
    }

    fn active(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

// ── Stats ──

#[derive(Default)]
struct Stats {
    accepts: u64,
    recvs: u64,
    sends: u64,
    closes: u64,
    bytes_in: u64,
    bytes_out: u64,
    errors: u64,
}

impl Stats {
    fn print(&self, conns: &ConnSlab, elapsed_secs: f64) {
        info!(
            elapsed = format_args!("{:.1}s", elapsed_secs),
            conns = conns.active(),
            accepts = self.accepts,
            recv = self.recvs,
            send = self.sends,
            close = self.closes,
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            err = self.errors,
            "stats"
        );
    }
}

type EchoEngine = Engine<RingHandle, Op>;

// ── Submit helpers ──
//
// Refusals (table or ring full) are logged; the connection is dropped
// rather than left without an operation in flight.

fn submit_recv(engine: &mut EchoEngine, conns: &mut ConnSlab, idx: usize) {
    let Some(conn) = conns.get_mut(idx) else { return };
    // Safety: the buffer is boxed inside the slab and the slot is only
    // freed after this operation's event has been handled.
    let res = unsafe {
        engine.submit_recv(conn.fd.as_raw_fd(), conn.buf.as_mut_ptr(), BUF_SIZE as u32, Op::Recv(idx))
    };
    if let Err(e) = res {
        warn!(conn = idx, error = %e, "recv not submitted, closing");
        conns.free(idx);
    }
}

fn submit_send(engine: &mut EchoEngine, conns: &mut ConnSlab, idx: usize) {
    let Some(conn) = conns.get_mut(idx) else { return };
    let rest = &conn.buf[conn.sent..conn.pending];
    // Safety: as in submit_recv.
    let res = unsafe { engine.submit_send(conn.fd.as_raw_fd(), rest.as_ptr(), rest.len() as u32, Op::Send(idx)) };
    if let Err(e) = res {
        warn!(conn = idx, error = %e, "send not submitted, closing");
        conns.free(idx);
    }
}

fn submit_accept(engine: &mut EchoEngine, listener: &TcpListener) -> bool {
    match engine.submit_accept(listener.as_raw_fd(), Op::Accept) {
        Ok(_) => true,
        Err(e) => {
            error!(error = %e, "accept not submitted");
            false
        }
    }
}

fn handle(event: Event<Op>, engine: &mut EchoEngine, listener: &TcpListener, conns: &mut ConnSlab, stats: &mut Stats) {
    match event.context {
        Op::Accept => {
            match event.handle() {
                Some(fd) => {
                    stats.accepts += 1;
                    // Safety: the kernel just created this fd for us.
                    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                    match conns.alloc(fd) {
                        Some(idx) => submit_recv(engine, conns, idx),
                        // At capacity: alloc dropped (closed) the fd.
                        None => stats.errors += 1,
                    }
                }
                None => {
                    stats.errors += 1;
                    debug!(errno = ?event.errno(), "accept failed");
                }
            }
            // Always re-arm the listener.
            if RUNNING.load(Ordering::Relaxed) {
                submit_accept(engine, listener);
            }
        }

        Op::Recv(idx) => match event.bytes() {
            Some(n) if n > 0 => {
                stats.recvs += 1;
                stats.bytes_in += n as u64;
                if let Some(conn) = conns.get_mut(idx) {
                    conn.pending = n;
                    conn.sent = 0;
                }
                submit_send(engine, conns, idx);
            }
            _ => {
                // EOF or error
                if event.is_error() {
                    stats.errors += 1;
                }
                stats.closes += 1;
                conns.free(idx);
            }
        },

        Op::Send(idx) => match event.bytes() {
            Some(n) if n > 0 => {
                stats.sends += 1;
                stats.bytes_out += n as u64;
                let Some(conn) = conns.get_mut(idx) else { return };
                conn.sent += n;
                if conn.sent < conn.pending {
                    submit_send(engine, conns, idx);
                } else {
                    submit_recv(engine, conns, idx);
                }
            }
            _ => {
                stats.errors += 1;
                stats.closes += 1;
                conns.free(idx);
            }
        },
    }
}

// ── Main event loop ──

static RUNNING: AtomicBool = AtomicBool::new(true);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);
    let max_conns: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1024);

    // SIGINT handler for clean shutdown
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_sigint as libc::sighandler_t);
    }

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(l) => l,
        Err(e) => {
            error!(port, error = %e, "bind failed");
            std::process::exit(1);
        }
    };

    // One op per connection plus the pending accept.
    let config = EngineConfig::from_env();
    let config = if config.max_ops < max_conns + 1 {
        config.max_ops(max_conns + 1)
    } else {
        config
    };
    let mut engine: EchoEngine = match Engine::new(&config) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "engine setup failed");
            std::process::exit(1);
        }
    };
    info!(
        port,
        max_conns,
        sq_entries = engine.backend().params().sq_entries,
        max_ops = engine.capacity(),
        "listening"
    );

    let mut conns = ConnSlab::new(max_conns);
    let mut stats = Stats::default();

    if !submit_accept(&mut engine, &listener) {
        std::process::exit(1);
    }

    let start = Instant::now();
    let mut last_stats = start;

    while RUNNING.load(Ordering::Relaxed) {
        match engine.wait() {
            Ok(event) => handle(event, &mut engine, &listener, &mut conns, &mut stats),
            // Interrupted by a signal: loop re-checks RUNNING.
            Err(EngineError::Wait(errno)) => debug!(%errno, "wait interrupted"),
            Err(e) => {
                stats.errors += 1;
                warn!(error = %e, "wait");
            }
        }

        // Drain whatever else is already there without another syscall.
        let ready: Vec<_> = engine.completions().collect();
        for event in ready {
            match event {
                Ok(event) => handle(event, &mut engine, &listener, &mut conns, &mut stats),
                Err(e) => {
                    stats.errors += 1;
                    warn!(error = %e, "completion");
                }
            }
        }

        let now = Instant::now();
        if now.duration_since(last_stats).as_secs() >= 5 {
            stats.print(&conns, now.duration_since(start).as_secs_f64());
            last_stats = now;
        }
    }

    info!("shutting down");
    stats.print(&conns, start.elapsed().as_secs_f64());
    // Ring first: buffers in `conns` must outlive anything still in flight.
    drop(engine);
    drop(conns);
}

extern "C" fn handle_sigint(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::Relaxed);
}
