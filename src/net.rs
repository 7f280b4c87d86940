/*!
 * Network Layer and Event Loop
 *
 * The server core: a mio poll loop that accepts client connections,
 * reads their bytes into per-connection buffers, runs each connection's
 * conduit (dispatcher session or transparent monitor relay), and writes
 * replies back. One conceptual task per connection, realized
 * cooperatively: every tick also pumps all connections, which drives
 * proxy-mode upstream traffic, console script pacing, and reaping.
 */

use crate::console::{print_replies, script_for_sentinel, spawn_stdin_reader, ScriptFeeder};
use crate::engine::LocalEngine;
use crate::logger::TrafficLog;
use crate::monitor::Monitor;
use crate::session::Session;
use crate::storage::Dict;
use crate::upstream::UpstreamEngine;
use anyhow::Result;
use bytes::BytesMut;
use hashbrown::HashMap;
use log::{info, warn};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Size of the read buffer for incoming data
const READ_BUF: usize = 4096;

/// Which backend serves client connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Answer from the in-memory dictionary
    Local,
    /// Forward each operation to an upstream Redis, one connection per
    /// client, FIFO reply matching
    Proxy,
    /// Transparent byte relay toward the upstream, logging only
    Monitor,
}

/// Everything the server loop needs to run
pub struct ServerOptions {
    pub addr: SocketAddr,
    pub mode: Mode,
    pub upstream: SocketAddr,
    pub script_dir: PathBuf,
    pub log: Option<TrafficLog>,
    pub dict: Arc<Dict>,
}

/// What sits behind one client connection
enum Conduit {
    Session(Session),
    Monitor(Monitor),
}

/// Per-connection state: the socket, its outbound byte buffer, and the
/// conduit that produces those bytes
struct Connection {
    sock: TcpStream,
    wbuf: BytesMut,
    conduit: Conduit,
    dead: bool,
}

/// Bind a TCP listener with address reuse
///
/// Built through socket2 so the socket options are set before bind;
/// SO_REUSEADDR keeps quick restarts from tripping over TIME_WAIT.
pub fn bind_reuseport(addr: SocketAddr) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Run the server until the operator asks it to stop
///
/// # Architecture
/// * Token(0) is the listening socket, the waker uses the highest token
/// * Client sockets and their upstream sockets each get a unique token;
///   upstream tokens map back to the owning client
/// * Commands are executed as soon as they decode; replies queue on the
///   connection and flush opportunistically, then again on writable
pub fn run_server(opts: ServerOptions) -> Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(1024);
    let mut listener = bind_reuseport(opts.addr)?;
    const LISTENER: Token = Token(0);
    const WAKER_TOKEN: Token = Token(usize::MAX - 1);

    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;

    // Console input arrives from a reader thread; the waker breaks the
    // poll so operator commands do not wait out the timeout.
    let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
    let console_rx = spawn_stdin_reader(Arc::clone(&waker))?;

    // Operator commands run through their own local-engine session.
    let mut op_session = Session::new(Box::new(LocalEngine::new(Arc::clone(&opts.dict))));
    let mut script: Option<ScriptFeeder> = None;

    // token -> connection, plus upstream-token -> owning client token
    let mut clients: HashMap<usize, Connection> = HashMap::new();
    let mut upstream_owner: HashMap<usize, usize> = HashMap::new();
    let mut next_tok: usize = 1;

    info!("listening on {} ({:?} mode)", opts.addr, opts.mode);

    loop {
        poll.poll(&mut events, Some(Duration::from_millis(200)))?;

        for ev in events.iter() {
            match ev.token() {
                // Accept every connection that is ready
                LISTENER => loop {
                    match listener.accept() {
                        Ok((mut sock, peer)) => {
                            sock.set_nodelay(true).ok();
                            let tok = next_tok;
                            next_tok += 1;
                            poll.registry().register(
                                &mut sock,
                                Token(tok),
                                Interest::READABLE | Interest::WRITABLE,
                            )?;

                            match new_conduit(&opts) {
                                Ok(mut conduit) => {
                                    // Proxy/monitor conduits carry their own
                                    // upstream socket; give it a token too.
                                    if let Some(up) = conduit_upstream(&mut conduit) {
                                        let utok = next_tok;
                                        next_tok += 1;
                                        poll.registry().register(
                                            up,
                                            Token(utok),
                                            Interest::READABLE | Interest::WRITABLE,
                                        )?;
                                        upstream_owner.insert(utok, tok);
                                    }
                                    info!("client {} connected from {}", tok, peer);
                                    clients.insert(
                                        tok,
                                        Connection {
                                            sock,
                                            wbuf: BytesMut::new(),
                                            conduit,
                                            dead: false,
                                        },
                                    );
                                }
                                Err(e) => {
                                    // Upstream unreachable: this client
                                    // cannot be served.
                                    warn!("dropping client from {}: {}", peer, e);
                                }
                            }
                        }
                        Err(ref e) if would_block(e) => break,
                        Err(e) => {
                            warn!("accept error: {}", e);
                            break;
                        }
                    }
                },

                // Console lines are drained after the event sweep.
                WAKER_TOKEN => {}

                Token(t) => {
                    let owner = upstream_owner.get(&t).copied().unwrap_or(t);
                    if let Some(conn) = clients.get_mut(&owner) {
                        if t == owner && ev.is_readable() {
                            read_client(conn, &opts.log);
                        }
                        service(conn, &opts.log);
                    }
                }
            }
        }

        // Operator console
        for line in console_rx.try_iter() {
            match line.as_str() {
                "bye" | "quit" | "exit" => {
                    info!("operator shutdown");
                    return Ok(());
                }
                word => {
                    if let Some(file) = script_for_sentinel(word) {
                        let path = opts.script_dir.join(file);
                        let feeder_session =
                            Session::new(Box::new(LocalEngine::new(Arc::clone(&opts.dict))));
                        match ScriptFeeder::load(&path, feeder_session) {
                            Ok(f) => script = Some(f),
                            Err(e) => warn!("{}", e),
                        }
                    } else {
                        op_session.feed_line(line.as_bytes());
                        op_session.pump();
                        print_replies(&mut op_session);
                    }
                }
            }
        }

        // Script replay pacing
        if let Some(f) = script.as_mut() {
            if !f.run(Instant::now()) {
                script = None;
            }
        }

        // Cooperative pump of every connection: proxy replies, pending
        // writes, close-on-drain
        for conn in clients.values_mut() {
            service(conn, &opts.log);
        }

        // Reap dead connections and their upstream token mappings
        let dead: Vec<usize> = clients
            .iter()
            .filter(|(_, c)| c.dead)
            .map(|(t, _)| *t)
            .collect();
        for t in dead {
            info!("client {} disconnected", t);
            clients.remove(&t);
            upstream_owner.retain(|_, owner| *owner != t);
        }
    }
}

/// Build the backend conduit for a fresh client connection
fn new_conduit(opts: &ServerOptions) -> Result<Conduit> {
    match opts.mode {
        Mode::Local => Ok(Conduit::Session(Session::new(Box::new(LocalEngine::new(
            Arc::clone(&opts.dict),
        ))))),
        Mode::Proxy => {
            let engine = UpstreamEngine::connect(opts.upstream)?;
            Ok(Conduit::Session(Session::new(Box::new(engine))))
        }
        Mode::Monitor => Ok(Conduit::Monitor(Monitor::connect(opts.upstream)?)),
    }
}

fn conduit_upstream(conduit: &mut Conduit) -> Option<&mut TcpStream> {
    match conduit {
        Conduit::Session(s) => s.upstream_socket(),
        Conduit::Monitor(m) => Some(m.socket_mut()),
    }
}

/// Drain the client socket and hand the bytes to the conduit
fn read_client(conn: &mut Connection, log: &Option<TrafficLog>) {
    let mut tmp = [0u8; READ_BUF];
    loop {
        match conn.sock.read(&mut tmp) {
            Ok(0) => {
                conn.dead = true;
                break;
            }
            Ok(n) => {
                if let Some(log) = log {
                    log.client(&tmp[..n]);
                }
                match &mut conn.conduit {
                    Conduit::Session(s) => s.feed(&tmp[..n]),
                    Conduit::Monitor(m) => m.from_client(&tmp[..n]),
                }
            }
            Err(ref e) if would_block(e) => break,
            Err(_) => {
                conn.dead = true;
                break;
            }
        }
    }
}

/// Pump the conduit, collect new outbound bytes, try to flush them
fn service(conn: &mut Connection, log: &Option<TrafficLog>) {
    if conn.dead {
        return;
    }

    let before = conn.wbuf.len();
    let mut closing = false;
    match &mut conn.conduit {
        Conduit::Session(s) => {
            s.pump();
            s.drain_output(&mut conn.wbuf);
            closing = s.is_closing();
        }
        Conduit::Monitor(m) => {
            if let Err(e) = m.pump(&mut conn.wbuf) {
                warn!("monitor relay fault: {}", e);
                closing = true;
            }
            if m.is_closed() && !m.wants_write() {
                closing = true;
            }
        }
    }
    if let Some(log) = log {
        if conn.wbuf.len() > before {
            log.server(&conn.wbuf[before..]);
        }
    }

    // Flush whatever the socket will take right now; the rest goes out
    // on the next writable event or tick.
    while !conn.wbuf.is_empty() {
        match conn.sock.write(&conn.wbuf) {
            Ok(0) => {
                conn.dead = true;
                return;
            }
            Ok(n) => {
                let _ = conn.wbuf.split_to(n);
            }
            Err(ref e) if would_block(e) => break,
            Err(_) => {
                conn.dead = true;
                return;
            }
        }
    }

    if closing && conn.wbuf.is_empty() {
        conn.dead = true;
    }
}

/// Check if an I/O error means the operation should be retried later
#[inline]
fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
