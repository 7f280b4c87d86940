/*!
 * Per-Connection Dispatcher
 *
 * One `Session` per client connection. It feeds incoming bytes to the
 * RESP decoder, routes each decoded frame (executing it or queueing it
 * under MULTI), converts engine completions into RESP reply frames, and
 * keeps the outbound queue that the network layer drains to the socket.
 */

use crate::buffer::Outbound;
use crate::engine::{Completion, Engine, Outcome, RequestKind};
use crate::protocol::{
    resp_array_header, resp_bulk, resp_error, resp_integer, resp_null, resp_simple, Attribute,
    Command, CommandStream, Frame,
};
use crate::storage::{is_integer_looking, parse_integer_prefix};
use bytes::BytesMut;
use log::{debug, warn};

const WRONGTYPE_MSG: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER_MSG: &str = "ERR value is not an integer or out of range";
const DEFAULT_SCAN_COUNT: usize = 10;

/// Dispatcher state for one client connection
pub struct Session {
    stream: CommandStream,
    engine: Box<dyn Engine>,
    rbuf: BytesMut,
    out: Outbound,
    multi_active: bool,
    multi_queue: Vec<Frame>,
    closing: bool,
}

impl Session {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Self {
            stream: CommandStream::new(),
            engine,
            rbuf: BytesMut::with_capacity(4096),
            out: Outbound::new(),
            multi_active: false,
            multi_queue: Vec::new(),
            closing: false,
        }
    }

    /// Whether the connection should be torn down once its outbound
    /// bytes have flushed (QUIT, decode fault, engine fault)
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Append raw socket bytes and dispatch every complete frame
    pub fn feed(&mut self, bytes: &[u8]) {
        self.rbuf.extend_from_slice(bytes);
        loop {
            match self.stream.feed(&mut self.rbuf) {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => break,
                Err(e) => {
                    warn!("protocol fault: {}", e);
                    self.out.push(resp_error(&format!("ERR Protocol error: {}", e)));
                    self.stream.reset();
                    self.closing = true;
                    return;
                }
            }
            if self.closing {
                return;
            }
        }
    }

    /// Feed one operator-console line (no CRLF framing)
    pub fn feed_line(&mut self, line: &[u8]) {
        match self.stream.feed_line(line) {
            Ok(Some(frame)) => self.handle_frame(frame),
            Ok(None) => {}
            Err(e) => {
                warn!("protocol fault on console line: {}", e);
                self.out.push(resp_error(&format!("ERR Protocol error: {}", e)));
                self.stream.reset();
            }
        }
    }

    /// Collect completions the engine has ready (drives proxy-mode
    /// replies; a no-op for an idle local engine)
    pub fn pump(&mut self) {
        match self.engine.pump() {
            Ok(completions) => {
                for c in completions {
                    self.encode_completion(c);
                }
            }
            Err(e) => {
                warn!("engine fault: {}", e);
                self.out.push(resp_error(&format!("ERR {}", e)));
                self.closing = true;
            }
        }
    }

    /// Move queued reply frames into a socket write buffer
    pub fn drain_output(&mut self, wbuf: &mut BytesMut) {
        self.out.drain_into(wbuf);
    }

    /// Take queued reply frames as one byte vector (console, tests)
    pub fn take_output(&mut self) -> Vec<u8> {
        self.out.take_bytes()
    }

    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// The upstream socket, when the backend owns one
    pub fn upstream_socket(&mut self) -> Option<&mut mio::net::TcpStream> {
        self.engine.upstream_socket()
    }

    fn handle_frame(&mut self, frame: Frame) {
        debug!("dispatch {:?} argc={}", frame.kind, frame.argc());

        // Transaction buffering: everything except MULTI/EXEC queues.
        if self.multi_active && !matches!(frame.kind, Command::Multi | Command::Exec) {
            self.multi_queue.push(frame);
            self.out.push(resp_simple("QUEUED"));
            return;
        }

        match frame.kind {
            Command::Multi => {
                if self.multi_active {
                    self.out
                        .push(resp_error("ERR MULTI calls can not be nested"));
                } else {
                    self.multi_active = true;
                    self.multi_queue.clear();
                    self.out.push(resp_simple("OK"));
                }
            }
            Command::Exec => {
                if !self.multi_active {
                    self.out.push(resp_error("ERR EXEC without MULTI"));
                    return;
                }
                let queued = std::mem::take(&mut self.multi_queue);
                self.multi_active = false;
                self.out.push(resp_array_header(queued.len()));
                for f in queued {
                    self.execute(f);
                }
            }
            _ => self.execute(frame),
        }
    }

    /// Execute one non-transaction-control frame
    fn execute(&mut self, frame: Frame) {
        match frame.kind {
            Command::Ping => {
                if frame.argc() == 0 {
                    self.out.push(resp_simple("PONG"));
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Select => {
                if frame.argc() == 1 {
                    let index = parse_integer_prefix(frame.arg_data(0).unwrap_or(b""));
                    self.engine.select(index);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Set => {
                if frame.argc() == 2 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    let value = frame.arg_data(1).unwrap_or(b"").to_vec();
                    self.engine.set(&key, &value);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::SetNx => {
                if frame.argc() == 2 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    let value = frame.arg_data(1).unwrap_or(b"").to_vec();
                    self.engine.setnx(&key, &value);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Get => {
                if frame.argc() == 1 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    self.engine.get(&key);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Del => {
                if frame.argc() == 1 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    self.engine.del(&key);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Exists => {
                if frame.argc() == 1 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    self.engine.exists(&key);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Incr | Command::Decr => {
                if frame.argc() == 1 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    let delta = if frame.kind == Command::Incr { 1 } else { -1 };
                    self.engine.increment(&key, delta);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::IncrBy | Command::DecrBy => {
                if frame.argc() == 2 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    let raw = frame.arg_data(1).unwrap_or(b"");
                    // The delta argument itself must look like an integer.
                    if !is_integer_looking(raw) {
                        self.out.push(resp_error(NOT_INTEGER_MSG));
                        return;
                    }
                    let mut delta = parse_integer_prefix(raw);
                    if frame.kind == Command::DecrBy {
                        delta = -delta;
                    }
                    self.engine.increment(&key, delta);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::RPush => {
                if frame.argc() == 2 {
                    let key = frame.arg_data(0).unwrap_or(b"").to_vec();
                    let value = frame.arg_data(1).unwrap_or(b"").to_vec();
                    self.engine.push(&key, &value);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Scan => self.scan(&frame),

            Command::Watch => {
                if frame.argc() >= 1 {
                    let keys: Vec<Vec<u8>> = (0..frame.argc())
                        .filter_map(|i| frame.arg_data(i).map(|d| d.to_vec()))
                        .collect();
                    self.engine.watch(&keys);
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Unwatch => {
                if frame.argc() == 0 {
                    self.engine.unwatch();
                    self.pump();
                } else {
                    self.bad_args(&frame);
                }
            }

            Command::Quit => {
                self.out.push(resp_simple("OK"));
                self.closing = true;
            }

            Command::Unsupported => {
                self.out
                    .push(resp_error(&format!("ERR unsupported command '{}'", frame.name())));
            }
            Command::Unknown => {
                self.out
                    .push(resp_error(&format!("ERR unknown command '{}'", frame.name())));
            }

            // Reply-kind frames have no meaning coming from a client.
            Command::Ok | Command::Err | Command::ReturnCode | Command::ReturnData => {
                debug!("ignoring reply-kind frame from client");
            }

            Command::Multi | Command::Exec => unreachable!("handled by the caller"),
        }
    }

    /// SCAN cursor [MATCH pattern] [COUNT n]
    fn scan(&mut self, frame: &Frame) {
        if frame.argc() == 0 {
            self.bad_args(frame);
            return;
        }
        let cursor = parse_integer_prefix(frame.arg_data(0).unwrap_or(b""));
        if cursor < 0 {
            self.out.push(resp_error("ERR invalid cursor"));
            return;
        }

        let mut pattern: Option<Vec<u8>> = None;
        let mut count = DEFAULT_SCAN_COUNT;
        let mut i = 1;
        while i < frame.argc() {
            let attr = frame.arg(i).map(|a| a.attr).unwrap_or(Attribute::Asciiz);
            let Some(value) = frame.arg_data(i + 1) else {
                self.out.push(resp_error("ERR syntax error"));
                return;
            };
            match attr {
                Attribute::Match => pattern = Some(value.to_vec()),
                Attribute::Count => {
                    if !is_integer_looking(value) {
                        self.out.push(resp_error(NOT_INTEGER_MSG));
                        return;
                    }
                    let n = parse_integer_prefix(value);
                    if n < 1 {
                        self.out.push(resp_error(NOT_INTEGER_MSG));
                        return;
                    }
                    count = n as usize;
                }
                _ => {
                    self.out.push(resp_error("ERR syntax error"));
                    return;
                }
            }
            i += 2;
        }

        self.engine
            .scan(cursor as u64, count, pattern.as_deref());
        self.pump();
    }

    fn bad_args(&mut self, frame: &Frame) {
        self.out.push(resp_error(&format!(
            "ERR wrong number of arguments for '{}' command",
            frame.name()
        )));
    }

    /// Encode one engine completion as RESP reply frames
    fn encode_completion(&mut self, c: Completion) {
        match c.outcome {
            Outcome::Done => self.out.push(resp_simple("OK")),
            Outcome::Failed(msg) => {
                self.out
                    .push(resp_error(&String::from_utf8_lossy(&msg)));
            }
            Outcome::Int(n) => self.out.push(resp_integer(n)),
            Outcome::Data(Some(data)) => self.out.push(resp_bulk(&data)),
            Outcome::Data(None) => self.out.push(resp_null()),
            Outcome::WrongType => self.out.push(resp_error(WRONGTYPE_MSG)),
            Outcome::NotInteger => self.out.push(resp_error(NOT_INTEGER_MSG)),
            Outcome::Keys { cursor, keys } => {
                debug_assert_eq!(c.kind, RequestKind::Scan);
                // Two-element reply: the next cursor, then the key array.
                self.out.push(resp_array_header(2));
                self.out.push(resp_bulk(cursor.to_string().as_bytes()));
                self.out.push(resp_array_header(keys.len()));
                for key in keys {
                    self.out.push(resp_bulk(&key));
                }
            }
        }
    }
}
