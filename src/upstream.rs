/*!
 * Upstream Proxy Engine
 *
 * The alternate backend: speaks RESP to a real Redis server over one
 * nonblocking TCP connection per client session. Each issued operation
 * is encoded into the write buffer and a descriptor is queued; `pump()`
 * flushes writes, reads whatever the upstream produced, and matches each
 * decoded reply frame against the head of the descriptor FIFO. Replies
 * are therefore consumed in exactly the order the requests were sent.
 */

use crate::engine::{Completion, Engine, Outcome, RequestKind};
use crate::protocol::{encode_command, Command, CommandStream, Frame};
use crate::storage::parse_integer_prefix;
use anyhow::{bail, Result};
use bytes::BytesMut;
use log::{debug, warn};
use mio::net::TcpStream;
use std::io::{Read, Write};
use std::net::SocketAddr;

const READ_BUF: usize = 4096;

/// RESP client toward the upstream Redis, with the pending-reply FIFO
pub struct UpstreamEngine {
    stream: TcpStream,
    decoder: CommandStream,
    pending: std::collections::VecDeque<RequestKind>,
    rbuf: BytesMut,
    wbuf: BytesMut,
    peer: SocketAddr,
}

impl UpstreamEngine {
    /// Start a nonblocking connect toward the upstream. Writes issued
    /// before the connection settles stay buffered and flush on the
    /// first successful pump.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        Ok(Self {
            stream,
            decoder: CommandStream::reply_stream(),
            pending: std::collections::VecDeque::new(),
            rbuf: BytesMut::with_capacity(READ_BUF),
            wbuf: BytesMut::new(),
            peer: addr,
        })
    }

    fn issue(&mut self, kind: RequestKind, parts: &[&[u8]]) {
        self.wbuf.extend_from_slice(&encode_command(parts));
        self.pending.push_back(kind);
    }

    /// Write as much of the buffered output as the socket accepts
    fn flush(&mut self) -> Result<()> {
        while !self.wbuf.is_empty() {
            match self.stream.write(&self.wbuf) {
                Ok(0) => bail!("upstream {} rejected write", self.peer),
                Ok(n) => {
                    let _ = self.wbuf.split_to(n);
                }
                Err(ref e) if would_block(e) => break,
                // A connect still in progress reports NotConnected on
                // some platforms; keep the bytes buffered.
                Err(ref e) if e.kind() == std::io::ErrorKind::NotConnected => break,
                Err(e) => bail!("upstream {} write failed: {}", self.peer, e),
            }
        }
        Ok(())
    }

    /// Convert one decoded reply frame into the completion for the head
    /// descriptor
    fn match_reply(&mut self, frame: Frame) -> Result<Completion> {
        let Some(kind) = self.pending.pop_front() else {
            bail!("unexpected reply from upstream {} with no request pending", self.peer);
        };
        let outcome = match frame.kind {
            Command::Ok => Outcome::Done,
            Command::Err => Outcome::Failed(frame.head().to_vec()),
            Command::ReturnCode => Outcome::Int(parse_integer_prefix(frame.head())),
            Command::ReturnData => match kind {
                RequestKind::Scan => {
                    // Flattened reply: cursor first, matched keys after.
                    let cursor = parse_integer_prefix(frame.head()).max(0) as u64;
                    let keys = frame.args.iter().skip(1).map(|a| a.data.clone()).collect();
                    Outcome::Keys { cursor, keys }
                }
                _ => {
                    let data = frame.args.first().map(|a| a.data.clone());
                    Outcome::Data(data)
                }
            },
            other => bail!("upstream {} produced unexpected frame kind {:?}", self.peer, other),
        };
        Ok(Completion::new(kind, outcome))
    }
}

impl Engine for UpstreamEngine {
    /// SELECT is forwarded verbatim; the upstream decides which indices
    /// exist
    fn select(&mut self, index: i64) {
        let idx = index.to_string();
        self.issue(RequestKind::Select, &[b"SELECT", idx.as_bytes()]);
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.issue(RequestKind::Set, &[b"SET", key, value]);
    }

    fn setnx(&mut self, key: &[u8], value: &[u8]) {
        self.issue(RequestKind::SetNx, &[b"SETNX", key, value]);
    }

    fn get(&mut self, key: &[u8]) {
        self.issue(RequestKind::Get, &[b"GET", key]);
    }

    fn del(&mut self, key: &[u8]) {
        self.issue(RequestKind::Del, &[b"DEL", key]);
    }

    fn exists(&mut self, key: &[u8]) {
        self.issue(RequestKind::Exists, &[b"EXISTS", key]);
    }

    /// Negative deltas travel as DECRBY so the upstream sees the same
    /// command a direct client would have sent
    fn increment(&mut self, key: &[u8], delta: i64) {
        if delta >= 0 {
            let d = delta.to_string();
            self.issue(RequestKind::Increment, &[b"INCRBY", key, d.as_bytes()]);
        } else {
            let d = (-delta).to_string();
            self.issue(RequestKind::Increment, &[b"DECRBY", key, d.as_bytes()]);
        }
    }

    fn push(&mut self, key: &[u8], value: &[u8]) {
        self.issue(RequestKind::Push, &[b"RPUSH", key, value]);
    }

    fn scan(&mut self, cursor: u64, count: usize, pattern: Option<&[u8]>) {
        let cur = cursor.to_string();
        let cnt = count.to_string();
        let mut parts: Vec<&[u8]> = vec![b"SCAN", cur.as_bytes()];
        if let Some(p) = pattern {
            parts.push(b"MATCH");
            parts.push(p);
        }
        parts.push(b"COUNT");
        parts.push(cnt.as_bytes());
        self.issue(RequestKind::Scan, &parts);
    }

    fn watch(&mut self, keys: &[Vec<u8>]) {
        let mut parts: Vec<&[u8]> = vec![b"WATCH"];
        for k in keys {
            parts.push(k);
        }
        self.issue(RequestKind::Watch, &parts);
    }

    fn unwatch(&mut self) {
        self.issue(RequestKind::Unwatch, &[b"UNWATCH"]);
    }

    fn pump(&mut self) -> Result<Vec<Completion>> {
        self.flush()?;

        let mut tmp = [0u8; READ_BUF];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => {
                    if !self.pending.is_empty() {
                        bail!(
                            "upstream {} closed with {} replies outstanding",
                            self.peer,
                            self.pending.len()
                        );
                    }
                    debug!("upstream {} closed", self.peer);
                    break;
                }
                Ok(n) => self.rbuf.extend_from_slice(&tmp[..n]),
                Err(ref e) if would_block(e) => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::NotConnected => break,
                Err(e) => {
                    warn!("upstream {} read failed: {}", self.peer, e);
                    bail!("upstream {} read failed: {}", self.peer, e);
                }
            }
        }

        let mut out = Vec::new();
        loop {
            match self.decoder.feed(&mut self.rbuf) {
                Ok(Some(frame)) => out.push(self.match_reply(frame)?),
                Ok(None) => break,
                Err(e) => bail!("upstream {} reply decode fault: {}", self.peer, e),
            }
        }
        Ok(out)
    }

    fn upstream_socket(&mut self) -> Option<&mut TcpStream> {
        Some(&mut self.stream)
    }
}

#[inline]
fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
