/*!
 * Transparent Monitor Relay
 *
 * The third backend: a byte-level man-in-the-middle. Client bytes go to
 * the upstream unchanged and upstream bytes come back unchanged; nothing
 * is decoded. The point of the mode is the traffic log, which captures
 * both directions of every exchange with hex escaping.
 */

use anyhow::{bail, Result};
use bytes::BytesMut;
use mio::net::TcpStream;
use std::io::{Read, Write};
use std::net::SocketAddr;

const READ_BUF: usize = 4096;

/// One client's relay toward the upstream
pub struct Monitor {
    upstream: TcpStream,
    /// Bytes waiting to reach the upstream
    pending: BytesMut,
    peer: SocketAddr,
    closed: bool,
}

impl Monitor {
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let upstream = TcpStream::connect(addr)?;
        Ok(Self {
            upstream,
            pending: BytesMut::new(),
            peer: addr,
            closed: false,
        })
    }

    /// Queue client bytes for forwarding
    pub fn from_client(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Flush queued client bytes upstream and move any upstream output
    /// into the client's write buffer. Returns an error when the relay
    /// is no longer usable.
    pub fn pump(&mut self, to_client: &mut BytesMut) -> Result<()> {
        if self.closed {
            bail!("upstream {} closed", self.peer);
        }

        while !self.pending.is_empty() {
            match self.upstream.write(&self.pending) {
                Ok(0) => bail!("upstream {} rejected write", self.peer),
                Ok(n) => {
                    let _ = self.pending.split_to(n);
                }
                Err(ref e) if would_block(e) => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::NotConnected => break,
                Err(e) => bail!("upstream {} write failed: {}", self.peer, e),
            }
        }

        let mut tmp = [0u8; READ_BUF];
        loop {
            match self.upstream.read(&mut tmp) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => to_client.extend_from_slice(&tmp[..n]),
                Err(ref e) if would_block(e) => break,
                Err(ref e) if e.kind() == std::io::ErrorKind::NotConnected => break,
                Err(e) => bail!("upstream {} read failed: {}", self.peer, e),
            }
        }
        Ok(())
    }

    pub fn socket_mut(&mut self) -> &mut TcpStream {
        &mut self.upstream
    }

    pub fn wants_write(&self) -> bool {
        !self.pending.is_empty()
    }

    /// The upstream reached EOF; once pending client bytes are gone the
    /// connection should be reaped
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[inline]
fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
