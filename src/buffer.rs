/*!
 * Outbound Reply Buffer
 *
 * Each connection queues its pending RESP replies here as discrete
 * frames. A drain step walks the queue in order and appends the frames
 * to the connection's socket write buffer.
 */

use bytes::BytesMut;
use std::collections::VecDeque;

/// Queue of encoded reply frames awaiting delivery to one connection
#[derive(Debug, Default)]
pub struct Outbound {
    frames: VecDeque<Vec<u8>>,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one encoded RESP frame
    #[inline]
    pub fn push(&mut self, frame: Vec<u8>) {
        self.frames.push_back(frame);
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Move every queued frame, in order, into `wbuf`
    pub fn drain_into(&mut self, wbuf: &mut BytesMut) {
        while let Some(frame) = self.frames.pop_front() {
            wbuf.extend_from_slice(&frame);
        }
    }

    /// Take every queued frame as one contiguous byte vector (test and
    /// console paths)
    pub fn take_bytes(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(frame) = self.frames.pop_front() {
            out.extend_from_slice(&frame);
        }
        out
    }
}
