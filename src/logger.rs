/*!
 * Traffic Logger
 *
 * Append-only exchange log: every chunk of bytes crossing a connection
 * is recorded as a `[Client]` or `[Server]` line. Writing happens on a
 * dedicated background thread fed over a channel, so logging can never
 * block the data path; a full or closed channel just drops the record.
 */

use anyhow::Result;
use crossbeam::channel::{unbounded, Sender};
use std::io::Write;

/// Handle for recording traffic; cheap to clone, one per server
#[derive(Clone)]
pub struct TrafficLog {
    tx: Sender<Vec<u8>>,
}

/// Spawn the background log writer for `path`
pub fn spawn_traffic_log(path: &str) -> Result<TrafficLog> {
    let (tx, rx) = unbounded::<Vec<u8>>();
    let path = path.to_string();

    std::thread::Builder::new()
        .name("traffic-log".into())
        .spawn(move || {
            let mut f = match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
            {
                Ok(f) => f,
                Err(e) => {
                    log::error!("traffic log {}: {}", path, e);
                    return;
                }
            };
            while let Ok(record) = rx.recv() {
                let _ = f.write_all(&record);
                let _ = f.flush();
            }
        })?;

    Ok(TrafficLog { tx })
}

impl TrafficLog {
    /// Record bytes that arrived from a client
    #[inline]
    pub fn client(&self, bytes: &[u8]) {
        self.record(b"[Client]", bytes);
    }

    /// Record bytes sent back to a client (or produced by the upstream)
    #[inline]
    pub fn server(&self, bytes: &[u8]) {
        self.record(b"[Server]", bytes);
    }

    fn record(&self, prefix: &[u8], bytes: &[u8]) {
        let mut line = Vec::with_capacity(prefix.len() + bytes.len() + 2);
        line.extend_from_slice(prefix);
        line.extend_from_slice(&escape_bytes(bytes));
        line.extend_from_slice(b"\r\n");
        // Best effort: a closed channel means shutdown is in progress.
        let _ = self.tx.send(line);
    }
}

/// Binary-safe rendering: printable ASCII passes through, everything
/// else becomes `$` plus two uppercase hex digits
pub fn escape_bytes(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &c in bytes {
        if (32..=126).contains(&c) {
            out.push(c);
        } else {
            out.extend_from_slice(format!("${:02X}", c).as_bytes());
        }
    }
    out
}
