/*!
 * Operator Console
 *
 * A dedicated thread reads standard input line by line and hands the
 * lines to the event loop over a channel, waking the poll each time.
 * The loop interprets `bye`/`quit`/`exit`, the script-replay sentinels,
 * and treats anything else as a raw command for the local engine.
 *
 * Script replay feeds a file one line at a time with a small delay
 * between lines, printing each reply, which is how recorded client logs
 * are played back against the server.
 */

use crate::logger::escape_bytes;
use crate::session::Session;
use anyhow::{Context, Result};
use crossbeam::channel::{unbounded, Receiver};
use log::info;
use mio::Waker;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Delay between replayed script lines
pub const SCRIPT_LINE_DELAY: Duration = Duration::from_millis(100);

/// Spawn the stdin reader thread. Each line arrives on the returned
/// channel; the waker nudges the poll loop so lines are handled promptly.
pub fn spawn_stdin_reader(waker: Arc<Waker>) -> Result<Receiver<String>> {
    let (tx, rx) = unbounded::<String>();
    std::thread::Builder::new()
        .name("console-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if tx.send(line).is_err() {
                    break;
                }
                let _ = waker.wake();
            }
        })?;
    Ok(rx)
}

/// Replays a script file through its own dispatcher session, one line
/// per tick interval
pub struct ScriptFeeder {
    lines: Vec<String>,
    index: usize,
    next_at: Instant,
    session: Session,
}

impl ScriptFeeder {
    /// Load a script file; every non-empty line is one command (RESP
    /// headers and inline commands both work, same as the wire)
    pub fn load(path: &Path, session: Session) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("script {}", path.display()))?;
        let lines: Vec<String> = text
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.is_empty())
            .collect();
        info!("replaying {} lines from {}", lines.len(), path.display());
        Ok(Self {
            lines,
            index: 0,
            next_at: Instant::now(),
            session,
        })
    }

    /// Feed the next line if its time has come. Returns false once the
    /// script is exhausted and all replies have been printed.
    pub fn run(&mut self, now: Instant) -> bool {
        if self.index < self.lines.len() && now >= self.next_at {
            let line = &self.lines[self.index];
            println!("Sending: {}", line);
            self.session.feed_line(line.as_bytes());
            self.index += 1;
            self.next_at = now + SCRIPT_LINE_DELAY;
        }
        self.session.pump();
        print_replies(&mut self.session);
        self.index < self.lines.len() || self.session.has_output()
    }
}

/// Print any pending replies from a console-owned session
pub fn print_replies(session: &mut Session) {
    let out = session.take_output();
    if !out.is_empty() {
        let printable = String::from_utf8_lossy(&escape_bytes(&out)).into_owned();
        println!("FromRedis:{}", printable);
    }
}

/// Map a console sentinel to its script file name, if it is one
pub fn script_for_sentinel(word: &str) -> Option<&'static str> {
    match word {
        "test" => Some("test.txt"),
        "file1" => Some("logfile1.txt"),
        "file2" => Some("logfile2.txt"),
        "file3" => Some("logfile3.txt"),
        "file4" => Some("logfile4.txt"),
        _ => None,
    }
}
