/*!
 * Key/Value Engine Interface
 *
 * One interface, two backends: the local in-memory dictionary and the
 * upstream Redis adapter. Operations are issued through typed methods;
 * results come back as `Completion` values drained from `pump()` in
 * strict issue order, which is the same contract whether the answer was
 * computed under the local mutex or arrived from the upstream socket.
 */

use crate::storage::{Dict, StoreError};
use crate::wildcard::WildCard;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;

/// Which operation a completion answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Select,
    Set,
    SetNx,
    Get,
    Del,
    Exists,
    Increment,
    Push,
    Scan,
    Watch,
    Unwatch,
}

/// The result carried by a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Success with no payload (`+OK` class)
    Done,
    /// Failure with an error-line message (no leading `-`)
    Failed(Vec<u8>),
    /// Integer result (`:N` class)
    Int(i64),
    /// Payload or miss (`$…` / `$-1` class)
    Data(Option<Vec<u8>>),
    /// SCAN step result
    Keys { cursor: u64, keys: Vec<Vec<u8>> },
    /// Operation against a value of the wrong type
    WrongType,
    /// Value or argument is not an integer
    NotInteger,
}

/// One completed engine operation, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub kind: RequestKind,
    pub outcome: Outcome,
}

impl Completion {
    pub fn new(kind: RequestKind, outcome: Outcome) -> Self {
        Self { kind, outcome }
    }
}

/// Backend interface shared by the local and proxy engines.
///
/// Issue methods never block on the answer. `pump()` returns every
/// completion that has become available, in the exact order the
/// operations were issued; for the local engine that is immediately, for
/// the proxy engine once the upstream replied. A `pump()` error is fatal
/// for the owning connection.
pub trait Engine {
    fn select(&mut self, index: i64);
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn setnx(&mut self, key: &[u8], value: &[u8]);
    fn get(&mut self, key: &[u8]);
    fn del(&mut self, key: &[u8]);
    fn exists(&mut self, key: &[u8]);
    fn increment(&mut self, key: &[u8], delta: i64);
    fn push(&mut self, key: &[u8], value: &[u8]);
    fn scan(&mut self, cursor: u64, count: usize, pattern: Option<&[u8]>);
    fn watch(&mut self, keys: &[Vec<u8>]);
    fn unwatch(&mut self);

    /// Drain available completions, strictly in issue order
    fn pump(&mut self) -> Result<Vec<Completion>>;

    /// The upstream socket, if this engine owns one (for poll
    /// registration)
    fn upstream_socket(&mut self) -> Option<&mut mio::net::TcpStream> {
        None
    }
}

/// Local engine: executes against the shared dictionary and completes
/// synchronously. The completion queue still goes through `pump()` so
/// the dispatcher treats both engines identically.
pub struct LocalEngine {
    dict: Arc<Dict>,
    done: VecDeque<Completion>,
}

impl LocalEngine {
    pub fn new(dict: Arc<Dict>) -> Self {
        Self {
            dict,
            done: VecDeque::new(),
        }
    }

    fn complete(&mut self, kind: RequestKind, outcome: Outcome) {
        self.done.push_back(Completion::new(kind, outcome));
    }
}

impl Engine for LocalEngine {
    /// The local engine exposes a single logical database
    fn select(&mut self, index: i64) {
        let outcome = if index == 0 {
            Outcome::Done
        } else {
            Outcome::Failed(b"ERR DB index is out of range".to_vec())
        };
        self.complete(RequestKind::Select, outcome);
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.dict.set(key, value);
        self.complete(RequestKind::Set, Outcome::Done);
    }

    fn setnx(&mut self, key: &[u8], value: &[u8]) {
        let inserted = self.dict.setnx(key, value);
        self.complete(RequestKind::SetNx, Outcome::Int(inserted as i64));
    }

    fn get(&mut self, key: &[u8]) {
        let data = self.dict.get(key);
        self.complete(RequestKind::Get, Outcome::Data(data));
    }

    fn del(&mut self, key: &[u8]) {
        let removed = self.dict.del(key);
        self.complete(RequestKind::Del, Outcome::Int(removed as i64));
    }

    fn exists(&mut self, key: &[u8]) {
        let present = self.dict.exists(key);
        self.complete(RequestKind::Exists, Outcome::Int(present as i64));
    }

    fn increment(&mut self, key: &[u8], delta: i64) {
        let outcome = match self.dict.increment(key, delta) {
            Ok(n) => Outcome::Int(n),
            Err(StoreError::NotInteger) => Outcome::NotInteger,
            Err(StoreError::WrongType) => Outcome::WrongType,
        };
        self.complete(RequestKind::Increment, outcome);
    }

    fn push(&mut self, key: &[u8], value: &[u8]) {
        let outcome = match self.dict.push(key, value) {
            Ok(len) => Outcome::Int(len as i64),
            Err(StoreError::WrongType) => Outcome::WrongType,
            Err(StoreError::NotInteger) => Outcome::NotInteger,
        };
        self.complete(RequestKind::Push, outcome);
    }

    fn scan(&mut self, cursor: u64, count: usize, pattern: Option<&[u8]>) {
        let compiled = pattern.map(WildCard::compile);
        let result = self.dict.scan(cursor, count, compiled.as_ref());
        self.complete(
            RequestKind::Scan,
            Outcome::Keys {
                cursor: result.cursor,
                keys: result.keys,
            },
        );
    }

    // WATCH bookkeeping is accepted but has no effect on EXEC.
    fn watch(&mut self, _keys: &[Vec<u8>]) {
        self.complete(RequestKind::Watch, Outcome::Done);
    }

    fn unwatch(&mut self) {
        self.complete(RequestKind::Unwatch, Outcome::Done);
    }

    fn pump(&mut self) -> Result<Vec<Completion>> {
        Ok(self.done.drain(..).collect())
    }
}
