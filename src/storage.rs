/*!
 * In-Memory Storage Implementation
 *
 * The local key/value engine: a process-wide dictionary from byte-string
 * keys to tagged string-or-list values, guarded by a single mutex that
 * every operation holds for its full duration. Iteration order of the
 * underlying map is what SCAN cursors walk.
 */

use crate::wildcard::WildCard;
use ahash::RandomState;
use hashbrown::HashMap;
use parking_lot::Mutex;

/// A stored value: one logical byte string, or an ordered list of them.
///
/// The tag is fixed for the lifetime of the key: SET replaces an existing
/// list wholesale (the key becomes a string), while RPUSH onto a string
/// is a wrong-type failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(Vec<u8>),
    List(Vec<Vec<u8>>),
}

impl Value {
    /// A string is integer-looking iff its first byte is a digit or a
    /// sign. No full parse; that is the contract INCR tests against.
    pub fn is_integer(&self) -> bool {
        match self {
            Value::Str(s) => is_integer_looking(s),
            Value::List(_) => false,
        }
    }

    /// First block of the value: the whole string, or the head element
    /// of a list
    pub fn first_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s),
            Value::List(items) => items.first().map(|v| v.as_slice()),
        }
    }
}

/// True iff `bytes` starts like a decimal integer (`0..9`, `+`, `-`)
#[inline]
pub fn is_integer_looking(bytes: &[u8]) -> bool {
    matches!(bytes.first(), Some(c) if c.is_ascii_digit() || *c == b'+' || *c == b'-')
}

/// atoi-style prefix parse: optional sign, then leading digits, stopping
/// at the first non-digit. `b"12abc"` parses to 12, `b"abc"` to 0.
pub fn parse_integer_prefix(bytes: &[u8]) -> i64 {
    let (negative, rest) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    let mut n: i64 = 0;
    for b in rest {
        if !b.is_ascii_digit() {
            break;
        }
        n = n.wrapping_mul(10).wrapping_add((b - b'0') as i64);
    }
    if negative {
        -n
    } else {
        n
    }
}

/// Failure modes the dictionary reports to the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// INCR-family operation on a value that is not integer-looking
    NotInteger,
    /// RPUSH onto a string value
    WrongType,
}

/// Result of one SCAN step: the next cursor (0 when iteration reached
/// the end) and the matched keys
#[derive(Debug, PartialEq, Eq)]
pub struct ScanResult {
    pub cursor: u64,
    pub keys: Vec<Vec<u8>>,
}

type Map = HashMap<Vec<u8>, Value, RandomState>;

/// The shared in-memory dictionary
///
/// All operations lock the one mutex; concurrent sessions serialize
/// here, which is what makes interleaved histories linearizable.
#[derive(Default)]
pub struct Dict {
    inner: Mutex<Map>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of the value's first block, copied out; `None` on miss
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let map = self.inner.lock();
        map.get(key).and_then(|v| v.first_bytes().map(|b| b.to_vec()))
    }

    /// Insert or replace; the stored value is always a string afterwards
    pub fn set(&self, key: &[u8], value: &[u8]) {
        let mut map = self.inner.lock();
        map.insert(key.to_vec(), Value::Str(value.to_vec()));
    }

    /// Insert only if absent. Returns true on insert.
    pub fn setnx(&self, key: &[u8], value: &[u8]) -> bool {
        let mut map = self.inner.lock();
        if map.contains_key(key) {
            return false;
        }
        map.insert(key.to_vec(), Value::Str(value.to_vec()));
        true
    }

    /// Remove a key. Returns true if it existed.
    pub fn del(&self, key: &[u8]) -> bool {
        let mut map = self.inner.lock();
        map.remove(key).is_some()
    }

    /// Key presence, independent of value type
    pub fn exists(&self, key: &[u8]) -> bool {
        let map = self.inner.lock();
        map.contains_key(key)
    }

    /// Add `delta` to the integer stored under `key`.
    ///
    /// An absent key is treated as zero and created with the resulting
    /// integer. A present value must be integer-looking; otherwise the
    /// operation fails and the value is left untouched.
    pub fn increment(&self, key: &[u8], delta: i64) -> Result<i64, StoreError> {
        let mut map = self.inner.lock();
        match map.get_mut(key) {
            None => {
                map.insert(key.to_vec(), Value::Str(delta.to_string().into_bytes()));
                Ok(delta)
            }
            Some(value) => {
                if !value.is_integer() {
                    return Err(StoreError::NotInteger);
                }
                let prev = value.first_bytes().map(parse_integer_prefix).unwrap_or(0);
                let next = prev + delta;
                *value = Value::Str(next.to_string().into_bytes());
                Ok(next)
            }
        }
    }

    /// Append one element to the list under `key`, creating the list if
    /// the key is absent. Returns the new length, or `WrongType` if the
    /// key holds a string.
    pub fn push(&self, key: &[u8], value: &[u8]) -> Result<usize, StoreError> {
        let mut map = self.inner.lock();
        match map.get_mut(key) {
            None => {
                map.insert(key.to_vec(), Value::List(vec![value.to_vec()]));
                Ok(1)
            }
            Some(Value::List(items)) => {
                items.push(value.to_vec());
                Ok(items.len())
            }
            Some(Value::Str(_)) => Err(StoreError::WrongType),
        }
    }

    /// One SCAN step over the map's natural iteration order.
    ///
    /// Skips the first `cursor` entries, then examines entries until
    /// `max` of them matched (or the map ends), collecting matching
    /// keys. The returned cursor is the absolute position iteration
    /// stopped at, or 0 once the end was reached; feeding it back
    /// resumes where this call left off, so an unmodified map is visited
    /// with each key seen at most once.
    pub fn scan(&self, cursor: u64, max: usize, pattern: Option<&WildCard>) -> ScanResult {
        let map = self.inner.lock();
        let mut keys = Vec::new();
        let mut index = cursor;
        for key in map.keys().skip(cursor as usize) {
            if keys.len() >= max {
                return ScanResult { cursor: index, keys };
            }
            index += 1;
            let matched = match pattern {
                Some(w) => w.is_match(key),
                None => true,
            };
            if matched {
                keys.push(key.clone());
            }
        }
        ScanResult { cursor: 0, keys }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
