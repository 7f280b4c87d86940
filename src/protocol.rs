/*!
 * RESP Protocol Implementation
 *
 * This module implements the Redis Serialization Protocol (RESP) layer:
 * the incremental command-stream decoder that turns arbitrarily chunked
 * TCP bytes into discrete commands, the case-insensitive keyword tables
 * for command names and known sub-tokens, and the encoders used to build
 * RESP replies and upstream requests.
 */

use bytes::{Buf, BytesMut};
use thiserror::Error;

/// Maximum number of arguments a single command may carry
pub const MAX_ARGS: usize = 32;

/// Maximum declared length of a single bulk payload (matches the Redis
/// 512 MB proto limit)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Decode faults. All of these are fatal for the connection that
/// produced them; none of them may take down another connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// `*N` header with `N <= 0` or `N > MAX_ARGS`
    #[error("invalid multibulk count {0}")]
    BadArgumentCount(i64),

    /// `$L` header with a negative (other than -1) or oversized length
    #[error("invalid bulk length {0}")]
    BadBulkLength(i64),

    /// Bulk payload length did not match the declared length
    #[error("bulk payload does not match declared length")]
    BulkUnterminated,

    /// A header line whose numeric field does not parse
    #[error("malformed length field {0:?}")]
    BadLength(String),

    /// A bare argument line arrived inside an array frame where a `$`
    /// header was required
    #[error("expected bulk header inside multibulk frame")]
    ExpectedBulkHeader,
}

/// Commands and reply kinds recognized by the decoder.
///
/// The first decoded argument of a client frame is classified into one of
/// these. Frames arriving from an upstream Redis decode into the reply
/// kinds (`Ok`, `Err`, `ReturnCode`, `ReturnData`) instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Select,
    Set,
    SetNx,
    Get,
    Del,
    Exists,
    Incr,
    Decr,
    IncrBy,
    DecrBy,
    RPush,
    Scan,
    Multi,
    Exec,
    Watch,
    Unwatch,
    Quit,

    /// Reply: `+OK` (or another status line) from an upstream
    Ok,
    /// Reply: `-…` error line
    Err,
    /// Reply: `:N` integer line
    ReturnCode,
    /// Reply: bulk or array payload
    ReturnData,

    /// A real Redis command this server does not implement
    Unsupported,
    /// Not a command at all
    Unknown,
}

/// Known sub-tokens that may follow a command name (`SCAN cur MATCH p
/// COUNT n`, ...). Anything not in the attribute table is plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Match,
    Count,
    Type,
    Async,
    Before,
    After,
    By,
    Limit,
    Store,
    Replace,
    WithScores,
    SetName,
    GetName,
    /// Unclassified argument bytes
    Asciiz,
}

/// Redis command names this server executes itself
const COMMAND_TABLE: &[(&[u8], Command)] = &[
    (b"PING", Command::Ping),
    (b"SELECT", Command::Select),
    (b"SET", Command::Set),
    (b"SETNX", Command::SetNx),
    (b"GET", Command::Get),
    (b"DEL", Command::Del),
    (b"EXISTS", Command::Exists),
    (b"INCR", Command::Incr),
    (b"DECR", Command::Decr),
    (b"INCRBY", Command::IncrBy),
    (b"DECRBY", Command::DecrBy),
    (b"RPUSH", Command::RPush),
    (b"SCAN", Command::Scan),
    (b"MULTI", Command::Multi),
    (b"EXEC", Command::Exec),
    (b"WATCH", Command::Watch),
    (b"UNWATCH", Command::Unwatch),
    (b"QUIT", Command::Quit),
];

/// Redis command names the decoder recognizes but the server rejects as
/// unsupported. Keeping these distinct from `Unknown` lets the error
/// reply tell an out-of-scope command apart from a misspelled token.
const UNSUPPORTED_TABLE: &[&[u8]] = &[
    b"APPEND",
    b"AUTH",
    b"BGREWRITEAOF",
    b"BGSAVE",
    b"BITCOUNT",
    b"BLPOP",
    b"BRPOP",
    b"CLIENT",
    b"CLUSTER",
    b"COMMAND",
    b"CONFIG",
    b"DBSIZE",
    b"DISCARD",
    b"DUMP",
    b"ECHO",
    b"EVAL",
    b"EVALSHA",
    b"EXPIRE",
    b"EXPIREAT",
    b"FLUSHALL",
    b"FLUSHDB",
    b"GETRANGE",
    b"GETSET",
    b"HDEL",
    b"HEXISTS",
    b"HGET",
    b"HGETALL",
    b"HINCRBY",
    b"HKEYS",
    b"HLEN",
    b"HMGET",
    b"HMSET",
    b"HSCAN",
    b"HSET",
    b"HSETNX",
    b"HVALS",
    b"INCRBYFLOAT",
    b"INFO",
    b"KEYS",
    b"LASTSAVE",
    b"LINDEX",
    b"LINSERT",
    b"LLEN",
    b"LPOP",
    b"LPUSH",
    b"LPUSHX",
    b"LRANGE",
    b"LREM",
    b"LSET",
    b"LTRIM",
    b"MEMORY",
    b"MGET",
    b"MONITOR",
    b"MOVE",
    b"MSET",
    b"MSETNX",
    b"OBJECT",
    b"PERSIST",
    b"PEXPIRE",
    b"PSETEX",
    b"PSUBSCRIBE",
    b"PTTL",
    b"PUBLISH",
    b"PUBSUB",
    b"PUNSUBSCRIBE",
    b"RANDOMKEY",
    b"RENAME",
    b"RENAMENX",
    b"RESTORE",
    b"ROLE",
    b"RPOP",
    b"RPOPLPUSH",
    b"RPUSHX",
    b"SADD",
    b"SAVE",
    b"SCARD",
    b"SCRIPT",
    b"SDIFF",
    b"SETEX",
    b"SETRANGE",
    b"SHUTDOWN",
    b"SINTER",
    b"SISMEMBER",
    b"SLAVEOF",
    b"SLOWLOG",
    b"SMEMBERS",
    b"SMOVE",
    b"SORT",
    b"SPOP",
    b"SREM",
    b"SSCAN",
    b"STRLEN",
    b"SUBSCRIBE",
    b"SUNION",
    b"SWAPDB",
    b"TIME",
    b"TOUCH",
    b"TTL",
    b"TYPE",
    b"UNLINK",
    b"UNSUBSCRIBE",
    b"WAIT",
    b"XADD",
    b"XLEN",
    b"XRANGE",
    b"XREAD",
    b"ZADD",
    b"ZCARD",
    b"ZCOUNT",
    b"ZINCRBY",
    b"ZRANGE",
    b"ZRANK",
    b"ZREM",
    b"ZSCAN",
    b"ZSCORE",
];

/// Sub-token table (case-insensitive, like the command table)
const ATTRIBUTE_TABLE: &[(&[u8], Attribute)] = &[
    (b"MATCH", Attribute::Match),
    (b"COUNT", Attribute::Count),
    (b"TYPE", Attribute::Type),
    (b"ASYNC", Attribute::Async),
    (b"BEFORE", Attribute::Before),
    (b"AFTER", Attribute::After),
    (b"BY", Attribute::By),
    (b"LIMIT", Attribute::Limit),
    (b"STORE", Attribute::Store),
    (b"REPLACE", Attribute::Replace),
    (b"WITHSCORES", Attribute::WithScores),
    (b"SETNAME", Attribute::SetName),
    (b"GETNAME", Attribute::GetName),
];

/// Classify a command-name token (case-insensitive)
pub fn lookup_command(token: &[u8]) -> Command {
    for (name, cmd) in COMMAND_TABLE {
        if token.eq_ignore_ascii_case(name) {
            return *cmd;
        }
    }
    for name in UNSUPPORTED_TABLE {
        if token.eq_ignore_ascii_case(name) {
            return Command::Unsupported;
        }
    }
    Command::Unknown
}

/// Classify a sub-token (case-insensitive); unrecognized tokens are data
pub fn lookup_attribute(token: &[u8]) -> Attribute {
    for (name, attr) in ATTRIBUTE_TABLE {
        if token.eq_ignore_ascii_case(name) {
            return *attr;
        }
    }
    Attribute::Asciiz
}

/// One decoded argument: the raw bytes and their classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub data: Vec<u8>,
    pub attr: Attribute,
}

impl Argument {
    fn plain(data: Vec<u8>) -> Self {
        Self {
            data,
            attr: Attribute::Asciiz,
        }
    }
}

/// A complete decoded command or reply frame.
///
/// `args[0]` is the command token itself (or the payload, for reply
/// frames); `args[1..]` are its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: Command,
    pub args: Vec<Argument>,
}

impl Frame {
    /// Number of arguments following the command token
    pub fn argc(&self) -> usize {
        self.args.len().saturating_sub(1)
    }

    /// Argument `i` (0-based, not counting the command token)
    pub fn arg(&self, i: usize) -> Option<&Argument> {
        self.args.get(i + 1)
    }

    /// The bytes of argument `i`
    pub fn arg_data(&self, i: usize) -> Option<&[u8]> {
        self.arg(i).map(|a| a.data.as_slice())
    }

    /// The command token (or reply payload) bytes
    pub fn head(&self) -> &[u8] {
        self.args.first().map(|a| a.data.as_slice()).unwrap_or(b"")
    }

    /// Lowercased command name, for error messages
    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.head()).to_ascii_lowercase()
    }
}

/// Incremental RESP decoder.
///
/// Bytes are appended to an external `BytesMut` by the connection's read
/// path; `feed` consumes complete frames from the front of that buffer
/// and leaves partial input untouched for the next call, so any chunking
/// of the stream decodes to the same frame sequence.
///
/// State carried between calls: the argument count announced by the last
/// `*N` header, the arguments collected so far, and the declared length
/// of the next bulk payload, if any. Emitting a frame moves the collected
/// arguments out, which also resets the decoder for the next frame.
#[derive(Debug, Default)]
pub struct CommandStream {
    /// false for streams carrying upstream replies, which are not
    /// classified through the command table
    classify: bool,
    expected_argc: usize,
    expected_bulk: Option<usize>,
    args: Vec<Argument>,
    pending_kind: Option<Command>,
}

impl CommandStream {
    /// Decoder for a client-facing stream (commands)
    pub fn new() -> Self {
        Self {
            classify: true,
            ..Default::default()
        }
    }

    /// Decoder for an upstream-facing stream (replies)
    pub fn reply_stream() -> Self {
        Self {
            classify: false,
            ..Default::default()
        }
    }

    /// True while a frame is partially decoded
    pub fn in_frame(&self) -> bool {
        self.expected_argc != 0 || self.expected_bulk.is_some()
    }

    /// Drop any partially decoded frame (error recovery)
    pub fn reset(&mut self) {
        self.expected_argc = 0;
        self.expected_bulk = None;
        self.args.clear();
        self.pending_kind = None;
    }

    /// Consume input from `buf` until one complete frame is decoded or
    /// the buffer runs out of complete lines.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On `Err` the
    /// decoder state and remaining buffer contents are unspecified; the
    /// connection is expected to report the fault and close.
    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, DecodeError> {
        loop {
            // A declared bulk payload is consumed by length, binary-safe.
            if let Some(need) = self.expected_bulk {
                if buf.len() < need + 2 {
                    return Ok(None);
                }
                if &buf[need..need + 2] != b"\r\n" {
                    return Err(DecodeError::BulkUnterminated);
                }
                let body = buf.split_to(need).to_vec();
                buf.advance(2);
                self.expected_bulk = None;
                self.push_arg(body);
                if let Some(frame) = self.try_emit() {
                    return Ok(Some(frame));
                }
                continue;
            }

            // Otherwise the next unit is a CRLF-terminated line.
            let Some(pos) = find_crlf(buf) else {
                return Ok(None);
            };
            let line = buf.split_to(pos).to_vec();
            buf.advance(2);
            if let Some(frame) = self.accept_line(&line)? {
                return Ok(Some(frame));
            }
        }
    }

    /// Feed a single already-framed line (the operator console path).
    /// Equivalent to `feed` on the line followed by CRLF.
    pub fn feed_line(&mut self, line: &[u8]) -> Result<Option<Frame>, DecodeError> {
        // A pending bulk declaration means this line is the payload.
        if let Some(need) = self.expected_bulk.take() {
            if line.len() != need {
                return Err(DecodeError::BulkUnterminated);
            }
            self.push_arg(line.to_vec());
            return Ok(self.try_emit());
        }
        self.accept_line(line)
    }

    fn accept_line(&mut self, line: &[u8]) -> Result<Option<Frame>, DecodeError> {
        match line.first() {
            // Blank lines between frames are tolerated and ignored.
            None => Ok(None),

            // `*N` announces the total argument count. Inside an
            // in-progress frame it is a nested reply array: fold its
            // element count into the outer expectation so the frame
            // flattens (a SCAN reply becomes cursor followed by keys).
            Some(b'*') => {
                let n = parse_header_int(&line[1..])?;
                if self.expected_argc != 0 {
                    if n < 0 {
                        return Err(DecodeError::BadArgumentCount(n));
                    }
                    self.expected_argc = self.expected_argc - 1 + n as usize;
                    if self.expected_argc > MAX_ARGS {
                        return Err(DecodeError::BadArgumentCount(n));
                    }
                    return Ok(self.try_emit());
                }
                if n <= 0 || n as usize > MAX_ARGS {
                    return Err(DecodeError::BadArgumentCount(n));
                }
                self.expected_argc = n as usize;
                self.args.clear();
                if !self.classify {
                    self.pending_kind = Some(Command::ReturnData);
                }
                Ok(None)
            }

            // `$L` declares the byte length of the next argument. With no
            // array header in effect, a one-argument data envelope is
            // synthesized (non-array upstream replies).
            Some(b'$') => {
                let len = parse_header_int(&line[1..])?;
                if len == -1 {
                    if self.expected_argc == 0 {
                        self.reset();
                        return Ok(Some(Frame {
                            kind: Command::ReturnData,
                            args: Vec::new(),
                        }));
                    }
                    self.push_arg(Vec::new());
                    return Ok(self.try_emit());
                }
                if len < 0 || len as usize > MAX_BULK_LEN {
                    return Err(DecodeError::BadBulkLength(len));
                }
                if self.expected_argc == 0 {
                    self.expected_argc = 1;
                    self.pending_kind = Some(Command::ReturnData);
                }
                self.expected_bulk = Some(len as usize);
                Ok(None)
            }

            // Status, error and integer lines complete on their own.
            Some(b'+') => {
                self.reset();
                Ok(Some(Frame {
                    kind: Command::Ok,
                    args: vec![Argument::plain(line[1..].to_vec())],
                }))
            }
            Some(b'-') => {
                self.reset();
                Ok(Some(Frame {
                    kind: Command::Err,
                    args: vec![Argument::plain(line[1..].to_vec())],
                }))
            }
            Some(b':') => {
                self.reset();
                Ok(Some(Frame {
                    kind: Command::ReturnCode,
                    args: vec![Argument::plain(line[1..].to_vec())],
                }))
            }

            // Anything else is the inline form: whitespace-separated
            // tokens on one line, emitted immediately.
            Some(_) => {
                if self.expected_argc != 0 {
                    return Err(DecodeError::ExpectedBulkHeader);
                }
                let tokens: Vec<Vec<u8>> = split_inline(line).map(|t| t.to_vec()).collect();
                if tokens.is_empty() {
                    return Ok(None);
                }
                for token in tokens {
                    self.push_arg(token);
                }
                self.expected_argc = self.args.len();
                Ok(self.try_emit())
            }
        }
    }

    fn push_arg(&mut self, data: Vec<u8>) {
        let attr = if self.classify && !self.args.is_empty() {
            lookup_attribute(&data)
        } else {
            Attribute::Asciiz
        };
        self.args.push(Argument { data, attr });
    }

    fn try_emit(&mut self) -> Option<Frame> {
        if self.expected_argc == 0 || self.args.len() < self.expected_argc {
            return None;
        }
        let args = std::mem::take(&mut self.args);
        let kind = self.pending_kind.take().unwrap_or_else(|| {
            if self.classify {
                lookup_command(args.first().map(|a| a.data.as_slice()).unwrap_or(b""))
            } else {
                Command::ReturnData
            }
        });
        self.expected_argc = 0;
        self.expected_bulk = None;
        Some(Frame { kind, args })
    }
}

fn find_crlf(buf: &BytesMut) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn split_inline(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|b| *b == b' ' || *b == b'\t')
        .filter(|t| !t.is_empty())
}

fn parse_header_int(digits: &[u8]) -> Result<i64, DecodeError> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| DecodeError::BadLength(String::from_utf8_lossy(digits).into_owned()))?;
    text.parse::<i64>()
        .map_err(|_| DecodeError::BadLength(text.to_string()))
}

//
// RESP Reply Encoders
//
// Each encoder produces one discrete RESP frame as an owned byte vector,
// ready to append to a connection's outbound queue.
//

/// Encode a simple string (`+OK\r\n`)
pub fn resp_simple(s: &str) -> Vec<u8> {
    format!("+{}\r\n", s).into_bytes()
}

/// Encode an error (`-ERR ...\r\n`)
pub fn resp_error(s: &str) -> Vec<u8> {
    format!("-{}\r\n", s).into_bytes()
}

/// Encode a bulk string (`$<len>\r\n<data>\r\n`)
pub fn resp_bulk(b: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(b.len() + 16);
    v.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
    v.extend_from_slice(b);
    v.extend_from_slice(b"\r\n");
    v
}

/// Encode the null bulk string (`$-1\r\n`)
pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Encode an integer (`:<n>\r\n`)
pub fn resp_integer(i: i64) -> Vec<u8> {
    format!(":{}\r\n", i).into_bytes()
}

/// Encode an array header (`*<n>\r\n`)
pub fn resp_array_header(n: usize) -> Vec<u8> {
    format!("*{}\r\n", n).into_bytes()
}

/// Encode an array from pre-encoded elements
pub fn resp_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = resp_array_header(items.len());
    for it in items {
        out.extend_from_slice(&it);
    }
    out
}

/// Encode a command as a RESP array of bulk strings, the request form an
/// upstream Redis expects (`SET k v` becomes `*3\r\n$3\r\nSET\r\n...`)
pub fn encode_command(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = resp_array_header(parts.len());
    for p in parts {
        out.extend_from_slice(&resp_bulk(p));
    }
    out
}
