use redrelay::engine::LocalEngine;
use redrelay::session::Session;
use redrelay::storage::Dict;
use std::sync::Arc;

fn local_session() -> Session {
    Session::new(Box::new(LocalEngine::new(Arc::new(Dict::new()))))
}

fn roundtrip(session: &mut Session, input: &[u8]) -> Vec<u8> {
    session.feed(input);
    session.take_output()
}

fn text(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes).into_owned()
}

#[test]
fn ping_pong() {
    let mut s = local_session();
    assert_eq!(text(roundtrip(&mut s, b"*1\r\n$4\r\nPING\r\n")), "+PONG\r\n");
}

#[test]
fn set_get_del_cycle() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n")),
        "+OK\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n")),
        "$1\r\n1\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nDEL\r\n$1\r\na\r\n")),
        ":1\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n")),
        "$-1\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nDEL\r\n$1\r\na\r\n")),
        ":0\r\n"
    );
}

#[test]
fn set_get_returns_exact_bytes() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(
            &mut s,
            b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n"
        )),
        "+OK\r\n$3\r\nbar\r\n"
    );
}

#[test]
fn exists_tracks_presence_not_type() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$6\r\nEXISTS\r\n$4\r\nnope\r\n")),
        ":0\r\n"
    );
    roundtrip(&mut s, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$6\r\nEXISTS\r\n$1\r\nk\r\n")),
        ":1\r\n"
    );
    roundtrip(&mut s, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nl\r\n$1\r\nx\r\n");
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$6\r\nEXISTS\r\n$1\r\nl\r\n")),
        ":1\r\n"
    );
}

#[test]
fn setnx_only_first_write_wins() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$5\r\nSETNX\r\n$1\r\nk\r\n$2\r\nv1\r\n")),
        ":1\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$5\r\nSETNX\r\n$1\r\nk\r\n$2\r\nv2\r\n")),
        ":0\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")),
        "$2\r\nv1\r\n"
    );
}

#[test]
fn incr_creates_then_counts() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n")),
        ":1\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n")),
        ":2\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")),
        "$1\r\n2\r\n"
    );
}

#[test]
fn incr_decr_by_arbitrary_amounts() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$6\r\nINCRBY\r\n$1\r\nk\r\n$2\r\n10\r\n")),
        ":10\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$6\r\nDECRBY\r\n$1\r\nk\r\n$1\r\n3\r\n")),
        ":7\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$4\r\nDECR\r\n$1\r\nk\r\n")),
        ":6\r\n"
    );
}

#[test]
fn incr_on_non_integer_fails_and_preserves_value() {
    let mut s = local_session();
    roundtrip(&mut s, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\nabc\r\n");
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n")),
        "-ERR value is not an integer or out of range\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")),
        "$3\r\nabc\r\n"
    );
}

#[test]
fn incrby_rejects_non_integer_delta() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$6\r\nINCRBY\r\n$1\r\nk\r\n$3\r\nxyz\r\n")),
        "-ERR value is not an integer or out of range\r\n"
    );
}

#[test]
fn rpush_grows_then_set_replaces_then_wrongtype() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$2\r\nv1\r\n")),
        ":1\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$2\r\nv2\r\n")),
        ":2\r\n"
    );
    // GET on a list returns the head element.
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")),
        "$2\r\nv1\r\n"
    );
    // SET replaces the whole list with a string...
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nx\r\n")),
        "+OK\r\n"
    );
    // ...after which RPUSH is a type error.
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$5\r\nRPUSH\r\n$1\r\nk\r\n$1\r\nv\r\n")),
        "-WRONGTYPE Operation against a key holding the wrong kind of value\r\n"
    );
}

#[test]
fn select_zero_only() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$6\r\nSELECT\r\n$1\r\n0\r\n")),
        "+OK\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n")),
        "-ERR DB index is out of range\r\n"
    );
}

#[test]
fn watch_unwatch_are_acknowledged() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*3\r\n$5\r\nWATCH\r\n$1\r\na\r\n$1\r\nb\r\n")),
        "+OK\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*1\r\n$7\r\nUNWATCH\r\n")),
        "+OK\r\n"
    );
}

#[test]
fn wrong_argument_counts_name_the_command() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*1\r\n$3\r\nGET\r\n")),
        "-ERR wrong number of arguments for 'get' command\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$3\r\nSET\r\n$1\r\nk\r\n")),
        "-ERR wrong number of arguments for 'set' command\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$4\r\nPING\r\n$2\r\nhi\r\n")),
        "-ERR wrong number of arguments for 'ping' command\r\n"
    );
}

#[test]
fn unknown_and_unsupported_commands_answer_errors() {
    let mut s = local_session();
    assert_eq!(
        text(roundtrip(&mut s, b"*1\r\n$9\r\nFROBULATE\r\n")),
        "-ERR unknown command 'frobulate'\r\n"
    );
    assert_eq!(
        text(roundtrip(&mut s, b"*2\r\n$5\r\nLPUSH\r\n$1\r\nk\r\n")),
        "-ERR unsupported command 'lpush'\r\n"
    );
}

#[test]
fn pipelined_commands_answer_in_order() {
    let mut s = local_session();
    let out = roundtrip(
        &mut s,
        b"*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n",
    );
    assert_eq!(text(out), ":1\r\n:2\r\n$1\r\n2\r\n");
}

#[test]
fn inline_commands_work_end_to_end() {
    let mut s = local_session();
    assert_eq!(text(roundtrip(&mut s, b"set foo bar\r\n")), "+OK\r\n");
    assert_eq!(text(roundtrip(&mut s, b"get foo\r\n")), "$3\r\nbar\r\n");
}

#[test]
fn quit_acknowledges_and_closes() {
    let mut s = local_session();
    assert_eq!(text(roundtrip(&mut s, b"*1\r\n$4\r\nQUIT\r\n")), "+OK\r\n");
    assert!(s.is_closing());
}

#[test]
fn protocol_fault_reports_and_closes() {
    let mut s = local_session();
    let out = text(roundtrip(&mut s, b"*0\r\n"));
    assert!(out.starts_with("-ERR Protocol error:"), "got {:?}", out);
    assert!(s.is_closing());
}

#[test]
fn large_values_survive_chunked_delivery() {
    let mut s = local_session();
    let size = 100 * 1024;
    let payload = vec![b'x'; size];
    let mut request = Vec::new();
    request.extend_from_slice(format!("*3\r\n$3\r\nSET\r\n$5\r\nlarge\r\n${}\r\n", size).as_bytes());
    request.extend_from_slice(&payload);
    request.extend_from_slice(b"\r\n");

    // Deliver in 4 KB chunks the way a socket would.
    for chunk in request.chunks(4096) {
        s.feed(chunk);
    }
    assert_eq!(text(s.take_output()), "+OK\r\n");

    s.feed(b"*2\r\n$3\r\nGET\r\n$5\r\nlarge\r\n");
    let out = s.take_output();
    let mut expected = Vec::new();
    expected.extend_from_slice(format!("${}\r\n", size).as_bytes());
    expected.extend_from_slice(&payload);
    expected.extend_from_slice(b"\r\n");
    assert_eq!(out, expected);
}
