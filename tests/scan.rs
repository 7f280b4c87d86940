use redrelay::engine::LocalEngine;
use redrelay::session::Session;
use redrelay::storage::Dict;
use redrelay::wildcard::WildCard;
use std::collections::HashSet;
use std::sync::Arc;

fn roundtrip(session: &mut Session, input: &[u8]) -> String {
    session.feed(input);
    String::from_utf8_lossy(&session.take_output()).into_owned()
}

#[test]
fn literal_patterns_compare_exactly() {
    let w = WildCard::compile(b"foo");
    assert!(!w.is_wild());
    assert!(w.is_match(b"foo"));
    assert!(!w.is_match(b"foO"));
    assert!(!w.is_match(b"fooo"));
    assert!(!w.is_match(b"fo"));
}

#[test]
fn question_mark_matches_any_single_byte() {
    let w = WildCard::compile(b"f?o");
    assert!(w.is_wild());
    assert!(w.is_match(b"foo"));
    assert!(w.is_match(b"f.o"));
    assert!(!w.is_match(b"fo"));
    assert!(!w.is_match(b"fooo"));
}

#[test]
fn star_matches_any_run() {
    let w = WildCard::compile(b"fo*");
    assert!(w.is_match(b"fo"));
    assert!(w.is_match(b"foo"));
    assert!(w.is_match(b"fontana"));
    assert!(!w.is_match(b"f"));
    assert!(!w.is_match(b"barfo"));

    let w = WildCard::compile(b"*bar*");
    assert!(w.is_match(b"bar"));
    assert!(w.is_match(b"rebar2"));
    assert!(!w.is_match(b"baz"));

    let w = WildCard::compile(b"a*b*c");
    assert!(w.is_match(b"abc"));
    assert!(w.is_match(b"aXbYc"));
    assert!(!w.is_match(b"ab"));
}

#[test]
fn semicolon_separates_alternatives() {
    let w = WildCard::compile(b"foo;bar");
    assert!(w.is_wild());
    assert!(w.is_match(b"foo"));
    assert!(w.is_match(b"bar"));
    assert!(!w.is_match(b"baz"));

    let w = WildCard::compile(b"f*;b?r");
    assert!(w.is_match(b"fonzie"));
    assert!(w.is_match(b"bur"));
    assert!(!w.is_match(b"burr"));
}

#[test]
fn dot_is_a_literal_byte() {
    let w = WildCard::compile(b"a.c");
    assert!(!w.is_wild());
    assert!(w.is_match(b"a.c"));
    assert!(!w.is_match(b"abc"));
}

#[test]
fn empty_pattern_matches_only_empty() {
    let w = WildCard::compile(b"");
    assert!(w.is_match(b""));
    assert!(!w.is_match(b"x"));

    let w = WildCard::compile(b"*");
    assert!(w.is_match(b""));
    assert!(w.is_match(b"anything"));
}

#[test]
fn dict_scan_filters_by_pattern() {
    let dict = Dict::new();
    dict.set(b"foo", b"1");
    dict.set(b"fob", b"2");
    dict.set(b"bar", b"3");

    let pattern = WildCard::compile(b"fo*");
    let result = dict.scan(0, 10, Some(&pattern));
    assert_eq!(result.cursor, 0);
    let keys: HashSet<Vec<u8>> = result.keys.into_iter().collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&b"foo"[..].to_vec()));
    assert!(keys.contains(&b"fob"[..].to_vec()));
}

#[test]
fn dict_scan_cursor_visits_each_key_once() {
    let dict = Dict::new();
    for i in 0..30 {
        dict.set(format!("key{}", i).as_bytes(), b"v");
    }

    let mut seen: Vec<Vec<u8>> = Vec::new();
    let mut cursor = 0u64;
    let mut rounds = 0;
    loop {
        let step = dict.scan(cursor, 7, None);
        seen.extend(step.keys);
        rounds += 1;
        assert!(rounds < 100, "scan failed to terminate");
        if step.cursor == 0 {
            break;
        }
        cursor = step.cursor;
    }

    let unique: HashSet<&Vec<u8>> = seen.iter().collect();
    assert_eq!(seen.len(), 30, "every key visited exactly once");
    assert_eq!(unique.len(), 30);
}

#[test]
fn scan_reply_shape_with_match() {
    let dict = Arc::new(Dict::new());
    dict.set(b"foo", b"1");
    dict.set(b"fob", b"2");
    dict.set(b"bar", b"3");
    let mut s = Session::new(Box::new(LocalEngine::new(dict)));

    let out = roundtrip(
        &mut s,
        b"*4\r\n$4\r\nSCAN\r\n$1\r\n0\r\n$5\r\nMATCH\r\n$3\r\nfo*\r\n",
    );
    // Two-element array: cursor 0 (map fits in one step), then exactly
    // the two matching keys in map order.
    assert!(out.starts_with("*2\r\n$1\r\n0\r\n*2\r\n"), "got {:?}", out);
    assert!(out.contains("$3\r\nfoo\r\n"));
    assert!(out.contains("$3\r\nfob\r\n"));
    assert!(!out.contains("bar"));
}

#[test]
fn scan_count_limits_one_step() {
    let dict = Arc::new(Dict::new());
    for i in 0..20 {
        dict.set(format!("k{}", i).as_bytes(), b"v");
    }
    let mut s = Session::new(Box::new(LocalEngine::new(dict)));

    let out = roundtrip(&mut s, b"*4\r\n$4\r\nSCAN\r\n$1\r\n0\r\n$5\r\nCOUNT\r\n$1\r\n5\r\n");
    // A resumable cursor and exactly five keys.
    assert!(out.starts_with("*2\r\n$1\r\n5\r\n*5\r\n"), "got {:?}", out);
    assert_eq!(out.matches("\r\nk").count(), 5, "got {:?}", out);
}

#[test]
fn scan_argument_errors() {
    let dict = Arc::new(Dict::new());
    let mut s = Session::new(Box::new(LocalEngine::new(dict)));

    assert_eq!(
        roundtrip(&mut s, b"*2\r\n$4\r\nSCAN\r\n$2\r\n-1\r\n"),
        "-ERR invalid cursor\r\n"
    );
    assert_eq!(
        roundtrip(&mut s, b"*4\r\n$4\r\nSCAN\r\n$1\r\n0\r\n$5\r\nCOUNT\r\n$3\r\nabc\r\n"),
        "-ERR value is not an integer or out of range\r\n"
    );
    assert_eq!(
        roundtrip(&mut s, b"*3\r\n$4\r\nSCAN\r\n$1\r\n0\r\n$5\r\nMATCH\r\n"),
        "-ERR syntax error\r\n"
    );
    assert_eq!(
        roundtrip(&mut s, b"*4\r\n$4\r\nSCAN\r\n$1\r\n0\r\n$4\r\nBLAH\r\n$1\r\nx\r\n"),
        "-ERR syntax error\r\n"
    );
    assert_eq!(
        roundtrip(&mut s, b"*1\r\n$4\r\nSCAN\r\n"),
        "-ERR wrong number of arguments for 'scan' command\r\n"
    );
}
