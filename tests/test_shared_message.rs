// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Integration tests for SharedMessage: the versioned single-slot broadcast
// register.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use libipc::{
    unlink_region, IpcError, MessageMode, MessageRole, ReadResult, ReaderWaitPolicy, SharedMessage,
    WriteResult,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_msg_{n}")
}

#[test]
fn write_then_read_roundtrip() {
    let name = unique_name("roundtrip");
    unlink_region(&name);

    let mut w = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();
    let mut r = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();

    match w.write(b"hello").unwrap() {
        WriteResult::Written(v) => assert_eq!(v, 2),
        _ => panic!("expected Written"),
    }

    match r.read(false, None).unwrap() {
        ReadResult::Value(buf) => assert_eq!(buf, b"hello"),
        _ => panic!("expected a value"),
    }
}

#[test]
fn read_without_new_version_is_non_blocking() {
    let name = unique_name("no_new_version");
    unlink_region(&name);

    let mut r = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();
    match r.read(false, None).unwrap() {
        ReadResult::NoNewVersion => {}
        _ => panic!("expected NoNewVersion on a fresh region"),
    }
}

#[test]
fn blocking_read_wakes_on_write() {
    let name = unique_name("blocking_read");
    unlink_region(&name);

    let reader_name = name.clone();
    let reader = thread::spawn(move || {
        let mut r = SharedMessage::open(
            &reader_name,
            64,
            MessageMode::sync(),
            MessageRole::Reader,
            ReaderWaitPolicy::Count(0),
        )
        .expect("open");
        match r.read(true, Some(Duration::from_secs(5))).expect("read") {
            ReadResult::Value(buf) => buf,
            ReadResult::NoNewVersion => panic!("expected a value, timed out instead"),
            ReadResult::Closed => panic!("expected a value, region closed instead"),
        }
    });

    // Give the reader a moment to attach and block before writing.
    thread::sleep(Duration::from_millis(50));

    let mut w = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(0),
    )
    .expect("open");
    w.write(b"wake up").unwrap();

    let got = reader.join().expect("reader thread");
    assert_eq!(got, b"wake up");
}

#[test]
fn writer_waits_for_all_readers_to_ack() {
    let name = unique_name("wait_all");
    unlink_region(&name);

    let mut w = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::All,
    )
    .expect("create");
    let mut r1 = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::All,
    )
    .expect("open");
    let mut r2 = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::All,
    )
    .expect("open");

    w.write(b"v1").unwrap();

    let writer_name = name.clone();
    let writer = thread::spawn(move || {
        let mut w2 = SharedMessage::open(
            &writer_name,
            64,
            MessageMode::sync(),
            MessageRole::Writer,
            ReaderWaitPolicy::All,
        )
        .unwrap();
        w2.write(b"v2").unwrap()
    });

    // Only one of two readers acks — the writer must still be blocked.
    r1.read(true, Some(Duration::from_secs(5))).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!writer.is_finished());

    r2.read(true, Some(Duration::from_secs(5))).unwrap();
    let outcome = writer.join().expect("writer thread");
    assert!(matches!(outcome, WriteResult::Written(_)));
    let _ = w; // keep the original writer handle alive for the duration of the test
}

#[test]
fn count_k_policy_waits_for_k_acks_only() {
    let name = unique_name("count_k");
    unlink_region(&name);

    let mut w = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(1),
    )
    .expect("create");
    let mut r1 = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::Count(1),
    )
    .unwrap();
    let _r2 = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::Count(1),
    )
    .unwrap();

    w.write(b"v1").unwrap();
    r1.read(true, Some(Duration::from_secs(5))).unwrap();

    // Only r1 acked; r2 never reads. A single ack should be enough for Count(1).
    let outcome = w.write(b"v2").unwrap();
    assert!(matches!(outcome, WriteResult::Written(_)));
}

#[test]
fn close_unblocks_pending_read() {
    let name = unique_name("close_unblocks");
    unlink_region(&name);

    let w = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();

    let reader_name = name.clone();
    let reader = thread::spawn(move || {
        let mut r = SharedMessage::open(
            &reader_name,
            64,
            MessageMode::sync(),
            MessageRole::Reader,
            ReaderWaitPolicy::Count(0),
        )
        .unwrap();
        r.read(true, Some(Duration::from_secs(5))).unwrap()
    });

    thread::sleep(Duration::from_millis(50));
    w.close();

    match reader.join().expect("reader thread") {
        ReadResult::Closed => {}
        _ => panic!("expected the blocked reader to observe Closed"),
    }
}

#[test]
fn payload_larger_than_capacity_is_rejected() {
    let name = unique_name("too_large");
    unlink_region(&name);

    let mut w = SharedMessage::create(
        &name,
        4,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();
    let err = w.write(b"way too big").unwrap_err();
    assert!(matches!(err, IpcError::PayloadTooLarge { .. }));
}

#[test]
fn fully_async_roundtrip() {
    let name = unique_name("fully_async");
    unlink_region(&name);

    let mut w = SharedMessage::create(
        &name,
        64,
        MessageMode::fully_async(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();
    let mut r = SharedMessage::open(
        &name,
        64,
        MessageMode::fully_async(),
        MessageRole::Reader,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();

    match w.write(b"async hello").unwrap() {
        WriteResult::Enqueued => {}
        _ => panic!("expected Enqueued from an async writer"),
    }

    match r.read(true, Some(Duration::from_secs(5))).unwrap() {
        ReadResult::Value(buf) => assert_eq!(buf, b"async hello"),
        _ => panic!("expected the drainer to deliver the value"),
    }
}

#[test]
fn late_reader_observes_latest_value_not_no_new_version() {
    let name = unique_name("late_reader");
    unlink_region(&name);

    let mut w = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();
    w.write(b"a").unwrap();
    w.write(b"b").unwrap();
    w.write(b"c").unwrap();

    let mut r = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Reader,
        ReaderWaitPolicy::Count(0),
    )
    .unwrap();
    match r.read(false, None).unwrap() {
        ReadResult::Value(buf) => assert_eq!(buf, b"c"),
        _ => panic!("a reader attaching after writes have landed must see the latest value"),
    }
}

#[test]
fn writer_only_handle_does_not_block_on_its_own_ack() {
    let name = unique_name("writer_only");
    unlink_region(&name);

    // Two writer-only handles and zero readers: `All` must not wait forever
    // on an ack that no attached participant will ever produce.
    let mut w1 = SharedMessage::create(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::All,
    )
    .unwrap();
    let mut w2 = SharedMessage::open(
        &name,
        64,
        MessageMode::sync(),
        MessageRole::Writer,
        ReaderWaitPolicy::All,
    )
    .unwrap();

    assert!(matches!(w1.write(b"v1").unwrap(), WriteResult::Written(_)));
    assert!(matches!(w2.write(b"v2").unwrap(), WriteResult::Written(_)));
}
