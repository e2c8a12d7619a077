// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Integration tests for SharedCircularQueue: the bounded MPMC ring.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use libipc::{
    unlink_region, IpcError, QueueReadResult as ReadResult, QueueRole, QueueWriteResult as WriteResult,
    SharedCircularQueue,
};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_scq_{n}")
}

#[test]
fn fifo_roundtrip_preserves_order() {
    let name = unique_name("fifo");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 32, 4, QueueRole::Both).unwrap();
    assert!(matches!(q.try_write(b"a").unwrap(), WriteResult::Written));
    assert!(matches!(q.try_write(b"b").unwrap(), WriteResult::Written));
    assert!(matches!(q.try_write(b"c").unwrap(), WriteResult::Written));

    match q.try_read().unwrap() {
        ReadResult::Value(v) => assert_eq!(v, b"a"),
        _ => panic!("expected a"),
    }
    match q.try_read().unwrap() {
        ReadResult::Value(v) => assert_eq!(v, b"b"),
        _ => panic!("expected b"),
    }
    match q.try_read().unwrap() {
        ReadResult::Value(v) => assert_eq!(v, b"c"),
        _ => panic!("expected c"),
    }
}

#[test]
fn try_read_on_empty_queue_does_not_block() {
    let name = unique_name("empty");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 32, 4, QueueRole::Consumer).unwrap();
    match q.try_read().unwrap() {
        ReadResult::Empty => {}
        _ => panic!("expected Empty"),
    }
}

#[test]
fn try_write_on_full_queue_returns_full() {
    let name = unique_name("full");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 32, 2, QueueRole::Producer).unwrap();
    assert!(matches!(q.try_write(b"one").unwrap(), WriteResult::Written));
    assert!(matches!(q.try_write(b"two").unwrap(), WriteResult::Written));
    assert!(q.is_full());
    assert!(matches!(q.try_write(b"three").unwrap(), WriteResult::Full));
}

#[test]
fn blocking_write_wakes_once_a_slot_frees_up() {
    let name = unique_name("blocking_write");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 32, 1, QueueRole::Both).unwrap();
    assert!(matches!(q.try_write(b"first").unwrap(), WriteResult::Written));

    let writer_name = name.clone();
    let writer = thread::spawn(move || {
        let q2 = SharedCircularQueue::open(&writer_name, 32, 1, QueueRole::Producer).unwrap();
        q2.blocking_write(b"second", Some(Duration::from_secs(5))).unwrap()
    });

    thread::sleep(Duration::from_millis(100));
    assert!(!writer.is_finished());

    match q.try_read().unwrap() {
        ReadResult::Value(v) => assert_eq!(v, b"first"),
        _ => panic!("expected first"),
    }

    let outcome = writer.join().expect("writer thread");
    assert!(matches!(outcome, WriteResult::Written));
}

#[test]
fn close_unblocks_pending_dequeue() {
    let name = unique_name("close_dequeue");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 32, 4, QueueRole::Both).unwrap();

    let reader_name = name.clone();
    let reader = thread::spawn(move || {
        let q2 = SharedCircularQueue::open(&reader_name, 32, 4, QueueRole::Consumer).unwrap();
        q2.blocking_read(Some(Duration::from_secs(5))).unwrap()
    });

    thread::sleep(Duration::from_millis(50));
    q.close();

    match reader.join().expect("reader thread") {
        ReadResult::Closed => {}
        _ => panic!("expected Closed"),
    }
}

#[test]
fn read_all_drains_everything_available() {
    let name = unique_name("read_all");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 32, 8, QueueRole::Both).unwrap();
    for i in 0..5u8 {
        q.try_write(&[i]).unwrap();
    }

    let drained = q.read_all().unwrap();
    assert_eq!(drained.len(), 5);
    for (i, v) in drained.iter().enumerate() {
        assert_eq!(v, &vec![i as u8]);
    }
    assert!(q.is_empty());
}

#[test]
fn payload_larger_than_max_element_size_is_rejected() {
    let name = unique_name("too_large");
    unlink_region(&name);

    let q = SharedCircularQueue::create(&name, 4, 4, QueueRole::Producer).unwrap();
    let err = q.try_write(b"way too big").unwrap_err();
    assert!(matches!(err, IpcError::PayloadTooLarge { .. }));
}

#[test]
fn concurrent_producers_and_consumers_see_every_item_once() {
    let name = unique_name("mpmc");
    unlink_region(&name);

    const PRODUCERS: usize = 3;
    const PER_PRODUCER: usize = 50;

    let q = SharedCircularQueue::create(&name, 8, 16, QueueRole::Both).unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let name = name.clone();
            thread::spawn(move || {
                let q = SharedCircularQueue::open(&name, 8, 16, QueueRole::Producer).unwrap();
                for i in 0..PER_PRODUCER {
                    let tag = (p * PER_PRODUCER + i) as u64;
                    while matches!(
                        q.blocking_write(&tag.to_ne_bytes(), Some(Duration::from_secs(5))).unwrap(),
                        WriteResult::Full
                    ) {}
                }
            })
        })
        .collect();

    let consumer_name = name.clone();
    let consumer = thread::spawn(move || {
        let q = SharedCircularQueue::open(&consumer_name, 8, 16, QueueRole::Consumer).unwrap();
        let mut seen = Vec::with_capacity(PRODUCERS * PER_PRODUCER);
        while seen.len() < PRODUCERS * PER_PRODUCER {
            if let ReadResult::Value(buf) = q.blocking_read(Some(Duration::from_secs(5))).unwrap() {
                seen.push(u64::from_ne_bytes(buf.try_into().unwrap()));
            }
        }
        seen
    });

    for p in producers {
        p.join().unwrap();
    }
    let mut seen = consumer.join().unwrap();
    seen.sort_unstable();
    let expected: Vec<u64> = (0..(PRODUCERS * PER_PRODUCER) as u64).collect();
    assert_eq!(seen, expected);
}
