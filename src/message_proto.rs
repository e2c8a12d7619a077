// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Versioned single-slot seqlock protocol underlying `SharedMessage`.
// Even `writer_seq` = stable, odd = a write is in progress; readers retry
// on a torn read the same way a classic seqlock does.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::error::{IpcError, IpcResult};
use crate::futex::WaitWord;
use crate::spin_lock::{self, SpinLock};

pub const MAGIC: [u8; 4] = *b"SMSG";
pub const LAYOUT_VERSION: u32 = 1;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

/// Reader wait policy the writer enforces before claiming a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderWaitPolicy {
    /// Wait for every currently-attached reader to ack the prior version
    /// before committing a new one.
    All,
    /// Wait for at least `k` readers to ack the prior version. `Count(0)`
    /// never waits (fire-and-forget).
    Count(u32),
}

pub(crate) enum WriteOutcome {
    Written(u64),
    Closed,
}

pub(crate) enum ReadOutcome {
    Value(Vec<u8>, u64),
    NoNewVersion,
    Closed,
}

#[repr(C)]
pub(crate) struct MessageHeader {
    magic: [u8; 4],
    layout_version: u32,
    capacity: u64,
    state: AtomicU8,
    closed: AtomicU8,
    writer_seq: AtomicU64,
    payload_len: AtomicU64,
    reader_count: AtomicU64,
    writer_lock: SpinLock,
    ack_lock: SpinLock,
    ack_version: AtomicU64,
    ack_count: AtomicU64,
    wait_word: WaitWord,
    ack_word: WaitWord,
}

pub(crate) fn header_size() -> usize {
    std::mem::size_of::<MessageHeader>()
}

pub(crate) fn total_size(capacity: u64) -> usize {
    header_size() + capacity as usize
}

/// # Safety
/// `base` must point to at least `total_size(capacity)` bytes of mapped,
/// either-zeroed-or-already-initialised memory that outlives every handle
/// built on top of it.
pub(crate) unsafe fn header<'a>(base: *mut u8) -> &'a MessageHeader {
    &*(base as *const MessageHeader)
}

/// # Safety
/// Same obligations as [`header`].
pub(crate) unsafe fn payload_ptr(base: *mut u8) -> *mut u8 {
    base.add(header_size())
}

/// Ensure the header is constructed, racing other first-openers safely via
/// a tri-state CAS (`UNINIT` -> `INITIALIZING` -> `READY`); late openers spin
/// briefly until the winner finishes, then validate layout compatibility.
///
/// # Safety
/// Same obligations as [`header`].
pub(crate) unsafe fn ensure_ready(base: *mut u8, capacity: u64, name: &str) -> IpcResult<()> {
    let hdr = header(base);
    match hdr.state.compare_exchange(
        STATE_UNINIT,
        STATE_INITIALIZING,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            let hdr_mut = &mut *(base as *mut MessageHeader);
            hdr_mut.magic = MAGIC;
            hdr_mut.layout_version = LAYOUT_VERSION;
            hdr_mut.capacity = capacity;
            hdr_mut.closed = AtomicU8::new(0);
            hdr_mut.writer_seq = AtomicU64::new(0);
            hdr_mut.payload_len = AtomicU64::new(0);
            hdr_mut.reader_count = AtomicU64::new(0);
            hdr_mut.writer_lock = SpinLock::new();
            hdr_mut.ack_lock = SpinLock::new();
            hdr_mut.ack_version = AtomicU64::new(0);
            hdr_mut.ack_count = AtomicU64::new(0);
            WaitWord::init_in_place(std::ptr::addr_of_mut!(hdr_mut.wait_word));
            WaitWord::init_in_place(std::ptr::addr_of_mut!(hdr_mut.ack_word));
            hdr.state.store(STATE_READY, Ordering::Release);
            Ok(())
        }
        Err(_) => {
            let mut k = 0u32;
            while hdr.state.load(Ordering::Acquire) != STATE_READY {
                spin_lock::adaptive_yield_pub(&mut k);
            }
            validate(hdr, capacity, name)
        }
    }
}

/// # Safety
/// Same obligations as [`header`].
pub(crate) unsafe fn validate_attached(base: *mut u8, capacity: u64, name: &str) -> IpcResult<()> {
    validate(header(base), capacity, name)
}

fn validate(hdr: &MessageHeader, capacity: u64, name: &str) -> IpcResult<()> {
    if hdr.magic != MAGIC {
        return Err(IpcError::IncompatibleRegion {
            name: name.to_string(),
            reason: "bad magic for SharedMessage region".into(),
        });
    }
    if hdr.capacity != capacity {
        return Err(IpcError::IncompatibleRegion {
            name: name.to_string(),
            reason: format!(
                "capacity mismatch: region holds {}, requested {capacity}",
                hdr.capacity
            ),
        });
    }
    Ok(())
}

pub(crate) fn connect_reader(hdr: &MessageHeader) {
    hdr.reader_count.fetch_add(1, Ordering::AcqRel);
}

pub(crate) fn disconnect_reader(hdr: &MessageHeader) {
    hdr.reader_count.fetch_sub(1, Ordering::AcqRel);
}

pub(crate) fn last_written_version(hdr: &MessageHeader) -> u64 {
    hdr.writer_seq.load(Ordering::Acquire)
}

pub(crate) fn is_closed(hdr: &MessageHeader) -> bool {
    hdr.closed.load(Ordering::Acquire) != 0
}

pub(crate) fn capacity(hdr: &MessageHeader) -> u64 {
    hdr.capacity
}

pub(crate) fn close(hdr: &MessageHeader) {
    hdr.closed.store(1, Ordering::Release);
    let _ = hdr.wait_word.notify(u32::MAX);
    let _ = hdr.ack_word.notify(u32::MAX);
}

/// `All` and `Count(k)` share the same per-version ack bookkeeping:
/// `All` is just `Count(reader_count)` evaluated dynamically, since the
/// set of attached readers can change between writes. A write waits for
/// readers to have acked the *prior* committed version (`writer_seq` as it
/// stands right now, before this write bumps it) — if no version has ever
/// been committed yet, there is nothing to ack and the write proceeds.
fn policy_satisfied(hdr: &MessageHeader, policy: ReaderWaitPolicy) -> bool {
    if let ReaderWaitPolicy::Count(0) = policy {
        return true;
    }
    let reader_count = hdr.reader_count.load(Ordering::Acquire);
    if reader_count == 0 {
        return true;
    }
    let v = hdr.writer_seq.load(Ordering::Acquire);
    if v == 0 {
        return true;
    }
    let required = match policy {
        ReaderWaitPolicy::All => reader_count,
        ReaderWaitPolicy::Count(k) => k as u64,
    };
    hdr.ack_lock.lock();
    let matched =
        hdr.ack_version.load(Ordering::Relaxed) == v && hdr.ack_count.load(Ordering::Relaxed) >= required;
    hdr.ack_lock.unlock();
    matched
}

/// Write `data` as a new version, honouring `policy` before claiming it.
///
/// # Safety
/// `payload_base` must point to at least `hdr.capacity` writable bytes.
pub(crate) unsafe fn write(
    hdr: &MessageHeader,
    payload_base: *mut u8,
    data: &[u8],
    policy: ReaderWaitPolicy,
    timeout: Option<Duration>,
) -> IpcResult<WriteOutcome> {
    if data.len() as u64 > hdr.capacity {
        return Err(IpcError::PayloadTooLarge {
            len: data.len(),
            capacity: hdr.capacity as usize,
        });
    }

    hdr.writer_lock.lock();
    let result = write_locked(hdr, payload_base, data, policy, timeout);
    hdr.writer_lock.unlock();
    result
}

unsafe fn write_locked(
    hdr: &MessageHeader,
    payload_base: *mut u8,
    data: &[u8],
    policy: ReaderWaitPolicy,
    timeout: Option<Duration>,
) -> IpcResult<WriteOutcome> {
    let deadline = timeout.map(|d| Instant::now() + d);

    loop {
        if is_closed(hdr) {
            return Ok(WriteOutcome::Closed);
        }
        if policy_satisfied(hdr, policy) {
            break;
        }
        let gen = hdr.ack_word.generation();
        if policy_satisfied(hdr, policy) {
            break;
        }
        let remaining = match deadline {
            Some(dl) => {
                let now = Instant::now();
                if now >= dl {
                    return Err(IpcError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out waiting for readers",
                    )));
                }
                Some(dl - now)
            }
            None => None,
        };
        hdr.ack_word.wait(gen, remaining)?;
    }

    let v = hdr.writer_seq.load(Ordering::Relaxed);
    hdr.writer_seq.store(v + 1, Ordering::Release);
    std::ptr::copy_nonoverlapping(data.as_ptr(), payload_base, data.len());
    hdr.payload_len.store(data.len() as u64, Ordering::Relaxed);
    let v2 = v + 2;
    hdr.writer_seq.store(v2, Ordering::Release);
    hdr.wait_word.notify(u32::MAX)?;
    Ok(WriteOutcome::Written(v2))
}

/// Read the current version if it's newer than `last_read_version`.
///
/// # Safety
/// `payload_base` must point to at least `hdr.capacity` readable bytes.
pub(crate) unsafe fn read(
    hdr: &MessageHeader,
    payload_base: *const u8,
    last_read_version: u64,
    block: bool,
    timeout: Option<Duration>,
) -> IpcResult<ReadOutcome> {
    let deadline = timeout.map(|d| Instant::now() + d);

    loop {
        let mut v1 = hdr.writer_seq.load(Ordering::Acquire);
        let mut k = 0u32;
        while v1 & 1 == 1 {
            spin_lock::adaptive_yield_pub(&mut k);
            v1 = hdr.writer_seq.load(Ordering::Acquire);
        }

        if v1 == last_read_version {
            if is_closed(hdr) {
                return Ok(ReadOutcome::Closed);
            }
            if !block {
                return Ok(ReadOutcome::NoNewVersion);
            }
            let gen = hdr.wait_word.generation();
            if hdr.writer_seq.load(Ordering::Acquire) != last_read_version {
                continue;
            }
            let remaining = match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Ok(ReadOutcome::NoNewVersion);
                    }
                    Some(dl - now)
                }
                None => None,
            };
            if !hdr.wait_word.wait(gen, remaining)? {
                return Ok(ReadOutcome::NoNewVersion);
            }
            continue;
        }

        let len = hdr.payload_len.load(Ordering::Relaxed) as usize;
        let mut buf = vec![0u8; len];
        std::ptr::copy_nonoverlapping(payload_base, buf.as_mut_ptr(), len);
        let v2 = hdr.writer_seq.load(Ordering::Acquire);
        if v1 != v2 {
            continue;
        }

        hdr.ack_lock.lock();
        if hdr.ack_version.load(Ordering::Relaxed) != v1 {
            hdr.ack_version.store(v1, Ordering::Relaxed);
            hdr.ack_count.store(1, Ordering::Relaxed);
        } else {
            hdr.ack_count.fetch_add(1, Ordering::Relaxed);
        }
        hdr.ack_lock.unlock();
        hdr.ack_word.notify(1)?;

        return Ok(ReadOutcome::Value(buf, v1));
    }
}
