// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Bounded MPMC ring protocol underlying `SharedCircularQueue`.
//
// Producers and consumers each claim a free-running ticket via CAS on
// `tail`/`head`, then spin-wait on that slot's own state word
// (`EMPTY -> WRITING -> READY -> READING -> EMPTY`) before touching its
// bytes. The ticket CAS is the MPMC-safe generalisation of a single-writer
// `fetch_add`; the per-slot state machine is what actually enforces the
// bounded-capacity backpressure.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::error::{IpcError, IpcResult};
use crate::futex::WaitWord;
use crate::spin_lock;

pub const MAGIC: [u8; 4] = *b"SCQ1";
pub const LAYOUT_VERSION: u32 = 1;

const STATE_UNINIT: u8 = 0;
const STATE_INITIALIZING: u8 = 1;
const STATE_READY: u8 = 2;

const SLOT_EMPTY: u32 = 0;
const SLOT_WRITING: u32 = 1;
const SLOT_READY: u32 = 2;
const SLOT_READING: u32 = 3;

pub(crate) enum EnqueueOutcome {
    Enqueued,
    Full,
    Closed,
}

pub(crate) enum DequeueOutcome {
    Value(Vec<u8>),
    Empty,
    Closed,
}

#[repr(C)]
pub(crate) struct RingHeader {
    magic: [u8; 4],
    layout_version: u32,
    max_element_size: u64,
    capacity: u64,
    state: AtomicU8,
    closed: AtomicU8,
    head: AtomicU64,
    tail: AtomicU64,
    not_empty_word: WaitWord,
    not_full_word: WaitWord,
}

pub(crate) fn header_size() -> usize {
    std::mem::size_of::<RingHeader>()
}

fn states_size(capacity: u64) -> usize {
    std::mem::size_of::<AtomicU32>() * capacity as usize
}

fn slot_stride(max_element_size: u64) -> usize {
    4 + max_element_size as usize
}

pub(crate) fn total_size(max_element_size: u64, capacity: u64) -> usize {
    header_size() + states_size(capacity) + slot_stride(max_element_size) * capacity as usize
}

/// # Safety
/// `base` must point to at least `total_size(max_element_size, capacity)`
/// bytes of mapped memory that outlives every handle built on top of it.
pub(crate) unsafe fn header<'a>(base: *mut u8) -> &'a RingHeader {
    &*(base as *const RingHeader)
}

unsafe fn states_ptr(base: *mut u8) -> *mut AtomicU32 {
    base.add(header_size()) as *mut AtomicU32
}

unsafe fn slots_base(base: *mut u8, capacity: u64) -> *mut u8 {
    base.add(header_size() + states_size(capacity))
}

unsafe fn slot_ptr(base: *mut u8, capacity: u64, max_element_size: u64, idx: u64) -> *mut u8 {
    let i = (idx % capacity) as usize;
    slots_base(base, capacity).add(i * slot_stride(max_element_size))
}

unsafe fn state_at<'a>(base: *mut u8, capacity: u64, idx: u64) -> &'a AtomicU32 {
    let i = (idx % capacity) as usize;
    &*(states_ptr(base).add(i))
}

/// # Safety
/// Same obligations as [`header`].
pub(crate) unsafe fn ensure_ready(
    base: *mut u8,
    max_element_size: u64,
    capacity: u64,
    name: &str,
) -> IpcResult<()> {
    let hdr = header(base);
    match hdr.state.compare_exchange(
        STATE_UNINIT,
        STATE_INITIALIZING,
        Ordering::AcqRel,
        Ordering::Acquire,
    ) {
        Ok(_) => {
            let hdr_mut = &mut *(base as *mut RingHeader);
            hdr_mut.magic = MAGIC;
            hdr_mut.layout_version = LAYOUT_VERSION;
            hdr_mut.max_element_size = max_element_size;
            hdr_mut.capacity = capacity;
            hdr_mut.closed = AtomicU8::new(0);
            hdr_mut.head = AtomicU64::new(0);
            hdr_mut.tail = AtomicU64::new(0);
            WaitWord::init_in_place(std::ptr::addr_of_mut!(hdr_mut.not_empty_word));
            WaitWord::init_in_place(std::ptr::addr_of_mut!(hdr_mut.not_full_word));
            std::ptr::write_bytes(states_ptr(base), 0, capacity as usize);
            std::ptr::write_bytes(
                slots_base(base, capacity),
                0,
                slot_stride(max_element_size) * capacity as usize,
            );
            hdr.state.store(STATE_READY, Ordering::Release);
            Ok(())
        }
        Err(_) => {
            let mut k = 0u32;
            while hdr.state.load(Ordering::Acquire) != STATE_READY {
                spin_lock::adaptive_yield_pub(&mut k);
            }
            validate(hdr, max_element_size, capacity, name)
        }
    }
}

/// # Safety
/// Same obligations as [`header`].
pub(crate) unsafe fn validate_attached(
    base: *mut u8,
    max_element_size: u64,
    capacity: u64,
    name: &str,
) -> IpcResult<()> {
    validate(header(base), max_element_size, capacity, name)
}

fn validate(hdr: &RingHeader, max_element_size: u64, capacity: u64, name: &str) -> IpcResult<()> {
    if hdr.magic != MAGIC {
        return Err(IpcError::IncompatibleRegion {
            name: name.to_string(),
            reason: "bad magic for SharedCircularQueue region".into(),
        });
    }
    if hdr.max_element_size != max_element_size || hdr.capacity != capacity {
        return Err(IpcError::IncompatibleRegion {
            name: name.to_string(),
            reason: format!(
                "layout mismatch: region holds max_element_size={}, capacity={}, requested {max_element_size}/{capacity}",
                hdr.max_element_size, hdr.capacity
            ),
        });
    }
    Ok(())
}

pub(crate) fn capacity(hdr: &RingHeader) -> u64 {
    hdr.capacity
}

pub(crate) fn max_element_size(hdr: &RingHeader) -> u64 {
    hdr.max_element_size
}

pub(crate) fn len(hdr: &RingHeader) -> u64 {
    let t = hdr.tail.load(Ordering::Acquire);
    let h = hdr.head.load(Ordering::Acquire);
    t.wrapping_sub(h).min(hdr.capacity)
}

pub(crate) fn is_full(hdr: &RingHeader) -> bool {
    len(hdr) >= hdr.capacity
}

pub(crate) fn is_closed(hdr: &RingHeader) -> bool {
    hdr.closed.load(Ordering::Acquire) != 0
}

pub(crate) fn close(hdr: &RingHeader) {
    hdr.closed.store(1, Ordering::Release);
    let _ = hdr.not_empty_word.notify(u32::MAX);
    let _ = hdr.not_full_word.notify(u32::MAX);
}

/// # Safety
/// `base` must be the same pointer `hdr` was derived from, valid for the
/// ring's full mapped size.
pub(crate) unsafe fn enqueue(
    base: *mut u8,
    hdr: &RingHeader,
    data: &[u8],
    block: bool,
    timeout: Option<Duration>,
) -> IpcResult<EnqueueOutcome> {
    let max_elem = hdr.max_element_size;
    if data.len() as u64 > max_elem {
        return Err(IpcError::PayloadTooLarge {
            len: data.len(),
            capacity: max_elem as usize,
        });
    }
    let capacity = hdr.capacity;
    let deadline = timeout.map(|d| Instant::now() + d);

    let ticket = loop {
        if is_closed(hdr) {
            return Ok(EnqueueOutcome::Closed);
        }
        let t = hdr.tail.load(Ordering::Relaxed);
        let h = hdr.head.load(Ordering::Acquire);
        if t.wrapping_sub(h) >= capacity {
            if !block {
                return Ok(EnqueueOutcome::Full);
            }
            let gen = hdr.not_full_word.generation();
            let t2 = hdr.tail.load(Ordering::Relaxed);
            let h2 = hdr.head.load(Ordering::Acquire);
            if t2.wrapping_sub(h2) < capacity {
                continue;
            }
            let remaining = match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Ok(EnqueueOutcome::Full);
                    }
                    Some(dl - now)
                }
                None => None,
            };
            if !hdr.not_full_word.wait(gen, remaining)? {
                return Ok(EnqueueOutcome::Full);
            }
            continue;
        }
        match hdr
            .tail
            .compare_exchange_weak(t, t + 1, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => break t,
            Err(_) => continue,
        }
    };

    let state = state_at(base, capacity, ticket);
    let mut k = 0u32;
    while state
        .compare_exchange(SLOT_EMPTY, SLOT_WRITING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        spin_lock::adaptive_yield_pub(&mut k);
    }

    let slot = slot_ptr(base, capacity, max_elem, ticket);
    let len = data.len() as u32;
    std::ptr::copy_nonoverlapping(&len as *const u32 as *const u8, slot, 4);
    std::ptr::copy_nonoverlapping(data.as_ptr(), slot.add(4), data.len());
    state.store(SLOT_READY, Ordering::Release);
    hdr.not_empty_word.notify(1)?;
    Ok(EnqueueOutcome::Enqueued)
}

/// # Safety
/// Same obligations as [`enqueue`].
pub(crate) unsafe fn dequeue(
    base: *mut u8,
    hdr: &RingHeader,
    block: bool,
    timeout: Option<Duration>,
) -> IpcResult<DequeueOutcome> {
    let capacity = hdr.capacity;
    let max_elem = hdr.max_element_size;
    let deadline = timeout.map(|d| Instant::now() + d);

    let ticket = loop {
        let h = hdr.head.load(Ordering::Relaxed);
        let t = hdr.tail.load(Ordering::Acquire);
        if h == t {
            if is_closed(hdr) {
                return Ok(DequeueOutcome::Closed);
            }
            if !block {
                return Ok(DequeueOutcome::Empty);
            }
            let gen = hdr.not_empty_word.generation();
            let h2 = hdr.head.load(Ordering::Relaxed);
            let t2 = hdr.tail.load(Ordering::Acquire);
            if h2 != t2 {
                continue;
            }
            let remaining = match deadline {
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Ok(DequeueOutcome::Empty);
                    }
                    Some(dl - now)
                }
                None => None,
            };
            if !hdr.not_empty_word.wait(gen, remaining)? {
                return Ok(DequeueOutcome::Empty);
            }
            continue;
        }
        match hdr
            .head
            .compare_exchange_weak(h, h + 1, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => break h,
            Err(_) => continue,
        }
    };

    let state = state_at(base, capacity, ticket);
    let mut k = 0u32;
    while state
        .compare_exchange(SLOT_READY, SLOT_READING, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        spin_lock::adaptive_yield_pub(&mut k);
    }

    let slot = slot_ptr(base, capacity, max_elem, ticket);
    let mut len_bytes = [0u8; 4];
    std::ptr::copy_nonoverlapping(slot, len_bytes.as_mut_ptr(), 4);
    let len = u32::from_ne_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    std::ptr::copy_nonoverlapping(slot.add(4), buf.as_mut_ptr(), len);

    state.store(SLOT_EMPTY, Ordering::Release);
    hdr.not_full_word.notify(1)?;

    Ok(DequeueOutcome::Value(buf))
}
