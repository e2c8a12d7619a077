// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `SharedCircularQueue`: a bounded MPMC FIFO backed by `ring_proto`.

use std::time::Duration;

use crate::error::IpcResult;
use crate::region::{self, RegionMode};
use crate::ring_proto::{self, DequeueOutcome, EnqueueOutcome};
use crate::ShmHandle;

/// Informational role a handle plays. Unlike `SharedMessage`'s read/write
/// modes, this carries no behavioural difference — every handle can both
/// `try_read` and `try_write` regardless of role — it exists so callers
/// document intent and so diagnostics can report who is attached as what.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Producer,
    Consumer,
    Both,
}

pub enum WriteResult {
    Written,
    Full,
    Closed,
}

pub enum ReadResult {
    Value(Vec<u8>),
    Empty,
    Closed,
}

/// A bounded multi-producer, multi-consumer FIFO backed by a named shared
/// memory region.
pub struct SharedCircularQueue {
    shm: ShmHandle,
    base: *mut u8,
    name: String,
    role: QueueRole,
}

unsafe impl Send for SharedCircularQueue {}
unsafe impl Sync for SharedCircularQueue {}

impl SharedCircularQueue {
    pub fn create(
        name: &str,
        max_element_size: usize,
        capacity: usize,
        role: QueueRole,
    ) -> IpcResult<Self> {
        Self::open_with(name, max_element_size as u64, capacity as u64, RegionMode::Create, role)
    }

    pub fn open(
        name: &str,
        max_element_size: usize,
        capacity: usize,
        role: QueueRole,
    ) -> IpcResult<Self> {
        Self::open_with(name, max_element_size as u64, capacity as u64, RegionMode::Open, role)
    }

    pub fn create_or_open(
        name: &str,
        max_element_size: usize,
        capacity: usize,
        role: QueueRole,
    ) -> IpcResult<Self> {
        Self::open_with(
            name,
            max_element_size as u64,
            capacity as u64,
            RegionMode::CreateOrOpen,
            role,
        )
    }

    fn open_with(
        name: &str,
        max_element_size: u64,
        capacity: u64,
        region_mode: RegionMode,
        role: QueueRole,
    ) -> IpcResult<Self> {
        let size = ring_proto::total_size(max_element_size, capacity);
        let shm = region::open_region(name, size, region_mode, true)?;
        let base = shm.as_mut_ptr();
        unsafe { ring_proto::ensure_ready(base, max_element_size, capacity, name)? };
        Ok(Self { shm, base, name: name.to_string(), role })
    }

    pub fn try_write(&self, data: &[u8]) -> IpcResult<WriteResult> {
        self.write(data, false, None)
    }

    pub fn blocking_write(&self, data: &[u8], timeout: Option<Duration>) -> IpcResult<WriteResult> {
        self.write(data, true, timeout)
    }

    fn write(&self, data: &[u8], block: bool, timeout: Option<Duration>) -> IpcResult<WriteResult> {
        let hdr = unsafe { ring_proto::header(self.base) };
        let outcome = unsafe { ring_proto::enqueue(self.base, hdr, data, block, timeout) }?;
        Ok(match outcome {
            EnqueueOutcome::Enqueued => WriteResult::Written,
            EnqueueOutcome::Full => WriteResult::Full,
            EnqueueOutcome::Closed => WriteResult::Closed,
        })
    }

    pub fn try_read(&self) -> IpcResult<ReadResult> {
        self.read(false, None)
    }

    pub fn blocking_read(&self, timeout: Option<Duration>) -> IpcResult<ReadResult> {
        self.read(true, timeout)
    }

    fn read(&self, block: bool, timeout: Option<Duration>) -> IpcResult<ReadResult> {
        let hdr = unsafe { ring_proto::header(self.base) };
        let outcome = unsafe { ring_proto::dequeue(self.base, hdr, block, timeout) }?;
        Ok(match outcome {
            DequeueOutcome::Value(buf) => ReadResult::Value(buf),
            DequeueOutcome::Empty => ReadResult::Empty,
            DequeueOutcome::Closed => ReadResult::Closed,
        })
    }

    /// Drain every currently-available element without blocking. Stops at
    /// the first `Empty`/`Closed` result rather than racing forever against
    /// concurrent producers.
    pub fn read_all(&self) -> IpcResult<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        loop {
            match self.try_read()? {
                ReadResult::Value(v) => out.push(v),
                ReadResult::Empty | ReadResult::Closed => break,
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> usize {
        let hdr = unsafe { ring_proto::header(self.base) };
        ring_proto::len(hdr) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let hdr = unsafe { ring_proto::header(self.base) };
        ring_proto::is_full(hdr)
    }

    pub fn capacity(&self) -> usize {
        let hdr = unsafe { ring_proto::header(self.base) };
        ring_proto::capacity(hdr) as usize
    }

    pub fn max_element_size(&self) -> usize {
        let hdr = unsafe { ring_proto::header(self.base) };
        ring_proto::max_element_size(hdr) as usize
    }

    pub fn is_closed(&self) -> bool {
        let hdr = unsafe { ring_proto::header(self.base) };
        ring_proto::is_closed(hdr)
    }

    pub fn close(&self) {
        let hdr = unsafe { ring_proto::header(self.base) };
        ring_proto::close(hdr);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    pub(crate) fn memory_size(&self) -> usize {
        region::size_of(&self.shm)
    }
}
