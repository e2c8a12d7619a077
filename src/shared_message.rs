// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// `SharedMessage`: a single-slot, versioned "latest value wins" broadcast
// register. Wraps the seqlock protocol in `message_proto` with named-region
// lifecycle, reader bookkeeping, and optional feeder/drainer threads for
// asynchronous write/read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::IpcResult;
use crate::message_proto::{self, ReadOutcome, WriteOutcome};
use crate::region::{self, RegionMode};
use crate::ShmHandle;

/// Whether a handle counts toward `reader_count` for the reader-wait
/// policy. Every handle can still call both `read` and `write` regardless
/// of role — a writer-only participant just shouldn't make `All`/`Count(k)`
/// wait on an ack that will never come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    Reader,
    Writer,
    Both,
}

impl MessageRole {
    fn counts_as_reader(self) -> bool {
        !matches!(self, MessageRole::Writer)
    }
}

pub use crate::message_proto::ReaderWaitPolicy;

const LOCAL_QUEUE_DEPTH: usize = 1024;
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How `read` behaves for a given handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// `read` runs the seqlock protocol directly and may block the caller.
    Sync,
    /// A background drainer thread reads continuously; `read` just pops
    /// from a local handoff queue.
    Async,
}

/// How `write` behaves for a given handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `write` runs the seqlock protocol directly and may block the caller
    /// on the configured reader wait policy.
    Sync,
    /// `write` hands the payload to a background feeder thread and returns
    /// immediately; the feeder applies the reader wait policy.
    Async,
}

/// Read/write behaviour for a `SharedMessage` handle. The two axes are
/// independent — a handle can feed asynchronously while reading
/// synchronously, or any other combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub read: ReadMode,
    pub write: WriteMode,
}

impl Mode {
    pub fn sync() -> Self {
        Self { read: ReadMode::Sync, write: WriteMode::Sync }
    }
    pub fn read_async() -> Self {
        Self { read: ReadMode::Async, write: WriteMode::Sync }
    }
    pub fn write_async() -> Self {
        Self { read: ReadMode::Sync, write: WriteMode::Async }
    }
    pub fn fully_async() -> Self {
        Self { read: ReadMode::Async, write: WriteMode::Async }
    }
}

pub enum WriteResult {
    /// Committed synchronously as this version.
    Written(u64),
    /// Handed to the feeder thread; the committed version isn't known yet.
    Enqueued,
    /// The region was already closed.
    Closed,
}

pub enum ReadResult {
    Value(Vec<u8>),
    NoNewVersion,
    Closed,
}

enum DrainedItem {
    Value(Vec<u8>),
    Closed,
}

struct Shared {
    shm: ShmHandle,
    base: *mut u8,
    payload: *mut u8,
    capacity: u64,
}

unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

struct FeederHandle {
    tx: SyncSender<Vec<u8>>,
    handle: Option<JoinHandle<()>>,
}

struct DrainerHandle {
    rx: Receiver<DrainedItem>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// A versioned single-slot broadcast register backed by a named shared
/// memory region.
pub struct SharedMessage {
    shared: Arc<Shared>,
    name: String,
    mode: Mode,
    policy: ReaderWaitPolicy,
    last_read_version: u64,
    is_reader: bool,
    feeder: Option<FeederHandle>,
    drainer: Option<DrainerHandle>,
}

impl SharedMessage {
    pub fn create(
        name: &str,
        capacity: usize,
        mode: Mode,
        role: MessageRole,
        policy: ReaderWaitPolicy,
    ) -> IpcResult<Self> {
        Self::open_with(name, capacity as u64, RegionMode::Create, mode, role, policy)
    }

    pub fn open(
        name: &str,
        capacity: usize,
        mode: Mode,
        role: MessageRole,
        policy: ReaderWaitPolicy,
    ) -> IpcResult<Self> {
        Self::open_with(name, capacity as u64, RegionMode::Open, mode, role, policy)
    }

    pub fn create_or_open(
        name: &str,
        capacity: usize,
        mode: Mode,
        role: MessageRole,
        policy: ReaderWaitPolicy,
    ) -> IpcResult<Self> {
        Self::open_with(name, capacity as u64, RegionMode::CreateOrOpen, mode, role, policy)
    }

    fn open_with(
        name: &str,
        capacity: u64,
        region_mode: RegionMode,
        mode: Mode,
        role: MessageRole,
        policy: ReaderWaitPolicy,
    ) -> IpcResult<Self> {
        let size = message_proto::total_size(capacity);
        let shm = region::open_region(name, size, region_mode, true)?;
        let base = shm.as_mut_ptr();
        unsafe { message_proto::ensure_ready(base, capacity, name)? };
        let payload = unsafe { message_proto::payload_ptr(base) };

        let shared = Arc::new(Shared { shm, base, payload, capacity });
        let hdr = unsafe { message_proto::header(base) };

        // Only participants that actually read should count toward
        // `reader_count` — a pure writer handle never acks, and counting it
        // would make `All`/`Count(k)` wait on an ack that never comes.
        let is_reader = role.counts_as_reader();
        if is_reader {
            message_proto::connect_reader(hdr);
        }

        // Always start at 0, not at the current `writer_seq`: a handle
        // attaching after writes have already landed must still see the
        // latest committed value on its first read rather than `NoNewVersion`
        // forever. `read` reads whatever is current regardless of how far
        // behind `last_read_version` is, so this never replays history.
        let last_read_version = 0u64;

        let feeder = (mode.write == WriteMode::Async).then(|| spawn_feeder(Arc::clone(&shared), policy));
        let drainer = (mode.read == ReadMode::Async)
            .then(|| spawn_drainer(Arc::clone(&shared), last_read_version));

        Ok(Self {
            shared,
            name: name.to_string(),
            mode,
            policy,
            last_read_version,
            is_reader,
            feeder,
            drainer,
        })
    }

    /// Write `data` as a new version. Synchronous writers honour the
    /// configured reader wait policy before committing; asynchronous
    /// writers hand off to the feeder thread and return immediately.
    pub fn write(&mut self, data: &[u8]) -> IpcResult<WriteResult> {
        match self.mode.write {
            WriteMode::Sync => {
                let hdr = unsafe { message_proto::header(self.shared.base) };
                let outcome =
                    unsafe { message_proto::write(hdr, self.shared.payload, data, self.policy, None) }?;
                Ok(match outcome {
                    WriteOutcome::Written(v) => WriteResult::Written(v),
                    WriteOutcome::Closed => WriteResult::Closed,
                })
            }
            WriteMode::Async => {
                let feeder = self.feeder.as_ref().expect("write_async mode without a feeder thread");
                feeder
                    .tx
                    .send(data.to_vec())
                    .map(|_| WriteResult::Enqueued)
                    .or(Ok(WriteResult::Closed))
            }
        }
    }

    /// Read the current version if newer than what this handle last saw.
    /// `block` is honoured for synchronous handles; `timeout` bounds the
    /// wait (`None` blocks indefinitely).
    pub fn read(&mut self, block: bool, timeout: Option<Duration>) -> IpcResult<ReadResult> {
        match self.mode.read {
            ReadMode::Sync => {
                let hdr = unsafe { message_proto::header(self.shared.base) };
                let outcome = unsafe {
                    message_proto::read(hdr, self.shared.payload, self.last_read_version, block, timeout)
                }?;
                Ok(match outcome {
                    ReadOutcome::Value(buf, v) => {
                        self.last_read_version = v;
                        ReadResult::Value(buf)
                    }
                    ReadOutcome::NoNewVersion => ReadResult::NoNewVersion,
                    ReadOutcome::Closed => ReadResult::Closed,
                })
            }
            ReadMode::Async => {
                let drainer = self.drainer.as_ref().expect("read_async mode without a drainer thread");
                let item = if !block {
                    drainer.rx.try_recv().ok()
                } else if let Some(d) = timeout {
                    drainer.rx.recv_timeout(d).ok()
                } else {
                    drainer.rx.recv().ok()
                };
                Ok(match item {
                    Some(DrainedItem::Value(buf)) => ReadResult::Value(buf),
                    Some(DrainedItem::Closed) => ReadResult::Closed,
                    None => ReadResult::NoNewVersion,
                })
            }
        }
    }

    pub fn is_new_version_available(&self) -> bool {
        self.last_written_version() != self.last_read_version
    }

    pub fn last_written_version(&self) -> u64 {
        let hdr = unsafe { message_proto::header(self.shared.base) };
        message_proto::last_written_version(hdr)
    }

    pub fn last_read_version(&self) -> u64 {
        self.last_read_version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity as usize
    }

    /// Total bytes backing the region, including the header — not just the
    /// payload capacity returned by `capacity()`.
    pub fn memory_size(&self) -> usize {
        region::size_of(&self.shared.shm)
    }

    pub fn is_closed(&self) -> bool {
        let hdr = unsafe { message_proto::header(self.shared.base) };
        message_proto::is_closed(hdr)
    }

    /// Mark the region closed. Every blocked and future reader/writer
    /// observes the closed sentinel instead of hanging.
    pub fn close(&self) {
        let hdr = unsafe { message_proto::header(self.shared.base) };
        message_proto::close(hdr);
    }
}

impl Drop for SharedMessage {
    fn drop(&mut self) {
        if self.is_reader {
            let hdr = unsafe { message_proto::header(self.shared.base) };
            message_proto::disconnect_reader(hdr);
        }

        if let Some(f) = self.feeder.take() {
            drop(f.tx);
            if let Some(h) = f.handle {
                let _ = h.join();
            }
        }
        if let Some(d) = self.drainer.take() {
            d.stop.store(true, Ordering::Relaxed);
            if let Some(h) = d.handle {
                let _ = h.join();
            }
        }
    }
}

fn spawn_feeder(shared: Arc<Shared>, policy: ReaderWaitPolicy) -> FeederHandle {
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(LOCAL_QUEUE_DEPTH);
    let handle = std::thread::spawn(move || {
        while let Ok(data) = rx.recv() {
            let hdr = unsafe { message_proto::header(shared.base) };
            match unsafe { message_proto::write(hdr, shared.payload, &data, policy, None) } {
                Ok(WriteOutcome::Written(_)) => {}
                Ok(WriteOutcome::Closed) | Err(_) => break,
            }
        }
    });
    FeederHandle { tx, handle: Some(handle) }
}

fn spawn_drainer(shared: Arc<Shared>, start_version: u64) -> DrainerHandle {
    let (tx, rx) = mpsc::sync_channel::<DrainedItem>(LOCAL_QUEUE_DEPTH);
    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = Arc::clone(&stop);
    let mut last_read_version = start_version;
    let handle = std::thread::spawn(move || {
        while !thread_stop.load(Ordering::Relaxed) {
            let hdr = unsafe { message_proto::header(shared.base) };
            let outcome = unsafe {
                message_proto::read(hdr, shared.payload, last_read_version, true, Some(DRAIN_POLL_INTERVAL))
            };
            match outcome {
                Ok(ReadOutcome::Value(buf, v)) => {
                    last_read_version = v;
                    if tx.send(DrainedItem::Value(buf)).is_err() {
                        break;
                    }
                }
                Ok(ReadOutcome::Closed) => {
                    let _ = tx.send(DrainedItem::Closed);
                    break;
                }
                Ok(ReadOutcome::NoNewVersion) => {}
                Err(_) => break,
            }
        }
    });
    DrainerHandle { rx, stop, handle: Some(handle) }
}
