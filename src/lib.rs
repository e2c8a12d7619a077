// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Shared-memory IPC: a versioned single-slot broadcast register
// (`SharedMessage`) and a bounded MPMC ring (`SharedCircularQueue`), both
// built on a named shared memory region, a seqlock/ring wire protocol, and
// an embedded cross-process wait/wake primitive.

pub mod shm_name;

mod platform;

mod shm;
pub use shm::{ShmHandle, ShmOpenMode};

mod spin_lock;

mod error;
pub use error::{IpcError, IpcResult};

mod region;
pub use region::{unlink_region, RegionMode};

mod futex;

mod message_proto;
pub use message_proto::ReaderWaitPolicy;

mod ring_proto;

mod shared_message;
pub use shared_message::{
    MessageRole, Mode as MessageMode, ReadMode, ReadResult, SharedMessage, WriteMode, WriteResult,
};

mod shared_queue;
pub use shared_queue::{
    QueueRole, ReadResult as QueueReadResult, SharedCircularQueue, WriteResult as QueueWriteResult,
};

mod adapter;
pub use adapter::{read_all, read_all_blocking, read_all_map};
