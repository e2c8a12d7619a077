// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Structured error type for the shared-memory IPC surface.

use thiserror::Error;

/// Errors returned by region, message, and queue operations.
///
/// `WouldBlock` is deliberately absent: non-blocking calls surface "no data
/// yet" / "full" / "no new version" as a plain enum value in their return
/// type, not as an `Err`.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("region '{0}' not found")]
    NotFound(String),

    #[error("region '{0}' already exists")]
    AlreadyExists(String),

    #[error("region '{name}' is incompatible: {reason}")]
    IncompatibleRegion { name: String, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("payload of {len} bytes exceeds capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("region is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type IpcResult<T> = Result<T, IpcError>;
