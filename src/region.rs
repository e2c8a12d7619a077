// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared-memory region allocator. Thin, error-translating wrapper
// around `ShmHandle` that adds the strict-size-check create semantics.

use std::io;

use crate::error::{IpcError, IpcResult};
use crate::{ShmHandle, ShmOpenMode};

/// How `open_region` should behave with respect to an existing region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMode {
    /// Fail with `AlreadyExists` if a region of this name already exists.
    Create,
    /// Fail with `NotFound` if no region of this name exists yet.
    Open,
    /// Create if missing, attach if present.
    CreateOrOpen,
}

/// Acquire a named region of `size` bytes.
///
/// When `strict` is set and the region already existed, its actual size
/// must equal `size` or the call fails with `IncompatibleRegion` — this
/// only applies to `Open`/`CreateOrOpen` attaching to a pre-existing
/// region; a fresh `Create` always gets exactly `size` bytes.
pub fn open_region(name: &str, size: usize, mode: RegionMode, strict: bool) -> IpcResult<ShmHandle> {
    if name.is_empty() {
        return Err(IpcError::InvalidArgument("region name must not be empty".into()));
    }
    if size == 0 {
        return Err(IpcError::InvalidArgument("region size must be non-zero".into()));
    }

    let shm_mode = match mode {
        RegionMode::Create => ShmOpenMode::Create,
        RegionMode::Open => ShmOpenMode::Open,
        RegionMode::CreateOrOpen => ShmOpenMode::CreateOrOpen,
    };

    let handle = match ShmHandle::acquire(name, size, shm_mode) {
        Ok(h) => h,
        Err(e) => return Err(translate_acquire_error(name, mode, e)),
    };

    if strict && matches!(mode, RegionMode::Open | RegionMode::CreateOrOpen) {
        let actual = handle.user_size();
        if actual != handle.requested_size() {
            return Err(IpcError::IncompatibleRegion {
                name: name.to_string(),
                reason: format!(
                    "existing region is {actual} bytes, requested {size} bytes with strict=true"
                ),
            });
        }
    }

    Ok(handle)
}

fn translate_acquire_error(name: &str, mode: RegionMode, e: io::Error) -> IpcError {
    match e.kind() {
        io::ErrorKind::NotFound if mode == RegionMode::Open => IpcError::NotFound(name.to_string()),
        io::ErrorKind::AlreadyExists if mode == RegionMode::Create => {
            IpcError::AlreadyExists(name.to_string())
        }
        io::ErrorKind::InvalidData => IpcError::IncompatibleRegion {
            name: name.to_string(),
            reason: e.to_string(),
        },
        _ => IpcError::Io(e),
    }
}

/// Unlink the backing storage for a named region without needing an open
/// handle. Safe to call on a region that does not exist.
pub fn unlink_region(name: &str) {
    ShmHandle::unlink_by_name(name);
}

/// Total bytes currently usable in an open region (excludes any internal
/// bookkeeping such as the trailing reference counter).
pub fn size_of(handle: &ShmHandle) -> usize {
    handle.user_size()
}
