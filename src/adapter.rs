// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Convenience helpers for reading a fixed batch of `SharedMessage` handles
// together. These are plain sequential loops: the original system this was
// distilled from released an interpreter lock around each read so other
// threads could make progress while one reader blocked, which has no
// equivalent here — there's no global lock to release.

use std::time::Duration;

use crate::error::IpcResult;
use crate::shared_message::{ReadResult, SharedMessage};

/// Read every handle in order, non-blocking, collecting whatever each one
/// currently has. The output is the same length as `readers` and in the
/// same order — a handle with nothing new yields `ReadResult::NoNewVersion`
/// rather than being skipped.
pub fn read_all(readers: &mut [SharedMessage]) -> IpcResult<Vec<ReadResult>> {
    read_all_map(readers, |r| r.read(false, None))
}

/// Like [`read_all`], but each handle is read with `f` instead of a plain
/// non-blocking read — e.g. to block with a shared timeout, or to read in a
/// custom mode.
pub fn read_all_map<F>(readers: &mut [SharedMessage], mut f: F) -> IpcResult<Vec<ReadResult>>
where
    F: FnMut(&mut SharedMessage) -> IpcResult<ReadResult>,
{
    readers.iter_mut().map(&mut f).collect()
}

/// Read every handle in order, blocking each in turn up to `timeout`.
pub fn read_all_blocking(
    readers: &mut [SharedMessage],
    timeout: Option<Duration>,
) -> IpcResult<Vec<ReadResult>> {
    read_all_map(readers, |r| r.read(true, timeout))
}
