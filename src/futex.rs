// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process park/unpark primitive embedded directly in a shared region.
//
// `WaitWord` is an eventcount: a generation counter bumped on every `notify`.
// A waiter loads the generation, rechecks its predicate, and only parks if
// the predicate still doesn't hold — `wait()` then blocks only while the
// generation it was given is still current. Spurious wakes are possible and
// expected; callers always re-check their predicate after `wait` returns.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// A generation counter plus whatever OS-specific parking state this
/// platform needs, embedded inline in a shared-memory header.
///
/// Binary layout varies by target (Linux and Windows carry no extra state;
/// other Unix targets embed a `pthread_mutex_t`/`pthread_cond_t` pair) —
/// this is fine because every process attaching to a given region runs the
/// same binary-compatible build for that OS.
#[repr(C)]
pub struct WaitWord {
    word: AtomicU32,
    #[cfg(all(unix, not(target_os = "linux")))]
    aux: emulated::EmulatedAux,
}

impl WaitWord {
    /// Initialise a `WaitWord` in place at `this`.
    ///
    /// Must be called exactly once per region, by whichever process
    /// constructs the enclosing header for the first time (guarded by that
    /// header's own `constructed` flag), before any other process observes
    /// the header as ready.
    ///
    /// # Safety
    /// `this` must point to valid, zeroed memory of at least
    /// `size_of::<WaitWord>()` bytes that stays mapped for the region's
    /// lifetime.
    pub unsafe fn init_in_place(this: *mut WaitWord) {
        std::ptr::write(std::ptr::addr_of_mut!((*this).word), AtomicU32::new(0));
        #[cfg(all(unix, not(target_os = "linux")))]
        emulated::init_aux(std::ptr::addr_of_mut!((*this).aux));
    }

    /// Current generation. Callers load this, check their predicate, and
    /// pass the value back to [`wait`](Self::wait) if they still need to
    /// park — this closes the classic lost-wakeup race.
    pub fn generation(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    /// Park until the generation differs from `expected_generation`, a
    /// `notify` wakes this waiter, the wait times out, or a spurious wake
    /// occurs. Returns `Ok(false)` only on a genuine timeout.
    pub fn wait(&self, expected_generation: u32, timeout: Option<Duration>) -> io::Result<bool> {
        imp::wait(self, expected_generation, timeout)
    }

    /// Bump the generation and wake up to `count` parked waiters.
    /// `count == u32::MAX` wakes all of them.
    pub fn notify(&self, count: u32) -> io::Result<()> {
        self.word.fetch_add(1, Ordering::Release);
        imp::wake(self, count)
    }
}

// ---------------------------------------------------------------------------
// Linux: raw futex(2) syscall on the shared word directly.
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
mod imp {
    use super::*;

    pub(super) fn wait(ww: &WaitWord, expected: u32, timeout: Option<Duration>) -> io::Result<bool> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as i64,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(std::ptr::null(), |t| t as *const libc::timespec);

        // Deliberately no FUTEX_PRIVATE_FLAG: the word is shared between
        // unrelated address spaces, not just threads of one process.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                ww.word.as_ptr(),
                libc::FUTEX_WAIT,
                expected as i32,
                ts_ptr,
                std::ptr::null::<u32>(),
                0i32,
            )
        };
        if ret == 0 {
            return Ok(true);
        }
        match io::Error::last_os_error().raw_os_error() {
            Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(true),
            Some(libc::ETIMEDOUT) => Ok(false),
            _ => Err(io::Error::last_os_error()),
        }
    }

    pub(super) fn wake(ww: &WaitWord, count: u32) -> io::Result<()> {
        let n = if count == u32::MAX { i32::MAX } else { count as i32 };
        let ret = unsafe {
            libc::syscall(
                libc::SYS_futex,
                ww.word.as_ptr(),
                libc::FUTEX_WAKE,
                n,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0i32,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Windows: WaitOnAddress / WakeByAddressSingle / WakeByAddressAll.
// ---------------------------------------------------------------------------

#[cfg(windows)]
mod imp {
    use super::*;
    use windows_sys::Win32::System::Threading::{
        WaitOnAddress, WakeByAddressAll, WakeByAddressSingle, INFINITE,
    };

    pub(super) fn wait(ww: &WaitWord, expected: u32, timeout: Option<Duration>) -> io::Result<bool> {
        let ms = timeout.map_or(INFINITE, |d| d.as_millis().min(u32::MAX as u128) as u32);
        let expected = expected;
        let ok = unsafe {
            WaitOnAddress(
                ww.word.as_ptr() as *const core::ffi::c_void,
                &expected as *const u32 as *const core::ffi::c_void,
                std::mem::size_of::<u32>(),
                ms,
            )
        };
        if ok != 0 {
            return Ok(true);
        }
        const ERROR_TIMEOUT: u32 = 1460;
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_TIMEOUT as i32) {
            return Ok(false);
        }
        Err(err)
    }

    pub(super) fn wake(ww: &WaitWord, count: u32) -> io::Result<()> {
        let addr = ww.word.as_ptr() as *const core::ffi::c_void;
        unsafe {
            if count <= 1 {
                WakeByAddressSingle(addr);
            } else {
                WakeByAddressAll(addr);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Other Unix (macOS, BSD): embedded process-shared pthread_mutex_t/cond_t.
// ---------------------------------------------------------------------------

#[cfg(all(unix, not(target_os = "linux")))]
mod emulated {
    #[repr(C)]
    pub(super) struct EmulatedAux {
        pub(super) mutex: libc::pthread_mutex_t,
        pub(super) cond: libc::pthread_cond_t,
    }

    /// # Safety
    /// `aux` must point to zeroed, mapped memory.
    pub(super) unsafe fn init_aux(aux: *mut EmulatedAux) {
        let mtx_ptr = std::ptr::addr_of_mut!((*aux).mutex);
        let cond_ptr = std::ptr::addr_of_mut!((*aux).cond);

        let mut mattr: libc::pthread_mutexattr_t = std::mem::zeroed();
        libc::pthread_mutexattr_init(&mut mattr);
        libc::pthread_mutexattr_setpshared(&mut mattr, libc::PTHREAD_PROCESS_SHARED);
        libc::pthread_mutex_init(mtx_ptr, &mattr);
        libc::pthread_mutexattr_destroy(&mut mattr);

        let mut cattr: libc::pthread_condattr_t = std::mem::zeroed();
        libc::pthread_condattr_init(&mut cattr);
        libc::pthread_condattr_setpshared(&mut cattr, libc::PTHREAD_PROCESS_SHARED);
        libc::pthread_cond_init(cond_ptr, &cattr);
        libc::pthread_condattr_destroy(&mut cattr);
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
mod imp {
    use super::*;

    pub(super) fn wait(ww: &WaitWord, expected: u32, timeout: Option<Duration>) -> io::Result<bool> {
        unsafe {
            let mtx_ptr = std::ptr::addr_of!(ww.aux.mutex) as *mut libc::pthread_mutex_t;
            let cond_ptr = std::ptr::addr_of!(ww.aux.cond) as *mut libc::pthread_cond_t;

            libc::pthread_mutex_lock(mtx_ptr);
            let mut timed_out = false;
            if ww.word.load(Ordering::Acquire) == expected {
                match timeout {
                    Some(d) => {
                        let mut ts: libc::timespec = std::mem::zeroed();
                        libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts);
                        let ns = ts.tv_nsec as u64 + d.subsec_nanos() as u64;
                        ts.tv_sec += d.as_secs() as libc::time_t + (ns / 1_000_000_000) as libc::time_t;
                        ts.tv_nsec = (ns % 1_000_000_000) as _;
                        let eno = libc::pthread_cond_timedwait(cond_ptr, mtx_ptr, &ts);
                        timed_out = eno == libc::ETIMEDOUT;
                    }
                    None => {
                        libc::pthread_cond_wait(cond_ptr, mtx_ptr);
                    }
                }
            }
            libc::pthread_mutex_unlock(mtx_ptr);
            Ok(!timed_out)
        }
    }

    pub(super) fn wake(ww: &WaitWord, count: u32) -> io::Result<()> {
        unsafe {
            let mtx_ptr = std::ptr::addr_of!(ww.aux.mutex) as *mut libc::pthread_mutex_t;
            let cond_ptr = std::ptr::addr_of!(ww.aux.cond) as *mut libc::pthread_cond_t;

            // Lock/unlock barrier: a waiter that just observed the old
            // generation and is about to call pthread_cond_wait cannot miss
            // this wake, since it must take the mutex first.
            libc::pthread_mutex_lock(mtx_ptr);
            libc::pthread_mutex_unlock(mtx_ptr);

            if count == u32::MAX {
                libc::pthread_cond_broadcast(cond_ptr);
            } else {
                for _ in 0..count.max(1) {
                    libc::pthread_cond_signal(cond_ptr);
                }
            }
        }
        Ok(())
    }
}

// Safety: every field is designed for concurrent cross-process access.
unsafe impl Send for WaitWord {}
unsafe impl Sync for WaitWord {}
