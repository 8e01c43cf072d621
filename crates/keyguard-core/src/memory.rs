//! Memory protection for seeds and derived keys
//!
//! Two measures:
//!
//! 1. **Core dump prevention**: `setrlimit(RLIMIT_CORE, 0)` so a crash never
//!    writes seed material to disk.
//!
//! 2. **Scoped secret buffers**: [`SecretBuffer`] pins its pages with `mlock()`
//!    and zeroizes them on drop, on every exit path including `?` returns.
//!
//! Locking is best-effort. Containers and unprivileged users often cannot
//! `mlock`, so failures are logged and the buffer still zeroizes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use zeroize::Zeroize;

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process.
///
/// Call early in start-up, before any seed is materialized.
/// Returns `true` if core dumps are (now or already) disabled.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        let ok = unix::disable_core_dumps_impl();
        if !ok {
            CORE_DUMPS_DISABLED.store(false, Ordering::SeqCst);
        }
        ok
    }

    #[cfg(not(unix))]
    {
        log::warn!("core dump prevention not supported on this platform");
        false
    }
}

/// Owned, page-locked byte buffer that is zeroized and unlocked on drop.
///
/// Seeds, extended private keys and signing scalars are only ever written
/// into one of these.
///
/// ```
/// use keyguard_core::memory::SecretBuffer;
/// let mut buf = SecretBuffer::new(64);
/// buf.as_mut_slice()[..5].copy_from_slice(b"hello");
/// // zeroized and munlocked when `buf` goes out of scope
/// ```
pub struct SecretBuffer {
    data: Vec<u8>,
    locked: bool,
}

impl SecretBuffer {
    /// Zero-filled buffer of `len` bytes, locked in memory where permitted.
    pub fn new(len: usize) -> Self {
        let data = vec![0u8; len];
        let locked = if data.is_empty() {
            true
        } else {
            #[cfg(unix)]
            {
                // SAFETY: `data` is a live allocation of exactly `data.len()` bytes
                // and is unlocked in `Drop` before it is freed.
                unsafe { unix::mlock_impl(data.as_ptr(), data.len()) }
            }
            #[cfg(not(unix))]
            {
                false
            }
        };

        if !locked {
            log::debug!("mlock unavailable for {} byte secret buffer", len);
        }

        Self { data, locked }
    }

    /// Copy `bytes` into a fresh buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = Self::new(bytes.len());
        buf.data.copy_from_slice(bytes);
        buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the pages are actually locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Zeroize in place without releasing the buffer.
    pub fn wipe(&mut self) {
        self.data.as_mut_slice().zeroize();
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        let len = self.data.len();
        let ptr = self.data.as_ptr();
        self.data.zeroize();

        #[cfg(unix)]
        if self.locked && len != 0 {
            // SAFETY: same allocation that was passed to mlock in `new`.
            unsafe {
                unix::munlock_impl(ptr, len);
            }
        }
        #[cfg(not(unix))]
        let _ = (ptr, len);
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("len", &self.data.len())
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(unix)]
mod unix {
    pub fn disable_core_dumps_impl() -> bool {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a plain POSIX call on a stack value.
        unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
                log::warn!(
                    "failed to disable core dumps: {}",
                    std::io::Error::last_os_error()
                );
                return false;
            }
        }
        true
    }

    pub unsafe fn mlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::mlock(ptr as *const libc::c_void, len) == 0
    }

    pub unsafe fn munlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::munlock(ptr as *const libc::c_void, len) == 0
    }
}
