//! Linux futex-based carrier parking
//!
//! Futex word semantics: a wake epoch. Parkers FUTEX_WAIT on the epoch
//! they snapshotted; wakers increment it and FUTEX_WAKE.

use super::{ParkToken, WorkerParking};
use std::sync::atomic::{fence, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use tracing::trace;

pub struct FutexParking {
    /// Wake epoch, bumped by every wake
    futex: AtomicU32,

    /// Carriers between `prepare()` and return from `park()`/`cancel()`
    parked: AtomicUsize,
}

impl FutexParking {
    pub fn new() -> Self {
        Self {
            futex: AtomicU32::new(0),
            parked: AtomicUsize::new(0),
        }
    }

    fn futex_wake(&self, count: i32) {
        // Safety: the futex word lives as long as self
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                count,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn signal(&self, count: i32) {
        self.futex.fetch_add(1, Ordering::SeqCst);
        // Pairs with the fence in prepare(): either we see the parker or it
        // sees the new epoch.
        fence(Ordering::SeqCst);
        if self.parked.load(Ordering::SeqCst) > 0 {
            self.futex_wake(count);
        }
    }
}

impl Default for FutexParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FutexParking {
    fn prepare(&self) -> ParkToken {
        self.parked.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        ParkToken {
            epoch: self.futex.load(Ordering::SeqCst),
        }
    }

    fn cancel(&self, _token: ParkToken) {
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool {
        if self.futex.load(Ordering::Acquire) != token.epoch {
            self.parked.fetch_sub(1, Ordering::SeqCst);
            return true;
        }

        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };

        // FUTEX_WAIT: sleep while futex == epoch
        // Safety: futex word and timespec outlive the call
        let result = unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.futex.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                token.epoch,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            )
        };

        self.parked.fetch_sub(1, Ordering::SeqCst);

        if result == 0 {
            return true;
        }
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        match errno {
            // Epoch moved before we slept
            libc::EAGAIN => true,
            libc::ETIMEDOUT => false,
            libc::EINTR => self.futex.load(Ordering::Acquire) != token.epoch,
            other => {
                trace!(errno = other, "futex wait failed");
                false
            }
        }
    }

    fn wake_one(&self) {
        self.signal(1);
    }

    fn wake_all(&self) {
        self.signal(i32::MAX);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
