//! Timer subsystem
//!
//! Backs `sleep()` and `timeout()`. A suspended task registers its `Waker`
//! with a deadline; the timer thread fires expired wakers, which pushes the
//! task back onto the ready queue.
//!
//! ```text
//!     Sleep::poll ──insert(deadline, waker)──► dyn TimerBackend
//!                                                   │
//!     TimerThread ◄──── poll_expired(now) ──────────┘
//!          │
//!          └──► waker.wake() ──► ReadyQueue.push(task)
//! ```

mod heap;
mod worker;

pub use heap::{HeapTimerBackend, HeapTimerStats};
pub use worker::{spawn_timer_thread, TimerThreadConfig, TimerThreadHandle, TimerStats};

use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;
use std::time::Instant;

static NEXT_TIMER_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Handle used to cancel a registered timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub(crate) u64);

impl TimerHandle {
    pub fn new() -> Self {
        TimerHandle(NEXT_TIMER_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of an insert
#[derive(Debug, Clone, Copy)]
pub struct Inserted {
    pub handle: TimerHandle,
    /// The new entry is now the earliest deadline; the timer thread should
    /// be nudged so it does not oversleep.
    pub earliest: bool,
}

/// Core timer trait
pub trait TimerBackend: Send + Sync {
    fn insert(&self, deadline: Instant, waker: Waker) -> Inserted;

    /// Cancel a timer by handle (best-effort, may already have fired)
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Remove expired entries and return their wakers
    fn poll_expired(&self, now: Instant) -> Vec<Waker>;

    /// Earliest pending deadline, if any
    fn next_deadline(&self) -> Option<Instant>;

    /// Drop every pending entry (shutdown)
    fn clear(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn name(&self) -> &'static str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_handle_uniqueness() {
        let h1 = TimerHandle::new();
        let h2 = TimerHandle::new();
        assert_ne!(h1, h2);
        assert!(h2 > h1);
    }
}
