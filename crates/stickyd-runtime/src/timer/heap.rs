//! BinaryHeap-based timer backend
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1) amortized (lazy cancellation)
//! - Poll expired: O(k log n) where k = number of expired timers
//!
//! Live handles are tracked in a set. Cancelling removes the handle from
//! the set; the stale heap entry is skipped when it surfaces at the top.
//!
//! Wakers are never dropped while the lock is held: dropping the last
//! reference to a task drops its future, which may cancel another timer.

use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::Waker;
use std::time::Instant;

use super::{Inserted, TimerBackend, TimerHandle};

struct HeapEntry {
    deadline: Instant,
    handle: TimerHandle,
    waker: Waker,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed for a min-heap; handle breaks ties so FIFO holds
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.handle.cmp(&self.handle))
    }
}

#[derive(Default)]
struct HeapInner {
    heap: BinaryHeap<HeapEntry>,
    live: HashSet<TimerHandle>,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

impl HeapInner {
    /// Pop cancelled entries sitting at the top
    fn take_stale(&mut self) -> Vec<HeapEntry> {
        let mut stale = Vec::new();
        while let Some(top) = self.heap.peek() {
            if self.live.contains(&top.handle) {
                break;
            }
            stale.extend(self.heap.pop());
        }
        stale
    }
}

pub struct HeapTimerBackend {
    inner: Mutex<HeapInner>,
}

impl HeapTimerBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HeapInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> HeapTimerStats {
        let inner = self.lock();
        HeapTimerStats {
            active: inner.live.len(),
            pending_cancellations: inner.heap.len().saturating_sub(inner.live.len()),
            total_inserted: inner.total_inserted,
            total_fired: inner.total_fired,
            total_cancelled: inner.total_cancelled,
        }
    }
}

impl Default for HeapTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&self, deadline: Instant, waker: Waker) -> Inserted {
        let handle = TimerHandle::new();
        let mut inner = self.lock();
        let earliest = inner.heap.peek().map_or(true, |top| deadline < top.deadline);
        inner.heap.push(HeapEntry {
            deadline,
            handle,
            waker,
        });
        inner.live.insert(handle);
        inner.total_inserted += 1;
        Inserted { handle, earliest }
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.lock();
        if !inner.live.remove(&handle) {
            return false;
        }
        inner.total_cancelled += 1;
        let stale = inner.take_stale();
        drop(inner);
        drop(stale);
        true
    }

    fn poll_expired(&self, now: Instant) -> Vec<Waker> {
        let mut inner = self.lock();
        let mut expired = Vec::new();
        let mut stale = Vec::new();

        while let Some(top) = inner.heap.peek() {
            if top.deadline > now {
                break;
            }
            let Some(entry) = inner.heap.pop() else { break };
            if !inner.live.remove(&entry.handle) {
                stale.push(entry);
                continue;
            }
            inner.total_fired += 1;
            expired.push(entry.waker);
        }
        drop(inner);
        drop(stale);
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.lock();
        let stale = inner.take_stale();
        let next = inner.heap.peek().map(|e| e.deadline);
        drop(inner);
        drop(stale);
        next
    }

    fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.live.len();
        let heap = std::mem::take(&mut inner.heap);
        inner.live.clear();
        drop(inner);
        drop(heap);
        n
    }

    fn len(&self) -> usize {
        self.lock().live.len()
    }

    fn name(&self) -> &'static str {
        "binary_heap"
    }
}

/// Statistics for HeapTimerBackend
#[derive(Debug, Clone, Default)]
pub struct HeapTimerStats {
    pub active: usize,
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::Wake;
    use std::time::Duration;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<CountingWaker>, Waker) {
        let c = Arc::new(CountingWaker(AtomicUsize::new(0)));
        (Arc::clone(&c), Waker::from(c))
    }

    #[test]
    fn test_insert_and_poll_in_deadline_order() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        let (late, late_w) = counting();
        let (early, early_w) = counting();

        assert!(backend.insert(now + Duration::from_millis(20), late_w).earliest);
        assert!(backend.insert(now + Duration::from_millis(10), early_w).earliest);
        assert_eq!(backend.next_deadline(), Some(now + Duration::from_millis(10)));

        let fired = backend.poll_expired(now + Duration::from_millis(15));
        assert_eq!(fired.len(), 1);
        fired.into_iter().for_each(Waker::wake);
        assert_eq!(early.0.load(Ordering::SeqCst), 1);
        assert_eq!(late.0.load(Ordering::SeqCst), 0);

        assert_eq!(backend.poll_expired(now + Duration::from_millis(25)).len(), 1);
        assert!(backend.is_empty());
        assert_eq!(backend.stats().total_fired, 2);
    }

    #[test]
    fn test_cancel() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        let (_, w1) = counting();
        let (_, w2) = counting();

        let a = backend.insert(now, w1).handle;
        let b = backend.insert(now + Duration::from_millis(5), w2).handle;

        assert!(backend.cancel(a));
        assert!(!backend.cancel(a));
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.next_deadline(), Some(now + Duration::from_millis(5)));

        assert_eq!(backend.poll_expired(now + Duration::from_secs(1)).len(), 1);
        // Already fired
        assert!(!backend.cancel(b));
        assert_eq!(backend.stats().total_cancelled, 1);
    }

    #[test]
    fn test_clear() {
        let backend = HeapTimerBackend::new();
        let (_, w) = counting();
        backend.insert(Instant::now() + Duration::from_secs(60), w);
        assert_eq!(backend.clear(), 1);
        assert!(backend.next_deadline().is_none());
    }
}
