//! Simple Go-like ready queue
//!
//! Design:
//! - Per-carrier local queue (VecDeque, SpinLock), bounded
//! - Global queue (VecDeque, Mutex), unbounded
//! - Work stealing from random victims
//! - Local queues for every possible carrier slot are allocated up front,
//!   so compensating carriers never resize shared state

use super::ReadyQueue;
use stickyd_core::SpinLock;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Check global every N pops (Go uses 61)
const GLOBAL_CHECK_INTERVAL: usize = 61;

/// Victims tried per steal attempt
const STEAL_ATTEMPTS: usize = 4;

/// Per-carrier local queue
struct LocalQueue<T> {
    queue: SpinLock<VecDeque<T>>,
    len: AtomicUsize,
}

impl<T> LocalQueue<T> {
    fn new() -> Self {
        Self {
            queue: SpinLock::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Push to back. Hands the item back if full.
    fn push(&self, item: T, capacity: usize) -> Result<(), T> {
        let mut q = self.queue.lock();
        if q.len() >= capacity {
            return Err(item);
        }
        q.push_back(item);
        self.len.store(q.len(), Ordering::Release);
        Ok(())
    }

    fn pop(&self) -> Option<T> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = self.queue.lock();
        let item = q.pop_front();
        self.len.store(q.len(), Ordering::Release);
        item
    }

    /// Take half (rounded up) from the front
    fn steal_half(&self) -> Vec<T> {
        if self.len.load(Ordering::Acquire) == 0 {
            return Vec::new();
        }
        let mut q = self.queue.lock();
        let n = (q.len() + 1) / 2;
        let stolen: Vec<T> = q.drain(..n).collect();
        self.len.store(q.len(), Ordering::Release);
        stolen
    }

    fn take_all(&self) -> Vec<T> {
        let mut q = self.queue.lock();
        let all: Vec<T> = q.drain(..).collect();
        self.len.store(0, Ordering::Release);
        all
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

/// Global queue
struct GlobalQueue<T> {
    queue: Mutex<VecDeque<T>>,
    len: AtomicUsize,
}

impl<T> GlobalQueue<T> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: T) {
        let mut q = self.lock();
        q.push_back(item);
        self.len.store(q.len(), Ordering::Release);
    }

    fn push_all(&self, items: Vec<T>) {
        if items.is_empty() {
            return;
        }
        let mut q = self.lock();
        q.extend(items);
        self.len.store(q.len(), Ordering::Release);
    }

    /// Pop one plus up to `extra` more for the caller's local queue
    fn pop_batch(&self, extra: usize) -> Option<(T, Vec<T>)> {
        if self.len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut q = self.lock();
        let first = q.pop_front()?;
        let n = q.len().min(extra);
        let batch: Vec<T> = q.drain(..n).collect();
        self.len.store(q.len(), Ordering::Release);
        Some((first, batch))
    }

    fn take_all(&self) -> Vec<T> {
        let mut q = self.lock();
        let all: Vec<T> = q.drain(..).collect();
        self.len.store(0, Ordering::Release);
        all
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

pub struct SimpleQueue<T> {
    local: Vec<LocalQueue<T>>,
    global: GlobalQueue<T>,
    local_capacity: usize,
    /// Per-carrier counter for periodic global check
    counters: Vec<AtomicUsize>,
    /// Per-carrier RNG for stealing
    rng: Vec<AtomicUsize>,
    /// One past the highest slot ever pushed to or popped from
    high_water: AtomicUsize,
}

impl<T: Send> SimpleQueue<T> {
    pub fn new(max_carriers: usize, local_capacity: usize) -> Self {
        let n = max_carriers.max(1);
        Self {
            local: (0..n).map(|_| LocalQueue::new()).collect(),
            global: GlobalQueue::new(),
            local_capacity: local_capacity.max(1),
            counters: (0..n).map(|_| AtomicUsize::new(1)).collect(),
            rng: (0..n)
                .map(|i| AtomicUsize::new(i.wrapping_mul(2654435761) + 1))
                .collect(),
            high_water: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn touch(&self, slot: usize) {
        self.high_water.fetch_max(slot + 1, Ordering::AcqRel);
    }

    /// Simple LCG random for victim selection
    fn random_victim(&self, slot: usize, span: usize) -> usize {
        let rng = &self.rng[slot];
        let old = rng.load(Ordering::Relaxed);
        let new = old.wrapping_mul(1103515245).wrapping_add(12345);
        rng.store(new, Ordering::Relaxed);
        (new >> 16) % span
    }

    fn try_steal(&self, slot: usize) -> Option<T> {
        let span = self.high_water.load(Ordering::Acquire);
        if span <= 1 {
            return None;
        }

        for _ in 0..span.min(STEAL_ATTEMPTS) {
            let victim = self.random_victim(slot, span);
            if victim == slot {
                continue;
            }

            let mut stolen = self.local[victim].steal_half().into_iter();
            if let Some(first) = stolen.next() {
                for item in stolen {
                    if let Err(item) = self.local[slot].push(item, self.local_capacity) {
                        self.global.push(item);
                    }
                }
                return Some(first);
            }
        }
        None
    }
}

impl<T: Send> ReadyQueue<T> for SimpleQueue<T> {
    fn push(&self, item: T, hint: Option<usize>) {
        if let Some(slot) = hint.filter(|&s| s < self.local.len()) {
            self.touch(slot);
            match self.local[slot].push(item, self.local_capacity) {
                Ok(()) => return,
                Err(item) => return self.global.push(item),
            }
        }
        self.global.push(item);
    }

    fn pop(&self, slot: usize) -> Option<T> {
        if slot >= self.local.len() {
            return None;
        }
        self.touch(slot);

        let cnt = self.counters[slot].fetch_add(1, Ordering::Relaxed);
        if cnt % GLOBAL_CHECK_INTERVAL == 0 {
            // Check global first (prevents starvation)
            if let Some((item, batch)) = self.global.pop_batch(0) {
                debug_assert!(batch.is_empty());
                return Some(item);
            }
        }

        // 1. Try local
        if let Some(item) = self.local[slot].pop() {
            return Some(item);
        }

        // 2. Try global + batch
        if let Some((item, batch)) = self.global.pop_batch(self.local_capacity / 2) {
            for extra in batch {
                if let Err(extra) = self.local[slot].push(extra, self.local_capacity) {
                    self.global.push(extra);
                }
            }
            return Some(item);
        }

        // 3. Try steal
        self.try_steal(slot)
    }

    fn drain_local(&self, slot: usize) {
        if let Some(lq) = self.local.get(slot) {
            self.global.push_all(lq.take_all());
        }
    }

    fn clear(&self) -> Vec<T> {
        let mut all = self.global.take_all();
        for lq in &self.local {
            all.extend(lq.take_all());
        }
        all
    }

    fn len(&self) -> usize {
        self.global.len() + self.local.iter().map(LocalQueue::len).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_queue() {
        let lq = LocalQueue::new();
        assert_eq!(lq.len(), 0);

        assert!(lq.push(1, 2).is_ok());
        assert!(lq.push(2, 2).is_ok());
        assert_eq!(lq.push(3, 2), Err(3));
        assert_eq!(lq.len(), 2);

        assert_eq!(lq.pop(), Some(1));
        assert_eq!(lq.pop(), Some(2));
        assert_eq!(lq.pop(), None);
    }

    #[test]
    fn test_global_fifo() {
        let sq = SimpleQueue::new(2, 16);
        sq.push(1u32, None);
        sq.push(2, None);

        assert_eq!(sq.pop(0), Some(1));
        assert_eq!(sq.pop(0), Some(2));
        assert_eq!(sq.pop(0), None);
    }

    #[test]
    fn test_local_hint() {
        let sq = SimpleQueue::new(2, 16);
        sq.push(10u32, Some(0));
        sq.push(20, Some(1));

        assert_eq!(sq.pop(0), Some(10));
        assert_eq!(sq.pop(1), Some(20));
    }

    #[test]
    fn test_full_local_overflows_to_global() {
        let sq = SimpleQueue::new(2, 1);
        sq.push(1u32, Some(0));
        sq.push(2, Some(0));
        assert_eq!(sq.len(), 2);

        // Carrier 1 finds the overflow in the global queue.
        assert_eq!(sq.pop(1), Some(2));
    }

    #[test]
    fn test_work_stealing() {
        let sq = SimpleQueue::new(2, 64);
        for i in 0..10u32 {
            sq.push(i, Some(0));
        }

        let mut got = Vec::new();
        while let Some(i) = sq.pop(1) {
            got.push(i);
        }
        while let Some(i) = sq.pop(0) {
            got.push(i);
        }
        got.sort_unstable();
        assert_eq!(got, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_drain_local_and_clear() {
        let sq = SimpleQueue::new(4, 8);
        sq.push(1u32, Some(3));
        sq.push(2, Some(3));
        sq.drain_local(3);
        assert_eq!(sq.len(), 2);
        assert_eq!(sq.pop(0), Some(1));

        sq.push(5, Some(1));
        let mut rest = sq.clear();
        rest.sort_unstable();
        assert_eq!(rest, vec![2, 5]);
        assert!(sq.is_empty());
    }
}
