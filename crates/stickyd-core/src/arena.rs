//! Pooled buffer allocator.
//!
//! A `BufferProvider` hands out response buffers and takes them back once
//! the bytes have been flushed (or the connection was torn down).
//!
//! # Implementors
//!
//! - `PooledArena` (default): power-of-four size classes from 256 B to
//!   64 KiB, each backed by a bounded lock-free free list. A miss allocates,
//!   a release onto a full free list frees. Requests above the largest
//!   class are served from the heap and never pooled.
//!
//! - `HeapBuffers`: one fresh allocation per acquire, freed on release.
//!   Selected when pooling is switched off.
//!
//! Neither implementation takes a lock or blocks, so acquire and release
//! can be called from any thread without joining another lock domain.
//!
//! Callers normally go through `BufferPool`, whose `PooledBuf` guard
//! releases exactly once on drop.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

/// Size classes served from free lists
pub const SIZE_CLASSES: [usize; 5] = [256, 1024, 4096, 16 * 1024, 64 * 1024];

/// Default free-list depth per size class
pub const DEFAULT_CLASS_DEPTH: usize = 1024;

/// Largest single acquire accepted by `PooledArena`
pub const DEFAULT_MAX_ALLOC: usize = 16 * 1024 * 1024;

/// Raw buffer owned by whoever acquired it
///
/// `class` remembers which free list the storage came from; `None` marks an
/// oversize or unpooled allocation.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    class: Option<u8>,
}

impl Buffer {
    fn new(capacity: usize, class: Option<u8>) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            class,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Size class index this buffer belongs to, if pooled
    #[inline]
    pub fn class(&self) -> Option<usize> {
        self.class.map(usize::from)
    }
}

/// Allocator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub acquired: u64,
    pub released: u64,
    /// Acquires satisfied from a free list
    pub pool_hits: u64,
    /// Acquires that had to allocate
    pub pool_misses: u64,
    /// Acquires above the largest size class
    pub oversize: u64,
}

impl BufferStats {
    /// Buffers acquired but not yet released
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Manages buffer lifecycle.
///
/// **Contract:**
/// - `acquire()` returns an empty buffer with capacity of at least `min_size`.
/// - `release()` is called exactly once per acquired buffer.
/// - Neither call may block.
pub trait BufferProvider: Send + Sync {
    /// Acquire a buffer of at least `min_size` bytes.
    ///
    /// Returns `None` if the request cannot be served.
    fn acquire(&self, min_size: usize) -> Option<Buffer>;

    /// Release a previously acquired buffer.
    fn release(&self, buf: Buffer);

    /// Buffers currently parked on free lists.
    fn pool_size(&self) -> usize;

    /// Buffers currently handed out.
    fn in_use(&self) -> usize {
        self.stats().outstanding() as usize
    }

    fn stats(&self) -> BufferStats;

    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct Counters {
    acquired: AtomicU64,
    released: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    oversize: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BufferStats {
        // Read released first so outstanding never underflows transiently.
        let released = self.released.load(Ordering::Acquire);
        BufferStats {
            acquired: self.acquired.load(Ordering::Acquire),
            released,
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
            oversize: self.oversize.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// PooledArena
// ============================================================================

pub struct PooledArena {
    classes: Vec<ArrayQueue<Buffer>>,
    max_alloc: usize,
    counters: Counters,
}

impl PooledArena {
    pub fn new(class_depth: usize) -> Self {
        Self::with_limits(class_depth, DEFAULT_MAX_ALLOC)
    }

    pub fn with_limits(class_depth: usize, max_alloc: usize) -> Self {
        let depth = class_depth.max(1);
        Self {
            classes: SIZE_CLASSES.iter().map(|_| ArrayQueue::new(depth)).collect(),
            max_alloc,
            counters: Counters::default(),
        }
    }

    #[inline]
    fn class_for(size: usize) -> Option<usize> {
        SIZE_CLASSES.iter().position(|&c| size <= c)
    }
}

impl Default for PooledArena {
    fn default() -> Self {
        Self::new(DEFAULT_CLASS_DEPTH)
    }
}

impl BufferProvider for PooledArena {
    fn acquire(&self, min_size: usize) -> Option<Buffer> {
        if min_size > self.max_alloc {
            return None;
        }

        let buf = match Self::class_for(min_size) {
            Some(idx) => match self.classes[idx].pop() {
                Some(buf) => {
                    self.counters.pool_hits.fetch_add(1, Ordering::Relaxed);
                    buf
                }
                None => {
                    self.counters.pool_misses.fetch_add(1, Ordering::Relaxed);
                    Buffer::new(SIZE_CLASSES[idx], Some(idx as u8))
                }
            },
            None => {
                self.counters.oversize.fetch_add(1, Ordering::Relaxed);
                Buffer::new(min_size, None)
            }
        };

        self.counters.acquired.fetch_add(1, Ordering::AcqRel);
        Some(buf)
    }

    fn release(&self, mut buf: Buffer) {
        self.counters.released.fetch_add(1, Ordering::AcqRel);

        if let Some(idx) = buf.class() {
            // A buffer that grew past its class is not worth keeping.
            if idx < self.classes.len() && buf.capacity() <= SIZE_CLASSES[idx] * 2 {
                buf.data.clear();
                // Full free list: drop it.
                let _ = self.classes[idx].push(buf);
            }
        }
    }

    fn pool_size(&self) -> usize {
        self.classes.iter().map(ArrayQueue::len).sum()
    }

    fn stats(&self) -> BufferStats {
        self.counters.snapshot()
    }

    fn name(&self) -> &'static str {
        "pooled"
    }
}

// ============================================================================
// HeapBuffers
// ============================================================================

#[derive(Default)]
pub struct HeapBuffers {
    counters: Counters,
}

impl HeapBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferProvider for HeapBuffers {
    fn acquire(&self, min_size: usize) -> Option<Buffer> {
        self.counters.pool_misses.fetch_add(1, Ordering::Relaxed);
        self.counters.acquired.fetch_add(1, Ordering::AcqRel);
        Some(Buffer::new(min_size, None))
    }

    fn release(&self, buf: Buffer) {
        drop(buf);
        self.counters.released.fetch_add(1, Ordering::AcqRel);
    }

    fn pool_size(&self) -> usize {
        0
    }

    fn stats(&self) -> BufferStats {
        self.counters.snapshot()
    }

    fn name(&self) -> &'static str {
        "heap"
    }
}

// ============================================================================
// BufferPool / PooledBuf
// ============================================================================

/// Shared handle to a provider
#[derive(Clone)]
pub struct BufferPool {
    provider: Arc<dyn BufferProvider>,
}

impl BufferPool {
    pub fn new(provider: Arc<dyn BufferProvider>) -> Self {
        Self { provider }
    }

    /// Pooled (`true`) or unpooled heap buffers
    pub fn from_flag(pooled: bool) -> Self {
        if pooled {
            Self::new(Arc::new(PooledArena::default()))
        } else {
            Self::new(Arc::new(HeapBuffers::new()))
        }
    }

    pub fn acquire(&self, min_size: usize) -> Option<PooledBuf> {
        self.provider.acquire(min_size).map(|buf| PooledBuf {
            buf: Some(buf),
            provider: Arc::clone(&self.provider),
        })
    }

    pub fn stats(&self) -> BufferStats {
        self.provider.stats()
    }

    pub fn pool_size(&self) -> usize {
        self.provider.pool_size()
    }

    pub fn in_use(&self) -> usize {
        self.provider.in_use()
    }

    pub fn name(&self) -> &'static str {
        self.provider.name()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("provider", &self.provider.name())
            .field("stats", &self.provider.stats())
            .finish()
    }
}

/// Acquired buffer, released to its provider on drop
pub struct PooledBuf {
    buf: Option<Buffer>,
    provider: Arc<dyn BufferProvider>,
}

impl PooledBuf {
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref().map_or(&[], Buffer::as_slice)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, Buffer::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, Buffer::capacity)
    }

    #[inline]
    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        if let Some(buf) = self.buf.as_mut() {
            buf.extend_from_slice(bytes);
        }
    }
}

impl io::Write for PooledBuf {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.provider.release(buf);
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
