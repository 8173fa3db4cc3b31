//! Ready queue abstraction for task scheduling
//!
//! # Implementations
//! - `SimpleQueue` - Go-like per-carrier + global queue with stealing

mod simple;

pub use simple::SimpleQueue;

/// Trait for ready queue implementations
///
/// Carrier slots are indexed `0..max_carriers`. A slot may be vacant
/// (carrier retired or never started); its local queue is then empty.
pub trait ReadyQueue<T: Send>: Send + Sync {
    /// Make an item ready to run
    ///
    /// `hint` is the preferred carrier's local queue (None = global).
    fn push(&self, item: T, hint: Option<usize>);

    /// Get next item for this carrier
    ///
    /// Order: local queue → global queue → steal from others
    fn pop(&self, slot: usize) -> Option<T>;

    /// Move everything in a carrier's local queue to the global queue
    fn drain_local(&self, slot: usize);

    /// Remove and return every queued item
    fn clear(&self) -> Vec<T>;

    /// Approximate ready count (for diagnostics)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
