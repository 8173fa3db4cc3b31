//! Compensated blocking
//!
//! A task that must make a call that blocks its OS thread wraps it in
//! `block_in_place`. The carrier is counted as blocked for the duration,
//! hands its local queue to the global queue, and, if the runnable count
//! would fall below `min_runnable`, the scheduler starts an extra carrier
//! (never more than `max_pool_size` live). Surplus carriers retire once
//! they find nothing to do.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::carrier;
use crate::ready_queue::ReadyQueue;
use crate::scheduler::Shared;

/// Run a blocking closure on the current carrier
///
/// Off a carrier this just calls `f`.
pub fn block_in_place<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let Some(ctx) = carrier::current_context() else {
        return f();
    };
    let _guard = BlockedGuard::enter(ctx.shared, ctx.slot);
    f()
}

struct BlockedGuard {
    shared: Arc<Shared>,
}

impl BlockedGuard {
    fn enter(shared: Arc<Shared>, slot: usize) -> Self {
        shared.blocked.fetch_add(1, Ordering::SeqCst);
        shared.queue.drain_local(slot);
        shared.maybe_compensate();
        shared.parking.wake_one();
        Self { shared }
    }
}

impl Drop for BlockedGuard {
    fn drop(&mut self) {
        self.shared.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}
