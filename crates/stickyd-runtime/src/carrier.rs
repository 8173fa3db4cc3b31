//! Carrier threads
//!
//! A carrier is an OS thread that pops tasks from the ready queue and
//! polls them. Each one owns a slot index (its local queue) and publishes
//! a thread-local context so `sleep`, `block_in_place` and `spawn` can find
//! the scheduler that owns the current thread.

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::ready_queue::ReadyQueue;
use crate::scheduler::Shared;
use crate::task::Task;

#[derive(Clone)]
pub(crate) struct CarrierContext {
    pub(crate) shared: Arc<Shared>,
    pub(crate) slot: usize,
}

thread_local! {
    static CURRENT: RefCell<Option<CarrierContext>> = const { RefCell::new(None) };
}

pub(crate) fn current_context() -> Option<CarrierContext> {
    CURRENT.with(|c| c.borrow().clone())
}

/// Slot of the current carrier if it belongs to `shared`
pub(crate) fn current_slot_for(shared: &Arc<Shared>) -> Option<usize> {
    CURRENT.with(|c| {
        c.borrow()
            .as_ref()
            .filter(|ctx| Arc::ptr_eq(&ctx.shared, shared))
            .map(|ctx| ctx.slot)
    })
}

/// Is the calling thread a carrier of any scheduler?
pub fn on_carrier() -> bool {
    CURRENT.with(|c| c.borrow().is_some())
}

/// Slot index of the calling carrier
pub fn current_carrier() -> Option<usize> {
    CURRENT.with(|c| c.borrow().as_ref().map(|ctx| ctx.slot))
}

/// Carrier main loop
pub(crate) fn run(shared: Arc<Shared>, slot: usize) {
    CURRENT.with(|c| {
        *c.borrow_mut() = Some(CarrierContext {
            shared: Arc::clone(&shared),
            slot,
        })
    });
    shared.note_started();
    debug!(slot, "carrier started");

    let config = shared.config();
    let idle_spins = config.idle_spins;
    let park_timeout = config.park_timeout;
    let mut retired = false;

    loop {
        if !shared.is_running() {
            break;
        }

        if let Some(task) = next_task(&shared, slot, idle_spins) {
            task.run();
            continue;
        }

        let token = shared.parking.prepare();
        if let Some(task) = shared.queue.pop(slot) {
            shared.parking.cancel(token);
            task.run();
            continue;
        }
        if !shared.is_running() {
            shared.parking.cancel(token);
            break;
        }

        let woken = shared.parking.park(token, Some(park_timeout));
        if !woken && shared.try_retire() {
            trace!(slot, "surplus carrier idle");
            retired = true;
            break;
        }
    }

    // Leftovers go to the global queue for the remaining carriers.
    shared.queue.drain_local(slot);
    if !shared.queue.is_empty() {
        shared.parking.wake_one();
    }

    CURRENT.with(|c| c.borrow_mut().take());
    shared.release_slot(slot, retired);
    debug!(slot, retired, "carrier exited");
}

/// Pop, spinning briefly before giving up
#[inline]
fn next_task(shared: &Shared, slot: usize, idle_spins: u32) -> Option<Arc<Task>> {
    if let Some(task) = shared.queue.pop(slot) {
        return Some(task);
    }
    for _ in 0..idle_spins {
        std::hint::spin_loop();
        if let Some(task) = shared.queue.pop(slot) {
            return Some(task);
        }
    }
    None
}
