//! Task cells and join handles
//!
//! A task is a boxed future plus an atomic state word:
//!
//! ```text
//!   spawn ──► SCHEDULED ──run──► RUNNING ──Pending──► IDLE ──wake──► SCHEDULED
//!                                   │   ▲
//!                              wake │   │ re-queued after poll
//!                                   ▼   │
//!                                 NOTIFIED
//!
//!   RUNNING ──Ready / panic──► DONE
//! ```
//!
//! Only the carrier that moved the state to RUNNING touches the future,
//! so the future's spinlock is never contended.
//!
//! A pending future often holds its own waker (a registered `Sleep` does),
//! which keeps the task alive through a cycle. The scheduler's task
//! registry breaks it at shutdown by cancelling every unfinished task.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use stickyd_core::{SpinLock, TaskId};
use tracing::error;

use crate::error::{SchedError, SchedResult};
use crate::scheduler::Shared;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const DONE: u8 = 4;

pub(crate) struct Task {
    id: TaskId,
    state: AtomicU8,
    future: SpinLock<Option<BoxFuture>>,
    shared: Weak<Shared>,
}

impl Task {
    /// New task in the SCHEDULED state; the caller pushes it
    pub(crate) fn new(id: TaskId, future: BoxFuture, shared: &Arc<Shared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicU8::new(SCHEDULED),
            future: SpinLock::new(Some(future)),
            shared: Arc::downgrade(shared),
        })
    }

    /// Poll once on the current carrier
    pub(crate) fn run(self: Arc<Self>) {
        if self
            .state
            .compare_exchange(SCHEDULED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let waker = Waker::from(Arc::clone(&self));
        let mut cx = Context::from_waker(&waker);

        let mut slot = self.future.lock();
        let outcome = match slot.as_mut() {
            Some(fut) => catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx))),
            None => Ok(Poll::Ready(())),
        };

        match outcome {
            Ok(Poll::Pending) => {
                drop(slot);
                if self
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken while running
                    self.state.store(SCHEDULED, Ordering::Release);
                    self.reschedule();
                }
            }
            Ok(Poll::Ready(())) | Err(_) => {
                if outcome.is_err() {
                    error!(task = %self.id, "task panicked");
                }
                let finished = slot.take();
                drop(slot);
                self.state.store(DONE, Ordering::Release);
                drop(finished);
                if let Some(shared) = self.shared.upgrade() {
                    shared.note_completed(self.id);
                }
            }
        }
    }

    /// Drop the future without running it (shutdown)
    pub(crate) fn cancel(&self) {
        self.state.store(DONE, Ordering::Release);
        let fut = self.future.lock().take();
        drop(fut);
    }

    fn reschedule(self: &Arc<Self>) {
        if let Some(shared) = self.shared.upgrade() {
            shared.push(Arc::clone(self));
        }
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            let next = match cur {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self
                .state
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if next == SCHEDULED {
                        self.reschedule();
                    }
                    return;
                }
                Err(actual) => cur = actual,
            }
        }
    }
}

// ============================================================================
// JoinHandle
// ============================================================================

enum JoinSlot<T> {
    Pending,
    Ready(T),
    Lost,
}

struct JoinState<T> {
    slot: Mutex<JoinSlot<T>>,
    cond: Condvar,
}

impl<T> JoinState<T> {
    fn lock(&self) -> MutexGuard<'_, JoinSlot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, value: JoinSlot<T>) {
        let mut slot = self.lock();
        if matches!(*slot, JoinSlot::Pending) {
            *slot = value;
        }
        drop(slot);
        self.cond.notify_all();
    }
}

/// Producer side, moved into the task's future
///
/// Dropping it without a value (panic, shutdown) marks the task lost.
pub(crate) struct Completer<T> {
    state: Option<Arc<JoinState<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn complete(mut self, value: T) {
        if let Some(state) = self.state.take() {
            state.set(JoinSlot::Ready(value));
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.set(JoinSlot::Lost);
        }
    }
}

/// Blocking handle to a task's output
pub struct JoinHandle<T> {
    id: TaskId,
    state: Arc<JoinState<T>>,
}

pub(crate) fn join_pair<T>(id: TaskId) -> (Completer<T>, JoinHandle<T>) {
    let state = Arc::new(JoinState {
        slot: Mutex::new(JoinSlot::Pending),
        cond: Condvar::new(),
    });
    (
        Completer {
            state: Some(Arc::clone(&state)),
        },
        JoinHandle { id, state },
    )
}

impl<T> JoinHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        !matches!(*self.state.lock(), JoinSlot::Pending)
    }

    /// Block the calling thread until the task finishes
    ///
    /// Must not be called from a task: it would hold the carrier.
    pub fn join(self) -> SchedResult<T> {
        let mut slot = self.state.lock();
        while matches!(*slot, JoinSlot::Pending) {
            slot = self.state.cond.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
        Self::take(&mut slot)
    }

    pub fn join_timeout(self, timeout: Duration) -> SchedResult<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.lock();
        while matches!(*slot, JoinSlot::Pending) {
            let now = Instant::now();
            if now >= deadline {
                return Err(SchedError::JoinTimeout);
            }
            let (guard, _) = self
                .state
                .cond
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
        Self::take(&mut slot)
    }

    fn take(slot: &mut JoinSlot<T>) -> SchedResult<T> {
        match std::mem::replace(slot, JoinSlot::Lost) {
            JoinSlot::Ready(v) => Ok(v),
            JoinSlot::Pending | JoinSlot::Lost => Err(SchedError::TaskLost),
        }
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_join_pair_ready() {
        let (tx, rx) = join_pair::<u32>(TaskId::next());
        assert!(!rx.is_finished());
        thread::spawn(move || tx.complete(7));
        assert_eq!(rx.join().unwrap(), 7);
    }

    #[test]
    fn test_dropped_completer_is_lost() {
        let (tx, rx) = join_pair::<u32>(TaskId::next());
        drop(tx);
        assert!(rx.is_finished());
        assert!(matches!(rx.join(), Err(SchedError::TaskLost)));
    }

    #[test]
    fn test_join_timeout() {
        let (_tx, rx) = join_pair::<u32>(TaskId::next());
        let start = Instant::now();
        assert!(matches!(
            rx.join_timeout(Duration::from_millis(20)),
            Err(SchedError::JoinTimeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
