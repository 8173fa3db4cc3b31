//! `sleep` and `timeout`
//!
//! On a carrier, a pending `Sleep` registers its waker with the
//! scheduler's timer and the carrier moves on to other tasks. Off a
//! carrier there is no timer to register with, so the first poll sleeps
//! the calling thread until the deadline.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::carrier;
use crate::timer::{TimerBackend, TimerHandle};

/// Future that completes at a deadline
pub struct Sleep {
    deadline: Instant,
    registration: Option<Registration>,
}

struct Registration {
    timers: Arc<dyn TimerBackend>,
    handle: TimerHandle,
    waker: Waker,
}

/// Sleep for `duration` without holding a carrier
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::until(Instant::now() + duration)
}

impl Sleep {
    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline,
            registration: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_elapsed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn deregister(&mut self) {
        if let Some(reg) = self.registration.take() {
            reg.timers.cancel(reg.handle);
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let now = Instant::now();
        if now >= this.deadline {
            this.deregister();
            return Poll::Ready(());
        }

        if let Some(reg) = &this.registration {
            if reg.waker.will_wake(cx.waker()) {
                return Poll::Pending;
            }
        }

        this.deregister();
        match carrier::current_context() {
            Some(ctx) => {
                let timers = ctx.shared.timers();
                let inserted = timers.insert(this.deadline, cx.waker().clone());
                if inserted.earliest {
                    ctx.shared.nudge_timer();
                }
                this.registration = Some(Registration {
                    timers,
                    handle: inserted.handle,
                    waker: cx.waker().clone(),
                });
                Poll::Pending
            }
            None => {
                thread::sleep(this.deadline - now);
                Poll::Ready(())
            }
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.deregister();
    }
}

impl std::fmt::Debug for Sleep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sleep")
            .field("deadline", &self.deadline)
            .field("registered", &self.registration.is_some())
            .finish()
    }
}

/// Returned by `Timeout` when the deadline passes first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline elapsed")]
pub struct Elapsed;

/// Future returned by [`timeout`]
pub struct Timeout<F> {
    fut: Pin<Box<F>>,
    delay: Sleep,
}

/// Race `fut` against a deadline
pub fn timeout<F: Future>(duration: Duration, fut: F) -> Timeout<F> {
    Timeout {
        fut: Box::pin(fut),
        delay: sleep(duration),
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(out) = this.fut.as_mut().poll(cx) {
            return Poll::Ready(Ok(out));
        }
        match Pin::new(&mut this.delay).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Elapsed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
