//! Run a future to completion on the calling thread

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.0.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

/// Poll `fut` on this thread, parking between polls
///
/// Used by the inline dispatch mode on event-loop threads. Timers
/// registered outside a carrier degrade to a thread sleep, so a future
/// that sleeps blocks the caller for that long.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = pin!(fut);
    let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);

    loop {
        if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
            return out;
        }
        thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn test_block_on_ready() {
        assert_eq!(block_on(async { 40 + 2 }), 42);
    }

    #[test]
    fn test_block_on_woken_from_other_thread() {
        struct Flag {
            set: Arc<std::sync::atomic::AtomicBool>,
            spawned: bool,
        }

        impl Future for Flag {
            type Output = ();
            fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if self.set.load(std::sync::atomic::Ordering::Acquire) {
                    return Poll::Ready(());
                }
                if !self.spawned {
                    self.spawned = true;
                    let set = Arc::clone(&self.set);
                    let waker = cx.waker().clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(5));
                        set.store(true, std::sync::atomic::Ordering::Release);
                        waker.wake();
                    });
                }
                Poll::Pending
            }
        }

        let start = Instant::now();
        block_on(Flag {
            set: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            spawned: false,
        });
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_sleep_off_carrier_blocks() {
        let start = Instant::now();
        block_on(crate::sleep(Duration::from_millis(10)));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
