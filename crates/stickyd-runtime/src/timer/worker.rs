//! Timer thread
//!
//! Single thread that polls the timer backend and fires expired wakers.
//! It sleeps until the next deadline, capped at `max_poll_interval`.
//! Registering a new earliest deadline unparks it through `nudge()`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::TimerBackend;

#[derive(Debug, Clone)]
pub struct TimerThreadConfig {
    /// Longest sleep when nothing is due
    pub max_poll_interval: Duration,

    /// Shortest sleep, to avoid spinning on a deadline that is microseconds out
    pub min_sleep: Duration,

    pub thread_name: String,
}

impl Default for TimerThreadConfig {
    fn default() -> Self {
        Self {
            max_poll_interval: Duration::from_millis(10),
            min_sleep: Duration::from_micros(50),
            thread_name: "stickyd-timer".into(),
        }
    }
}

/// Handle to a running timer thread
pub struct TimerThreadHandle {
    handle: Option<JoinHandle<TimerStats>>,
    thread: Thread,
    shutdown: Arc<AtomicBool>,
}

impl TimerThreadHandle {
    /// Thread handle, used to unpark the timer on an earlier deadline
    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Wake the timer thread so it re-reads the next deadline
    pub fn nudge(&self) {
        self.thread.unpark();
    }

    /// Request shutdown and wait for the timer thread to exit
    pub fn shutdown(mut self) -> TimerStats {
        self.stop()
    }

    fn stop(&mut self) -> TimerStats {
        self.shutdown.store(true, Ordering::Release);
        self.thread.unpark();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("timer thread panicked");
                TimerStats::default()
            }
            None => TimerStats::default(),
        }
    }
}

impl Drop for TimerThreadHandle {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Statistics from timer thread execution
#[derive(Debug, Clone, Default)]
pub struct TimerStats {
    pub poll_count: u64,
    pub timers_fired: u64,
    /// Maximum timers fired in a single poll
    pub max_batch_size: usize,
}

/// Spawn the timer thread
pub fn spawn_timer_thread(
    backend: Arc<dyn TimerBackend>,
    config: TimerThreadConfig,
) -> io::Result<TimerThreadHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);

    let handle = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || timer_loop(backend, shutdown_clone, config))?;
    let thread = handle.thread().clone();

    Ok(TimerThreadHandle {
        handle: Some(handle),
        thread,
        shutdown,
    })
}

fn timer_loop(
    backend: Arc<dyn TimerBackend>,
    shutdown: Arc<AtomicBool>,
    config: TimerThreadConfig,
) -> TimerStats {
    let mut stats = TimerStats::default();
    debug!(backend = backend.name(), "timer thread started");

    while !shutdown.load(Ordering::Acquire) {
        let expired = backend.poll_expired(Instant::now());
        let batch_size = expired.len();

        stats.poll_count += 1;
        stats.timers_fired += batch_size as u64;
        stats.max_batch_size = stats.max_batch_size.max(batch_size);

        for waker in expired {
            waker.wake();
        }

        let sleep = calculate_sleep(backend.next_deadline(), Instant::now(), &config);
        if sleep > Duration::ZERO {
            thread::park_timeout(sleep);
        }
    }

    debug!(
        polls = stats.poll_count,
        fired = stats.timers_fired,
        "timer thread stopped"
    );
    stats
}

/// How long to sleep before the next poll
#[inline]
fn calculate_sleep(next: Option<Instant>, now: Instant, config: &TimerThreadConfig) -> Duration {
    match next {
        Some(deadline) if deadline <= now => Duration::ZERO,
        Some(deadline) => (deadline - now)
            .max(config.min_sleep)
            .min(config.max_poll_interval),
        None => config.max_poll_interval,
    }
}
