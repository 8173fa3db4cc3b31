//! Stall watchdog
//!
//! Every offloaded request holds a `PendingGuard` until its completion has
//! run on the owning loop (or been dropped). The watchdog thread checks
//! that, while anything is pending, some completion lands at least once per
//! `stall_timeout`. If every carrier is wedged on a lock, nothing lands and
//! the watchdog fires.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

/// What to do when a stall is detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAction {
    /// Abort the process so a supervisor restarts it
    Abort,
    /// Log and keep running
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub stall_timeout: Duration,
    pub check_interval: Duration,
    pub action: StallAction,
}

impl WatchdogConfig {
    pub fn new(stall_timeout: Duration, action: StallAction) -> Self {
        Self {
            stall_timeout,
            check_interval: (stall_timeout / 4)
                .clamp(Duration::from_millis(5), Duration::from_secs(1)),
            action,
        }
    }
}

/// Pending-completion tracker shared by the dispatcher and the watchdog
#[derive(Debug)]
pub struct Progress {
    origin: Instant,
    pending: AtomicUsize,
    completed: AtomicU64,
    /// Nanoseconds since `origin` of the last completion
    last_progress: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            pending: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            last_progress: AtomicU64::new(0),
        }
    }

    /// Count one completion as outstanding until the guard drops
    pub fn begin(self: &Arc<Self>) -> PendingGuard {
        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            // Stall time counts from the first pending request.
            self.touch();
        }
        PendingGuard {
            progress: Arc::clone(self),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    fn touch(&self) {
        let nanos = self.origin.elapsed().as_nanos() as u64;
        self.last_progress.store(nanos, Ordering::Release);
    }

    fn last_mark(&self) -> u64 {
        self.last_progress.load(Ordering::Acquire)
    }

    /// Time since the last completion, if anything is pending
    pub fn stalled_for(&self, now: Instant) -> Option<Duration> {
        if self.pending() == 0 {
            return None;
        }
        let last = self.origin + Duration::from_nanos(self.last_mark());
        Some(now.saturating_duration_since(last))
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

/// Outstanding completion; dropping it records progress
#[derive(Debug)]
pub struct PendingGuard {
    progress: Arc<Progress>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.progress.completed.fetch_add(1, Ordering::AcqRel);
        self.progress.touch();
        self.progress.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Background stall detector
pub struct Watchdog {
    shutdown: Arc<AtomicBool>,
    stalls: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn spawn(progress: Arc<Progress>, config: WatchdogConfig) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stalls = Arc::new(AtomicU64::new(0));

        let thread = {
            let shutdown = Arc::clone(&shutdown);
            let stalls = Arc::clone(&stalls);
            thread::Builder::new()
                .name("stickyd-watchdog".into())
                .spawn(move || watch(progress, config, shutdown, stalls))?
        };

        Ok(Self {
            shutdown,
            stalls,
            thread: Some(thread),
        })
    }

    /// Stalls detected so far
    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Acquire)
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(
    progress: Arc<Progress>,
    config: WatchdogConfig,
    shutdown: Arc<AtomicBool>,
    stalls: Arc<AtomicU64>,
) {
    debug!(
        stall_timeout_ms = config.stall_timeout.as_millis() as u64,
        action = ?config.action,
        "watchdog started"
    );
    // One report per stall episode, keyed by the last-progress mark.
    let mut reported: Option<u64> = None;

    while !shutdown.load(Ordering::Acquire) {
        thread::park_timeout(config.check_interval);
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let Some(stalled) = progress.stalled_for(Instant::now()) else {
            continue;
        };
        let mark = progress.last_mark();
        if stalled < config.stall_timeout || reported == Some(mark) {
            continue;
        }

        reported = Some(mark);
        stalls.fetch_add(1, Ordering::AcqRel);
        error!(
            pending = progress.pending(),
            stalled_ms = stalled.as_millis() as u64,
            "worker completions stalled"
        );
        if config.action == StallAction::Abort {
            error!("aborting for supervised restart");
            std::process::abort();
        }
    }
    debug!("watchdog stopped");
}
