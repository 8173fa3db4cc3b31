//! Scheduler
//!
//! Owns the ready queue, carrier threads, parking and the timer thread.
//! There is no process-wide instance: callers construct a `Scheduler` from
//! an explicit `SchedulerConfig` and pass `SchedulerHandle`s to whoever
//! needs to spawn.
//!
//! Lock domains: the ready queue (spinlocks + one mutex), the timer heap,
//! the task registry and the join-handle slots are independent; no code
//! path holds two of them at once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use stickyd_core::TaskId;
use tracing::{debug, info, warn};

use crate::carrier;
use crate::config::SchedulerConfig;
use crate::error::{SchedError, SchedResult};
use crate::parking::{new_parking, WorkerParking};
use crate::ready_queue::{ReadyQueue, SimpleQueue};
use crate::task::{self, Task};
use crate::timer::{
    spawn_timer_thread, HeapTimerBackend, TimerBackend, TimerThreadConfig, TimerThreadHandle,
};

/// Scheduler state shared with carriers, tasks and handles
pub(crate) struct Shared {
    config: SchedulerConfig,
    pub(crate) queue: SimpleQueue<Arc<Task>>,
    pub(crate) parking: Box<dyn WorkerParking>,
    timers: Arc<dyn TimerBackend>,
    timer_thread: OnceLock<Thread>,
    running: AtomicBool,
    /// Carrier slot occupancy, `max_pool_size` entries
    slots: Vec<AtomicBool>,
    /// Carriers alive (slot held, not yet retired)
    live: AtomicUsize,
    /// Live carriers currently inside `block_in_place`
    pub(crate) blocked: AtomicUsize,
    /// Carriers that reached their main loop, lifetime
    started: AtomicUsize,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Every task not yet finished
    tasks: Mutex<HashMap<TaskId, Arc<Task>>>,
    spawned: AtomicU64,
    completed: AtomicU64,
    compensations: AtomicU64,
    retired: AtomicU64,
}

impl Shared {
    fn new(config: SchedulerConfig) -> Self {
        let limit = config.pool_limit();
        Self {
            queue: SimpleQueue::new(limit, config.local_queue_capacity),
            parking: new_parking(),
            timers: Arc::new(HeapTimerBackend::new()),
            timer_thread: OnceLock::new(),
            running: AtomicBool::new(false),
            slots: (0..limit).map(|_| AtomicBool::new(false)).collect(),
            live: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            threads: Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
            spawned: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            compensations: AtomicU64::new(0),
            retired: AtomicU64::new(0),
            config,
        }
    }

    #[inline]
    pub(crate) fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn timers(&self) -> Arc<dyn TimerBackend> {
        Arc::clone(&self.timers)
    }

    pub(crate) fn nudge_timer(&self) {
        if let Some(t) = self.timer_thread.get() {
            t.unpark();
        }
    }

    fn threads(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, Arc<Task>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a runnable task and wake a carrier
    pub(crate) fn push(self: &Arc<Self>, task: Arc<Task>) {
        if !self.is_running() {
            return;
        }
        let hint = carrier::current_slot_for(self);
        self.queue.push(task, hint);
        self.parking.wake_one();
    }

    fn spawn_boxed(self: &Arc<Self>, id: TaskId, future: task::BoxFuture) -> SchedResult<TaskId> {
        if !self.is_running() {
            return Err(SchedError::NotRunning);
        }
        let task = Task::new(id, future, self);
        self.tasks().insert(id, Arc::clone(&task));
        self.spawned.fetch_add(1, Ordering::Relaxed);
        self.push(task);
        Ok(id)
    }

    pub(crate) fn spawn<F>(self: &Arc<Self>, future: F) -> SchedResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn_boxed(TaskId::next(), Box::pin(future))
    }

    pub(crate) fn spawn_with_handle<F, T>(
        self: &Arc<Self>,
        future: F,
    ) -> SchedResult<task::JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let id = TaskId::next();
        let (completer, handle) = task::join_pair(id);
        self.spawn_boxed(
            id,
            Box::pin(async move {
                completer.complete(future.await);
            }),
        )?;
        Ok(handle)
    }

    pub(crate) fn note_started(&self) {
        self.started.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_completed(&self, id: TaskId) {
        let task = self.tasks().remove(&id);
        drop(task);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Start a carrier thread in a free slot
    ///
    /// Returns `Ok(None)` when the pool is at its ceiling.
    fn spawn_carrier(self: &Arc<Self>) -> SchedResult<Option<usize>> {
        let limit = self.slots.len();
        if self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |l| (l < limit).then_some(l + 1))
            .is_err()
        {
            return Ok(None);
        }

        let Some(slot) = self.claim_slot() else {
            // A retiring carrier still holds its slot.
            self.live.fetch_sub(1, Ordering::SeqCst);
            return Ok(None);
        };

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("stickyd-carrier-{}", slot))
            .spawn(move || carrier::run(shared, slot));

        match spawned {
            Ok(handle) => {
                let mut threads = self.threads();
                threads.retain(|h| !h.is_finished());
                threads.push(handle);
                Ok(Some(slot))
            }
            Err(source) => {
                self.slots[slot].store(false, Ordering::Release);
                self.live.fetch_sub(1, Ordering::SeqCst);
                Err(SchedError::ThreadSpawn {
                    what: "carrier",
                    source,
                })
            }
        }
    }

    fn claim_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        })
    }

    /// Called by a carrier on exit
    pub(crate) fn release_slot(&self, slot: usize, retired: bool) {
        self.slots[slot].store(false, Ordering::Release);
        if !retired {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Start an extra carrier if blocking starved the runnable count
    pub(crate) fn maybe_compensate(self: &Arc<Self>) {
        if !self.is_running() {
            return;
        }
        let live = self.live.load(Ordering::SeqCst);
        let blocked = self.blocked.load(Ordering::SeqCst);
        if live.saturating_sub(blocked) >= self.config.runnable_floor() {
            return;
        }

        match self.spawn_carrier() {
            Ok(Some(slot)) => {
                self.compensations.fetch_add(1, Ordering::Relaxed);
                debug!(slot, live, blocked, "compensating carrier started");
            }
            Ok(None) => debug!(live, blocked, "carrier pool at limit, not compensating"),
            Err(e) => warn!(error = %e, "compensating carrier failed"),
        }
    }

    /// Retire the calling carrier if runnable carriers exceed `parallelism`
    ///
    /// Decrements `live` on success.
    pub(crate) fn try_retire(&self) -> bool {
        let floor = self.config.parallelism;
        let retired = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                let blocked = self.blocked.load(Ordering::SeqCst);
                (live.saturating_sub(blocked) > floor).then(|| live - 1)
            })
            .is_ok();
        if retired {
            self.retired.fetch_add(1, Ordering::Relaxed);
        }
        retired
    }

    fn stats(&self) -> SchedStats {
        SchedStats {
            spawned: self.spawned.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            live_carriers: self.live.load(Ordering::SeqCst),
            blocked_carriers: self.blocked.load(Ordering::SeqCst),
            parked_carriers: self.parking.parked_count(),
            compensations: self.compensations.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            queued: self.queue.len(),
            timers: self.timers.len(),
        }
    }
}

/// Scheduler counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedStats {
    pub spawned: u64,
    pub completed: u64,
    pub live_carriers: usize,
    pub blocked_carriers: usize,
    pub parked_carriers: usize,
    pub compensations: u64,
    pub retired: u64,
    pub queued: usize,
    pub timers: usize,
}

/// Worker scheduler
pub struct Scheduler {
    shared: Arc<Shared>,
    timer: Mutex<Option<TimerThreadHandle>>,
    started: AtomicBool,
}

impl Scheduler {
    /// Validate `config` and build a stopped scheduler
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config)),
            timer: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        self.shared.config()
    }

    /// Start the timer thread and `parallelism` carriers
    ///
    /// Returns once every carrier has entered its main loop, or fails with
    /// `CarriersUnavailable` if they do not within `start_timeout`.
    pub fn start(&self) -> SchedResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedError::AlreadyStarted);
        }
        let config = self.shared.config().clone();
        config.log_summary();
        self.shared.running.store(true, Ordering::Release);

        let timer_config = TimerThreadConfig {
            max_poll_interval: config.timer_interval,
            ..TimerThreadConfig::default()
        };
        let timer = match spawn_timer_thread(self.shared.timers(), timer_config) {
            Ok(t) => t,
            Err(source) => {
                self.shutdown();
                return Err(SchedError::ThreadSpawn {
                    what: "timer",
                    source,
                });
            }
        };
        let _ = self.shared.timer_thread.set(timer.thread().clone());
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);

        for _ in 0..config.parallelism {
            match self.shared.spawn_carrier() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "carrier spawn failed");
                    break;
                }
            }
        }

        match await_carriers(&self.shared.started, config.parallelism, config.start_timeout) {
            Ok(started) => {
                info!(carriers = started, "scheduler started");
                Ok(())
            }
            Err(e) => {
                self.shutdown();
                Err(e)
            }
        }
    }

    /// Prove the carriers run concurrently
    ///
    /// Spawns one probe per configured carrier. Each probe checks in and
    /// then holds its carrier until all probes have checked in or `timeout`
    /// passes. Fewer concurrent probes than `parallelism` is an error.
    pub fn verify_parallelism(&self, timeout: Duration) -> SchedResult<()> {
        let expected = self.shared.config().parallelism;
        let arrived = Arc::new(AtomicUsize::new(0));
        let deadline = Instant::now() + timeout;

        let probes = (0..expected)
            .map(|_| {
                let arrived = Arc::clone(&arrived);
                self.spawn_with_handle(async move {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    while arrived.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
                        std::hint::spin_loop();
                        thread::yield_now();
                    }
                    arrived.load(Ordering::SeqCst)
                })
            })
            .collect::<SchedResult<Vec<_>>>()?;

        let mut observed = expected;
        for probe in probes {
            let seen = match probe.join_timeout(timeout + Duration::from_secs(1)) {
                Ok(seen) => seen,
                Err(SchedError::JoinTimeout) => arrived.load(Ordering::SeqCst),
                Err(e) => return Err(e),
            };
            observed = observed.min(seen);
        }

        if observed < expected {
            return Err(SchedError::ParallelismUnverified { expected, observed });
        }
        info!(carriers = expected, "parallelism verified");
        Ok(())
    }

    pub fn spawn<F>(&self, future: F) -> SchedResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.spawn(future)
    }

    pub fn spawn_with_handle<F, T>(&self, future: F) -> SchedResult<task::JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.spawn_with_handle(future)
    }

    /// Cloneable spawn handle
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn stats(&self) -> SchedStats {
        self.shared.stats()
    }

    /// Stop carriers and the timer, dropping any unfinished tasks
    ///
    /// Idempotent. If called from a carrier, that carrier is not joined.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.parking.wake_all();

        let me = thread::current().id();
        loop {
            let batch: Vec<_> = std::mem::take(&mut *self.shared.threads());
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                if handle.thread().id() == me {
                    continue;
                }
                if handle.join().is_err() {
                    warn!("carrier thread panicked");
                }
            }
        }

        let timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(timer) = timer {
            let stats = timer.shutdown();
            debug!(fired = stats.timers_fired, "timer thread joined");
        }

        drop(self.shared.queue.clear());
        let timers = self.shared.timers.clear();
        let unfinished: Vec<_> = self.shared.tasks().drain().map(|(_, t)| t).collect();
        for task in &unfinished {
            task.cancel();
        }
        let unfinished = unfinished.len();

        let stats = self.shared.stats();
        info!(
            spawned = stats.spawned,
            completed = stats.completed,
            compensations = stats.compensations,
            unfinished,
            timers,
            "scheduler stopped"
        );
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable, `Send` handle for spawning onto a scheduler
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub fn spawn<F>(&self, future: F) -> SchedResult<TaskId>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.spawn(future)
    }

    pub fn spawn_with_handle<F, T>(&self, future: F) -> SchedResult<task::JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.spawn_with_handle(future)
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn stats(&self) -> SchedStats {
        self.shared.stats()
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Wait for `expected` carriers to report in through `started`
fn await_carriers(started: &AtomicUsize, expected: usize, limit: Duration) -> SchedResult<usize> {
    let deadline = Instant::now() + limit;
    loop {
        let seen = started.load(Ordering::Acquire);
        if seen >= expected {
            return Ok(seen);
        }
        if Instant::now() >= deadline {
            return Err(SchedError::CarriersUnavailable {
                expected,
                started: seen,
            });
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block_in_place, sleep};
    use std::sync::atomic::AtomicUsize;

    fn started(config: SchedulerConfig) -> Scheduler {
        let sched = Scheduler::new(config).unwrap();
        sched.start().unwrap();
        sched
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let err = Scheduler::new(SchedulerConfig::new().parallelism(0)).err().unwrap();
        assert!(matches!(err, SchedError::Config(_)));
    }

    #[test]
    fn test_spawn_before_start_fails() {
        let sched = Scheduler::new(SchedulerConfig::new()).unwrap();
        assert!(matches!(sched.spawn(async {}), Err(SchedError::NotRunning)));
    }

    #[test]
    fn test_start_twice() {
        let sched = started(SchedulerConfig::new());
        assert!(matches!(sched.start(), Err(SchedError::AlreadyStarted)));
        sched.shutdown();
    }

    #[test]
    fn test_spawn_and_join() {
        let sched = started(SchedulerConfig::new().parallelism(2));
        let h = sched.spawn_with_handle(async { 6 * 7 }).unwrap();
        assert_eq!(h.join_timeout(Duration::from_secs(5)).unwrap(), 42);

        let stats = sched.stats();
        assert_eq!(stats.live_carriers, 2);
        sched.shutdown();
        assert!(!sched.is_running());
        assert!(matches!(sched.spawn(async {}), Err(SchedError::NotRunning)));
    }

    #[test]
    fn test_carrier_context() {
        let sched = started(SchedulerConfig::new());
        assert!(!carrier::on_carrier());
        let h = sched
            .spawn_with_handle(async { (carrier::on_carrier(), carrier::current_carrier()) })
            .unwrap();
        assert_eq!(h.join().unwrap(), (true, Some(0)));
    }

    #[test]
    fn test_sleep_releases_carrier() {
        // 100 tasks x 20ms on one carrier: far below the 2s a blocking
        // sleep would take.
        let sched = started(SchedulerConfig::new().parallelism(1));
        let start = Instant::now();
        let handles: Vec<_> = (0..100)
            .map(|i| {
                sched
                    .spawn_with_handle(async move {
                        sleep(Duration::from_millis(20)).await;
                        i
                    })
                    .unwrap()
            })
            .collect();

        let sum: usize = handles
            .into_iter()
            .map(|h| h.join_timeout(Duration::from_secs(10)).unwrap())
            .sum();
        assert_eq!(sum, (0..100).sum());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_block_in_place_compensates() {
        let sched = started(SchedulerConfig::new().parallelism(1).max_pool_size(4));

        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let blocker = sched
            .spawn_with_handle(async move {
                block_in_place(|| rx.recv_timeout(Duration::from_secs(10)).is_ok())
            })
            .unwrap();

        // With the only core carrier blocked, this still has to run.
        let quick = sched.spawn_with_handle(async { "ran" }).unwrap();
        assert_eq!(quick.join_timeout(Duration::from_secs(5)).unwrap(), "ran");
        assert!(sched.stats().compensations >= 1);

        tx.send(()).unwrap();
        assert!(blocker.join_timeout(Duration::from_secs(5)).unwrap());

        // The surplus carrier retires once idle.
        let deadline = Instant::now() + Duration::from_secs(5);
        while sched.stats().live_carriers > 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(sched.stats().live_carriers, 1);
    }

    #[test]
    fn test_compensation_respects_pool_limit() {
        let sched = started(SchedulerConfig::new().parallelism(1).max_pool_size(2));
        let release = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));

        let blockers: Vec<_> = (0..3)
            .map(|_| {
                let release = Arc::clone(&release);
                let entered = Arc::clone(&entered);
                sched
                    .spawn_with_handle(async move {
                        block_in_place(|| {
                            entered.fetch_add(1, Ordering::SeqCst);
                            while !release.load(Ordering::SeqCst) {
                                thread::sleep(Duration::from_millis(1));
                            }
                        })
                    })
                    .unwrap()
            })
            .collect();

        let deadline = Instant::now() + Duration::from_secs(5);
        while entered.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        thread::sleep(Duration::from_millis(50));
        assert!(sched.stats().live_carriers <= 2);
        assert_eq!(entered.load(Ordering::SeqCst), 2);

        release.store(true, Ordering::SeqCst);
        for b in blockers {
            b.join_timeout(Duration::from_secs(5)).unwrap();
        }
    }

    #[test]
    fn test_verify_parallelism() {
        let sched = started(SchedulerConfig::new().parallelism(3));
        sched.verify_parallelism(Duration::from_secs(2)).unwrap();
        sched.shutdown();
    }

    #[test]
    fn test_verify_parallelism_detects_hogged_carrier() {
        let sched = started(SchedulerConfig::new().parallelism(2));
        let hogging = Arc::new(AtomicBool::new(false));

        let hog = {
            let hogging = Arc::clone(&hogging);
            sched
                .spawn_with_handle(async move {
                    hogging.store(true, Ordering::SeqCst);
                    // Not block_in_place: the carrier is simply gone.
                    thread::sleep(Duration::from_millis(800));
                })
                .unwrap()
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !hogging.load(Ordering::SeqCst) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        let err = sched.verify_parallelism(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(
            err,
            SchedError::ParallelismUnverified {
                expected: 2,
                observed: 1
            }
        ));
        hog.join_timeout(Duration::from_secs(5)).unwrap();
        sched.shutdown();
    }

    #[test]
    fn test_await_carriers_shortfall() {
        let started = AtomicUsize::new(1);
        let err = await_carriers(&started, 2, Duration::from_millis(20)).unwrap_err();
        assert!(matches!(
            err,
            SchedError::CarriersUnavailable {
                expected: 2,
                started: 1
            }
        ));

        started.store(2, Ordering::SeqCst);
        assert_eq!(await_carriers(&started, 2, Duration::ZERO).unwrap(), 2);
    }

    #[test]
    fn test_panicking_task_is_lost() {
        let sched = started(SchedulerConfig::new());
        let h = sched
            .spawn_with_handle(async {
                if true {
                    panic!("boom");
                }
                1
            })
            .unwrap();
        assert!(matches!(h.join(), Err(SchedError::TaskLost)));

        // Carrier survives.
        let h = sched.spawn_with_handle(async { 2 }).unwrap();
        assert_eq!(h.join().unwrap(), 2);
    }

    #[test]
    fn test_shutdown_drops_pending_tasks() {
        let sched = started(SchedulerConfig::new());
        let h = sched
            .spawn_with_handle(async {
                sleep(Duration::from_secs(60)).await;
            })
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(sched.stats().timers, 1);

        sched.shutdown();
        assert!(matches!(h.join(), Err(SchedError::TaskLost)));
        sched.shutdown();
    }

    #[test]
    fn test_handle_spawn_from_other_thread() {
        let sched = started(SchedulerConfig::new().parallelism(2));
        let handle = sched.handle();
        let count = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                let count = Arc::clone(&count);
                thread::spawn(move || {
                    for _ in 0..250 {
                        let count = Arc::clone(&count);
                        handle
                            .spawn(async move {
                                count.fetch_add(1, Ordering::SeqCst);
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < 1000 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1000);
        assert_eq!(handle.stats().spawned, 1000);
    }
}
