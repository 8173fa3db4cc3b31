//! Fallback parking using std::sync::Condvar
//!
//! Used on platforms without futex support.

use super::{ParkToken, WorkerParking};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct FallbackParking {
    /// Wake epoch
    epoch: Mutex<u32>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }

    fn signal(&self, all: bool) {
        {
            let mut epoch = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
            *epoch = epoch.wrapping_add(1);
        }
        if all {
            self.condvar.notify_all();
        } else {
            self.condvar.notify_one();
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn prepare(&self) -> ParkToken {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let epoch = *self.epoch.lock().unwrap_or_else(PoisonError::into_inner);
        ParkToken { epoch }
    }

    fn cancel(&self, _token: ParkToken) {
        self.parked.fetch_sub(1, Ordering::SeqCst);
    }

    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.epoch.lock().unwrap_or_else(PoisonError::into_inner);

        let woken = loop {
            if *guard != token.epoch {
                break true;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break false;
                    }
                    let (g, _) = self
                        .condvar
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    guard = g;
                }
                None => {
                    guard = self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
            }
        };

        drop(guard);
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        self.signal(false);
    }

    fn wake_all(&self) {
        self.signal(true);
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
