//! Carrier parking mechanism
//!
//! Idle carriers sleep here; pushes onto the ready queue wake them.
//!
//! Parking is two-phase so that a push racing with a carrier going idle is
//! never lost:
//!
//! 1. `prepare()` registers the carrier as parked and snapshots the wake
//!    epoch.
//! 2. The carrier re-checks the ready queue.
//! 3. `park(token, ..)` sleeps only if the epoch is unchanged; otherwise
//!    `cancel(token)` is called when work turned up.
//!
//! Every `wake_one`/`wake_all` bumps the epoch before signalling. A push
//! that lands after step 2 therefore either changes the epoch (the wait
//! returns immediately) or wakes the sleeping carrier.

use std::time::Duration;

/// Snapshot taken by `prepare()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParkToken {
    pub(crate) epoch: u32,
}

/// Platform-specific carrier parking mechanism
pub trait WorkerParking: Send + Sync {
    /// Register intent to park and snapshot the wake epoch
    fn prepare(&self) -> ParkToken;

    /// Undo `prepare()` without sleeping
    fn cancel(&self, token: ParkToken);

    /// Sleep until woken, the epoch moves, or timeout
    ///
    /// Returns `true` if a wake arrived, `false` on timeout. Callers
    /// re-check for work either way.
    fn park(&self, token: ParkToken, timeout: Option<Duration>) -> bool;

    /// Wake one parked carrier
    fn wake_one(&self);

    /// Wake all parked carriers (shutdown)
    fn wake_all(&self);

    /// Number of currently parked carriers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

/// Create a new platform-appropriate parking instance
pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let start = Instant::now();
        let token = parking.prepare();
        let woken = parking.park(token, Some(Duration::from_millis(50)));

        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert_eq!(parking.parked_count(), 0);
    }

    #[test]
    fn test_wake_one() {
        let parking = Arc::new(PlatformParking::new());
        let parking2 = Arc::clone(&parking);

        let handle = thread::spawn(move || {
            let token = parking2.prepare();
            parking2.park(token, Some(Duration::from_secs(10)))
        });

        while parking.parked_count() == 0 {
            thread::yield_now();
        }
        let start = Instant::now();
        parking.wake_one();

        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wake_between_prepare_and_park() {
        let parking = PlatformParking::new();
        let token = parking.prepare();
        parking.wake_one();

        let start = Instant::now();
        assert!(parking.park(token, Some(Duration::from_secs(5))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_cancel() {
        let parking = PlatformParking::new();
        let token = parking.prepare();
        assert_eq!(parking.parked_count(), 1);
        parking.cancel(token);
        assert_eq!(parking.parked_count(), 0);
    }
}
