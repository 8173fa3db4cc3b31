//! Server counters

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct ServerStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) closed: AtomicU64,
    pub(crate) requests: AtomicU64,
    pub(crate) responses: AtomicU64,
    pub(crate) bad_requests: AtomicU64,
    pub(crate) service_failures: AtomicU64,
    pub(crate) dropped_completions: AtomicU64,
    pub(crate) writes_off_owner: AtomicU64,
}

impl ServerStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: load(&self.accepted),
            closed: load(&self.closed),
            requests: load(&self.requests),
            responses: load(&self.responses),
            bad_requests: load(&self.bad_requests),
            service_failures: load(&self.service_failures),
            dropped_completions: load(&self.dropped_completions),
            writes_off_owner: load(&self.writes_off_owner),
        }
    }
}

/// Point-in-time copy of the server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub closed: u64,
    /// Requests decoded, any method
    pub requests: u64,
    pub responses: u64,
    pub bad_requests: u64,
    pub service_failures: u64,
    /// Worker completions whose connection was gone on arrival
    pub dropped_completions: u64,
    /// Socket writes issued from a thread other than the owning loop
    pub writes_off_owner: u64,
}

impl StatsSnapshot {
    /// Connections accepted and not yet closed
    pub fn open_connections(&self) -> u64 {
        self.accepted.saturating_sub(self.closed)
    }
}
