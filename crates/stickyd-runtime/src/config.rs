//! Scheduler configuration
//!
//! Library defaults with optional environment overrides. The config is a
//! plain value: build it once at startup and hand it to `Scheduler::new`.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls (CLI flags in the binary)
//! 2. Environment variables, if `from_env()` was used
//! 3. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use stickyd_runtime::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .parallelism(4)
//!     .park_timeout(Duration::from_millis(5));
//! ```

use std::time::Duration;

use stickyd_core::env::{env_get, env_get_opt};
use stickyd_core::ConfigError;
use tracing::info;

pub mod defaults {
    /// Carrier threads started eagerly
    pub const PARALLELISM: usize = 1;
    /// Lower bound of the derived carrier ceiling
    pub const MIN_POOL_SIZE: usize = 256;
    /// Per-carrier local queue capacity
    pub const LOCAL_QUEUE_CAPACITY: usize = 256;
    /// Spins before parking an idle carrier
    pub const IDLE_SPINS: u32 = 10;
    /// Carrier park timeout
    pub const PARK_TIMEOUT_MS: u64 = 10;
    /// Longest the timer thread sleeps without a deadline
    pub const TIMER_INTERVAL_MS: u64 = 10;
    /// How long `start()` waits for carriers to report in
    pub const START_TIMEOUT_MS: u64 = 2000;
}

/// Scheduler configuration with builder pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Carrier threads started by `start()`
    pub parallelism: usize,
    /// Hard ceiling on live carriers, compensation included.
    /// `None` derives `max(parallelism, 256)`.
    pub max_pool_size: Option<usize>,
    /// Runnable carriers below which `block_in_place` compensates.
    /// `None` derives `max(parallelism / 2, 1)`.
    pub min_runnable: Option<usize>,
    pub local_queue_capacity: usize,
    pub idle_spins: u32,
    pub park_timeout: Duration,
    pub timer_interval: Duration,
    pub start_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Library defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            parallelism: defaults::PARALLELISM,
            max_pool_size: None,
            min_runnable: None,
            local_queue_capacity: defaults::LOCAL_QUEUE_CAPACITY,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            timer_interval: Duration::from_millis(defaults::TIMER_INTERVAL_MS),
            start_timeout: Duration::from_millis(defaults::START_TIMEOUT_MS),
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STICKYD_PARALLELISM` - Carrier threads
    /// - `STICKYD_MAX_POOL_SIZE` - Carrier ceiling incl. compensation
    /// - `STICKYD_MIN_RUNNABLE` - Runnable floor before compensating
    /// - `STICKYD_LOCAL_QUEUE_CAPACITY` - Per-carrier queue size
    /// - `STICKYD_IDLE_SPINS` - Spins before parking
    /// - `STICKYD_PARK_TIMEOUT_MS` - Park timeout in milliseconds
    /// - `STICKYD_TIMER_INTERVAL_MS` - Timer thread max sleep
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            parallelism: env_get("STICKYD_PARALLELISM", base.parallelism),
            max_pool_size: env_get_opt("STICKYD_MAX_POOL_SIZE"),
            min_runnable: env_get_opt("STICKYD_MIN_RUNNABLE"),
            local_queue_capacity: env_get("STICKYD_LOCAL_QUEUE_CAPACITY", base.local_queue_capacity),
            idle_spins: env_get("STICKYD_IDLE_SPINS", base.idle_spins),
            park_timeout: Duration::from_millis(env_get(
                "STICKYD_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            timer_interval: Duration::from_millis(env_get(
                "STICKYD_TIMER_INTERVAL_MS",
                defaults::TIMER_INTERVAL_MS,
            )),
            start_timeout: base.start_timeout,
        }
    }

    // Builder methods

    pub fn parallelism(mut self, n: usize) -> Self {
        self.parallelism = n;
        self
    }

    pub fn max_pool_size(mut self, n: usize) -> Self {
        self.max_pool_size = Some(n);
        self
    }

    pub fn min_runnable(mut self, n: usize) -> Self {
        self.min_runnable = Some(n);
        self
    }

    pub fn local_queue_capacity(mut self, cap: usize) -> Self {
        self.local_queue_capacity = cap;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn timer_interval(mut self, d: Duration) -> Self {
        self.timer_interval = d;
        self
    }

    pub fn start_timeout(mut self, d: Duration) -> Self {
        self.start_timeout = d;
        self
    }

    /// Effective carrier ceiling
    #[inline]
    pub fn pool_limit(&self) -> usize {
        self.max_pool_size
            .unwrap_or_else(|| self.parallelism.max(defaults::MIN_POOL_SIZE))
    }

    /// Effective runnable floor
    #[inline]
    pub fn runnable_floor(&self) -> usize {
        self.min_runnable.unwrap_or_else(|| (self.parallelism / 2).max(1))
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidValue("parallelism must be > 0"));
        }
        if self.pool_limit() < self.parallelism {
            return Err(ConfigError::Inconsistent("max_pool_size must be >= parallelism"));
        }
        if self.runnable_floor() == 0 {
            return Err(ConfigError::InvalidValue("min_runnable must be > 0"));
        }
        if self.runnable_floor() > self.pool_limit() {
            return Err(ConfigError::Inconsistent("min_runnable must be <= max_pool_size"));
        }
        if self.local_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("local_queue_capacity must be > 0"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        if self.timer_interval.is_zero() {
            return Err(ConfigError::InvalidValue("timer_interval must be > 0"));
        }
        Ok(())
    }

    /// Log the effective configuration
    pub fn log_summary(&self) {
        info!(
            parallelism = self.parallelism,
            max_pool_size = self.pool_limit(),
            min_runnable = self.runnable_floor(),
            local_queue_capacity = self.local_queue_capacity,
            idle_spins = self.idle_spins,
            park_timeout = ?self.park_timeout,
            timer_interval = ?self.timer_interval,
            "scheduler configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_defaults() {
        let config = SchedulerConfig::new();
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.pool_limit(), 256);
        assert_eq!(config.runnable_floor(), 1);
        assert!(config.validate().is_ok());

        let config = SchedulerConfig::new().parallelism(300);
        assert_eq!(config.pool_limit(), 300);
        assert_eq!(config.runnable_floor(), 150);

        let config = SchedulerConfig::new().parallelism(3);
        assert_eq!(config.runnable_floor(), 1);
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .parallelism(8)
            .max_pool_size(16)
            .min_runnable(6)
            .park_timeout(Duration::from_millis(5));

        assert_eq!(config.parallelism, 8);
        assert_eq!(config.pool_limit(), 16);
        assert_eq!(config.runnable_floor(), 6);
        assert_eq!(config.park_timeout, Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = SchedulerConfig::new().parallelism(0);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidValue("parallelism must be > 0"))
        );

        let config = SchedulerConfig::new().parallelism(4).max_pool_size(2);
        assert!(matches!(config.validate(), Err(ConfigError::Inconsistent(_))));

        let config = SchedulerConfig::new().min_runnable(0);
        assert!(config.validate().is_err());

        let config = SchedulerConfig::new().max_pool_size(4).min_runnable(5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env() {
        let config = SchedulerConfig::from_env();
        assert!(config.parallelism >= 1);
    }
}
