//! Server configuration
//!
//! Same layering as `SchedulerConfig`: library defaults, then
//! `STICKYD_*` environment overrides through `from_env()`, then builder
//! calls (the binary maps its CLI flags onto these).

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use stickyd_core::env::{env_get, env_get_bool, env_get_millis};
use stickyd_core::ConfigError;
use stickyd_runtime::SchedulerConfig;
use tracing::info;

use crate::codec::DEFAULT_MAX_HEAD;
use crate::dispatch::{DispatchConfig, ExecutionMode};
use crate::listener::DEFAULT_BACKLOG;
use crate::watchdog::StallAction;

pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const IO_THREADS: usize = 1;
    pub const SERVICE_DELAY_MS: u64 = 1;
    pub const STALL_TIMEOUT_MS: u64 = 30_000;
    pub const VERIFY_TIMEOUT_MS: u64 = 2_000;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// Event loops; loop 0 also accepts
    pub io_threads: usize,
    pub backlog: i32,
    pub dispatch: DispatchConfig,
    /// Pooled size-class buffers, or a fresh heap buffer per response
    pub pooled_buffers: bool,
    /// Sleep inside the stub service
    pub service_delay: Duration,
    /// Watchdog stall timeout; `None` disables the watchdog
    pub stall_timeout: Option<Duration>,
    pub stall_action: StallAction,
    /// Largest request head before the frame is malformed
    pub max_head: usize,
    /// Budget for the startup parallelism probe
    pub verify_timeout: Duration,
    pub scheduler: SchedulerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, defaults::PORT)),
            io_threads: defaults::IO_THREADS,
            backlog: DEFAULT_BACKLOG,
            dispatch: DispatchConfig::default(),
            pooled_buffers: true,
            service_delay: Duration::from_millis(defaults::SERVICE_DELAY_MS),
            stall_timeout: Some(Duration::from_millis(defaults::STALL_TIMEOUT_MS)),
            stall_action: StallAction::Log,
            max_head: DEFAULT_MAX_HEAD,
            verify_timeout: Duration::from_millis(defaults::VERIFY_TIMEOUT_MS),
            scheduler: SchedulerConfig::new(),
        }
    }

    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `STICKYD_PORT` - Listen port
    /// - `STICKYD_IO_THREADS` - Event loops
    /// - `STICKYD_RUN_ON_EVENT_LOOP` - Run the service inline on the loop
    /// - `STICKYD_POOLED_BUFFERS` - Pooled (`true`) or heap buffers
    /// - `STICKYD_SERVICE_DELAY_MS` - Stub service sleep
    /// - `STICKYD_SERVICE_TIMEOUT_MS` - 503 after this long (0 = off)
    /// - `STICKYD_STALL_TIMEOUT_MS` - Watchdog timeout (0 = off)
    ///
    /// Scheduler variables are read by `SchedulerConfig::from_env`.
    pub fn from_env() -> Self {
        let base = Self::new();
        let mode = if env_get_bool("STICKYD_RUN_ON_EVENT_LOOP", false) {
            ExecutionMode::EventLoop
        } else {
            ExecutionMode::Offload
        };
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, env_get("STICKYD_PORT", defaults::PORT))),
            io_threads: env_get("STICKYD_IO_THREADS", base.io_threads),
            dispatch: DispatchConfig {
                mode,
                service_timeout: env_get_millis("STICKYD_SERVICE_TIMEOUT_MS", None),
            },
            pooled_buffers: env_get_bool("STICKYD_POOLED_BUFFERS", base.pooled_buffers),
            service_delay: Duration::from_millis(env_get(
                "STICKYD_SERVICE_DELAY_MS",
                defaults::SERVICE_DELAY_MS,
            )),
            stall_timeout: env_get_millis("STICKYD_STALL_TIMEOUT_MS", base.stall_timeout),
            scheduler: SchedulerConfig::from_env(),
            ..base
        }
    }

    // Builder methods

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.addr.set_port(port);
        self
    }

    pub fn io_threads(mut self, n: usize) -> Self {
        self.io_threads = n;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.dispatch.mode = mode;
        self
    }

    pub fn service_timeout(mut self, limit: Option<Duration>) -> Self {
        self.dispatch.service_timeout = limit;
        self
    }

    pub fn pooled_buffers(mut self, pooled: bool) -> Self {
        self.pooled_buffers = pooled;
        self
    }

    pub fn service_delay(mut self, d: Duration) -> Self {
        self.service_delay = d;
        self
    }

    pub fn stall_timeout(mut self, limit: Option<Duration>) -> Self {
        self.stall_timeout = limit;
        self
    }

    pub fn stall_action(mut self, action: StallAction) -> Self {
        self.stall_action = action;
        self
    }

    pub fn max_head(mut self, bytes: usize) -> Self {
        self.max_head = bytes;
        self
    }

    /// How long the startup parallelism check may take
    pub fn verify_timeout(mut self, d: Duration) -> Self {
        self.verify_timeout = d;
        self
    }

    pub fn scheduler(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.io_threads == 0 {
            return Err(ConfigError::InvalidValue("io_threads must be > 0"));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::InvalidValue("backlog must be > 0"));
        }
        if self.max_head < 1024 {
            return Err(ConfigError::InvalidValue("max_head must be >= 1024"));
        }
        if self.dispatch.service_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidValue("service_timeout must be > 0 when set"));
        }
        if self.stall_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidValue("stall_timeout must be > 0 when set"));
        }
        self.scheduler.validate()
    }

    pub fn log_summary(&self) {
        info!(
            addr = %self.addr,
            io_threads = self.io_threads,
            mode = ?self.dispatch.mode,
            service_timeout = ?self.dispatch.service_timeout,
            pooled_buffers = self.pooled_buffers,
            service_delay = ?self.service_delay,
            stall_timeout = ?self.stall_timeout,
            "server configuration"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = ServerConfig::new();
        assert_eq!(c.addr.port(), 8080);
        assert_eq!(c.io_threads, 1);
        assert_eq!(c.backlog, 8192);
        assert_eq!(c.dispatch.mode, ExecutionMode::Offload);
        assert_eq!(c.dispatch.service_timeout, None);
        assert!(c.pooled_buffers);
        assert_eq!(c.service_delay, Duration::from_millis(1));
        assert_eq!(c.stall_timeout, Some(Duration::from_secs(30)));
        assert_eq!(c.scheduler.parallelism, 1);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let c = ServerConfig::new()
            .port(0)
            .io_threads(4)
            .execution_mode(ExecutionMode::EventLoop)
            .service_timeout(Some(Duration::from_millis(50)))
            .pooled_buffers(false)
            .stall_action(StallAction::Abort);
        assert_eq!(c.addr.port(), 0);
        assert_eq!(c.io_threads, 4);
        assert_eq!(c.dispatch.mode, ExecutionMode::EventLoop);
        assert_eq!(c.dispatch.service_timeout, Some(Duration::from_millis(50)));
        assert!(!c.pooled_buffers);
        assert_eq!(c.stall_action, StallAction::Abort);
    }

    #[test]
    fn test_validate() {
        assert!(ServerConfig::new().io_threads(0).validate().is_err());
        assert!(ServerConfig::new().backlog(0).validate().is_err());
        assert!(ServerConfig::new().max_head(10).validate().is_err());
        assert!(ServerConfig::new()
            .service_timeout(Some(Duration::ZERO))
            .validate()
            .is_err());
        assert!(ServerConfig::new()
            .scheduler(SchedulerConfig::new().parallelism(0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("STICKYD_IO_THREADS", "3");
        std::env::set_var("STICKYD_SERVICE_TIMEOUT_MS", "250");
        std::env::set_var("STICKYD_STALL_TIMEOUT_MS", "0");
        let c = ServerConfig::from_env();
        std::env::remove_var("STICKYD_IO_THREADS");
        std::env::remove_var("STICKYD_SERVICE_TIMEOUT_MS");
        std::env::remove_var("STICKYD_STALL_TIMEOUT_MS");

        assert_eq!(c.io_threads, 3);
        assert_eq!(c.dispatch.service_timeout, Some(Duration::from_millis(250)));
        assert_eq!(c.stall_timeout, None);
        assert_eq!(c.backlog, 8192);
    }
}
