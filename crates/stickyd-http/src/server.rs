//! Server assembly and lifecycle
//!
//! Startup order: validate config, start the scheduler and prove its
//! parallelism, bind the listener, build the loops, start the watchdog.
//! Any failure here is fatal and unwinds whatever was already started.
//!
//! Shutdown order: watchdog, loops (listener closed, connections torn
//! down, queued jobs dropped, threads joined), then the scheduler.

use std::net::SocketAddr;
use std::sync::Arc;

use stickyd_core::{BufferPool, BufferStats, LoopId};
use stickyd_runtime::{SchedStats, Scheduler};
use tracing::info;

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, ExecutionMode, HelloService, Service};
use crate::error::{ServerError, ServerResult};
use crate::event_loop::{EventLoopGroup, LoopBuilder, RoundRobin};
use crate::listener::bind_listener;
use crate::stats::{ServerStats, StatsSnapshot};
use crate::watchdog::{Progress, Watchdog, WatchdogConfig};

/// State every event loop reads
pub(crate) struct ServerShared {
    pub(crate) config: ServerConfig,
    pub(crate) pool: BufferPool,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) loops: RoundRobin,
    pub(crate) stats: ServerStats,
}

/// Running HTTP server
pub struct Server {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    progress: Arc<Progress>,
    group: Option<EventLoopGroup>,
    watchdog: Option<Watchdog>,
    scheduler: Scheduler,
}

impl Server {
    /// Start a server answering with [`HelloService`]
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        let service = Arc::new(HelloService::new(config.service_delay));
        Self::bind_with_service(config, service)
    }

    pub fn bind_with_service(config: ServerConfig, service: Arc<dyn Service>) -> ServerResult<Self> {
        config.validate()?;
        config.log_summary();

        let scheduler = Scheduler::new(config.scheduler.clone())?;
        scheduler.start()?;
        scheduler.verify_parallelism(config.verify_timeout)?;

        let listener = bind_listener(config.addr, config.backlog)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind {
                addr: config.addr,
                source,
            })?;

        let builders = (0..config.io_threads)
            .map(|i| LoopBuilder::new(LoopId::new(i)))
            .collect::<ServerResult<Vec<_>>>()?;
        let handles = builders.iter().map(|b| b.handle().clone()).collect();

        let progress = Arc::new(Progress::new());
        let dispatcher = Dispatcher::new(
            config.dispatch.clone(),
            service,
            scheduler.handle(),
            Arc::clone(&progress),
        );
        let shared = Arc::new(ServerShared {
            pool: BufferPool::from_flag(config.pooled_buffers),
            dispatcher,
            loops: RoundRobin::new(handles),
            stats: ServerStats::default(),
            config,
        });

        let group = EventLoopGroup::spawn(builders, &shared, listener)?;

        let watchdog = match shared.config.stall_timeout {
            Some(limit) if shared.dispatcher.mode() == ExecutionMode::Offload => {
                let config = WatchdogConfig::new(limit, shared.config.stall_action);
                let dog = Watchdog::spawn(Arc::clone(&progress), config).map_err(|source| {
                    ServerError::ThreadSpawn {
                        what: "watchdog",
                        source,
                    }
                })?;
                Some(dog)
            }
            _ => None,
        };

        info!(
            addr = %local_addr,
            io_threads = group.len(),
            buffers = shared.pool.name(),
            "server listening"
        );

        Ok(Self {
            shared,
            local_addr,
            progress,
            group: Some(group),
            watchdog,
            scheduler,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.shared.pool.stats()
    }

    pub fn scheduler_stats(&self) -> SchedStats {
        self.scheduler.stats()
    }

    /// Offloaded requests whose completion has not yet run
    pub fn pending_completions(&self) -> usize {
        self.progress.pending()
    }

    pub fn is_running(&self) -> bool {
        self.group.is_some()
    }

    /// Stop accepting, close every connection and stop all threads
    ///
    /// Idempotent.
    pub fn shutdown(&mut self) {
        let Some(mut group) = self.group.take() else {
            return;
        };
        if let Some(dog) = self.watchdog.take() {
            dog.shutdown();
        }
        group.shutdown();
        self.scheduler.shutdown();

        let stats = self.stats();
        let buffers = self.buffer_stats();
        info!(
            accepted = stats.accepted,
            responses = stats.responses,
            buffers_outstanding = buffers.outstanding(),
            "server stopped"
        );
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .finish()
    }
}
