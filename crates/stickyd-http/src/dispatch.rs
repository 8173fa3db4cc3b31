//! Dispatcher
//!
//! Runs the service for a validated `GET` either inline on the event loop
//! or as a worker task. A worker never writes: its outcome travels back to
//! the loop that owns the connection through the request's [`ConnHandle`],
//! and the loop encodes and writes it.
//!
//! ```text
//!  event loop                     worker task                  owning loop
//!  ──────────                     ───────────                  ───────────
//!  dispatch ── spawn ──────────►  cancelled? ── yes ─► drop
//!                                 call service (+ timeout)
//!                                 execute(job) ─── closed ─► drop
//!                                       └────────────────────► complete(conn_id)
//!                                                              gone? ─► drop
//!                                                              encode + write
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use stickyd_core::{CancellationToken, ConnId};
use stickyd_runtime::{block_on, sleep, timeout, SchedResult, SchedulerHandle};
use thiserror::Error;
use tracing::trace;

use crate::codec::Request;
use crate::encode::{Response, Status};
use crate::event_loop::LoopHandle;
use crate::watchdog::Progress;

/// Where the service call runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Poll the service to completion on the I/O thread
    EventLoop,
    /// Run the service as a worker task
    #[default]
    Offload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchConfig {
    pub mode: ExecutionMode,
    /// Answer 503 if the service takes longer than this
    pub service_timeout: Option<Duration>,
}

/// Service failure; the connection is force-closed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service failed: {0}")]
pub struct ServiceError(pub String);

impl ServiceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type ServiceOutcome = Result<Response, ServiceError>;

pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceOutcome> + Send + 'static>>;

/// Business logic behind the single route
pub trait Service: Send + Sync + 'static {
    fn call(&self, req: &Request) -> ServiceFuture;
}

/// Sleeps for `delay`, then answers `Hello World!`
#[derive(Debug, Clone)]
pub struct HelloService {
    delay: Duration,
}

impl HelloService {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Service for HelloService {
    fn call(&self, _req: &Request) -> ServiceFuture {
        let delay = self.delay;
        Box::pin(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            Ok(Response::hello())
        })
    }
}

/// The connection a request came from, and the loop that owns it
#[derive(Clone, Debug)]
pub struct ConnHandle {
    pub owner: LoopHandle,
    pub id: ConnId,
}

pub(crate) enum Dispatched {
    /// Service already ran; write this now
    Inline(ServiceOutcome),
    /// Outcome will arrive as a job on the owning loop
    Offloaded,
}

pub(crate) struct Dispatcher {
    config: DispatchConfig,
    service: Arc<dyn Service>,
    scheduler: SchedulerHandle,
    progress: Arc<Progress>,
}

impl Dispatcher {
    pub(crate) fn new(
        config: DispatchConfig,
        service: Arc<dyn Service>,
        scheduler: SchedulerHandle,
        progress: Arc<Progress>,
    ) -> Self {
        Self {
            config,
            service,
            scheduler,
            progress,
        }
    }

    pub(crate) fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    pub(crate) fn dispatch(
        &self,
        conn: ConnHandle,
        cancel: CancellationToken,
        req: Request,
    ) -> SchedResult<Dispatched> {
        let limit = self.config.service_timeout;

        if self.config.mode == ExecutionMode::EventLoop {
            let outcome = block_on(call_service(self.service.as_ref(), &req, limit));
            return Ok(Dispatched::Inline(outcome));
        }

        let service = Arc::clone(&self.service);
        let guard = self.progress.begin();
        self.scheduler.spawn(async move {
            if cancel.is_cancelled() {
                trace!(conn = %conn.id, "connection closed before service call");
                return;
            }
            let outcome = call_service(service.as_ref(), &req, limit).await;

            let id = conn.id;
            let delivered = conn.owner.execute(move |ctx| {
                let _guard = guard;
                ctx.complete(id, outcome);
            });
            if delivered.is_err() {
                trace!(conn = %id, "owning loop closed, completion dropped");
            }
        })?;
        Ok(Dispatched::Offloaded)
    }
}

async fn call_service(
    service: &dyn Service,
    req: &Request,
    limit: Option<Duration>,
) -> ServiceOutcome {
    let fut = service.call(req);
    match limit {
        Some(d) => match timeout(d, fut).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Ok(Response::error(Status::ServiceUnavailable)),
        },
        None => fut.await,
    }
}
