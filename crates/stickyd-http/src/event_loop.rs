//! Event loops
//!
//! Each loop is one OS thread around a mio `Poll`. Other threads talk to a
//! loop only through its [`LoopHandle`]: `execute` pushes a job onto a
//! lock-free queue and fires the loop's `Waker`; the loop drains the queue
//! after every poll. Connections registered on a loop are touched only by
//! that loop's thread.
//!
//! ```text
//!             ┌──────────── stickyd-io-N ────────────┐
//!  execute ──►│ SegQueue<Job> ──► run_jobs            │
//!  (any thd)  │ Waker ─┐                              │
//!             │        ▼                              │
//!             │  Poll ──► accept / read / write       │
//!             └───────────────────────────────────────┘
//! ```
//!
//! Closing a loop is one-way. A job pushed after the loop has drained its
//! queue for the last time is dropped by the pusher.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_queue::SegQueue;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use stickyd_core::{ConnId, LoopId};
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::server::ServerShared;

pub(crate) type Job = Box<dyn FnOnce(&mut LoopContext) + Send + 'static>;

const WAKER: Token = Token(0);
pub(crate) const LISTENER: Token = Token(1);
pub(crate) const FIRST_CONN_TOKEN: usize = 2;

const EVENTS_CAPACITY: usize = 1024;

struct LoopShared {
    id: LoopId,
    jobs: SegQueue<Job>,
    waker: Waker,
    open: AtomicBool,
    owner: OnceLock<ThreadId>,
}

impl LoopShared {
    fn drain_jobs(&self) -> usize {
        let mut dropped = 0;
        while let Some(job) = self.jobs.pop() {
            drop(job);
            dropped += 1;
        }
        dropped
    }
}

/// Cloneable, `Send` handle to one event loop
#[derive(Clone)]
pub struct LoopHandle {
    shared: Arc<LoopShared>,
}

impl LoopHandle {
    pub fn id(&self) -> LoopId {
        self.shared.id
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Is the calling thread this loop's thread?
    pub fn is_owner(&self) -> bool {
        self.shared
            .owner
            .get()
            .is_some_and(|owner| *owner == thread::current().id())
    }

    /// Run `job` on the loop thread
    ///
    /// Fails with `LoopClosed` once the loop has stopped; the job is dropped.
    pub(crate) fn execute<F>(&self, job: F) -> ServerResult<()>
    where
        F: FnOnce(&mut LoopContext) + Send + 'static,
    {
        if !self.is_open() {
            return Err(ServerError::LoopClosed(self.id()));
        }
        self.shared.jobs.push(Box::new(job));
        if !self.is_open() {
            // Lost the race with close; the loop may be past its last drain.
            self.shared.drain_jobs();
            return Err(ServerError::LoopClosed(self.id()));
        }
        if let Err(e) = self.shared.waker.wake() {
            warn!(loop_id = %self.id(), error = %e, "waker failed");
        }
        Ok(())
    }

    /// Stop the loop after its current iteration
    pub(crate) fn close(&self) {
        if self.shared.open.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.shared.waker.wake() {
                warn!(loop_id = %self.id(), error = %e, "waker failed on close");
            }
        }
    }
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("id", &self.id())
            .field("open", &self.is_open())
            .field("jobs", &self.shared.jobs.len())
            .finish()
    }
}

/// Loop-thread state handed to every job
pub(crate) struct LoopContext {
    pub(crate) handle: LoopHandle,
    pub(crate) registry: Registry,
    pub(crate) server: Arc<ServerShared>,
    pub(crate) listener: Option<TcpListener>,
    pub(crate) conns: HashMap<Token, Connection>,
    pub(crate) by_id: HashMap<ConnId, Token>,
    next_token: usize,
}

impl LoopContext {
    pub(crate) fn next_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    fn run_jobs(&mut self) {
        // Only what was queued before this pass; later jobs wait for the
        // next wake so polling is not starved.
        let queued = self.handle.shared.jobs.len();
        for _ in 0..queued {
            match self.handle.shared.jobs.pop() {
                Some(job) => job(self),
                None => break,
            }
        }
        if !self.handle.shared.jobs.is_empty() {
            if let Err(e) = self.handle.shared.waker.wake() {
                warn!(loop_id = %self.handle.id(), error = %e, "waker failed");
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            let _ = self.registry.deregister(&mut listener);
        }
        let tokens: Vec<Token> = self.conns.keys().copied().collect();
        let closed = tokens.len();
        for token in tokens {
            self.teardown(token, "event loop stopped");
        }
        let dropped = self.handle.shared.drain_jobs();
        debug!(loop_id = %self.handle.id(), closed, dropped, "event loop stopped");
    }
}

/// A loop whose poller exists but whose thread has not started
pub(crate) struct LoopBuilder {
    poll: Poll,
    handle: LoopHandle,
}

impl LoopBuilder {
    pub(crate) fn new(id: LoopId) -> ServerResult<Self> {
        let poll = Poll::new().map_err(ServerError::EventLoop)?;
        let waker = Waker::new(poll.registry(), WAKER).map_err(ServerError::EventLoop)?;
        Ok(Self {
            poll,
            handle: LoopHandle {
                shared: Arc::new(LoopShared {
                    id,
                    jobs: SegQueue::new(),
                    waker,
                    open: AtomicBool::new(true),
                    owner: OnceLock::new(),
                }),
            },
        })
    }

    pub(crate) fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    fn spawn(
        self,
        server: Arc<ServerShared>,
        mut listener: Option<TcpListener>,
    ) -> ServerResult<JoinHandle<()>> {
        let registry = self.poll.registry().try_clone().map_err(ServerError::EventLoop)?;
        if let Some(l) = listener.as_mut() {
            registry
                .register(l, LISTENER, Interest::READABLE)
                .map_err(ServerError::EventLoop)?;
        }

        let id = self.handle.id();
        let ctx = LoopContext {
            handle: self.handle,
            registry,
            server,
            listener,
            conns: HashMap::new(),
            by_id: HashMap::new(),
            next_token: FIRST_CONN_TOKEN,
        };
        let poll = self.poll;
        thread::Builder::new()
            .name(format!("stickyd-{}", id))
            .spawn(move || run(poll, ctx))
            .map_err(|source| ServerError::ThreadSpawn {
                what: "event loop",
                source,
            })
    }
}

fn run(mut poll: Poll, mut ctx: LoopContext) {
    let _ = ctx.handle.shared.owner.set(thread::current().id());
    let mut events = Events::with_capacity(EVENTS_CAPACITY);
    debug!(
        loop_id = %ctx.handle.id(),
        accepting = ctx.listener.is_some(),
        "event loop started"
    );

    while ctx.handle.is_open() {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(loop_id = %ctx.handle.id(), error = %e, "poll failed, stopping loop");
            ctx.handle.close();
            break;
        }

        for event in events.iter() {
            match event.token() {
                WAKER => {}
                LISTENER => ctx.accept_ready(),
                token => {
                    let readable = event.is_readable() || event.is_read_closed() || event.is_error();
                    ctx.on_event(token, readable);
                }
            }
        }

        ctx.run_jobs();
    }

    ctx.shutdown();
}

/// The server's fixed set of event loops
pub(crate) struct EventLoopGroup {
    handles: Vec<LoopHandle>,
    threads: Vec<JoinHandle<()>>,
}

impl EventLoopGroup {
    /// Start one thread per builder; the first one also accepts
    pub(crate) fn spawn(
        builders: Vec<LoopBuilder>,
        server: &Arc<ServerShared>,
        listener: TcpListener,
    ) -> ServerResult<Self> {
        let mut group = Self {
            handles: builders.iter().map(|b| b.handle().clone()).collect(),
            threads: Vec::with_capacity(builders.len()),
        };
        let mut listener = Some(listener);
        for builder in builders {
            match builder.spawn(Arc::clone(server), listener.take()) {
                Ok(thread) => group.threads.push(thread),
                Err(e) => {
                    group.shutdown();
                    return Err(e);
                }
            }
        }
        Ok(group)
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    /// Close every loop, then join their threads
    pub(crate) fn shutdown(&mut self) {
        for handle in &self.handles {
            handle.close();
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("event loop thread panicked");
            }
        }
    }
}

impl Drop for EventLoopGroup {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Round-robin picker over the group's handles
#[derive(Debug)]
pub(crate) struct RoundRobin {
    handles: Vec<LoopHandle>,
    next: AtomicUsize,
}

impl RoundRobin {
    pub(crate) fn new(handles: Vec<LoopHandle>) -> Self {
        Self {
            handles,
            next: AtomicUsize::new(0),
        }
    }

    pub(crate) fn next(&self) -> &LoopHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        &self.handles[i]
    }
}
