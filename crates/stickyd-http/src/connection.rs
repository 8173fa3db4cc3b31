//! Connection handler
//!
//! All of this runs on the connection's owning loop. One connection moves
//! through:
//!
//! ```text
//!            ┌───────── flushed, keep-alive ─────────┐
//!            ▼                                       │
//!         Reading ──GET──► AwaitingWorker ──done──► Writing ──► Closed
//!            │                                       ▲   (400, Connection: close,
//!            └── 405 / 400 ──────────────────────────┘    peer close, I/O error)
//! ```
//!
//! Requests on one connection are strictly sequential. Bytes that arrive
//! while a request is in flight stay in `inbound` and are decoded once the
//! response has been flushed.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use mio::{Interest, Token};
use stickyd_core::{CancellationToken, ConnId, PooledBuf};
use tracing::{debug, trace, warn};

use crate::codec::{Decoder, Message, Method, DEFAULT_MAX_BODY};
use crate::dispatch::{ConnHandle, Dispatched, ServiceOutcome};
use crate::encode::{encode_response, Response, Status};
use crate::event_loop::LoopContext;
use crate::stats::ServerStats;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Reading,
    AwaitingWorker,
    Writing,
    Closed,
}

struct Outbound {
    buf: PooledBuf,
    written: usize,
}

pub(crate) struct Connection {
    id: ConnId,
    stream: TcpStream,
    peer: SocketAddr,
    state: ConnState,
    inbound: Vec<u8>,
    outbound: VecDeque<Outbound>,
    decoder: Decoder,
    /// Fired on teardown so a queued worker task skips the service call
    cancel: CancellationToken,
    close_after_flush: bool,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr, decoder: Decoder) -> Self {
        Self {
            id: ConnId::next(),
            stream,
            peer,
            state: ConnState::Reading,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            decoder,
            cancel: CancellationToken::new(),
            close_after_flush: false,
        }
    }
}

enum Flush {
    Done,
    Blocked,
    Failed(&'static str),
}

impl LoopContext {
    /// Adopt an accepted stream
    pub(crate) fn register(&mut self, mut stream: TcpStream, peer: SocketAddr) {
        let token = self.next_token();
        if let Err(e) =
            self.registry
                .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
        {
            warn!(%peer, error = %e, "failed to register connection");
            return;
        }

        let decoder = Decoder::with_limits(self.server.config.max_head, DEFAULT_MAX_BODY);
        let conn = Connection::new(stream, peer, decoder);
        trace!(conn = %conn.id, %peer, loop_id = %self.handle.id(), "connection registered");

        self.by_id.insert(conn.id, token);
        self.conns.insert(token, conn);
        ServerStats::bump(&self.server.stats.accepted);
    }

    pub(crate) fn on_event(&mut self, token: Token, readable: bool) {
        if readable && !self.read_ready(token) {
            return;
        }
        self.drive(token);
    }

    /// Worker outcome for `id`, delivered on this loop
    ///
    /// Dropped if the connection is gone or no longer waiting.
    pub(crate) fn complete(&mut self, id: ConnId, outcome: ServiceOutcome) {
        let waiting = self
            .by_id
            .get(&id)
            .copied()
            .filter(|token| {
                self.conns
                    .get(token)
                    .is_some_and(|c| c.state == ConnState::AwaitingWorker)
            });
        let Some(token) = waiting else {
            trace!(conn = %id, "completion for closed connection dropped");
            ServerStats::bump(&self.server.stats.dropped_completions);
            return;
        };
        self.finish(token, outcome);
        self.drive(token);
    }

    /// Read until `WouldBlock`; false if the connection was torn down
    fn read_ready(&mut self, token: Token) -> bool {
        let limit = self.server.config.max_head + DEFAULT_MAX_BODY;
        let Some(conn) = self.conns.get_mut(&token) else {
            return false;
        };

        let mut chunk = [0u8; READ_CHUNK];
        let outcome = loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => break Err("peer closed"),
                Ok(n) => {
                    // Nothing after a 400 is decoded.
                    if conn.decoder.is_stopped() {
                        continue;
                    }
                    conn.inbound.extend_from_slice(&chunk[..n]);
                    if conn.inbound.len() > limit {
                        warn!(conn = %conn.id, bytes = conn.inbound.len(), "inbound limit exceeded");
                        break Err("inbound limit");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn = %conn.id, error = %e, "read failed");
                    break Err("read error");
                }
            }
        };

        match outcome {
            Ok(()) => true,
            Err(reason) => {
                self.teardown(token, reason);
                false
            }
        }
    }

    /// Advance the state machine as far as buffered input and the socket allow
    fn drive(&mut self, token: Token) {
        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            let state = conn.state;
            match state {
                ConnState::Reading => {
                    let Some(msg) = conn.decoder.decode(&mut conn.inbound) else {
                        return;
                    };
                    self.on_message(token, msg);
                }
                ConnState::Writing => match self.flush(token) {
                    Flush::Blocked => return,
                    Flush::Failed(reason) => {
                        self.teardown(token, reason);
                        return;
                    }
                    Flush::Done => {
                        let Some(conn) = self.conns.get_mut(&token) else {
                            return;
                        };
                        if conn.close_after_flush {
                            let _ = conn.stream.shutdown(Shutdown::Write);
                            self.teardown(token, "closed after response");
                            return;
                        }
                        conn.state = ConnState::Reading;
                    }
                },
                ConnState::AwaitingWorker | ConnState::Closed => return,
            }
        }
    }

    fn on_message(&mut self, token: Token, msg: Message) {
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        match msg {
            Message::EndOfContent => {}
            Message::Malformed(e) => {
                debug!(conn = %conn.id, error = %e, "malformed request");
                ServerStats::bump(&self.server.stats.bad_requests);
                self.respond(token, Response::error(Status::BadRequest));
            }
            Message::Chunked(req) => {
                debug!(conn = %conn.id, target = %req.target, "chunked request body not supported");
                ServerStats::bump(&self.server.stats.bad_requests);
                self.respond(token, Response::error(Status::BadRequest));
            }
            Message::Request(req) => {
                ServerStats::bump(&self.server.stats.requests);
                if req.wants_close() {
                    conn.close_after_flush = true;
                }
                if req.method != Method::Get {
                    trace!(conn = %conn.id, method = %req.method, "method not allowed");
                    self.respond(token, Response::error(Status::MethodNotAllowed));
                    return;
                }

                conn.state = ConnState::AwaitingWorker;
                let handle = ConnHandle {
                    owner: self.handle.clone(),
                    id: conn.id,
                };
                let cancel = conn.cancel.clone();
                match self.server.dispatcher.dispatch(handle, cancel, req) {
                    Ok(Dispatched::Offloaded) => {}
                    Ok(Dispatched::Inline(outcome)) => self.finish(token, outcome),
                    Err(e) => {
                        warn!(error = %e, "dispatch failed");
                        self.teardown(token, "dispatch failed");
                    }
                }
            }
        }
    }

    fn finish(&mut self, token: Token, outcome: ServiceOutcome) {
        match outcome {
            Ok(resp) => self.respond(token, resp),
            Err(e) => {
                if let Some(conn) = self.conns.get(&token) {
                    warn!(conn = %conn.id, error = %e, "service failed, closing connection");
                }
                ServerStats::bump(&self.server.stats.service_failures);
                self.teardown(token, "service failed");
            }
        }
    }

    /// Encode `resp` and queue it for flushing
    fn respond(&mut self, token: Token, resp: Response) {
        let buf = match encode_response(&self.server.pool, &resp) {
            Ok(buf) => buf,
            Err(e) => {
                warn!(error = %e, "response encoding failed");
                self.teardown(token, "encode failed");
                return;
            }
        };
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        conn.outbound.push_back(Outbound { buf, written: 0 });
        conn.close_after_flush |= resp.close;
        conn.state = ConnState::Writing;
        ServerStats::bump(&self.server.stats.responses);
    }

    fn flush(&mut self, token: Token) -> Flush {
        let on_owner = self.handle.is_owner();
        let Some(conn) = self.conns.get_mut(&token) else {
            return Flush::Failed("connection gone");
        };

        while let Some(front) = conn.outbound.front_mut() {
            let pending = &front.buf.as_slice()[front.written..];
            if pending.is_empty() {
                conn.outbound.pop_front();
                continue;
            }
            if !on_owner {
                ServerStats::bump(&self.server.stats.writes_off_owner);
            }
            debug_assert!(on_owner, "{} written off its owning loop", conn.id);

            match conn.stream.write(pending) {
                Ok(0) => return Flush::Failed("write returned zero"),
                Ok(n) => {
                    front.written += n;
                    if front.written == front.buf.len() {
                        // Releases the buffer.
                        conn.outbound.pop_front();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Flush::Blocked,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(conn = %conn.id, error = %e, "write failed");
                    return Flush::Failed("write error");
                }
            }
        }
        Flush::Done
    }

    /// Close a connection, releasing any unflushed buffers
    pub(crate) fn teardown(&mut self, token: Token, reason: &'static str) {
        let Some(mut conn) = self.conns.remove(&token) else {
            return;
        };
        self.by_id.remove(&conn.id);
        conn.state = ConnState::Closed;
        conn.cancel.cancel();
        let _ = self.registry.deregister(&mut conn.stream);
        ServerStats::bump(&self.server.stats.closed);
        debug!(
            conn = %conn.id,
            peer = %conn.peer,
            reason,
            unflushed = conn.outbound.len(),
            "connection closed"
        );
    }
}
