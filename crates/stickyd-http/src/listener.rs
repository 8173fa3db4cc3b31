//! Listener and acceptor
//!
//! The listening socket is built with socket2 so the backlog and
//! `SO_REUSEADDR` can be set before `listen`, then handed to mio. It lives
//! on loop 0; accepted streams are spread round-robin over the group.

use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};
use crate::event_loop::LoopContext;

pub const DEFAULT_BACKLOG: i32 = 8192;

/// Create a non-blocking listener bound to `addr`
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> ServerResult<TcpListener> {
    let bind_err = move |source| ServerError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;

    Ok(TcpListener::from_std(socket.into()))
}

/// Per-stream options: `TCP_NODELAY`, `SO_KEEPALIVE`
pub(crate) fn configure_stream(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_keepalive(true)
}

impl LoopContext {
    /// Accept until the backlog is drained
    pub(crate) fn accept_ready(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = configure_stream(&stream) {
                        warn!(%peer, error = %e, "failed to set socket options");
                    }
                    let target = self.server.loops.next().clone();
                    if target.id() == self.handle.id() {
                        self.register(stream, peer);
                    } else if target
                        .execute(move |ctx| ctx.register(stream, peer))
                        .is_err()
                    {
                        debug!(%peer, loop_id = %target.id(), "target loop closed, connection dropped");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpStream as StdStream};

    #[test]
    fn test_bind_ephemeral() {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let listener = bind_listener(addr, DEFAULT_BACKLOG).unwrap();
        let local = listener.local_addr().unwrap();
        assert_ne!(local.port(), 0);

        // Non-blocking: nothing pending yet.
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let _client = StdStream::connect(local).unwrap();
        let mut accepted = None;
        for _ in 0..100 {
            match listener.accept() {
                Ok(pair) => {
                    accepted = Some(pair);
                    break;
                }
                Err(_) => std::thread::sleep(std::time::Duration::from_millis(5)),
            }
        }
        let (stream, _) = accepted.unwrap();
        configure_stream(&stream).unwrap();
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[test]
    fn test_bind_conflict_is_fatal() {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let first = bind_listener(addr, 16).unwrap();
        let taken = first.local_addr().unwrap();
        assert!(matches!(
            bind_listener(taken, 16),
            Err(ServerError::Bind { .. })
        ));
    }
}
