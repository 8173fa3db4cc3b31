//! HTTP front-end errors

use std::io;
use std::net::SocketAddr;

use stickyd_core::ConfigError;
use stickyd_runtime::SchedError;
use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while starting, running or stopping the server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedError),

    /// Listener socket could not be created, bound or put in listen state
    #[error("bind {addr} failed: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Poll instance, waker or registration failure
    #[error("event loop setup failed: {0}")]
    EventLoop(#[source] io::Error),

    #[error("failed to spawn {what} thread: {source}")]
    ThreadSpawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// Job submitted to an event loop that has stopped
    #[error("event loop {0} is closed")]
    LoopClosed(stickyd_core::LoopId),

    /// Buffer allocator refused a response buffer
    #[error("no buffer for {size} byte response")]
    BufferExhausted { size: usize },
}

/// Why a request frame could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("request body of {length} bytes exceeds {limit}")]
    BodyTooLarge { length: usize, limit: usize },

    #[error("invalid Content-Length")]
    BadContentLength,

    #[error("unsupported HTTP version")]
    BadVersion,

    #[error("malformed request head: {0}")]
    Syntax(String),
}

impl From<httparse::Error> for DecodeError {
    fn from(e: httparse::Error) -> Self {
        match e {
            httparse::Error::Version => DecodeError::BadVersion,
            other => DecodeError::Syntax(other.to_string()),
        }
    }
}
