//! Response encoding
//!
//! A response is encoded in one go into a single pooled buffer sized to
//! the exact head plus body length. Encoding runs on the connection's
//! owning event loop, never on a worker task.

use std::borrow::Cow;
use std::io::Write;

use stickyd_core::{BufferPool, PooledBuf};

use crate::error::{ServerError, ServerResult};

pub const HELLO_BODY: &str = "Hello World!";

const CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok,
    BadRequest,
    MethodNotAllowed,
    ServiceUnavailable,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::BadRequest => 400,
            Status::MethodNotAllowed => 405,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::MethodNotAllowed => "Method Not Allowed",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Response ready for encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: Cow<'static, [u8]>,
    /// Close the connection once this response is flushed
    pub close: bool,
}

impl Response {
    pub fn ok(body: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            status: Status::Ok,
            body: body.into(),
            close: false,
        }
    }

    pub fn hello() -> Self {
        Self::ok(HELLO_BODY.as_bytes())
    }

    /// `Error: <code> <reason>` body; 400 also closes
    pub fn error(status: Status) -> Self {
        let body = format!("Error: {} {}", status.code(), status.reason());
        Self {
            status,
            body: Cow::Owned(body.into_bytes()),
            close: status == Status::BadRequest,
        }
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }
}

/// Exact encoded head length, including the blank line
pub fn head_len(resp: &Response) -> usize {
    // "HTTP/1.1 200 " + reason + CRLF
    let status_line = 9 + 3 + 1 + resp.status.reason().len() + 2;
    let content_type = "Content-Type: ".len() + CONTENT_TYPE.len() + 2;
    let content_length = "Content-Length: ".len() + decimal_digits(resp.content_length()) + 2;
    status_line + content_type + content_length + 2
}

fn decimal_digits(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Encode `resp` into one buffer from `pool`
pub fn encode_response(pool: &BufferPool, resp: &Response) -> ServerResult<PooledBuf> {
    let size = head_len(resp) + resp.body.len();
    let mut buf = pool
        .acquire(size)
        .ok_or(ServerError::BufferExhausted { size })?;

    // Writes into a PooledBuf cannot fail.
    let _ = write!(
        buf,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        resp.status.code(),
        resp.status.reason(),
        CONTENT_TYPE,
        resp.content_length()
    );
    buf.extend_from_slice(&resp.body);
    debug_assert_eq!(buf.len(), size);
    Ok(buf)
}
