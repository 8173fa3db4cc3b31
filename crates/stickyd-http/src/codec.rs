//! HTTP/1.1 request decoder
//!
//! Only the framing headers are kept (`Content-Length`,
//! `Transfer-Encoding`, `Connection`); everything else is skipped. Each
//! decoded message is one variant of [`Message`]:
//!
//! ```text
//! Request(r)    head complete, non-chunked, body (if any) consumed
//! EndOfContent  emitted once after every Request
//! Chunked(r)    Transfer-Encoding: chunked; nothing after it is decoded
//! Malformed(e)  bad or oversized frame; nothing after it is decoded
//! ```

use crate::error::DecodeError;

/// Largest request head accepted
pub const DEFAULT_MAX_HEAD: usize = 64 * 1024;

/// Largest `Content-Length` accepted
pub const DEFAULT_MAX_BODY: usize = 1024 * 1024;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            other => Method::Other(other.to_owned()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

/// Value of the `Connection` header, when recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOption {
    Close,
    KeepAlive,
}

/// Decoded request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: Method,
    pub target: String,
    pub version: Version,
    pub content_length: Option<usize>,
    pub chunked: bool,
    pub connection: Option<ConnectionOption>,
}

impl Request {
    /// Should the connection close once this request is answered?
    pub fn wants_close(&self) -> bool {
        match self.connection {
            Some(ConnectionOption::Close) => true,
            Some(ConnectionOption::KeepAlive) => false,
            // HTTP/1.0 closes unless the client asked for keep-alive (RFC 9112 9.3),
            // so a bare 1.0 GET is not kept open the way a 1.1 GET is.
            None => self.version == Version::Http10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(Request),
    EndOfContent,
    Chunked(Request),
    Malformed(DecodeError),
}

/// Incremental decoder, one per connection
#[derive(Debug)]
pub struct Decoder {
    max_head: usize,
    max_body: usize,
    end_pending: bool,
    stopped: bool,
}

impl Decoder {
    pub fn new(max_head: usize) -> Self {
        Self::with_limits(max_head, DEFAULT_MAX_BODY)
    }

    pub fn with_limits(max_head: usize, max_body: usize) -> Self {
        Self {
            max_head,
            max_body,
            end_pending: false,
            stopped: false,
        }
    }

    /// True once a `Chunked` or `Malformed` message has been emitted
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Decode the next message from the front of `buf`
    ///
    /// Consumed bytes are drained from `buf`. `None` means more input is
    /// needed (or the decoder has stopped).
    pub fn decode(&mut self, buf: &mut Vec<u8>) -> Option<Message> {
        if self.stopped {
            return None;
        }
        if std::mem::take(&mut self.end_pending) {
            return Some(Message::EndOfContent);
        }
        if buf.is_empty() {
            return None;
        }

        let (head_len, parsed) = {
            let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(buf) {
                Ok(httparse::Status::Complete(n)) => (n, build_request(&req)),
                Ok(httparse::Status::Partial) => {
                    if buf.len() >= self.max_head {
                        return Some(self.stop(DecodeError::HeadTooLarge {
                            limit: self.max_head,
                        }));
                    }
                    return None;
                }
                Err(e) => return Some(self.stop(e.into())),
            }
        };

        if head_len > self.max_head {
            return Some(self.stop(DecodeError::HeadTooLarge {
                limit: self.max_head,
            }));
        }
        let request = match parsed {
            Ok(r) => r,
            Err(e) => return Some(self.stop(e)),
        };

        if request.chunked {
            buf.drain(..head_len);
            self.stopped = true;
            return Some(Message::Chunked(request));
        }

        let body_len = request.content_length.unwrap_or(0);
        if body_len > self.max_body {
            return Some(self.stop(DecodeError::BodyTooLarge {
                length: body_len,
                limit: self.max_body,
            }));
        }
        if buf.len() < head_len + body_len {
            return None;
        }

        buf.drain(..head_len + body_len);
        self.end_pending = true;
        Some(Message::Request(request))
    }

    fn stop(&mut self, e: DecodeError) -> Message {
        self.stopped = true;
        Message::Malformed(e)
    }
}

fn build_request(req: &httparse::Request<'_, '_>) -> Result<Request, DecodeError> {
    let method = req
        .method
        .map(Method::parse)
        .ok_or_else(|| DecodeError::Syntax("missing method".into()))?;
    let target = req
        .path
        .ok_or_else(|| DecodeError::Syntax("missing target".into()))?
        .to_owned();
    let version = match req.version {
        Some(0) => Version::Http10,
        Some(1) => Version::Http11,
        _ => return Err(DecodeError::BadVersion),
    };

    let mut content_length: Option<usize> = None;
    let mut chunked = false;
    let mut connection = None;

    for header in req.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| DecodeError::Syntax(format!("non-ascii {} header", header.name)))?
            .trim();

        if header.name.eq_ignore_ascii_case("content-length") {
            let n = value
                .parse::<usize>()
                .map_err(|_| DecodeError::BadContentLength)?;
            if content_length.is_some_and(|prev| prev != n) {
                return Err(DecodeError::BadContentLength);
            }
            content_length = Some(n);
        } else if header.name.eq_ignore_ascii_case("transfer-encoding") {
            if !value
                .split(',')
                .any(|coding| coding.trim().eq_ignore_ascii_case("chunked"))
            {
                return Err(DecodeError::Syntax(format!(
                    "unsupported transfer-encoding {value:?}"
                )));
            }
            chunked = true;
        } else if header.name.eq_ignore_ascii_case("connection") {
            for option in value.split(',').map(str::trim) {
                if option.eq_ignore_ascii_case("close") {
                    connection = Some(ConnectionOption::Close);
                } else if option.eq_ignore_ascii_case("keep-alive") {
                    connection = Some(ConnectionOption::KeepAlive);
                }
            }
        }
    }

    Ok(Request {
        method,
        target,
        version,
        content_length,
        chunked,
        connection,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut Decoder, buf: &mut Vec<u8>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(m) = decoder.decode(buf) {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_simple_get() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n".to_vec();

        let Some(Message::Request(req)) = d.decode(&mut buf) else {
            panic!("expected request");
        };
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.target, "/");
        assert_eq!(req.version, Version::Http11);
        assert!(!req.wants_close());
        assert!(buf.is_empty());

        assert_eq!(d.decode(&mut buf), Some(Message::EndOfContent));
        assert_eq!(d.decode(&mut buf), None);
    }

    #[test]
    fn test_partial_head_waits() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"GET / HT".to_vec();
        assert_eq!(d.decode(&mut buf), None);
        assert_eq!(buf.len(), 8);

        buf.extend_from_slice(b"TP/1.1\r\n\r\n");
        assert!(matches!(d.decode(&mut buf), Some(Message::Request(_))));
    }

    #[test]
    fn test_pipelined_requests() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"GET /a HTTP/1.1\r\n\r\nPOST /b HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc".to_vec();

        let msgs = decode_all(&mut d, &mut buf);
        assert_eq!(msgs.len(), 4);
        assert!(matches!(&msgs[0], Message::Request(r) if r.target == "/a"));
        assert_eq!(msgs[1], Message::EndOfContent);
        assert!(matches!(&msgs[2], Message::Request(r) if r.method == Method::Post));
        assert_eq!(msgs[3], Message::EndOfContent);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_body_waits_for_content_length() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"PUT / HTTP/1.1\r\nContent-Length: 5\r\n\r\nab".to_vec();
        assert_eq!(d.decode(&mut buf), None);

        buf.extend_from_slice(b"cde");
        let Some(Message::Request(req)) = d.decode(&mut buf) else {
            panic!("expected request");
        };
        assert_eq!(req.content_length, Some(5));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_chunked_stops_decoder() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf =
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n".to_vec();

        assert!(matches!(d.decode(&mut buf), Some(Message::Chunked(r)) if r.chunked));
        assert!(d.is_stopped());
        assert_eq!(d.decode(&mut buf), None);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"\x01\x02 not http at all\r\n\r\n".to_vec();
        assert!(matches!(d.decode(&mut buf), Some(Message::Malformed(_))));
        assert_eq!(d.decode(&mut buf), None);
    }

    #[test]
    fn test_head_cap() {
        let mut d = Decoder::new(1024);
        let mut buf = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        buf.resize(1024, b'a');
        assert_eq!(
            d.decode(&mut buf),
            Some(Message::Malformed(DecodeError::HeadTooLarge { limit: 1024 }))
        );
    }

    #[test]
    fn test_bad_content_length() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"GET / HTTP/1.1\r\nContent-Length: ten\r\n\r\n".to_vec();
        assert_eq!(
            d.decode(&mut buf),
            Some(Message::Malformed(DecodeError::BadContentLength))
        );

        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf =
            b"GET / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\nab".to_vec();
        assert_eq!(
            d.decode(&mut buf),
            Some(Message::Malformed(DecodeError::BadContentLength))
        );
    }

    #[test]
    fn test_body_cap() {
        let mut d = Decoder::with_limits(DEFAULT_MAX_HEAD, 16);
        let mut buf = b"POST / HTTP/1.1\r\nContent-Length: 17\r\n\r\n".to_vec();
        assert_eq!(
            d.decode(&mut buf),
            Some(Message::Malformed(DecodeError::BodyTooLarge {
                length: 17,
                limit: 16
            }))
        );
    }

    #[test]
    fn test_connection_semantics() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"GET / HTTP/1.0\r\n\r\n".to_vec();
        let Some(Message::Request(req)) = d.decode(&mut buf) else {
            panic!("expected request");
        };
        assert_eq!(req.version, Version::Http10);
        assert!(req.wants_close());

        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec();
        let Some(Message::Request(req)) = d.decode(&mut buf) else {
            panic!("expected request");
        };
        assert_eq!(req.connection, Some(ConnectionOption::Close));
        assert!(req.wants_close());
    }

    #[test]
    fn test_other_method_kept() {
        let mut d = Decoder::new(DEFAULT_MAX_HEAD);
        let mut buf = b"BREW /pot HTTP/1.1\r\n\r\n".to_vec();
        let Some(Message::Request(req)) = d.decode(&mut buf) else {
            panic!("expected request");
        };
        assert_eq!(req.method, Method::Other("BREW".into()));
        assert_eq!(req.method.to_string(), "BREW");
    }
}
