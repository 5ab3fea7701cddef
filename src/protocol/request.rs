//! Request model
//!
//! [`RequestHead`] is what the decoder produces eagerly: the parsed
//! request line, the header collection and the parsed query string.
//! [`Request`] is the value handed to handlers; it adds the path
//! parameters bound by the router and a lazily-read body.
//!
//! Body framing is only validated when the body is actually requested,
//! so a request with an unusable `Transfer-Encoding` can still have its
//! request line and headers inspected.

use std::collections::HashMap;
use std::str::FromStr;

use bytes::{Bytes, BytesMut};

use crate::protocol::body::Body;
use crate::protocol::{Headers, Method, ParseError, Query};

/// The first line of an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub target: String,
}

impl RequestLine {
    /// Parses `METHOD SP request-target SP HTTP/1.1`.
    ///
    /// Only the eight supported methods and version 1.1 are accepted;
    /// anything else is a malformed request line.
    pub fn parse(line: &[u8]) -> Result<Self, ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::MalformedRequestLine)?;

        let mut parts = line.split(' ');
        let method = parts.next().ok_or(ParseError::MalformedRequestLine)?;
        let target = parts.next().ok_or(ParseError::MalformedRequestLine)?;
        let version = parts.next().ok_or(ParseError::MalformedRequestLine)?;
        if parts.next().is_some() || version != "HTTP/1.1" {
            return Err(ParseError::MalformedRequestLine);
        }

        let method = Method::from_str(method).map_err(|_| ParseError::MalformedRequestLine)?;
        Ok(Self { method, target: target.to_string() })
    }

    /// The HTTP version of the request line. Only 1.1 parses.
    pub fn version(&self) -> &'static str {
        "1.1"
    }

    /// The target without its query component.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }
}

/// The eagerly-parsed part of a request: line, headers and query.
#[derive(Debug)]
pub struct RequestHead {
    pub(crate) line: RequestLine,
    pub(crate) headers: Headers,
    pub(crate) query: Query,
}

impl RequestHead {
    pub(crate) fn new(line: RequestLine, headers: Headers, query: Query) -> Self {
        Self { line, headers, query }
    }

    pub fn method(&self) -> Method {
        self.line.method
    }

    pub fn target(&self) -> &str {
        &self.line.target
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// A request as seen by handlers.
#[derive(Debug)]
pub struct Request {
    line: RequestLine,
    headers: Headers,
    query: Query,
    path_params: HashMap<String, String>,
    body: Body,
    framing_checked: bool,
}

impl Request {
    pub(crate) fn from_parts(head: RequestHead, body: Body) -> Self {
        Self {
            line: head.line,
            headers: head.headers,
            query: head.query,
            path_params: HashMap::new(),
            body,
            framing_checked: false,
        }
    }

    pub fn method(&self) -> Method {
        self.line.method
    }

    /// The raw request target, including any query string.
    pub fn target(&self) -> &str {
        &self.line.target
    }

    /// The target without its query component; this is what routes
    /// match against.
    pub fn path(&self) -> &str {
        self.line.path()
    }

    pub fn version(&self) -> &'static str {
        self.line.version()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// A path parameter bound by the router, e.g. `id` for `/users/:id`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub(crate) fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    /// The transfer codings applied to the body, outermost first.
    ///
    /// Only `chunked` is supported; any other coding anywhere in the
    /// list is an [`ParseError::UnsupportedEncoding`]. Absent header
    /// means no codings.
    pub fn transfer_encodings(&self) -> Result<Option<Vec<String>>, ParseError> {
        transfer_encodings(&self.headers)
    }

    /// The declared `Content-Length`, when present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }

    /// Reads the next piece of the body.
    ///
    /// The first call validates the body framing headers. `Ok(None)`
    /// marks the end of the body; for chunked bodies any trailer fields
    /// have been merged into [`headers`](Request::headers) by then.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, ParseError> {
        if !self.framing_checked {
            self.transfer_encodings()?;
            self.framing_checked = true;
        }

        match self.body.recv().await? {
            Some(piece) => Ok(Some(piece)),
            None => {
                if let Some(trailers) = self.body.take_trailers() {
                    for (name, value) in trailers.iter() {
                        self.headers.add(name, value);
                    }
                }
                Ok(None)
            }
        }
    }

    /// Reads the whole body into one buffer.
    pub async fn body(&mut self) -> Result<Bytes, ParseError> {
        let mut buf = BytesMut::new();
        while let Some(piece) = self.chunk().await? {
            buf.extend_from_slice(&piece);
        }
        Ok(buf.freeze())
    }
}

/// Shared with the connection handler, which validates framing before
/// the request is handed to anything else.
pub(crate) fn transfer_encodings(headers: &Headers) -> Result<Option<Vec<String>>, ParseError> {
    let raw = headers.get("transfer-encoding");
    if raw.is_empty() {
        return Ok(None);
    }

    // codings are undone in reverse order of application
    let mut chunked = false;
    for coding in raw.split(',').rev() {
        if !coding.trim().eq_ignore_ascii_case("chunked") {
            return Err(ParseError::UnsupportedEncoding);
        }
        chunked = true;
    }

    Ok(chunked.then(|| vec!["chunked".to_string()]))
}

pub(crate) fn content_length(headers: &Headers) -> Option<u64> {
    let raw = headers.get("content-length");
    if raw.is_empty() {
        return None;
    }
    raw.trim().parse::<u64>().ok()
}

#[cfg(test)]
impl Request {
    /// A connectionless request for router and middleware tests.
    pub(crate) fn synthetic(method: Method, target: &str) -> Request {
        let mut headers = Headers::new();
        headers.add("Host", "localhost:42069");
        let query = match target.split_once('?') {
            Some((_, raw)) => Query::parse(raw).unwrap_or_default(),
            None => Query::default(),
        };
        Request::from_parts(
            RequestHead::new(
                RequestLine { method, target: target.to_string() },
                headers,
                query,
            ),
            Body::empty(),
        )
    }
}
