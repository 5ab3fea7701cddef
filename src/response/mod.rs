//! Response model
//!
//! A [`Response`] is a value: status code, header collection and an
//! optional [`BodySource`]. Handlers build one with the fluent `with_*`
//! mutators (or a factory like [`Response::text`]) and the connection
//! consumes it by writing it to the socket. Writing goes through the
//! three-phase [`ResponseWriter`](crate::response::ResponseWriter), so a
//! response's bytes always appear as status line, header block, body.

mod file;
mod html;
mod json;
mod redirect;
mod stream;
mod text;
mod writer;

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::{Headers, SendError, StatusCode};

pub use stream::{StreamBody, StreamWriter, TrailerSetter};
pub use writer::ResponseWriter;

/// Shared trailer collection, filled by a stream producer and read by
/// the writer after the body completes.
pub(crate) type TrailerMap = Arc<Mutex<Headers>>;

/// The source of a response body.
pub enum BodySource {
    /// No body
    Empty,
    /// A complete in-memory body
    Full(Bytes),
    /// A finite byte source copied (or chunk-framed) to the sink
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A producer callback running concurrently with the writer
    Stream(StreamBody),
}

impl BodySource {
    /// A reader-backed body.
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        BodySource::Reader(Box::new(reader))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BodySource::Empty)
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodySource::Empty => f.write_str("BodySource::Empty"),
            BodySource::Full(bytes) => write!(f, "BodySource::Full({} bytes)", bytes.len()),
            BodySource::Reader(_) => f.write_str("BodySource::Reader"),
            BodySource::Stream(_) => f.write_str("BodySource::Stream"),
        }
    }
}

impl From<Bytes> for BodySource {
    fn from(bytes: Bytes) -> Self {
        BodySource::Full(bytes)
    }
}

impl From<Vec<u8>> for BodySource {
    fn from(bytes: Vec<u8>) -> Self {
        BodySource::Full(bytes.into())
    }
}

impl From<String> for BodySource {
    fn from(body: String) -> Self {
        BodySource::Full(body.into())
    }
}

impl From<&'static str> for BodySource {
    fn from(body: &'static str) -> Self {
        BodySource::Full(Bytes::from_static(body.as_bytes()))
    }
}

/// An HTTP response value.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: BodySource,
    trailers: TrailerMap,
}

impl Response {
    /// An empty 200 response.
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: Headers::new(),
            body: BodySource::Empty,
            trailers: Arc::new(Mutex::new(Headers::new())),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &BodySource {
        &self.body
    }

    /// Sets the status code.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Adds a header (folding onto an existing one).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Adds a batch of headers.
    pub fn with_headers<'a>(mut self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (name, value) in headers {
            self.headers.add(name, value);
        }
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<BodySource>) -> Self {
        self.body = body.into();
        self
    }

    /// Drops the body, keeping status and headers. Used for HEAD.
    pub fn without_body(mut self) -> Self {
        self.body = BodySource::Empty;
        self
    }

    pub(crate) fn trailer_map(&self) -> TrailerMap {
        Arc::clone(&self.trailers)
    }

    /// Writes the response to a byte sink, consuming it.
    ///
    /// The body is chunk-framed when the response declares
    /// `Transfer-Encoding: chunked`, and copied verbatim otherwise.
    pub async fn write<W>(self, sink: &mut W) -> Result<(), SendError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Response { status, headers, body, trailers } = self;
        let chunked = is_chunked_response(&headers);

        let mut writer = ResponseWriter::new(sink);
        writer.write_status_line(status).await?;
        writer.write_headers(&headers).await?;
        if !body.is_empty() {
            writer.write_body(body, chunked, trailers).await?;
        }
        Ok(())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

fn is_chunked_response(headers: &Headers) -> bool {
    headers
        .get("transfer-encoding")
        .rsplit(',')
        .next()
        .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}
