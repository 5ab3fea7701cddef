//! HTTP request decoder
//!
//! [`RequestDecoder`] turns a byte stream into [`Message`] frames: one
//! [`Message::Head`] per request, followed by that request's body as
//! [`Message::Payload`] items ending with an EOF marker. The decoder then
//! returns to head mode, which is what makes keep-alive sequencing work —
//! bytes after one request's body are the next request's head.
//!
//! Head parsing scans for the `\r\n\r\n` boundary and never consumes past
//! it, so the first body byte is still in the buffer when the payload
//! decoder takes over. The framing strategy for the body is chosen
//! syntactically here (chunked, fixed length, or none); semantic
//! validation of the framing headers stays lazy and happens when the body
//! is requested.

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::body::PayloadDecoder;
use crate::ensure;
use crate::protocol::{
    content_length, Headers, Message, ParseError, PayloadItem, Query, RequestHead, RequestLine,
};

const MAX_HEAD_BYTES: usize = 8 * 1024;

/// A decoder for HTTP requests that handles both heads and payloads.
///
/// The decoder state lives in the `payload` field:
/// - `None`: parsing a request head
/// - `Some(PayloadDecoder)`: streaming the current request's body
pub struct RequestDecoder {
    payload: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// True while the current request's body has not reached EOF.
    pub fn mid_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self { payload: None }
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<RequestHead>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // stream the current body if one is in progress
        if let Some(payload) = &mut self.payload {
            let message = match payload.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof(_)) => {
                    self.payload.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        let Some(end) = find_head_end(src) else {
            ensure!(
                src.len() <= MAX_HEAD_BYTES,
                ParseError::too_large_head(src.len(), MAX_HEAD_BYTES)
            );
            return Ok(None);
        };
        ensure!(end <= MAX_HEAD_BYTES, ParseError::too_large_head(end, MAX_HEAD_BYTES));

        let head_bytes = src.split_to(end);
        let head = parse_head(&head_bytes[..end - 4])?;
        trace!(method = %head.method(), target = head.target(), "parsed request head");

        self.payload = Some(payload_decoder_for(&head));
        Ok(Some(Message::Head(head)))
    }

    /// Reports truncated requests when the stream ends.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload) = &mut self.payload {
            return match payload.decode(src)? {
                Some(item @ PayloadItem::Eof(_)) => {
                    self.payload.take();
                    Ok(Some(Message::Payload(item)))
                }
                Some(item) => Ok(Some(Message::Payload(item))),
                None => Err(ParseError::Incomplete),
            };
        }

        if src.is_empty() {
            Ok(None)
        } else {
            Err(ParseError::Incomplete)
        }
    }
}

/// Index one past the `\r\n\r\n` head terminator, if present.
fn find_head_end(src: &[u8]) -> Option<usize> {
    src.windows(4).position(|w| w == b"\r\n\r\n").map(|idx| idx + 4)
}

/// Parses the head block (without its terminating blank line).
fn parse_head(block: &[u8]) -> Result<RequestHead, ParseError> {
    let mut lines = CrlfLines::new(block);

    let line = lines.next().ok_or(ParseError::MalformedRequestLine)?;
    let request_line = RequestLine::parse(line)?;

    let mut headers = Headers::new();
    for field_line in lines {
        headers.parse_field_line(field_line)?;
    }

    let query = match request_line.target.split_once('?') {
        Some((_, raw)) => Query::parse(raw)?,
        None => Query::default(),
    };

    Ok(RequestHead::new(request_line, headers, query))
}

/// Chooses the body framing from the head's headers.
///
/// An unusable `Transfer-Encoding` maps to an empty body here; the error
/// is surfaced when the body is requested or by the connection's framing
/// validation. A non-numeric `Content-Length` also means no body.
fn payload_decoder_for(head: &RequestHead) -> PayloadDecoder {
    let te = head.headers().get("transfer-encoding");
    if !te.is_empty() {
        return if is_chunked(te) { PayloadDecoder::chunked() } else { PayloadDecoder::empty() };
    }

    match content_length(head.headers()) {
        Some(n) if n > 0 => PayloadDecoder::fixed_length(n),
        _ => PayloadDecoder::empty(),
    }
}

/// The last coding decides whether the body is chunked-framed.
fn is_chunked(te: &str) -> bool {
    te.rsplit(',')
        .next()
        .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}

/// Iterator over CRLF-separated lines of a head block.
struct CrlfLines<'a> {
    rest: Option<&'a [u8]>,
}

impl<'a> CrlfLines<'a> {
    fn new(block: &'a [u8]) -> Self {
        Self { rest: Some(block) }
    }
}

impl<'a> Iterator for CrlfLines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest?;
        match rest.windows(2).position(|w| w == b"\r\n") {
            Some(idx) => {
                self.rest = Some(&rest[idx + 2..]);
                Some(&rest[..idx])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}
