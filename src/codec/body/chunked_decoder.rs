//! Decoder for chunked transfer encoding (RFC 9112 §7.1).
//!
//! Each chunk is `hex-size [;extensions] CRLF data CRLF`; extensions are
//! accepted and ignored. A zero-sized chunk ends the body, after which
//! trailer field lines are collected up to a blank line and handed back
//! inside the EOF marker so the request can merge them into its headers.

use std::mem;
use std::task::Poll;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{Headers, ParseError, PayloadItem};

use ChunkedState::*;

/// Trailer lines share the limit of a reasonable field line.
const MAX_TRAILER_LINE: usize = 8 * 1024;

/// A decoder for chunked transfer encoded bodies.
///
/// The decoder is a per-byte state machine. Chunk data is streamed out as
/// it arrives, so one wire chunk may surface as several decoded chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
    line: Vec<u8>,
    trailers: Headers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    /// Read the chunk size in hex
    Size,
    /// Whitespace after the size
    SizeLws,
    /// Skip chunk extensions
    Extension,
    /// LF ending the size line
    SizeLf,
    /// Chunk data
    Body,
    /// CR after chunk data
    BodyCr,
    /// LF after chunk data
    BodyLf,
    /// Collect a trailer field line (or the final blank line)
    Trailer,
    /// LF ending a trailer line
    TrailerLf,
    /// Body and trailers fully read
    End,
}

macro_rules! try_next_byte {
    ($src:ident) => {{
        if $src.len() > 0 {
            $src.get_u8()
        } else {
            return Poll::Pending;
        }
    }};
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0, line: Vec::new(), trailers: Headers::new() }
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    /// Decodes chunked data from the input buffer.
    ///
    /// # Returns
    /// - `Ok(Some(PayloadItem::Chunk(bytes)))` when chunk data is available
    /// - `Ok(Some(PayloadItem::Eof(trailers)))` after the final chunk and
    ///   its trailer block
    /// - `Ok(None)` when more data is needed
    /// - `Err(ParseError)` if the framing or a trailer line is invalid
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                trace!("finished reading chunked body");
                return Ok(Some(PayloadItem::Eof(mem::take(&mut self.trailers))));
            }

            if src.is_empty() {
                // need more data
                return Ok(None);
            }

            let mut buf = None;
            self.state = match self.step(src, &mut buf) {
                Poll::Pending => return Ok(None),
                Poll::Ready(Ok(next)) => next,
                Poll::Ready(Err(e)) => return Err(e),
            };

            if let Some(bytes) = buf {
                trace!(len = bytes.len(), "read chunked bytes");
                return Ok(Some(PayloadItem::Chunk(bytes)));
            }
        }
    }
}

impl ChunkedDecoder {
    fn step(
        &mut self,
        src: &mut BytesMut,
        buf: &mut Option<Bytes>,
    ) -> Poll<Result<ChunkedState, ParseError>> {
        match self.state {
            Size => self.read_size(src),
            SizeLws => Self::read_size_lws(src),
            Extension => Self::read_extension(src),
            SizeLf => self.read_size_lf(src),
            Body => self.read_body(src, buf),
            BodyCr => Self::read_body_cr(src),
            BodyLf => Self::read_body_lf(src),
            Trailer => self.read_trailer(src),
            TrailerLf => self.read_trailer_lf(src),
            End => Poll::Ready(Ok(End)),
        }
    }

    /// Accumulates the hexadecimal chunk size one digit at a time until a
    /// delimiter is seen.
    fn read_size(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        macro_rules! or_overflow {
            ($e:expr) => {
                match $e {
                    Some(val) => val,
                    None => {
                        return Poll::Ready(Err(ParseError::invalid_chunk("chunk length overflow")))
                    }
                }
            };
        }

        let radix = 16;
        match try_next_byte!(src) {
            b @ b'0'..=b'9' => {
                self.remaining_size = or_overflow!(self.remaining_size.checked_mul(radix));
                self.remaining_size =
                    or_overflow!(self.remaining_size.checked_add((b - b'0') as u64));
            }
            b @ b'a'..=b'f' => {
                self.remaining_size = or_overflow!(self.remaining_size.checked_mul(radix));
                self.remaining_size =
                    or_overflow!(self.remaining_size.checked_add((b + 10 - b'a') as u64));
            }
            b @ b'A'..=b'F' => {
                self.remaining_size = or_overflow!(self.remaining_size.checked_mul(radix));
                self.remaining_size =
                    or_overflow!(self.remaining_size.checked_add((b + 10 - b'A') as u64));
            }
            b'\t' | b' ' => return Poll::Ready(Ok(SizeLws)),
            b';' => return Poll::Ready(Ok(Extension)),
            b'\r' => return Poll::Ready(Ok(SizeLf)),
            _ => return Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk size"))),
        }

        Poll::Ready(Ok(Size))
    }

    /// Only tabs and spaces may follow the size; no more digits.
    fn read_size_lws(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\t' | b' ' => Poll::Ready(Ok(SizeLws)),
            b';' => Poll::Ready(Ok(Extension)),
            b'\r' => Poll::Ready(Ok(SizeLf)),
            _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid whitespace after chunk size"))),
        }
    }

    /// Extensions are ignored; they end at the next CRLF. A bare LF is
    /// rejected so sloppy peers cannot smuggle a line ending.
    fn read_extension(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(SizeLf)),
            b'\n' => Poll::Ready(Err(ParseError::invalid_chunk("chunk extension contains newline"))),
            _ => Poll::Ready(Ok(Extension)),
        }
    }

    fn read_size_lf(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\n' => {
                if self.remaining_size == 0 {
                    Poll::Ready(Ok(Trailer))
                } else {
                    Poll::Ready(Ok(Body))
                }
            }
            _ => Poll::Ready(Err(ParseError::invalid_chunk("invalid chunk size LF"))),
        }
    }

    /// Streams out up to `remaining_size` bytes of chunk data.
    fn read_body(
        &mut self,
        src: &mut BytesMut,
        buf: &mut Option<Bytes>,
    ) -> Poll<Result<ChunkedState, ParseError>> {
        if src.is_empty() {
            return Poll::Ready(Ok(Body));
        }

        if self.remaining_size == 0 {
            return Poll::Ready(Ok(BodyCr));
        }

        let remaining = usize::try_from(self.remaining_size).unwrap_or(usize::MAX);
        let read_size = std::cmp::min(remaining, src.len());

        self.remaining_size -= read_size as u64;
        *buf = Some(src.split_to(read_size).freeze());

        if self.remaining_size > 0 {
            Poll::Ready(Ok(Body))
        } else {
            Poll::Ready(Ok(BodyCr))
        }
    }

    fn read_body_cr(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(BodyLf)),
            _ => Poll::Ready(Err(ParseError::invalid_chunk("missing CR after chunk data"))),
        }
    }

    fn read_body_lf(src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\n' => Poll::Ready(Ok(Size)),
            _ => Poll::Ready(Err(ParseError::invalid_chunk("missing LF after chunk data"))),
        }
    }

    /// Collects one trailer line byte-by-byte. An empty line ends the
    /// trailer block.
    fn read_trailer(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\r' => Poll::Ready(Ok(TrailerLf)),
            b => {
                if self.line.len() >= MAX_TRAILER_LINE {
                    return Poll::Ready(Err(ParseError::invalid_chunk("trailer line too long")));
                }
                self.line.push(b);
                Poll::Ready(Ok(Trailer))
            }
        }
    }

    fn read_trailer_lf(&mut self, src: &mut BytesMut) -> Poll<Result<ChunkedState, ParseError>> {
        match try_next_byte!(src) {
            b'\n' => {
                if self.line.is_empty() {
                    return Poll::Ready(Ok(End));
                }
                let line = mem::take(&mut self.line);
                match self.trailers.parse_field_line(&line) {
                    Ok(()) => Poll::Ready(Ok(Trailer)),
                    Err(e) => Poll::Ready(Err(e)),
                }
            }
            _ => Poll::Ready(Err(ParseError::invalid_chunk("missing LF after trailer line"))),
        }
    }
}
