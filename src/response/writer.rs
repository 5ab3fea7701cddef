//! Response writer
//!
//! [`ResponseWriter`] drives a response onto a byte sink through three
//! phases that advance monotonically:
//!
//! | phase        | operation                                   |
//! |--------------|---------------------------------------------|
//! | status line  | `HTTP/1.1 <code> <reason>\r\n`              |
//! | headers      | one `name: value\r\n` per header, then `\r\n` |
//! | body         | identity copy or chunked framing + trailers |
//!
//! Repeating or skipping a phase is a [`SendError::InvalidState`]; those
//! are programmer errors and never reach the wire. Sink errors abort the
//! response with no recovery.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::codec::body::ChunkedEncoder;
use crate::protocol::{Headers, PayloadItem, SendError, StatusCode};
use crate::response::stream::{StreamWriter, TrailerSetter};
use crate::response::{BodySource, TrailerMap};

/// Read size for copying reader-backed bodies.
const COPY_BUF_SIZE: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    StatusLine,
    Headers,
    Body,
    Done,
}

/// Writes one response to a sink, enforcing the phase order.
pub struct ResponseWriter<'a, W: ?Sized> {
    sink: &'a mut W,
    state: WriterState,
    buf: BytesMut,
}

impl<'a, W> ResponseWriter<'a, W>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    pub fn new(sink: &'a mut W) -> Self {
        Self { sink, state: WriterState::StatusLine, buf: BytesMut::with_capacity(1024) }
    }

    /// Emits `HTTP/1.1 <code> <reason>\r\n`. Unknown codes get an empty
    /// reason phrase.
    pub async fn write_status_line(&mut self, status: StatusCode) -> Result<(), SendError> {
        if self.state != WriterState::StatusLine {
            return Err(SendError::InvalidState);
        }

        self.buf.put_slice(b"HTTP/1.1 ");
        self.buf.put_slice(status.as_u16().to_string().as_bytes());
        self.buf.put_slice(b" ");
        self.buf.put_slice(status.reason().as_bytes());
        self.buf.put_slice(b"\r\n");

        self.state = WriterState::Headers;
        Ok(())
    }

    /// Emits the header block and its terminating blank line, then
    /// flushes so streamed bodies reach the peer promptly.
    pub async fn write_headers(&mut self, headers: &Headers) -> Result<(), SendError> {
        if self.state != WriterState::Headers {
            return Err(SendError::InvalidState);
        }

        for (name, value) in headers.iter() {
            self.buf.put_slice(name.as_bytes());
            self.buf.put_slice(b": ");
            self.buf.put_slice(value.as_bytes());
            self.buf.put_slice(b"\r\n");
        }
        self.buf.put_slice(b"\r\n");

        self.flush_buf().await?;
        self.state = WriterState::Body;
        Ok(())
    }

    /// Copies the body source to the sink.
    ///
    /// With `chunked` set the body is framed per RFC 9112 §7 and the
    /// trailer collection is emitted after the zero chunk; otherwise
    /// bytes are copied verbatim and trailers are ignored.
    pub async fn write_body(
        &mut self,
        body: BodySource,
        chunked: bool,
        trailers: TrailerMap,
    ) -> Result<(), SendError> {
        if self.state != WriterState::Body {
            return Err(SendError::InvalidState);
        }

        let mut encoder = ChunkedEncoder::new();
        match body {
            BodySource::Empty => {}
            BodySource::Full(bytes) => {
                self.send_piece(&mut encoder, chunked, bytes).await?;
                if chunked {
                    self.send_end(&mut encoder, &trailers).await?;
                }
            }
            BodySource::Reader(mut reader) => {
                self.copy_reader(&mut encoder, chunked, &mut reader).await?;
                if chunked {
                    self.send_end(&mut encoder, &trailers).await?;
                }
            }
            BodySource::Stream(stream) => {
                let (tx, mut rx) = mpsc::channel::<std::io::Result<Bytes>>(16);
                let producer = stream.into_producer();
                let writer = StreamWriter::new(tx.clone());
                let setter = TrailerSetter::new(trailers.clone());

                tokio::spawn(async move {
                    if let Err(e) = producer(writer, setter).await {
                        let _ = tx.send(Err(e)).await;
                    }
                });

                while let Some(piece) = rx.recv().await {
                    let bytes = piece.map_err(SendError::io)?;
                    self.send_piece(&mut encoder, chunked, bytes).await?;
                }
                // channel closed: the producer is done, trailers are final
                if chunked {
                    self.send_end(&mut encoder, &trailers).await?;
                }
            }
        }

        self.sink.flush().await.map_err(SendError::io)?;
        self.state = WriterState::Done;
        Ok(())
    }

    async fn copy_reader(
        &mut self,
        encoder: &mut ChunkedEncoder,
        chunked: bool,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), SendError> {
        let mut buf = [0u8; COPY_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await.map_err(SendError::io)?;
            if n == 0 {
                return Ok(());
            }
            self.send_piece(encoder, chunked, Bytes::copy_from_slice(&buf[..n])).await?;
        }
    }

    async fn send_piece(
        &mut self,
        encoder: &mut ChunkedEncoder,
        chunked: bool,
        bytes: Bytes,
    ) -> Result<(), SendError> {
        trace!(len = bytes.len(), chunked, "writing body piece");
        if chunked {
            encoder.encode(PayloadItem::Chunk(bytes), &mut self.buf)?;
        } else {
            self.buf.put_slice(&bytes);
        }
        self.flush_buf().await
    }

    async fn send_end(
        &mut self,
        encoder: &mut ChunkedEncoder,
        trailers: &TrailerMap,
    ) -> Result<(), SendError> {
        let trailers = trailers.lock().expect("trailer collection lock").clone();
        encoder.encode(PayloadItem::Eof(trailers), &mut self.buf)?;
        self.flush_buf().await
    }

    async fn flush_buf(&mut self) -> Result<(), SendError> {
        if !self.buf.is_empty() {
            self.sink.write_all(&self.buf).await.map_err(SendError::io)?;
            self.buf.clear();
        }
        self.sink.flush().await.map_err(SendError::io)?;
        Ok(())
    }
}
