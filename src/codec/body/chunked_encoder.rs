//! Encoder for chunked transfer encoding.
//!
//! Chunks are framed as `hex-size CRLF data CRLF`. The EOF marker writes
//! the zero chunk, then one field line per trailer, then the final CRLF —
//! trailers are always emitted strictly after the zero chunk.

use bytes::BytesMut;
use tokio_util::codec::Encoder;

use crate::protocol::{PayloadItem, SendError};

/// An encoder producing chunked transfer encoded output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkedEncoder {
    /// Set once the final zero-length chunk has been written
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the terminating chunk has been written.
    pub fn is_finished(&self) -> bool {
        self.eof
    }
}

impl Encoder<PayloadItem> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(bytes) => {
                // an empty chunk would read as the terminator
                if bytes.is_empty() {
                    return Ok(());
                }
                dst.extend_from_slice(format!("{:X}\r\n", bytes.len()).as_bytes());
                dst.reserve(bytes.len() + 2);
                dst.extend_from_slice(&bytes);
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof(trailers) => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n");
                for (name, value) in trailers.iter() {
                    dst.extend_from_slice(name.as_bytes());
                    dst.extend_from_slice(b": ");
                    dst.extend_from_slice(value.as_bytes());
                    dst.extend_from_slice(b"\r\n");
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::body::ChunkedDecoder;
    use crate::protocol::Headers;
    use bytes::Bytes;
    use tokio_util::codec::Decoder;

    #[test]
    fn frames_chunks_and_terminator() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof(Headers::new()), &mut dst).unwrap();

        assert_eq!(&dst[..], b"5\r\nhello\r\n0\r\n\r\n");
        assert!(encoder.is_finished());
    }

    #[test]
    fn trailers_follow_the_zero_chunk() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();
        let mut trailers = Headers::new();
        trailers.add("X-Checksum", "abc123");

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"data")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof(trailers), &mut dst).unwrap();

        assert_eq!(&dst[..], b"4\r\ndata\r\n0\r\nx-checksum: abc123\r\n\r\n");
    }

    #[test]
    fn nothing_after_eof() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Eof(Headers::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"late")), &mut dst).unwrap();

        assert_eq!(&dst[..], b"0\r\n\r\n");
    }

    #[test]
    fn empty_chunks_are_skipped() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        assert!(dst.is_empty());
    }

    #[test]
    fn encode_then_decode_round_trips_with_trailers() {
        let mut encoder = ChunkedEncoder::new();
        let mut wire = BytesMut::new();
        let mut trailers = Headers::new();
        trailers.add("Expires", "Wed, 21 Oct 2015 07:28:00 GMT");

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"round ")), &mut wire).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"trip")), &mut wire).unwrap();
        encoder.encode(PayloadItem::Eof(trailers.clone()), &mut wire).unwrap();

        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        loop {
            match decoder.decode(&mut wire).unwrap().unwrap() {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof(decoded_trailers) => {
                    assert_eq!(decoded_trailers, trailers);
                    break;
                }
            }
        }
        assert_eq!(&body[..], b"round trip");
    }
}
