use bytes::Bytes;

use crate::protocol::Headers;

/// A decoded frame on the request side: either the head of a new request
/// or a piece of the current request's body.
#[derive(Debug)]
pub enum Message<T> {
    /// Request line, headers and query of a new request
    Head(T),
    /// A chunk of body data or the end-of-body marker
    Payload(PayloadItem),
}

/// An item in a message body stream.
///
/// `Eof` carries the trailer fields that followed a chunked body; for
/// identity and empty bodies the collection is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of body data
    Chunk(Bytes),
    /// End of the body, with any trailer fields
    Eof(Headers),
}

impl<T> Message<T> {
    /// Returns true if this message is a request head.
    #[inline]
    pub fn is_head(&self) -> bool {
        matches!(self, Message::Head(_))
    }

    /// Returns true if this message is body data or EOF.
    #[inline]
    pub fn is_payload(&self) -> bool {
        matches!(self, Message::Payload(_))
    }
}

impl PayloadItem {
    /// Returns true if this item marks the end of the body.
    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, PayloadItem::Eof(_))
    }

    /// Returns true if this item carries chunk data.
    #[inline]
    pub fn is_chunk(&self) -> bool {
        matches!(self, PayloadItem::Chunk(_))
    }

    /// Returns the chunk bytes, or `None` for the EOF marker.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof(_) => None,
        }
    }

    /// Consumes the item and returns the chunk bytes, if any.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof(_) => None,
        }
    }
}
