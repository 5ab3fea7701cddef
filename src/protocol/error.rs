//! Error types for HTTP protocol handling
//!
//! Two error families cover the two directions of the wire:
//!
//! - [`ParseError`]: anything that goes wrong while reading a request,
//!   from a malformed request line to a truncated chunked body.
//! - [`SendError`]: anything that goes wrong while writing a response,
//!   including misuse of the response writer's phase machine.
//!
//! [`HttpError`] wraps both so the connection loop can expose a single
//! error type at its boundary.

use std::io;
use thiserror::Error;

/// The top-level error type for a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Errors that occur while reading and parsing a request
    #[error("request error: {source}")]
    Request {
        #[from]
        source: ParseError,
    },

    /// Errors that occur while writing a response
    #[error("response error: {source}")]
    Response {
        #[from]
        source: SendError,
    },
}

/// Errors that occur during HTTP request parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Request line does not match `METHOD SP target SP HTTP/1.1`
    #[error("malformed request line")]
    MalformedRequestLine,

    /// A field line violates the token or field-value rules
    #[error("malformed header line")]
    MalformedHeader,

    /// The query string contains an invalid percent escape
    #[error("malformed query string")]
    MalformedQuery,

    /// Stream ended before the request was complete
    #[error("incomplete request")]
    Incomplete,

    /// A transfer coding other than chunked was requested
    #[error("transfer coding not supported")]
    UnsupportedEncoding,

    /// Chunked body framing is invalid
    #[error("invalid chunked body: {reason}")]
    InvalidChunk { reason: &'static str },

    /// Header block exceeds the maximum allowed size
    #[error("header block too large, current: {current_size} exceeds the limit {max_size}")]
    TooLargeHead { current_size: usize, max_size: usize },

    /// I/O error during parsing
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    /// Creates a new InvalidChunk error
    pub fn invalid_chunk(reason: &'static str) -> Self {
        Self::InvalidChunk { reason }
    }

    /// Creates a new TooLargeHead error
    pub fn too_large_head(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHead { current_size, max_size }
    }

    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors that occur during HTTP response generation and sending.
#[derive(Error, Debug)]
pub enum SendError {
    /// A writer phase was driven out of order; these are programmer
    /// errors and never reach the wire
    #[error("invalid writer state")]
    InvalidState,

    /// I/O error during sending
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {

    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
