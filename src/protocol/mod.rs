//! Protocol data model: headers, methods, status codes, requests and the
//! message frames exchanged with the codec layer.

pub(crate) mod body;
mod error;
mod headers;
mod message;
mod method;
mod query;
mod request;
mod status;

pub use error::{HttpError, ParseError, SendError};
pub use headers::Headers;
pub use message::{Message, PayloadItem};
pub use method::Method;
pub use query::Query;
pub use request::{Request, RequestHead, RequestLine};
pub use status::StatusCode;

pub(crate) use request::{content_length, transfer_encodings};
