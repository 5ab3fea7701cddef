//! Wire codecs: the request decoder and the body framing
//! encoders/decoders it is built from.

pub mod body;
mod request_decoder;

pub use request_decoder::RequestDecoder;
