//! Streamed responses
//!
//! A stream response's body is produced by a caller-supplied async
//! callback that runs on its own task, connected to the writer by an
//! in-memory pipe. The callback receives a [`StreamWriter`] for body
//! bytes and a [`TrailerSetter`] that accumulates trailer fields; when it
//! returns, the pipe closes and the writer emits the zero chunk followed
//! by the collected trailers. A callback error closes the pipe with that
//! error and aborts the response.

use std::future::Future;
use std::io;

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::response::{Response, TrailerMap};

type BoxProducer =
    Box<dyn FnOnce(StreamWriter, TrailerSetter) -> BoxFuture<'static, io::Result<()>> + Send>;

/// The deferred producer of a streamed body.
///
/// The producer task is only spawned once the response reaches the
/// writer's body phase.
pub struct StreamBody {
    producer: BoxProducer,
}

impl StreamBody {
    pub(crate) fn into_producer(self) -> BoxProducer {
        self.producer
    }
}

/// The byte sink handed to a stream producer.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl StreamWriter {
    pub(crate) fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx }
    }

    /// Writes one piece of the body. Bytes are framed in exactly the
    /// order they are written here.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> io::Result<()> {
        self.tx
            .send(Ok(data.into()))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response writer closed"))
    }
}

/// Accumulates trailer fields for a streamed response.
///
/// Values set here are emitted after the final zero chunk. Invalid names
/// or values are dropped by the underlying header collection.
#[derive(Debug, Clone)]
pub struct TrailerSetter {
    map: TrailerMap,
}

impl TrailerSetter {
    pub(crate) fn new(map: TrailerMap) -> Self {
        Self { map }
    }

    pub fn set(&self, name: &str, value: &str) {
        self.map.lock().expect("trailer collection lock").add(name, value);
    }
}

impl Response {
    /// A response whose body is produced by `producer`, streamed with
    /// chunked framing.
    ///
    /// Declared trailer names are advertised in the `Trailer` header;
    /// their values are whatever the producer has set by the time the
    /// body ends.
    pub fn stream<F, Fut>(trailer_names: &[&str], producer: F) -> Response
    where
        F: FnOnce(StreamWriter, TrailerSetter) -> Fut + Send + 'static,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        let mut response =
            Response::new().with_header("transfer-encoding", "chunked");
        if !trailer_names.is_empty() {
            response = response.with_header("trailer", &trailer_names.join(", "));
        }

        let boxed: BoxProducer = Box::new(move |writer, setter| Box::pin(producer(writer, setter)));
        response.with_body(crate::response::BodySource::Stream(StreamBody { producer: boxed }))
    }
}
