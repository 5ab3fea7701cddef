//! Lazy request bodies
//!
//! The connection task owns the framed byte stream; handlers run on the
//! same task but hold an owned [`Request`](crate::protocol::Request). The
//! body crosses that gap through a small bounded channel: a [`BodyPump`]
//! drains payload frames from the decoder and forwards them, and the
//! request's [`Body`] receives them on demand. The channel is bounded so
//! body bytes are only pulled off the socket roughly as fast as the
//! handler consumes them.
//!
//! The pump runs concurrently with the handler (driven by the
//! connection's `select!`), and after the handler returns the connection
//! uses [`BodyPump::drain`] to discard whatever part of the body was
//! never read, leaving the stream at a clean request boundary for
//! keep-alive.

use std::convert::Infallible;
use std::future;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_util::codec::FramedRead;
use tracing::trace;

use crate::codec::RequestDecoder;
use crate::protocol::{Headers, Message, ParseError, PayloadItem, RequestHead};

/// One event on the body channel.
#[derive(Debug)]
pub(crate) enum BodyEvent {
    Chunk(Bytes),
    End(Headers),
    Failed(ParseError),
}

/// The receiving half owned by a [`Request`](crate::protocol::Request).
#[derive(Debug)]
pub(crate) struct Body {
    rx: Option<mpsc::Receiver<BodyEvent>>,
    trailers: Option<Headers>,
    done: bool,
}

/// Creates the channel pair for one request body.
pub(crate) fn body_channel() -> (mpsc::Sender<BodyEvent>, Body) {
    let (tx, rx) = mpsc::channel(2);
    (tx, Body { rx: Some(rx), trailers: None, done: false })
}

impl Body {
    /// A body that yields EOF immediately, for synthetic requests.
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self { rx: None, trailers: None, done: true }
    }

    /// Receives the next chunk; `Ok(None)` is end-of-body. Trailers are
    /// stashed for the request to merge.
    pub(crate) async fn recv(&mut self) -> Result<Option<Bytes>, ParseError> {
        if self.done {
            return Ok(None);
        }
        let Some(rx) = &mut self.rx else {
            self.done = true;
            return Ok(None);
        };

        match rx.recv().await {
            Some(BodyEvent::Chunk(bytes)) => Ok(Some(bytes)),
            Some(BodyEvent::End(trailers)) => {
                self.done = true;
                self.trailers = Some(trailers);
                Ok(None)
            }
            Some(BodyEvent::Failed(e)) => {
                self.done = true;
                Err(e)
            }
            // pump went away without sending End
            None => {
                self.done = true;
                Err(ParseError::Incomplete)
            }
        }
    }

    pub(crate) fn take_trailers(&mut self) -> Option<Headers> {
        self.trailers.take()
    }
}

/// Forwards payload frames from the framed stream into a body channel.
pub(crate) struct BodyPump<'a, R> {
    framed: &'a mut FramedRead<R, RequestDecoder>,
    tx: Option<mpsc::Sender<BodyEvent>>,
    deadline: Option<Instant>,
    finished: bool,
    failed: bool,
}

impl<'a, R: AsyncRead + Unpin> BodyPump<'a, R> {
    pub(crate) fn new(
        framed: &'a mut FramedRead<R, RequestDecoder>,
        tx: mpsc::Sender<BodyEvent>,
        deadline: Option<Instant>,
    ) -> Self {
        Self { framed, tx: Some(tx), deadline, finished: false, failed: false }
    }

    /// Runs the pump. Never resolves: once the body is forwarded (or the
    /// receiver is gone) it parks, so the connection's `select!` always
    /// exits through the handler branch.
    pub(crate) async fn run(&mut self) -> Infallible {
        self.forward().await;
        future::pending().await
    }

    async fn forward(&mut self) {
        while !self.finished {
            let frame = match self.next_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    self.finished = true;
                    self.failed = true;
                    self.send(BodyEvent::Failed(e)).await;
                    return;
                }
            };

            match frame {
                Some(Message::Payload(PayloadItem::Chunk(bytes))) => {
                    trace!(len = bytes.len(), "forwarding body chunk");
                    if !self.send(BodyEvent::Chunk(bytes)).await {
                        // receiver gone; leave the rest for drain
                        return;
                    }
                }
                Some(Message::Payload(PayloadItem::Eof(trailers))) => {
                    self.finished = true;
                    self.send(BodyEvent::End(trailers)).await;
                }
                // the decoder yields heads only between bodies
                Some(Message::Head(_)) | None => {
                    self.finished = true;
                    self.failed = true;
                    self.send(BodyEvent::Failed(ParseError::Incomplete)).await;
                }
            }
        }
    }

    /// Consumes any part of the body still on the wire so the next
    /// request starts at a clean boundary.
    pub(crate) async fn drain(&mut self) -> Result<(), ParseError> {
        self.tx = None;
        if self.failed {
            return Err(ParseError::Incomplete);
        }

        while !self.finished {
            match self.next_frame().await? {
                Some(Message::Payload(PayloadItem::Eof(_))) => self.finished = true,
                Some(Message::Payload(PayloadItem::Chunk(_))) => {}
                Some(Message::Head(_)) | None => {
                    self.failed = true;
                    return Err(ParseError::Incomplete);
                }
            }
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<Message<RequestHead>>, ParseError> {
        match self.deadline {
            Some(deadline) => match timeout_at(deadline, self.framed.next()).await {
                Ok(item) => item.transpose(),
                Err(_) => Err(ParseError::io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "request read timed out",
                ))),
            },
            None => self.framed.next().await.transpose(),
        }
    }

    /// Sends an event; returns false once the receiver is gone.
    async fn send(&mut self, event: BodyEvent) -> bool {
        let Some(tx) = self.tx.clone() else {
            return false;
        };
        if tx.send(event).await.is_err() {
            self.tx = None;
            return false;
        }
        true
    }
}
