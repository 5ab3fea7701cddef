//! Per-connection request/response loop
//!
//! One task owns the connection for its whole life. Each cycle: wait for
//! a request head (bounded by the keep-alive deadline), validate it,
//! run the handler while a body pump streams the request body to it,
//! stamp and write the response, then drain whatever part of the body
//! the handler left unread so the next request starts at a clean
//! boundary.
//!
//! Parse and validation failures answer 400 with an empty body and close
//! the connection. Handler panics are caught and turned into a response
//! by the recovery callback; the connection closes afterwards. Write
//! failures close without attempting another response.

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace};

use crate::codec::RequestDecoder;
use crate::handler::{ArcHandler, Recovery};
use crate::protocol::body::{body_channel, BodyPump};
use crate::protocol::{
    transfer_encodings, HttpError, Message, Request, RequestHead, SendError, StatusCode,
};
use crate::response::Response;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connection-level knobs shared by all connections of one server.
pub(crate) struct ConnConfig {
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) keep_alive_timeout: Option<Duration>,
    pub(crate) recovery: Recovery,
}

enum HeadOutcome {
    Head(RequestHead),
    Close,
    BadRequest,
}

pub(crate) async fn serve_connection<S>(
    stream: S,
    handler: ArcHandler,
    config: Arc<ConnConfig>,
    shutdown: CancellationToken,
) -> Result<(), HttpError>
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut framed = FramedRead::with_capacity(read_half, RequestDecoder::new(), READ_BUFFER_SIZE);

    // without keep-alive the connection serves a single request
    let close = config.keep_alive_timeout.is_none();

    loop {
        let head = match next_head(&mut framed, &config).await {
            HeadOutcome::Head(head) => head,
            HeadOutcome::Close => break,
            HeadOutcome::BadRequest => {
                write_bad_request(&mut write_half, &config).await?;
                break;
            }
        };

        if !validate_head(&head) {
            write_bad_request(&mut write_half, &config).await?;
            break;
        }

        if head.headers().get("expect").starts_with("100-") {
            write_half
                .write_all(b"HTTP/1.1 100 Continue\r\n\r\n")
                .await
                .map_err(SendError::io)?;
            write_half.flush().await.map_err(SendError::io)?;
            trace!("sent 100 Continue");
        }

        let read_deadline = config.read_timeout.map(|t| Instant::now() + t);
        let (body_tx, body) = body_channel();
        let mut request = Request::from_parts(head, body);
        let mut pump = BodyPump::new(&mut framed, body_tx, read_deadline);

        // the handler and the body pump run concurrently on this task;
        // the pump never resolves, so the select exits with the handler
        let caught = {
            let handler_fut =
                std::panic::AssertUnwindSafe(handler.call(&mut request)).catch_unwind();
            tokio::pin!(handler_fut);
            let pump_fut = pump.run();
            tokio::pin!(pump_fut);

            tokio::select! {
                biased;
                result = &mut handler_fut => result,
                never = &mut pump_fut => match never {},
            }
        };

        let mut response = match caught {
            Ok(response) => response,
            Err(panic) => {
                let response = (config.recovery)(panic);
                let _ = write_response(&mut write_half, response, &config).await;
                break;
            }
        };

        response.headers_mut().remove("date");
        response
            .headers_mut()
            .add("date", &httpdate::fmt_http_date(SystemTime::now()));
        if close {
            response.headers_mut().set("connection", "close");
        }

        // conditional response: matching validators collapse to 304
        let response_etag = response.headers().get("etag").to_string();
        let if_none_match = request.headers().get("if-none-match");
        if !response_etag.is_empty() && !if_none_match.is_empty() && response_etag == if_none_match
        {
            response = Response::new().with_status(StatusCode::NOT_MODIFIED);
        }

        if let Err(e) = write_response(&mut write_half, response, &config).await {
            error!(cause = %e, "failed to write response");
            break;
        }

        if request
            .headers()
            .get("connection")
            .trim()
            .eq_ignore_ascii_case("close")
        {
            break;
        }

        if close || shutdown.is_cancelled() {
            break;
        }

        if let Err(e) = pump.drain().await {
            trace!(cause = %e, "failed to drain request body");
            break;
        }
    }

    Ok(())
}

/// Waits for the next request head. Keep-alive expiry closes silently;
/// a read timeout (with keep-alive disabled) and parse failures answer
/// 400.
async fn next_head<R>(
    framed: &mut FramedRead<R, RequestDecoder>,
    config: &ConnConfig,
) -> HeadOutcome
where
    R: AsyncRead + Unpin,
{
    let frame = if let Some(idle) = config.keep_alive_timeout {
        match timeout(idle, framed.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                trace!("keep-alive deadline expired");
                return HeadOutcome::Close;
            }
        }
    } else if let Some(read) = config.read_timeout {
        match timeout(read, framed.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                info!("request read deadline expired");
                return HeadOutcome::BadRequest;
            }
        }
    } else {
        framed.next().await
    };

    match frame {
        None => {
            trace!("peer closed the connection");
            HeadOutcome::Close
        }
        Some(Ok(Message::Head(head))) => HeadOutcome::Head(head),
        Some(Ok(Message::Payload(_))) => {
            error!("received a body frame while expecting a request head");
            HeadOutcome::BadRequest
        }
        Some(Err(e)) => {
            info!(cause = %e, "failed to parse request");
            HeadOutcome::BadRequest
        }
    }
}

/// Host must be present exactly once; Content-Length and
/// Transfer-Encoding are mutually exclusive; the coding list must
/// resolve to chunked.
fn validate_head(head: &RequestHead) -> bool {
    let headers = head.headers();

    let host = headers.get("host");
    if host.is_empty() || host.contains(',') {
        return false;
    }

    if !headers.get("content-length").is_empty() && !headers.get("transfer-encoding").is_empty() {
        return false;
    }

    transfer_encodings(headers).is_ok()
}

async fn write_bad_request<W>(sink: &mut W, config: &ConnConfig) -> Result<(), HttpError>
where
    W: AsyncWrite + Unpin,
{
    let response = Response::new().with_status(StatusCode::BAD_REQUEST);
    write_response(sink, response, config).await.map_err(HttpError::from)
}

async fn write_response<W>(
    sink: &mut W,
    response: Response,
    config: &ConnConfig,
) -> Result<(), SendError>
where
    W: AsyncWrite + Unpin,
{
    match config.write_timeout {
        Some(limit) => match timeout(limit, response.write(sink)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::io(io::Error::new(
                io::ErrorKind::TimedOut,
                "response write timed out",
            ))),
        },
        None => response.write(sink).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::server::default_recovery;
    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;

    struct Hello;

    #[async_trait]
    impl Handler for Hello {
        async fn call(&self, _req: &mut Request) -> Response {
            Response::text("hello")
        }
    }

    struct EchoBody;

    #[async_trait]
    impl Handler for EchoBody {
        async fn call(&self, req: &mut Request) -> Response {
            let body = req.body().await.unwrap();
            let expires = req.headers().get("expires").to_string();

            let mut response =
                Response::text(String::from_utf8(body.to_vec()).unwrap());
            if !expires.is_empty() {
                response = response.with_header("expires", &expires);
            }
            response
        }
    }

    fn config(keep_alive: Option<Duration>) -> Arc<ConnConfig> {
        Arc::new(ConnConfig {
            read_timeout: None,
            write_timeout: None,
            keep_alive_timeout: keep_alive,
            recovery: default_recovery(),
        })
    }

    async fn exchange(
        input: &str,
        handler: ArcHandler,
        config: Arc<ConnConfig>,
    ) -> String {
        let (mut client, server) = tokio::io::duplex(256 * 1024);
        let task = tokio::spawn(serve_connection(
            server,
            handler,
            config,
            CancellationToken::new(),
        ));

        client.write_all(input.as_bytes()).await.unwrap();
        client.shutdown().await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        task.await.unwrap().unwrap();

        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn serves_a_simple_request() {
        let out = exchange(
            "GET /coffee HTTP/1.1\r\nHost: localhost:42069\r\n\r\n",
            Arc::new(Hello),
            config(None),
        )
        .await;

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("date: "));
        // keep-alive disabled: the server announces the close
        assert!(out.contains("connection: close\r\n"));
        assert!(out.ends_with("hello"));
    }

    #[tokio::test]
    async fn missing_host_is_bad_request() {
        let out = exchange("GET / HTTP/1.1\r\n\r\n", Arc::new(Hello), config(None)).await;
        assert_eq!(out, "HTTP/1.1 400 Bad Request\r\n\r\n");
    }

    #[tokio::test]
    async fn duplicated_host_is_bad_request() {
        let out = exchange(
            "GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n",
            Arc::new(Hello),
            config(None),
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn conflicting_framing_is_bad_request() {
        let out = exchange(
            "POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\nbody",
            Arc::new(Hello),
            config(None),
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn unsupported_coding_is_bad_request() {
        let out = exchange(
            "POST / HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: gzip\r\n\r\n",
            Arc::new(Hello),
            config(None),
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn malformed_request_line_is_bad_request() {
        let out = exchange("NOPE\r\n\r\n", Arc::new(Hello), config(None)).await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn truncated_request_is_bad_request() {
        let out = exchange(
            "GET /coffee HTTP/1.1\r\nHost: local",
            Arc::new(Hello),
            config(None),
        )
        .await;
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn chunked_body_with_trailers_reaches_the_handler() {
        let out = exchange(
            "POST /upload HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\nTrailer: Expires\r\n\r\n\
             4\r\ntest\r\n0\r\nExpires: Wed, 21 Oct 2015 07:28:00 GMT\r\n\r\n",
            Arc::new(EchoBody),
            config(None),
        )
        .await;

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("expires: Wed, 21 Oct 2015 07:28:00 GMT\r\n"));
        assert!(out.ends_with("test"));
    }

    #[tokio::test]
    async fn identity_body_reaches_the_handler() {
        let out = exchange(
            "POST /upload HTTP/1.1\r\nHost: h\r\nContent-Length: 9\r\n\r\nsome body",
            Arc::new(EchoBody),
            config(None),
        )
        .await;

        assert!(out.ends_with("some body"));
    }

    #[tokio::test]
    async fn keep_alive_serves_successive_requests() {
        let out = exchange(
            "GET /a HTTP/1.1\r\nHost: h\r\n\r\nGET /b HTTP/1.1\r\nHost: h\r\n\r\n",
            Arc::new(Hello),
            config(Some(Duration::from_secs(5))),
        )
        .await;

        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
        assert!(!out.contains("connection: close"));
    }

    #[tokio::test]
    async fn unread_body_is_drained_between_requests() {
        let out = exchange(
            "POST /a HTTP/1.1\r\nHost: h\r\nContent-Length: 6\r\n\r\nunread\
             GET /b HTTP/1.1\r\nHost: h\r\n\r\n",
            Arc::new(Hello), // never reads the body
            config(Some(Duration::from_secs(5))),
        )
        .await;

        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 2);
    }

    #[tokio::test]
    async fn client_connection_close_is_honoured() {
        let out = exchange(
            "GET /a HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n\
             GET /b HTTP/1.1\r\nHost: h\r\n\r\n",
            Arc::new(Hello),
            config(Some(Duration::from_secs(5))),
        )
        .await;

        // the second request is never served
        assert_eq!(out.matches("HTTP/1.1 200 OK\r\n").count(), 1);
    }

    #[tokio::test]
    async fn matching_etag_collapses_to_304() {
        struct Tagged;

        #[async_trait]
        impl Handler for Tagged {
            async fn call(&self, _req: &mut Request) -> Response {
                Response::text("cached content").with_header("etag", "\"v1\"")
            }
        }

        let out = exchange(
            "GET /c HTTP/1.1\r\nHost: h\r\nIf-None-Match: \"v1\"\r\n\r\n",
            Arc::new(Tagged),
            config(None),
        )
        .await;

        assert!(out.starts_with("HTTP/1.1 304 Not Modified\r\n"));
        assert!(!out.contains("cached content"));
    }

    #[tokio::test]
    async fn mismatched_etag_serves_the_body() {
        struct Tagged;

        #[async_trait]
        impl Handler for Tagged {
            async fn call(&self, _req: &mut Request) -> Response {
                Response::text("cached content").with_header("etag", "\"v2\"")
            }
        }

        let out = exchange(
            "GET /c HTTP/1.1\r\nHost: h\r\nIf-None-Match: \"v1\"\r\n\r\n",
            Arc::new(Tagged),
            config(None),
        )
        .await;

        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("cached content"));
    }

    #[tokio::test]
    async fn handler_panic_is_recovered_as_500() {
        struct Boom;

        #[async_trait]
        impl Handler for Boom {
            async fn call(&self, _req: &mut Request) -> Response {
                panic!("handler exploded");
            }
        }

        let out = exchange(
            "GET / HTTP/1.1\r\nHost: h\r\n\r\n",
            Arc::new(Boom),
            config(Some(Duration::from_secs(5))),
        )
        .await;

        assert!(out.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(out.ends_with("Internal Server Error"));
    }

    #[tokio::test]
    async fn expect_header_gets_continue() {
        let out = exchange(
            "POST / HTTP/1.1\r\nHost: h\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nhi",
            Arc::new(EchoBody),
            config(None),
        )
        .await;

        assert!(out.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn keep_alive_deadline_closes_idle_connections() {
        let (mut client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(serve_connection(
            server,
            Arc::new(Hello) as ArcHandler,
            config(Some(Duration::from_millis(30))),
            CancellationToken::new(),
        ));

        // no request: the server should give up on its own
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        assert!(out.is_empty());
        task.await.unwrap().unwrap();
    }
}
